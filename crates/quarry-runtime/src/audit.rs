//! Audit trail boundary.

use uuid::Uuid;

/// One audited request. Reason codes and outcomes come from the bounded
/// vocabularies; nothing here carries SQL text or token bytes.
#[derive(Debug, Clone)]
pub struct AuditEvent {
    pub request_id: Uuid,
    pub occurred_at: chrono::DateTime<chrono::Utc>,
    pub provider: String,
    pub tenant_present: bool,
    /// Enforcement outcome tag (e.g. "APPLIED", "REJECTED_UNSUPPORTED").
    pub enforcement_outcome: String,
    pub reason_code: Option<String>,
    pub validation_passed: bool,
    pub violation_count: usize,
    pub rows_returned: usize,
    pub has_more: bool,
}

/// Trait boundary for audit delivery. Implementations can ship events to a
/// database, a queue, or an outbox.
pub trait AuditSink: Send + Sync {
    fn record(&self, event: AuditEvent);
}

/// Sink that emits audit events as structured tracing records.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: AuditEvent) {
        tracing::info!(
            request_id = %event.request_id,
            provider = %event.provider,
            tenant_present = event.tenant_present,
            outcome = %event.enforcement_outcome,
            reason_code = event.reason_code.as_deref().unwrap_or(""),
            validation_passed = event.validation_passed,
            violations = event.violation_count,
            rows = event.rows_returned,
            has_more = event.has_more,
            "query request audited"
        );
    }
}

/// Sink that drops events. For tests and embedded use where the caller
/// audits elsewhere.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullAuditSink;

impl AuditSink for NullAuditSink {
    fn record(&self, _event: AuditEvent) {}
}
