//! The execution orchestrator.
//!
//! Composes the engine per request: tenant enforcement, security
//! validation, cursor decode, delegated execution, next-cursor issuance.
//! The orchestrator holds no mutable state and keeps nothing between
//! requests; the cursor is the only continuation state and the client
//! holds it.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sqlparser::ast::Statement;
use thiserror::Error;
use uuid::Uuid;

use quarry_core::{
    BackendCapabilities, SchemaLoader, SigningConfig, SigningSecret,
    build_backend_set_fingerprint, build_cursor_query_fingerprint, build_query_fingerprint,
};
use quarry_cursor::{
    CursorError, DecodeOptions, KeysetCursor, OffsetToken, OrderingKeySpec, check_keyset_safety,
    decode_keyset_cursor, decode_offset_pagination_token, encode_keyset_cursor,
    encode_offset_pagination_token,
};
use quarry_guard::{SecurityValidator, ValidationResult};
use quarry_shape::{SqlAnalyzer, order_keys, order_signature};
use quarry_tenancy::{PlaceholderStyle, TenantEnforcementPolicy, TenantEnforcementResult};

use crate::audit::{AuditEvent, AuditSink};
use crate::continuation::{bare_column, keyset_page, offset_page};
use crate::executor::{QueryExecutor, QueryPage};

/// Pagination strategy for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaginationMode {
    Offset,
    Keyset,
}

impl PaginationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Offset => "offset",
            Self::Keyset => "keyset",
        }
    }
}

/// Execution constraints recorded into the query fingerprint. Changing any
/// of them invalidates outstanding cursors, by design.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConstraints {
    pub max_rows: u64,
    pub max_bytes: u64,
    pub max_execution_ms: u64,
}

impl Default for ExecutionConstraints {
    fn default() -> Self {
        Self {
            max_rows: 10_000,
            max_bytes: 32 * 1024 * 1024,
            max_execution_ms: 30_000,
        }
    }
}

/// One query request.
#[derive(Debug, Clone)]
pub struct QueryRequest {
    pub sql: String,
    pub params: Vec<serde_json::Value>,
    pub tenant_id: Option<serde_json::Value>,
    pub page_size: u64,
    pub pagination: PaginationMode,
    /// Continuation token from the previous page, if any.
    pub cursor: Option<String>,
    /// Columns the caller vouches for as stable and non-nullable keyset
    /// tie-breakers (typically the primary key).
    pub stable_order_columns: Vec<String>,
}

/// The response for one page.
#[derive(Debug, Clone)]
pub struct QueryResponse {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<serde_json::Value>>,
    /// Whether more rows exist beyond this page, determined by
    /// over-fetching one row rather than a separate COUNT.
    pub has_more: bool,
    pub next_cursor: Option<String>,
    pub enforcement: TenantEnforcementResult,
    pub validation: ValidationResult,
    pub telemetry: BTreeMap<String, String>,
}

/// Orchestration failures. Policy rejections carry the full decision so
/// callers can surface the bounded reason code.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("tenant enforcement rejected the query ({reason_code})")]
    EnforcementRejected {
        reason_code: String,
        result: TenantEnforcementResult,
    },

    #[error("security validation failed")]
    ValidationFailed { validation: Box<ValidationResult> },

    #[error(transparent)]
    Cursor(#[from] CursorError),

    #[error("backend does not support {0} pagination")]
    PaginationUnsupported(&'static str),

    #[error("query must not carry its own LIMIT clause under pagination")]
    LimitClausePresent,

    #[error("ordering key column '{0}' is not in the result set")]
    OrderingKeyNotProjected(String),

    #[error("page size must be greater than zero")]
    InvalidPageSize,

    #[error("execution failed")]
    Execution(#[source] anyhow::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl OrchestratorError {
    /// The bounded reason code for telemetry and client surfaces.
    pub fn reason_code(&self) -> &str {
        match self {
            Self::EnforcementRejected { reason_code, .. } => reason_code,
            Self::ValidationFailed { .. } => "security_violation",
            Self::Cursor(err) => err.reason_code(),
            Self::PaginationUnsupported(_) => "pagination_unsupported",
            Self::LimitClausePresent => "limit_clause_present",
            Self::OrderingKeyNotProjected(_) => "ordering_key_not_projected",
            Self::InvalidPageSize => "invalid_page_size",
            Self::Execution(_) => "execution_failed",
            Self::Internal(_) => "internal",
        }
    }
}

/// Composes classification, tenant enforcement, validation, cursor
/// handling, and delegated execution per request.
pub struct QueryOrchestrator<E: QueryExecutor, S: AuditSink> {
    policy: TenantEnforcementPolicy,
    validator: SecurityValidator,
    signing: SigningConfig,
    /// Resolved once at construction; `None` fails every cursor decode
    /// closed.
    secret: Option<SigningSecret>,
    constraints: ExecutionConstraints,
    schema: Arc<dyn SchemaLoader>,
    executor: E,
    audit: S,
}

impl<E: QueryExecutor, S: AuditSink> QueryOrchestrator<E, S> {
    pub fn new(
        policy: TenantEnforcementPolicy,
        validator: SecurityValidator,
        signing: SigningConfig,
        constraints: ExecutionConstraints,
        schema: Arc<dyn SchemaLoader>,
        executor: E,
        audit: S,
    ) -> Self {
        let secret = signing.resolve_secret();
        Self {
            policy,
            validator,
            signing,
            secret,
            constraints,
            schema,
            executor,
            audit,
        }
    }

    /// Run one request end to end.
    pub async fn run(
        &self,
        request: &QueryRequest,
        capabilities: &BackendCapabilities,
    ) -> Result<QueryResponse, OrchestratorError> {
        let request_id = Uuid::new_v4();
        if request.page_size == 0 {
            return Err(OrchestratorError::InvalidPageSize);
        }

        // Tenant enforcement decides what SQL (if any) may execute.
        let decision = self.policy.evaluate(
            &request.sql,
            request.tenant_id.as_ref(),
            &request.params,
            capabilities,
            self.schema.as_ref(),
        );
        let mut telemetry = decision.telemetry.clone();
        telemetry.insert(
            "pagination_mode".to_string(),
            request.pagination.as_str().to_string(),
        );

        if !decision.should_execute {
            let reason_code = decision
                .result
                .reason_code
                .clone()
                .unwrap_or_else(|| "unsupported".to_string());
            self.record(request_id, request, capabilities, &decision.result, None, 0, false);
            return Err(OrchestratorError::EnforcementRejected {
                reason_code,
                result: decision.result,
            });
        }

        // Independent security pass over the SQL that will execute.
        let validation = self
            .validator
            .validate_sql(&decision.sql_to_execute, Some(self.schema.as_ref()));
        if !validation.is_valid {
            self.record(
                request_id,
                request,
                capabilities,
                &decision.result,
                Some(&validation),
                0,
                false,
            );
            return Err(OrchestratorError::ValidationFailed {
                validation: Box::new(validation),
            });
        }

        if !capabilities.supports_pagination {
            return Err(OrchestratorError::PaginationUnsupported("any"));
        }
        if request.pagination == PaginationMode::Keyset && !capabilities.supports_keyset {
            return Err(OrchestratorError::PaginationUnsupported("keyset"));
        }

        // Ordering facts come from the statement that executes.
        let analyzer = SqlAnalyzer::new(capabilities.provider.clone());
        let stmt = analyzer
            .parse_one(&decision.sql_to_execute)
            .map_err(|e| OrchestratorError::Internal(e.to_string()))?;
        let Statement::Query(query) = &stmt else {
            return Err(OrchestratorError::Internal(
                "enforced statement is not a query".to_string(),
            ));
        };
        if query.limit_clause.is_some() {
            return Err(OrchestratorError::LimitClausePresent);
        }
        let keys = order_keys(query);
        let order_sig = order_signature(query);

        // Fingerprints bind cursors to the original request, which is
        // stable across pages; the rewrite is deterministic given it.
        let fingerprint = build_query_fingerprint(
            &request.sql,
            &request.params,
            request.tenant_id.as_ref(),
            &capabilities.provider,
            self.constraints.max_rows,
            self.constraints.max_bytes,
            self.constraints.max_execution_ms,
            order_sig.as_deref(),
        );
        let query_fp = build_cursor_query_fingerprint(
            &request.sql,
            &capabilities.provider,
            request.pagination.as_str(),
            order_sig.as_deref(),
        );

        let now = chrono::Utc::now().timestamp();
        let options = DecodeOptions::from_config(&self.signing, self.secret.as_ref(), now)
            .with_expected_query_fp(&query_fp);
        let style = PlaceholderStyle::for_provider(&capabilities.provider);

        let (page, decoded_offset, keyset_specs, backend_set_fp) = match request.pagination {
            PaginationMode::Offset => {
                let offset = match &request.cursor {
                    Some(token) => {
                        let decoded =
                            decode_offset_pagination_token(token, &fingerprint, &options)?;
                        if decoded.is_legacy() {
                            telemetry.insert("legacy_cursor".to_string(), "true".to_string());
                        }
                        decoded.offset
                    }
                    None => 0,
                };
                let paged = offset_page(&decision.sql_to_execute, offset, request.page_size);
                (paged, offset, Vec::new(), None)
            }
            PaginationMode::Keyset => {
                check_keyset_safety(&keys, capabilities, &request.stable_order_columns)?;
                let specs: Vec<OrderingKeySpec> = keys
                    .iter()
                    .map(OrderingKeySpec::from_order_key)
                    .collect::<Option<_>>()
                    .ok_or(CursorError::UnstableTiebreaker)?;

                let backend_set_fp = capabilities
                    .is_federated()
                    .then(|| build_backend_set_fingerprint(&capabilities.backend_set()));

                let cursor_values = match &request.cursor {
                    Some(token) => {
                        let decoded = decode_keyset_cursor(
                            token,
                            &fingerprint,
                            &options,
                            backend_set_fp.as_deref(),
                        )?;
                        if decoded.issued_at.is_none() {
                            telemetry.insert("legacy_cursor".to_string(), "true".to_string());
                        }
                        if decoded.keys != specs {
                            return Err(CursorError::QueryMismatch.into());
                        }
                        Some(decoded.values)
                    }
                    None => None,
                };

                let paged = keyset_page(
                    &decision.sql_to_execute,
                    &specs,
                    cursor_values.as_deref(),
                    request.page_size,
                    style,
                    decision.params_to_bind.len(),
                );
                (paged, 0, specs, backend_set_fp)
            }
        };

        let mut bind_params = decision.params_to_bind.clone();
        bind_params.extend(page.params.iter().cloned());

        // Delegate execution, over-fetching one row.
        let mut result_page: QueryPage = self
            .executor
            .execute(capabilities, &page.sql, &bind_params)
            .await
            .map_err(OrchestratorError::Execution)?;

        let has_more = result_page.rows.len() as u64 > request.page_size;
        if has_more {
            result_page.rows.truncate(request.page_size as usize);
        }

        let next_cursor = if has_more {
            Some(self.issue_next_cursor(
                request,
                &result_page,
                &fingerprint,
                &query_fp,
                decoded_offset,
                &keyset_specs,
                backend_set_fp.as_deref(),
                now,
            )?)
        } else {
            None
        };

        self.record(
            request_id,
            request,
            capabilities,
            &decision.result,
            Some(&validation),
            result_page.rows.len(),
            has_more,
        );

        Ok(QueryResponse {
            columns: result_page.columns,
            rows: result_page.rows,
            has_more,
            next_cursor,
            enforcement: decision.result,
            validation,
            telemetry,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn issue_next_cursor(
        &self,
        request: &QueryRequest,
        page: &QueryPage,
        fingerprint: &str,
        query_fp: &str,
        current_offset: u64,
        keyset_specs: &[OrderingKeySpec],
        backend_set_fp: Option<&str>,
        now: i64,
    ) -> Result<String, OrchestratorError> {
        // Issuance fails closed too: without a secret there is no way to
        // mint a token a future decode would ever trust.
        let secret = self
            .secret
            .as_ref()
            .ok_or(CursorError::SecretMissing)?;
        match request.pagination {
            PaginationMode::Offset => {
                let token = OffsetToken::new(
                    current_offset + request.page_size,
                    request.page_size,
                    fingerprint,
                    now,
                )
                .with_max_age(self.signing.default_max_age_s)
                .with_query_fp(query_fp);
                Ok(encode_offset_pagination_token(&token, Some(secret))?)
            }
            PaginationMode::Keyset => {
                let last_row = page
                    .rows
                    .last()
                    .ok_or_else(|| OrchestratorError::Internal("empty page".to_string()))?;
                let mut values = Vec::with_capacity(keyset_specs.len());
                for spec in keyset_specs {
                    let wanted = bare_column(&spec.column);
                    let index = page
                        .columns
                        .iter()
                        .position(|c| c.eq_ignore_ascii_case(wanted))
                        .ok_or_else(|| {
                            OrchestratorError::OrderingKeyNotProjected(wanted.to_string())
                        })?;
                    values.push(last_row[index].clone());
                }
                let mut cursor =
                    KeysetCursor::new(values, keyset_specs.to_vec(), fingerprint, now)
                        .with_max_age(self.signing.default_max_age_s)
                        .with_query_fp(query_fp);
                if let Some(backend_set_fp) = backend_set_fp {
                    cursor = cursor.with_backend_set_fingerprint(backend_set_fp);
                }
                Ok(encode_keyset_cursor(&cursor, Some(secret))?)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn record(
        &self,
        request_id: Uuid,
        request: &QueryRequest,
        capabilities: &BackendCapabilities,
        enforcement: &TenantEnforcementResult,
        validation: Option<&ValidationResult>,
        rows: usize,
        has_more: bool,
    ) {
        self.audit.record(AuditEvent {
            request_id,
            occurred_at: chrono::Utc::now(),
            provider: capabilities.provider.clone(),
            tenant_present: request.tenant_id.is_some(),
            enforcement_outcome: serde_json::to_string(&enforcement.outcome)
                .unwrap_or_default()
                .trim_matches('"')
                .to_string(),
            reason_code: enforcement.reason_code.clone(),
            validation_passed: validation.map(|v| v.is_valid).unwrap_or(false),
            violation_count: validation.map(|v| v.violations.len()).unwrap_or(0),
            rows_returned: rows,
            has_more,
        });
    }
}
