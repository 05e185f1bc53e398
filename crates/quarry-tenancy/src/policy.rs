//! The tenant-enforcement policy engine.
//!
//! An immutable configuration object constructed once and shared read-only.
//! Evaluation is a synchronous, pure computation over the parsed statement;
//! it does not suspend, block, or spawn.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Instant;

use quarry_core::{
    BackendCapabilities, EnforcementLimits, SchemaLoader, TenancyConfig, TenantEnforcementMode,
};
use quarry_shape::{ClassifierConfig, SqlAnalyzer, count_nodes};

use crate::outcome::{
    EnforcementOutcome, RejectReason, TenantEnforcementResult, bounded_reason_code,
};
use crate::rewrite::{PlaceholderStyle, inject_tenant_predicates};

/// The decision returned by [`TenantEnforcementPolicy::evaluate`].
#[derive(Debug, Clone)]
pub struct EnforcementDecision {
    /// Whether the caller may execute the query.
    pub should_execute: bool,
    /// The SQL to execute. Unchanged unless the rewrite applied.
    pub sql_to_execute: String,
    /// The full bind list: the caller's parameters plus injected tenant
    /// parameters.
    pub params_to_bind: Vec<serde_json::Value>,
    /// The enforcement result for the response envelope.
    pub result: TenantEnforcementResult,
    /// Telemetry attributes (bounded keys and values, safe to export).
    pub telemetry: BTreeMap<String, String>,
}

impl EnforcementDecision {
    /// The public reason code, present iff the outcome is a rejection.
    pub fn bounded_reason_code(&self) -> Option<&str> {
        self.result.reason_code.as_deref()
    }
}

/// Immutable tenant-enforcement policy.
#[derive(Debug, Clone)]
pub struct TenantEnforcementPolicy {
    tenancy: TenancyConfig,
    limits: EnforcementLimits,
    strict_classification: bool,
    table_allowlist: BTreeSet<String>,
    enabled: bool,
}

impl TenantEnforcementPolicy {
    /// Build a policy. The allowlist holds the bare names of tables the
    /// rewrite may scope; matching is case-insensitive.
    pub fn new(
        tenancy: TenancyConfig,
        limits: EnforcementLimits,
        table_allowlist: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            tenancy,
            limits,
            strict_classification: true,
            table_allowlist: table_allowlist
                .into_iter()
                .map(|t| t.to_lowercase())
                .collect(),
            enabled: true,
        }
    }

    /// Use the relaxed correlated-subquery carve-out. The strict mode is
    /// the primary contract; prefer it.
    pub fn with_relaxed_classification(mut self) -> Self {
        self.strict_classification = false;
        self
    }

    /// Disable enforcement. Scoping modes then reject rather than letting
    /// unscoped SQL through.
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Whether a mode requires the engine to mutate SQL.
    ///
    /// `rls_session` reports `false`: the database enforces isolation via
    /// session state, and the evaluation still reports `APPLIED`.
    pub fn decide_enforcement(mode: TenantEnforcementMode) -> bool {
        match mode {
            TenantEnforcementMode::SqlRewrite => true,
            TenantEnforcementMode::RlsSession => false,
            TenantEnforcementMode::None => false,
        }
    }

    /// Map an internal cause to the stable public vocabulary.
    pub fn bounded_reason_code(reason: RejectReason) -> &'static str {
        bounded_reason_code(reason)
    }

    /// Map an internal cause to its outcome and public code. Callers that
    /// enforce `hard_timeout_ms` by wrapping the evaluation use this to
    /// fold their own timeout into the same bounded vocabulary.
    pub fn determine_outcome(reason: RejectReason) -> (EnforcementOutcome, &'static str) {
        (reason.outcome(), bounded_reason_code(reason))
    }

    /// Evaluate tenant enforcement for one request.
    pub fn evaluate(
        &self,
        sql: &str,
        tenant_id: Option<&serde_json::Value>,
        params: &[serde_json::Value],
        capabilities: &BackendCapabilities,
        schema: &dyn SchemaLoader,
    ) -> EnforcementDecision {
        let started = Instant::now();
        let mode = capabilities.tenant_enforcement_mode;

        let mut telemetry = BTreeMap::new();
        telemetry.insert("provider".to_string(), capabilities.provider.clone());
        telemetry.insert("mode".to_string(), mode_tag(mode).to_string());

        // Drift guard: provider/mode pairs not explicitly mapped fail
        // closed instead of silently defaulting to permissive behavior.
        if !supported_combination(&capabilities.provider, mode) {
            tracing::warn!(
                provider = %capabilities.provider,
                mode = mode_tag(mode),
                "unmapped provider/mode combination; failing closed"
            );
            return self.reject(sql, params, mode, RejectReason::UnknownProviderMode, telemetry);
        }

        if !self.enabled && mode != TenantEnforcementMode::None {
            return self.reject(sql, params, mode, RejectReason::Disabled, telemetry);
        }

        match mode {
            TenantEnforcementMode::None => EnforcementDecision {
                should_execute: true,
                sql_to_execute: sql.to_string(),
                params_to_bind: params.to_vec(),
                result: TenantEnforcementResult::skipped(mode),
                telemetry,
            },
            TenantEnforcementMode::RlsSession => {
                if tenant_id.is_none() {
                    return self.reject(sql, params, mode, RejectReason::MissingTenant, telemetry);
                }
                // The database enforces via session state; no SQL mutation.
                EnforcementDecision {
                    should_execute: true,
                    sql_to_execute: sql.to_string(),
                    params_to_bind: params.to_vec(),
                    result: TenantEnforcementResult::applied(mode),
                    telemetry,
                }
            }
            TenantEnforcementMode::SqlRewrite => {
                self.evaluate_rewrite(sql, tenant_id, params, capabilities, schema, started, telemetry)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn evaluate_rewrite(
        &self,
        sql: &str,
        tenant_id: Option<&serde_json::Value>,
        params: &[serde_json::Value],
        capabilities: &BackendCapabilities,
        schema: &dyn SchemaLoader,
        started: Instant,
        mut telemetry: BTreeMap<String, String>,
    ) -> EnforcementDecision {
        let mode = TenantEnforcementMode::SqlRewrite;

        let Some(tenant_id) = tenant_id else {
            return self.reject(sql, params, mode, RejectReason::MissingTenant, telemetry);
        };

        let analyzer = SqlAnalyzer::new(capabilities.provider.clone());
        let classifier = ClassifierConfig {
            strict: self.strict_classification,
            max_ast_nodes: self.limits.max_ast_nodes,
        };
        let shape = analyzer.classify(sql, &classifier);
        telemetry.insert("shape".to_string(), format!("{shape:?}"));
        if let Some(reason) = RejectReason::from_shape(shape) {
            return self.reject(sql, params, mode, reason, telemetry);
        }

        let mut stmt = match analyzer.parse_one(sql) {
            Ok(stmt) => stmt,
            Err(_) => {
                return self.reject(sql, params, mode, RejectReason::ParseFailure, telemetry);
            }
        };

        if count_nodes(&stmt) > self.limits.max_ast_nodes {
            return self.reject(sql, params, mode, RejectReason::AstNodeLimit, telemetry);
        }

        let style = PlaceholderStyle::for_provider(&capabilities.provider);
        telemetry.insert(
            "placeholder_style".to_string(),
            style.as_str().to_string(),
        );

        let rewrite = inject_tenant_predicates(
            &mut stmt,
            tenant_id,
            &self.tenancy,
            &self.table_allowlist,
            schema,
            style,
            params.len(),
        );

        if rewrite.tenant_params.is_empty() {
            // No matching tables or tenant column absent: not an error.
            return EnforcementDecision {
                should_execute: true,
                sql_to_execute: sql.to_string(),
                params_to_bind: params.to_vec(),
                result: TenantEnforcementResult::skipped(mode),
                telemetry,
            };
        }

        telemetry.insert(
            "targets_scoped".to_string(),
            rewrite.scoped_tables.len().to_string(),
        );

        if rewrite.scoped_tables.len() > self.limits.max_rewrite_targets {
            return self.reject(sql, params, mode, RejectReason::RewriteTargetLimit, telemetry);
        }
        let total_params = params.len() + rewrite.tenant_params.len();
        if total_params > self.limits.max_bound_params {
            return self.reject(sql, params, mode, RejectReason::BoundParamLimit, telemetry);
        }
        if started.elapsed().as_millis() as u64 > self.limits.hard_timeout_ms {
            return self.reject(sql, params, mode, RejectReason::Timeout, telemetry);
        }

        let mut params_to_bind = params.to_vec();
        params_to_bind.extend(rewrite.tenant_params);

        tracing::debug!(
            targets = rewrite.scoped_tables.len(),
            "tenant enforcement applied via SQL rewrite"
        );

        EnforcementDecision {
            should_execute: true,
            sql_to_execute: rewrite.sql,
            params_to_bind,
            result: TenantEnforcementResult::applied(mode),
            telemetry,
        }
    }

    fn reject(
        &self,
        sql: &str,
        params: &[serde_json::Value],
        mode: TenantEnforcementMode,
        reason: RejectReason,
        mut telemetry: BTreeMap<String, String>,
    ) -> EnforcementDecision {
        telemetry.insert(
            "failure_category".to_string(),
            reason.failure_category().to_string(),
        );
        tracing::debug!(
            reason_code = bounded_reason_code(reason),
            category = reason.failure_category(),
            "tenant enforcement rejected query"
        );
        EnforcementDecision {
            should_execute: false,
            sql_to_execute: sql.to_string(),
            params_to_bind: params.to_vec(),
            result: TenantEnforcementResult::rejected(mode, reason),
            telemetry,
        }
    }
}

fn mode_tag(mode: TenantEnforcementMode) -> &'static str {
    match mode {
        TenantEnforcementMode::SqlRewrite => "sql_rewrite",
        TenantEnforcementMode::RlsSession => "rls_session",
        TenantEnforcementMode::None => "none",
    }
}

/// The explicitly mapped provider/mode pairs. Everything else is drift.
fn supported_combination(provider: &str, mode: TenantEnforcementMode) -> bool {
    let provider = provider.to_lowercase();
    match mode {
        TenantEnforcementMode::SqlRewrite => matches!(
            provider.as_str(),
            "postgres" | "postgresql" | "sqlite" | "mysql" | "duckdb" | "generic"
        ),
        TenantEnforcementMode::RlsSession => {
            matches!(provider.as_str(), "postgres" | "postgresql")
        }
        TenantEnforcementMode::None => true,
    }
}
