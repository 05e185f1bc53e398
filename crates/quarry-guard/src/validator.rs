//! The security validator.
//!
//! An independent pass over the statement that will execute: restricted
//! tables, forbidden root commands, Cartesian-product risk, and the column
//! allowlist. Runs after tenant enforcement and does not trust it.

use core::ops::ControlFlow;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use sqlparser::ast::{Expr, Query, Select, SelectItem, SetExpr, Statement, Visit, Visitor};

use quarry_core::SchemaLoader;
use quarry_shape::{SqlAnalyzer, from_targets};

use crate::metadata::{SqlMetadata, cartesian_reasons, extract_metadata, extract_metadata_fallback};
use crate::policy::SecurityPolicy;
use crate::violation::{EnforcementAction, SecurityViolation, ViolationKind};

/// Outcome of a validation pass.
///
/// `metadata` is always populated — even when `is_valid` is false — so the
/// audit trail records what the statement referenced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub violations: Vec<SecurityViolation>,
    pub warnings: Vec<String>,
    pub metadata: SqlMetadata,
}

/// Validates statements against a [`SecurityPolicy`].
#[derive(Clone)]
pub struct SecurityValidator {
    policy: SecurityPolicy,
    analyzer: SqlAnalyzer,
}

impl SecurityValidator {
    /// Create a validator using the generic SQL dialect.
    pub fn new(policy: SecurityPolicy) -> Self {
        Self {
            policy,
            analyzer: SqlAnalyzer::default(),
        }
    }

    /// Create a validator parsing with a provider-specific dialect.
    pub fn with_provider(policy: SecurityPolicy, provider: impl Into<String>) -> Self {
        Self {
            policy,
            analyzer: SqlAnalyzer::new(provider),
        }
    }

    pub fn policy(&self) -> &SecurityPolicy {
        &self.policy
    }

    /// Validate a SQL string.
    ///
    /// Metadata extraction always runs; an unparseable statement fails
    /// closed with a `ForbiddenCommand` violation and regex-fallback
    /// lineage.
    pub fn validate_sql(
        &self,
        sql: &str,
        schema: Option<&dyn SchemaLoader>,
    ) -> ValidationResult {
        let stmt = match self.analyzer.parse_one(sql) {
            Ok(stmt) => stmt,
            Err(err) => {
                tracing::warn!(error = %err, "statement did not parse; failing closed");
                return ValidationResult {
                    is_valid: false,
                    violations: vec![SecurityViolation::new(
                        ViolationKind::ForbiddenCommand,
                        "statement could not be parsed; root command unconfirmed",
                    )],
                    warnings: vec!["metadata extracted via regex fallback".to_string()],
                    metadata: extract_metadata_fallback(sql),
                };
            }
        };

        let metadata = extract_metadata(&stmt);
        let (violations, warnings) = self.scan(&stmt, &metadata, schema);
        let is_valid = violations.is_empty();

        tracing::debug!(
            is_valid,
            violations = violations.len(),
            warnings = warnings.len(),
            tables = metadata.estimated_table_count,
            "security validation finished"
        );

        ValidationResult {
            is_valid,
            violations,
            warnings,
            metadata,
        }
    }

    /// Validate an already-parsed statement, returning blocking violations
    /// only.
    pub fn validate_security(
        &self,
        stmt: &Statement,
        schema: Option<&dyn SchemaLoader>,
    ) -> Vec<SecurityViolation> {
        let metadata = extract_metadata(stmt);
        self.scan(stmt, &metadata, schema).0
    }

    fn scan(
        &self,
        stmt: &Statement,
        metadata: &SqlMetadata,
        schema: Option<&dyn SchemaLoader>,
    ) -> (Vec<SecurityViolation>, Vec<String>) {
        let mut violations = Vec::new();
        let mut warnings = Vec::new();

        // Root command.
        let command = statement_command(stmt);
        if command != "SELECT" {
            if self.policy.forbidden_commands.contains(command) {
                violations.push(SecurityViolation::forbidden_command(command));
            } else {
                violations.push(
                    SecurityViolation::new(
                        ViolationKind::ForbiddenCommand,
                        format!("command '{command}' is not an allowed query command"),
                    )
                    .with_details(serde_json::json!({ "command": command })),
                );
            }
        }

        // Restricted tables, everywhere in the statement.
        for table in &metadata.table_lineage {
            if self.policy.is_restricted(table) {
                violations.push(SecurityViolation::restricted_table(table));
            }
        }

        // Cartesian risk, everywhere in the statement.
        let mut cartesian = CartesianScan::default();
        let _ = stmt.visit(&mut cartesian);
        for reason in cartesian.reasons {
            match self.policy.cartesian_policy {
                EnforcementAction::Block => {
                    violations.push(SecurityViolation::cartesian_join(reason));
                }
                EnforcementAction::Warn => {
                    warnings.push(format!("query risks a Cartesian product: {reason}"));
                }
            }
        }

        // Column allowlist on explicitly projected columns. `*` projections
        // are not individually checked.
        if let Some(action) = self.policy.column_allowlist_policy {
            for (table, column) in self.projected_columns(stmt) {
                if self.column_allowed(&table, &column, schema) {
                    continue;
                }
                match action {
                    EnforcementAction::Block => {
                        violations.push(SecurityViolation::column_not_allowed(&table, &column));
                    }
                    EnforcementAction::Warn => warnings.push(format!(
                        "column '{column}' of table '{table}' is not in the allowed set"
                    )),
                }
            }
        }

        (violations, warnings)
    }

    /// Explicitly projected `(table, column)` pairs the statement resolves.
    /// Unresolvable projections (wildcards, expressions, ambiguous
    /// unqualified columns) are skipped.
    fn projected_columns(&self, stmt: &Statement) -> Vec<(String, String)> {
        let Statement::Query(query) = stmt else {
            return Vec::new();
        };

        let mut out = Vec::new();
        collect_projected(query, &mut out);
        if let Some(with) = &query.with {
            for cte in &with.cte_tables {
                collect_projected(&cte.query, &mut out);
            }
        }
        out
    }

    fn column_allowed(
        &self,
        table: &str,
        column: &str,
        schema: Option<&dyn SchemaLoader>,
    ) -> bool {
        if let Some(allowed) = self.policy.allowed_columns(table) {
            return allowed.iter().any(|c| c.eq_ignore_ascii_case(column));
        }
        if let Some(schema) = schema {
            if schema.table_columns(table).is_some() {
                return schema.has_column(table, column);
            }
        }
        // No allowed set resolvable: nothing to check against.
        true
    }
}

fn collect_projected(query: &Query, out: &mut Vec<(String, String)>) {
    for select in direct_selects(&query.body) {
        let targets = from_targets(select);
        let alias_map: HashMap<String, String> = targets
            .iter()
            .map(|t| (t.qualifier().to_lowercase(), t.bare_name().to_string()))
            .collect();
        let single_table = (targets.len() == 1).then(|| targets[0].bare_name().to_string());

        for item in &select.projection {
            let expr = match item {
                SelectItem::UnnamedExpr(expr) => expr,
                SelectItem::ExprWithAlias { expr, .. } => expr,
                _ => continue,
            };
            match expr {
                Expr::Identifier(ident) => {
                    if let Some(table) = &single_table {
                        out.push((table.clone(), ident.value.clone()));
                    }
                }
                Expr::CompoundIdentifier(parts) if parts.len() >= 2 => {
                    let qualifier = parts[0].value.to_lowercase();
                    if let (Some(table), Some(last)) = (alias_map.get(&qualifier), parts.last()) {
                        out.push((table.clone(), last.value.clone()));
                    }
                }
                _ => {}
            }
        }
    }
}

fn direct_selects(body: &SetExpr) -> Vec<&Select> {
    match body {
        SetExpr::Select(select) => vec![select],
        SetExpr::SetOperation { left, right, .. } => {
            let mut selects = direct_selects(left);
            selects.extend(direct_selects(right));
            selects
        }
        SetExpr::Query(inner) => direct_selects(&inner.body),
        _ => Vec::new(),
    }
}

#[derive(Default)]
struct CartesianScan {
    reasons: Vec<&'static str>,
}

impl Visitor for CartesianScan {
    type Break = ();

    fn pre_visit_query(&mut self, query: &Query) -> ControlFlow<Self::Break> {
        for select in direct_selects_no_query(&query.body) {
            self.reasons.extend(cartesian_reasons(select));
        }
        ControlFlow::Continue(())
    }
}

/// Like `direct_selects`, but stops at nested `Query` nodes — the visitor
/// reaches those on its own.
fn direct_selects_no_query(body: &SetExpr) -> Vec<&Select> {
    match body {
        SetExpr::Select(select) => vec![select],
        SetExpr::SetOperation { left, right, .. } => {
            let mut selects = direct_selects_no_query(left);
            selects.extend(direct_selects_no_query(right));
            selects
        }
        _ => Vec::new(),
    }
}

/// Map a statement root to its command keyword.
fn statement_command(stmt: &Statement) -> &'static str {
    match stmt {
        Statement::Query(_) => "SELECT",
        Statement::Insert { .. } => "INSERT",
        Statement::Update { .. } => "UPDATE",
        Statement::Delete { .. } => "DELETE",
        Statement::Drop { .. } => "DROP",
        Statement::Truncate { .. } => "TRUNCATE",
        Statement::CreateTable { .. }
        | Statement::CreateView { .. }
        | Statement::CreateIndex { .. }
        | Statement::CreateSchema { .. }
        | Statement::CreateDatabase { .. } => "CREATE",
        Statement::AlterTable { .. } => "ALTER",
        Statement::Grant { .. } => "GRANT",
        Statement::Revoke { .. } => "REVOKE",
        Statement::Merge { .. } => "MERGE",
        Statement::Call { .. } => "CALL",
        Statement::Copy { .. } => "COPY",
        Statement::Set { .. } => "SET",
        Statement::Execute { .. } => "EXECUTE",
        _ => "OTHER",
    }
}

/// Validate a SQL string with the given policy and the generic dialect.
pub fn validate_sql(sql: &str, policy: &SecurityPolicy) -> ValidationResult {
    SecurityValidator::new(policy.clone()).validate_sql(sql, None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use quarry_core::InMemorySchema;

    fn validator() -> SecurityValidator {
        SecurityValidator::new(SecurityPolicy::default().with_restricted_table("payroll"))
    }

    fn kinds(result: &ValidationResult) -> Vec<ViolationKind> {
        result.violations.iter().map(|v| v.kind).collect()
    }

    #[test]
    fn clean_select_passes() {
        let result = validator().validate_sql("SELECT * FROM customers", None);
        assert!(result.is_valid);
        assert!(result.violations.is_empty());
    }

    #[test]
    fn restricted_table_rejected() {
        let result = validator().validate_sql("SELECT * FROM payroll", None);
        assert!(!result.is_valid);
        assert_eq!(kinds(&result), vec![ViolationKind::RestrictedTable]);
    }

    #[test]
    fn system_catalog_rejected() {
        let result = validator().validate_sql("SELECT * FROM pg_catalog.pg_tables", None);
        assert!(!result.is_valid);
        assert_eq!(kinds(&result), vec![ViolationKind::RestrictedTable]);
    }

    #[test]
    fn restricted_table_inside_subquery_rejected() {
        let result = validator().validate_sql(
            "SELECT * FROM customers WHERE id IN (SELECT emp_id FROM payroll)",
            None,
        );
        assert!(!result.is_valid);
        assert_eq!(kinds(&result), vec![ViolationKind::RestrictedTable]);
    }

    #[test]
    fn forbidden_commands_rejected() {
        for sql in [
            "DROP TABLE customers",
            "DELETE FROM customers",
            "UPDATE customers SET name = 'x'",
            "INSERT INTO customers (id) VALUES (1)",
            "GRANT SELECT ON customers TO intruder",
        ] {
            let result = validator().validate_sql(sql, None);
            assert!(!result.is_valid, "{sql} should be rejected");
            assert!(
                kinds(&result).contains(&ViolationKind::ForbiddenCommand),
                "{sql} should be a forbidden command"
            );
        }
    }

    #[test]
    fn cross_join_blocked_by_default() {
        let result = validator().validate_sql("SELECT * FROM a CROSS JOIN b", None);
        assert!(!result.is_valid);
        assert_eq!(kinds(&result), vec![ViolationKind::CartesianJoin]);
    }

    #[test]
    fn constant_truth_join_blocked() {
        let result = validator().validate_sql("SELECT * FROM a JOIN b ON 1=1", None);
        assert!(!result.is_valid);
        assert_eq!(kinds(&result), vec![ViolationKind::CartesianJoin]);
    }

    #[test]
    fn proper_equi_join_never_flagged() {
        let result = validator().validate_sql("SELECT * FROM a JOIN b ON a.id = b.a_id", None);
        assert!(result.is_valid, "{:?}", result.violations);
        assert!(!result.metadata.detected_cartesian);
    }

    #[test]
    fn cartesian_warn_policy_is_non_blocking() {
        let policy = SecurityPolicy {
            cartesian_policy: EnforcementAction::Warn,
            ..SecurityPolicy::default()
        };
        let result = SecurityValidator::new(policy).validate_sql("SELECT * FROM a CROSS JOIN b", None);
        assert!(result.is_valid);
        assert_eq!(result.warnings.len(), 1);
        assert!(result.metadata.detected_cartesian);
    }

    #[test]
    fn column_allowlist_blocks_unknown_columns() {
        let policy = SecurityPolicy {
            column_allowlist_policy: Some(EnforcementAction::Block),
            ..SecurityPolicy::default()
        };
        let schema = InMemorySchema::new().with_table("orders", ["id", "status"]);
        let validator = SecurityValidator::new(policy);

        let ok = validator.validate_sql("SELECT id, status FROM orders", Some(&schema));
        assert!(ok.is_valid, "{:?}", ok.violations);

        let bad = validator.validate_sql("SELECT id, ssn FROM orders", Some(&schema));
        assert!(!bad.is_valid);
        assert_eq!(kinds(&bad), vec![ViolationKind::ColumnAllowlist]);
    }

    #[test]
    fn wildcard_projection_is_not_column_checked() {
        let policy = SecurityPolicy {
            column_allowlist_policy: Some(EnforcementAction::Block),
            ..SecurityPolicy::default()
        };
        let schema = InMemorySchema::new().with_table("orders", ["id"]);
        let result =
            SecurityValidator::new(policy).validate_sql("SELECT * FROM orders", Some(&schema));
        assert!(result.is_valid);
    }

    #[test]
    fn qualified_projection_resolves_through_alias() {
        let policy = SecurityPolicy {
            column_allowlist_policy: Some(EnforcementAction::Block),
            ..SecurityPolicy::default()
        };
        let schema = InMemorySchema::new()
            .with_table("orders", ["id", "customer_id"])
            .with_table("customers", ["id", "name"]);
        let validator = SecurityValidator::new(policy);

        let result = validator.validate_sql(
            "SELECT o.id, c.secret FROM orders o JOIN customers c ON o.customer_id = c.id",
            Some(&schema),
        );
        assert!(!result.is_valid);
        assert_eq!(kinds(&result), vec![ViolationKind::ColumnAllowlist]);
    }

    #[test]
    fn unparseable_sql_fails_closed_with_metadata() {
        let result = validator().validate_sql("SELEC * FORM customers", None);
        assert!(!result.is_valid);
        assert_eq!(kinds(&result), vec![ViolationKind::ForbiddenCommand]);
        assert_eq!(
            result.metadata.extraction,
            crate::metadata::ExtractionTier::RegexFallback
        );
    }

    #[test]
    fn metadata_populated_on_failure() {
        let result = validator().validate_sql("SELECT * FROM payroll", None);
        assert!(!result.is_valid);
        assert_eq!(result.metadata.table_lineage, vec!["payroll"]);
    }
}
