//! Security violation values.
//!
//! Violations are first-class values, not errors: callers decide whether to
//! surface, retry, or terminate.

use serde::{Deserialize, Serialize};

/// Categories of security violations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    /// A referenced table is on the restricted list (system catalogs,
    /// denylisted tables).
    RestrictedTable,
    /// The root command is not an allowed query command.
    ForbiddenCommand,
    /// The query risks a Cartesian product.
    CartesianJoin,
    /// A projected column is outside the per-table allowed set.
    ColumnAllowlist,
}

/// A single security violation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityViolation {
    pub kind: ViolationKind,
    /// Human-readable message. Never contains raw SQL text.
    pub message: String,
    /// Structured details for audit consumers.
    #[serde(default)]
    pub details: serde_json::Value,
}

impl SecurityViolation {
    pub fn new(kind: ViolationKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            details: serde_json::Value::Null,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }

    pub fn restricted_table(table: &str) -> Self {
        Self::new(
            ViolationKind::RestrictedTable,
            format!("access to table '{table}' is restricted"),
        )
        .with_details(serde_json::json!({ "table": table }))
    }

    pub fn forbidden_command(command: &str) -> Self {
        Self::new(
            ViolationKind::ForbiddenCommand,
            format!("command '{command}' is not allowed"),
        )
        .with_details(serde_json::json!({ "command": command }))
    }

    pub fn cartesian_join(reason: &str) -> Self {
        Self::new(
            ViolationKind::CartesianJoin,
            format!("query risks a Cartesian product: {reason}"),
        )
        .with_details(serde_json::json!({ "reason": reason }))
    }

    pub fn column_not_allowed(table: &str, column: &str) -> Self {
        Self::new(
            ViolationKind::ColumnAllowlist,
            format!("column '{column}' of table '{table}' is not in the allowed set"),
        )
        .with_details(serde_json::json!({ "table": table, "column": column }))
    }
}

/// How a check reacts when it trips: record a warning, or block the query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnforcementAction {
    Warn,
    Block,
}

impl Default for EnforcementAction {
    fn default() -> Self {
        Self::Block
    }
}
