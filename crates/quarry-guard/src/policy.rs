//! Security policy configuration.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;

use quarry_core::ConfigError;

use crate::violation::EnforcementAction;

/// Configuration of the security validator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityPolicy {
    /// Exact (bare or qualified) table names that may never be referenced.
    #[serde(default)]
    pub restricted_tables: Vec<String>,

    /// Name prefixes that may never be referenced. System catalogs are
    /// denylisted by default.
    #[serde(default = "default_restricted_prefixes")]
    pub restricted_prefixes: Vec<String>,

    /// Root commands that are rejected outright. Any root that is not a
    /// SELECT and not in this set is still rejected (fail-closed); the set
    /// exists so messages name the command.
    #[serde(default = "default_forbidden_commands")]
    pub forbidden_commands: HashSet<String>,

    /// Reaction to Cartesian-product risk.
    #[serde(default)]
    pub cartesian_policy: EnforcementAction,

    /// Reaction to column-allowlist misses. `None` disables the check.
    #[serde(default)]
    pub column_allowlist_policy: Option<EnforcementAction>,

    /// Explicit per-table allowed columns. Tables not listed here fall back
    /// to the schema snapshot, when one is provided.
    #[serde(default)]
    pub column_allowlist: HashMap<String, HashSet<String>>,
}

impl Default for SecurityPolicy {
    fn default() -> Self {
        Self {
            restricted_tables: Vec::new(),
            restricted_prefixes: default_restricted_prefixes(),
            forbidden_commands: default_forbidden_commands(),
            cartesian_policy: EnforcementAction::default(),
            column_allowlist_policy: None,
            column_allowlist: HashMap::new(),
        }
    }
}

impl SecurityPolicy {
    /// Load a security policy from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&content)
    }

    /// Parse a security policy from YAML content.
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(content).map_err(ConfigError::from)
    }

    pub fn with_restricted_table(mut self, table: impl Into<String>) -> Self {
        self.restricted_tables.push(table.into());
        self
    }

    /// Whether a table reference hits the restricted list. Matching is
    /// case-insensitive and prefix-aware; both the full (qualified) name and
    /// the bare name are checked.
    pub fn is_restricted(&self, table: &str) -> bool {
        let full = table.to_lowercase();
        let bare = full.rsplit('.').next().unwrap_or(&full).to_string();

        if self
            .restricted_tables
            .iter()
            .any(|t| t.to_lowercase() == full || t.to_lowercase() == bare)
        {
            return true;
        }
        self.restricted_prefixes
            .iter()
            .any(|p| full.starts_with(&p.to_lowercase()) || bare.starts_with(&p.to_lowercase()))
    }

    /// The allowed columns for a table, from the explicit allowlist.
    pub fn allowed_columns(&self, table: &str) -> Option<&HashSet<String>> {
        let bare = table.rsplit('.').next().unwrap_or(table);
        self.column_allowlist
            .get(table)
            .or_else(|| self.column_allowlist.get(bare))
    }
}

fn default_restricted_prefixes() -> Vec<String> {
    vec![
        "pg_catalog.".to_string(),
        "pg_".to_string(),
        "information_schema.".to_string(),
    ]
}

fn default_forbidden_commands() -> HashSet<String> {
    [
        "INSERT", "UPDATE", "DELETE", "DROP", "TRUNCATE", "CREATE", "ALTER", "GRANT", "REVOKE",
        "MERGE", "CALL", "COPY", "SET", "EXECUTE",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_catalogs_are_restricted_by_default() {
        let policy = SecurityPolicy::default();
        assert!(policy.is_restricted("pg_catalog.pg_tables"));
        assert!(policy.is_restricted("pg_class"));
        assert!(policy.is_restricted("information_schema.tables"));
        assert!(!policy.is_restricted("customers"));
    }

    #[test]
    fn restricted_match_is_case_insensitive_and_schema_aware() {
        let policy = SecurityPolicy::default().with_restricted_table("payroll");
        assert!(policy.is_restricted("PAYROLL"));
        assert!(policy.is_restricted("hr.payroll"));
        assert!(!policy.is_restricted("payroll_summary_v"));
    }

    #[test]
    fn parse_policy_yaml() {
        let yaml = r#"
restricted_tables:
  - payroll
cartesian_policy: warn
column_allowlist_policy: block
column_allowlist:
  orders: [id, status]
"#;
        let policy = SecurityPolicy::from_yaml(yaml).unwrap();
        assert!(policy.is_restricted("payroll"));
        assert_eq!(policy.cartesian_policy, EnforcementAction::Warn);
        assert_eq!(
            policy.column_allowlist_policy,
            Some(EnforcementAction::Block)
        );
        assert!(policy.allowed_columns("orders").unwrap().contains("id"));
    }
}
