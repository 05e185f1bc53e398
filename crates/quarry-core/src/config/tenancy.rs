//! Tenancy configuration for multi-tenant databases.
//!
//! Defines how multi-tenancy is structured: the tenant column per table and
//! which tables are global (shared across tenants, never scoped).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

use super::ConfigError;

/// Configuration for tenant isolation.
///
/// This describes the database-level structure of multi-tenancy, separate
/// from which tables a given request is allowed to touch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenancyConfig {
    /// Default column name for tenant isolation, used when not overridden
    /// per-table.
    #[serde(default = "default_tenant_column")]
    pub default_column: String,

    /// Per-table tenant column configuration.
    #[serde(default)]
    pub tables: HashMap<String, TableTenancyConfig>,

    /// Tables that are global (no tenant scoping applied).
    #[serde(default)]
    pub global_tables: Vec<String>,
}

impl Default for TenancyConfig {
    fn default() -> Self {
        Self {
            default_column: default_tenant_column(),
            tables: HashMap::new(),
            global_tables: Vec::new(),
        }
    }
}

/// Per-table tenancy configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TableTenancyConfig {
    /// The column used for tenant isolation in this table.
    #[serde(default)]
    pub tenant_column: Option<String>,

    /// Whether this is a global table (no tenant scoping).
    #[serde(default)]
    pub global: bool,
}

impl TenancyConfig {
    /// Load tenancy configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&content)
    }

    /// Parse tenancy configuration from YAML content.
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(content).map_err(ConfigError::from)
    }

    /// Get the tenant column for a table, or `None` if the table is global.
    pub fn get_tenant_column(&self, table_name: &str) -> Option<&str> {
        if self.global_tables.iter().any(|t| t == table_name) {
            return None;
        }

        if let Some(table_config) = self.tables.get(table_name) {
            if table_config.global {
                return None;
            }
            if let Some(col) = table_config.tenant_column.as_deref() {
                return Some(col);
            }
        }

        Some(&self.default_column)
    }

    /// Check if a table is global (no tenant scoping).
    pub fn is_global_table(&self, table_name: &str) -> bool {
        if self.global_tables.iter().any(|t| t == table_name) {
            return true;
        }
        self.tables
            .get(table_name)
            .map(|c| c.global)
            .unwrap_or(false)
    }
}

fn default_tenant_column() -> String {
    "tenant_id".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_tenant_column_applies() {
        let config = TenancyConfig::default();
        assert_eq!(config.get_tenant_column("orders"), Some("tenant_id"));
    }

    #[test]
    fn per_table_override() {
        let mut config = TenancyConfig::default();
        config.tables.insert(
            "orders".to_string(),
            TableTenancyConfig {
                tenant_column: Some("customer_org_id".to_string()),
                global: false,
            },
        );
        assert_eq!(config.get_tenant_column("orders"), Some("customer_org_id"));
        assert_eq!(config.get_tenant_column("users"), Some("tenant_id"));
    }

    #[test]
    fn global_tables_are_not_scoped() {
        let mut config = TenancyConfig::default();
        config.global_tables.push("currencies".to_string());
        assert_eq!(config.get_tenant_column("currencies"), None);
        assert!(config.is_global_table("currencies"));
    }

    #[test]
    fn parse_tenancy_yaml() {
        let yaml = r#"
default_column: organization_id

tables:
  orders:
    tenant_column: customer_org_id
  currencies:
    global: true
"#;
        let config = TenancyConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.default_column, "organization_id");
        assert_eq!(
            config.get_tenant_column("orders"),
            Some("customer_org_id")
        );
        assert_eq!(
            config.get_tenant_column("customers"),
            Some("organization_id")
        );
        assert!(config.is_global_table("currencies"));
    }
}
