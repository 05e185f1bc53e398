//! Backend capability descriptors.
//!
//! Each wire adapter (Postgres, BigQuery, Databricks, Snowflake, ...) exposes
//! a capability descriptor so the engine can make safety decisions without
//! knowing anything else about the backend. The descriptor is a plain
//! immutable struct with named fields, checked statically.

use serde::{Deserialize, Serialize};

/// How tenant isolation is enforced for a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TenantEnforcementMode {
    /// The engine rewrites the SQL to inject tenant predicates.
    SqlRewrite,
    /// The database enforces isolation via session-level RLS state.
    RlsSession,
    /// No tenant enforcement (single-tenant deployments).
    None,
}

/// Whether queries run against a single backend or are federated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionTopology {
    Single,
    /// Federated execution across the named backends.
    Federated { backends: Vec<String> },
}

/// Capability flags a backend adapter exposes to the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendCapabilities {
    /// Provider identifier (e.g. "postgres", "bigquery", "sqlite").
    pub provider: String,
    /// Whether the backend supports pagination at all.
    pub supports_pagination: bool,
    /// Whether the backend supports keyset (seek) pagination.
    pub supports_keyset: bool,
    /// Whether federated execution guarantees a deterministic
    /// cross-backend ordering.
    pub supports_federated_deterministic_ordering: bool,
    /// How tenant isolation is enforced.
    pub tenant_enforcement_mode: TenantEnforcementMode,
    /// Execution topology.
    pub execution_topology: ExecutionTopology,
}

impl BackendCapabilities {
    /// A single-backend descriptor with SQL-rewrite tenant enforcement.
    pub fn sql_rewrite(provider: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            supports_pagination: true,
            supports_keyset: true,
            supports_federated_deterministic_ordering: false,
            tenant_enforcement_mode: TenantEnforcementMode::SqlRewrite,
            execution_topology: ExecutionTopology::Single,
        }
    }

    /// The identifiers of the live backend set.
    ///
    /// Single-backend topologies report the provider itself.
    pub fn backend_set(&self) -> Vec<&str> {
        match &self.execution_topology {
            ExecutionTopology::Single => vec![self.provider.as_str()],
            ExecutionTopology::Federated { backends } => {
                backends.iter().map(String::as_str).collect()
            }
        }
    }

    pub fn is_federated(&self) -> bool {
        matches!(self.execution_topology, ExecutionTopology::Federated { .. })
    }
}
