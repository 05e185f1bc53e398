//! # quarry-core
//!
//! Shared types for the Quarry query-safety engine:
//!
//! - Configuration (tenancy structure, enforcement limits, cursor signing)
//! - Backend capability descriptors
//! - The schema-snapshot handle used by the validator and the tenancy policy
//! - Query fingerprint builders binding cursors to the query they were
//!   issued under

pub mod capability;
pub mod config;
pub mod fingerprint;
pub mod schema;

pub use capability::{BackendCapabilities, ExecutionTopology, TenantEnforcementMode};
pub use config::{
    ConfigError, EnforcementLimits, SigningConfig, SigningSecret, TableTenancyConfig,
    TenancyConfig,
};
pub use fingerprint::{
    build_backend_set_fingerprint, build_cursor_query_fingerprint, build_query_fingerprint,
};
pub use schema::{EmptySchema, InMemorySchema, SchemaLoader};
