//! Configuration types for the Quarry engine.
//!
//! Configuration is consumed as constructor parameters only: the engine
//! never reads the environment or discovers files itself. `TenancyConfig`
//! supports YAML loading for deployments that keep a `tenancy.yaml`
//! alongside their adapter config.

pub mod limits;
pub mod signing;
pub mod tenancy;

use thiserror::Error;

pub use limits::EnforcementLimits;
pub use signing::{SigningConfig, SigningSecret};
pub use tenancy::{TableTenancyConfig, TenancyConfig};

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error reading configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse configuration: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid configuration: {0}")]
    Config(String),
}
