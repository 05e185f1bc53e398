//! Resource bounds on tenant-enforcement evaluation.

use serde::{Deserialize, Serialize};

/// Bounds enforced during policy evaluation. Violations map deterministically
/// to `RejectedLimit` / `RejectedTimeout` outcomes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnforcementLimits {
    /// Maximum number of FROM targets the rewrite may scope.
    #[serde(default = "default_max_rewrite_targets")]
    pub max_rewrite_targets: usize,

    /// Maximum number of parameters bound to the rewritten query.
    #[serde(default = "default_max_bound_params")]
    pub max_bound_params: usize,

    /// Maximum AST node count accepted for rewriting.
    #[serde(default = "default_max_ast_nodes")]
    pub max_ast_nodes: usize,

    /// Wall-clock budget for a single evaluation, in milliseconds.
    #[serde(default = "default_hard_timeout_ms")]
    pub hard_timeout_ms: u64,
}

impl Default for EnforcementLimits {
    fn default() -> Self {
        Self {
            max_rewrite_targets: default_max_rewrite_targets(),
            max_bound_params: default_max_bound_params(),
            max_ast_nodes: default_max_ast_nodes(),
            hard_timeout_ms: default_hard_timeout_ms(),
        }
    }
}

fn default_max_rewrite_targets() -> usize {
    16
}

fn default_max_bound_params() -> usize {
    256
}

fn default_max_ast_nodes() -> usize {
    5_000
}

fn default_hard_timeout_ms() -> u64 {
    250
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_missing_fields() {
        let limits: EnforcementLimits = serde_yaml::from_str("max_rewrite_targets: 4").unwrap();
        assert_eq!(limits.max_rewrite_targets, 4);
        assert_eq!(limits.max_bound_params, 256);
        assert_eq!(limits.max_ast_nodes, 5_000);
        assert_eq!(limits.hard_timeout_ms, 250);
    }
}
