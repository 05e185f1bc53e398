//! Enforcement outcomes and the bounded reason-code vocabulary.
//!
//! Internal causes are fine-grained; what leaves the engine is a small,
//! stable vocabulary that never leaks internals. Unknown causes collapse to
//! a generic `unsupported` code.

use serde::{Deserialize, Serialize};

use quarry_core::TenantEnforcementMode;
use quarry_shape::SqlShape;

/// The outcome of a tenant-enforcement evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EnforcementOutcome {
    Applied,
    SkippedNotRequired,
    RejectedUnsupported,
    RejectedDisabled,
    RejectedLimit,
    RejectedMissingTenant,
    RejectedTimeout,
}

impl EnforcementOutcome {
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::RejectedUnsupported
                | Self::RejectedDisabled
                | Self::RejectedLimit
                | Self::RejectedMissingTenant
                | Self::RejectedTimeout
        )
    }
}

/// Fine-grained internal rejection causes. Never serialized; the public
/// surface is [`bounded_reason_code`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    ParseFailure,
    StatementNotSelect,
    SetOperation,
    CorrelatedSubquery,
    QueryTooComplex,
    MissingTenant,
    RewriteTargetLimit,
    BoundParamLimit,
    AstNodeLimit,
    Timeout,
    Disabled,
    UnknownProviderMode,
}

impl RejectReason {
    /// The outcome an internal cause maps to.
    pub fn outcome(&self) -> EnforcementOutcome {
        match self {
            Self::ParseFailure
            | Self::StatementNotSelect
            | Self::SetOperation
            | Self::CorrelatedSubquery
            | Self::QueryTooComplex
            | Self::UnknownProviderMode => EnforcementOutcome::RejectedUnsupported,
            Self::MissingTenant => EnforcementOutcome::RejectedMissingTenant,
            Self::RewriteTargetLimit | Self::BoundParamLimit | Self::AstNodeLimit => {
                EnforcementOutcome::RejectedLimit
            }
            Self::Timeout => EnforcementOutcome::RejectedTimeout,
            Self::Disabled => EnforcementOutcome::RejectedDisabled,
        }
    }

    /// Failure-category telemetry tag. Drift (unknown provider/mode pairs)
    /// gets its own category so silent fallthroughs show up in dashboards.
    pub fn failure_category(&self) -> &'static str {
        match self {
            Self::ParseFailure
            | Self::StatementNotSelect
            | Self::SetOperation
            | Self::CorrelatedSubquery
            | Self::QueryTooComplex => "shape",
            Self::MissingTenant => "tenant",
            Self::RewriteTargetLimit | Self::BoundParamLimit | Self::AstNodeLimit => "limit",
            Self::Timeout => "timeout",
            Self::Disabled => "disabled",
            Self::UnknownProviderMode => "drift",
        }
    }

    /// The internal cause corresponding to an unsafe shape.
    pub fn from_shape(shape: SqlShape) -> Option<Self> {
        match shape {
            SqlShape::SafeSimpleSelect | SqlShape::SafeCteQuery => None,
            SqlShape::ParseError => Some(Self::ParseFailure),
            SqlShape::UnsupportedStatementType => Some(Self::StatementNotSelect),
            SqlShape::UnsupportedSetOperation => Some(Self::SetOperation),
            SqlShape::UnsupportedCorrelatedSubquery => Some(Self::CorrelatedSubquery),
            SqlShape::UnsupportedComplexity => Some(Self::QueryTooComplex),
        }
    }
}

/// Map an internal cause to the stable, externally safe vocabulary.
pub fn bounded_reason_code(reason: RejectReason) -> &'static str {
    match reason {
        RejectReason::ParseFailure => "parse_error",
        RejectReason::StatementNotSelect => "statement_not_select",
        RejectReason::SetOperation => "set_operation",
        RejectReason::CorrelatedSubquery => "correlated_subquery",
        RejectReason::QueryTooComplex => "query_too_complex",
        RejectReason::MissingTenant => "missing_tenant",
        RejectReason::RewriteTargetLimit => "rewrite_target_limit",
        RejectReason::BoundParamLimit => "bound_param_limit",
        RejectReason::AstNodeLimit => "ast_node_limit",
        RejectReason::Timeout => "enforcement_timeout",
        RejectReason::Disabled => "enforcement_disabled",
        RejectReason::UnknownProviderMode => "unsupported",
    }
}

/// The result of a tenant-enforcement evaluation.
///
/// Invariant: `reason_code` is set iff the outcome is a rejection. The
/// constructors are the only way to build one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantEnforcementResult {
    pub applied: bool,
    pub mode: TenantEnforcementMode,
    pub outcome: EnforcementOutcome,
    pub reason_code: Option<String>,
}

impl TenantEnforcementResult {
    pub fn applied(mode: TenantEnforcementMode) -> Self {
        Self {
            applied: true,
            mode,
            outcome: EnforcementOutcome::Applied,
            reason_code: None,
        }
    }

    pub fn skipped(mode: TenantEnforcementMode) -> Self {
        Self {
            applied: false,
            mode,
            outcome: EnforcementOutcome::SkippedNotRequired,
            reason_code: None,
        }
    }

    pub fn rejected(mode: TenantEnforcementMode, reason: RejectReason) -> Self {
        Self {
            applied: false,
            mode,
            outcome: reason.outcome(),
            reason_code: Some(bounded_reason_code(reason).to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reason_code_set_iff_rejected() {
        let applied = TenantEnforcementResult::applied(TenantEnforcementMode::SqlRewrite);
        assert!(!applied.outcome.is_rejection());
        assert!(applied.reason_code.is_none());

        let skipped = TenantEnforcementResult::skipped(TenantEnforcementMode::None);
        assert!(!skipped.outcome.is_rejection());
        assert!(skipped.reason_code.is_none());

        let rejected = TenantEnforcementResult::rejected(
            TenantEnforcementMode::SqlRewrite,
            RejectReason::CorrelatedSubquery,
        );
        assert!(rejected.outcome.is_rejection());
        assert_eq!(rejected.reason_code.as_deref(), Some("correlated_subquery"));
    }

    #[test]
    fn every_reason_maps_to_a_rejection_outcome() {
        for reason in [
            RejectReason::ParseFailure,
            RejectReason::StatementNotSelect,
            RejectReason::SetOperation,
            RejectReason::CorrelatedSubquery,
            RejectReason::QueryTooComplex,
            RejectReason::MissingTenant,
            RejectReason::RewriteTargetLimit,
            RejectReason::BoundParamLimit,
            RejectReason::AstNodeLimit,
            RejectReason::Timeout,
            RejectReason::Disabled,
            RejectReason::UnknownProviderMode,
        ] {
            assert!(reason.outcome().is_rejection(), "{reason:?}");
            assert!(!bounded_reason_code(reason).is_empty());
        }
    }

    #[test]
    fn drift_collapses_to_generic_unsupported() {
        assert_eq!(
            bounded_reason_code(RejectReason::UnknownProviderMode),
            "unsupported"
        );
        assert_eq!(
            RejectReason::UnknownProviderMode.failure_category(),
            "drift"
        );
    }

    #[test]
    fn outcome_serializes_screaming_snake() {
        let json = serde_json::to_string(&EnforcementOutcome::RejectedMissingTenant).unwrap();
        assert_eq!(json, "\"REJECTED_MISSING_TENANT\"");
    }
}
