//! Cursor decode/encode errors.
//!
//! Every rejection maps to a bounded, externally safe reason code. Error
//! messages are generic by construction: no token bytes, secrets, SQL
//! fragments, or internal state ever appear in them.

use thiserror::Error;

/// Errors raised by the pagination-cursor codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CursorError {
    /// Oversized, undecodable, or structurally invalid token.
    #[error("pagination token is malformed")]
    Malformed,

    /// Signature absent or failed constant-time verification.
    #[error("pagination token signature is invalid")]
    SignatureInvalid,

    /// No signing secret configured; decoding fails closed.
    #[error("no cursor signing secret is configured")]
    SecretMissing,

    /// The token aged past its effective max age.
    #[error("pagination token has expired")]
    Expired,

    /// The token claims issuance beyond the tolerated future skew.
    #[error("pagination token was issued in the future")]
    ClockSkew,

    /// No usable issued-at timestamp (absent without the legacy opt-in, or
    /// no resolvable max age).
    #[error("pagination token has no usable issued-at timestamp")]
    IssuedAtInvalid,

    /// The token was issued under a different fingerprint.
    #[error("pagination token does not match this query")]
    FingerprintMismatch,

    /// Strict replay binding failed: the token belongs to another query.
    #[error("pagination token was issued for a different query")]
    QueryMismatch,

    /// The live backend set differs from the one recorded at issuance.
    #[error("backend set changed since the cursor was issued")]
    BackendSetChanged,

    /// Federated execution lacks a guaranteed deterministic ordering.
    #[error("federated execution cannot guarantee a deterministic ordering")]
    FederatedOrderingUnsafe,

    /// The final ORDER BY key is not a stable, non-nullable tie-breaker.
    #[error("query ordering lacks a stable tie-breaker")]
    UnstableTiebreaker,
}

impl CursorError {
    /// The bounded reason code exposed to callers and telemetry.
    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::Malformed => "token_malformed",
            Self::SignatureInvalid => "token_signature_invalid",
            Self::SecretMissing => "token_secret_missing",
            Self::Expired => "token_expired",
            Self::ClockSkew => "token_clock_skew",
            Self::IssuedAtInvalid => "token_issued_at_invalid",
            Self::FingerprintMismatch => "token_fingerprint_mismatch",
            Self::QueryMismatch => "token_query_mismatch",
            Self::BackendSetChanged => "backend_set_changed",
            Self::FederatedOrderingUnsafe => "federated_ordering_unsafe",
            Self::UnstableTiebreaker => "requires_stable_tiebreaker",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_stay_generic() {
        // The display strings are fixed text; nothing interpolates token
        // content into them.
        for err in [
            CursorError::Malformed,
            CursorError::SignatureInvalid,
            CursorError::SecretMissing,
            CursorError::Expired,
            CursorError::ClockSkew,
            CursorError::IssuedAtInvalid,
            CursorError::FingerprintMismatch,
            CursorError::QueryMismatch,
            CursorError::BackendSetChanged,
            CursorError::FederatedOrderingUnsafe,
            CursorError::UnstableTiebreaker,
        ] {
            assert!(!err.to_string().is_empty());
            assert!(!err.reason_code().is_empty());
        }
    }
}
