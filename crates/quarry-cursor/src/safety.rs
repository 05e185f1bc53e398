//! Keyset issuance safety.
//!
//! Checked before a keyset cursor is ever encoded: resuming from key values
//! is only sound when the ordering is a strict total order that every
//! backend reproduces.

use quarry_core::BackendCapabilities;
use quarry_shape::OrderKey;

use crate::error::CursorError;

/// Validate that a query's ordering can anchor keyset cursors.
///
/// `stable_columns` names the columns the caller vouches for as stable and
/// non-nullable (typically the primary key). The final ORDER BY key must be
/// one of them.
pub fn check_keyset_safety(
    order_keys: &[OrderKey],
    capabilities: &BackendCapabilities,
    stable_columns: &[String],
) -> Result<(), CursorError> {
    if capabilities.is_federated() && !capabilities.supports_federated_deterministic_ordering {
        return Err(CursorError::FederatedOrderingUnsafe);
    }

    let Some(last) = order_keys.last() else {
        // No explicit ordering at all: there is nothing to resume from.
        return Err(CursorError::UnstableTiebreaker);
    };
    if last.nondeterministic {
        return Err(CursorError::UnstableTiebreaker);
    }
    let Some(column) = &last.column else {
        // Expressions cannot be vouched for as stable tie-breakers.
        return Err(CursorError::UnstableTiebreaker);
    };

    let bare = column.rsplit('.').next().unwrap_or(column);
    if !stable_columns.iter().any(|c| c.eq_ignore_ascii_case(bare)) {
        return Err(CursorError::UnstableTiebreaker);
    }

    Ok(())
}
