//! # quarry-cursor
//!
//! Signed pagination cursors for Quarry, in two variants:
//!
//! - **Offset tokens** — numeric offset + limit continuation.
//! - **Keyset cursors** — resume from the last row's ordering-key values,
//!   with backend-set drift protection for federated execution.
//!
//! Both share one protocol: a versioned JSON payload wrapped in
//! `{"p": payload, "s": hex HMAC-SHA256}`, base64url-encoded without
//! padding. Decoding fails closed: no configured secret means no token is
//! ever trusted, and expiry, clock skew, fingerprint drift, and cross-query
//! replay are all typed rejections carrying only bounded reason codes.

pub mod envelope;
pub mod error;
pub mod keyset;
pub mod offset;
pub mod options;
pub mod safety;

pub use envelope::MAX_TOKEN_LEN;
pub use error::CursorError;
pub use keyset::{
    KeysetCursor, NullsPlacement, OrderingKeySpec, SortDirection, decode_keyset_cursor,
    encode_keyset_cursor,
};
pub use offset::{OffsetToken, decode_offset_pagination_token, encode_offset_pagination_token};
pub use options::DecodeOptions;
pub use safety::check_keyset_safety;
