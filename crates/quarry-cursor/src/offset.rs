//! Offset pagination tokens.
//!
//! Payload wire shape:
//! `{"v":1,"o":int,"l":int,"f":string,"issued_at":int,"max_age_s"?:int,"query_fp"?:string}`.

use serde::{Deserialize, Serialize};

use quarry_core::SigningSecret;

use crate::envelope::{check_freshness, decode_envelope, encode_envelope};
use crate::error::CursorError;
use crate::options::DecodeOptions;

/// A decoded, verified offset pagination token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OffsetToken {
    pub offset: u64,
    pub limit: u64,
    /// Fingerprint binding the token to its query and constraints.
    pub fingerprint: String,
    /// Seconds since the epoch. `None` only on the legacy opt-in path.
    pub issued_at: Option<i64>,
    /// Per-token max age; takes precedence over the caller default.
    pub max_age_s: Option<u64>,
    /// Strict replay-binding fingerprint.
    pub query_fp: Option<String>,
}

impl OffsetToken {
    pub fn new(offset: u64, limit: u64, fingerprint: impl Into<String>, issued_at: i64) -> Self {
        Self {
            offset,
            limit,
            fingerprint: fingerprint.into(),
            issued_at: Some(issued_at),
            max_age_s: None,
            query_fp: None,
        }
    }

    pub fn with_max_age(mut self, seconds: u64) -> Self {
        self.max_age_s = Some(seconds);
        self
    }

    pub fn with_query_fp(mut self, query_fp: impl Into<String>) -> Self {
        self.query_fp = Some(query_fp.into());
        self
    }

    /// Whether this token was accepted without an `issued_at` timestamp.
    pub fn is_legacy(&self) -> bool {
        self.issued_at.is_none()
    }
}

#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct OffsetPayload {
    v: u32,
    o: i64,
    l: i64,
    f: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    issued_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    max_age_s: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    query_fp: Option<String>,
}

const PAYLOAD_VERSION: u32 = 1;

/// Encode and sign an offset pagination token.
pub fn encode_offset_pagination_token(
    token: &OffsetToken,
    secret: Option<&SigningSecret>,
) -> Result<String, CursorError> {
    let payload = OffsetPayload {
        v: PAYLOAD_VERSION,
        o: token.offset as i64,
        l: token.limit as i64,
        f: token.fingerprint.clone(),
        issued_at: token.issued_at,
        max_age_s: token.max_age_s,
        query_fp: token.query_fp.clone(),
    };
    let payload = serde_json::to_value(&payload).map_err(|_| CursorError::Malformed)?;
    encode_envelope(&payload, secret)
}

/// Decode and verify an offset pagination token.
///
/// A decoded token is never trusted before signature verification; every
/// check failure is a typed rejection, not a warning.
pub fn decode_offset_pagination_token(
    token: &str,
    expected_fingerprint: &str,
    options: &DecodeOptions<'_>,
) -> Result<OffsetToken, CursorError> {
    let payload = decode_envelope(token, options.secret)?;
    let payload: OffsetPayload =
        serde_json::from_value(payload).map_err(|_| CursorError::Malformed)?;

    // Field-range validation.
    if payload.v != PAYLOAD_VERSION
        || payload.o < 0
        || payload.l <= 0
        || payload.f.is_empty()
    {
        return Err(CursorError::Malformed);
    }

    let legacy = check_freshness(
        payload.issued_at,
        payload.max_age_s,
        &options.freshness(),
        options.now_epoch_s,
    )?;
    if legacy {
        tracing::debug!("offset token accepted on the legacy issued_at path");
    }

    if let (Some(expected), Some(actual)) = (options.expected_query_fp, &payload.query_fp) {
        if expected != actual {
            return Err(CursorError::QueryMismatch);
        }
    }

    if payload.f != expected_fingerprint {
        return Err(CursorError::FingerprintMismatch);
    }

    Ok(OffsetToken {
        offset: payload.o as u64,
        limit: payload.l as u64,
        fingerprint: payload.f,
        issued_at: payload.issued_at,
        max_age_s: payload.max_age_s,
        query_fp: payload.query_fp,
    })
}
