//! The signed token envelope.
//!
//! Wire format (bit-exact): base64url without padding of
//! `{"p": <payload>, "s"?: <hex HMAC-SHA256>}`. The signature covers the
//! canonical (sorted-key) JSON bytes of the payload, so key order inside a
//! transported token carries no meaning.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use quarry_core::SigningSecret;

use crate::error::CursorError;

type HmacSha256 = Hmac<Sha256>;

/// Tokens beyond this length are rejected before any decode work.
pub const MAX_TOKEN_LEN: usize = 8 * 1024;

/// Serialize, sign (when a secret is present), and base64url-encode a
/// payload.
pub(crate) fn encode_envelope(
    payload: &serde_json::Value,
    secret: Option<&SigningSecret>,
) -> Result<String, CursorError> {
    let canonical = serde_json::to_vec(payload).map_err(|_| CursorError::Malformed)?;

    let mut envelope = serde_json::Map::new();
    envelope.insert("p".to_string(), payload.clone());
    if let Some(secret) = secret {
        envelope.insert(
            "s".to_string(),
            serde_json::Value::String(hex::encode(sign(secret, &canonical)?)),
        );
    }

    let bytes =
        serde_json::to_vec(&serde_json::Value::Object(envelope)).map_err(|_| CursorError::Malformed)?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}

/// Decode and verify an envelope, returning the trusted payload.
///
/// Without a configured secret this fails closed with
/// [`CursorError::SecretMissing`]; unsigned input is never trusted.
pub(crate) fn decode_envelope(
    token: &str,
    secret: Option<&SigningSecret>,
) -> Result<serde_json::Value, CursorError> {
    if token.is_empty() || token.len() > MAX_TOKEN_LEN {
        return Err(CursorError::Malformed);
    }

    let bytes = URL_SAFE_NO_PAD
        .decode(token)
        .map_err(|_| CursorError::Malformed)?;
    let value: serde_json::Value =
        serde_json::from_slice(&bytes).map_err(|_| CursorError::Malformed)?;
    let envelope = value.as_object().ok_or(CursorError::Malformed)?;
    if envelope.keys().any(|k| k != "p" && k != "s") {
        return Err(CursorError::Malformed);
    }
    let payload = envelope.get("p").ok_or(CursorError::Malformed)?;

    let Some(secret) = secret else {
        return Err(CursorError::SecretMissing);
    };

    let signature_hex = envelope
        .get("s")
        .and_then(|s| s.as_str())
        .ok_or(CursorError::SignatureInvalid)?;
    let signature = hex::decode(signature_hex).map_err(|_| CursorError::SignatureInvalid)?;

    let canonical = serde_json::to_vec(payload).map_err(|_| CursorError::Malformed)?;
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| CursorError::SignatureInvalid)?;
    mac.update(&canonical);
    // Constant-time comparison.
    mac.verify_slice(&signature)
        .map_err(|_| CursorError::SignatureInvalid)?;

    Ok(payload.clone())
}

fn sign(secret: &SigningSecret, canonical: &[u8]) -> Result<Vec<u8>, CursorError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| CursorError::SignatureInvalid)?;
    mac.update(canonical);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Freshness policy applied to a decoded token.
#[derive(Debug, Clone)]
pub struct FreshnessPolicy {
    /// Reject tokens without `issued_at` (the default). Opting out accepts
    /// them as explicitly flagged legacy tokens.
    pub require_issued_at: bool,
    /// Max age applied when the token carries none.
    pub default_max_age_s: Option<u64>,
    /// Tolerated forward clock skew, in seconds.
    pub clock_skew_s: u64,
}

/// Check issuance freshness. Returns whether the token was accepted on the
/// legacy (no `issued_at`) path so callers can record that in telemetry.
///
/// Expiry is inclusive: `age == max_age` is still fresh.
pub(crate) fn check_freshness(
    issued_at: Option<i64>,
    token_max_age_s: Option<u64>,
    policy: &FreshnessPolicy,
    now_epoch_s: i64,
) -> Result<bool, CursorError> {
    let Some(issued_at) = issued_at else {
        if policy.require_issued_at {
            return Err(CursorError::IssuedAtInvalid);
        }
        tracing::debug!("accepting legacy pagination token without issued_at");
        return Ok(true);
    };

    if issued_at > now_epoch_s + policy.clock_skew_s as i64 {
        return Err(CursorError::ClockSkew);
    }

    // The token's own max age takes precedence over the caller default.
    let max_age = token_max_age_s
        .or(policy.default_max_age_s)
        .ok_or(CursorError::IssuedAtInvalid)?;
    let age = now_epoch_s.saturating_sub(issued_at);
    if age > max_age as i64 {
        return Err(CursorError::Expired);
    }

    Ok(false)
}
