//! Keyset (seek) cursors.
//!
//! A keyset cursor resumes from the last row's ordering-key values rather
//! than a numeric offset, avoiding skip/duplicate anomalies under
//! concurrent writes. The payload additionally carries the ordering-key
//! specs (`"keys":["col|dir|nulls",...]`) and, under federated execution,
//! the backend-set fingerprint recorded at issuance.

use serde::{Deserialize, Serialize};

use quarry_core::SigningSecret;
use quarry_shape::OrderKey;

use crate::envelope::{check_freshness, decode_envelope, encode_envelope};
use crate::error::CursorError;
use crate::options::DecodeOptions;

/// Sort direction of one ordering key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    pub fn reversed(self) -> Self {
        match self {
            Self::Asc => Self::Desc,
            Self::Desc => Self::Asc,
        }
    }
}

/// Where NULLs sort for one ordering key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NullsPlacement {
    First,
    Last,
}

/// One ordering key: column, direction, NULL placement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderingKeySpec {
    pub column: String,
    pub direction: SortDirection,
    pub nulls: NullsPlacement,
}

impl OrderingKeySpec {
    /// Parse the `col|dir|nulls` wire form.
    pub fn parse(spec: &str) -> Result<Self, CursorError> {
        let mut parts = spec.split('|');
        let (Some(column), Some(dir), Some(nulls), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(CursorError::Malformed);
        };
        if column.is_empty() {
            return Err(CursorError::Malformed);
        }
        let direction = match dir {
            "asc" => SortDirection::Asc,
            "desc" => SortDirection::Desc,
            _ => return Err(CursorError::Malformed),
        };
        let nulls = match nulls {
            "nulls_first" => NullsPlacement::First,
            "nulls_last" => NullsPlacement::Last,
            _ => return Err(CursorError::Malformed),
        };
        Ok(Self {
            column: column.to_string(),
            direction,
            nulls,
        })
    }

    /// Render the `col|dir|nulls` wire form.
    pub fn to_spec(&self) -> String {
        format!(
            "{}|{}|{}",
            self.column,
            match self.direction {
                SortDirection::Asc => "asc",
                SortDirection::Desc => "desc",
            },
            match self.nulls {
                NullsPlacement::First => "nulls_first",
                NullsPlacement::Last => "nulls_last",
            }
        )
    }

    /// Build a spec from an extracted ORDER BY key. `None` when the key is
    /// not a plain column reference.
    pub fn from_order_key(key: &OrderKey) -> Option<Self> {
        let column = key.column.clone()?;
        Some(Self {
            column,
            direction: if key.ascending {
                SortDirection::Asc
            } else {
                SortDirection::Desc
            },
            nulls: if key.nulls_first {
                NullsPlacement::First
            } else {
                NullsPlacement::Last
            },
        })
    }
}

/// A decoded, verified keyset cursor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeysetCursor {
    /// The last returned row's ordering-key values, in key order.
    pub values: Vec<serde_json::Value>,
    pub keys: Vec<OrderingKeySpec>,
    pub fingerprint: String,
    pub issued_at: Option<i64>,
    pub max_age_s: Option<u64>,
    pub query_fp: Option<String>,
    /// Fingerprint of the backend set at issuance (federated execution).
    pub backend_set_fingerprint: Option<String>,
}

impl KeysetCursor {
    pub fn new(
        values: Vec<serde_json::Value>,
        keys: Vec<OrderingKeySpec>,
        fingerprint: impl Into<String>,
        issued_at: i64,
    ) -> Self {
        Self {
            values,
            keys,
            fingerprint: fingerprint.into(),
            issued_at: Some(issued_at),
            max_age_s: None,
            query_fp: None,
            backend_set_fingerprint: None,
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

    pub fn with_backend_set_fingerprint(mut self, fingerprint: impl Into<String>) -> Self {
        self.backend_set_fingerprint = Some(fingerprint.into());
        self
    }
}

#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct KeysetPayload {
    v: u32,
    values: Vec<serde_json::Value>,
    keys: Vec<String>,
    f: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    issued_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    max_age_s: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    query_fp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    backend_set_fingerprint: Option<String>,
}

const PAYLOAD_VERSION: u32 = 1;

/// Encode and sign a keyset cursor.
pub fn encode_keyset_cursor(
    cursor: &KeysetCursor,
    secret: Option<&SigningSecret>,
) -> Result<String, CursorError> {
    if cursor.values.is_empty() || cursor.values.len() != cursor.keys.len() {
        return Err(CursorError::Malformed);
    }
    let payload = KeysetPayload {
        v: PAYLOAD_VERSION,
        values: cursor.values.clone(),
        keys: cursor.keys.iter().map(OrderingKeySpec::to_spec).collect(),
        f: cursor.fingerprint.clone(),
        issued_at: cursor.issued_at,
        max_age_s: cursor.max_age_s,
        query_fp: cursor.query_fp.clone(),
        backend_set_fingerprint: cursor.backend_set_fingerprint.clone(),
    };
    let payload = serde_json::to_value(&payload).map_err(|_| CursorError::Malformed)?;
    encode_envelope(&payload, secret)
}

/// Decode and verify a keyset cursor.
///
/// `live_backend_set_fingerprint` is the fingerprint of the backend set the
/// query would execute against now. When either side records one, both must
/// and they must match; drift is a rejection, not a warning.
pub fn decode_keyset_cursor(
    token: &str,
    expected_fingerprint: &str,
    options: &DecodeOptions<'_>,
    live_backend_set_fingerprint: Option<&str>,
) -> Result<KeysetCursor, CursorError> {
    let payload = decode_envelope(token, options.secret)?;
    let payload: KeysetPayload =
        serde_json::from_value(payload).map_err(|_| CursorError::Malformed)?;

    if payload.v != PAYLOAD_VERSION
        || payload.values.is_empty()
        || payload.values.len() != payload.keys.len()
        || payload.f.is_empty()
    {
        return Err(CursorError::Malformed);
    }
    let keys = payload
        .keys
        .iter()
        .map(|spec| OrderingKeySpec::parse(spec))
        .collect::<Result<Vec<_>, _>>()?;

    let legacy = check_freshness(
        payload.issued_at,
        payload.max_age_s,
        &options.freshness(),
        options.now_epoch_s,
    )?;
    if legacy {
        tracing::debug!("keyset cursor accepted on the legacy issued_at path");
    }

    if let (Some(expected), Some(actual)) = (options.expected_query_fp, &payload.query_fp) {
        if expected != actual {
            return Err(CursorError::QueryMismatch);
        }
    }

    match (&payload.backend_set_fingerprint, live_backend_set_fingerprint) {
        (None, None) => {}
        (Some(recorded), Some(live)) if recorded == live => {}
        _ => return Err(CursorError::BackendSetChanged),
    }

    if payload.f != expected_fingerprint {
        return Err(CursorError::FingerprintMismatch);
    }

    Ok(KeysetCursor {
        values: payload.values,
        keys,
        fingerprint: payload.f,
        issued_at: payload.issued_at,
        max_age_s: payload.max_age_s,
        query_fp: payload.query_fp,
        backend_set_fingerprint: payload.backend_set_fingerprint,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn secret() -> SigningSecret {
        SigningSecret::new(b"keyset-secret".to_vec())
    }

    fn options(now: i64) -> DecodeOptions<'static> {
        let leaked: &'static SigningSecret = Box::leak(Box::new(secret()));
        DecodeOptions::new(Some(leaked), now).with_default_max_age(3_600)
    }

    fn id_asc() -> OrderingKeySpec {
        OrderingKeySpec {
            column: "id".to_string(),
            direction: SortDirection::Asc,
            nulls: NullsPlacement::Last,
        }
    }

    #[test]
    fn spec_round_trip() {
        let spec = OrderingKeySpec::parse("created_at|desc|nulls_first").unwrap();
        assert_eq!(spec.column, "created_at");
        assert_eq!(spec.direction, SortDirection::Desc);
        assert_eq!(spec.nulls, NullsPlacement::First);
        assert_eq!(spec.to_spec(), "created_at|desc|nulls_first");
    }

    #[test]
    fn bad_specs_are_malformed() {
        for bad in ["", "id", "id|asc", "id|sideways|nulls_last", "id|asc|maybe", "|asc|nulls_last", "id|asc|nulls_last|extra"] {
            assert_eq!(
                OrderingKeySpec::parse(bad),
                Err(CursorError::Malformed),
                "{bad}"
            );
        }
    }

    #[test]
    fn end_to_end_expiry_window() {
        // Spec'd end-to-end scenario: issued_at=1000, max_age_s=100.
        let cursor = KeysetCursor::new(vec![json!(1)], vec![id_asc()], "fp1", 1_000)
            .with_max_age(100);
        let encoded = encode_keyset_cursor(&cursor, Some(&secret())).unwrap();

        let decoded =
            decode_keyset_cursor(&encoded, "fp1", &options(1_099), None).unwrap();
        assert_eq!(decoded.values, vec![json!(1)]);
        assert_eq!(decoded.keys, vec![id_asc()]);

        assert_eq!(
            decode_keyset_cursor(&encoded, "fp1", &options(1_101), None),
            Err(CursorError::Expired)
        );
    }

    #[test]
    fn arity_mismatch_is_malformed() {
        let cursor = KeysetCursor {
            values: vec![json!(1), json!(2)],
            keys: vec![id_asc()],
            fingerprint: "fp1".to_string(),
            issued_at: Some(1_000),
            max_age_s: None,
            query_fp: None,
            backend_set_fingerprint: None,
        };
        assert_eq!(
            encode_keyset_cursor(&cursor, Some(&secret())),
            Err(CursorError::Malformed)
        );
    }

    #[test]
    fn backend_set_drift_is_rejected() {
        let cursor = KeysetCursor::new(vec![json!(5)], vec![id_asc()], "fp1", 1_000)
            .with_backend_set_fingerprint("bsf-old");
        let encoded = encode_keyset_cursor(&cursor, Some(&secret())).unwrap();

        // Same set: accepted.
        assert!(
            decode_keyset_cursor(&encoded, "fp1", &options(1_001), Some("bsf-old")).is_ok()
        );
        // Changed set: rejected.
        assert_eq!(
            decode_keyset_cursor(&encoded, "fp1", &options(1_001), Some("bsf-new")),
            Err(CursorError::BackendSetChanged)
        );
        // Recorded but unverifiable: rejected.
        assert_eq!(
            decode_keyset_cursor(&encoded, "fp1", &options(1_001), None),
            Err(CursorError::BackendSetChanged)
        );
    }

    #[test]
    fn live_federated_set_requires_recorded_fingerprint() {
        let cursor = KeysetCursor::new(vec![json!(5)], vec![id_asc()], "fp1", 1_000);
        let encoded = encode_keyset_cursor(&cursor, Some(&secret())).unwrap();
        assert_eq!(
            decode_keyset_cursor(&encoded, "fp1", &options(1_001), Some("bsf-live")),
            Err(CursorError::BackendSetChanged)
        );
    }

    #[test]
    fn multi_key_cursor_round_trips() {
        let keys = vec![
            OrderingKeySpec::parse("created_at|desc|nulls_first").unwrap(),
            id_asc(),
        ];
        let cursor = KeysetCursor::new(
            vec![json!("2026-01-01T00:00:00Z"), json!(42)],
            keys.clone(),
            "fp1",
            1_000,
        )
        .with_query_fp("qfp");
        let encoded = encode_keyset_cursor(&cursor, Some(&secret())).unwrap();
        let decoded = decode_keyset_cursor(&encoded, "fp1", &options(1_001), None).unwrap();
        assert_eq!(decoded, cursor);
    }

    #[test]
    fn fingerprint_mismatch_rejected() {
        let cursor = KeysetCursor::new(vec![json!(1)], vec![id_asc()], "fp1", 1_000);
        let encoded = encode_keyset_cursor(&cursor, Some(&secret())).unwrap();
        assert_eq!(
            decode_keyset_cursor(&encoded, "other", &options(1_001), None),
            Err(CursorError::FingerprintMismatch)
        );
    }

    #[test]
    fn missing_secret_fails_closed() {
        let cursor = KeysetCursor::new(vec![json!(1)], vec![id_asc()], "fp1", 1_000);
        let encoded = encode_keyset_cursor(&cursor, Some(&secret())).unwrap();
        let opts = DecodeOptions::new(None, 1_001);
        assert_eq!(
            decode_keyset_cursor(&encoded, "fp1", &opts, None),
            Err(CursorError::SecretMissing)
        );
    }
}
