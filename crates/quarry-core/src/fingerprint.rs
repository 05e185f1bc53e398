//! Query fingerprint builders.
//!
//! A fingerprint binds a pagination cursor to the exact query, parameters,
//! tenant, and execution constraints it was issued under. Changing any
//! component changes the fingerprint, which invalidates outstanding cursors.
//!
//! Components are separated with ASCII Unit Separator (0x1f) to avoid
//! ambiguity between adjacent fields.

use sha2::{Digest, Sha256};

const SEP: u8 = 0x1f;

fn sha256_hex(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update([SEP]);
    }
    hex::encode(hasher.finalize())
}

/// Build the fingerprint binding a cursor to a query, its parameters, the
/// tenant, and the execution constraints in force when it was issued.
#[allow(clippy::too_many_arguments)]
pub fn build_query_fingerprint(
    sql: &str,
    params: &[serde_json::Value],
    tenant_id: Option<&serde_json::Value>,
    provider: &str,
    max_rows: u64,
    max_bytes: u64,
    max_execution_ms: u64,
    order_signature: Option<&str>,
) -> String {
    let params_canonical =
        serde_json::to_string(params).unwrap_or_else(|_| "[]".to_string());
    let tenant_canonical = tenant_id
        .map(|t| t.to_string())
        .unwrap_or_default();
    sha256_hex(&[
        sql,
        &params_canonical,
        &tenant_canonical,
        provider,
        &max_rows.to_string(),
        &max_bytes.to_string(),
        &max_execution_ms.to_string(),
        order_signature.unwrap_or(""),
    ])
}

/// Build the strict replay-binding fingerprint carried as `query_fp` inside
/// cursors. Narrower than [`build_query_fingerprint`]: it defends against
/// cross-query cursor replay even under a fingerprint collision, so it binds
/// only the query text, provider, pagination mode, and ordering.
pub fn build_cursor_query_fingerprint(
    sql: &str,
    provider: &str,
    pagination_mode: &str,
    order_signature: Option<&str>,
) -> String {
    sha256_hex(&[sql, provider, pagination_mode, order_signature.unwrap_or("")])
}

/// Fingerprint of the live backend set, recorded inside keyset cursors
/// issued under federated execution. Order-insensitive: the identifiers are
/// sorted before hashing.
pub fn build_backend_set_fingerprint(backends: &[&str]) -> String {
    let mut sorted: Vec<&str> = backends.to_vec();
    sorted.sort_unstable();
    sha256_hex(&sorted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn fingerprint_is_deterministic() {
        let params = vec![json!(42), json!("pending")];
        let a = build_query_fingerprint(
            "SELECT * FROM orders",
            &params,
            Some(&json!("t1")),
            "postgres",
            1000,
            1_048_576,
            30_000,
            Some("id|asc|nulls_last"),
        );
        let b = build_query_fingerprint(
            "SELECT * FROM orders",
            &params,
            Some(&json!("t1")),
            "postgres",
            1000,
            1_048_576,
            30_000,
            Some("id|asc|nulls_last"),
        );
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn fingerprint_changes_with_any_component() {
        let base = build_query_fingerprint(
            "SELECT * FROM orders",
            &[],
            Some(&json!("t1")),
            "postgres",
            1000,
            0,
            0,
            None,
        );
        let other_sql = build_query_fingerprint(
            "SELECT * FROM orders ",
            &[],
            Some(&json!("t1")),
            "postgres",
            1000,
            0,
            0,
            None,
        );
        let other_tenant = build_query_fingerprint(
            "SELECT * FROM orders",
            &[],
            Some(&json!("t2")),
            "postgres",
            1000,
            0,
            0,
            None,
        );
        let other_limit = build_query_fingerprint(
            "SELECT * FROM orders",
            &[],
            Some(&json!("t1")),
            "postgres",
            999,
            0,
            0,
            None,
        );
        assert_ne!(base, other_sql);
        assert_ne!(base, other_tenant);
        assert_ne!(base, other_limit);
    }

    #[test]
    fn separator_prevents_field_bleed() {
        // "ab" + "c" must not collide with "a" + "bc"
        let a = build_cursor_query_fingerprint("ab", "c", "offset", None);
        let b = build_cursor_query_fingerprint("a", "bc", "offset", None);
        assert_ne!(a, b);
    }

    #[test]
    fn backend_set_fingerprint_is_order_insensitive() {
        let a = build_backend_set_fingerprint(&["pg-us", "pg-eu"]);
        let b = build_backend_set_fingerprint(&["pg-eu", "pg-us"]);
        assert_eq!(a, b);

        let c = build_backend_set_fingerprint(&["pg-eu"]);
        assert_ne!(a, c);
    }
}
