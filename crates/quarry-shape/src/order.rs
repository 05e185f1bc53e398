//! ORDER BY key extraction.
//!
//! Keyset pagination and cursor fingerprints both need a canonical view of
//! a query's ordering: which keys, which direction, where NULLs land, and
//! whether the final key can serve as a stable tie-breaker.

use sqlparser::ast::{Expr, OrderByKind, Query};

/// Functions whose output changes between evaluations. An ORDER BY ending
/// in one of these can never anchor a keyset cursor.
const NONDETERMINISTIC_FUNCTIONS: &[&str] = &[
    "random",
    "rand",
    "newid",
    "uuid",
    "gen_random_uuid",
    "uuid_generate_v4",
];

/// One ORDER BY key in canonical form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderKey {
    /// The rendered ordering expression.
    pub expr: String,
    /// The (possibly qualified) column name, when the expression is a plain
    /// column reference.
    pub column: Option<String>,
    /// Ascending order. SQL default is ascending.
    pub ascending: bool,
    /// Where NULLs sort. Defaults follow Postgres: last for ASC, first for
    /// DESC.
    pub nulls_first: bool,
    /// Whether the expression is a call to a nondeterministic function.
    pub nondeterministic: bool,
}

impl OrderKey {
    /// Render as the `col|dir|nulls` spec carried inside keyset cursors.
    pub fn spec(&self) -> String {
        format!(
            "{}|{}|{}",
            self.column.as_deref().unwrap_or(&self.expr),
            if self.ascending { "asc" } else { "desc" },
            if self.nulls_first {
                "nulls_first"
            } else {
                "nulls_last"
            }
        )
    }
}

/// Extract the ORDER BY keys of a query's outermost level.
///
/// Returns an empty vector when the query has no explicit ordering (or uses
/// a dialect-specific `ORDER BY ALL`).
pub fn order_keys(query: &Query) -> Vec<OrderKey> {
    let Some(order_by) = &query.order_by else {
        return Vec::new();
    };
    let OrderByKind::Expressions(exprs) = &order_by.kind else {
        return Vec::new();
    };

    exprs
        .iter()
        .map(|obe| {
            let ascending = obe.options.asc.unwrap_or(true);
            let nulls_first = obe.options.nulls_first.unwrap_or(!ascending);
            OrderKey {
                expr: obe.expr.to_string(),
                column: column_name(&obe.expr),
                ascending,
                nulls_first,
                nondeterministic: is_nondeterministic(&obe.expr),
            }
        })
        .collect()
}

/// Canonical order signature used in query fingerprints: the `|`-specs of
/// every key, comma-joined. `None` when the query has no explicit ordering.
pub fn order_signature(query: &Query) -> Option<String> {
    let keys = order_keys(query);
    if keys.is_empty() {
        return None;
    }
    Some(
        keys.iter()
            .map(OrderKey::spec)
            .collect::<Vec<_>>()
            .join(","),
    )
}

fn column_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier(ident) => Some(ident.value.clone()),
        Expr::CompoundIdentifier(parts) => Some(
            parts
                .iter()
                .map(|p| p.value.clone())
                .collect::<Vec<_>>()
                .join("."),
        ),
        _ => None,
    }
}

fn is_nondeterministic(expr: &Expr) -> bool {
    match expr {
        Expr::Function(func) => {
            let name = func.name.to_string().to_lowercase();
            let bare = name.rsplit('.').next().unwrap_or(&name);
            NONDETERMINISTIC_FUNCTIONS.contains(&bare)
        }
        Expr::Nested(inner) => is_nondeterministic(inner),
        _ => false,
    }
}
