//! Continuation clause construction.
//!
//! Rather than splicing predicates into the (already rewritten) statement,
//! pagination wraps it: the base query becomes a derived table and the
//! seek/limit clauses apply to the wrapper. Ordering keys must therefore be
//! projected by the base query — which the cursor protocol requires anyway,
//! since the next cursor is built from their values in the last row.

use quarry_cursor::{OrderingKeySpec, SortDirection};
use quarry_tenancy::PlaceholderStyle;

/// A wrapped, paginated query plus the parameters its placeholders bind.
#[derive(Debug, Clone)]
pub struct PaginatedQuery {
    pub sql: String,
    /// Parameters appended after the base query's own bind list.
    pub params: Vec<serde_json::Value>,
}

/// Wrap a base query for offset pagination, fetching one row beyond the
/// page size so `has_more` is answered truthfully without a COUNT.
pub(crate) fn offset_page(base_sql: &str, offset: u64, page_size: u64) -> PaginatedQuery {
    PaginatedQuery {
        sql: format!("{base_sql} LIMIT {} OFFSET {offset}", page_size + 1),
        params: Vec::new(),
    }
}

/// Wrap a base query for keyset continuation.
///
/// With keys `k1..kn` and cursor values `v1..vn`, the seek predicate is the
/// lexicographic row expansion honoring per-key direction:
///
/// ```sql
/// (k1 > v1) OR (k1 = v1 AND k2 > v2) OR ... OR (k1 = v1 AND ... AND kn > vn)
/// ```
///
/// (`<` for descending keys.) Assumes non-null cursor values; the final
/// tie-breaker is non-nullable by contract, which guarantees progress.
pub(crate) fn keyset_page(
    base_sql: &str,
    keys: &[OrderingKeySpec],
    cursor_values: Option<&[serde_json::Value]>,
    page_size: u64,
    style: PlaceholderStyle,
    base_param_count: usize,
) -> PaginatedQuery {
    let order_by = keys
        .iter()
        .map(|key| {
            format!(
                "{} {}",
                bare_column(&key.column),
                match key.direction {
                    SortDirection::Asc => "ASC",
                    SortDirection::Desc => "DESC",
                }
            )
        })
        .collect::<Vec<_>>()
        .join(", ");

    let mut params = Vec::new();
    let seek = cursor_values.map(|values| {
        let mut branches = Vec::new();
        for i in 0..keys.len() {
            let mut terms = Vec::new();
            for j in 0..=i {
                let placeholder = render_placeholder(style, base_param_count + params.len() + 1);
                params.push(values[j].clone());
                let op = if j < i {
                    "="
                } else {
                    match keys[j].direction {
                        SortDirection::Asc => ">",
                        SortDirection::Desc => "<",
                    }
                };
                terms.push(format!("{} {op} {placeholder}", bare_column(&keys[j].column)));
            }
            branches.push(format!("({})", terms.join(" AND ")));
        }
        branches.join(" OR ")
    });

    let sql = match seek {
        Some(seek) => format!(
            "SELECT * FROM ({base_sql}) AS keyset_page WHERE {seek} ORDER BY {order_by} LIMIT {}",
            page_size + 1
        ),
        None => format!(
            "SELECT * FROM ({base_sql}) AS keyset_page ORDER BY {order_by} LIMIT {}",
            page_size + 1
        ),
    };

    PaginatedQuery { sql, params }
}

/// Ordering keys are matched against result-set columns by bare name.
pub(crate) fn bare_column(column: &str) -> &str {
    column.rsplit('.').next().unwrap_or(column)
}

fn render_placeholder(style: PlaceholderStyle, index: usize) -> String {
    match style {
        PlaceholderStyle::Numbered => format!("${index}"),
        PlaceholderStyle::Positional => "?".to_string(),
    }
}
