//! Tenant predicate injection.
//!
//! Rewriting happens on the AST, never on SQL text: the predicate is
//! AND-combined into each SELECT's existing WHERE clause (or becomes the
//! WHERE clause) and the statement is re-rendered. Tenant values bind as
//! parameters — tenant ids never appear in the SQL text.

use sqlparser::ast::{
    BinaryOperator, Expr, Ident, Query, Select, Statement, Value,
};
use std::collections::BTreeSet;

use quarry_core::{SchemaLoader, TenancyConfig};
use quarry_shape::{FromTarget, from_targets};

/// Placeholder style for bound tenant parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceholderStyle {
    /// `$n`, numbered after the existing parameters.
    Numbered,
    /// `?`.
    Positional,
}

impl PlaceholderStyle {
    pub fn for_provider(provider: &str) -> Self {
        match provider.to_lowercase().as_str() {
            "postgres" | "postgresql" | "redshift" | "cockroach" => Self::Numbered,
            _ => Self::Positional,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Numbered => "numbered",
            Self::Positional => "positional",
        }
    }

    fn render(&self, index: usize) -> String {
        match self {
            Self::Numbered => format!("${index}"),
            Self::Positional => "?".to_string(),
        }
    }
}

/// Result of a rewrite pass over one statement.
#[derive(Debug, Clone)]
pub struct RewriteOutcome {
    /// The rewritten SQL. Unchanged when no predicate was produced.
    pub sql: String,
    /// Tenant parameters to append to the caller's bind list, one per
    /// scoped target.
    pub tenant_params: Vec<serde_json::Value>,
    /// Bare names of the tables that received a predicate.
    pub scoped_tables: Vec<String>,
}

/// Inject tenant predicates into every eligible FROM target of `stmt`.
///
/// A target is eligible when its bare name is in `table_allowlist`, it is
/// not a system catalog, the tenancy config resolves a tenant column for
/// it, and the schema snapshot (when it knows the table) confirms the
/// column exists.
pub(crate) fn inject_tenant_predicates(
    stmt: &mut Statement,
    tenant_id: &serde_json::Value,
    tenancy: &TenancyConfig,
    table_allowlist: &BTreeSet<String>,
    schema: &dyn SchemaLoader,
    style: PlaceholderStyle,
    existing_params: usize,
) -> RewriteOutcome {
    let original = stmt.to_string();
    let Statement::Query(query) = stmt else {
        return RewriteOutcome {
            sql: original,
            tenant_params: Vec::new(),
            scoped_tables: Vec::new(),
        };
    };

    let mut tenant_params = Vec::new();
    let mut scoped_tables = Vec::new();

    // CTE bodies first, then the outer query, so placeholder numbering
    // follows textual order.
    if let Some(with) = &mut query.with {
        for cte in &mut with.cte_tables {
            scope_query(
                &mut cte.query,
                tenant_id,
                tenancy,
                table_allowlist,
                schema,
                style,
                existing_params,
                &mut tenant_params,
                &mut scoped_tables,
            );
        }
    }
    scope_query(
        query,
        tenant_id,
        tenancy,
        table_allowlist,
        schema,
        style,
        existing_params,
        &mut tenant_params,
        &mut scoped_tables,
    );

    let sql = if tenant_params.is_empty() {
        original
    } else {
        stmt.to_string()
    };

    RewriteOutcome {
        sql,
        tenant_params,
        scoped_tables,
    }
}

#[allow(clippy::too_many_arguments)]
fn scope_query(
    query: &mut Query,
    tenant_id: &serde_json::Value,
    tenancy: &TenancyConfig,
    table_allowlist: &BTreeSet<String>,
    schema: &dyn SchemaLoader,
    style: PlaceholderStyle,
    existing_params: usize,
    tenant_params: &mut Vec<serde_json::Value>,
    scoped_tables: &mut Vec<String>,
) {
    for select in body_selects_mut(query) {
        let mut predicates = Vec::new();
        for target in from_targets(select) {
            let Some(column) = eligible_tenant_column(&target, tenancy, table_allowlist, schema)
            else {
                continue;
            };
            let index = existing_params + tenant_params.len() + 1;
            predicates.push(tenant_predicate(&target, &column, style.render(index)));
            tenant_params.push(tenant_id.clone());
            scoped_tables.push(target.bare_name().to_string());
            tracing::debug!(
                table = target.bare_name(),
                column = %column,
                "scoping FROM target with tenant predicate"
            );
        }
        for predicate in predicates {
            and_into_selection(select, predicate);
        }
    }
}

fn eligible_tenant_column(
    target: &FromTarget,
    tenancy: &TenancyConfig,
    table_allowlist: &BTreeSet<String>,
    schema: &dyn SchemaLoader,
) -> Option<String> {
    let bare = target.bare_name();

    if is_system_catalog_table(&target.name) {
        tracing::debug!(table = %target.name, "skipping system catalog table");
        return None;
    }
    if !table_allowlist.contains(&bare.to_lowercase()) {
        return None;
    }
    let column = tenancy.get_tenant_column(bare)?;
    // When the snapshot knows the table, the column must actually exist.
    if schema.table_columns(bare).is_some() && !schema.has_column(bare, column) {
        tracing::debug!(
            table = bare,
            column,
            "tenant column absent from schema snapshot; not scoping"
        );
        return None;
    }
    Some(column.to_string())
}

fn tenant_predicate(target: &FromTarget, column: &str, placeholder: String) -> Expr {
    Expr::BinaryOp {
        left: Box::new(Expr::CompoundIdentifier(vec![
            Ident::new(target.qualifier()),
            Ident::new(column),
        ])),
        op: BinaryOperator::Eq,
        right: Box::new(Expr::Value(Value::Placeholder(placeholder).into())),
    }
}

fn and_into_selection(select: &mut Select, predicate: Expr) {
    select.selection = Some(match select.selection.take() {
        Some(existing) => Expr::BinaryOp {
            left: Box::new(Expr::Nested(Box::new(existing))),
            op: BinaryOperator::And,
            right: Box::new(predicate),
        },
        None => predicate,
    });
}

/// Mutable counterpart of [`body_selects`] over a query body.
fn body_selects_mut(query: &mut Query) -> Vec<&mut Select> {
    fn collect<'a>(body: &'a mut sqlparser::ast::SetExpr, out: &mut Vec<&'a mut Select>) {
        match body {
            sqlparser::ast::SetExpr::Select(select) => out.push(select),
            sqlparser::ast::SetExpr::Query(inner) => collect(&mut inner.body, out),
            sqlparser::ast::SetExpr::SetOperation { left, right, .. } => {
                collect(left, out);
                collect(right, out);
            }
            _ => {}
        }
    }
    let mut out = Vec::new();
    collect(&mut query.body, &mut out);
    out
}

/// System catalogs are never tenant-scoped.
fn is_system_catalog_table(table_name: &str) -> bool {
    let lower = table_name.to_lowercase();
    lower.starts_with("pg_catalog.")
        || lower.starts_with("information_schema.")
        || lower.starts_with("pg_")
}
