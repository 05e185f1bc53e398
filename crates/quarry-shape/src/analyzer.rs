//! SQL parsing and structural analysis.

use core::ops::ControlFlow;
use sqlparser::ast::{
    Expr, ObjectName, Query, Select, SetExpr, Statement, TableFactor, TableWithJoins, Visit,
    Visitor, visit_relations,
};
use sqlparser::dialect::{Dialect, GenericDialect, dialect_from_str};
use sqlparser::parser::Parser;

use crate::error::ShapeError;

/// Parses SQL for a given provider and extracts structural facts.
pub struct SqlAnalyzer {
    provider: String,
}

impl Clone for SqlAnalyzer {
    fn clone(&self) -> Self {
        Self::new(self.provider.clone())
    }
}

impl Default for SqlAnalyzer {
    fn default() -> Self {
        Self::new("generic")
    }
}

impl SqlAnalyzer {
    /// Create an analyzer for a provider (e.g. "postgres", "sqlite").
    /// Unknown providers fall back to the generic dialect.
    pub fn new(provider: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
        }
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    fn dialect(&self) -> Box<dyn Dialect> {
        dialect_from_str(&self.provider).unwrap_or_else(|| Box::new(GenericDialect {}))
    }

    /// Parse a SQL string into statements.
    pub fn parse(&self, sql: &str) -> Result<Vec<Statement>, ShapeError> {
        Parser::parse_sql(&*self.dialect(), sql).map_err(|e| ShapeError::Parse(e.to_string()))
    }

    /// Parse a SQL string expected to contain exactly one statement.
    pub fn parse_one(&self, sql: &str) -> Result<Statement, ShapeError> {
        let mut statements = self.parse(sql)?;
        match statements.len() {
            0 => Err(ShapeError::Empty),
            1 => Ok(statements.remove(0)),
            n => Err(ShapeError::MultipleStatements(n)),
        }
    }
}

/// Count AST nodes in a statement. Used to bound rewrite and validation work.
pub fn count_nodes(stmt: &Statement) -> usize {
    struct NodeCounter {
        count: usize,
    }

    impl Visitor for NodeCounter {
        type Break = ();

        fn pre_visit_query(&mut self, _query: &Query) -> ControlFlow<Self::Break> {
            self.count += 1;
            ControlFlow::Continue(())
        }

        fn pre_visit_relation(&mut self, _relation: &ObjectName) -> ControlFlow<Self::Break> {
            self.count += 1;
            ControlFlow::Continue(())
        }

        fn pre_visit_table_factor(&mut self, _tf: &TableFactor) -> ControlFlow<Self::Break> {
            self.count += 1;
            ControlFlow::Continue(())
        }

        fn pre_visit_expr(&mut self, _expr: &Expr) -> ControlFlow<Self::Break> {
            self.count += 1;
            ControlFlow::Continue(())
        }
    }

    let mut counter = NodeCounter { count: 1 };
    let _ = stmt.visit(&mut counter);
    counter.count
}

/// Every table name referenced anywhere in the statement, including inside
/// joins and subqueries. Order of first appearance, deduplicated.
pub fn referenced_tables(stmt: &Statement) -> Vec<String> {
    let mut tables: Vec<String> = Vec::new();
    let _ = visit_relations(stmt, |relation: &ObjectName| {
        let name = relation.to_string();
        if !tables.iter().any(|t| t.eq_ignore_ascii_case(&name)) {
            tables.push(name);
        }
        ControlFlow::<()>::Continue(())
    });
    tables
}

/// A FROM target with its effective alias.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FromTarget {
    /// Full (possibly schema-qualified) table name.
    pub name: String,
    /// Alias, if one was given.
    pub alias: Option<String>,
}

impl FromTarget {
    /// The identifier a predicate on this target should be qualified with.
    pub fn qualifier(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }

    /// The bare table name without a schema prefix.
    pub fn bare_name(&self) -> &str {
        self.name.rsplit('.').next().unwrap_or(&self.name)
    }
}

/// The FROM targets of a single SELECT: the relation plus every joined
/// table. Derived tables and nested joins are descended into.
pub fn from_targets(select: &Select) -> Vec<FromTarget> {
    let mut targets = Vec::new();
    for twj in &select.from {
        collect_from_table_with_joins(twj, &mut targets);
    }
    targets
}

fn collect_from_table_with_joins(twj: &TableWithJoins, targets: &mut Vec<FromTarget>) {
    collect_from_factor(&twj.relation, targets);
    for join in &twj.joins {
        collect_from_factor(&join.relation, targets);
    }
}

fn collect_from_factor(factor: &TableFactor, targets: &mut Vec<FromTarget>) {
    match factor {
        TableFactor::Table { name, alias, .. } => {
            targets.push(FromTarget {
                name: name.to_string(),
                alias: alias.as_ref().map(|a| a.name.value.clone()),
            });
        }
        TableFactor::NestedJoin {
            table_with_joins, ..
        } => {
            collect_from_table_with_joins(table_with_joins, targets);
        }
        _ => {}
    }
}

/// All SELECTs making up a query body, descending through parenthesized
/// bodies and set operations.
pub fn body_selects(body: &SetExpr) -> Vec<&Select> {
    let mut selects = Vec::new();
    collect_body_selects(body, &mut selects);
    selects
}

fn collect_body_selects<'a>(body: &'a SetExpr, selects: &mut Vec<&'a Select>) {
    match body {
        SetExpr::Select(select) => selects.push(select),
        SetExpr::Query(query) => collect_body_selects(&query.body, selects),
        SetExpr::SetOperation { left, right, .. } => {
            collect_body_selects(left, selects);
            collect_body_selects(right, selects);
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn parse(sql: &str) -> Statement {
        SqlAnalyzer::default().parse_one(sql).unwrap()
    }

    #[test]
    fn parse_one_rejects_multiple_statements() {
        let analyzer = SqlAnalyzer::default();
        let err = analyzer
            .parse_one("SELECT 1; SELECT 2")
            .unwrap_err();
        assert!(matches!(err, ShapeError::MultipleStatements(2)));
    }

    #[test]
    fn referenced_tables_covers_joins_and_subqueries() {
        let stmt = parse(
            "SELECT o.id FROM orders o \
             JOIN customers c ON o.customer_id = c.id \
             WHERE o.total > (SELECT avg(total) FROM order_stats)",
        );
        assert_eq!(
            referenced_tables(&stmt),
            vec!["orders", "customers", "order_stats"]
        );
    }

    #[test]
    fn from_targets_carry_aliases() {
        let stmt = parse("SELECT * FROM orders o JOIN customers ON o.customer_id = customers.id");
        let Statement::Query(query) = &stmt else {
            panic!("expected query");
        };
        let selects = body_selects(&query.body);
        let targets = from_targets(selects[0]);
        assert_eq!(targets.len(), 2);
        assert_eq!(targets[0].name, "orders");
        assert_eq!(targets[0].qualifier(), "o");
        assert_eq!(targets[1].name, "customers");
        assert_eq!(targets[1].qualifier(), "customers");
    }

    #[test]
    fn bare_name_strips_schema_prefix() {
        let target = FromTarget {
            name: "analytics.orders".to_string(),
            alias: None,
        };
        assert_eq!(target.bare_name(), "orders");
    }

    #[test]
    fn node_count_grows_with_query_size() {
        let small = count_nodes(&parse("SELECT id FROM orders"));
        let large = count_nodes(&parse(
            "SELECT id, total, status FROM orders WHERE status = 'open' AND total > 10",
        ));
        assert!(large > small);
    }
}
