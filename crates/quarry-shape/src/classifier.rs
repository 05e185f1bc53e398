//! SQL shape classification.
//!
//! Classification decides whether automated tenant-scoping rewriting is safe
//! for a statement. Anything that cannot be positively confirmed safe maps
//! to an `Unsupported*` shape.

use serde::{Deserialize, Serialize};
use sqlparser::ast::{
    Expr, FunctionArg, FunctionArgExpr, FunctionArguments, JoinConstraint, JoinOperator, Query,
    Select, SetExpr, Statement, TableFactor, TableWithJoins,
};

use crate::analyzer::{SqlAnalyzer, body_selects, count_nodes};

/// Structural classification of a parsed statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SqlShape {
    /// A plain SELECT without CTEs or set operations.
    SafeSimpleSelect,
    /// A CTE-wrapped query whose every body is a plain SELECT.
    SafeCteQuery,
    /// UNION / INTERSECT / EXCEPT at any level.
    UnsupportedSetOperation,
    /// Not a SELECT (DML, DDL, utility statements, multi-statement input).
    UnsupportedStatementType,
    /// A subquery references (or cannot be proven not to reference) the
    /// outer query.
    UnsupportedCorrelatedSubquery,
    /// AST node count exceeds the configured bound.
    UnsupportedComplexity,
    /// The input did not parse.
    ParseError,
}

impl SqlShape {
    /// Whether tenant-scoping rewriting is safe for this shape.
    pub fn is_safe(&self) -> bool {
        matches!(self, SqlShape::SafeSimpleSelect | SqlShape::SafeCteQuery)
    }
}

/// Classifier configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// Strict correlated-subquery detection (the primary contract). The
    /// relaxed mode is a narrow legacy carve-out: only an explicit
    /// outer-alias-qualified reference counts as correlated.
    #[serde(default = "default_strict")]
    pub strict: bool,

    /// Maximum accepted AST node count.
    #[serde(default = "default_max_ast_nodes")]
    pub max_ast_nodes: usize,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            strict: default_strict(),
            max_ast_nodes: default_max_ast_nodes(),
        }
    }
}

fn default_strict() -> bool {
    true
}

fn default_max_ast_nodes() -> usize {
    5_000
}

/// Classify a SQL string with the generic dialect.
pub fn classify_sql(sql: &str, config: &ClassifierConfig) -> SqlShape {
    SqlAnalyzer::default().classify(sql, config)
}

impl SqlAnalyzer {
    /// Classify a SQL string. Deterministic for identical `(sql, config)`.
    pub fn classify(&self, sql: &str, config: &ClassifierConfig) -> SqlShape {
        let statements = match self.parse(sql) {
            Ok(statements) => statements,
            Err(_) => return SqlShape::ParseError,
        };
        let stmt = match statements.as_slice() {
            [] => return SqlShape::ParseError,
            [single] => single,
            _ => return SqlShape::UnsupportedStatementType,
        };
        self.classify_statement(stmt, config)
    }

    /// Classify an already-parsed statement.
    pub fn classify_statement(&self, stmt: &Statement, config: &ClassifierConfig) -> SqlShape {
        if count_nodes(stmt) > config.max_ast_nodes {
            return SqlShape::UnsupportedComplexity;
        }

        let Statement::Query(query) = stmt else {
            return SqlShape::UnsupportedStatementType;
        };

        if let Some(shape) = unsupported_body(&query.body) {
            return shape;
        }
        if let Some(with) = &query.with {
            for cte in &with.cte_tables {
                if let Some(shape) = unsupported_body(&cte.query.body) {
                    return shape;
                }
            }
        }

        if query_has_correlated_subquery(query, config.strict) {
            return SqlShape::UnsupportedCorrelatedSubquery;
        }

        if query.with.is_some() {
            SqlShape::SafeCteQuery
        } else {
            SqlShape::SafeSimpleSelect
        }
    }
}

/// Reject non-SELECT bodies. Parenthesized bodies are descended into.
fn unsupported_body(body: &SetExpr) -> Option<SqlShape> {
    match body {
        SetExpr::Select(_) => None,
        SetExpr::Query(inner) => unsupported_body(&inner.body),
        SetExpr::SetOperation { .. } => Some(SqlShape::UnsupportedSetOperation),
        _ => Some(SqlShape::UnsupportedStatementType),
    }
}

// ---- correlated-subquery detection ----

/// Identifiers visible at one query level, lowercased.
#[derive(Debug, Clone, Default)]
struct Frame {
    entries: Vec<String>,
    table_count: usize,
}

impl Frame {
    fn contains(&self, qualifier: &str) -> bool {
        self.entries.iter().any(|e| e == qualifier)
    }
}

fn scope_frame(select: &Select) -> Frame {
    let mut frame = Frame::default();
    for twj in &select.from {
        frame_from_table_with_joins(twj, &mut frame);
    }
    frame
}

fn frame_from_table_with_joins(twj: &TableWithJoins, frame: &mut Frame) {
    frame_from_factor(&twj.relation, frame);
    for join in &twj.joins {
        frame_from_factor(&join.relation, frame);
    }
}

fn frame_from_factor(factor: &TableFactor, frame: &mut Frame) {
    match factor {
        TableFactor::Table { name, alias, .. } => {
            frame.table_count += 1;
            if let Some(alias) = alias {
                frame.entries.push(alias.name.value.to_lowercase());
            }
            let full = name.to_string().to_lowercase();
            if let Some(bare) = full.rsplit('.').next() {
                frame.entries.push(bare.to_string());
            }
            frame.entries.push(full);
        }
        TableFactor::Derived { alias, .. } => {
            frame.table_count += 1;
            if let Some(alias) = alias {
                frame.entries.push(alias.name.value.to_lowercase());
            }
        }
        TableFactor::NestedJoin {
            table_with_joins, ..
        } => {
            frame_from_table_with_joins(table_with_joins, frame);
        }
        _ => {
            frame.table_count += 1;
        }
    }
}

/// Detect correlated subqueries anywhere under `query`.
pub(crate) fn query_has_correlated_subquery(query: &Query, strict: bool) -> bool {
    nested_query_correlated(query, &[], strict)
}

/// Check a query level. `outer` holds the frames of enclosing queries,
/// innermost last; CTE bodies always start from a fresh scope.
fn nested_query_correlated(query: &Query, outer: &[Frame], strict: bool) -> bool {
    if let Some(with) = &query.with {
        for cte in &with.cte_tables {
            if nested_query_correlated(&cte.query, &[], strict) {
                return true;
            }
        }
    }
    body_selects(&query.body)
        .into_iter()
        .any(|select| select_correlated(select, outer, strict))
}

fn select_correlated(select: &Select, outer: &[Frame], strict: bool) -> bool {
    let mut scopes: Vec<Frame> = outer.to_vec();
    scopes.push(scope_frame(select));

    let mut walk = CorrelationWalk {
        scopes: &scopes,
        strict,
        in_subquery: !outer.is_empty(),
        correlated: false,
    };

    for item in &select.projection {
        match item {
            sqlparser::ast::SelectItem::UnnamedExpr(expr) => walk.walk_expr(expr),
            sqlparser::ast::SelectItem::ExprWithAlias { expr, .. } => walk.walk_expr(expr),
            _ => {}
        }
    }
    if let Some(selection) = &select.selection {
        walk.walk_expr(selection);
    }
    if let Some(having) = &select.having {
        walk.walk_expr(having);
    }
    if let sqlparser::ast::GroupByExpr::Expressions(exprs, _) = &select.group_by {
        for expr in exprs {
            walk.walk_expr(expr);
        }
    }
    for twj in &select.from {
        walk.walk_joins(twj);
    }
    if walk.correlated {
        return true;
    }

    // Derived tables are subqueries in their own right.
    let mut derived_correlated = false;
    for twj in &select.from {
        visit_derived(twj, &mut |subquery| {
            if nested_query_correlated(subquery, &scopes, strict) {
                derived_correlated = true;
            }
        });
    }
    derived_correlated
}

fn visit_derived(twj: &TableWithJoins, f: &mut impl FnMut(&Query)) {
    visit_derived_factor(&twj.relation, f);
    for join in &twj.joins {
        visit_derived_factor(&join.relation, f);
    }
}

fn visit_derived_factor(factor: &TableFactor, f: &mut impl FnMut(&Query)) {
    match factor {
        TableFactor::Derived { subquery, .. } => f(subquery),
        TableFactor::NestedJoin {
            table_with_joins, ..
        } => visit_derived(table_with_joins, f),
        _ => {}
    }
}

struct CorrelationWalk<'a> {
    scopes: &'a [Frame],
    strict: bool,
    in_subquery: bool,
    correlated: bool,
}

impl CorrelationWalk<'_> {
    fn local(&self) -> &Frame {
        self.scopes.last().expect("scope stack is never empty")
    }

    fn outer_contains(&self, qualifier: &str) -> bool {
        self.scopes[..self.scopes.len() - 1]
            .iter()
            .any(|frame| frame.contains(qualifier))
    }

    fn check_qualified(&mut self, qualifier: &str) {
        if !self.in_subquery {
            return;
        }
        let qualifier = qualifier.to_lowercase();
        if self.local().contains(&qualifier) {
            return;
        }
        if self.outer_contains(&qualifier) {
            // Explicit outer reference: correlated in both modes.
            self.correlated = true;
            return;
        }
        // Unknown qualifier: cannot be proven local.
        if self.strict {
            self.correlated = true;
        }
    }

    fn check_unqualified(&mut self) {
        if !self.in_subquery || !self.strict {
            return;
        }
        // A single local table claims unqualified columns; anything else
        // cannot be proven local.
        if self.local().table_count != 1 {
            self.correlated = true;
        }
    }

    fn walk_subquery(&mut self, query: &Query) {
        if nested_query_correlated(query, self.scopes, self.strict) {
            self.correlated = true;
        }
    }

    fn walk_joins(&mut self, twj: &TableWithJoins) {
        for join in &twj.joins {
            if let Some(JoinConstraint::On(expr)) = join_constraint(&join.join_operator) {
                self.walk_expr(expr);
            }
        }
    }

    fn walk_expr(&mut self, expr: &Expr) {
        if self.correlated {
            return;
        }
        match expr {
            Expr::Identifier(_) => self.check_unqualified(),
            Expr::CompoundIdentifier(parts) => {
                if parts.len() >= 2 {
                    self.check_qualified(&parts[0].value);
                }
            }
            Expr::Subquery(query) => self.walk_subquery(query),
            Expr::Exists { subquery, .. } => self.walk_subquery(subquery),
            Expr::InSubquery { expr, subquery, .. } => {
                self.walk_expr(expr);
                self.walk_subquery(subquery);
            }
            Expr::BinaryOp { left, right, .. } => {
                self.walk_expr(left);
                self.walk_expr(right);
            }
            Expr::UnaryOp { expr, .. } => self.walk_expr(expr),
            Expr::Nested(inner) => self.walk_expr(inner),
            Expr::IsNull(inner)
            | Expr::IsNotNull(inner)
            | Expr::IsTrue(inner)
            | Expr::IsNotTrue(inner)
            | Expr::IsFalse(inner)
            | Expr::IsNotFalse(inner) => self.walk_expr(inner),
            Expr::Between {
                expr, low, high, ..
            } => {
                self.walk_expr(expr);
                self.walk_expr(low);
                self.walk_expr(high);
            }
            Expr::InList { expr, list, .. } => {
                self.walk_expr(expr);
                for item in list {
                    self.walk_expr(item);
                }
            }
            Expr::Like { expr, pattern, .. } | Expr::ILike { expr, pattern, .. } => {
                self.walk_expr(expr);
                self.walk_expr(pattern);
            }
            Expr::Cast { expr, .. } => self.walk_expr(expr),
            Expr::Case {
                operand,
                conditions,
                else_result,
                ..
            } => {
                if let Some(operand) = operand {
                    self.walk_expr(operand);
                }
                for when in conditions {
                    self.walk_expr(&when.condition);
                    self.walk_expr(&when.result);
                }
                if let Some(else_result) = else_result {
                    self.walk_expr(else_result);
                }
            }
            Expr::Function(func) => match &func.args {
                FunctionArguments::List(list) => {
                    for arg in &list.args {
                        match arg {
                            FunctionArg::Unnamed(FunctionArgExpr::Expr(e)) => self.walk_expr(e),
                            FunctionArg::Named {
                                arg: FunctionArgExpr::Expr(e),
                                ..
                            } => self.walk_expr(e),
                            FunctionArg::ExprNamed {
                                arg: FunctionArgExpr::Expr(e),
                                ..
                            } => self.walk_expr(e),
                            _ => {}
                        }
                    }
                }
                FunctionArguments::Subquery(query) => self.walk_subquery(query),
                _ => {}
            },
            _ => {}
        }
    }
}

/// The ON/USING constraint of a join, if the operator carries one.
pub fn join_constraint(op: &JoinOperator) -> Option<&JoinConstraint> {
    match op {
        JoinOperator::Join(c)
        | JoinOperator::Inner(c)
        | JoinOperator::Left(c)
        | JoinOperator::LeftOuter(c)
        | JoinOperator::Right(c)
        | JoinOperator::RightOuter(c)
        | JoinOperator::FullOuter(c)
        | JoinOperator::Semi(c)
        | JoinOperator::LeftSemi(c)
        | JoinOperator::RightSemi(c)
        | JoinOperator::Anti(c)
        | JoinOperator::LeftAnti(c)
        | JoinOperator::RightAnti(c)
        | JoinOperator::StraightJoin(c) => Some(c),
        JoinOperator::AsOf { constraint, .. } => Some(constraint),
        _ => None,
    }
}
