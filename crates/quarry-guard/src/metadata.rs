//! Structural metadata extraction.
//!
//! Metadata feeds the audit trail and downstream retry/cost heuristics. It
//! is always produced, even for queries that fail validation, and it is
//! never used for correctness decisions.
//!
//! Extraction is two-tier: a primary AST pass, and a narrow regex fallback
//! that captures table lineage when the statement does not parse. The
//! fallback feeds audit metadata only — the security validator itself never
//! consumes it.

use core::ops::ControlFlow;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::OnceLock;

use sqlparser::ast::{
    Expr, JoinConstraint, JoinOperator, Query, Select, SetExpr, Statement, Value, Visit, Visitor,
};

use quarry_shape::{join_constraint, referenced_tables};

/// Coarse join-complexity bucket derived from the join count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinComplexity {
    None,
    Simple,
    Moderate,
    Complex,
}

impl JoinComplexity {
    fn from_count(count: usize) -> Self {
        match count {
            0 => Self::None,
            1..=2 => Self::Simple,
            3..=5 => Self::Moderate,
            _ => Self::Complex,
        }
    }
}

/// Which extraction tier produced the metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionTier {
    Ast,
    RegexFallback,
}

/// Structural facts about a statement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqlMetadata {
    /// Every referenced table, in order of first appearance.
    pub table_lineage: Vec<String>,
    /// Columns used, keyed by qualifier ("" for unqualified references).
    pub column_usage: BTreeMap<String, BTreeSet<String>>,
    /// Number of explicit JOIN clauses.
    pub join_count: usize,
    pub join_complexity: JoinComplexity,
    /// Number of set-operation nodes (UNION / INTERSECT / EXCEPT).
    pub union_count: usize,
    pub has_aggregation: bool,
    pub has_subquery: bool,
    pub has_window_function: bool,
    pub estimated_table_count: usize,
    /// Advisory weighted score for retry/cost heuristics only.
    pub query_complexity_score: f64,
    pub detected_cartesian: bool,
    /// Which tier produced this metadata.
    pub extraction: ExtractionTier,
}

const AGGREGATE_FUNCTIONS: &[&str] = &[
    "sum", "count", "avg", "min", "max", "array_agg", "string_agg", "bool_and", "bool_or",
    "stddev", "variance",
];

/// Extract metadata from a parsed statement.
pub fn extract_metadata(stmt: &Statement) -> SqlMetadata {
    let mut visitor = MetadataVisitor::default();
    let _ = stmt.visit(&mut visitor);

    let table_lineage = referenced_tables(stmt);
    let estimated_table_count = table_lineage.len();
    let subquery_count = visitor.query_count.saturating_sub(1);

    let query_complexity_score = 3.0 * visitor.join_count as f64
        + 2.0 * subquery_count as f64
        + 2.0 * visitor.union_count as f64
        + 1.5 * visitor.window_count as f64
        + if visitor.has_aggregation { 1.0 } else { 0.0 }
        + 0.5 * estimated_table_count as f64;

    SqlMetadata {
        table_lineage,
        column_usage: visitor.column_usage,
        join_count: visitor.join_count,
        join_complexity: JoinComplexity::from_count(visitor.join_count),
        union_count: visitor.union_count,
        has_aggregation: visitor.has_aggregation,
        has_subquery: subquery_count > 0,
        has_window_function: visitor.window_count > 0,
        estimated_table_count,
        query_complexity_score,
        detected_cartesian: visitor.detected_cartesian,
        extraction: ExtractionTier::Ast,
    }
}

/// Fallback extraction for statements that did not parse. Lineage only;
/// every structural detector stays at its zero value.
pub fn extract_metadata_fallback(sql: &str) -> SqlMetadata {
    static TABLE_RE: OnceLock<Regex> = OnceLock::new();
    let re = TABLE_RE.get_or_init(|| {
        Regex::new(r"(?i)\b(?:from|join)\s+([a-z_][a-z0-9_.]*)").expect("static regex")
    });

    tracing::debug!("metadata extraction falling back to regex lineage capture");

    let mut table_lineage: Vec<String> = Vec::new();
    for captures in re.captures_iter(sql) {
        let name = captures[1].to_string();
        if !table_lineage.iter().any(|t| t.eq_ignore_ascii_case(&name)) {
            table_lineage.push(name);
        }
    }
    let estimated_table_count = table_lineage.len();

    SqlMetadata {
        table_lineage,
        column_usage: BTreeMap::new(),
        join_count: 0,
        join_complexity: JoinComplexity::None,
        union_count: 0,
        has_aggregation: false,
        has_subquery: false,
        has_window_function: false,
        estimated_table_count,
        query_complexity_score: 0.5 * estimated_table_count as f64,
        detected_cartesian: false,
        extraction: ExtractionTier::RegexFallback,
    }
}

/// The reasons a SELECT risks a Cartesian product, if any.
pub(crate) fn cartesian_reasons(select: &Select) -> Vec<&'static str> {
    let mut reasons = Vec::new();
    for twj in &select.from {
        for join in &twj.joins {
            match &join.join_operator {
                JoinOperator::CrossJoin(_) => reasons.push("explicit CROSS JOIN"),
                op => match join_constraint(op) {
                    Some(JoinConstraint::On(expr)) => {
                        if is_constant_truth(expr) {
                            reasons.push("join condition is constant-truth");
                        }
                    }
                    Some(JoinConstraint::None) => reasons.push("join has no ON condition"),
                    Some(_) => {}
                    None => {}
                },
            }
        }
    }
    reasons
}

fn is_constant_truth(expr: &Expr) -> bool {
    match expr {
        Expr::Value(v) => v.value == Value::Boolean(true),
        Expr::Nested(inner) => is_constant_truth(inner),
        Expr::BinaryOp { left, op, right } => {
            if !matches!(op, sqlparser::ast::BinaryOperator::Eq) {
                return false;
            }
            match (left.as_ref(), right.as_ref()) {
                (Expr::Value(l), Expr::Value(r)) => l.value == r.value,
                _ => false,
            }
        }
        _ => false,
    }
}

#[derive(Default)]
struct MetadataVisitor {
    query_count: usize,
    join_count: usize,
    union_count: usize,
    window_count: usize,
    has_aggregation: bool,
    detected_cartesian: bool,
    column_usage: BTreeMap<String, BTreeSet<String>>,
}

impl MetadataVisitor {
    fn scan_body(&mut self, body: &SetExpr) {
        match body {
            SetExpr::Select(select) => self.scan_select(select),
            SetExpr::SetOperation { left, right, .. } => {
                self.union_count += 1;
                self.scan_body(left);
                self.scan_body(right);
            }
            // Parenthesized bodies wrap a Query node visited on its own.
            _ => {}
        }
    }

    fn scan_select(&mut self, select: &Select) {
        for twj in &select.from {
            self.join_count += twj.joins.len();
        }
        if !cartesian_reasons(select).is_empty() {
            self.detected_cartesian = true;
        }
        if select.having.is_some() {
            self.has_aggregation = true;
        }
        if let sqlparser::ast::GroupByExpr::Expressions(exprs, _) = &select.group_by {
            if !exprs.is_empty() {
                self.has_aggregation = true;
            }
        }
    }
}

impl Visitor for MetadataVisitor {
    type Break = ();

    fn pre_visit_query(&mut self, query: &Query) -> ControlFlow<Self::Break> {
        self.query_count += 1;
        self.scan_body(&query.body);
        ControlFlow::Continue(())
    }

    fn pre_visit_expr(&mut self, expr: &Expr) -> ControlFlow<Self::Break> {
        match expr {
            Expr::Identifier(ident) => {
                self.column_usage
                    .entry(String::new())
                    .or_default()
                    .insert(ident.value.clone());
            }
            Expr::CompoundIdentifier(parts) => {
                if let (Some(first), Some(last)) = (parts.first(), parts.last()) {
                    if parts.len() >= 2 {
                        self.column_usage
                            .entry(first.value.clone())
                            .or_default()
                            .insert(last.value.clone());
                    }
                }
            }
            Expr::Function(func) => {
                let name = func.name.to_string().to_lowercase();
                let bare = name.rsplit('.').next().unwrap_or(&name);
                if func.over.is_some() {
                    self.window_count += 1;
                } else if AGGREGATE_FUNCTIONS.contains(&bare) {
                    self.has_aggregation = true;
                }
            }
            _ => {}
        }
        ControlFlow::Continue(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use quarry_shape::SqlAnalyzer;

    fn metadata(sql: &str) -> SqlMetadata {
        let stmt = SqlAnalyzer::default().parse_one(sql).unwrap();
        extract_metadata(&stmt)
    }

    #[test]
    fn lineage_and_joins() {
        let meta = metadata(
            "SELECT o.id, c.name FROM orders o \
             JOIN customers c ON o.customer_id = c.id \
             JOIN regions r ON c.region_id = r.id",
        );
        assert_eq!(meta.table_lineage, vec!["orders", "customers", "regions"]);
        assert_eq!(meta.join_count, 2);
        assert_eq!(meta.join_complexity, JoinComplexity::Simple);
        assert_eq!(meta.estimated_table_count, 3);
        assert!(!meta.detected_cartesian);
        assert_eq!(meta.extraction, ExtractionTier::Ast);
    }

    #[test]
    fn column_usage_tracks_qualifiers() {
        let meta = metadata("SELECT o.id, status FROM orders o WHERE o.total > 5");
        assert!(meta.column_usage["o"].contains("id"));
        assert!(meta.column_usage["o"].contains("total"));
        assert!(meta.column_usage[""].contains("status"));
    }

    #[test]
    fn structural_detectors() {
        let meta = metadata(
            "SELECT region, sum(total) FROM orders \
             WHERE customer_id IN (SELECT id FROM customers) \
             GROUP BY region",
        );
        assert!(meta.has_aggregation);
        assert!(meta.has_subquery);
        assert!(!meta.has_window_function);

        let meta = metadata("SELECT rank() OVER (ORDER BY total) FROM orders");
        assert!(meta.has_window_function);
    }

    #[test]
    fn cartesian_flag_set_for_cross_join() {
        let meta = metadata("SELECT * FROM a CROSS JOIN b");
        assert!(meta.detected_cartesian);
    }

    #[test]
    fn complexity_score_weights_joins() {
        let no_join = metadata("SELECT * FROM a");
        let one_join = metadata("SELECT * FROM a JOIN b ON a.id = b.a_id");
        assert!(one_join.query_complexity_score >= no_join.query_complexity_score + 3.0);
    }

    #[test]
    fn union_count() {
        let meta = metadata("SELECT id FROM a UNION SELECT id FROM b");
        assert_eq!(meta.union_count, 1);
    }

    #[test]
    fn fallback_captures_lineage_only() {
        let meta = extract_metadata_fallback("SELEC * FORM x; select a from orders join pg_class");
        assert_eq!(meta.table_lineage, vec!["orders", "pg_class"]);
        assert_eq!(meta.extraction, ExtractionTier::RegexFallback);
        assert_eq!(meta.join_count, 0);
    }
}
