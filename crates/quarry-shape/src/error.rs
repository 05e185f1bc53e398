//! Error types for the shape crate.

use thiserror::Error;

/// Errors raised while parsing or analyzing SQL.
#[derive(Debug, Error)]
pub enum ShapeError {
    /// SQL parsing failed.
    #[error("failed to parse SQL: {0}")]
    Parse(String),

    /// The input contained no statements.
    #[error("empty SQL input")]
    Empty,

    /// The input contained more than one statement.
    #[error("expected a single statement, found {0}")]
    MultipleStatements(usize),
}
