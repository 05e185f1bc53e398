//! # quarry-shape
//!
//! SQL parsing and shape classification for Quarry.
//!
//! The classifier decides whether a statement is structurally safe for
//! automated tenant-scoping rewriting. The contract is fail-closed: any
//! statement that cannot be positively confirmed safe classifies as one of
//! the `Unsupported*` shapes.
//!
//! ```
//! use quarry_shape::{ClassifierConfig, SqlShape, classify_sql};
//!
//! let shape = classify_sql("SELECT * FROM orders", &ClassifierConfig::default());
//! assert_eq!(shape, SqlShape::SafeSimpleSelect);
//! ```

pub mod analyzer;
pub mod classifier;
pub mod error;
pub mod order;

pub use analyzer::{FromTarget, SqlAnalyzer, body_selects, count_nodes, from_targets,
    referenced_tables};
pub use classifier::{ClassifierConfig, SqlShape, classify_sql, join_constraint};
pub use error::ShapeError;
pub use order::{OrderKey, order_keys, order_signature};
