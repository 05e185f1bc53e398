//! Schema snapshot handle.
//!
//! The validator and the tenancy policy both need to know which columns a
//! table actually has. Rather than reaching into an ambient global schema
//! index, they take a [`SchemaLoader`] handle injected at construction time.

use std::collections::HashMap;

/// Read-only view of a schema snapshot.
///
/// Implementations must be cheap to call; the engine may consult the loader
/// several times per request.
pub trait SchemaLoader: Send + Sync {
    /// The columns of `table`, or `None` if the table is unknown to the
    /// snapshot.
    fn table_columns(&self, table: &str) -> Option<Vec<String>>;

    /// Whether `column` exists on `table`. Unknown tables report `false`.
    fn has_column(&self, table: &str, column: &str) -> bool {
        self.table_columns(table)
            .map(|cols| cols.iter().any(|c| c.eq_ignore_ascii_case(column)))
            .unwrap_or(false)
    }
}

/// In-memory schema snapshot, used in tests and for statically configured
/// deployments.
#[derive(Debug, Clone, Default)]
pub struct InMemorySchema {
    tables: HashMap<String, Vec<String>>,
}

impl InMemorySchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(
        mut self,
        table: impl Into<String>,
        columns: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.tables.insert(
            table.into(),
            columns.into_iter().map(Into::into).collect(),
        );
        self
    }
}

impl SchemaLoader for InMemorySchema {
    fn table_columns(&self, table: &str) -> Option<Vec<String>> {
        self.tables.get(table).cloned()
    }
}

/// A loader that knows nothing. Useful when no snapshot is available;
/// every lookup misses, so column-dependent checks fall back to their
/// fail-safe paths.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmptySchema;

impl SchemaLoader for EmptySchema {
    fn table_columns(&self, _table: &str) -> Option<Vec<String>> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn has_column_is_case_insensitive() {
        let schema = InMemorySchema::new().with_table("orders", ["id", "Tenant_Id"]);
        assert!(schema.has_column("orders", "tenant_id"));
        assert!(!schema.has_column("orders", "missing"));
        assert!(!schema.has_column("unknown", "id"));
    }
}
