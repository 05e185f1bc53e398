//! The executor boundary.
//!
//! The engine never talks to a database. Callers supply a [`QueryExecutor`]
//! that runs the (already scoped and validated) SQL against their backend.

use async_trait::async_trait;

use quarry_core::BackendCapabilities;

/// One page of raw results from the backend.
#[derive(Debug, Clone, Default)]
pub struct QueryPage {
    /// Result-set column names, in projection order.
    pub columns: Vec<String>,
    /// Row-major values.
    pub rows: Vec<Vec<serde_json::Value>>,
}

/// Caller-supplied query execution.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    /// Execute `sql` with `params` bound in order. Must not mutate state;
    /// the orchestrator only ever hands it validated read queries.
    async fn execute(
        &self,
        capabilities: &BackendCapabilities,
        sql: &str,
        params: &[serde_json::Value],
    ) -> anyhow::Result<QueryPage>;
}

#[async_trait]
impl<T: QueryExecutor + ?Sized> QueryExecutor for std::sync::Arc<T> {
    async fn execute(
        &self,
        capabilities: &BackendCapabilities,
        sql: &str,
        params: &[serde_json::Value],
    ) -> anyhow::Result<QueryPage> {
        (**self).execute(capabilities, sql, params).await
    }
}
