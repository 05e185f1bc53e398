//! End-to-end orchestrator tests with a scripted executor.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use serde_json::{Value, json};

use quarry_core::{
    BackendCapabilities, EnforcementLimits, InMemorySchema, SigningConfig, TenancyConfig,
};
use quarry_guard::SecurityPolicy;
use quarry_guard::SecurityValidator;
use quarry_runtime::{
    ExecutionConstraints, NullAuditSink, OrchestratorError, PaginationMode, QueryExecutor,
    QueryOrchestrator, QueryPage, QueryRequest,
};
use quarry_tenancy::TenantEnforcementPolicy;

/// Executor double: returns scripted pages and records every call.
#[derive(Default)]
struct ScriptedExecutor {
    pages: Mutex<VecDeque<QueryPage>>,
    calls: Mutex<Vec<(String, Vec<Value>)>>,
}

impl ScriptedExecutor {
    fn push_page(&self, columns: &[&str], rows: Vec<Vec<Value>>) {
        self.pages.lock().unwrap().push_back(QueryPage {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            rows,
        });
    }

    fn calls(&self) -> Vec<(String, Vec<Value>)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl QueryExecutor for ScriptedExecutor {
    async fn execute(
        &self,
        _capabilities: &BackendCapabilities,
        sql: &str,
        params: &[Value],
    ) -> anyhow::Result<QueryPage> {
        self.calls
            .lock()
            .unwrap()
            .push((sql.to_string(), params.to_vec()));
        Ok(self.pages.lock().unwrap().pop_front().unwrap_or_default())
    }
}

fn orchestrator(
    executor: Arc<ScriptedExecutor>,
) -> QueryOrchestrator<Arc<ScriptedExecutor>, NullAuditSink> {
    let policy = TenantEnforcementPolicy::new(
        TenancyConfig::default(),
        EnforcementLimits::default(),
        ["orders".to_string()],
    );
    let validator = SecurityValidator::new(SecurityPolicy::default());
    let schema = InMemorySchema::new().with_table("orders", ["id", "status", "tenant_id"]);
    QueryOrchestrator::new(
        policy,
        validator,
        SigningConfig::default().with_secret(b"integration-secret".to_vec()),
        ExecutionConstraints::default(),
        Arc::new(schema),
        executor,
        NullAuditSink,
    )
}

fn request(pagination: PaginationMode) -> QueryRequest {
    QueryRequest {
        sql: "SELECT id, status FROM orders ORDER BY id".to_string(),
        params: vec![],
        tenant_id: Some(json!("t1")),
        page_size: 2,
        pagination,
        cursor: None,
        stable_order_columns: vec!["id".to_string()],
    }
}

fn sqlite() -> BackendCapabilities {
    BackendCapabilities::sql_rewrite("sqlite")
}

#[tokio::test]
async fn offset_pagination_round_trip() {
    let executor = Arc::new(ScriptedExecutor::default());
    executor.push_page(
        &["id", "status"],
        vec![
            vec![json!(1), json!("a")],
            vec![json!(2), json!("b")],
            vec![json!(3), json!("c")],
        ],
    );
    executor.push_page(&["id", "status"], vec![vec![json!(3), json!("c")]]);

    let orchestrator = orchestrator(executor.clone());
    let caps = sqlite();

    // First page: over-fetch of 3 rows means more pages exist.
    let first = orchestrator
        .run(&request(PaginationMode::Offset), &caps)
        .await
        .unwrap();
    assert!(first.enforcement.applied);
    assert_eq!(first.rows.len(), 2);
    assert!(first.has_more);
    let cursor = first.next_cursor.expect("continuation cursor");

    // Second page resumes from offset 2 and drains the result.
    let second = orchestrator
        .run(
            &QueryRequest {
                cursor: Some(cursor),
                ..request(PaginationMode::Offset)
            },
            &caps,
        )
        .await
        .unwrap();
    assert_eq!(second.rows, vec![vec![json!(3), json!("c")]]);
    assert!(!second.has_more);
    assert!(second.next_cursor.is_none());

    let calls = executor.calls();
    assert_eq!(calls.len(), 2);
    // Tenant predicate injected, page size over-fetched by one.
    assert_eq!(
        calls[0].0,
        "SELECT id, status FROM orders WHERE orders.tenant_id = ? ORDER BY id LIMIT 3 OFFSET 0"
    );
    assert_eq!(calls[0].1, vec![json!("t1")]);
    assert_eq!(
        calls[1].0,
        "SELECT id, status FROM orders WHERE orders.tenant_id = ? ORDER BY id LIMIT 3 OFFSET 2"
    );
}

#[tokio::test]
async fn keyset_pagination_resumes_from_last_row() {
    let executor = Arc::new(ScriptedExecutor::default());
    executor.push_page(
        &["id", "status"],
        vec![
            vec![json!(1), json!("a")],
            vec![json!(2), json!("b")],
            vec![json!(3), json!("c")],
        ],
    );
    executor.push_page(&["id", "status"], vec![vec![json!(3), json!("c")]]);

    let orchestrator = orchestrator(executor.clone());
    let caps = sqlite();

    let first = orchestrator
        .run(&request(PaginationMode::Keyset), &caps)
        .await
        .unwrap();
    assert_eq!(first.rows.len(), 2);
    assert!(first.has_more);
    let cursor = first.next_cursor.expect("continuation cursor");

    let second = orchestrator
        .run(
            &QueryRequest {
                cursor: Some(cursor),
                ..request(PaginationMode::Keyset)
            },
            &caps,
        )
        .await
        .unwrap();
    assert!(!second.has_more);

    let calls = executor.calls();
    assert_eq!(calls.len(), 2);
    // First page: wrapped, no seek predicate.
    assert!(calls[0].0.contains("AS keyset_page ORDER BY id ASC LIMIT 3"), "{}", calls[0].0);
    // Second page: seeks past the last returned id (2).
    assert!(calls[1].0.contains("WHERE (id > ?)"), "{}", calls[1].0);
    assert_eq!(calls[1].1, vec![json!("t1"), json!(2)]);
}

#[tokio::test]
async fn missing_tenant_is_rejected_before_execution() {
    let executor = Arc::new(ScriptedExecutor::default());
    let orchestrator = orchestrator(executor.clone());

    let err = orchestrator
        .run(
            &QueryRequest {
                tenant_id: None,
                ..request(PaginationMode::Offset)
            },
            &sqlite(),
        )
        .await
        .unwrap_err();

    match err {
        OrchestratorError::EnforcementRejected { reason_code, .. } => {
            assert_eq!(reason_code, "missing_tenant");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(executor.calls().is_empty(), "nothing may execute");
}

#[tokio::test]
async fn restricted_table_is_blocked_before_execution() {
    let executor = Arc::new(ScriptedExecutor::default());
    let policy = TenantEnforcementPolicy::new(
        TenancyConfig::default(),
        EnforcementLimits::default(),
        ["orders".to_string()],
    );
    let validator = SecurityValidator::new(
        SecurityPolicy::default().with_restricted_table("orders"),
    );
    let schema = InMemorySchema::new().with_table("orders", ["id", "status", "tenant_id"]);
    let orchestrator = QueryOrchestrator::new(
        policy,
        validator,
        SigningConfig::default().with_secret(b"integration-secret".to_vec()),
        ExecutionConstraints::default(),
        Arc::new(schema),
        executor.clone(),
        NullAuditSink,
    );

    let err = orchestrator
        .run(&request(PaginationMode::Offset), &sqlite())
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::ValidationFailed { .. }));
    assert!(executor.calls().is_empty());
}

#[tokio::test]
async fn cursor_from_other_query_is_rejected() {
    let executor = Arc::new(ScriptedExecutor::default());
    executor.push_page(
        &["id", "status"],
        vec![
            vec![json!(1), json!("a")],
            vec![json!(2), json!("b")],
            vec![json!(3), json!("c")],
        ],
    );
    let orchestrator = orchestrator(executor.clone());
    let caps = sqlite();

    let first = orchestrator
        .run(&request(PaginationMode::Offset), &caps)
        .await
        .unwrap();
    let cursor = first.next_cursor.unwrap();

    // Same cursor, different query text: strict replay binding trips
    // before the fingerprint comparison even runs.
    let err = orchestrator
        .run(
            &QueryRequest {
                sql: "SELECT id FROM orders ORDER BY id".to_string(),
                cursor: Some(cursor),
                ..request(PaginationMode::Offset)
            },
            &caps,
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        OrchestratorError::Cursor(quarry_cursor::CursorError::QueryMismatch)
    ));
}

#[tokio::test]
async fn keyset_without_stable_tiebreaker_is_refused() {
    let executor = Arc::new(ScriptedExecutor::default());
    let orchestrator = orchestrator(executor.clone());

    let err = orchestrator
        .run(
            &QueryRequest {
                sql: "SELECT id, status FROM orders ORDER BY status".to_string(),
                ..request(PaginationMode::Keyset)
            },
            &sqlite(),
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        OrchestratorError::Cursor(quarry_cursor::CursorError::UnstableTiebreaker)
    ));
    assert!(executor.calls().is_empty());
}

#[tokio::test]
async fn pre_existing_limit_clause_is_refused() {
    let executor = Arc::new(ScriptedExecutor::default());
    let orchestrator = orchestrator(executor.clone());

    let err = orchestrator
        .run(
            &QueryRequest {
                sql: "SELECT id FROM orders ORDER BY id LIMIT 5".to_string(),
                ..request(PaginationMode::Offset)
            },
            &sqlite(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::LimitClausePresent));
}
