//! # quarry-runtime
//!
//! The execution orchestrator for Quarry. Per request it composes:
//!
//! 1. tenant-enforcement evaluation (classification + rewrite),
//! 2. independent security validation of the SQL that will execute,
//! 3. continuation-cursor decode (offset or keyset, verified against the
//!    recomputed fingerprints),
//! 4. delegated execution through a caller-supplied [`QueryExecutor`],
//!    over-fetching one row to answer `has_more` truthfully,
//! 5. next-cursor issuance from the last row's ordering-key values.
//!
//! The engine executes nothing itself and keeps no state between requests.

pub mod audit;
pub mod continuation;
pub mod executor;
pub mod orchestrator;

pub use audit::{AuditEvent, AuditSink, NullAuditSink, TracingAuditSink};
pub use executor::{QueryExecutor, QueryPage};
pub use orchestrator::{
    ExecutionConstraints, OrchestratorError, PaginationMode, QueryOrchestrator, QueryRequest,
    QueryResponse,
};
