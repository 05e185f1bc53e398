//! # quarry-tenancy
//!
//! Tenant-isolation enforcement for Quarry.
//!
//! The policy engine decides whether and how a query gets tenant-scoped,
//! using the shape classifier to gate rewriting and the tenancy
//! configuration to build predicates:
//!
//! **Before (from agent):**
//! ```sql
//! SELECT * FROM orders WHERE status = 'pending'
//! ```
//!
//! **After (to the backend), with the tenant id bound as a parameter:**
//! ```sql
//! SELECT * FROM orders WHERE (status = 'pending') AND orders.tenant_id = $1
//! ```
//!
//! Every evaluation produces a [`TenantEnforcementResult`] with a bounded
//! outcome; rejections carry a stable public reason code and never leak
//! internals.

pub mod outcome;
pub mod policy;
pub mod rewrite;

pub use outcome::{
    EnforcementOutcome, RejectReason, TenantEnforcementResult, bounded_reason_code,
};
pub use policy::{EnforcementDecision, TenantEnforcementPolicy};
pub use rewrite::PlaceholderStyle;
