//! Common reconciliation abstractions for cloud network services.
//!
//! This crate provides the pieces every reconciler builds on:
//!
//! - [`Backoff`]: exponential backoff policy with jitter and a cap
//! - [`wait_for_with_retryable`] / [`retry_with_backoff`]: retry loops that
//!   keep going only while the provider error code is in an allow-list
//! - [`ErrorCode`]: access to the provider error code of an error
//! - [`NetworkScope`]: state accessor and patch-back contract for a cluster
//! - [`Conditions`]: readiness conditions reported on the cluster object
//!
//! # Architecture
//!
//! A reconcile pass is one sequential task:
//!
//! 1. The service reads the desired network from the scope
//! 2. Provider calls are awaited one after another
//! 3. Eventual-consistency failures are absorbed by the retry loop
//! 4. Observed state is written back to the scope and patched

mod backoff;
mod conditions;
mod scope;

pub use backoff::{retry_with_backoff, wait_for_with_retryable, Backoff, ErrorCode, WaitTimeout};
pub use conditions::{Condition, ConditionType, Conditions, Severity};
pub use scope::{NetworkScope, ScopeError};
