//! Retry and backoff policy.
//!
//! This module encapsulates error classification (timeouts, throttling,
//! connection failures), retry budgets, and jittered exponential backoff so
//! that every retried call (session creation, offset queries, chunk commits)
//! shares one consistent loop.

mod backoff;
mod classify;
mod policy;
mod run;

pub use backoff::{BackoffPolicy, ExponentialBackoffPolicy};
pub use classify::{classify_http_status, classify_io_error};
pub use policy::{
    CompositeRetryPolicy, LimitedAttemptsRetryPolicy, LimitedTimeRetryPolicy, RetryPolicy,
};
pub use run::{run_with_retry, Retrier};
