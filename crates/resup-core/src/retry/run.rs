//! Retry loop: run a closure until success or the policy says stop.

use super::backoff::BackoffPolicy;
use super::policy::RetryPolicy;
use crate::control::CancelToken;
use crate::status::{Result, RetryExit, Status};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Longest uninterrupted sleep between cancel-token checks during backoff.
const CANCEL_POLL: Duration = Duration::from_millis(50);

/// Runs `attempt` until it succeeds, fails with a non-transient error, the
/// policy runs out, or `cancel` is set. On retryable failure, sleeps for the
/// backoff duration then tries again.
///
/// Errors are annotated with a [`RetryExit`] so callers can tell "too many
/// failures" apart from "permanent failure".
pub fn run_with_retry<T, F>(
    policy: &mut dyn RetryPolicy,
    backoff: &dyn BackoffPolicy,
    cancel: Option<&CancelToken>,
    operation: &str,
    mut attempt: F,
) -> Result<T>
where
    F: FnMut() -> Result<T>,
{
    if policy.is_exhausted() {
        return Err(Status::invalid_state(format!(
            "retry policy for {operation} is already exhausted"
        )));
    }

    let mut attempts = 0u32;
    loop {
        if is_cancelled(cancel) {
            tracing::debug!(operation, attempts, "cancelled before next attempt");
            return Err(Status::cancelled("cancel requested")
                .with_retry_exit(RetryExit::Cancelled { attempts }, operation));
        }
        attempts += 1;

        let status = match attempt() {
            Ok(v) => return Ok(v),
            Err(e) => e,
        };

        if policy.is_permanent_failure(&status) {
            tracing::warn!(operation, attempts, code = %status.code(), "giving up: {}", status.message());
            return Err(status.with_retry_exit(RetryExit::PermanentFailure { attempts }, operation));
        }
        if !policy.on_failure(&status) {
            tracing::warn!(operation, attempts, code = %status.code(), "retry budget exhausted: {}", status.message());
            return Err(status.with_retry_exit(RetryExit::TooManyFailures { attempts }, operation));
        }

        let delay = backoff.next_delay(attempts);
        tracing::debug!(
            operation,
            attempt = attempts,
            delay_ms = delay.as_millis() as u64,
            code = %status.code(),
            "transient failure, retrying"
        );
        sleep_unless_cancelled(delay, cancel);
    }
}

fn is_cancelled(cancel: Option<&CancelToken>) -> bool {
    matches!(cancel, Some(c) if c.is_cancelled())
}

fn sleep_unless_cancelled(delay: Duration, cancel: Option<&CancelToken>) {
    let Some(token) = cancel else {
        std::thread::sleep(delay);
        return;
    };
    let end = Instant::now() + delay;
    loop {
        if token.is_cancelled() {
            return;
        }
        let now = Instant::now();
        if now >= end {
            return;
        }
        std::thread::sleep((end - now).min(CANCEL_POLL));
    }
}

/// A retry policy prototype, a backoff policy and an optional cancel token.
///
/// Each [`Retrier::run`] call gets a fresh policy, so a long upload made of
/// many chunks does not exhaust its budget just by being long.
#[derive(Debug)]
pub struct Retrier {
    policy: Box<dyn RetryPolicy>,
    backoff: Arc<dyn BackoffPolicy>,
    cancel: Option<CancelToken>,
}

impl Retrier {
    pub fn new<P, B>(policy: P, backoff: B) -> Self
    where
        P: RetryPolicy + 'static,
        B: BackoffPolicy + 'static,
    {
        Self {
            policy: Box::new(policy),
            backoff: Arc::new(backoff),
            cancel: None,
        }
    }

    pub fn from_parts(policy: Box<dyn RetryPolicy>, backoff: Arc<dyn BackoffPolicy>) -> Self {
        Self {
            policy,
            backoff,
            cancel: None,
        }
    }

    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn cancel_token(&self) -> Option<&CancelToken> {
        self.cancel.as_ref()
    }

    /// Run one retried call of `operation` with a fresh policy instance.
    pub fn run<T, F>(&self, operation: &str, attempt: F) -> Result<T>
    where
        F: FnMut() -> Result<T>,
    {
        let mut policy = self.policy.fresh();
        run_with_retry(
            policy.as_mut(),
            self.backoff.as_ref(),
            self.cancel.as_ref(),
            operation,
            attempt,
        )
    }
}

impl Clone for Retrier {
    fn clone(&self) -> Self {
        Self {
            policy: self.policy.fresh(),
            backoff: Arc::clone(&self.backoff),
            cancel: self.cancel.clone(),
        }
    }
}
