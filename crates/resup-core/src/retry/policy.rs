//! Retry policies: decide, per failure, whether another attempt is allowed.
//!
//! Policies are stateful and single-use. Each retried call gets its own
//! instance (see [`RetryPolicy::fresh`]); the executor refuses to start with
//! an instance that is already exhausted.

use crate::status::{ErrorKind, Status};
use std::fmt;
use std::time::{Duration, Instant};

pub trait RetryPolicy: Send + fmt::Debug {
    /// Record a failed attempt. Returns true if another attempt is permitted.
    ///
    /// Non-transient errors always return false and do not consume budget.
    fn on_failure(&mut self, status: &Status) -> bool;

    /// True once the policy will not permit any further attempt.
    fn is_exhausted(&self) -> bool;

    /// Errors that must never be retried regardless of remaining budget.
    fn is_permanent_failure(&self, status: &Status) -> bool {
        status.kind() != ErrorKind::Transient
    }

    /// A new instance with the same limits and no recorded failures.
    fn fresh(&self) -> Box<dyn RetryPolicy>;
}

/// Gives up after `max_attempts` attempts in total (including the first).
#[derive(Debug, Clone)]
pub struct LimitedAttemptsRetryPolicy {
    max_attempts: u32,
    failures: u32,
}

impl LimitedAttemptsRetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            failures: 0,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}

impl RetryPolicy for LimitedAttemptsRetryPolicy {
    fn on_failure(&mut self, status: &Status) -> bool {
        if self.is_permanent_failure(status) {
            return false;
        }
        self.failures = self.failures.saturating_add(1);
        !self.is_exhausted()
    }

    fn is_exhausted(&self) -> bool {
        self.failures >= self.max_attempts
    }

    fn fresh(&self) -> Box<dyn RetryPolicy> {
        Box::new(Self::new(self.max_attempts))
    }
}

/// Gives up once `max_duration` has elapsed since the policy was created.
#[derive(Debug, Clone)]
pub struct LimitedTimeRetryPolicy {
    max_duration: Duration,
    deadline: Option<Instant>,
}

impl LimitedTimeRetryPolicy {
    pub fn new(max_duration: Duration) -> Self {
        Self {
            max_duration,
            deadline: Instant::now().checked_add(max_duration),
        }
    }

    pub fn max_duration(&self) -> Duration {
        self.max_duration
    }
}

impl RetryPolicy for LimitedTimeRetryPolicy {
    fn on_failure(&mut self, status: &Status) -> bool {
        if self.is_permanent_failure(status) {
            return false;
        }
        !self.is_exhausted()
    }

    fn is_exhausted(&self) -> bool {
        // No representable deadline means effectively unbounded.
        match self.deadline {
            Some(deadline) => Instant::now() >= deadline,
            None => false,
        }
    }

    fn fresh(&self) -> Box<dyn RetryPolicy> {
        Box::new(Self::new(self.max_duration))
    }
}

/// Ends the retry loop as soon as any member policy ends it.
#[derive(Debug)]
pub struct CompositeRetryPolicy {
    policies: Vec<Box<dyn RetryPolicy>>,
}

impl CompositeRetryPolicy {
    pub fn new(policies: Vec<Box<dyn RetryPolicy>>) -> Self {
        Self { policies }
    }

    /// Attempt-count and duration limits combined.
    pub fn attempts_or_duration(max_attempts: u32, max_duration: Duration) -> Self {
        Self::new(vec![
            Box::new(LimitedAttemptsRetryPolicy::new(max_attempts)),
            Box::new(LimitedTimeRetryPolicy::new(max_duration)),
        ])
    }
}

impl RetryPolicy for CompositeRetryPolicy {
    fn on_failure(&mut self, status: &Status) -> bool {
        if self.is_permanent_failure(status) {
            return false;
        }
        // Every member records the failure, even after one has said no.
        let mut permitted = true;
        for p in &mut self.policies {
            permitted &= p.on_failure(status);
        }
        permitted
    }

    fn is_exhausted(&self) -> bool {
        self.policies.iter().any(|p| p.is_exhausted())
    }

    fn is_permanent_failure(&self, status: &Status) -> bool {
        status.kind() != ErrorKind::Transient
            || self.policies.iter().any(|p| p.is_permanent_failure(status))
    }

    fn fresh(&self) -> Box<dyn RetryPolicy> {
        Box::new(Self::new(self.policies.iter().map(|p| p.fresh()).collect()))
    }
}
