//! Exponential backoff with jitter.

use rand::Rng;
use std::time::Duration;

/// Computes how long to wait before the next attempt.
///
/// `attempt` is 1-based: the delay after the first failed attempt is
/// `next_delay(1)`.
pub trait BackoffPolicy: Send + Sync + std::fmt::Debug {
    fn next_delay(&self, attempt: u32) -> Duration;
}

/// Exponential backoff with caps and randomized jitter.
///
/// The bound for attempt `n` is `initial * scaling^(n-1)`, capped at `max`.
/// The returned delay is drawn uniformly from `[bound * (1 - jitter), bound]`,
/// so clients that fail together do not retry together.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExponentialBackoffPolicy {
    initial_delay: Duration,
    max_delay: Duration,
    scaling: f64,
    jitter: f64,
}

impl Default for ExponentialBackoffPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(300), 2.0)
    }
}

impl ExponentialBackoffPolicy {
    /// `scaling` below 1.0 (or NaN) is treated as 1.0; `max` below `initial`
    /// is raised to `initial`.
    pub fn new(initial_delay: Duration, max_delay: Duration, scaling: f64) -> Self {
        let scaling = if scaling.is_nan() || scaling < 1.0 { 1.0 } else { scaling };
        Self {
            initial_delay,
            max_delay: max_delay.max(initial_delay),
            scaling,
            jitter: 0.5,
        }
    }

    /// Fraction of the bound that may be shaved off at random, clamped to [0, 1].
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = if jitter.is_nan() { 0.0 } else { jitter.clamp(0.0, 1.0) };
        self
    }

    pub fn initial_delay(&self) -> Duration {
        self.initial_delay
    }

    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    /// Upper bound of the delay for `attempt`, before jitter.
    pub fn bound(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(64) as i32;
        let raw = self.initial_delay.as_secs_f64() * self.scaling.powi(exp);
        let max = self.max_delay.as_secs_f64();
        if !raw.is_finite() || raw >= max {
            return self.max_delay;
        }
        Duration::from_secs_f64(raw)
    }
}

impl BackoffPolicy for ExponentialBackoffPolicy {
    fn next_delay(&self, attempt: u32) -> Duration {
        let bound = self.bound(attempt).as_secs_f64();
        let low = bound * (1.0 - self.jitter);
        if self.jitter == 0.0 || bound == 0.0 {
            return Duration::from_secs_f64(bound);
        }
        let secs = rand::thread_rng().gen_range(low..=bound);
        Duration::from_secs_f64(secs)
    }
}
