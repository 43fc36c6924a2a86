//! Retry policy for failed executions.
//!
//! A failed execution is retried a bounded number of times with a fixed delay
//! between attempts, then reported as failed.

use std::time::Duration;

/// Retry policy applied when an execution callback reports failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries allowed after the first failed attempt. Zero disables retrying;
    /// the default of one gives each firing two attempts in total.
    pub max_attempts: u32,

    /// Pause between a failure and the next attempt.
    pub delay: Duration,
}

impl RetryPolicy {
    /// Report the first failure as final.
    pub fn none() -> Self {
        Self {
            max_attempts: 0,
            delay: Duration::ZERO,
        }
    }

    /// One immediate retry.
    pub fn once() -> Self {
        Self::fixed(1, Duration::ZERO)
    }

    /// Up to `max_attempts` retries, each preceded by `delay`.
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }

    /// Whether a failure is ever retried.
    pub fn is_enabled(&self) -> bool {
        self.max_attempts > 0
    }

    /// Whether another retry may follow `retries` completed ones.
    pub fn should_retry(&self, retries: u32) -> bool {
        retries < self.max_attempts
    }

    pub fn get_delay(&self) -> Duration {
        self.delay
    }

    /// Attempts per firing, counting the first.
    pub fn total_attempts(&self) -> u32 {
        self.max_attempts.saturating_add(1)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::once()
    }
}
