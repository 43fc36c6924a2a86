//! Scheduler type definitions.
//!
//! This module contains the error type, state enum and configuration for the scheduler.

use chrono_tz::Tz;
use std::time::Duration;
use thiserror::Error;

use crate::core::cron::CronError;
use crate::core::retry::RetryPolicy;
use crate::core::types::TaskId;

/// Default tolerance for late firings.
pub const DEFAULT_MISFIRE_GRACE: Duration = Duration::from_secs(30);

/// Default upper bound on how long the loop sleeps between evaluations.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Shortest tick the loop accepts; smaller intervals are raised to it.
pub const MIN_TICK_INTERVAL: Duration = Duration::from_millis(10);

/// Default time `stop` waits for in-flight executions.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors that can occur in the scheduler.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SchedulerError {
    /// A task's cron expression could not be parsed.
    #[error("invalid cron expression '{expression}' for task '{task_name}' ({task_id}): {source}")]
    InvalidCronExpression {
        task_id: TaskId,
        task_name: String,
        expression: String,
        #[source]
        source: CronError,
    },

    /// Timezone name is not in the tz database.
    #[error("invalid timezone: {0}")]
    InvalidTimezone(String),

    /// Job not found.
    #[error("job not found: {0}")]
    JobNotFound(String),
}

/// State of the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// Scheduler is stopped.
    Stopped,
    /// Scheduler is running.
    Running,
    /// Scheduler is paused.
    Paused,
}

/// Scheduler configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerConfig {
    /// Timezone in which cron fields are evaluated.
    pub timezone: Tz,
    /// How late a firing may be dispatched before it is reported as missed.
    pub misfire_grace: Duration,
    /// Retry policy for failed executions.
    pub retry: RetryPolicy,
    /// Maximum sleep between loop evaluations.
    pub tick_interval: Duration,
    /// Time `stop` waits for in-flight executions.
    pub shutdown_timeout: Duration,
}

impl SchedulerConfig {
    /// Set the timezone.
    pub fn with_timezone(mut self, timezone: Tz) -> Self {
        self.timezone = timezone;
        self
    }

    /// Set the timezone from an IANA name such as `Asia/Shanghai`.
    pub fn with_timezone_name(self, name: &str) -> Result<Self, SchedulerError> {
        Ok(self.with_timezone(parse_timezone(name)?))
    }

    /// Set the misfire grace period.
    pub fn with_misfire_grace(mut self, grace: Duration) -> Self {
        self.misfire_grace = grace;
        self
    }

    /// Set the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Set the tick interval, no shorter than [`MIN_TICK_INTERVAL`].
    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval.max(MIN_TICK_INTERVAL);
        self
    }

    /// Set the graceful shutdown timeout.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            timezone: Tz::UTC,
            misfire_grace: DEFAULT_MISFIRE_GRACE,
            retry: RetryPolicy::default(),
            tick_interval: DEFAULT_TICK_INTERVAL,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }
}

/// Parse an IANA timezone name.
pub fn parse_timezone(name: &str) -> Result<Tz, SchedulerError> {
    name.trim()
        .parse::<Tz>()
        .map_err(|_| SchedulerError::InvalidTimezone(name.to_string()))
}
