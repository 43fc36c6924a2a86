//! Scheduler engine for cron jobs.
//!
//! This module provides the job table, the reload protocol and the main
//! scheduling loop that fires jobs at their cron instants.

mod engine;
mod job;
mod types;

pub use engine::Scheduler;
pub use job::{JobSnapshot, ReloadSummary};
pub use types::{
    DEFAULT_MISFIRE_GRACE, DEFAULT_SHUTDOWN_TIMEOUT, DEFAULT_TICK_INTERVAL, MIN_TICK_INTERVAL,
    SchedulerConfig, SchedulerError, SchedulerState, parse_timezone,
};
