//! Common test utilities shared across integration tests.

use chrono::{DateTime, TimeZone, Utc};
use crontide::testing::RecordingListener;
use crontide::{Scheduler, SchedulerConfig, TaskDefinition, TaskRunner};
use std::sync::Arc;
use std::time::Duration;

/// Generous upper bound for waiting on real-time events.
pub const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

/// A task that fires every second.
pub fn every_second(id: i64, name: &str) -> TaskDefinition {
    TaskDefinition::new(id, name, "* * * * * *")
}

/// Configuration with a short tick and shutdown timeout for fast tests.
pub fn fast_config() -> SchedulerConfig {
    SchedulerConfig::default()
        .with_tick_interval(Duration::from_millis(50))
        .with_shutdown_timeout(Duration::from_secs(5))
}

/// A fixed instant far ahead of the wall clock.
///
/// Jobs scheduled relative to it are never fired by the live loop, so tests
/// can drive dispatch deterministically with `run_pending_at`.
pub fn far_future() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2099, 6, 1, 0, 0, 0).unwrap()
}

/// Create a scheduler wired to a recording listener.
pub fn scheduler_with(
    runner: Arc<dyn TaskRunner>,
    config: SchedulerConfig,
) -> (Scheduler, Arc<RecordingListener>) {
    let listener = RecordingListener::new();
    let scheduler = Scheduler::with_config(runner, config).with_listener(listener.clone());
    (scheduler, listener)
}
