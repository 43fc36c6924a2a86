//! Lifecycle events and event delivery.
//!
//! Every transition the scheduler makes is published as an [`Event`] to a
//! single registered [`EventListener`]. Listener failures, including panics,
//! are caught and logged so they can never disturb scheduling.

mod logging;

pub use logging::LoggingListener;

use chrono::{DateTime, Utc};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, RwLock};
use thiserror::Error;

use crate::core::types::{JobId, RunId};
use crate::scheduler::JobSnapshot;

/// Kind of lifecycle event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    EngineStarted,
    EngineStopped,
    JobAdded,
    JobRemoved,
    JobModified,
    ExecutionStarted,
    ExecutionSucceeded,
    ExecutionFailed,
    ExecutionMissed,
    ExecutionPaused,
    ExecutionResumed,
    /// A firing was dropped because the previous one is still running.
    ExecutionSkipped,
    RetrySucceeded,
    RetryFailed,
    /// A task's cron expression was rejected during reload.
    InvalidCron,
    /// A reload finished; the event carries a snapshot of every job.
    ReloadCompleted,
    /// A code with no known meaning.
    Unrecognized(u32),
}

impl EventKind {
    const KNOWN: [EventKind; 16] = [
        EventKind::EngineStarted,
        EventKind::EngineStopped,
        EventKind::JobAdded,
        EventKind::JobRemoved,
        EventKind::JobModified,
        EventKind::ExecutionStarted,
        EventKind::ExecutionSucceeded,
        EventKind::ExecutionFailed,
        EventKind::ExecutionMissed,
        EventKind::ExecutionPaused,
        EventKind::ExecutionResumed,
        EventKind::ExecutionSkipped,
        EventKind::RetrySucceeded,
        EventKind::RetryFailed,
        EventKind::InvalidCron,
        EventKind::ReloadCompleted,
    ];

    /// Stable numeric code of this kind.
    pub fn code(self) -> u32 {
        match self {
            EventKind::EngineStarted => 1,
            EventKind::EngineStopped => 2,
            EventKind::JobAdded => 3,
            EventKind::JobRemoved => 4,
            EventKind::JobModified => 5,
            EventKind::ExecutionStarted => 6,
            EventKind::ExecutionSucceeded => 7,
            EventKind::ExecutionFailed => 8,
            EventKind::ExecutionMissed => 9,
            EventKind::ExecutionPaused => 10,
            EventKind::ExecutionResumed => 11,
            EventKind::ExecutionSkipped => 12,
            EventKind::RetrySucceeded => 13,
            EventKind::RetryFailed => 14,
            EventKind::InvalidCron => 15,
            EventKind::ReloadCompleted => 16,
            EventKind::Unrecognized(code) => code,
        }
    }

    /// Map a numeric code back to a kind.
    ///
    /// Unknown codes are kept as [`EventKind::Unrecognized`] rather than dropped.
    pub fn from_code(code: u32) -> Self {
        Self::KNOWN
            .into_iter()
            .find(|kind| kind.code() == code)
            .unwrap_or(EventKind::Unrecognized(code))
    }

    /// Whether the event signals something an operator should look at.
    pub fn is_warning(self) -> bool {
        matches!(
            self,
            EventKind::ExecutionFailed
                | EventKind::ExecutionMissed
                | EventKind::ExecutionSkipped
                | EventKind::RetryFailed
                | EventKind::InvalidCron
                | EventKind::Unrecognized(_)
        )
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            EventKind::EngineStarted => "scheduler started",
            EventKind::EngineStopped => "scheduler stopped",
            EventKind::JobAdded => "job added",
            EventKind::JobRemoved => "job removed",
            EventKind::JobModified => "job modified",
            EventKind::ExecutionStarted => "job executing",
            EventKind::ExecutionSucceeded => "job executed successfully",
            EventKind::ExecutionFailed => "job execution failed",
            EventKind::ExecutionMissed => "job execution missed",
            EventKind::ExecutionPaused => "job execution paused",
            EventKind::ExecutionResumed => "job execution resumed",
            EventKind::ExecutionSkipped => "job execution skipped",
            EventKind::RetrySucceeded => "job retry succeeded",
            EventKind::RetryFailed => "job retry failed",
            EventKind::InvalidCron => "invalid cron expression",
            EventKind::ReloadCompleted => "jobs reloaded",
            EventKind::Unrecognized(code) => return write!(f, "unrecognized event ({code})"),
        };
        f.write_str(label)
    }
}

/// A lifecycle event.
#[derive(Debug, Clone)]
pub struct Event {
    pub kind: EventKind,
    pub job_id: Option<JobId>,
    pub job_name: Option<String>,
    /// The firing this event belongs to.
    pub run_id: Option<RunId>,
    /// The fire instant the event refers to.
    pub scheduled_at: Option<DateTime<Utc>>,
    /// Retry number (1-indexed) for retry events.
    pub attempt: Option<u32>,
    pub error: Option<String>,
    /// Job table snapshot, set on [`EventKind::ReloadCompleted`].
    pub jobs: Vec<JobSnapshot>,
    pub timestamp: DateTime<Utc>,
}

impl Event {
    /// Create a bare event of the given kind.
    pub fn new(kind: EventKind) -> Self {
        Self {
            kind,
            job_id: None,
            job_name: None,
            run_id: None,
            scheduled_at: None,
            attempt: None,
            error: None,
            jobs: Vec::new(),
            timestamp: Utc::now(),
        }
    }

    fn for_job(kind: EventKind, job_id: &JobId, job_name: &str) -> Self {
        Self {
            job_id: Some(job_id.clone()),
            job_name: Some(job_name.to_string()),
            ..Self::new(kind)
        }
    }

    pub fn engine_started() -> Self {
        Self::new(EventKind::EngineStarted)
    }

    pub fn engine_stopped() -> Self {
        Self::new(EventKind::EngineStopped)
    }

    /// Engine-wide pause.
    pub fn engine_paused() -> Self {
        Self::new(EventKind::ExecutionPaused)
    }

    /// Engine-wide resume.
    pub fn engine_resumed() -> Self {
        Self::new(EventKind::ExecutionResumed)
    }

    pub fn job_added(job_id: &JobId, job_name: &str) -> Self {
        Self::for_job(EventKind::JobAdded, job_id, job_name)
    }

    pub fn job_removed(job_id: &JobId, job_name: &str) -> Self {
        Self::for_job(EventKind::JobRemoved, job_id, job_name)
    }

    pub fn job_modified(job_id: &JobId, job_name: &str) -> Self {
        Self::for_job(EventKind::JobModified, job_id, job_name)
    }

    pub fn job_paused(job_id: &JobId, job_name: &str) -> Self {
        Self::for_job(EventKind::ExecutionPaused, job_id, job_name)
    }

    pub fn job_resumed(job_id: &JobId, job_name: &str) -> Self {
        Self::for_job(EventKind::ExecutionResumed, job_id, job_name)
    }

    pub fn execution_started(
        job_id: &JobId,
        job_name: &str,
        run_id: &RunId,
        scheduled_at: DateTime<Utc>,
    ) -> Self {
        Self {
            run_id: Some(run_id.clone()),
            scheduled_at: Some(scheduled_at),
            ..Self::for_job(EventKind::ExecutionStarted, job_id, job_name)
        }
    }

    pub fn execution_succeeded(job_id: &JobId, job_name: &str, run_id: &RunId) -> Self {
        Self {
            run_id: Some(run_id.clone()),
            ..Self::for_job(EventKind::ExecutionSucceeded, job_id, job_name)
        }
    }

    pub fn execution_failed(
        job_id: &JobId,
        job_name: &str,
        run_id: &RunId,
        error: impl Into<String>,
    ) -> Self {
        Self {
            run_id: Some(run_id.clone()),
            error: Some(error.into()),
            ..Self::for_job(EventKind::ExecutionFailed, job_id, job_name)
        }
    }

    pub fn execution_missed(job_id: &JobId, job_name: &str, scheduled_at: DateTime<Utc>) -> Self {
        Self {
            scheduled_at: Some(scheduled_at),
            ..Self::for_job(EventKind::ExecutionMissed, job_id, job_name)
        }
    }

    pub fn execution_skipped(job_id: &JobId, job_name: &str, scheduled_at: DateTime<Utc>) -> Self {
        Self {
            scheduled_at: Some(scheduled_at),
            ..Self::for_job(EventKind::ExecutionSkipped, job_id, job_name)
        }
    }

    pub fn retry_succeeded(job_id: &JobId, job_name: &str, run_id: &RunId, attempt: u32) -> Self {
        Self {
            run_id: Some(run_id.clone()),
            attempt: Some(attempt),
            ..Self::for_job(EventKind::RetrySucceeded, job_id, job_name)
        }
    }

    pub fn retry_failed(
        job_id: &JobId,
        job_name: &str,
        run_id: &RunId,
        attempt: u32,
        error: impl Into<String>,
    ) -> Self {
        Self {
            run_id: Some(run_id.clone()),
            attempt: Some(attempt),
            error: Some(error.into()),
            ..Self::for_job(EventKind::RetryFailed, job_id, job_name)
        }
    }

    pub fn invalid_cron(job_id: &JobId, job_name: &str, error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::for_job(EventKind::InvalidCron, job_id, job_name)
        }
    }

    pub fn reload_completed(jobs: Vec<JobSnapshot>) -> Self {
        Self {
            jobs,
            ..Self::new(EventKind::ReloadCompleted)
        }
    }
}

/// Error returned by a listener that failed to handle an event.
#[derive(Debug, Error)]
#[error("listener fault: {0}")]
pub struct ListenerError(pub String);

/// Receiver of lifecycle events.
///
/// Called synchronously from the scheduler; implementations should return
/// quickly and must not call back into the scheduler.
pub trait EventListener: Send + Sync {
    /// Handle an event.
    fn on_event(&self, event: &Event) -> Result<(), ListenerError>;
}

/// Delivers events to the registered listener.
pub struct EventNotifier {
    listener: RwLock<Option<Arc<dyn EventListener>>>,
}

impl EventNotifier {
    /// Create a notifier with no listener.
    pub fn new() -> Self {
        Self {
            listener: RwLock::new(None),
        }
    }

    /// Register the listener, replacing any previous one.
    pub fn set_listener(&self, listener: Arc<dyn EventListener>) {
        let mut slot = self
            .listener
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *slot = Some(listener);
    }

    /// Remove the listener.
    pub fn clear_listener(&self) {
        let mut slot = self
            .listener
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *slot = None;
    }

    /// Check whether a listener is registered.
    pub fn has_listener(&self) -> bool {
        self.current().is_some()
    }

    fn current(&self) -> Option<Arc<dyn EventListener>> {
        self.listener
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Deliver an event to the listener.
    ///
    /// Errors and panics raised by the listener are logged and swallowed.
    pub fn notify(&self, event: Event) {
        let Some(listener) = self.current() else {
            return;
        };

        match panic::catch_unwind(AssertUnwindSafe(|| listener.on_event(&event))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::warn!(kind = %event.kind, job_id = ?event.job_id, error = %e, "Event listener failed");
            }
            Err(_) => {
                tracing::error!(kind = %event.kind, job_id = ?event.job_id, "Event listener panicked");
            }
        }
    }
}

impl Default for EventNotifier {
    fn default() -> Self {
        Self::new()
    }
}
