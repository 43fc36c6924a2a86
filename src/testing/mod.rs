//! Testing utilities for users of the crontide library.
//!
//! This module provides helpers for testing scheduling behaviour:
//!
//! - [`RecordingListener`]: An event listener that records every event
//! - [`ScriptedRunner`]: A runner that fails N times then succeeds
//! - [`SlowRunner`]: A runner that takes a fixed time to complete

use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;

use crate::core::task::{ExecutionError, TaskRunner};
use crate::core::types::{JobId, TaskId};
use crate::events::{Event, EventKind, EventListener, ListenerError};

/// Poll interval used by [`RecordingListener::wait_for`].
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// An event listener that keeps every event it receives.
///
/// # Example
///
/// ```
/// use crontide::testing::RecordingListener;
/// use crontide::{Event, EventKind, EventListener};
///
/// let listener = RecordingListener::new();
/// listener.on_event(&Event::engine_started()).unwrap();
///
/// assert_eq!(listener.kinds(), vec![EventKind::EngineStarted]);
/// ```
#[derive(Default)]
pub struct RecordingListener {
    events: std::sync::Mutex<Vec<Event>>,
}

impl RecordingListener {
    /// Create a new shared listener.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// All events received so far.
    pub fn events(&self) -> Vec<Event> {
        self.lock().clone()
    }

    /// Kinds of all events received so far, in order.
    pub fn kinds(&self) -> Vec<EventKind> {
        self.lock().iter().map(|event| event.kind).collect()
    }

    /// Kinds of events concerning one job, in order.
    pub fn kinds_for(&self, job_id: &JobId) -> Vec<EventKind> {
        self.lock()
            .iter()
            .filter(|event| event.job_id.as_ref() == Some(job_id))
            .map(|event| event.kind)
            .collect()
    }

    /// Number of events of a kind.
    pub fn count(&self, kind: EventKind) -> usize {
        self.lock().iter().filter(|event| event.kind == kind).count()
    }

    /// Forget all recorded events.
    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Wait until at least `count` events of `kind` have been received.
    ///
    /// Returns `false` if the timeout elapsed first.
    pub async fn wait_for(&self, kind: EventKind, count: usize, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.count(kind) >= count {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(WAIT_POLL_INTERVAL).await;
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Event>> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl EventListener for RecordingListener {
    fn on_event(&self, event: &Event) -> Result<(), ListenerError> {
        self.lock().push(event.clone());
        Ok(())
    }
}

/// A runner that fails a fixed number of times, then succeeds.
///
/// # Example
///
/// ```
/// use crontide::testing::ScriptedRunner;
///
/// // Fails once, then succeeds on the retry
/// let runner = ScriptedRunner::new(1);
/// ```
pub struct ScriptedRunner {
    /// Mutex protecting the script to keep check-and-decrement atomic.
    state: Mutex<ScriptState>,
    error_message: String,
}

struct ScriptState {
    failures_remaining: u32,
    calls: Vec<(TaskId, String)>,
}

impl ScriptedRunner {
    /// Create a runner that fails `fail_count` times then succeeds.
    pub fn new(fail_count: u32) -> Self {
        Self {
            state: Mutex::new(ScriptState {
                failures_remaining: fail_count,
                calls: Vec::new(),
            }),
            error_message: "intentional test failure".to_string(),
        }
    }

    /// A runner that always succeeds.
    pub fn succeeding() -> Self {
        Self::new(0)
    }

    /// A runner that always fails.
    pub fn failing() -> Self {
        Self::new(u32::MAX)
    }

    /// Set the failure message.
    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.error_message = message.into();
        self
    }

    /// Number of times the runner has been invoked.
    pub async fn call_count(&self) -> usize {
        self.state.lock().await.calls.len()
    }

    /// Every invocation as `(task id, task name)`, in order.
    pub async fn calls(&self) -> Vec<(TaskId, String)> {
        self.state.lock().await.calls.clone()
    }
}

#[async_trait]
impl TaskRunner for ScriptedRunner {
    async fn execute(&self, task_id: TaskId, task_name: &str) -> Result<(), ExecutionError> {
        let mut state = self.state.lock().await;
        state.calls.push((task_id, task_name.to_string()));

        if state.failures_remaining > 0 {
            state.failures_remaining -= 1;
            Err(ExecutionError::ExecutionFailed(self.error_message.clone()))
        } else {
            Ok(())
        }
    }
}

/// A runner that sleeps before succeeding.
pub struct SlowRunner {
    delay: Duration,
    started: AtomicU32,
    completed: AtomicU32,
}

impl SlowRunner {
    /// Create a runner that takes `delay` per invocation.
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            started: AtomicU32::new(0),
            completed: AtomicU32::new(0),
        }
    }

    /// Number of invocations started.
    pub fn started(&self) -> u32 {
        self.started.load(Ordering::SeqCst)
    }

    /// Number of invocations that ran to completion.
    pub fn completed(&self) -> u32 {
        self.completed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TaskRunner for SlowRunner {
    async fn execute(&self, _task_id: TaskId, _task_name: &str) -> Result<(), ExecutionError> {
        self.started.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.completed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_runner_fails_then_succeeds() {
        let runner = ScriptedRunner::new(2).with_error("boom");

        assert!(matches!(
            runner.execute(TaskId::new(1), "a").await,
            Err(ExecutionError::ExecutionFailed(msg)) if msg == "boom"
        ));
        assert!(runner.execute(TaskId::new(1), "a").await.is_err());
        assert!(runner.execute(TaskId::new(1), "a").await.is_ok());
        assert_eq!(runner.call_count().await, 3);
    }

    #[tokio::test]
    async fn test_scripted_runner_records_calls() {
        let runner = ScriptedRunner::succeeding();
        runner.execute(TaskId::new(4), "crawl").await.unwrap();

        assert_eq!(runner.calls().await, vec![(TaskId::new(4), "crawl".to_string())]);
    }

    #[tokio::test]
    async fn test_slow_runner_counts() {
        let runner = SlowRunner::new(Duration::from_millis(10));
        runner.execute(TaskId::new(1), "a").await.unwrap();

        assert_eq!(runner.started(), 1);
        assert_eq!(runner.completed(), 1);
    }

    #[tokio::test]
    async fn test_recording_listener_wait_for() {
        let listener = RecordingListener::new();
        let job_id = JobId::new("task_1");
        listener.on_event(&Event::job_added(&job_id, "a")).unwrap();
        listener.on_event(&Event::engine_started()).unwrap();

        assert!(
            listener
                .wait_for(EventKind::JobAdded, 1, Duration::from_millis(50))
                .await
        );
        assert!(
            !listener
                .wait_for(EventKind::JobRemoved, 1, Duration::from_millis(30))
                .await
        );
        assert_eq!(listener.kinds_for(&job_id), vec![EventKind::JobAdded]);

        listener.clear();
        assert!(listener.events().is_empty());
    }
}
