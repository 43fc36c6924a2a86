//! Task definitions and the execution callback.
//!
//! A [`TaskDefinition`] is what the task store hands to the scheduler. The
//! scheduler never executes work itself: at each fire time it calls a
//! [`TaskRunner`] with the task's id and name.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::types::TaskId;

/// Errors reported by an execution callback.
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// Execution failed with a message.
    #[error("execution failed: {0}")]
    ExecutionFailed(String),

    /// Execution timed out.
    #[error("execution timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// External command failed with exit code.
    #[error("command exited with code {0}")]
    CommandFailed(i32),

    /// Generic error wrapper.
    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

/// A schedulable task as provided by the task store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDefinition {
    /// Unique task identifier.
    pub id: TaskId,
    /// Display name, passed to the runner on every firing.
    pub name: String,
    /// Disabled tasks are never scheduled.
    pub enabled: bool,
    /// Cron expression; empty means "no schedule".
    pub cron: String,
}

impl TaskDefinition {
    /// Create an enabled task.
    pub fn new(id: impl Into<TaskId>, name: impl Into<String>, cron: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            enabled: true,
            cron: cron.into(),
        }
    }

    /// Builder: set the enabled flag.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Whether this task should produce a job on reload.
    ///
    /// A task with an empty or whitespace-only cron has no trigger and is
    /// skipped without error.
    pub fn is_schedulable(&self) -> bool {
        self.enabled && !self.cron.trim().is_empty()
    }
}

/// The unit of work invoked at each fire time.
///
/// # Example
///
/// ```ignore
/// use crontide::{ExecutionError, TaskId, TaskRunner};
/// use async_trait::async_trait;
///
/// struct Crawler;
///
/// #[async_trait]
/// impl TaskRunner for Crawler {
///     async fn execute(&self, task_id: TaskId, task_name: &str) -> Result<(), ExecutionError> {
///         tracing::info!(%task_id, task_name, "starting crawl");
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait TaskRunner: Send + Sync {
    /// Run the work for one firing of a task.
    async fn execute(&self, task_id: TaskId, task_name: &str) -> Result<(), ExecutionError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schedulable_requires_enabled_and_cron() {
        assert!(TaskDefinition::new(1, "crawl", "0 * * * *").is_schedulable());
        assert!(
            !TaskDefinition::new(1, "crawl", "0 * * * *")
                .with_enabled(false)
                .is_schedulable()
        );
        assert!(!TaskDefinition::new(1, "crawl", "").is_schedulable());
        assert!(!TaskDefinition::new(1, "crawl", " \t ").is_schedulable());
    }

    #[test]
    fn test_execution_error_display() {
        assert_eq!(
            ExecutionError::CommandFailed(2).to_string(),
            "command exited with code 2"
        );
        assert_eq!(
            ExecutionError::ExecutionFailed("boom".into()).to_string(),
            "execution failed: boom"
        );
    }

    #[test]
    fn test_task_definition_deserializes() {
        let json = r#"{"id": 7, "name": "news", "enabled": false, "cron": "*/5 * * * *"}"#;
        let task: TaskDefinition = serde_json::from_str(json).unwrap();

        assert_eq!(task.id, TaskId::new(7));
        assert!(!task.enabled);
        assert_eq!(task.cron, "*/5 * * * *");
    }
}
