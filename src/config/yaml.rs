//! YAML configuration parsing.
//!
//! Parses engine settings and task definitions from YAML files.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::core::retry::RetryPolicy;
use crate::core::task::TaskDefinition;
use crate::core::types::TaskId;
use crate::events::EventListener;
use crate::execution::{CommandRunner, CommandSpec};
use crate::scheduler::{ReloadSummary, Scheduler, SchedulerConfig, parse_timezone};

use super::error::ConfigError;

/// Engine configuration (crontide.yaml).
///
/// Every field is optional in YAML.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// IANA timezone in which cron fields are evaluated.
    pub timezone: String,
    /// How late a firing may run before it is reported as missed.
    pub misfire_grace_secs: u64,
    /// Maximum sleep between loop evaluations.
    pub tick_interval_ms: u64,
    /// How long shutdown waits for in-flight executions.
    pub shutdown_timeout_secs: u64,
    /// Retry policy for failed executions.
    pub retry: RetryConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            timezone: "UTC".to_string(),
            misfire_grace_secs: 30,
            tick_interval_ms: 1000,
            shutdown_timeout_secs: 30,
            retry: RetryConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Convert to a scheduler configuration.
    pub fn to_scheduler_config(&self) -> Result<SchedulerConfig, ConfigError> {
        let timezone = parse_timezone(&self.timezone)
            .map_err(|_| ConfigError::InvalidTimezone(self.timezone.clone()))?;

        Ok(SchedulerConfig::default()
            .with_timezone(timezone)
            .with_misfire_grace(Duration::from_secs(self.misfire_grace_secs))
            .with_tick_interval(Duration::from_millis(self.tick_interval_ms))
            .with_shutdown_timeout(Duration::from_secs(self.shutdown_timeout_secs))
            .with_retry(self.retry.to_policy()))
    }
}

/// Retry policy configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Number of retries after the initial attempt.
    pub max_attempts: u32,
    /// Delay between retries in seconds.
    pub delay_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            delay_secs: 0,
        }
    }
}

impl RetryConfig {
    /// Convert to a retry policy.
    pub fn to_policy(&self) -> RetryPolicy {
        RetryPolicy::fixed(self.max_attempts, Duration::from_secs(self.delay_secs))
    }
}

/// A file of task definitions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TasksFile {
    pub tasks: Vec<TaskConfig>,
}

impl TasksFile {
    /// Task definitions in file order.
    pub fn definitions(&self) -> Vec<TaskDefinition> {
        self.tasks.iter().map(TaskConfig::to_definition).collect()
    }

    /// Build a runner executing each task's configured command.
    pub fn command_runner(&self) -> CommandRunner {
        self.tasks
            .iter()
            .filter_map(|task| {
                task.command
                    .as_ref()
                    .map(|command| (TaskId::new(task.id), command.to_spec()))
            })
            .fold(CommandRunner::new(), |runner, (id, spec)| {
                runner.with_command(id, spec)
            })
    }

    /// Build a stopped scheduler running these tasks' commands and load the
    /// tasks into it.
    ///
    /// The listener is attached before the reload, so it observes the
    /// reload's job, invalid-cron and summary events.
    pub async fn install(
        &self,
        config: SchedulerConfig,
        listener: Arc<dyn EventListener>,
    ) -> (Scheduler, ReloadSummary) {
        let scheduler =
            Scheduler::with_config(Arc::new(self.command_runner()), config).with_listener(listener);
        let summary = scheduler.reload(&self.definitions()).await;
        (scheduler, summary)
    }
}

/// Task configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskConfig {
    /// Task identifier.
    pub id: i64,
    /// Human-readable name.
    pub name: String,
    /// Whether the task is scheduled.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Cron expression; empty means the task is never scheduled.
    #[serde(default)]
    pub cron: String,
    /// Command to run at each firing.
    #[serde(default)]
    pub command: Option<CommandConfig>,
}

fn default_true() -> bool {
    true
}

impl TaskConfig {
    /// Convert to a task definition.
    pub fn to_definition(&self) -> TaskDefinition {
        TaskDefinition::new(self.id, self.name.clone(), self.cron.clone())
            .with_enabled(self.enabled)
    }
}

/// External command configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandConfig {
    /// Program to execute.
    pub program: String,
    /// Command arguments.
    #[serde(default)]
    pub args: Vec<String>,
    /// Working directory.
    pub working_dir: Option<String>,
    /// Timeout in seconds.
    pub timeout_secs: Option<u64>,
    /// Environment variables.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl CommandConfig {
    /// Convert to a command specification.
    pub fn to_spec(&self) -> CommandSpec {
        let mut builder = CommandSpec::builder(&self.program).args(self.args.iter().cloned());
        for (key, value) in &self.env {
            builder = builder.env(key, value);
        }
        if let Some(dir) = &self.working_dir {
            builder = builder.working_dir(dir);
        }
        if let Some(secs) = self.timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        builder.build()
    }
}

/// YAML configuration loader.
pub struct YamlLoader;

impl YamlLoader {
    /// Load engine configuration from a file.
    pub fn load_engine_config(path: impl AsRef<Path>) -> Result<EngineConfig, ConfigError> {
        let config: EngineConfig = Self::read_yaml(path.as_ref())?;
        Self::validate_engine_config(&config)?;
        Ok(config)
    }

    /// Parse engine configuration from a YAML string.
    pub fn parse_engine_config(yaml: &str) -> Result<EngineConfig, ConfigError> {
        let config: EngineConfig = serde_yaml::from_str(yaml)?;
        Self::validate_engine_config(&config)?;
        Ok(config)
    }

    /// Load task definitions from a file.
    pub fn load_tasks(path: impl AsRef<Path>) -> Result<TasksFile, ConfigError> {
        let file: TasksFile = Self::read_yaml(path.as_ref())?;
        Self::validate_tasks(&file)?;
        Ok(file)
    }

    /// Parse task definitions from a YAML string.
    pub fn parse_tasks(yaml: &str) -> Result<TasksFile, ConfigError> {
        let file: TasksFile = serde_yaml::from_str(yaml)?;
        Self::validate_tasks(&file)?;
        Ok(file)
    }

    fn read_yaml<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_yaml::from_str(&content).map_err(|source| ConfigError::YamlFile {
            path: path.to_path_buf(),
            source,
        })
    }

    fn validate_engine_config(config: &EngineConfig) -> Result<(), ConfigError> {
        if parse_timezone(&config.timezone).is_err() {
            return Err(ConfigError::InvalidTimezone(config.timezone.clone()));
        }

        // A zero tick would spin the loop
        if config.tick_interval_ms == 0 {
            return Err(ConfigError::Invalid("tick_interval_ms must be positive".into()));
        }

        Ok(())
    }

    /// Validate a tasks file.
    ///
    /// Cron expressions are not checked here; the scheduler rejects bad ones
    /// individually on reload.
    fn validate_tasks(file: &TasksFile) -> Result<(), ConfigError> {
        let mut ids = HashSet::new();
        for task in &file.tasks {
            if !ids.insert(task.id) {
                return Err(ConfigError::DuplicateTaskId(task.id));
            }

            if task.name.trim().is_empty() {
                return Err(ConfigError::MissingField(format!("tasks[{}].name", task.id)));
            }

            let missing_program = task
                .command
                .as_ref()
                .is_some_and(|command| command.program.trim().is_empty());
            if missing_program {
                return Err(ConfigError::MissingField(format!(
                    "tasks[{}].command.program",
                    task.id
                )));
            }
        }

        Ok(())
    }
}
