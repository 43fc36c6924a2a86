//! External command runner.
//!
//! [`CommandRunner`] maps task ids to [`CommandSpec`]s and runs the matching
//! command every time a task fires. It is the runner the host binary uses.
//!
//! ```rust
//! use crontide::{CommandRunner, CommandSpec, TaskId};
//! use std::time::Duration;
//!
//! let runner = CommandRunner::new().with_command(
//!     TaskId::new(1),
//!     CommandSpec::builder("./crawl.sh")
//!         .args(["--site", "news"])
//!         .env("LOG_LEVEL", "info")
//!         .timeout(Duration::from_secs(300))
//!         .build(),
//! );
//! assert!(runner.contains(TaskId::new(1)));
//! ```
//!
//! # Error Handling
//!
//! - **Non-zero exit code**: [`ExecutionError::CommandFailed`] with the exit code
//! - **Timeout**: [`ExecutionError::Timeout`]; the child is killed
//! - **Spawn failure** or an unknown task: [`ExecutionError::ExecutionFailed`]

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;

use crate::core::task::{ExecutionError, TaskRunner};
use crate::core::types::TaskId;

/// Captured result of a finished command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `-1` when terminated by a signal.
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// An external command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    program: String,
    args: Vec<String>,
    env: BTreeMap<String, String>,
    working_dir: Option<PathBuf>,
    timeout: Option<Duration>,
}

impl CommandSpec {
    /// Create a new builder for a command.
    pub fn builder(program: impl Into<String>) -> CommandSpecBuilder {
        CommandSpecBuilder::new(program)
    }

    /// Get the program being executed.
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Get the command arguments.
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Get the working directory.
    pub fn working_dir(&self) -> Option<&PathBuf> {
        self.working_dir.as_ref()
    }

    /// Get the timeout duration.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Run the command to completion, capturing its output.
    ///
    /// A non-zero exit is not an error here; see [`CommandOutput::success`].
    pub async fn run(&self) -> Result<CommandOutput, ExecutionError> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        cmd.envs(&self.env);
        if let Some(ref dir) = self.working_dir {
            cmd.current_dir(dir);
        }
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        let output = match self.timeout {
            Some(duration) => timeout(duration, cmd.output())
                .await
                .map_err(|_| ExecutionError::Timeout(duration))?
                .map_err(|e| ExecutionError::ExecutionFailed(e.to_string()))?,
            None => cmd
                .output()
                .await
                .map_err(|e| ExecutionError::ExecutionFailed(e.to_string()))?,
        };

        Ok(CommandOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Builder for creating `CommandSpec` instances.
#[derive(Debug, Clone)]
pub struct CommandSpecBuilder {
    program: String,
    args: Vec<String>,
    env: BTreeMap<String, String>,
    working_dir: Option<PathBuf>,
    timeout: Option<Duration>,
}

impl CommandSpecBuilder {
    /// Create a new builder with the given program.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
            working_dir: None,
            timeout: None,
        }
    }

    /// Add a single argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Add multiple arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Add a single environment variable.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Set the working directory.
    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Set the execution timeout.
    pub fn timeout(mut self, duration: Duration) -> Self {
        self.timeout = Some(duration);
        self
    }

    /// Build the `CommandSpec`.
    pub fn build(self) -> CommandSpec {
        CommandSpec {
            program: self.program,
            args: self.args,
            env: self.env,
            working_dir: self.working_dir,
            timeout: self.timeout,
        }
    }
}

/// Runs the configured command of the task that fired.
#[derive(Debug, Clone, Default)]
pub struct CommandRunner {
    commands: HashMap<TaskId, CommandSpec>,
}

impl CommandRunner {
    /// Create a runner with no commands.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: register the command for a task.
    pub fn with_command(mut self, task_id: TaskId, spec: CommandSpec) -> Self {
        self.insert(task_id, spec);
        self
    }

    /// Register the command for a task, replacing any previous one.
    pub fn insert(&mut self, task_id: TaskId, spec: CommandSpec) {
        self.commands.insert(task_id, spec);
    }

    /// Check whether a task has a command.
    pub fn contains(&self, task_id: TaskId) -> bool {
        self.commands.contains_key(&task_id)
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

#[async_trait]
impl TaskRunner for CommandRunner {
    async fn execute(&self, task_id: TaskId, task_name: &str) -> Result<(), ExecutionError> {
        let spec = self.commands.get(&task_id).ok_or_else(|| {
            ExecutionError::ExecutionFailed(format!("no command configured for task {task_id}"))
        })?;

        tracing::debug!(%task_id, task_name, program = %spec.program, "Running command");
        let output = spec.run().await?;

        let stdout = output.stdout.trim();
        if !stdout.is_empty() {
            tracing::info!(%task_id, task_name, "stdout: {}", stdout);
        }

        if output.success() {
            Ok(())
        } else {
            let stderr = output.stderr.trim();
            if !stderr.is_empty() {
                tracing::warn!(%task_id, task_name, "stderr: {}", stderr);
            }
            Err(ExecutionError::CommandFailed(output.exit_code))
        }
    }
}
