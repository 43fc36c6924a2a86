//! crontide - cron-driven recurring task scheduling.
//!
//! Tasks are loaded from a task store as [`TaskDefinition`]s, turned into
//! jobs by [`Scheduler::reload`], and fired at their cron instants through a
//! [`TaskRunner`]. Every lifecycle transition is reported to an
//! [`EventListener`].

pub mod config;
pub mod core;
pub mod events;
pub mod execution;
pub mod scheduler;
pub mod testing;

pub use config::{ConfigError, EngineConfig, TasksFile, YamlLoader};
pub use core::cron::{CronError, CronExpr, CronField, FieldKind};
pub use core::retry::RetryPolicy;
pub use core::task::{ExecutionError, TaskDefinition, TaskRunner};
pub use core::trigger::{CronTrigger, Trigger};
pub use core::types::{JobId, RunId, TaskId};
pub use events::{Event, EventKind, EventListener, EventNotifier, ListenerError, LoggingListener};
pub use execution::{CommandOutput, CommandRunner, CommandSpec};
pub use scheduler::{
    JobSnapshot, ReloadSummary, Scheduler, SchedulerConfig, SchedulerError, SchedulerState,
};
