//! Task execution.
//!
//! This module provides the external command runner used by the host binary.

mod command;

pub use command::{CommandOutput, CommandRunner, CommandSpec, CommandSpecBuilder};
