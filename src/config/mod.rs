//! Configuration loading and parsing.
//!
//! This module provides YAML-based configuration for the engine and for task
//! definitions.

mod error;
mod yaml;

pub use error::ConfigError;
pub use yaml::{CommandConfig, EngineConfig, RetryConfig, TaskConfig, TasksFile, YamlLoader};
