//! Errors raised while loading engine settings and task files.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// YAML text that did not come from a file.
    #[error("malformed YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("malformed YAML in '{path}': {source}")]
    YamlFile {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// A setting outside its allowed range.
    #[error("invalid setting: {0}")]
    Invalid(String),

    #[error("task id {0} appears more than once")]
    DuplicateTaskId(i64),

    /// A required field is empty, named by its path in the document.
    #[error("'{0}' must not be empty")]
    MissingField(String),

    #[error("unknown timezone '{0}'")]
    InvalidTimezone(String),
}

impl ConfigError {
    /// The file the error came from, if any.
    pub fn path(&self) -> Option<&PathBuf> {
        match self {
            ConfigError::Read { path, .. } | ConfigError::YamlFile { path, .. } => Some(path),
            _ => None,
        }
    }
}
