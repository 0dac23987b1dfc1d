//! Error types for warden-core.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Underlying I/O failure reading the config file.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// YAML parse error on load: includes file path and line context from serde_yaml.
    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// A watch, critical or high pattern failed to compile.
    #[error("invalid glob pattern '{pattern}': {source}")]
    Glob {
        pattern: String,
        #[source]
        source: globset::Error,
    },

    /// Two registry entries share the same id.
    #[error("duplicate service id '{0}' in registry")]
    DuplicateService(String),

    /// A registry entry has no command to run.
    #[error("service '{0}' has an empty start_command")]
    EmptyCommand(String),

    /// A timer or threshold that must be positive was configured as zero.
    #[error("configuration value '{0}' must be greater than zero")]
    ZeroValue(&'static str),
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> ConfigError {
    ConfigError::Io {
        path: path.into(),
        source,
    }
}
