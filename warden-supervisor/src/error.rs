use std::path::PathBuf;

use thiserror::Error;

/// Error surface for port allocation, spawning and supervision.
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to spawn service '{service}': {message}")]
    Spawn { service: String, message: String },

    #[error("unknown service '{0}'")]
    UnknownService(String),

    #[error("service '{service}' is waiting on inactive dependencies: {missing}")]
    DependenciesNotMet { service: String, missing: String },

    #[error("service '{0}' is already running")]
    AlreadyRunning(String),

    #[error("no free port at or above {floor}")]
    NoFreePort { floor: u16 },
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SupervisorError {
    SupervisorError::Io {
        path: path.into(),
        source,
    }
}
