use std::path::PathBuf;

use thiserror::Error;

/// Everything that can stop the daemon or fail a socket round-trip.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("file watcher error: {0}")]
    Watch(#[from] notify::Error),

    #[error(transparent)]
    Config(#[from] warden_core::ConfigError),

    /// Pre-flight or cycle failure from the sync layer.
    #[error(transparent)]
    Sync(#[from] warden_sync::SyncError),

    #[error(transparent)]
    Supervisor(#[from] warden_supervisor::SupervisorError),

    #[error("malformed socket message: {0}")]
    Json(#[from] serde_json::Error),

    #[error("channel closed: {0}")]
    ChannelClosed(&'static str),

    /// The daemon answered with `ok: false`.
    #[error("daemon protocol error: {0}")]
    Protocol(String),

    #[error("daemon is not running (socket missing: {socket})")]
    DaemonNotRunning { socket: PathBuf },

    #[error("another daemon is already listening on {socket}")]
    AlreadyRunning { socket: PathBuf },
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> DaemonError {
    DaemonError::Io {
        path: path.into(),
        source,
    }
}
