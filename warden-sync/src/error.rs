//! Error types for warden-sync.

use std::path::PathBuf;

use thiserror::Error;

use warden_core::ConfigError;

/// Failure of a single version-control invocation.
///
/// Carries only owned strings so it can be cloned into metrics and reports.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VcsError {
    /// The command ran and exited non-zero.
    #[error("`git {command}` failed ({status}): {stderr}")]
    Failed {
        command: String,
        status: String,
        stderr: String,
    },

    /// The binary could not be started at all.
    #[error("failed to run `git {command}`: {message}")]
    Launch { command: String, message: String },
}

impl VcsError {
    /// Captured stderr (or the launch failure message).
    pub fn stderr(&self) -> &str {
        match self {
            VcsError::Failed { stderr, .. } => stderr,
            VcsError::Launch { message, .. } => message,
        }
    }

    /// True when the remote refused the push because histories diverged.
    pub fn is_rejection(&self) -> bool {
        let VcsError::Failed { stderr, .. } = self else {
            return false;
        };
        let stderr = stderr.to_ascii_lowercase();
        ["rejected", "non-fast-forward", "fetch first", "diverged"]
            .iter()
            .any(|needle| stderr.contains(needle))
    }
}

/// All errors that can arise from sync setup.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Vcs(#[from] VcsError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("{root} is not inside a git repository: {stderr}")]
    NotARepository { root: PathBuf, stderr: String },

    #[error("remote '{remote}' is not configured (known remotes: {known})")]
    NoRemote { remote: String, known: String },

    #[error("HEAD is detached and no sync.branch is configured")]
    DetachedHead,

    #[error("invalid glob pattern '{pattern}': {source}")]
    Glob {
        pattern: String,
        #[source]
        source: globset::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failed(stderr: &str) -> VcsError {
        VcsError::Failed {
            command: "push origin main".to_string(),
            status: "exit status: 1".to_string(),
            stderr: stderr.to_string(),
        }
    }

    #[test]
    fn rejection_detection() {
        assert!(failed("! [rejected] main -> main (non-fast-forward)").is_rejection());
        assert!(failed("Updates were rejected because the remote contains work").is_rejection());
        assert!(!failed("fatal: unable to access: Could not resolve host").is_rejection());
        let launch = VcsError::Launch {
            command: "push".to_string(),
            message: "rejected".to_string(),
        };
        assert!(!launch.is_rejection(), "launch failures never count as rejections");
    }
}
