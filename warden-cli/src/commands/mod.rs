pub mod daemon;
pub mod services;
pub mod sync;

use std::path::PathBuf;

use anyhow::{Context, Result};

/// `--root`, or the current directory.
pub fn resolve_root(root: Option<PathBuf>) -> Result<PathBuf> {
    match root {
        Some(root) => Ok(root),
        None => std::env::current_dir().context("could not determine current directory"),
    }
}

/// Message for commands that need a running daemon.
pub const NOT_RUNNING_HINT: &str = "daemon is not running; start it with `warden daemon start`";
