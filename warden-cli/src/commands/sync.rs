//! `warden sync` and `warden pull`: run a cycle now through the daemon.

use std::path::Path;

use anyhow::{Context, Result};
use colored::Colorize;
use serde_json::Value;

use warden_daemon::{request_pull, request_sync, DaemonError};

use super::NOT_RUNNING_HINT;

pub fn push(root: &Path) -> Result<()> {
    let result = match request_sync(root) {
        Err(DaemonError::DaemonNotRunning { .. }) => anyhow::bail!(NOT_RUNNING_HINT),
        other => other.context("sync failed")?,
    };
    println!("{}", describe_push(&result));
    Ok(())
}

pub fn pull(root: &Path) -> Result<()> {
    let result = match request_pull(root) {
        Err(DaemonError::DaemonNotRunning { .. }) => anyhow::bail!(NOT_RUNNING_HINT),
        other => other.context("pull failed")?,
    };
    println!("{}", describe_pull(&result));
    Ok(())
}

fn describe_push(result: &Value) -> String {
    if result["started"] == false {
        return format!("{} no push started ({})", "•".yellow(), reason(result));
    }
    match result["outcome"].as_str() {
        Some("pushed") => {
            let forced = if result["forced"] == true { " (forced)" } else { "" };
            format!(
                "{} pushed {} file(s) in {}ms{forced}",
                "✓".green(),
                result["files"],
                result["duration_ms"]
            )
        }
        _ => format!("{} nothing to commit", "✓".green()),
    }
}

fn describe_pull(result: &Value) -> String {
    if result["started"] == false {
        return format!("{} no pull started ({})", "•".yellow(), reason(result));
    }
    match result["outcome"].as_str() {
        Some("pulled") => format!("{} pulled {} commit(s)", "✓".green(), result["commits"]),
        _ => format!("{} already up to date", "✓".green()),
    }
}

fn reason(result: &Value) -> String {
    result["reason"]
        .as_str()
        .unwrap_or("unknown")
        .replace('-', " ")
}
