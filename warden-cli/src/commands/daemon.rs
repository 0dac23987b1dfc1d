//! `warden daemon`: foreground runtime, shutdown, status and logs.

use std::collections::VecDeque;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use colored::Colorize;
use serde_json::{json, Value};

use warden_daemon::paths::{daemon_log_path, service_log_path, socket_path};
use warden_daemon::{request_status, request_stop, start_blocking, DaemonError};

#[derive(Subcommand, Debug)]
pub enum DaemonCommand {
    /// Run the daemon in the foreground until `warden daemon stop` or a signal.
    Start,
    /// Ask a running daemon to shut down.
    Stop,
    /// Show whether the daemon is running and what it is doing.
    Status(StatusArgs),
    /// Print the tail of the daemon log or of a service's captured output.
    Logs(LogsArgs),
}

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Print the raw status payload.
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct LogsArgs {
    /// How many trailing lines to print.
    #[arg(long, short = 'n', default_value_t = 100)]
    pub lines: usize,

    /// Read `.warden/logs/services/<id>.log` instead of the daemon log.
    #[arg(long)]
    pub service: Option<String>,
}

pub fn run(root: &Path, command: DaemonCommand) -> Result<()> {
    match command {
        DaemonCommand::Start => start_blocking(root).context("daemon exited with error"),
        DaemonCommand::Stop => stop(root),
        DaemonCommand::Status(args) => status(root, &args),
        DaemonCommand::Logs(args) => {
            let path = match &args.service {
                Some(service) => service_log_path(root, service),
                None => daemon_log_path(root),
            };
            print_tail(&path, args.lines)
        }
    }
}

fn stop(root: &Path) -> Result<()> {
    match request_stop(root) {
        Ok(()) => println!("{} daemon stopping", "✓".green()),
        Err(DaemonError::DaemonNotRunning { .. }) => println!("daemon is not running"),
        Err(err) => return Err(err).context("failed to stop daemon"),
    }
    Ok(())
}

fn status(root: &Path, args: &StatusArgs) -> Result<()> {
    let payload = match request_status(root) {
        Ok(payload) => payload,
        Err(DaemonError::DaemonNotRunning { socket }) => json!({
            "running": false,
            "socket": socket,
        }),
        Err(err) => return Err(err).context("failed to query daemon status"),
    };

    if args.json {
        let text = serde_json::to_string_pretty(&payload).context("failed to encode status")?;
        println!("{text}");
    } else {
        print_summary(root, &payload);
    }
    Ok(())
}

fn print_summary(root: &Path, payload: &Value) {
    if payload["running"] != Value::Bool(true) {
        println!("{} daemon not running", "●".red());
        println!("  socket   {}", socket_path(root).display());
        return;
    }

    let sync = &payload["sync"];
    println!(
        "{} daemon running (pid {}, up {}s)",
        "●".green(),
        payload["pid"],
        payload["uptime_secs"]
    );
    println!("  root     {}", text(&payload["root"]));
    println!(
        "  remote   {}/{}",
        text(&sync["remote"]),
        text(&sync["branch"])
    );
    println!(
        "  sync     {} | {} pending | {} settling",
        text(&sync["phase"]),
        sync["pending"],
        payload["settling"]
    );
    if sync["force_push_needed"] == Value::Bool(true) {
        println!("  {}", "next push will be forced".yellow());
    }

    let services = payload["services"].as_array().map(Vec::as_slice).unwrap_or(&[]);
    let running = services
        .iter()
        .filter(|service| service["status"] == "running")
        .count();
    println!("  services {running}/{} running", services.len());
}

fn text(value: &Value) -> &str {
    value.as_str().unwrap_or("-")
}

/// Print the last `count` lines of `path`.
fn print_tail(path: &Path, count: usize) -> Result<()> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            println!("log file not found: {}", path.display());
            return Ok(());
        }
        Err(err) => {
            return Err(err).with_context(|| format!("failed to read {}", path.display()))
        }
    };

    let mut window: VecDeque<&str> = VecDeque::with_capacity(count.min(1024));
    for line in contents.lines() {
        if count == 0 {
            break;
        }
        if window.len() == count {
            window.pop_front();
        }
        window.push_back(line);
    }

    println!("{}", format!("--- {} ---", path.display()).bright_black());
    for line in window {
        println!("{line}");
    }
    Ok(())
}
