//! `warden launch`, `warden start`, `warden services` and `warden ports`.
//!
//! The listings come from the daemon's status payload when it is running and
//! fall back to the registry in `warden.yaml` when it is not.

use std::path::Path;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tabled::{settings::Style, Table, Tabled};

use warden_core::{config, ServiceId, WardenConfig};
use warden_daemon::{request_launch, request_start, request_status, DaemonError};

use super::NOT_RUNNING_HINT;

#[derive(Args, Debug)]
pub struct StartArgs {
    /// Service id from `warden.yaml`.
    pub service: String,
}

impl StartArgs {
    pub fn run(self, root: &Path) -> Result<()> {
        let report = match request_start(root, &self.service) {
            Err(DaemonError::DaemonNotRunning { .. }) => anyhow::bail!(NOT_RUNNING_HINT),
            other => other.with_context(|| format!("could not start '{}'", self.service))?,
        };
        print_launch(&report)
    }
}

#[derive(Args, Debug)]
pub struct ListArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

pub fn launch(root: &Path) -> Result<()> {
    let report = match request_launch(root) {
        Err(DaemonError::DaemonNotRunning { .. }) => anyhow::bail!(NOT_RUNNING_HINT),
        other => other.context("launch failed")?,
    };
    print_launch(&report)
}

#[derive(Debug, Deserialize)]
struct LaunchReport {
    started: Vec<Started>,
    blocked: Vec<Blocked>,
    failed: Vec<ServiceId>,
}

#[derive(Debug, Deserialize)]
struct Started {
    service: ServiceId,
    port: u16,
    pid: u32,
}

#[derive(Debug, Deserialize)]
struct Blocked {
    service: ServiceId,
    waiting_on: Vec<ServiceId>,
}

fn print_launch(report: &Value) -> Result<()> {
    let report: LaunchReport =
        serde_json::from_value(report.clone()).context("unexpected launch report from daemon")?;
    if report.started.is_empty() && report.blocked.is_empty() && report.failed.is_empty() {
        println!("nothing to launch");
    }
    for started in &report.started {
        println!(
            "{} {} on port {} (pid {})",
            "✓".green(),
            started.service,
            started.port,
            started.pid
        );
    }
    for blocked in &report.blocked {
        let waiting: Vec<&str> = blocked.waiting_on.iter().map(|id| id.0.as_str()).collect();
        println!(
            "{} {} waiting on {}",
            "…".yellow(),
            blocked.service,
            waiting.join(", ")
        );
    }
    for failed in &report.failed {
        println!("{} {} failed to start", "✗".red(), failed);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Listings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ServiceRow {
    id: ServiceId,
    status: String,
    pid: Option<u32>,
    port: Option<u16>,
    restart_count: u32,
    max_restarts: u32,
    reachable: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PortRow {
    port: u16,
    service: ServiceId,
    status: String,
    #[serde(default)]
    auto_start: bool,
    #[serde(default)]
    dependencies: Vec<ServiceId>,
}

#[derive(Tabled)]
struct ServiceTableRow {
    #[tabled(rename = "service")]
    id: String,
    #[tabled(rename = "status")]
    status: String,
    #[tabled(rename = "port")]
    port: String,
    #[tabled(rename = "pid")]
    pid: String,
    #[tabled(rename = "restarts")]
    restarts: String,
    #[tabled(rename = "reachable")]
    reachable: String,
}

#[derive(Tabled)]
struct PortTableRow {
    #[tabled(rename = "port")]
    port: u16,
    #[tabled(rename = "service")]
    service: String,
    #[tabled(rename = "status")]
    status: String,
    #[tabled(rename = "auto start")]
    auto_start: String,
    #[tabled(rename = "depends on")]
    dependencies: String,
}

/// The daemon's status payload, or `None` when it is not running.
fn daemon_status(root: &Path) -> Result<Option<Value>> {
    match request_status(root) {
        Ok(status) => Ok(Some(status)),
        Err(DaemonError::DaemonNotRunning { .. }) => Ok(None),
        Err(err) => Err(err).context("failed to query daemon status"),
    }
}

fn load_config(root: &Path) -> Result<WardenConfig> {
    config::load_at(root).with_context(|| {
        format!(
            "failed to load {}",
            config::config_path_at(root).display()
        )
    })
}

pub fn list_services(root: &Path, args: &ListArgs) -> Result<()> {
    let (running, rows) = match daemon_status(root)? {
        Some(status) => (
            true,
            serde_json::from_value::<Vec<ServiceRow>>(status["services"].clone())
                .context("unexpected services list from daemon")?,
        ),
        None => (false, configured_services(&load_config(root)?)),
    };

    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&rows).context("failed to serialize services JSON")?
        );
        return Ok(());
    }

    if !running {
        println!("{}", "daemon not running; showing configured services".bright_black());
    }
    if rows.is_empty() {
        println!("No services configured.");
        return Ok(());
    }
    let table_rows: Vec<ServiceTableRow> = rows
        .into_iter()
        .map(|row| ServiceTableRow {
            status: status_label(&row.status),
            port: row.port.map(|p| p.to_string()).unwrap_or_else(|| "-".to_string()),
            pid: row.pid.map(|p| p.to_string()).unwrap_or_else(|| "-".to_string()),
            restarts: format!("{}/{}", row.restart_count, row.max_restarts),
            reachable: match row.reachable {
                Some(true) => "yes".to_string(),
                Some(false) => "no".to_string(),
                None => "-".to_string(),
            },
            id: row.id.0,
        })
        .collect();
    let mut table = Table::new(table_rows);
    table.with(Style::rounded());
    println!("{table}");
    Ok(())
}

pub fn list_ports(root: &Path, args: &ListArgs) -> Result<()> {
    let rows = match daemon_status(root)? {
        Some(status) => serde_json::from_value::<Vec<PortRow>>(status["ports"].clone())
            .context("unexpected port table from daemon")?,
        None => configured_ports(&load_config(root)?),
    };

    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&rows).context("failed to serialize ports JSON")?
        );
        return Ok(());
    }
    if rows.is_empty() {
        println!("No ports reserved.");
        return Ok(());
    }
    let table_rows: Vec<PortTableRow> = rows
        .into_iter()
        .map(|row| PortTableRow {
            port: row.port,
            service: row.service.0,
            status: status_label(&row.status),
            auto_start: if row.auto_start { "yes" } else { "no" }.to_string(),
            dependencies: row
                .dependencies
                .iter()
                .map(|d| d.0.as_str())
                .collect::<Vec<_>>()
                .join(", "),
        })
        .collect();
    let mut table = Table::new(table_rows);
    table.with(Style::rounded());
    println!("{table}");
    Ok(())
}

fn configured_services(config: &WardenConfig) -> Vec<ServiceRow> {
    config
        .services
        .iter()
        .map(|service| ServiceRow {
            id: service.id.clone(),
            status: "not-started".to_string(),
            pid: None,
            port: service.port,
            restart_count: 0,
            max_restarts: config.max_restarts_for(service),
            reachable: None,
        })
        .collect()
}

/// Static reservations in registry order; the first claimant of a port keeps it.
fn configured_ports(config: &WardenConfig) -> Vec<PortRow> {
    let mut rows: Vec<PortRow> = Vec::new();
    for service in &config.services {
        let Some(port) = service.port else { continue };
        if rows.iter().any(|row| row.port == port) {
            continue;
        }
        rows.push(PortRow {
            port,
            service: service.id.clone(),
            status: "reserved".to_string(),
            auto_start: service.auto_start,
            dependencies: service.dependencies.clone(),
        });
    }
    rows.sort_by_key(|row| row.port);
    rows
}

fn status_label(status: &str) -> String {
    match status {
        "running" | "active" => status.green().bold().to_string(),
        "restarting" => status.yellow().bold().to_string(),
        "stopped" => status.red().bold().to_string(),
        other => other.bright_black().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_core::ServiceDescriptor;

    #[test]
    fn first_static_claimant_keeps_the_port() {
        let mut config = WardenConfig::default();
        config.services = vec![
            ServiceDescriptor::new("web", "npm start").with_port(7300),
            ServiceDescriptor::new("docs", "npm run docs").with_port(7300),
            ServiceDescriptor::new("db", "postgres").with_port(7200),
        ];
        let ports = configured_ports(&config);
        let claimed: Vec<(u16, &str)> = ports
            .iter()
            .map(|row| (row.port, row.service.0.as_str()))
            .collect();
        assert_eq!(claimed, vec![(7200, "db"), (7300, "web")]);
    }

    #[test]
    fn configured_services_use_the_effective_budget() {
        let mut config = WardenConfig::default();
        config.services = vec![
            ServiceDescriptor::new("web", "npm start"),
            ServiceDescriptor::new("worker", "node worker.js").with_max_restarts(2),
        ];
        let rows = configured_services(&config);
        assert_eq!(rows[0].max_restarts, 5);
        assert_eq!(rows[1].max_restarts, 2);
        assert!(rows.iter().all(|row| row.status == "not-started"));
    }
}
