//! The `status` payload returned over the socket.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;

use warden_core::ServiceId;
use warden_supervisor::{FleetSnapshot, PortStatus, ServiceView};
use warden_sync::SyncSnapshot;

/// One row of the port reservation table.
#[derive(Debug, Clone, Serialize)]
pub struct PortRow {
    pub port: u16,
    pub service: ServiceId,
    pub status: PortStatus,
    pub auto_start: bool,
    pub dependencies: Vec<ServiceId>,
    pub last_used: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DaemonStatus {
    pub running: bool,
    pub pid: u32,
    pub started_at: DateTime<Utc>,
    pub uptime_secs: i64,
    pub root: PathBuf,
    pub socket: PathBuf,
    /// Paths still inside their settle window.
    pub settling: usize,
    pub sync: SyncSnapshot,
    pub services: Vec<ServiceView>,
    pub ports: Vec<PortRow>,
}

impl DaemonStatus {
    pub fn build(
        root: PathBuf,
        socket: PathBuf,
        started_at: DateTime<Utc>,
        now: DateTime<Utc>,
        settling: usize,
        sync: SyncSnapshot,
        fleet: FleetSnapshot,
    ) -> Self {
        let ports = fleet
            .ports
            .into_iter()
            .map(|(port, reservation)| PortRow {
                port,
                service: reservation.service,
                status: reservation.status,
                auto_start: reservation.auto_start,
                dependencies: reservation.dependencies,
                last_used: reservation.last_used,
            })
            .collect();
        Self {
            running: true,
            pid: std::process::id(),
            started_at,
            uptime_secs: (now - started_at).num_seconds().max(0),
            root,
            socket,
            settling,
            sync,
            services: fleet.services,
            ports,
        }
    }
}
