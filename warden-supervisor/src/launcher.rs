//! Dependency-ordered launching of the service registry.
//!
//! [`Fleet`] owns the registry, the port table, the supervisor state and the
//! spawner. The daemon drives it from its event loop; every method is
//! synchronous and takes `now` explicitly.

use std::path::{Path, PathBuf};
use std::time::Instant;

use serde::Serialize;

use warden_core::{ServiceDescriptor, ServiceId, WardenConfig};

use crate::error::SupervisorError;
use crate::ports::{PortAllocator, PortReservation};
use crate::spawn::{ProcessExit, SpawnRequest, Spawner};
use crate::supervisor::{ExitAction, ProcessRecord, RestartPolicy, ServiceView, Supervisor};

/// Result of a launcher pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LaunchReport {
    /// `(service, port, pid)` for every process started.
    pub started: Vec<(ServiceId, u16, u32)>,
    /// Services held back, with the dependencies that are not active.
    pub blocked: Vec<(ServiceId, Vec<ServiceId>)>,
    /// Services whose spawn failed, with the supervisor's decision.
    pub failed: Vec<(ServiceId, ExitAction)>,
}

/// What [`Fleet::restart_if_due`] did with a scheduled restart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestartOutcome {
    /// No restart is pending, or its delay has not elapsed.
    NotDue,
    Started { port: u16, pid: u32 },
    /// Dependencies are down; the restart stays pending for a later
    /// launcher pass and no budget is spent.
    Waiting(Vec<ServiceId>),
    /// The respawn failed and the supervisor decided again.
    Failed(ExitAction),
}

/// Serializable view of the fleet for the status surface.
#[derive(Debug, Clone, Serialize)]
pub struct FleetSnapshot {
    pub services: Vec<ServiceView>,
    pub ports: Vec<(u16, PortReservation)>,
}

pub struct Fleet {
    registry: Vec<ServiceDescriptor>,
    ports: PortAllocator,
    supervisor: Supervisor,
    spawner: Box<dyn Spawner>,
    root: PathBuf,
    service_logs: PathBuf,
}

impl Fleet {
    /// Build the fleet and record static port reservations in registry order.
    /// A fixed port already owned by an earlier service is left for
    /// auto-assignment at launch.
    pub fn new(
        config: &WardenConfig,
        root: impl Into<PathBuf>,
        service_logs: impl Into<PathBuf>,
        spawner: Box<dyn Spawner>,
    ) -> Self {
        let mut ports = PortAllocator::new(config.supervisor.port_floor);
        let mut supervisor = Supervisor::new(RestartPolicy::from(&config.supervisor));
        for descriptor in &config.services {
            supervisor.register(descriptor.id.clone(), config.max_restarts_for(descriptor));
            if let Some(port) = descriptor.port {
                if !ports.reserve_static(descriptor) {
                    tracing::warn!(
                        service = %descriptor.id,
                        port,
                        "port already reserved; a free port will be assigned at launch"
                    );
                }
            }
        }
        Self {
            registry: config.services.clone(),
            ports,
            supervisor,
            spawner,
            root: root.into(),
            service_logs: service_logs.into(),
        }
    }

    pub fn ports(&self) -> &PortAllocator {
        &self.ports
    }

    pub fn supervisor(&self) -> &Supervisor {
        &self.supervisor
    }

    pub fn registry(&self) -> &[ServiceDescriptor] {
        &self.registry
    }

    pub fn descriptor(&self, service: &ServiceId) -> Option<&ServiceDescriptor> {
        self.registry.iter().find(|d| &d.id == service)
    }

    /// Dependencies of `service` whose reservation is not active. Unknown
    /// dependencies are unmet.
    pub fn missing_dependencies(&self, service: &ServiceId) -> Vec<ServiceId> {
        self.descriptor(service)
            .map(|d| {
                d.dependencies
                    .iter()
                    .filter(|dep| !self.ports.is_active(dep))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn can_start(&self, service: &ServiceId) -> bool {
        self.descriptor(service).is_some() && self.missing_dependencies(service).is_empty()
    }

    /// Start every auto-start service whose dependencies are active, along
    /// with due restarts that were waiting on a dependency.
    ///
    /// Repeats until a pass starts nothing new, so dependents of a service
    /// started in this call come up in the same call regardless of registry
    /// order.
    pub fn launch_pass(&mut self, now: Instant) -> LaunchReport {
        let mut report = LaunchReport::default();
        loop {
            let mut progressed = false;
            report.blocked.clear();
            let candidates: Vec<ServiceId> = self
                .registry
                .iter()
                .filter(|d| {
                    (d.auto_start && self.supervisor.is_launchable(&d.id))
                        || self.supervisor.restart_due(&d.id, now)
                })
                .map(|d| d.id.clone())
                .collect();

            for id in candidates {
                let missing = self.missing_dependencies(&id);
                if !missing.is_empty() {
                    report.blocked.push((id, missing));
                    continue;
                }
                match self.start(&id, now) {
                    Ok((port, pid)) => {
                        report.started.push((id, port, pid));
                        progressed = true;
                    }
                    Err(action) => report.failed.push((id, action)),
                }
            }
            if !progressed {
                break;
            }
        }
        for (id, missing) in &report.blocked {
            tracing::info!(
                service = %id,
                "waiting on {}",
                missing.iter().map(|m| m.0.as_str()).collect::<Vec<_>>().join(", ")
            );
        }
        report
    }

    /// Manual start: resets the restart budget and starts the service if its
    /// dependencies are active.
    pub fn start_manual(&mut self, service: &ServiceId, now: Instant) -> Result<LaunchReport, SupervisorError> {
        if self.descriptor(service).is_none() {
            return Err(SupervisorError::UnknownService(service.0.clone()));
        }
        if self.supervisor.is_running(service) {
            return Err(SupervisorError::AlreadyRunning(service.0.clone()));
        }
        let missing = self.missing_dependencies(service);
        if !missing.is_empty() {
            return Err(SupervisorError::DependenciesNotMet {
                service: service.0.clone(),
                missing: missing.iter().map(|m| m.0.as_str()).collect::<Vec<_>>().join(", "),
            });
        }
        self.supervisor.reset(service);

        let mut report = LaunchReport::default();
        match self.start(service, now) {
            Ok((port, pid)) => {
                report.started.push((service.clone(), port, pid));
                // Dependents may now be startable.
                let more = self.launch_pass(now);
                report.started.extend(more.started);
                report.blocked = more.blocked;
                report.failed.extend(more.failed);
            }
            Err(action) => report.failed.push((service.clone(), action)),
        }
        Ok(report)
    }

    /// Respawn a service whose restart delay has elapsed, provided its
    /// dependencies are active.
    pub fn restart_if_due(&mut self, service: &ServiceId, now: Instant) -> RestartOutcome {
        if !self.supervisor.restart_due(service, now) {
            return RestartOutcome::NotDue;
        }
        let missing = self.missing_dependencies(service);
        if !missing.is_empty() {
            tracing::info!(
                service = %service,
                "restart held until {} is active",
                missing.iter().map(|m| m.0.as_str()).collect::<Vec<_>>().join(", ")
            );
            return RestartOutcome::Waiting(missing);
        }
        match self.start(service, now) {
            Ok((port, pid)) => RestartOutcome::Started { port, pid },
            Err(action) => RestartOutcome::Failed(action),
        }
    }

    /// Apply a process exit reported by the spawner.
    pub fn handle_exit(&mut self, exit: &ProcessExit, now: Instant) -> ExitAction {
        let port = self.running_record(&exit.service).map(|r| r.port);
        let action = self
            .supervisor
            .on_exit(&exit.service, exit.pid, exit.code, now);
        if action != ExitAction::Ignored {
            if let Some(port) = port {
                self.ports.mark_stopped(port);
            }
        }
        action
    }

    /// Probe every tracked pid; dead ones are handled exactly like exits.
    pub fn poll_liveness(&mut self, now: Instant) -> Vec<(ServiceId, ExitAction)> {
        let dead: Vec<ProcessRecord> = self
            .supervisor
            .running()
            .into_iter()
            .filter(|record| !self.spawner.is_alive(record.pid))
            .collect();
        dead.into_iter()
            .map(|record| {
                tracing::warn!(service = %record.service, pid = record.pid, "process found dead by poll");
                let exit = ProcessExit {
                    service: record.service.clone(),
                    pid: record.pid,
                    code: None,
                };
                (record.service, self.handle_exit(&exit, now))
            })
            .collect()
    }

    pub fn set_reachable(&mut self, service: &ServiceId, reachable: bool) {
        self.supervisor.set_reachable(service, reachable);
    }

    /// `(service, port)` for every running process.
    pub fn running_ports(&self) -> Vec<(ServiceId, u16)> {
        self.supervisor
            .running()
            .into_iter()
            .map(|r| (r.service, r.port))
            .collect()
    }

    /// SIGTERM every running process group without waiting.
    pub fn shutdown(&mut self) {
        for record in self.supervisor.running() {
            tracing::info!(service = %record.service, pid = record.pid, "terminating");
            self.spawner.terminate(record.pid);
            self.ports.mark_stopped(record.port);
            self.supervisor.mark_terminated(&record.service);
        }
    }

    pub fn snapshot(&self) -> FleetSnapshot {
        FleetSnapshot {
            services: self.supervisor.views(|id| self.ports.port_of(id)),
            ports: self.ports.snapshot(),
        }
    }

    fn running_record(&self, service: &ServiceId) -> Option<ProcessRecord> {
        self.supervisor
            .running()
            .into_iter()
            .find(|r| &r.service == service)
    }

    /// Resolve the port, spawn, and record the process. On failure the
    /// supervisor's decision is returned.
    fn start(&mut self, service: &ServiceId, now: Instant) -> Result<(u16, u32), ExitAction> {
        let Some(descriptor) = self.descriptor(service).cloned() else {
            return Err(ExitAction::Ignored);
        };

        let port = match self.ports.port_of(service) {
            Some(port) => port,
            None => match self.ports.auto_assign(service.clone()) {
                Ok(port) => {
                    tracing::info!(service = %service, port, "auto-assigned port");
                    port
                }
                Err(e) => {
                    tracing::error!(service = %service, error = %e, "no port available");
                    return Err(self.supervisor.on_spawn_failure(service, now));
                }
            },
        };

        let request = SpawnRequest {
            service: service.clone(),
            command: descriptor.start_command.clone(),
            cwd: resolve_cwd(&self.root, descriptor.cwd.as_deref()),
            env: descriptor.env.clone(),
            port,
            log_path: self.service_logs.join(format!("{}.log", service.0)),
        };

        match self.spawner.spawn(&request) {
            Ok(pid) => {
                self.ports.mark_active(port);
                self.supervisor.record_spawn(service, pid, port);
                Ok((port, pid))
            }
            Err(e) => {
                tracing::error!(service = %service, error = %e, "spawn failed");
                Err(self.supervisor.on_spawn_failure(service, now))
            }
        }
    }
}

fn resolve_cwd(root: &Path, cwd: Option<&Path>) -> PathBuf {
    match cwd {
        Some(dir) if dir.is_absolute() => dir.to_path_buf(),
        Some(dir) => root.join(dir),
        None => root.to_path_buf(),
    }
}
