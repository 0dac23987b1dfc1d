//! Per-service process state and the bounded restart policy.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;

use warden_core::{ServiceId, SupervisorConfig};

/// A live process owned by the supervisor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessRecord {
    pub service: ServiceId,
    pub pid: u32,
    pub port: u16,
    pub started_at: DateTime<Utc>,
    pub restart_count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceState {
    NotStarted,
    Running(ProcessRecord),
    PendingRestart { due: Instant },
    /// Budget spent or auto-restart disabled; only a manual start revives it.
    Stopped,
}

impl ServiceState {
    pub fn label(&self) -> &'static str {
        match self {
            ServiceState::NotStarted => "not-started",
            ServiceState::Running(_) => "running",
            ServiceState::PendingRestart { .. } => "restarting",
            ServiceState::Stopped => "stopped",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestartPolicy {
    pub enabled: bool,
    pub delay: Duration,
}

impl From<&SupervisorConfig> for RestartPolicy {
    fn from(config: &SupervisorConfig) -> Self {
        Self {
            enabled: config.auto_restart,
            delay: config.restart_delay,
        }
    }
}

/// What the supervisor decided after a process ended or failed to start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitAction {
    /// The pid was not the current one for this service.
    Ignored,
    RestartScheduled { delay: Duration, attempt: u32 },
    PermanentlyStopped,
}

#[derive(Debug, Clone)]
struct Tracked {
    max_restarts: u32,
    restart_count: u32,
    state: ServiceState,
    last_exit_code: Option<i32>,
    reachable: Option<bool>,
}

/// Serializable view of one service.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceView {
    pub id: ServiceId,
    pub status: &'static str,
    pub pid: Option<u32>,
    pub port: Option<u16>,
    pub started_at: Option<DateTime<Utc>>,
    pub restart_count: u32,
    pub max_restarts: u32,
    pub last_exit_code: Option<i32>,
    pub reachable: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct Supervisor {
    policy: RestartPolicy,
    services: BTreeMap<ServiceId, Tracked>,
}

impl Supervisor {
    pub fn new(policy: RestartPolicy) -> Self {
        Self {
            policy,
            services: BTreeMap::new(),
        }
    }

    pub fn policy(&self) -> RestartPolicy {
        self.policy
    }

    /// Start tracking a service with the given restart budget.
    pub fn register(&mut self, service: ServiceId, max_restarts: u32) {
        self.services.entry(service).or_insert(Tracked {
            max_restarts,
            restart_count: 0,
            state: ServiceState::NotStarted,
            last_exit_code: None,
            reachable: None,
        });
    }

    pub fn state(&self, service: &ServiceId) -> Option<&ServiceState> {
        self.services.get(service).map(|t| &t.state)
    }

    pub fn restart_count(&self, service: &ServiceId) -> Option<u32> {
        self.services.get(service).map(|t| t.restart_count)
    }

    /// Only never-started services are picked up by a launcher pass.
    pub fn is_launchable(&self, service: &ServiceId) -> bool {
        matches!(self.state(service), Some(ServiceState::NotStarted))
    }

    pub fn is_running(&self, service: &ServiceId) -> bool {
        matches!(self.state(service), Some(ServiceState::Running(_)))
    }

    pub fn record_spawn(&mut self, service: &ServiceId, pid: u32, port: u16) {
        if let Some(tracked) = self.services.get_mut(service) {
            tracked.reachable = None;
            tracked.state = ServiceState::Running(ProcessRecord {
                service: service.clone(),
                pid,
                port,
                started_at: Utc::now(),
                restart_count: tracked.restart_count,
            });
        }
    }

    /// Handle a process exit. Exits for a pid that is no longer current are
    /// ignored so one crash is never counted twice.
    pub fn on_exit(
        &mut self,
        service: &ServiceId,
        pid: u32,
        code: Option<i32>,
        now: Instant,
    ) -> ExitAction {
        let Some(tracked) = self.services.get_mut(service) else {
            return ExitAction::Ignored;
        };
        match &tracked.state {
            ServiceState::Running(record) if record.pid == pid => {}
            _ => return ExitAction::Ignored,
        }
        tracked.last_exit_code = code;
        tracing::warn!(service = %service, pid, code = ?code, "process exited");
        self.fail(service, now)
    }

    /// A spawn attempt failed; consumes the budget exactly like a crash.
    pub fn on_spawn_failure(&mut self, service: &ServiceId, now: Instant) -> ExitAction {
        if !self.services.contains_key(service) {
            return ExitAction::Ignored;
        }
        self.fail(service, now)
    }

    fn fail(&mut self, service: &ServiceId, now: Instant) -> ExitAction {
        let policy = self.policy;
        let Some(tracked) = self.services.get_mut(service) else {
            return ExitAction::Ignored;
        };
        tracked.reachable = None;
        if policy.enabled && tracked.restart_count < tracked.max_restarts {
            tracked.restart_count += 1;
            tracked.state = ServiceState::PendingRestart {
                due: now + policy.delay,
            };
            tracing::info!(
                service = %service,
                "restart {}/{} in {:?}",
                tracked.restart_count,
                tracked.max_restarts,
                policy.delay
            );
            ExitAction::RestartScheduled {
                delay: policy.delay,
                attempt: tracked.restart_count,
            }
        } else {
            tracked.state = ServiceState::Stopped;
            tracing::error!(
                service = %service,
                "stopped permanently after {} restart(s)",
                tracked.restart_count
            );
            ExitAction::PermanentlyStopped
        }
    }

    /// True when a scheduled restart has come due.
    pub fn restart_due(&self, service: &ServiceId, now: Instant) -> bool {
        matches!(
            self.state(service),
            Some(ServiceState::PendingRestart { due }) if *due <= now
        )
    }

    /// Reset the budget and return a non-running service to `NotStarted`.
    /// Returns `false` if the service is unknown or currently running.
    pub fn reset(&mut self, service: &ServiceId) -> bool {
        let Some(tracked) = self.services.get_mut(service) else {
            return false;
        };
        if matches!(tracked.state, ServiceState::Running(_)) {
            return false;
        }
        tracked.restart_count = 0;
        tracked.state = ServiceState::NotStarted;
        true
    }

    /// Forget the running process without counting it as a crash.
    pub fn mark_terminated(&mut self, service: &ServiceId) {
        if let Some(tracked) = self.services.get_mut(service) {
            if matches!(tracked.state, ServiceState::Running(_)) {
                tracked.state = ServiceState::Stopped;
            }
        }
    }

    pub fn set_reachable(&mut self, service: &ServiceId, reachable: bool) {
        if let Some(tracked) = self.services.get_mut(service) {
            if matches!(tracked.state, ServiceState::Running(_)) {
                tracked.reachable = Some(reachable);
            }
        }
    }

    pub fn running(&self) -> Vec<ProcessRecord> {
        self.services
            .values()
            .filter_map(|t| match &t.state {
                ServiceState::Running(record) => Some(record.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn views(&self, ports: impl Fn(&ServiceId) -> Option<u16>) -> Vec<ServiceView> {
        self.services
            .iter()
            .map(|(id, t)| {
                let record = match &t.state {
                    ServiceState::Running(record) => Some(record),
                    _ => None,
                };
                ServiceView {
                    id: id.clone(),
                    status: t.state.label(),
                    pid: record.map(|r| r.pid),
                    port: record.map(|r| r.port).or_else(|| ports(id)),
                    started_at: record.map(|r| r.started_at),
                    restart_count: t.restart_count,
                    max_restarts: t.max_restarts,
                    last_exit_code: t.last_exit_code,
                    reachable: t.reachable,
                }
            })
            .collect()
    }
}
