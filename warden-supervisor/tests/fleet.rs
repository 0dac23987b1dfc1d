//! Launcher ordering, port fallback and restart budget against a fake spawner.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use warden_core::{ServiceDescriptor, ServiceId, WardenConfig};
use warden_supervisor::{
    ExitAction, Fleet, LaunchReport, ProcessExit, RestartOutcome, ServiceState, SpawnRequest,
    Spawner, SupervisorError,
};

// ---------------------------------------------------------------------------
// Fake spawner
// ---------------------------------------------------------------------------

#[derive(Default)]
struct FakeState {
    next_pid: u32,
    spawned: Vec<SpawnRequest>,
    failing: HashSet<String>,
    dead: HashSet<u32>,
    terminated: Vec<u32>,
}

#[derive(Clone, Default)]
struct FakeSpawner(Arc<Mutex<FakeState>>);

impl FakeSpawner {
    fn fail(&self, service: &str) {
        self.0.lock().unwrap().failing.insert(service.to_string());
    }

    fn recover(&self, service: &str) {
        self.0.lock().unwrap().failing.remove(service);
    }

    fn kill(&self, pid: u32) {
        self.0.lock().unwrap().dead.insert(pid);
    }

    fn spawned(&self) -> Vec<String> {
        self.0
            .lock()
            .unwrap()
            .spawned
            .iter()
            .map(|r| r.service.0.clone())
            .collect()
    }

    fn last_request(&self, service: &str) -> Option<SpawnRequest> {
        self.0
            .lock()
            .unwrap()
            .spawned
            .iter()
            .rev()
            .find(|r| r.service.0 == service)
            .cloned()
    }
}

impl Spawner for FakeSpawner {
    fn spawn(&self, request: &SpawnRequest) -> Result<u32, SupervisorError> {
        let mut state = self.0.lock().unwrap();
        if state.failing.contains(&request.service.0) {
            return Err(SupervisorError::Spawn {
                service: request.service.0.clone(),
                message: "command not found".to_string(),
            });
        }
        state.next_pid += 1;
        let pid = 1000 + state.next_pid;
        state.spawned.push(request.clone());
        Ok(pid)
    }

    fn is_alive(&self, pid: u32) -> bool {
        !self.0.lock().unwrap().dead.contains(&pid)
    }

    fn terminate(&self, pid: u32) {
        self.0.lock().unwrap().terminated.push(pid);
    }
}

fn fleet(services: Vec<ServiceDescriptor>) -> (Fleet, FakeSpawner) {
    let config = WardenConfig {
        services,
        ..WardenConfig::default()
    };
    let spawner = FakeSpawner::default();
    let fleet = Fleet::new(
        &config,
        "/work/repo",
        "/work/repo/.warden/logs/services",
        Box::new(spawner.clone()),
    );
    (fleet, spawner)
}

fn id(name: &str) -> ServiceId {
    ServiceId::from(name)
}

fn pid_of(fleet: &Fleet, name: &str) -> u32 {
    match fleet.supervisor().state(&id(name)) {
        Some(ServiceState::Running(record)) => record.pid,
        other => panic!("{name} not running: {other:?}"),
    }
}

fn scheduled_restarts(report: &LaunchReport) -> usize {
    report
        .failed
        .iter()
        .filter(|(_, action)| matches!(action, ExitAction::RestartScheduled { .. }))
        .count()
}

fn crash(fleet: &mut Fleet, name: &str, now: Instant) -> ExitAction {
    let exit = ProcessExit {
        service: id(name),
        pid: pid_of(fleet, name),
        code: Some(1),
    };
    fleet.handle_exit(&exit, now)
}

// ---------------------------------------------------------------------------
// Launch ordering
// ---------------------------------------------------------------------------

#[test]
fn dependents_start_in_the_same_pass_regardless_of_order() {
    let (mut fleet, spawner) = fleet(vec![
        ServiceDescriptor::new("wallet", "npm start")
            .with_port(5001)
            .with_dependencies(["pss"]),
        ServiceDescriptor::new("pss", "npm run dev").with_port(4001),
    ]);

    let report = fleet.launch_pass(Instant::now());

    assert_eq!(spawner.spawned(), vec!["pss", "wallet"]);
    assert_eq!(report.started.len(), 2);
    assert!(report.blocked.is_empty());
    assert!(fleet.ports().is_active(&id("wallet")));

    let wallet = spawner.last_request("wallet").expect("wallet spawned");
    assert_eq!(wallet.port, 5001);
    assert_eq!(wallet.cwd, std::path::PathBuf::from("/work/repo"));
    assert_eq!(
        wallet.log_path,
        std::path::PathBuf::from("/work/repo/.warden/logs/services/wallet.log")
    );
}

#[test]
fn unmet_dependency_is_never_spawned() {
    let (mut fleet, spawner) = fleet(vec![
        ServiceDescriptor::new("pss", "npm run dev").with_port(4001),
        ServiceDescriptor::new("wallet", "npm start").with_dependencies(["pss"]),
        ServiceDescriptor::new("orphan", "npm start").with_dependencies(["missing"]),
    ]);
    spawner.fail("pss");

    let report = fleet.launch_pass(Instant::now());

    assert!(spawner.spawned().is_empty());
    let blocked: Vec<&str> = report.blocked.iter().map(|(s, _)| s.0.as_str()).collect();
    assert_eq!(blocked, vec!["wallet", "orphan"]);
    assert!(!fleet.can_start(&id("orphan")));
    assert_eq!(scheduled_restarts(&report), 1, "pss spawn failure schedules a restart");
}

#[test]
fn auto_start_false_is_left_alone() {
    let (mut fleet, spawner) = fleet(vec![
        ServiceDescriptor::new("tools", "npm run tools").with_auto_start(false),
    ]);
    fleet.launch_pass(Instant::now());
    assert!(spawner.spawned().is_empty());

    fleet
        .start_manual(&id("tools"), Instant::now())
        .expect("manual start");
    assert_eq!(spawner.spawned(), vec!["tools"]);
}

// ---------------------------------------------------------------------------
// Ports
// ---------------------------------------------------------------------------

#[test]
fn colliding_static_port_falls_back_to_auto_assign() {
    let (mut fleet, spawner) = fleet(vec![
        ServiceDescriptor::new("svc-a", "a").with_port(4001),
        ServiceDescriptor::new("svc-b", "b").with_port(4001),
        ServiceDescriptor::new("svc-c", "c"),
    ]);
    fleet.launch_pass(Instant::now());

    let a = spawner.last_request("svc-a").expect("a").port;
    let b = spawner.last_request("svc-b").expect("b").port;
    let c = spawner.last_request("svc-c").expect("c").port;
    assert_eq!(a, 4001);
    assert!(b >= 7000 && b != 4001, "b got {b}");
    assert!(c >= 7000 && c != b, "c got {c}");
    assert_eq!(
        fleet.ports().get(4001).map(|r| r.service.clone()),
        Some(id("svc-a"))
    );
}

#[test]
fn exit_returns_port_to_reserved() {
    let (mut fleet, _spawner) = fleet(vec![ServiceDescriptor::new("api", "x").with_port(4100)]);
    let now = Instant::now();
    fleet.launch_pass(now);
    assert!(fleet.ports().is_active(&id("api")));

    crash(&mut fleet, "api", now);
    assert!(!fleet.ports().is_active(&id("api")));
    assert_eq!(fleet.ports().port_of(&id("api")), Some(4100));
}

// ---------------------------------------------------------------------------
// Restart budget
// ---------------------------------------------------------------------------

#[test]
fn restart_budget_then_permanent_stop() {
    let (mut fleet, spawner) = fleet(vec![
        ServiceDescriptor::new("flaky", "npm start").with_max_restarts(5),
    ]);
    let mut now = Instant::now();
    fleet.launch_pass(now);

    for attempt in 1..=5 {
        let action = crash(&mut fleet, "flaky", now);
        assert_eq!(
            action,
            ExitAction::RestartScheduled {
                delay: Duration::from_secs(3),
                attempt
            }
        );
        assert_eq!(
            fleet.restart_if_due(&id("flaky"), now),
            RestartOutcome::NotDue,
            "not yet due"
        );
        now += Duration::from_secs(3);
        assert!(matches!(
            fleet.restart_if_due(&id("flaky"), now),
            RestartOutcome::Started { .. }
        ));
    }
    assert_eq!(spawner.spawned().len(), 6);

    let old_pid = pid_of(&fleet, "flaky");
    assert_eq!(crash(&mut fleet, "flaky", now), ExitAction::PermanentlyStopped);
    assert_eq!(fleet.supervisor().state(&id("flaky")), Some(&ServiceState::Stopped));

    // No automatic path revives it.
    now += Duration::from_secs(60);
    assert_eq!(fleet.restart_if_due(&id("flaky"), now), RestartOutcome::NotDue);
    fleet.launch_pass(now);
    let stale = ProcessExit {
        service: id("flaky"),
        pid: old_pid,
        code: Some(1),
    };
    assert_eq!(fleet.handle_exit(&stale, now), ExitAction::Ignored);
    assert_eq!(spawner.spawned().len(), 6);
    assert_eq!(fleet.supervisor().restart_count(&id("flaky")), Some(5));

    // Manual start resets the budget.
    fleet.start_manual(&id("flaky"), now).expect("manual start");
    assert_eq!(spawner.spawned().len(), 7);
    assert_eq!(fleet.supervisor().restart_count(&id("flaky")), Some(0));
}

#[test]
fn due_restart_waits_for_its_dependency() {
    let (mut fleet, spawner) = fleet(vec![
        ServiceDescriptor::new("pss", "npm run dev").with_port(4001),
        ServiceDescriptor::new("wallet", "npm start").with_dependencies(["pss"]),
    ]);
    let mut now = Instant::now();
    fleet.launch_pass(now);
    assert_eq!(spawner.spawned(), vec!["pss", "wallet"]);

    spawner.fail("pss");
    crash(&mut fleet, "pss", now);
    crash(&mut fleet, "wallet", now);
    now += Duration::from_secs(3);

    assert!(matches!(
        fleet.restart_if_due(&id("pss"), now),
        RestartOutcome::Failed(ExitAction::RestartScheduled { attempt: 2, .. })
    ));
    assert_eq!(
        fleet.restart_if_due(&id("wallet"), now),
        RestartOutcome::Waiting(vec![id("pss")])
    );
    assert_eq!(spawner.spawned().len(), 2, "wallet is not spawned while pss is down");
    assert_eq!(fleet.supervisor().restart_count(&id("wallet")), Some(1));

    // Holding does not spend the budget, however often it is asked.
    assert!(matches!(
        fleet.restart_if_due(&id("wallet"), now),
        RestartOutcome::Waiting(_)
    ));
    assert_eq!(fleet.supervisor().restart_count(&id("wallet")), Some(1));

    spawner.recover("pss");
    now += Duration::from_secs(3);
    assert!(matches!(
        fleet.restart_if_due(&id("pss"), now),
        RestartOutcome::Started { port: 4001, .. }
    ));
    let report = fleet.launch_pass(now);
    let started: Vec<&str> = report.started.iter().map(|(s, _, _)| s.0.as_str()).collect();
    assert_eq!(started, vec!["wallet"]);
    assert!(fleet.supervisor().is_running(&id("wallet")));
    assert_eq!(fleet.supervisor().restart_count(&id("wallet")), Some(1));
}

#[test]
fn three_crashes_leave_service_eligible() {
    let (mut fleet, _spawner) = fleet(vec![ServiceDescriptor::new("api", "x").with_max_restarts(5)]);
    let mut now = Instant::now();
    fleet.launch_pass(now);
    for _ in 0..3 {
        assert!(matches!(
            crash(&mut fleet, "api", now),
            ExitAction::RestartScheduled { .. }
        ));
        now += Duration::from_secs(3);
        fleet.restart_if_due(&id("api"), now);
    }
    assert!(fleet.supervisor().is_running(&id("api")));
    assert_eq!(fleet.supervisor().restart_count(&id("api")), Some(3));
}

#[test]
fn spawn_failures_consume_the_budget() {
    let (mut fleet, spawner) = fleet(vec![ServiceDescriptor::new("api", "x").with_max_restarts(2)]);
    spawner.fail("api");
    let mut now = Instant::now();

    let report = fleet.launch_pass(now);
    assert_eq!(scheduled_restarts(&report), 1);
    now += Duration::from_secs(3);
    assert_eq!(
        fleet.restart_if_due(&id("api"), now),
        RestartOutcome::Failed(ExitAction::RestartScheduled {
            delay: Duration::from_secs(3),
            attempt: 2
        })
    );
    now += Duration::from_secs(3);
    assert_eq!(
        fleet.restart_if_due(&id("api"), now),
        RestartOutcome::Failed(ExitAction::PermanentlyStopped)
    );

    spawner.recover("api");
    now += Duration::from_secs(3);
    assert_eq!(fleet.restart_if_due(&id("api"), now), RestartOutcome::NotDue);
}

#[test]
fn poll_and_exit_for_the_same_death_count_once() {
    let (mut fleet, spawner) = fleet(vec![ServiceDescriptor::new("api", "x")]);
    let now = Instant::now();
    fleet.launch_pass(now);
    let pid = pid_of(&fleet, "api");

    spawner.kill(pid);
    let polled = fleet.poll_liveness(now);
    assert_eq!(polled.len(), 1);
    assert!(matches!(polled[0].1, ExitAction::RestartScheduled { attempt: 1, .. }));

    let late_exit = ProcessExit {
        service: id("api"),
        pid,
        code: None,
    };
    assert_eq!(fleet.handle_exit(&late_exit, now), ExitAction::Ignored);
    assert_eq!(fleet.supervisor().restart_count(&id("api")), Some(1));
}

#[test]
fn shutdown_terminates_every_running_group() {
    let (mut fleet, spawner) = fleet(vec![
        ServiceDescriptor::new("a", "x"),
        ServiceDescriptor::new("b", "y"),
    ]);
    fleet.launch_pass(Instant::now());
    let pids = vec![pid_of(&fleet, "a"), pid_of(&fleet, "b")];

    fleet.shutdown();

    let mut terminated = spawner.0.lock().unwrap().terminated.clone();
    terminated.sort_unstable();
    assert_eq!(terminated, pids);
    assert!(fleet.running_ports().is_empty());
}

#[test]
fn manual_start_errors() {
    let (mut fleet, _spawner) = fleet(vec![
        ServiceDescriptor::new("pss", "x").with_auto_start(false),
        ServiceDescriptor::new("wallet", "y").with_dependencies(["pss"]),
    ]);
    let now = Instant::now();
    assert!(matches!(
        fleet.start_manual(&id("nope"), now),
        Err(SupervisorError::UnknownService(_))
    ));
    let err = fleet.start_manual(&id("wallet"), now).unwrap_err();
    assert!(err.to_string().contains("pss"), "{err}");

    let report = fleet.start_manual(&id("pss"), now).expect("start pss");
    let started: Vec<&str> = report.started.iter().map(|(s, _, _)| s.0.as_str()).collect();
    assert_eq!(started, vec!["pss", "wallet"]);
    assert!(matches!(
        fleet.start_manual(&id("pss"), now),
        Err(SupervisorError::AlreadyRunning(_))
    ));
}
