use std::fs;
use std::io::{self, ErrorKind};
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::Instant;
use tracing_subscriber::fmt::MakeWriter;

use warden_core::{ServiceId, WardenConfig};
use warden_supervisor::{
    ExitAction, Fleet, LaunchReport, ProcessExit, ProcessSpawner, RestartOutcome, Spawner,
};
use warden_sync::engine::PullDropReason;
use warden_sync::{
    preflight, run_pull_cycle, run_push_cycle, ChangeAggregator, ChangeKind, EngineSettings, GitCli,
    PullDecision, PullOutcome, PullReport, PushDecision, PushOutcome, PushReport, SyncEngine,
    SyncTrigger, Vcs,
};

use crate::error::{io_err, DaemonError};
use crate::paths::{
    daemon_log_path, logs_dir, service_logs_dir, socket_path, warden_dir, REPORT_INTERVAL,
    ROTATION_INTERVAL,
};
use crate::protocol::{DaemonRequest, DaemonResponse};
use crate::scheduler::{sleep_until_opt, Scheduler};
use crate::status::DaemonStatus;
use crate::watcher::watch_tree;

/// Timers owned by the event loop.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum TimerKey {
    PushInterval,
    PullInterval,
    PushRetry,
    Restart(ServiceId),
    LivenessPoll,
    Rotation,
    PerformanceReport,
}

enum RuntimeEvent {
    FileChanged { kind: ChangeKind, path: PathBuf },
    PushDone(PushReport),
    PullDone(PullReport),
    Reachability(Vec<(ServiceId, bool)>),
    Command {
        request: DaemonRequest,
        respond_to: oneshot::Sender<DaemonResponse>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

/// Injected collaborators; [`Daemon::init`] builds the real ones.
pub struct DaemonParts {
    pub vcs: Arc<dyn Vcs>,
    pub spawner: Box<dyn Spawner>,
    pub exits: mpsc::UnboundedReceiver<ProcessExit>,
}

/// Cloneable sender side of the daemon's event queue.
#[derive(Clone)]
pub struct DaemonHandle {
    events: mpsc::UnboundedSender<RuntimeEvent>,
    shutdown: broadcast::Sender<()>,
}

impl DaemonHandle {
    pub fn file_changed(&self, kind: ChangeKind, path: impl Into<PathBuf>) -> Result<(), DaemonError> {
        self.events
            .send(RuntimeEvent::FileChanged {
                kind,
                path: path.into(),
            })
            .map_err(|_| DaemonError::ChannelClosed("daemon event queue"))
    }

    /// Submit a socket command and wait for its reply. `sync` and `pull`
    /// replies arrive once the cycle they started has finished.
    pub async fn request(&self, request: DaemonRequest) -> Result<DaemonResponse, DaemonError> {
        let (tx, rx) = oneshot::channel();
        self.events
            .send(RuntimeEvent::Command {
                request,
                respond_to: tx,
            })
            .map_err(|_| DaemonError::ChannelClosed("daemon event queue"))?;
        rx.await
            .map_err(|_| DaemonError::ChannelClosed("daemon response"))
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown.send(());
    }

    pub fn subscribe_shutdown(&self) -> broadcast::Receiver<()> {
        self.shutdown.subscribe()
    }
}

/// The daemon actor. All sync and supervision state lives here and is only
/// touched from [`Daemon::run_loop`].
pub struct Daemon {
    root: PathBuf,
    watch_root: PathBuf,
    config: WardenConfig,
    vcs: Arc<dyn Vcs>,
    aggregator: ChangeAggregator,
    engine: SyncEngine,
    fleet: Fleet,
    timers: Scheduler<TimerKey>,
    exits: mpsc::UnboundedReceiver<ProcessExit>,
    events_tx: mpsc::UnboundedSender<RuntimeEvent>,
    events_rx: mpsc::UnboundedReceiver<RuntimeEvent>,
    shutdown_tx: broadcast::Sender<()>,
    shutdown_rx: broadcast::Receiver<()>,
    push_waiters: Vec<oneshot::Sender<DaemonResponse>>,
    pull_waiters: Vec<oneshot::Sender<DaemonResponse>>,
    started_at: DateTime<Utc>,
    rotate_logs: bool,
}

/// Install logging, build a runtime and run the daemon for `root` until it
/// is stopped.
pub fn start_blocking(root: &Path) -> Result<(), DaemonError> {
    let root = fs::canonicalize(root).map_err(|e| io_err(root, e))?;
    ensure_runtime_dirs(&root)?;
    init_tracing(&root);
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(async move {
        let daemon = Daemon::init(&root).inspect_err(|err| {
            tracing::error!(error = %err, "daemon failed to initialize");
        })?;
        daemon.run().await
    })
}

impl Daemon {
    /// Load `warden.yaml`, run the repository pre-flight checks and wire the
    /// git CLI and process spawner.
    pub fn init(root: &Path) -> Result<Self, DaemonError> {
        let config = warden_core::config::load_at(root)?;
        let vcs: Arc<dyn Vcs> = Arc::new(GitCli::new(config.watch_root(root)));
        let (exits_tx, exits) = mpsc::unbounded_channel();
        let spawner = Box::new(ProcessSpawner::new(exits_tx));
        Self::with_parts(root, config, DaemonParts { vcs, spawner, exits })
    }

    pub fn with_parts(root: &Path, config: WardenConfig, parts: DaemonParts) -> Result<Self, DaemonError> {
        config.validate()?;
        // Watcher events carry resolved paths.
        let watch_root = config.watch_root(root);
        let watch_root = fs::canonicalize(&watch_root).map_err(|e| io_err(&watch_root, e))?;
        let resolved = preflight(parts.vcs.as_ref(), &watch_root, &config.sync)?;
        let aggregator = ChangeAggregator::new(watch_root.clone(), &config.watch)?;
        let engine = SyncEngine::new(EngineSettings::from_config(&config.sync, resolved.branch));
        let fleet = Fleet::new(&config, watch_root.clone(), service_logs_dir(root), parts.spawner);

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(16);
        Ok(Self {
            root: root.to_path_buf(),
            watch_root,
            config,
            vcs: parts.vcs,
            aggregator,
            engine,
            fleet,
            timers: Scheduler::new(),
            exits: parts.exits,
            events_tx,
            events_rx,
            shutdown_tx,
            shutdown_rx,
            push_waiters: Vec::new(),
            pull_waiters: Vec::new(),
            started_at: Utc::now(),
            rotate_logs: true,
        })
    }

    /// Disable the periodic log rotation timer.
    pub fn without_log_rotation(mut self) -> Self {
        self.rotate_logs = false;
        self
    }

    pub fn handle(&self) -> DaemonHandle {
        DaemonHandle {
            events: self.events_tx.clone(),
            shutdown: self.shutdown_tx.clone(),
        }
    }

    /// Start the watcher, the socket server and the signal handler, then run
    /// the event loop until `stop`, a signal, or a failing task.
    pub async fn run(self) -> Result<(), DaemonError> {
        ensure_runtime_dirs(&self.root)?;
        let handle = self.handle();

        let _watcher = {
            let handle = handle.clone();
            watch_tree(&self.watch_root, move |change| {
                let _ = handle.file_changed(change.kind, change.path);
            })?
        };

        let socket_handle = {
            let handle = handle.clone();
            let root = self.root.clone();
            tokio::spawn(async move {
                let result = socket_server_task(root, handle.clone()).await;
                handle.shutdown();
                result
            })
        };

        let signal_handle = {
            let handle = handle.clone();
            tokio::spawn(async move { signal_task(handle).await })
        };

        let loop_result = self.run_loop().await;
        handle.shutdown();

        let (socket_result, signal_result) = tokio::join!(socket_handle, signal_handle);
        handle_join("socket_server", socket_result)?;
        handle_join("signal_handler", signal_result)?;
        loop_result
    }

    /// The actor loop: file events, timers, cycle completions, process exits
    /// and commands, one at a time.
    pub async fn run_loop(mut self) -> Result<(), DaemonError> {
        self.schedule_periodic();
        tracing::info!(
            root = %self.watch_root.display(),
            remote = %self.engine.settings().remote,
            branch = %self.engine.settings().branch,
            services = self.fleet.registry().len(),
            "daemon started"
        );
        self.launch();

        loop {
            let deadline = self.next_deadline();
            tokio::select! {
                _ = self.shutdown_rx.recv() => break,
                Some(event) = self.events_rx.recv() => {
                    if self.on_event(event) == Flow::Stop {
                        break;
                    }
                }
                Some(exit) = self.exits.recv() => self.on_process_exit(exit),
                _ = sleep_until_opt(deadline) => self.on_deadline(),
            }
        }

        self.shutdown();
        Ok(())
    }

    fn shutdown(&mut self) {
        tracing::info!("daemon shutting down");
        self.fleet.shutdown();
        for waiter in self.push_waiters.drain(..).chain(self.pull_waiters.drain(..)) {
            let _ = waiter.send(DaemonResponse::error("daemon shutting down"));
        }
        let _ = self.shutdown_tx.send(());
    }

    fn schedule_periodic(&mut self) {
        let sync = &self.config.sync;
        self.timers.schedule_in(TimerKey::PushInterval, sync.push_interval);
        self.timers.schedule_in(TimerKey::PullInterval, sync.pull_interval);
        self.timers
            .schedule_in(TimerKey::LivenessPoll, self.config.supervisor.poll_interval);
        self.timers
            .schedule_in(TimerKey::PerformanceReport, REPORT_INTERVAL);
        if self.rotate_logs {
            self.timers.schedule_in(TimerKey::Rotation, ROTATION_INTERVAL);
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        let settle = self.aggregator.next_deadline().map(Instant::from_std);
        match (self.timers.next_deadline(), settle) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    // -----------------------------------------------------------------------
    // Events
    // -----------------------------------------------------------------------

    fn on_event(&mut self, event: RuntimeEvent) -> Flow {
        match event {
            RuntimeEvent::FileChanged { kind, path } => {
                self.aggregator.observe(kind, &path, now_std());
            }
            RuntimeEvent::PushDone(report) => self.on_push_done(report),
            RuntimeEvent::PullDone(report) => self.on_pull_done(report),
            RuntimeEvent::Reachability(results) => {
                for (service, reachable) in results {
                    if !reachable {
                        tracing::debug!(service = %service, "port not accepting connections");
                    }
                    self.fleet.set_reachable(&service, reachable);
                }
            }
            RuntimeEvent::Command {
                request,
                respond_to,
            } => return self.on_command(request, respond_to),
        }
        Flow::Continue
    }

    fn on_deadline(&mut self) {
        let settled = self.aggregator.take_settled(now_std());
        let mut critical = false;
        for change in settled {
            critical |= self.engine.record_change(change.path, change.priority);
        }
        if critical {
            let _ = self.request_push(SyncTrigger::Critical);
        }

        for key in self.timers.pop_due(Instant::now()) {
            self.on_timer(key);
        }
    }

    fn on_timer(&mut self, key: TimerKey) {
        match key {
            TimerKey::PushInterval => {
                self.timers
                    .schedule_in(TimerKey::PushInterval, self.config.sync.push_interval);
                let _ = self.request_push(SyncTrigger::Interval);
            }
            TimerKey::PullInterval => {
                self.timers
                    .schedule_in(TimerKey::PullInterval, self.config.sync.pull_interval);
                let _ = self.request_pull();
            }
            TimerKey::PushRetry => {
                let _ = self.request_push(SyncTrigger::Retry);
            }
            TimerKey::Restart(service) => self.restart(&service),
            TimerKey::LivenessPoll => {
                self.timers
                    .schedule_in(TimerKey::LivenessPoll, self.config.supervisor.poll_interval);
                self.poll_liveness();
            }
            TimerKey::Rotation => {
                self.timers.schedule_in(TimerKey::Rotation, ROTATION_INTERVAL);
                let root = self.root.clone();
                tokio::task::spawn_blocking(move || {
                    crate::log_rotation::rotate_logs(&root);
                });
            }
            TimerKey::PerformanceReport => {
                self.timers
                    .schedule_in(TimerKey::PerformanceReport, REPORT_INTERVAL);
                tracing::info!(
                    pending = self.engine.pending().len(),
                    "performance: {}",
                    self.engine.metrics().summary_line(Utc::now())
                );
            }
        }
    }

    // -----------------------------------------------------------------------
    // Sync
    // -----------------------------------------------------------------------

    /// Ask the engine for a push. `Err` carries why no cycle started.
    fn request_push(&mut self, trigger: SyncTrigger) -> Result<(), &'static str> {
        match self.engine.request_push(trigger, now_std()) {
            PushDecision::Start(plan) => {
                tracing::info!(
                    trigger = %plan.trigger,
                    files = plan.paths.len(),
                    force = plan.force,
                    "push cycle started"
                );
                let vcs = self.vcs.clone();
                let events = self.events_tx.clone();
                tokio::task::spawn_blocking(move || {
                    let report = run_push_cycle(vcs.as_ref(), &plan);
                    let _ = events.send(RuntimeEvent::PushDone(report));
                });
                Ok(())
            }
            PushDecision::Deferred => Err("deferred"),
            PushDecision::Delayed { wait, reason } => {
                tracing::debug!(?reason, ?wait, "push delayed");
                self.timers.schedule_earliest(TimerKey::PushRetry, wait);
                Err("delayed")
            }
            PushDecision::Skipped(_) => Err("nothing-pending"),
        }
    }

    fn on_push_done(&mut self, report: PushReport) {
        let retry = self.engine.complete_push(&report, now_std());
        if let Some(delay) = retry {
            self.timers.schedule_earliest(TimerKey::PushRetry, delay);
        }

        let response = match &report.outcome {
            PushOutcome::Pushed {
                files,
                forced,
                committed,
            } => DaemonResponse::ok(json!({
                "started": true,
                "outcome": "pushed",
                "files": files,
                "forced": forced,
                "committed": committed,
                "duration_ms": report.duration.as_millis() as u64,
            })),
            PushOutcome::NothingToCommit => DaemonResponse::ok(json!({
                "started": true,
                "outcome": "nothing-to-commit",
            })),
            PushOutcome::Failed { stage, error } => {
                DaemonResponse::error(format!("{stage} failed: {error}"))
            }
        };
        for waiter in self.push_waiters.drain(..) {
            let _ = waiter.send(response.clone());
        }
    }

    fn request_pull(&mut self) -> Result<(), &'static str> {
        match self.engine.request_pull(now_std()) {
            PullDecision::Start(plan) => {
                let vcs = self.vcs.clone();
                let events = self.events_tx.clone();
                tokio::task::spawn_blocking(move || {
                    let report = run_pull_cycle(vcs.as_ref(), &plan);
                    let _ = events.send(RuntimeEvent::PullDone(report));
                });
                Ok(())
            }
            PullDecision::Dropped(reason) => {
                tracing::debug!(?reason, "pull dropped");
                Err(match reason {
                    PullDropReason::AlreadyPulling => "already-pulling",
                    PullDropReason::PushInFlight => "push-in-flight",
                    PullDropReason::TooSoon => "too-soon",
                })
            }
        }
    }

    fn on_pull_done(&mut self, report: PullReport) {
        if let Some(delay) = self.engine.complete_pull(&report, now_std()) {
            self.timers.schedule_earliest(TimerKey::PushRetry, delay);
        }
        let response = match &report.outcome {
            PullOutcome::UpToDate => DaemonResponse::ok(json!({
                "started": true,
                "outcome": "up-to-date",
            })),
            PullOutcome::Pulled { commits } => DaemonResponse::ok(json!({
                "started": true,
                "outcome": "pulled",
                "commits": commits,
                "duration_ms": report.duration.as_millis() as u64,
            })),
            PullOutcome::Failed { stage, error } => {
                DaemonResponse::error(format!("{stage} failed: {error}"))
            }
        };
        for waiter in self.pull_waiters.drain(..) {
            let _ = waiter.send(response.clone());
        }
    }

    // -----------------------------------------------------------------------
    // Services
    // -----------------------------------------------------------------------

    fn launch(&mut self) -> LaunchReport {
        let report = self.fleet.launch_pass(now_std());
        self.apply_launch(&report);
        report
    }

    fn apply_launch(&mut self, report: &LaunchReport) {
        for (service, port, pid) in &report.started {
            tracing::info!(service = %service, port, pid, "service started");
        }
        for (service, action) in &report.failed {
            self.apply_exit_action(service, *action);
        }
    }

    fn apply_exit_action(&mut self, service: &ServiceId, action: ExitAction) {
        match action {
            ExitAction::Ignored => {}
            ExitAction::RestartScheduled { delay, attempt } => {
                tracing::info!(service = %service, attempt, ?delay, "restart scheduled");
                self.timers
                    .schedule_in(TimerKey::Restart(service.clone()), delay);
            }
            ExitAction::PermanentlyStopped => {
                self.timers.cancel(&TimerKey::Restart(service.clone()));
                tracing::warn!(service = %service, "restart budget spent; service stopped");
            }
        }
    }

    fn on_process_exit(&mut self, exit: ProcessExit) {
        tracing::warn!(service = %exit.service, pid = exit.pid, code = ?exit.code, "process exited");
        let action = self.fleet.handle_exit(&exit, now_std());
        self.apply_exit_action(&exit.service, action);
    }

    fn restart(&mut self, service: &ServiceId) {
        match self.fleet.restart_if_due(service, now_std()) {
            RestartOutcome::Started { port, pid } => {
                tracing::info!(service = %service, port, pid, "service restarted");
                self.launch();
            }
            RestartOutcome::Failed(action) => self.apply_exit_action(service, action),
            RestartOutcome::Waiting(_) | RestartOutcome::NotDue => {}
        }
    }

    fn poll_liveness(&mut self) {
        for (service, action) in self.fleet.poll_liveness(now_std()) {
            self.apply_exit_action(&service, action);
        }

        let targets = self.fleet.running_ports();
        if targets.is_empty() {
            return;
        }
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            let mut results = Vec::with_capacity(targets.len());
            for (service, port) in targets {
                let reachable = warden_supervisor::liveness::port_reachable(port).await;
                results.push((service, reachable));
            }
            let _ = events.send(RuntimeEvent::Reachability(results));
        });
    }

    // -----------------------------------------------------------------------
    // Commands
    // -----------------------------------------------------------------------

    fn on_command(&mut self, request: DaemonRequest, respond_to: oneshot::Sender<DaemonResponse>) -> Flow {
        let response = match request.cmd.as_str() {
            "status" => match serde_json::to_value(self.status()) {
                Ok(payload) => DaemonResponse::ok(payload),
                Err(err) => DaemonResponse::error(err.to_string()),
            },
            "sync" => match self.request_push(SyncTrigger::Manual) {
                Ok(()) => {
                    self.push_waiters.push(respond_to);
                    return Flow::Continue;
                }
                Err(reason) => not_started(reason),
            },
            "pull" => match self.request_pull() {
                Ok(()) => {
                    self.pull_waiters.push(respond_to);
                    return Flow::Continue;
                }
                Err(reason) => not_started(reason),
            },
            "launch" => {
                let report = self.launch();
                DaemonResponse::ok(launch_json(&report))
            }
            "start" => match request.service {
                Some(service) => self.start_service(ServiceId::from(service)),
                None => DaemonResponse::error("start requires a service id"),
            },
            "stop" => {
                let _ = respond_to.send(DaemonResponse::ok(json!({ "stopping": true })));
                return Flow::Stop;
            }
            other => DaemonResponse::error(format!("unknown command '{other}'")),
        };
        let _ = respond_to.send(response);
        Flow::Continue
    }

    fn start_service(&mut self, service: ServiceId) -> DaemonResponse {
        self.timers.cancel(&TimerKey::Restart(service.clone()));
        match self.fleet.start_manual(&service, now_std()) {
            Ok(report) => {
                self.apply_launch(&report);
                DaemonResponse::ok(launch_json(&report))
            }
            Err(err) => DaemonResponse::error(err.to_string()),
        }
    }

    fn status(&self) -> DaemonStatus {
        DaemonStatus::build(
            self.watch_root.clone(),
            socket_path(&self.root),
            self.started_at,
            Utc::now(),
            self.aggregator.settling(),
            self.engine.snapshot(now_std()),
            self.fleet.snapshot(),
        )
    }
}

fn now_std() -> std::time::Instant {
    Instant::now().into_std()
}

fn not_started(reason: &str) -> DaemonResponse {
    DaemonResponse::ok(json!({ "started": false, "reason": reason }))
}

fn launch_json(report: &LaunchReport) -> Value {
    json!({
        "started": report
            .started
            .iter()
            .map(|(service, port, pid)| json!({ "service": service, "port": port, "pid": pid }))
            .collect::<Vec<_>>(),
        "blocked": report
            .blocked
            .iter()
            .map(|(service, missing)| json!({ "service": service, "waiting_on": missing }))
            .collect::<Vec<_>>(),
        "failed": report
            .failed
            .iter()
            .map(|(service, _)| service)
            .collect::<Vec<_>>(),
    })
}

// ---------------------------------------------------------------------------
// Socket server
// ---------------------------------------------------------------------------

async fn socket_server_task(root: PathBuf, handle: DaemonHandle) -> Result<(), DaemonError> {
    let mut shutdown_rx = handle.subscribe_shutdown();
    let socket = socket_path(&root);
    prepare_socket_for_bind(&socket)?;

    let listener = UnixListener::bind(&socket).map_err(|e| io_err(&socket, e))?;
    set_socket_permissions(&socket)?;
    tracing::info!(socket = %socket.display(), "listening");

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            accepted = listener.accept() => {
                let (stream, _) = accepted.map_err(|e| io_err(&socket, e))?;
                let handle = handle.clone();
                tokio::spawn(async move {
                    if let Err(err) = handle_socket_client(stream, handle).await {
                        tracing::error!(error = %err, "socket client error");
                    }
                });
            }
        }
    }

    if socket.exists() {
        let _ = fs::remove_file(&socket);
    }
    Ok(())
}

async fn handle_socket_client(stream: UnixStream, handle: DaemonHandle) -> Result<(), DaemonError> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| io_err("daemon socket read", e))?
    {
        if line.trim().is_empty() {
            continue;
        }

        let request: DaemonRequest = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(err) => {
                write_response(
                    &mut writer,
                    &DaemonResponse::error(format!("invalid request JSON: {err}")),
                )
                .await?;
                continue;
            }
        };

        let stopping = request.cmd == "stop";
        let response = handle.request(request).await?;
        write_response(&mut writer, &response).await?;
        if stopping {
            break;
        }
    }
    Ok(())
}

async fn write_response(writer: &mut OwnedWriteHalf, response: &DaemonResponse) -> Result<(), DaemonError> {
    let mut payload = serde_json::to_string(response)?;
    payload.push('\n');
    writer
        .write_all(payload.as_bytes())
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .flush()
        .await
        .map_err(|e| io_err("daemon socket flush", e))
}

fn prepare_socket_for_bind(socket: &Path) -> Result<(), DaemonError> {
    if !socket.exists() {
        return Ok(());
    }
    match StdUnixStream::connect(socket) {
        Ok(_) => {
            return Err(DaemonError::AlreadyRunning {
                socket: socket.to_path_buf(),
            });
        }
        Err(err) => {
            tracing::warn!(
                socket = %socket.display(),
                error = %err,
                "removing stale daemon socket before bind",
            );
        }
    }
    match fs::remove_file(socket) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(io_err(socket, err)),
    }
}

fn set_socket_permissions(path: &Path) -> Result<(), DaemonError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|e| io_err(path, e))
}

async fn signal_task(handle: DaemonHandle) -> Result<(), DaemonError> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut shutdown_rx = handle.subscribe_shutdown();
    let mut terminate =
        signal(SignalKind::terminate()).map_err(|e| io_err("SIGTERM handler", e))?;
    tokio::select! {
        _ = shutdown_rx.recv() => {}
        _ = terminate.recv() => {
            tracing::info!("received SIGTERM, shutting down daemon");
            handle.shutdown();
        }
        signal = tokio::signal::ctrl_c() => {
            signal.map_err(|err| DaemonError::Protocol(format!("ctrl-c handler failed: {err}")))?;
            tracing::info!("received ctrl-c, shutting down daemon");
            handle.shutdown();
        }
    }
    Ok(())
}

fn handle_join(
    task: &str,
    result: Result<Result<(), DaemonError>, tokio::task::JoinError>,
) -> Result<(), DaemonError> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(DaemonError::Protocol(format!("{task} task join failure: {err}"))),
    }
}

pub fn ensure_runtime_dirs(root: &Path) -> Result<(), DaemonError> {
    for dir in [warden_dir(root), logs_dir(root), service_logs_dir(root)] {
        fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tracing
// ---------------------------------------------------------------------------

/// Opens the log file in append mode for every event, so a rotated file is
/// replaced on the next line.
struct AppendLog {
    path: PathBuf,
}

impl<'a> MakeWriter<'a> for AppendLog {
    type Writer = Box<dyn io::Write + 'a>;

    fn make_writer(&'a self) -> Self::Writer {
        match fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
        {
            Ok(file) => Box::new(file),
            Err(_) => Box::new(io::sink()),
        }
    }
}

/// stderr plus `<root>/.warden/logs/daemon.log`, filtered by `RUST_LOG`
/// (default `info`). `WARDEN_LOG_JSON` switches the file to JSON lines.
pub fn init_tracing(root: &Path) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let path = daemon_log_path(root);
    let json = std::env::var_os("WARDEN_LOG_JSON").is_some();

    let stderr = fmt::layer().with_target(false).with_writer(io::stderr);
    let file_text = (!json).then(|| {
        fmt::layer()
            .with_target(false)
            .with_ansi(false)
            .with_writer(AppendLog { path: path.clone() })
    });
    let file_json = json.then(|| {
        fmt::layer()
            .json()
            .with_writer(AppendLog { path: path.clone() })
    });

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(stderr)
        .with(file_text)
        .with(file_json)
        .try_init();
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn stale_socket_file_is_removed() {
        let dir = TempDir::new().expect("dir");
        let socket = dir.path().join("warden.sock");
        fs::write(&socket, b"").expect("stale file");
        prepare_socket_for_bind(&socket).expect("prepare");
        assert!(!socket.exists());
    }

    #[test]
    fn runtime_dirs_are_created() {
        let root = TempDir::new().expect("root");
        ensure_runtime_dirs(root.path()).expect("dirs");
        assert!(service_logs_dir(root.path()).is_dir());
    }

    #[test]
    fn append_log_appends_across_writers() {
        use std::io::Write;

        let dir = TempDir::new().expect("dir");
        let log = AppendLog {
            path: dir.path().join("daemon.log"),
        };
        log.make_writer().write_all(b"one\n").expect("write");
        log.make_writer().write_all(b"two\n").expect("write");
        assert_eq!(fs::read_to_string(&log.path).expect("read"), "one\ntwo\n");
    }

    #[test]
    fn launch_json_lists_started_and_blocked() {
        let report = LaunchReport {
            started: vec![(ServiceId::from("db"), 7000, 41)],
            blocked: vec![(ServiceId::from("api"), vec![ServiceId::from("cache")])],
            failed: Vec::new(),
        };
        let value = launch_json(&report);
        assert_eq!(value["started"][0]["service"], "db");
        assert_eq!(value["started"][0]["port"], 7000);
        assert_eq!(value["blocked"][0]["waiting_on"][0], "cache");
    }
}
