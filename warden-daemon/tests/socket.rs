//! The Unix socket surface against a running daemon.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tempfile::TempDir;
use tokio::sync::mpsc;

use warden_core::WardenConfig;
use warden_daemon::{paths, request_status, request_stop, Daemon, DaemonError, DaemonParts};
use warden_supervisor::{SpawnRequest, Spawner, SupervisorError};
use warden_sync::{Vcs, VcsCommand, VcsError, VcsOutput};

struct QuietRepo;

impl Vcs for QuietRepo {
    fn exec(&self, command: &VcsCommand) -> Result<VcsOutput, VcsError> {
        Ok(VcsOutput::stdout(match command {
            VcsCommand::Remotes => "origin\t/srv/app.git (fetch)\n",
            VcsCommand::CurrentBranch => "main\n",
            _ => "",
        }))
    }
}

#[derive(Default)]
struct NoSpawner(Arc<Mutex<Vec<u32>>>);

impl Spawner for NoSpawner {
    fn spawn(&self, request: &SpawnRequest) -> Result<u32, SupervisorError> {
        Err(SupervisorError::Spawn {
            service: request.service.0.clone(),
            message: "spawning disabled".to_string(),
        })
    }

    fn is_alive(&self, _pid: u32) -> bool {
        false
    }

    fn terminate(&self, pid: u32) {
        self.0.lock().unwrap().push(pid);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn status_and_stop_over_the_socket() {
    let root = TempDir::new().unwrap();
    let root_path = std::fs::canonicalize(root.path()).unwrap();
    let (_exits_tx, exits) = mpsc::unbounded_channel();
    let parts = DaemonParts {
        vcs: Arc::new(QuietRepo),
        spawner: Box::new(NoSpawner::default()),
        exits,
    };
    let daemon = Daemon::with_parts(&root_path, WardenConfig::default(), parts)
        .unwrap()
        .without_log_rotation();
    let running = tokio::spawn(daemon.run());

    let status = {
        let root = root_path.clone();
        tokio::task::spawn_blocking(move || {
            for _ in 0..50 {
                match request_status(&root) {
                    Ok(status) => return status,
                    Err(DaemonError::DaemonNotRunning { .. }) => {
                        std::thread::sleep(Duration::from_millis(100))
                    }
                    Err(other) => panic!("status failed: {other}"),
                }
            }
            panic!("daemon socket never came up");
        })
        .await
        .unwrap()
    };
    assert_eq!(status["running"], true);
    assert_eq!(status["sync"]["branch"], "main");
    assert_eq!(status["sync"]["remote"], "origin");

    {
        let root = root_path.clone();
        tokio::task::spawn_blocking(move || request_stop(&root))
            .await
            .unwrap()
            .unwrap();
    }

    tokio::time::timeout(Duration::from_secs(10), running)
        .await
        .expect("daemon exits after stop")
        .unwrap()
        .unwrap();
    assert!(!paths::socket_path(&root_path).exists());
}

#[test]
fn status_without_a_daemon_reports_not_running() {
    let root = TempDir::new().unwrap();
    let err = request_status(root.path()).unwrap_err();
    assert!(matches!(err, DaemonError::DaemonNotRunning { .. }));
}
