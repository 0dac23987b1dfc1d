//! Process boundary: spawning `sh -c <command>` in its own process group,
//! forwarding output to a per-service log file, and reporting exits.

use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;

use warden_core::ServiceId;

use crate::error::{io_err, SupervisorError};
use crate::liveness;

/// Everything needed to start one service process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnRequest {
    pub service: ServiceId,
    pub command: String,
    pub cwd: PathBuf,
    pub env: BTreeMap<String, String>,
    pub port: u16,
    pub log_path: PathBuf,
}

/// A supervised process ended. `code` is `None` when it was killed by a
/// signal or found dead by polling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessExit {
    pub service: ServiceId,
    pub pid: u32,
    pub code: Option<i32>,
}

/// Seam between supervision logic and real OS processes.
pub trait Spawner: Send {
    /// Start the process and return its pid. Exit is reported asynchronously.
    fn spawn(&self, request: &SpawnRequest) -> Result<u32, SupervisorError>;

    /// Signal-0 probe.
    fn is_alive(&self, pid: u32) -> bool;

    /// Send SIGTERM to the process group led by `pid`; does not wait.
    fn terminate(&self, pid: u32);
}

/// [`Spawner`] that runs real child processes on the current tokio runtime.
#[derive(Debug, Clone)]
pub struct ProcessSpawner {
    exits: mpsc::UnboundedSender<ProcessExit>,
}

impl ProcessSpawner {
    pub fn new(exits: mpsc::UnboundedSender<ProcessExit>) -> Self {
        Self { exits }
    }
}

impl Spawner for ProcessSpawner {
    fn spawn(&self, request: &SpawnRequest) -> Result<u32, SupervisorError> {
        let spawn_err = |message: String| SupervisorError::Spawn {
            service: request.service.0.clone(),
            message,
        };

        if let Some(dir) = request.log_path.parent() {
            std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
        }
        let log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&request.log_path)
            .map_err(|e| io_err(&request.log_path, e))?;

        let mut child = Command::new("sh")
            .arg("-c")
            .arg(&request.command)
            .current_dir(&request.cwd)
            .envs(&request.env)
            .env("PORT", request.port.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(false)
            .process_group(0)
            .spawn()
            .map_err(|e| spawn_err(format!("{e} (cwd: {})", request.cwd.display())))?;

        let pid = child
            .id()
            .ok_or_else(|| spawn_err("process exited before its pid was read".to_string()))?;

        tracing::info!(
            service = %request.service,
            pid,
            port = request.port,
            "spawned `{}`",
            request.command
        );

        let log = tokio::fs::File::from_std(log);
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let service = request.service.clone();
        let exits = self.exits.clone();

        tokio::spawn(async move {
            let (lines_tx, lines_rx) = mpsc::unbounded_channel();
            if let Some(out) = stdout {
                tokio::spawn(read_lines(out, lines_tx.clone()));
            }
            if let Some(err) = stderr {
                tokio::spawn(read_lines(err, lines_tx.clone()));
            }
            drop(lines_tx);
            let writer = tokio::spawn(write_log(service.clone(), log, lines_rx));

            let code = match child.wait().await {
                Ok(status) => status.code(),
                Err(e) => {
                    tracing::warn!(service = %service, pid, error = %e, "wait failed");
                    None
                }
            };
            // Let the forwarders drain what the process wrote before exiting.
            let _ = writer.await;
            let _ = exits.send(ProcessExit { service, pid, code });
        });

        Ok(pid)
    }

    fn is_alive(&self, pid: u32) -> bool {
        liveness::pid_alive(pid)
    }

    fn terminate(&self, pid: u32) {
        liveness::terminate_group(pid);
    }
}

async fn read_lines<R>(reader: R, lines: mpsc::UnboundedSender<String>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader).lines();
    while let Ok(Some(line)) = reader.next_line().await {
        if lines.send(line).is_err() {
            break;
        }
    }
}

async fn write_log(
    service: ServiceId,
    mut log: tokio::fs::File,
    mut lines: mpsc::UnboundedReceiver<String>,
) {
    while let Some(line) = lines.recv().await {
        tracing::debug!(service = %service, "{line}");
        let mut bytes = line.into_bytes();
        bytes.push(b'\n');
        if let Err(e) = log.write_all(&bytes).await {
            tracing::warn!(service = %service, error = %e, "service log write failed");
            break;
        }
    }
    let _ = log.flush().await;
}
