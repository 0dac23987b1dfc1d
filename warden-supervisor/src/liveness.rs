//! Signal-0 liveness probes, TCP reachability and group termination.

use std::time::Duration;

use nix::errno::Errno;
use nix::sys::signal::{self, killpg, Signal};
use nix::unistd::Pid;
use tokio::net::TcpStream;

/// How long a reachability probe waits for the connect to finish.
pub const CONNECT_TIMEOUT: Duration = Duration::from_millis(500);

/// True if a process with `pid` exists. `EPERM` means it exists but belongs
/// to someone else.
pub fn pid_alive(pid: u32) -> bool {
    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    if raw <= 0 {
        return false;
    }
    match signal::kill(Pid::from_raw(raw), None) {
        Ok(()) => true,
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

/// SIGTERM the process group led by `pid`, falling back to the single pid.
pub fn terminate_group(pid: u32) {
    let Ok(raw) = i32::try_from(pid) else {
        return;
    };
    if raw <= 0 {
        return;
    }
    let pid = Pid::from_raw(raw);
    if let Err(e) = killpg(pid, Signal::SIGTERM).or_else(|_| signal::kill(pid, Signal::SIGTERM)) {
        if e != Errno::ESRCH {
            tracing::warn!(pid = raw, error = %e, "SIGTERM failed");
        }
    }
}

/// True if something accepts TCP connections on `127.0.0.1:port`.
pub async fn port_reachable(port: u16) -> bool {
    matches!(
        tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(("127.0.0.1", port))).await,
        Ok(Ok(_))
    )
}
