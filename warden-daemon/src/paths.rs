//! Runtime layout under the watch root.
//!
//! ```text
//! <root>/.warden/
//!   warden.sock
//!   logs/daemon.log
//!   logs/services/<id>.log
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

pub const WARDEN_DIR: &str = ".warden";
pub const DAEMON_SOCKET: &str = "warden.sock";
pub const DAEMON_LOG: &str = "daemon.log";

/// How often log files are checked for rotation.
pub const ROTATION_INTERVAL: Duration = Duration::from_secs(5);
/// How often the performance summary is logged.
pub const REPORT_INTERVAL: Duration = Duration::from_secs(60);

pub fn warden_dir(root: &Path) -> PathBuf {
    root.join(WARDEN_DIR)
}

pub fn socket_path(root: &Path) -> PathBuf {
    warden_dir(root).join(DAEMON_SOCKET)
}

pub fn logs_dir(root: &Path) -> PathBuf {
    warden_dir(root).join("logs")
}

pub fn daemon_log_path(root: &Path) -> PathBuf {
    logs_dir(root).join(DAEMON_LOG)
}

pub fn service_logs_dir(root: &Path) -> PathBuf {
    logs_dir(root).join("services")
}

pub fn service_log_path(root: &Path, service: &str) -> PathBuf {
    service_logs_dir(root).join(format!("{service}.log"))
}
