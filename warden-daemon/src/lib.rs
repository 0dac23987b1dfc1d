//! Warden daemon runtime: watcher, sync and supervision actor, socket server.

mod error;
pub mod log_rotation;
pub mod paths;
pub mod protocol;
mod runtime;
pub mod scheduler;
pub mod status;
pub mod watcher;

pub use error::DaemonError;
pub use protocol::{
    request_launch, request_pull, request_start, request_status, request_stop, request_sync,
    send_request, DaemonRequest, DaemonResponse,
};
pub use runtime::{
    ensure_runtime_dirs, init_tracing, start_blocking, Daemon, DaemonHandle, DaemonParts, TimerKey,
};
pub use status::{DaemonStatus, PortRow};
