//! Newline-delimited JSON over the daemon's Unix socket, plus the blocking
//! client calls the CLI uses.

use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{io_err, DaemonError};
use crate::paths::socket_path;

/// Attempts made by [`request_status`] while a freshly started daemon binds.
const STATUS_ATTEMPTS: u32 = 5;
const STATUS_BACKOFF: Duration = Duration::from_millis(100);

/// One request line: `{"cmd":"start","service":"api"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaemonRequest {
    pub cmd: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
}

impl DaemonRequest {
    pub fn new(cmd: impl Into<String>) -> Self {
        Self {
            cmd: cmd.into(),
            service: None,
        }
    }

    pub fn for_service(cmd: impl Into<String>, service: impl Into<String>) -> Self {
        Self {
            cmd: cmd.into(),
            service: Some(service.into()),
        }
    }
}

/// One response line. Exactly one of `data` and `error` is set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonResponse {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DaemonResponse {
    pub fn ok(data: Value) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(message.into()),
        }
    }

    /// The payload of a successful response; a failed one becomes
    /// [`DaemonError::Protocol`].
    pub fn into_data(self) -> Result<Value, DaemonError> {
        match (self.ok, self.error) {
            (true, _) => Ok(self.data.unwrap_or(Value::Null)),
            (false, Some(message)) => Err(DaemonError::Protocol(message)),
            (false, None) => Err(DaemonError::Protocol(
                "daemon reported failure without a message".to_string(),
            )),
        }
    }
}

/// Connect to `<root>/.warden/warden.sock`, send `request`, read one line back.
pub fn send_request(root: &Path, request: &DaemonRequest) -> Result<DaemonResponse, DaemonError> {
    let socket = socket_path(root);
    let not_running = || DaemonError::DaemonNotRunning {
        socket: socket.clone(),
    };
    if !socket.exists() {
        return Err(not_running());
    }

    let stream = UnixStream::connect(&socket).map_err(|err| match err.kind() {
        ErrorKind::NotFound | ErrorKind::ConnectionRefused | ErrorKind::ConnectionReset => {
            not_running()
        }
        _ => io_err(&socket, err),
    })?;

    let mut frame = serde_json::to_vec(request)?;
    frame.push(b'\n');
    (&stream)
        .write_all(&frame)
        .and_then(|()| (&stream).flush())
        .map_err(|err| io_err(&socket, err))?;

    let mut line = String::new();
    match BufReader::new(&stream).read_line(&mut line) {
        Ok(0) => Err(DaemonError::Protocol(
            "daemon closed the connection without replying".to_string(),
        )),
        Ok(_) => Ok(serde_json::from_str(line.trim_end())?),
        Err(err) => Err(io_err(&socket, err)),
    }
}

fn call(root: &Path, request: DaemonRequest) -> Result<Value, DaemonError> {
    send_request(root, &request)?.into_data()
}

/// Retry `op` while the daemon is not (yet) listening.
fn retry_not_running<T>(
    attempts: u32,
    backoff: Duration,
    mut op: impl FnMut() -> Result<T, DaemonError>,
) -> Result<T, DaemonError> {
    let mut attempt = 1;
    loop {
        match op() {
            Err(DaemonError::DaemonNotRunning { .. }) if attempt < attempts => {
                attempt += 1;
                std::thread::sleep(backoff);
            }
            other => return other,
        }
    }
}

pub fn request_status(root: &Path) -> Result<Value, DaemonError> {
    retry_not_running(STATUS_ATTEMPTS, STATUS_BACKOFF, || {
        call(root, DaemonRequest::new("status"))
    })
}

pub fn request_stop(root: &Path) -> Result<(), DaemonError> {
    call(root, DaemonRequest::new("stop")).map(drop)
}

/// Ask for an immediate push cycle; waits for it to finish when one starts.
pub fn request_sync(root: &Path) -> Result<Value, DaemonError> {
    call(root, DaemonRequest::new("sync"))
}

pub fn request_pull(root: &Path) -> Result<Value, DaemonError> {
    call(root, DaemonRequest::new("pull"))
}

/// Run a launcher pass over the registry.
pub fn request_launch(root: &Path) -> Result<Value, DaemonError> {
    call(root, DaemonRequest::new("launch"))
}

/// Manually start one service, resetting its restart budget.
pub fn request_start(root: &Path, service: &str) -> Result<Value, DaemonError> {
    call(root, DaemonRequest::for_service("start", service))
}
