//! Size-based rotation for the daemon log and the captured service logs.
//!
//! A file over [`MAX_LOG_BYTES`] is shifted to `<name>.1`, older copies move
//! up by one and anything past [`MAX_ROTATED_FILES`] is dropped.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::paths::{daemon_log_path, service_logs_dir};

/// 10 MiB.
pub const MAX_LOG_BYTES: u64 = 10 * 1024 * 1024;

pub const MAX_ROTATED_FILES: usize = 5;

/// Rotate `log_path` when it has grown to `max_bytes` or more.
///
/// Returns `Ok(false)` for small or missing files. Writers open the live
/// path in append mode per write, so they pick up the fresh file on their
/// next line.
pub fn rotate_if_needed(log_path: &Path, max_bytes: u64, max_files: usize) -> io::Result<bool> {
    let size = match fs::metadata(log_path) {
        Ok(meta) => meta.len(),
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(err) => return Err(err),
    };
    if size < max_bytes {
        return Ok(false);
    }

    let oldest = numbered_path(log_path, max_files);
    if oldest.exists() {
        fs::remove_file(&oldest)?;
    }
    for n in (1..max_files).rev() {
        let src = numbered_path(log_path, n);
        if src.exists() {
            fs::rename(&src, numbered_path(log_path, n + 1))?;
        }
    }
    fs::rename(log_path, numbered_path(log_path, 1))?;
    fs::File::create(log_path)?;
    Ok(true)
}

/// Every live log file the daemon owns: `daemon.log` plus each
/// `services/*.log`. Rotated copies are not included.
pub fn live_logs(root: &Path) -> Vec<PathBuf> {
    let mut logs = vec![daemon_log_path(root)];
    if let Ok(entries) = fs::read_dir(service_logs_dir(root)) {
        let mut services: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.extension().is_some_and(|ext| ext == "log"))
            .collect();
        services.sort();
        logs.extend(services);
    }
    logs
}

/// Rotate every live log under `root`. A failure on one file is logged
/// and does not stop the rest. Returns the number of files rotated.
pub fn rotate_logs(root: &Path) -> usize {
    let mut rotated = 0;
    for log_path in live_logs(root) {
        match rotate_if_needed(&log_path, MAX_LOG_BYTES, MAX_ROTATED_FILES) {
            Ok(true) => {
                rotated += 1;
                tracing::info!(path = %log_path.display(), "log file rotated");
            }
            Ok(false) => {}
            Err(err) => {
                tracing::warn!(path = %log_path.display(), error = %err, "log rotation failed")
            }
        }
    }
    rotated
}

fn numbered_path(base: &Path, n: usize) -> PathBuf {
    let name = base
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("warden.log");
    base.with_file_name(format!("{name}.{n}"))
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paths::service_log_path;
    use tempfile::TempDir;

    #[test]
    fn small_or_missing_files_stay_put() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("wallet.log");
        assert!(!rotate_if_needed(&log, 64, 3).unwrap());

        fs::write(&log, b"short").unwrap();
        assert!(!rotate_if_needed(&log, 64, 3).unwrap());
        assert!(!numbered_path(&log, 1).exists());
    }

    #[test]
    fn oversized_file_moves_to_first_backup() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("daemon.log");
        fs::write(&log, vec![b'x'; 100]).unwrap();

        assert!(rotate_if_needed(&log, 64, 3).unwrap());
        assert_eq!(fs::metadata(&log).unwrap().len(), 0);
        assert_eq!(fs::metadata(numbered_path(&log, 1)).unwrap().len(), 100);
    }

    #[test]
    fn backups_shift_and_the_oldest_is_dropped() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("daemon.log");

        for round in 1..=4u8 {
            fs::write(&log, vec![b'0' + round; 80]).unwrap();
            assert!(rotate_if_needed(&log, 64, 3).unwrap());
        }

        // Rounds 4, 3, 2 survive as .1, .2, .3; round 1 fell off the end.
        assert_eq!(fs::read(numbered_path(&log, 1)).unwrap()[0], b'4');
        assert_eq!(fs::read(numbered_path(&log, 3)).unwrap()[0], b'2');
        assert!(!numbered_path(&log, 4).exists());
    }

    #[test]
    fn live_logs_lists_daemon_and_service_logs_only() {
        let root = TempDir::new().unwrap();
        let services = service_logs_dir(root.path());
        fs::create_dir_all(&services).unwrap();
        fs::write(service_log_path(root.path(), "wallet"), b"").unwrap();
        fs::write(service_log_path(root.path(), "api"), b"").unwrap();
        fs::write(services.join("api.log.1"), b"").unwrap();

        let logs = live_logs(root.path());
        assert_eq!(
            logs,
            vec![
                daemon_log_path(root.path()),
                service_log_path(root.path(), "api"),
                service_log_path(root.path(), "wallet"),
            ]
        );
    }

    #[test]
    fn rotate_logs_without_any_files_is_a_noop() {
        let root = TempDir::new().unwrap();
        assert_eq!(rotate_logs(root.path()), 0);
    }
}
