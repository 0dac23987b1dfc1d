//! `warden.yaml`: daemon configuration and service registry.
//!
//! # Layout
//!
//! ```text
//! <watch root>/
//!   warden.yaml     (optional: every key has a default)
//!   .warden/        (runtime state: socket, logs; never watched)
//! ```
//!
//! Every mutating or loading function takes the root explicitly so tests can
//! point it at a `TempDir`.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use globset::Glob;
use serde::{Deserialize, Serialize};

use crate::error::{io_err, ConfigError};
use crate::types::ServiceDescriptor;

pub const CONFIG_FILE_NAME: &str = "warden.yaml";

/// Root of the configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct WardenConfig {
    pub watch: WatchConfig,
    pub sync: SyncConfig,
    pub supervisor: SupervisorConfig,
    pub services: Vec<ServiceDescriptor>,
}

/// What the change aggregator watches and how it classifies paths.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Watch root; relative values resolve against the directory holding `warden.yaml`.
    pub root: Option<PathBuf>,
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    pub critical: Vec<String>,
    pub high: Vec<String>,
    /// Quiet period a path must stay unchanged before it is considered written.
    #[serde(with = "crate::duration")]
    pub settle: Duration,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            root: None,
            include: strings(&["**/*"]),
            exclude: strings(&[
                ".git/**",
                ".warden/**",
                "**/node_modules/**",
                "target/**",
                "dist/**",
                "build/**",
                ".next/**",
                "coverage/**",
                "logs/**",
                "temp-backup/**",
                "cypress/videos/**",
                "cypress/screenshots/**",
                "playwright-report/**",
                "test-results/**",
                "**/*.log",
                "**/*.tmp",
                "**/*.temp",
                "**/*.swp",
                "**/.DS_Store",
                "**/.env",
                "**/Thumbs.db",
            ]),
            critical: strings(&[
                "**/package.json",
                "**/package-lock.json",
                "**/Cargo.toml",
                "**/Cargo.lock",
                "**/tsconfig.json",
                "**/*.config.js",
                "**/*.config.ts",
                "src/**",
                "app/**/*.{ts,tsx}",
                "components/**/*.{ts,tsx}",
                "lib/**/*.ts",
                "hooks/**/*.ts",
                "services/**/*.ts",
                "types/**/*.ts",
            ]),
            high: strings(&["docs/**", "scripts/**", "*.md", "*.css", "*.scss"]),
            settle: Duration::from_secs(2),
        }
    }
}

/// Push/pull cadence and remote settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub remote: String,
    /// Target branch; `None` resolves through `branch --show-current` at startup.
    pub branch: Option<String>,
    #[serde(with = "crate::duration")]
    pub push_interval: Duration,
    #[serde(with = "crate::duration")]
    pub pull_interval: Duration,
    #[serde(with = "crate::duration")]
    pub min_push_spacing: Duration,
    #[serde(with = "crate::duration")]
    pub min_pull_spacing: Duration,
    /// Delay before the single deferred re-run after an in-flight operation.
    #[serde(with = "crate::duration")]
    pub retry_delay: Duration,
    /// Placeholders: `{reason}`, `{timestamp}`, `{count}`, `{files}`.
    pub commit_message: String,
    pub rate_limit: RateLimitConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            remote: "origin".to_string(),
            branch: None,
            push_interval: Duration::from_secs(30),
            pull_interval: Duration::from_secs(60),
            min_push_spacing: Duration::from_secs(1),
            min_pull_spacing: Duration::from_secs(10),
            retry_delay: Duration::from_millis(500),
            commit_message: "Auto-sync [{reason}] - {timestamp}\n\nFiles: {files}".to_string(),
            rate_limit: RateLimitConfig::default(),
        }
    }
}

/// More than `threshold` pushes within `window` delays the next one by `cooldown`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub threshold: u32,
    #[serde(with = "crate::duration")]
    pub window: Duration,
    #[serde(with = "crate::duration")]
    pub cooldown: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            threshold: 5,
            window: Duration::from_secs(10),
            cooldown: Duration::from_secs(5),
        }
    }
}

/// Restart policy, liveness polling and port assignment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    pub auto_restart: bool,
    #[serde(with = "crate::duration")]
    pub restart_delay: Duration,
    #[serde(with = "crate::duration")]
    pub poll_interval: Duration,
    /// Lowest port handed out by auto-assignment.
    pub port_floor: u16,
    /// Default restart budget for services that do not set their own.
    pub max_restarts: u32,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            auto_restart: true,
            restart_delay: Duration::from_secs(3),
            poll_interval: Duration::from_secs(30),
            port_floor: 7000,
            max_restarts: 5,
        }
    }
}

// ---------------------------------------------------------------------------
// Load
// ---------------------------------------------------------------------------

/// `<root>/warden.yaml`: pure, no I/O.
pub fn config_path_at(root: &Path) -> PathBuf {
    root.join(CONFIG_FILE_NAME)
}

/// Load and validate `<root>/warden.yaml`.
///
/// A missing file yields the defaults; a malformed one is a
/// [`ConfigError::Parse`] carrying the path and serde_yaml's line context.
pub fn load_at(root: &Path) -> Result<WardenConfig, ConfigError> {
    let path = config_path_at(root);
    let config = if path.exists() {
        let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
        if contents.trim().is_empty() {
            WardenConfig::default()
        } else {
            serde_yaml::from_str(&contents)
                .map_err(|source| ConfigError::Parse { path, source })?
        }
    } else {
        WardenConfig::default()
    };
    config.validate()?;
    Ok(config)
}

impl WardenConfig {
    /// Reject configurations the daemon cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for pattern in self
            .watch
            .include
            .iter()
            .chain(&self.watch.exclude)
            .chain(&self.watch.critical)
            .chain(&self.watch.high)
        {
            Glob::new(pattern).map_err(|source| ConfigError::Glob {
                pattern: pattern.clone(),
                source,
            })?;
        }

        let positive = [
            ("sync.push_interval", self.sync.push_interval),
            ("sync.pull_interval", self.sync.pull_interval),
            ("sync.rate_limit.window", self.sync.rate_limit.window),
            ("supervisor.poll_interval", self.supervisor.poll_interval),
        ];
        for (name, value) in positive {
            if value.is_zero() {
                return Err(ConfigError::ZeroValue(name));
            }
        }
        if self.supervisor.port_floor == 0 {
            return Err(ConfigError::ZeroValue("supervisor.port_floor"));
        }

        let mut seen = HashSet::new();
        for service in &self.services {
            if !seen.insert(&service.id) {
                return Err(ConfigError::DuplicateService(service.id.0.clone()));
            }
            if service.start_command.trim().is_empty() {
                return Err(ConfigError::EmptyCommand(service.id.0.clone()));
            }
        }
        Ok(())
    }

    /// Resolve the watch root against the directory the config was loaded from.
    pub fn watch_root(&self, config_dir: &Path) -> PathBuf {
        match &self.watch.root {
            Some(root) if root.is_absolute() => root.clone(),
            Some(root) => config_dir.join(root),
            None => config_dir.to_path_buf(),
        }
    }

    /// Effective restart budget for a service.
    pub fn max_restarts_for(&self, service: &ServiceDescriptor) -> u32 {
        service
            .max_restarts
            .unwrap_or(self.supervisor.max_restarts)
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| (*s).to_string()).collect()
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_yields_defaults() {
        let root = TempDir::new().expect("tempdir");
        let config = load_at(root.path()).expect("load");
        assert_eq!(config, WardenConfig::default());
        assert_eq!(config.sync.push_interval, Duration::from_secs(30));
        assert_eq!(config.supervisor.port_floor, 7000);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let root = TempDir::new().expect("tempdir");
        std::fs::write(
            config_path_at(root.path()),
            "sync:\n  push_interval: 45s\n  branch: trunk\n",
        )
        .expect("write");
        let config = load_at(root.path()).expect("load");
        assert_eq!(config.sync.push_interval, Duration::from_secs(45));
        assert_eq!(config.sync.branch.as_deref(), Some("trunk"));
        assert_eq!(config.sync.remote, "origin");
        assert_eq!(config.watch.settle, Duration::from_secs(2));
    }

    #[test]
    fn watch_root_resolution() {
        let mut config = WardenConfig::default();
        let dir = Path::new("/work/repo");
        assert_eq!(config.watch_root(dir), PathBuf::from("/work/repo"));
        config.watch.root = Some(PathBuf::from("web"));
        assert_eq!(config.watch_root(dir), PathBuf::from("/work/repo/web"));
        config.watch.root = Some(PathBuf::from("/elsewhere"));
        assert_eq!(config.watch_root(dir), PathBuf::from("/elsewhere"));
    }

    #[test]
    fn service_budget_falls_back_to_supervisor_default() {
        let config = WardenConfig::default();
        let plain = ServiceDescriptor::new("a", "true");
        let capped = ServiceDescriptor::new("b", "true").with_max_restarts(2);
        assert_eq!(config.max_restarts_for(&plain), 5);
        assert_eq!(config.max_restarts_for(&capped), 2);
    }
}
