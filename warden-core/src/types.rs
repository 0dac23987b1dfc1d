//! Domain types shared by the sync engine and the service supervisor.
//!
//! All path fields use `PathBuf`; never `&str` or `String` for filesystem paths.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// A strongly-typed identifier for a supervised service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServiceId(pub String);

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for ServiceId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ServiceId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Priority of a pending change, derived from the path alone.
///
/// Ordered so that `Critical > High > Normal`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    #[default]
    Normal,
    High,
    Critical,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Priority::Normal => write!(f, "normal"),
            Priority::High => write!(f, "high"),
            Priority::Critical => write!(f, "critical"),
        }
    }
}

// ---------------------------------------------------------------------------
// Registry entries
// ---------------------------------------------------------------------------

/// One entry of the service registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDescriptor {
    pub id: ServiceId,
    #[serde(default)]
    pub display_name: Option<String>,
    /// Fixed port; `None` means a port is auto-assigned at launch.
    #[serde(default)]
    pub port: Option<u16>,
    pub start_command: String,
    /// Working directory, relative to the watch root unless absolute.
    #[serde(default)]
    pub cwd: Option<PathBuf>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub dependencies: Vec<ServiceId>,
    #[serde(default = "default_auto_start")]
    pub auto_start: bool,
    /// Per-service restart budget; falls back to the supervisor default.
    #[serde(default)]
    pub max_restarts: Option<u32>,
}

fn default_auto_start() -> bool {
    true
}

impl ServiceDescriptor {
    /// Minimal descriptor; used by tests and by callers building registries in code.
    pub fn new(id: impl Into<ServiceId>, start_command: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: None,
            port: None,
            start_command: start_command.into(),
            cwd: None,
            env: BTreeMap::new(),
            dependencies: Vec::new(),
            auto_start: true,
            max_restarts: None,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_dependencies<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<ServiceId>,
    {
        self.dependencies = deps.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_max_restarts(mut self, max: u32) -> Self {
        self.max_restarts = Some(max);
        self
    }

    pub fn with_auto_start(mut self, auto_start: bool) -> Self {
        self.auto_start = auto_start;
        self
    }

    /// Human-facing name, defaulting to the id.
    pub fn name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.id.0)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
