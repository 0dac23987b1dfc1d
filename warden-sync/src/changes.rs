//! Change aggregation: path filtering, priority classification, settle
//! tracking and the deduplicated pending-change set.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::Serialize;

use warden_core::{Priority, WatchConfig};

use crate::error::SyncError;

/// Kind of filesystem event, as seen by the aggregator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Created,
    Modified,
    Removed,
}

// ---------------------------------------------------------------------------
// Filter
// ---------------------------------------------------------------------------

/// Compiled include/exclude and priority patterns.
#[derive(Debug, Clone)]
pub struct ChangeFilter {
    include: GlobSet,
    exclude: GlobSet,
    critical: GlobSet,
    high: GlobSet,
}

impl ChangeFilter {
    pub fn from_config(watch: &WatchConfig) -> Result<Self, SyncError> {
        Ok(Self {
            include: build_set(&watch.include)?,
            exclude: build_set(&watch.exclude)?,
            critical: build_set(&watch.critical)?,
            high: build_set(&watch.high)?,
        })
    }

    /// True when a root-relative path should be tracked.
    pub fn is_watched(&self, relative: &Path) -> bool {
        self.include.is_match(relative) && !self.exclude.is_match(relative)
    }

    pub fn classify(&self, relative: &Path) -> Priority {
        if self.critical.is_match(relative) {
            Priority::Critical
        } else if self.high.is_match(relative) {
            Priority::High
        } else {
            Priority::Normal
        }
    }
}

fn build_set(patterns: &[String]) -> Result<GlobSet, SyncError> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern).map_err(|source| SyncError::Glob {
            pattern: pattern.clone(),
            source,
        })?;
        builder.add(glob);
    }
    builder.build().map_err(|source| SyncError::Glob {
        pattern: patterns.join(", "),
        source,
    })
}

// ---------------------------------------------------------------------------
// Settle tracking
// ---------------------------------------------------------------------------

/// Holds each path until it has been quiet for the settle period, so
/// partially written files are never acted on.
#[derive(Debug)]
pub struct SettleTracker {
    quiet: Duration,
    last_seen: HashMap<PathBuf, Instant>,
}

impl SettleTracker {
    pub fn new(quiet: Duration) -> Self {
        Self {
            quiet,
            last_seen: HashMap::new(),
        }
    }

    /// Record activity on `path`, restarting its quiet period.
    pub fn observe(&mut self, path: PathBuf, now: Instant) {
        self.last_seen.insert(path, now);
    }

    /// Remove and return every path whose quiet period has elapsed, sorted.
    pub fn drain_settled(&mut self, now: Instant) -> Vec<PathBuf> {
        let quiet = self.quiet;
        let mut settled: Vec<PathBuf> = self
            .last_seen
            .iter()
            .filter(|(_, seen)| now.saturating_duration_since(**seen) >= quiet)
            .map(|(path, _)| path.clone())
            .collect();
        for path in &settled {
            self.last_seen.remove(path);
        }
        settled.sort();
        settled
    }

    /// Earliest instant at which some path settles.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.last_seen.values().min().map(|seen| *seen + self.quiet)
    }

    pub fn len(&self) -> usize {
        self.last_seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_seen.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Aggregator
// ---------------------------------------------------------------------------

/// A path that finished settling, with its classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettledChange {
    pub path: PathBuf,
    pub priority: Priority,
}

/// Turns raw filesystem events under `root` into settled, classified changes.
#[derive(Debug)]
pub struct ChangeAggregator {
    root: PathBuf,
    filter: ChangeFilter,
    settle: SettleTracker,
}

impl ChangeAggregator {
    pub fn new(root: impl Into<PathBuf>, watch: &WatchConfig) -> Result<Self, SyncError> {
        Ok(Self {
            root: root.into(),
            filter: ChangeFilter::from_config(watch)?,
            settle: SettleTracker::new(watch.settle),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Feed one event. Returns the root-relative path when it is tracked.
    pub fn observe(&mut self, kind: ChangeKind, path: &Path, now: Instant) -> Option<PathBuf> {
        let relative = relative_to(&self.root, path)?;
        if !self.filter.is_watched(&relative) {
            return None;
        }
        tracing::debug!("{kind:?}: {}", relative.display());
        self.settle.observe(relative.clone(), now);
        Some(relative)
    }

    /// Drain every path that has been quiet long enough.
    pub fn take_settled(&mut self, now: Instant) -> Vec<SettledChange> {
        self.settle
            .drain_settled(now)
            .into_iter()
            .map(|path| SettledChange {
                priority: self.filter.classify(&path),
                path,
            })
            .collect()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.settle.next_deadline()
    }

    /// Paths still waiting out their quiet period.
    pub fn settling(&self) -> usize {
        self.settle.len()
    }
}

/// `path` relative to `root`; `None` for paths outside the root or the root itself.
pub fn relative_to(root: &Path, path: &Path) -> Option<PathBuf> {
    let relative = if path.is_absolute() {
        path.strip_prefix(root).ok()?.to_path_buf()
    } else {
        path.to_path_buf()
    };
    if relative.as_os_str().is_empty() {
        None
    } else {
        Some(relative)
    }
}

// ---------------------------------------------------------------------------
// Pending set
// ---------------------------------------------------------------------------

/// Deduplicated record of paths modified since the last confirmed push.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PendingChangeSet {
    entries: BTreeMap<PathBuf, Priority>,
}

impl PendingChangeSet {
    /// Insert `path`, keeping the highest priority seen. Returns `true` when
    /// the path was not already pending.
    pub fn insert(&mut self, path: PathBuf, priority: Priority) -> bool {
        match self.entries.get_mut(&path) {
            Some(existing) => {
                *existing = (*existing).max(priority);
                false
            }
            None => {
                self.entries.insert(path, priority);
                true
            }
        }
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.entries.contains_key(path)
    }

    pub fn priority_of(&self, path: &Path) -> Option<Priority> {
        self.entries.get(path).copied()
    }

    pub fn highest(&self) -> Option<Priority> {
        self.entries.values().copied().max()
    }

    pub fn paths(&self) -> Vec<PathBuf> {
        self.entries.keys().cloned().collect()
    }

    pub fn remove(&mut self, path: &Path) -> bool {
        self.entries.remove(path).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter() -> ChangeFilter {
        ChangeFilter::from_config(&WatchConfig::default()).expect("default filter")
    }

    #[test]
    fn default_excludes_build_output_and_logs() {
        let filter = filter();
        assert!(filter.is_watched(Path::new("src/main.rs")));
        assert!(filter.is_watched(Path::new("README.md")));
        assert!(!filter.is_watched(Path::new(".git/index")));
        assert!(!filter.is_watched(Path::new("node_modules/react/index.js")));
        assert!(!filter.is_watched(Path::new("web/node_modules/react/index.js")));
        assert!(!filter.is_watched(Path::new("target/debug/warden")));
        assert!(!filter.is_watched(Path::new("logs/server.log")));
        assert!(!filter.is_watched(Path::new("cypress/videos/run.mp4")));
        assert!(!filter.is_watched(Path::new(".warden/warden.sock")));
    }

    #[test]
    fn env_files_are_not_watched() {
        let filter = filter();
        assert!(!filter.is_watched(Path::new(".env")));
        assert!(!filter.is_watched(Path::new("services/api/.env")));
        assert!(filter.is_watched(Path::new(".env.example")));
    }

    #[test]
    fn classification_by_pattern() {
        let filter = filter();
        assert_eq!(filter.classify(Path::new("package.json")), Priority::Critical);
        assert_eq!(filter.classify(Path::new("app/page.tsx")), Priority::Critical);
        assert_eq!(filter.classify(Path::new("docs/setup.md")), Priority::High);
        assert_eq!(filter.classify(Path::new("public/logo.svg")), Priority::Normal);
    }

    #[test]
    fn settle_waits_for_quiet_period() {
        let start = Instant::now();
        let mut settle = SettleTracker::new(Duration::from_secs(2));
        settle.observe(PathBuf::from("a.txt"), start);
        settle.observe(PathBuf::from("a.txt"), start + Duration::from_millis(1500));

        assert!(settle.drain_settled(start + Duration::from_secs(2)).is_empty());
        assert_eq!(
            settle.next_deadline(),
            Some(start + Duration::from_millis(3500))
        );
        assert_eq!(
            settle.drain_settled(start + Duration::from_millis(3500)),
            vec![PathBuf::from("a.txt")]
        );
        assert!(settle.is_empty());
    }

    #[test]
    fn pending_set_keeps_highest_priority() {
        let mut pending = PendingChangeSet::default();
        assert!(pending.insert(PathBuf::from("x"), Priority::Normal));
        assert!(!pending.insert(PathBuf::from("x"), Priority::Critical));
        assert!(!pending.insert(PathBuf::from("x"), Priority::High));
        assert_eq!(pending.len(), 1);
        assert_eq!(pending.priority_of(Path::new("x")), Some(Priority::Critical));
    }

    #[test]
    fn paths_outside_root_are_ignored() {
        let root = PathBuf::from("/work/repo");
        assert_eq!(
            relative_to(&root, Path::new("/work/repo/src/a.rs")),
            Some(PathBuf::from("src/a.rs"))
        );
        assert_eq!(relative_to(&root, Path::new("/tmp/a.rs")), None);
        assert_eq!(relative_to(&root, Path::new("/work/repo")), None);
    }
}
