//! Recursive filesystem watcher feeding the change aggregator.

use std::path::{Path, PathBuf};

use notify::event::{ModifyKind, RenameMode};
use notify::{recommended_watcher, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};

use warden_sync::ChangeKind;

use crate::error::DaemonError;
use crate::paths::WARDEN_DIR;

/// One path-level change reported by the watcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsChange {
    pub kind: ChangeKind,
    pub path: PathBuf,
}

/// Watch `root` recursively and hand every relevant change to `sink`.
///
/// The returned watcher must be kept alive for events to keep flowing.
pub fn watch_tree<F>(root: &Path, sink: F) -> Result<RecommendedWatcher, DaemonError>
where
    F: Fn(FsChange) + Send + 'static,
{
    let watch_root = root.to_path_buf();
    let mut watcher = recommended_watcher(move |event: notify::Result<Event>| match event {
        Ok(event) => {
            for change in changes_from_event(&watch_root, event) {
                sink(change);
            }
        }
        Err(err) => tracing::warn!(error = %err, "watcher event error"),
    })?;
    watcher.watch(root, RecursiveMode::Recursive)?;
    tracing::info!(root = %root.display(), "watching working tree");
    Ok(watcher)
}

/// Map a notify event to path changes, dropping access events and anything
/// under `.git/` or `.warden/`.
pub fn changes_from_event(root: &Path, event: Event) -> Vec<FsChange> {
    let Some(kind) = change_kind(&event.kind) else {
        return Vec::new();
    };
    event
        .paths
        .into_iter()
        .filter(|path| !is_internal_path(root, path))
        .map(|path| FsChange { kind, path })
        .collect()
}

pub fn change_kind(kind: &EventKind) -> Option<ChangeKind> {
    match kind {
        EventKind::Create(_) => Some(ChangeKind::Created),
        EventKind::Remove(_) => Some(ChangeKind::Removed),
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => Some(ChangeKind::Removed),
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => Some(ChangeKind::Created),
        EventKind::Modify(_) => Some(ChangeKind::Modified),
        _ => None,
    }
}

/// Repository metadata and the daemon's own runtime directory.
pub fn is_internal_path(root: &Path, path: &Path) -> bool {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .components()
        .next()
        .map(|first| {
            let first = first.as_os_str();
            first == ".git" || first == WARDEN_DIR
        })
        .unwrap_or(false)
}
