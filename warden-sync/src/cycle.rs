//! Execution of admitted push and pull cycles against a [`Vcs`].
//!
//! These functions block on the VCS and are meant to run on a blocking
//! thread. They never mutate engine state; the caller feeds the returned
//! report back into [`crate::engine::SyncEngine`].

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use warden_core::SyncConfig;

use crate::engine::{PullPlan, PushPlan, SyncPhase};
use crate::error::{SyncError, VcsError};
use crate::vcs::{Vcs, VcsCommand};

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushOutcome {
    Pushed {
        files: usize,
        forced: bool,
        committed: bool,
    },
    /// Nothing staged and no unpushed commits.
    NothingToCommit,
    Failed {
        stage: &'static str,
        error: VcsError,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushReport {
    pub outcome: PushOutcome,
    /// States visited, in order.
    pub phases: Vec<SyncPhase>,
    /// The remote refused the first push as diverged.
    pub rejected: bool,
    /// Planned paths git refused to stage because they are gitignored.
    pub ignored: Vec<PathBuf>,
    pub duration: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PullOutcome {
    UpToDate,
    Pulled { commits: usize },
    Failed {
        stage: &'static str,
        error: VcsError,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullReport {
    pub outcome: PullOutcome,
    pub duration: Duration,
}

// ---------------------------------------------------------------------------
// Push
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
enum PushStep {
    Staging,
    Committing,
    Pushing,
    Recovering,
}

impl PushStep {
    fn phase(self) -> SyncPhase {
        match self {
            PushStep::Staging => SyncPhase::Staging,
            PushStep::Committing => SyncPhase::Committing,
            PushStep::Pushing => SyncPhase::Pushing,
            PushStep::Recovering => SyncPhase::Recovering,
        }
    }
}

/// Stage, commit and push the paths in `plan`, recovering once from a
/// diverged remote by pulling unrelated histories and force-pushing.
pub fn run_push_cycle(vcs: &dyn Vcs, plan: &PushPlan) -> PushReport {
    let started = Instant::now();
    let mut phases = Vec::new();
    let mut rejected = false;
    let mut committed = false;
    let mut ignored = Vec::new();
    let mut step = PushStep::Staging;

    let outcome = loop {
        phases.push(step.phase());
        match step {
            PushStep::Staging => {
                match stage(vcs, plan) {
                    Ok(skipped) => ignored = skipped,
                    Err(error) => break PushOutcome::Failed { stage: "add", error },
                }
                match has_staged_changes(vcs) {
                    Ok(true) => step = PushStep::Committing,
                    Ok(false) if has_unpushed_commits(vcs, plan) => {
                        tracing::debug!("nothing staged; pushing existing local commits");
                        step = PushStep::Pushing;
                    }
                    Ok(false) => break PushOutcome::NothingToCommit,
                    Err(error) => break PushOutcome::Failed { stage: "status", error },
                }
            }
            PushStep::Committing => {
                let commit = VcsCommand::Commit {
                    message: plan.message.clone(),
                };
                if let Err(error) = vcs.exec(&commit) {
                    break PushOutcome::Failed { stage: "commit", error };
                }
                committed = true;
                step = PushStep::Pushing;
            }
            PushStep::Pushing => match vcs.exec(&push_command(plan, plan.force)) {
                Ok(_) => {
                    break PushOutcome::Pushed {
                        files: plan.paths.len() - ignored.len(),
                        forced: plan.force,
                        committed,
                    }
                }
                Err(error) if error.is_rejection() && !rejected => {
                    tracing::warn!("push to {}/{} rejected: {}", plan.remote, plan.branch, error.stderr());
                    rejected = true;
                    step = PushStep::Recovering;
                }
                Err(error) => break PushOutcome::Failed { stage: "push", error },
            },
            PushStep::Recovering => {
                tracing::warn!(
                    "diverged history: pulling {}/{} with unrelated histories, then force-pushing; remote commits may be overwritten",
                    plan.remote,
                    plan.branch
                );
                let pull = VcsCommand::Pull {
                    remote: plan.remote.clone(),
                    branch: plan.branch.clone(),
                    allow_unrelated: true,
                };
                if let Err(error) = vcs.exec(&pull) {
                    break PushOutcome::Failed {
                        stage: "recovery-pull",
                        error,
                    };
                }
                match vcs.exec(&push_command(plan, true)) {
                    Ok(_) => {
                        break PushOutcome::Pushed {
                            files: plan.paths.len() - ignored.len(),
                            forced: true,
                            committed,
                        }
                    }
                    Err(error) => break PushOutcome::Failed {
                        stage: "force-push",
                        error,
                    },
                }
            }
        }
    };
    phases.push(SyncPhase::Idle);

    PushReport {
        outcome,
        phases,
        rejected,
        ignored,
        duration: started.elapsed(),
    }
}

fn push_command(plan: &PushPlan, force: bool) -> VcsCommand {
    VcsCommand::Push {
        remote: plan.remote.clone(),
        branch: plan.branch.clone(),
        force,
    }
}

/// `add -A -- <paths>`. A vanished pathspec falls back to staging the whole
/// tree; gitignored paths are dropped and the rest staged again. Returns the
/// dropped paths.
fn stage(vcs: &dyn Vcs, plan: &PushPlan) -> Result<Vec<PathBuf>, VcsError> {
    let add = VcsCommand::Add {
        paths: plan.paths.clone(),
    };
    let error = match vcs.exec(&add) {
        Ok(_) => return Ok(Vec::new()),
        Err(error) => error,
    };

    if error.stderr().contains("did not match any files") {
        tracing::debug!("pathspec vanished, staging whole tree: {}", error.stderr());
        vcs.exec(&VcsCommand::Add { paths: Vec::new() })?;
        return Ok(Vec::new());
    }

    let ignored: Vec<PathBuf> = ignored_paths(error.stderr())
        .into_iter()
        .filter(|path| plan.paths.contains(path))
        .collect();
    if ignored.is_empty() {
        return Err(error);
    }
    let rest: Vec<PathBuf> = plan
        .paths
        .iter()
        .filter(|path| !ignored.contains(path))
        .cloned()
        .collect();
    tracing::warn!(
        "not syncing {} gitignored path(s): {}",
        ignored.len(),
        ignored
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(", ")
    );
    if !rest.is_empty() {
        vcs.exec(&VcsCommand::Add { paths: rest })?;
    }
    Ok(ignored)
}

/// Paths listed after git's "ignored by one of your .gitignore files" notice.
fn ignored_paths(stderr: &str) -> Vec<PathBuf> {
    stderr
        .lines()
        .skip_while(|line| !line.contains("are ignored by one of your .gitignore files"))
        .skip(1)
        .map(str::trim)
        .take_while(|line| !line.is_empty() && !line.starts_with("hint:"))
        .map(PathBuf::from)
        .collect()
}

/// True when `status --porcelain` shows at least one staged entry.
fn has_staged_changes(vcs: &dyn Vcs) -> Result<bool, VcsError> {
    let output = vcs.exec(&VcsCommand::StatusPorcelain)?;
    Ok(output
        .stdout
        .lines()
        .filter_map(|line| line.chars().next())
        .any(|index| !matches!(index, ' ' | '?' | '!')))
}

/// Local commits not yet on the remote branch. A missing remote-tracking
/// branch counts as unpushed.
fn has_unpushed_commits(vcs: &dyn Vcs, plan: &PushPlan) -> bool {
    let log = VcsCommand::Log {
        from: format!("{}/{}", plan.remote, plan.branch),
        to: plan.branch.clone(),
    };
    match vcs.exec(&log) {
        Ok(output) => !output.stdout.trim().is_empty(),
        Err(error) => {
            tracing::debug!("could not compare with remote, assuming unpushed: {error}");
            true
        }
    }
}

// ---------------------------------------------------------------------------
// Pull
// ---------------------------------------------------------------------------

/// Fetch, compare and pull when the remote has moved.
pub fn run_pull_cycle(vcs: &dyn Vcs, plan: &PullPlan) -> PullReport {
    let started = Instant::now();
    let outcome = pull_steps(vcs, plan).unwrap_or_else(|(stage, error)| PullOutcome::Failed {
        stage,
        error,
    });
    PullReport {
        outcome,
        duration: started.elapsed(),
    }
}

fn pull_steps(vcs: &dyn Vcs, plan: &PullPlan) -> Result<PullOutcome, (&'static str, VcsError)> {
    let upstream = format!("{}/{}", plan.remote, plan.branch);

    vcs.exec(&VcsCommand::Fetch {
        remote: plan.remote.clone(),
    })
    .map_err(|e| ("fetch", e))?;

    let diff = vcs
        .exec(&VcsCommand::Diff {
            from: plan.branch.clone(),
            to: upstream.clone(),
        })
        .map_err(|e| ("diff", e))?;
    if diff.stdout.trim().is_empty() {
        return Ok(PullOutcome::UpToDate);
    }

    let incoming = vcs
        .exec(&VcsCommand::Log {
            from: plan.branch.clone(),
            to: upstream,
        })
        .map_err(|e| ("log", e))?;
    let commits = incoming.stdout.lines().filter(|l| !l.trim().is_empty()).count();

    vcs.exec(&VcsCommand::Pull {
        remote: plan.remote.clone(),
        branch: plan.branch.clone(),
        allow_unrelated: false,
    })
    .map_err(|e| ("pull", e))?;

    Ok(PullOutcome::Pulled { commits })
}

// ---------------------------------------------------------------------------
// Pre-flight
// ---------------------------------------------------------------------------

/// Remote and branch the daemon will sync against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRemote {
    pub remote: String,
    pub branch: String,
}

/// Verify the repository and remote exist and resolve the branch.
pub fn preflight(vcs: &dyn Vcs, root: &Path, config: &SyncConfig) -> Result<ResolvedRemote, SyncError> {
    let remotes = vcs.exec(&VcsCommand::Remotes).map_err(|e| match e {
        VcsError::Failed { stderr, .. } => SyncError::NotARepository {
            root: root.to_path_buf(),
            stderr,
        },
        other => SyncError::Vcs(other),
    })?;

    let mut known: Vec<&str> = remotes
        .stdout
        .lines()
        .filter_map(|line| line.split_whitespace().next())
        .collect();
    known.dedup();
    if !known.contains(&config.remote.as_str()) {
        return Err(SyncError::NoRemote {
            remote: config.remote.clone(),
            known: if known.is_empty() {
                "none".to_string()
            } else {
                known.join(", ")
            },
        });
    }

    let branch = match &config.branch {
        Some(branch) => branch.clone(),
        None => vcs
            .exec(&VcsCommand::CurrentBranch)?
            .stdout
            .trim()
            .to_string(),
    };
    if branch.is_empty() {
        return Err(SyncError::DetachedHead);
    }

    tracing::info!("syncing {} against {}/{branch}", root.display(), config.remote);
    Ok(ResolvedRemote {
        remote: config.remote.clone(),
        branch,
    })
}
