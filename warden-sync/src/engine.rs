//! Sync engine state: guards, pending changes, push/pull admission and
//! completion bookkeeping.
//!
//! The engine itself never touches the VCS. [`SyncEngine::request_push`]
//! decides whether a cycle may start and hands back a [`PushPlan`]; the caller
//! runs it (see [`crate::cycle`]) and reports the outcome through
//! [`SyncEngine::complete_push`]. Every method takes `now` explicitly so the
//! daemon can drive it from a paused clock in tests.

use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::Serialize;

use warden_core::{Priority, RateLimitConfig, SyncConfig};

use crate::changes::PendingChangeSet;
use crate::cycle::{PullOutcome, PullReport, PushOutcome, PushReport};
use crate::message::render_commit_message;
use crate::metrics::PerformanceMetrics;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Why a push cycle was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncTrigger {
    Critical,
    Interval,
    Retry,
    Manual,
}

impl fmt::Display for SyncTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncTrigger::Critical => write!(f, "critical"),
            SyncTrigger::Interval => write!(f, "interval"),
            SyncTrigger::Retry => write!(f, "retry"),
            SyncTrigger::Manual => write!(f, "manual"),
        }
    }
}

/// States of the sync state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncPhase {
    Idle,
    Staging,
    Committing,
    Pushing,
    Recovering,
    Pulling,
}

/// Guard flags and timestamps.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncState {
    pub is_pushing: bool,
    pub is_pulling: bool,
    pub last_push_time: Option<Instant>,
    pub last_pull_time: Option<Instant>,
    pub consecutive_pushes: u32,
    pub force_push_needed: bool,
    pub pending_retry: bool,
}

/// Engine tuning resolved from [`SyncConfig`] plus the branch found at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    pub remote: String,
    pub branch: String,
    pub min_push_spacing: Duration,
    pub min_pull_spacing: Duration,
    pub retry_delay: Duration,
    pub commit_template: String,
    pub rate_limit: RateLimitConfig,
}

impl EngineSettings {
    pub fn from_config(config: &SyncConfig, branch: impl Into<String>) -> Self {
        Self {
            remote: config.remote.clone(),
            branch: branch.into(),
            min_push_spacing: config.min_push_spacing,
            min_pull_spacing: config.min_pull_spacing,
            retry_delay: config.retry_delay,
            commit_template: config.commit_message.clone(),
            rate_limit: config.rate_limit.clone(),
        }
    }
}

/// Everything a push cycle needs, captured when it is admitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushPlan {
    pub trigger: SyncTrigger,
    pub paths: Vec<PathBuf>,
    pub force: bool,
    pub remote: String,
    pub branch: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullPlan {
    pub remote: String,
    pub branch: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DelayReason {
    Spacing,
    RateLimited,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NothingPending,
}

/// Result of [`SyncEngine::request_push`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushDecision {
    Start(PushPlan),
    /// Another operation is in flight; one re-run is owed when it finishes.
    Deferred,
    /// Ask again after `wait`.
    Delayed { wait: Duration, reason: DelayReason },
    Skipped(SkipReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullDropReason {
    AlreadyPulling,
    PushInFlight,
    TooSoon,
}

/// Result of [`SyncEngine::request_pull`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PullDecision {
    Start(PullPlan),
    Dropped(PullDropReason),
}

/// Serializable view for the status surface.
#[derive(Debug, Clone, Serialize)]
pub struct SyncSnapshot {
    pub phase: SyncPhase,
    pub remote: String,
    pub branch: String,
    pub pending: usize,
    pub pending_paths: Vec<PathBuf>,
    pub highest_priority: Option<Priority>,
    pub force_push_needed: bool,
    pub pending_retry: bool,
    pub consecutive_pushes: u32,
    pub secs_since_push: Option<u64>,
    pub secs_since_pull: Option<u64>,
    pub metrics: PerformanceMetrics,
}

/// Paths a running push took, and those re-touched while it ran.
#[derive(Debug, Default)]
struct InFlightPush {
    paths: Vec<PathBuf>,
    touched: HashSet<PathBuf>,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct SyncEngine {
    settings: EngineSettings,
    state: SyncState,
    pending: PendingChangeSet,
    in_flight: Option<InFlightPush>,
    recent_pushes: VecDeque<Instant>,
    metrics: PerformanceMetrics,
}

impl SyncEngine {
    pub fn new(settings: EngineSettings) -> Self {
        Self {
            settings,
            state: SyncState::default(),
            pending: PendingChangeSet::default(),
            in_flight: None,
            recent_pushes: VecDeque::new(),
            metrics: PerformanceMetrics::default(),
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn state(&self) -> &SyncState {
        &self.state
    }

    pub fn pending(&self) -> &PendingChangeSet {
        &self.pending
    }

    pub fn metrics(&self) -> &PerformanceMetrics {
        &self.metrics
    }

    pub fn phase(&self) -> SyncPhase {
        if self.state.is_pushing {
            SyncPhase::Pushing
        } else if self.state.is_pulling {
            SyncPhase::Pulling
        } else {
            SyncPhase::Idle
        }
    }

    /// Add a settled path to the pending set. Returns `true` for critical
    /// paths, which should trigger an immediate push request.
    pub fn record_change(&mut self, path: PathBuf, priority: Priority) -> bool {
        if let Some(in_flight) = self.in_flight.as_mut() {
            in_flight.touched.insert(path.clone());
        }
        if self.pending.insert(path.clone(), priority) {
            tracing::debug!("pending +{} ({priority})", path.display());
        }
        priority == Priority::Critical
    }

    /// Decide whether a push cycle may start now.
    pub fn request_push(&mut self, trigger: SyncTrigger, now: Instant) -> PushDecision {
        if self.state.is_pushing || self.state.is_pulling {
            if !self.state.pending_retry {
                tracing::debug!("{trigger} push requested while busy; re-run queued");
            }
            self.state.pending_retry = true;
            return PushDecision::Deferred;
        }

        if self.pending.is_empty() {
            return PushDecision::Skipped(SkipReason::NothingPending);
        }

        if let Some(last) = self.state.last_push_time {
            let since = now.saturating_duration_since(last);
            if since < self.settings.min_push_spacing {
                return PushDecision::Delayed {
                    wait: self.settings.min_push_spacing - since,
                    reason: DelayReason::Spacing,
                };
            }
        }

        self.prune_recent(now);
        if self.recent_pushes.len() > self.settings.rate_limit.threshold as usize {
            tracing::info!(
                "rate limited: {} pushes in {:?}, delaying {:?}",
                self.recent_pushes.len(),
                self.settings.rate_limit.window,
                self.settings.rate_limit.cooldown
            );
            return PushDecision::Delayed {
                wait: self.settings.rate_limit.cooldown,
                reason: DelayReason::RateLimited,
            };
        }

        let paths = self.pending.paths();
        let force = std::mem::take(&mut self.state.force_push_needed);
        let message = render_commit_message(
            &self.settings.commit_template,
            &trigger.to_string(),
            &paths,
            Utc::now(),
        );

        self.state.is_pushing = true;
        self.in_flight = Some(InFlightPush {
            paths: paths.clone(),
            touched: HashSet::new(),
        });

        PushDecision::Start(PushPlan {
            trigger,
            paths,
            force,
            remote: self.settings.remote.clone(),
            branch: self.settings.branch.clone(),
            message,
        })
    }

    /// Record the outcome of a push cycle started by [`request_push`].
    ///
    /// Returns the delay before the owed re-run, if a request arrived while
    /// the cycle was in flight.
    ///
    /// [`request_push`]: SyncEngine::request_push
    pub fn complete_push(&mut self, report: &PushReport, now: Instant) -> Option<Duration> {
        self.state.is_pushing = false;
        let in_flight = self.in_flight.take().unwrap_or_default();

        if report.rejected {
            self.state.force_push_needed = true;
        }
        for path in &report.ignored {
            self.pending.remove(path);
        }

        match &report.outcome {
            PushOutcome::Pushed {
                files,
                forced,
                committed,
            } => {
                self.settle_in_flight(&in_flight);
                self.state.consecutive_pushes = match self.state.last_push_time {
                    Some(last)
                        if now.saturating_duration_since(last)
                            < self.settings.rate_limit.window =>
                    {
                        self.state.consecutive_pushes + 1
                    }
                    _ => 1,
                };
                self.state.last_push_time = Some(now);
                self.state.force_push_needed = false;
                self.recent_pushes.push_back(now);
                self.metrics
                    .record_push(report.duration, *files, *forced, *committed);
                tracing::info!(
                    "pushed {files} file(s) to {}/{} in {:?}{}",
                    self.settings.remote,
                    self.settings.branch,
                    report.duration,
                    if *forced { " (forced)" } else { "" }
                );
            }
            PushOutcome::NothingToCommit => {
                // The tree already matches HEAD for these paths.
                self.settle_in_flight(&in_flight);
                tracing::debug!("push cycle found nothing to commit or push");
            }
            PushOutcome::Failed { stage, error } => {
                self.metrics.record_error(stage, error.to_string());
                tracing::error!("{stage} failed: {error}; {} path(s) stay pending", self.pending.len());
            }
        }

        self.take_retry()
    }

    /// Drop the cycle's paths from the pending set, except those touched
    /// again while it ran.
    fn settle_in_flight(&mut self, in_flight: &InFlightPush) {
        for path in &in_flight.paths {
            if !in_flight.touched.contains(path) {
                self.pending.remove(path);
            }
        }
    }

    /// Decide whether a pull cycle may start now.
    pub fn request_pull(&mut self, now: Instant) -> PullDecision {
        if self.state.is_pulling {
            return PullDecision::Dropped(PullDropReason::AlreadyPulling);
        }
        if self.state.is_pushing {
            return PullDecision::Dropped(PullDropReason::PushInFlight);
        }
        if let Some(last) = self.state.last_pull_time {
            if now.saturating_duration_since(last) < self.settings.min_pull_spacing {
                return PullDecision::Dropped(PullDropReason::TooSoon);
            }
        }
        self.state.is_pulling = true;
        PullDecision::Start(PullPlan {
            remote: self.settings.remote.clone(),
            branch: self.settings.branch.clone(),
        })
    }

    /// Record the outcome of a pull cycle; returns an owed push re-run delay.
    pub fn complete_pull(&mut self, report: &PullReport, now: Instant) -> Option<Duration> {
        self.state.is_pulling = false;
        self.state.last_pull_time = Some(now);
        match &report.outcome {
            PullOutcome::UpToDate => {
                tracing::debug!("already up to date with {}", self.settings.remote);
                self.metrics.record_pull(report.duration, 0);
            }
            PullOutcome::Pulled { commits } => {
                tracing::info!("pulled {commits} commit(s) in {:?}", report.duration);
                self.metrics.record_pull(report.duration, *commits);
            }
            PullOutcome::Failed { stage, error } => {
                self.metrics.record_error(stage, error.to_string());
                tracing::warn!("pull cycle {stage} failed: {error}");
            }
        }
        self.take_retry()
    }

    pub fn snapshot(&self, now: Instant) -> SyncSnapshot {
        let since = |t: Option<Instant>| t.map(|t| now.saturating_duration_since(t).as_secs());
        SyncSnapshot {
            phase: self.phase(),
            remote: self.settings.remote.clone(),
            branch: self.settings.branch.clone(),
            pending: self.pending.len(),
            pending_paths: self.pending.paths(),
            highest_priority: self.pending.highest(),
            force_push_needed: self.state.force_push_needed,
            pending_retry: self.state.pending_retry,
            consecutive_pushes: self.state.consecutive_pushes,
            secs_since_push: since(self.state.last_push_time),
            secs_since_pull: since(self.state.last_pull_time),
            metrics: self.metrics.clone(),
        }
    }

    fn take_retry(&mut self) -> Option<Duration> {
        std::mem::take(&mut self.state.pending_retry).then_some(self.settings.retry_delay)
    }

    fn prune_recent(&mut self, now: Instant) {
        let window = self.settings.rate_limit.window;
        while let Some(oldest) = self.recent_pushes.front() {
            if now.saturating_duration_since(*oldest) >= window {
                self.recent_pushes.pop_front();
            } else {
                break;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
