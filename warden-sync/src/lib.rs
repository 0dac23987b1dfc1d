//! # warden-sync
//!
//! Working-tree synchronization with a remote git server.
//!
//! File events flow through [`changes::ChangeAggregator`] into a
//! [`engine::SyncEngine`], which admits push and pull cycles. Admitted cycles
//! run against a [`vcs::Vcs`] via [`cycle::run_push_cycle`] and
//! [`cycle::run_pull_cycle`], and their reports are fed back to the engine.

pub mod changes;
pub mod cycle;
pub mod engine;
pub mod error;
pub mod message;
pub mod metrics;
pub mod vcs;

pub use changes::{ChangeAggregator, ChangeKind, PendingChangeSet, SettledChange};
pub use cycle::{
    preflight, run_pull_cycle, run_push_cycle, PullOutcome, PullReport, PushOutcome, PushReport,
    ResolvedRemote,
};
pub use engine::{
    EngineSettings, PullDecision, PushDecision, PushPlan, SyncEngine, SyncPhase, SyncSnapshot,
    SyncTrigger,
};
pub use error::{SyncError, VcsError};
pub use vcs::{GitCli, Vcs, VcsCommand, VcsOutput};
