//! Performance counters and bounded history for push and pull cycles.

use std::collections::VecDeque;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Entries kept per history ring.
pub const HISTORY_LIMIT: usize = 100;

/// Running count/min/avg/max over completed operations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DurationStats {
    pub count: u64,
    pub total_ms: u64,
    pub min_ms: Option<u64>,
    pub max_ms: u64,
}

impl DurationStats {
    pub fn record(&mut self, duration: Duration) {
        let ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        self.count += 1;
        self.total_ms = self.total_ms.saturating_add(ms);
        self.min_ms = Some(self.min_ms.map_or(ms, |min| min.min(ms)));
        self.max_ms = self.max_ms.max(ms);
    }

    pub fn avg_ms(&self) -> u64 {
        if self.count == 0 {
            0
        } else {
            self.total_ms / self.count
        }
    }
}

/// One completed push or pull.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryEntry {
    pub at: DateTime<Utc>,
    pub duration_ms: u64,
    /// Files pushed, or commits pulled.
    pub items: usize,
    pub forced: bool,
}

/// One logged failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorEntry {
    pub at: DateTime<Utc>,
    /// Operation name: `push`, `pull`, `commit`, ...
    pub kind: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PerformanceMetrics {
    pub started_at: DateTime<Utc>,
    pub pushes: DurationStats,
    pub pulls: DurationStats,
    pub files_pushed: u64,
    pub commit_count: u64,
    pub error_count: u64,
    pub push_history: VecDeque<HistoryEntry>,
    pub pull_history: VecDeque<HistoryEntry>,
    pub errors: VecDeque<ErrorEntry>,
}

impl Default for PerformanceMetrics {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

impl PerformanceMetrics {
    pub fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            pushes: DurationStats::default(),
            pulls: DurationStats::default(),
            files_pushed: 0,
            commit_count: 0,
            error_count: 0,
            push_history: VecDeque::new(),
            pull_history: VecDeque::new(),
            errors: VecDeque::new(),
        }
    }

    pub fn record_push(&mut self, duration: Duration, files: usize, forced: bool, committed: bool) {
        self.pushes.record(duration);
        self.files_pushed += files as u64;
        if committed {
            self.commit_count += 1;
        }
        push_bounded(
            &mut self.push_history,
            HistoryEntry {
                at: Utc::now(),
                duration_ms: millis(duration),
                items: files,
                forced,
            },
        );
    }

    pub fn record_pull(&mut self, duration: Duration, commits: usize) {
        self.pulls.record(duration);
        push_bounded(
            &mut self.pull_history,
            HistoryEntry {
                at: Utc::now(),
                duration_ms: millis(duration),
                items: commits,
                forced: false,
            },
        );
    }

    pub fn record_error(&mut self, kind: &str, message: impl Into<String>) {
        self.error_count += 1;
        push_bounded(
            &mut self.errors,
            ErrorEntry {
                at: Utc::now(),
                kind: kind.to_string(),
                message: message.into(),
            },
        );
    }

    /// One-line summary for the periodic performance log.
    pub fn summary_line(&self, now: DateTime<Utc>) -> String {
        let uptime = (now - self.started_at).num_seconds().max(0);
        format!(
            "uptime {}m{}s | pushes {} (avg {}ms, fastest {}ms, slowest {}ms) | pulls {} (avg {}ms) | files {} | errors {}",
            uptime / 60,
            uptime % 60,
            self.pushes.count,
            self.pushes.avg_ms(),
            self.pushes.min_ms.unwrap_or(0),
            self.pushes.max_ms,
            self.pulls.count,
            self.pulls.avg_ms(),
            self.files_pushed,
            self.error_count,
        )
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn push_bounded<T>(ring: &mut VecDeque<T>, entry: T) {
    if ring.len() == HISTORY_LIMIT {
        ring.pop_front();
    }
    ring.push_back(entry);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_track_min_avg_max() {
        let mut stats = DurationStats::default();
        stats.record(Duration::from_millis(300));
        stats.record(Duration::from_millis(100));
        stats.record(Duration::from_millis(200));
        assert_eq!(stats.count, 3);
        assert_eq!(stats.min_ms, Some(100));
        assert_eq!(stats.max_ms, 300);
        assert_eq!(stats.avg_ms(), 200);
    }

    #[test]
    fn history_is_bounded() {
        let mut metrics = PerformanceMetrics::default();
        for i in 0..(HISTORY_LIMIT + 20) {
            metrics.record_push(Duration::from_millis(i as u64), 1, false, true);
            metrics.record_error("push", format!("error {i}"));
        }
        assert_eq!(metrics.push_history.len(), HISTORY_LIMIT);
        assert_eq!(metrics.errors.len(), HISTORY_LIMIT);
        assert_eq!(metrics.error_count, (HISTORY_LIMIT + 20) as u64);
        assert_eq!(metrics.errors.front().map(|e| e.message.as_str()), Some("error 20"));
        assert_eq!(metrics.commit_count, (HISTORY_LIMIT + 20) as u64);
    }

    #[test]
    fn summary_mentions_counts() {
        let started = Utc::now();
        let mut metrics = PerformanceMetrics::new(started);
        metrics.record_pull(Duration::from_millis(40), 2);
        let line = metrics.summary_line(started + chrono::Duration::seconds(125));
        assert!(line.starts_with("uptime 2m5s"), "{line}");
        assert!(line.contains("pulls 1 (avg 40ms)"), "{line}");
    }
}
