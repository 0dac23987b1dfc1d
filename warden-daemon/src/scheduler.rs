//! Cancellable deadline map driving every daemon timer.
//!
//! One deadline per key; scheduling an existing key replaces it. The event
//! loop sleeps until [`Scheduler::next_deadline`] and then drains
//! [`Scheduler::pop_due`].

use std::collections::BTreeMap;
use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct Scheduler<K: Ord + Clone> {
    deadlines: BTreeMap<K, Instant>,
}

impl<K: Ord + Clone> Default for Scheduler<K> {
    fn default() -> Self {
        Self {
            deadlines: BTreeMap::new(),
        }
    }
}

impl<K: Ord + Clone> Scheduler<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `key` to fire at `at`, replacing any existing deadline.
    pub fn schedule_at(&mut self, key: K, at: Instant) {
        self.deadlines.insert(key, at);
    }

    pub fn schedule_in(&mut self, key: K, delay: Duration) {
        self.schedule_at(key, Instant::now() + delay);
    }

    /// Like [`schedule_in`](Self::schedule_in), but never postpones an
    /// earlier deadline already set for `key`.
    pub fn schedule_earliest(&mut self, key: K, delay: Duration) {
        let at = Instant::now() + delay;
        self.deadlines
            .entry(key)
            .and_modify(|existing| *existing = (*existing).min(at))
            .or_insert(at);
    }

    pub fn cancel(&mut self, key: &K) -> bool {
        self.deadlines.remove(key).is_some()
    }

    pub fn deadline(&self, key: &K) -> Option<Instant> {
        self.deadlines.get(key).copied()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.deadlines.values().min().copied()
    }

    /// Remove and return every key due at `now`, earliest first.
    pub fn pop_due(&mut self, now: Instant) -> Vec<K> {
        let mut due: Vec<(Instant, K)> = self
            .deadlines
            .iter()
            .filter(|(_, at)| **at <= now)
            .map(|(key, at)| (*at, key.clone()))
            .collect();
        due.sort_by(|a, b| a.0.cmp(&b.0));
        for (_, key) in &due {
            self.deadlines.remove(key);
        }
        due.into_iter().map(|(_, key)| key).collect()
    }

    pub fn len(&self) -> usize {
        self.deadlines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deadlines.is_empty()
    }
}

/// Sleep until `deadline`, or forever when there is none.
pub async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending::<()>().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::advance;
    use tokio_test::{assert_pending, assert_ready, task};

    #[tokio::test(start_paused = true, flavor = "current_thread")]
    async fn due_keys_pop_in_deadline_order() {
        let mut scheduler = Scheduler::new();
        scheduler.schedule_in("pull", Duration::from_secs(60));
        scheduler.schedule_in("push", Duration::from_secs(30));
        scheduler.schedule_in("retry", Duration::from_millis(500));

        advance(Duration::from_secs(30)).await;
        assert_eq!(scheduler.pop_due(Instant::now()), vec!["retry", "push"]);
        assert_eq!(scheduler.len(), 1);
    }

    #[tokio::test(start_paused = true, flavor = "current_thread")]
    async fn rescheduling_replaces_and_cancel_removes() {
        let mut scheduler = Scheduler::new();
        scheduler.schedule_in(1u8, Duration::from_secs(10));
        scheduler.schedule_in(1u8, Duration::from_secs(20));
        assert_eq!(
            scheduler.deadline(&1),
            Some(Instant::now() + Duration::from_secs(20))
        );

        scheduler.schedule_earliest(1u8, Duration::from_secs(5));
        scheduler.schedule_earliest(1u8, Duration::from_secs(50));
        assert_eq!(
            scheduler.deadline(&1),
            Some(Instant::now() + Duration::from_secs(5))
        );

        assert!(scheduler.cancel(&1));
        assert!(scheduler.is_empty());
        assert_eq!(scheduler.next_deadline(), None);
    }

    #[tokio::test(start_paused = true, flavor = "current_thread")]
    async fn sleep_without_deadline_never_fires() {
        let mut never = task::spawn(sleep_until_opt(None));
        assert_pending!(never.poll());
        advance(Duration::from_secs(3600)).await;
        assert_pending!(never.poll());

        let mut soon = task::spawn(sleep_until_opt(Some(Instant::now() + Duration::from_secs(1))));
        assert_pending!(soon.poll());
        advance(Duration::from_secs(1)).await;
        assert_ready!(soon.poll());
    }
}
