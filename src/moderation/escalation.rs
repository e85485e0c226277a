//! Sliding-window violation counting for automatic timeouts
//!
//! Windows live in process memory only and are lost on restart. The tracker
//! assumes a single running instance per store.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::Arc;

/// Violation timestamps for one author in one guild
#[derive(Debug, Clone, Default)]
struct ViolationWindow {
    hits: VecDeque<DateTime<Utc>>,
    /// Window length used on the last access, for idle eviction
    span: Duration,
}

impl ViolationWindow {
    fn prune(&mut self, now: DateTime<Utc>) {
        while self.hits.front().is_some_and(|hit| now - *hit > self.span) {
            self.hits.pop_front();
        }
    }

    fn is_idle(&self, now: DateTime<Utc>) -> bool {
        self.hits.back().is_none_or(|last| now - *last > self.span)
    }
}

/// Tracks per-(guild, author) violations and decides when to escalate
#[derive(Clone, Default)]
pub struct EscalationTracker {
    windows: Arc<DashMap<(u64, u64), ViolationWindow>>,
}

impl EscalationTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a violation now; see [`EscalationTracker::record_violation_at`]
    pub fn record_violation(
        &self,
        guild_id: u64,
        author_id: u64,
        window: Duration,
        max_violations: usize,
    ) -> bool {
        self.record_violation_at(guild_id, author_id, window, max_violations, Utc::now())
    }

    /// Append a violation, prune entries older than `window`, and report
    /// whether the count reached `max_violations`
    ///
    /// A trigger empties the window, so the next violation starts a fresh
    /// count. The append, prune and reset happen under one entry lock, so
    /// concurrent violations from the same author cannot both trigger.
    pub fn record_violation_at(
        &self,
        guild_id: u64,
        author_id: u64,
        window: Duration,
        max_violations: usize,
        now: DateTime<Utc>,
    ) -> bool {
        let mut entry = self.windows.entry((guild_id, author_id)).or_default();
        entry.span = window;
        entry.prune(now);
        entry.hits.push_back(now);

        if entry.hits.len() >= max_violations.max(1) {
            entry.hits.clear();
            true
        } else {
            false
        }
    }

    /// Violations currently counted for an author
    #[must_use]
    pub fn pending(&self, guild_id: u64, author_id: u64) -> usize {
        self.windows
            .get(&(guild_id, author_id))
            .map_or(0, |window| window.hits.len())
    }

    /// Drop windows whose every entry has aged out; returns how many went
    pub fn evict_idle(&self, now: DateTime<Utc>) -> usize {
        let before = self.windows.len();
        self.windows.retain(|_, window| !window.is_idle(now));
        before.saturating_sub(self.windows.len())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.windows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }
}
