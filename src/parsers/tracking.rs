//! Sliding failure windows and dedup maps shared by the parsers.
//!
//! Both structures are keyed by whatever the owning parser correlates on
//! (user name, IP address, composite strings) and take explicit timestamps,
//! so time only moves when the caller says so.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::hash::Hash;

/// Per-key ordered failure timestamps, bounded by a sliding window.
#[derive(Debug, Clone)]
pub struct FailureWindow<K> {
    window: Duration,
    entries: HashMap<K, Vec<DateTime<Utc>>>,
}

impl<K: Eq + Hash + Clone> FailureWindow<K> {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            entries: HashMap::new(),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Record one failure at `at` and return the count within the window
    /// ending at `at`, this failure included.
    pub fn record(&mut self, key: K, at: DateTime<Utc>) -> usize {
        let cutoff = at - self.window;
        let times = self.entries.entry(key).or_default();
        times.retain(|t| *t >= cutoff);
        // Lines from several files can interleave slightly out of order.
        let pos = times.partition_point(|t| *t <= at);
        times.insert(pos, at);
        times.iter().filter(|t| **t <= at).count()
    }

    /// Failures for `key` within the window ending at `now`.
    pub fn count(&self, key: &K, now: DateTime<Utc>) -> usize {
        let cutoff = now - self.window;
        self.entries
            .get(key)
            .map(|times| times.iter().filter(|t| **t >= cutoff && **t <= now).count())
            .unwrap_or(0)
    }

    /// Drop timestamps older than `max_age` before `now`, and keys left empty.
    /// Returns the number of keys removed.
    pub fn prune(&mut self, now: DateTime<Utc>, max_age: Duration) -> usize {
        let cutoff = now - max_age;
        let before = self.entries.len();
        self.entries.retain(|_, times| {
            times.retain(|t| *t >= cutoff);
            !times.is_empty()
        });
        before - self.entries.len()
    }

    pub fn clear(&mut self, key: &K) {
        self.entries.remove(key);
    }

    /// Number of keys currently tracked.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Last-seen map used to suppress repeats of the same logical event.
#[derive(Debug, Clone)]
pub struct RecentEvents<K> {
    window: Duration,
    seen: HashMap<K, DateTime<Utc>>,
}

impl<K: Eq + Hash> RecentEvents<K> {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            seen: HashMap::new(),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// True when `key` was marked within the window around `at`.
    pub fn is_recent(&self, key: &K, at: DateTime<Utc>) -> bool {
        match self.seen.get(key) {
            Some(last) => {
                let gap = if at >= *last { at - *last } else { *last - at };
                gap <= self.window
            }
            None => false,
        }
    }

    pub fn mark(&mut self, key: K, at: DateTime<Utc>) {
        self.seen.insert(key, at);
    }

    /// Returns true if `key` is a duplicate. Otherwise marks it and returns
    /// false. A suppressed duplicate does not extend the window.
    pub fn check_and_mark(&mut self, key: K, at: DateTime<Utc>) -> bool {
        if self.is_recent(&key, at) {
            return true;
        }
        self.mark(key, at);
        false
    }

    /// Evict entries last seen more than `max_age` before `now`.
    pub fn evict_older_than(&mut self, now: DateTime<Utc>, max_age: Duration) -> usize {
        let cutoff = now - max_age;
        let before = self.seen.len();
        self.seen.retain(|_, last| *last >= cutoff);
        before - self.seen.len()
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}
