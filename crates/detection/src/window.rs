//! Bounded per-process syscall window.

use std::collections::{HashMap, VecDeque};

/// Fixed capacity of the per-process ring buffer. Oldest entries are
/// evicted on overflow; `total_observed` keeps counting regardless.
pub const WINDOW_CAPACITY: usize = 100;

#[derive(Debug, Clone)]
struct WindowEntry {
    name: String,
    ts: f64,
}

/// Ring buffer of the most recent syscalls attributed to one process,
/// time-ordered, with a monotonic lifetime counter that survives eviction.
#[derive(Debug, Clone, Default)]
pub struct SyscallWindow {
    entries: VecDeque<WindowEntry>,
    total_observed: u64,
}

impl SyscallWindow {
    pub fn new() -> Self {
        Self {
            entries: VecDeque::with_capacity(WINDOW_CAPACITY),
            total_observed: 0,
        }
    }

    pub fn push(&mut self, name: &str, ts: f64) {
        self.total_observed = self.total_observed.saturating_add(1);
        self.entries.push_back(WindowEntry {
            name: name.to_string(),
            ts,
        });
        while self.entries.len() > WINDOW_CAPACITY {
            self.entries.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Lifetime syscall count, never reset by window eviction.
    pub fn total_observed(&self) -> u64 {
        self.total_observed
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.name.as_str())
    }

    /// Most recent entries first-to-last, capped at `limit`.
    pub fn recent(&self, limit: usize) -> Vec<String> {
        let skip = self.entries.len().saturating_sub(limit);
        self.entries.iter().skip(skip).map(|e| e.name.clone()).collect()
    }

    /// Wall-clock span covered by the window contents.
    pub fn span_secs(&self) -> f64 {
        match (self.entries.front(), self.entries.back()) {
            (Some(first), Some(last)) => (last.ts - first.ts).max(0.0),
            _ => 0.0,
        }
    }

    /// Frequency table over the current window contents.
    pub fn counts(&self) -> HashMap<String, u64> {
        let mut counts: HashMap<String, u64> = HashMap::new();
        for entry in &self.entries {
            *counts.entry(entry.name.clone()).or_insert(0) += 1;
        }
        counts
    }

    /// Consecutive ordered pairs, oldest first.
    pub fn bigrams(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .zip(self.entries.iter().skip(1))
            .map(|(a, b)| (a.name.as_str(), b.name.as_str()))
    }
}
