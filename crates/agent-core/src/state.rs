//! Sharded per-key state.
//!
//! One global lock would serialize unrelated processes at high event
//! rates, so every mutable map in the engine is sharded by key hash and
//! locked per shard. Locks are held only for the duration of one event's
//! bookkeeping, never across an await point.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use parking_lot::RwLock;

use baseline::BehaviorBaseline;
use detection::{ResourceSnapshot, RiskState, SyscallWindow};
use serde::Serialize;

const SHARD_COUNT: usize = 16;

/// Hash-sharded map with per-shard reader-writer locks.
pub struct ShardedMap<K, V> {
    shards: Vec<RwLock<HashMap<K, V>>>,
}

impl<K: Hash + Eq + Clone, V> ShardedMap<K, V> {
    pub fn new() -> Self {
        Self {
            shards: (0..SHARD_COUNT)
                .map(|_| RwLock::new(HashMap::new()))
                .collect(),
        }
    }

    fn shard(&self, key: &K) -> &RwLock<HashMap<K, V>> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % self.shards.len()]
    }

    /// Run `f` against the entry for `key`, inserting `default()` first if
    /// absent. The shard lock is held for the duration of `f`.
    pub fn with_entry<R>(
        &self,
        key: K,
        default: impl FnOnce() -> V,
        f: impl FnOnce(&mut V) -> R,
    ) -> R {
        let shard = self.shard(&key);
        let mut guard = shard.write();
        let value = guard.entry(key).or_insert_with(default);
        f(value)
    }

    /// Read-only access to an existing entry.
    pub fn get_with<R>(&self, key: &K, f: impl FnOnce(&V) -> R) -> Option<R> {
        let guard = self.shard(key).read();
        guard.get(key).map(f)
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        self.shard(key).write().remove(key)
    }

    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.read().len()).sum()
    }

    /// Retain entries satisfying `keep`; removed entries are returned so
    /// callers can run teardown without holding any shard lock.
    pub fn retain_and_collect(&self, mut keep: impl FnMut(&K, &mut V) -> bool) -> Vec<(K, V)> {
        let mut removed = Vec::new();
        for shard in &self.shards {
            let mut guard = shard.write();
            let doomed: Vec<K> = guard
                .iter_mut()
                .filter_map(|(k, v)| (!keep(k, v)).then(|| k.clone()))
                .collect();
            for key in doomed {
                if let Some(value) = guard.remove(&key) {
                    removed.push((key, value));
                }
            }
        }
        removed
    }

    /// Visit every entry, one shard at a time.
    pub fn for_each(&self, mut f: impl FnMut(&K, &V)) {
        for shard in &self.shards {
            let guard = shard.read();
            for (k, v) in guard.iter() {
                f(k, v);
            }
        }
    }

    /// Mutate every entry, one shard at a time.
    pub fn for_each_mut(&self, mut f: impl FnMut(&K, &mut V)) {
        for shard in &self.shards {
            let mut guard = shard.write();
            for (k, v) in guard.iter_mut() {
                f(k, v);
            }
        }
    }
}

impl<K: Hash + Eq + Clone, V> Default for ShardedMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything the engine tracks for one live process.
pub struct ProcessState {
    pub pid: u32,
    /// Best-effort name; upgraded whenever the collector reports better.
    pub resolved_name: String,
    pub first_seen: f64,
    pub last_seen: f64,
    pub window: SyscallWindow,
    pub risk: RiskState,
    pub anomaly_score: f64,
    pub baseline: BehaviorBaseline,
    pub last_resources: Option<ResourceSnapshot>,
    /// Events since the ensemble last ran for this process.
    pub syscalls_since_ml: u64,
    pub last_ml_ts: f64,
}

impl ProcessState {
    pub fn new(pid: u32, name: String, now: f64, baseline: BehaviorBaseline) -> Self {
        Self {
            pid,
            resolved_name: name,
            first_seen: now,
            last_seen: now,
            window: SyscallWindow::new(),
            risk: RiskState::default(),
            anomaly_score: 0.0,
            baseline,
            last_resources: None,
            syscalls_since_ml: 0,
            last_ml_ts: 0.0,
        }
    }

    /// Lifetime syscall count, monotonic across window eviction.
    pub fn total_syscall_count(&self) -> u64 {
        self.window.total_observed()
    }
}

/// Row of the queryable snapshot API.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessSnapshot {
    pub pid: u32,
    pub process_name: String,
    pub risk_score: f64,
    pub anomaly_score: f64,
    pub recent_syscalls: Vec<String>,
    pub first_seen: f64,
    pub last_seen: f64,
    pub total_syscalls: u64,
}

impl ProcessSnapshot {
    pub fn from_state(state: &ProcessState) -> Self {
        Self {
            pid: state.pid,
            process_name: state.resolved_name.clone(),
            risk_score: state.risk.score,
            anomaly_score: state.anomaly_score,
            recent_syscalls: state.window.recent(10),
            first_seen: state.first_seen,
            last_seen: state.last_seen,
            total_syscalls: state.total_syscall_count(),
        }
    }
}
