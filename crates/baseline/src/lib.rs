//! Per-process behavioral baselines.
//!
//! A process is judged against its *own* history, not a global norm: each
//! tracked process carries an exponentially-weighted syscall-frequency
//! profile, and the risk scorer charges a penalty proportional to how far
//! the current window distribution has drifted from it. Profiles start in
//! a learning phase and only contribute once they have seen enough events
//! — deviation from nothing is not a signal.
//!
//! `BaselineStore` keeps per-process-name profiles across process
//! lifetimes so a freshly-spawned daemon inherits its predecessor's
//! profile instead of relearning from scratch, and ships seed profiles
//! for well-known daemons so day-one deployments are not blind.

pub mod corpus;

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Rescale point: when the EWMA scale underflows toward zero, fold it back
/// into the raw weights.
const SCALE_RENORM_FLOOR: f64 = 1e-150;

#[derive(Debug, Clone)]
pub struct BaselineConfig {
    /// EWMA step: weight given to the newest observation.
    pub alpha: f64,
    /// Observations before deviation scoring activates.
    pub min_observations: u64,
}

impl Default for BaselineConfig {
    fn default() -> Self {
        Self {
            alpha: 0.01,
            min_observations: 100,
        }
    }
}

/// Exponentially-weighted syscall-frequency profile for one process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BehaviorBaseline {
    /// Unnormalized weights; effective frequency is `weight * scale`.
    weights: HashMap<String, f64>,
    scale: f64,
    observations: u64,
}

impl BehaviorBaseline {
    pub fn new() -> Self {
        Self {
            weights: HashMap::new(),
            scale: 1.0,
            observations: 0,
        }
    }

    /// Seed a profile from stored frequencies, treating them as already
    /// past the learning phase at `observations` weight.
    pub fn seeded(freqs: &HashMap<String, f64>, observations: u64) -> Self {
        let total: f64 = freqs.values().filter(|v| v.is_finite() && **v > 0.0).sum();
        if total <= 0.0 {
            return Self::new();
        }
        Self {
            weights: freqs
                .iter()
                .filter(|(_, v)| v.is_finite() && **v > 0.0)
                .map(|(k, v)| (k.clone(), *v / total))
                .collect(),
            scale: 1.0,
            observations,
        }
    }

    pub fn observations(&self) -> u64 {
        self.observations
    }

    /// EWMA update: all frequencies decay by (1 - α), the observed syscall
    /// gains α. Implemented with a shared scale factor so each update is
    /// O(1) instead of touching every entry.
    pub fn observe(&mut self, syscall: &str, config: &BaselineConfig) {
        self.observations = self.observations.saturating_add(1);
        let alpha = config.alpha.clamp(1e-6, 1.0);
        self.scale *= 1.0 - alpha;
        if self.scale < SCALE_RENORM_FLOOR {
            self.renormalize();
        }
        *self.weights.entry(syscall.to_string()).or_insert(0.0) += alpha / self.scale;
    }

    fn renormalize(&mut self) {
        for w in self.weights.values_mut() {
            *w *= self.scale;
        }
        self.scale = 1.0;
    }

    /// Effective frequency of one syscall in [0, 1].
    pub fn frequency(&self, syscall: &str) -> f64 {
        let total: f64 = self.weights.values().sum();
        if total <= 0.0 {
            return 0.0;
        }
        self.weights.get(syscall).copied().unwrap_or(0.0) / total
    }

    /// Normalized frequency snapshot.
    pub fn frequencies(&self) -> HashMap<String, f64> {
        let total: f64 = self.weights.values().sum();
        if total <= 0.0 {
            return HashMap::new();
        }
        self.weights
            .iter()
            .map(|(k, v)| (k.clone(), v / total))
            .collect()
    }

    /// Total variation distance between the window distribution and this
    /// profile, in [0, 1]. `None` while the profile is still learning.
    pub fn deviation(
        &self,
        window_counts: &HashMap<String, u64>,
        config: &BaselineConfig,
    ) -> Option<f64> {
        if self.observations < config.min_observations {
            return None;
        }
        let window_total: u64 = window_counts.values().sum();
        if window_total == 0 {
            return None;
        }

        let profile = self.frequencies();
        let mut names: Vec<&str> = profile.keys().map(String::as_str).collect();
        for name in window_counts.keys() {
            if !profile.contains_key(name) {
                names.push(name);
            }
        }

        let n = window_total as f64;
        let distance: f64 = names
            .iter()
            .map(|name| {
                let p = window_counts.get(*name).copied().unwrap_or(0) as f64 / n;
                let q = profile.get(*name).copied().unwrap_or(0.0);
                (p - q).abs()
            })
            .sum();
        Some((distance / 2.0).clamp(0.0, 1.0))
    }
}

impl Default for BehaviorBaseline {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-process-name profile persisted across process lifetimes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredProfile {
    pub freqs: HashMap<String, f64>,
    pub sample_count: u64,
}

/// Name-keyed profile store with bincode persistence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaselineStore {
    profiles: HashMap<String, StoredProfile>,
    #[serde(skip)]
    path: PathBuf,
}

#[derive(Debug)]
pub enum BaselineStoreError {
    Io(std::io::Error),
    Serialize(String),
    Deserialize(String),
}

impl fmt::Display for BaselineStoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(err) => write!(f, "io error: {}", err),
            Self::Serialize(msg) => write!(f, "serialize error: {}", msg),
            Self::Deserialize(msg) => write!(f, "deserialize error: {}", msg),
        }
    }
}

impl std::error::Error for BaselineStoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for BaselineStoreError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

pub type BaselineStoreResult<T> = std::result::Result<T, BaselineStoreError>;

impl BaselineStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            profiles: HashMap::new(),
            path: path.into(),
        }
    }

    pub fn load_or_new(path: impl Into<PathBuf>) -> BaselineStoreResult<Self> {
        let path = path.into();
        if path.exists() {
            return Self::load(&path);
        }
        Ok(Self::new(path))
    }

    pub fn load(path: impl AsRef<Path>) -> BaselineStoreResult<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)?;
        let mut store: BaselineStore = bincode::deserialize(&bytes)
            .map_err(|err| BaselineStoreError::Deserialize(err.to_string()))?;
        store.path = path.to_path_buf();
        Ok(store)
    }

    pub fn save(&self) -> BaselineStoreResult<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let bytes = bincode::serialize(self)
            .map_err(|err| BaselineStoreError::Serialize(err.to_string()))?;
        std::fs::write(&self.path, bytes)?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    /// A baseline seeded from the stored profile for this process name,
    /// or a fresh learning profile when the name is unknown.
    pub fn baseline_for(&self, name: &str) -> BehaviorBaseline {
        match self.profiles.get(name) {
            Some(profile) => BehaviorBaseline::seeded(&profile.freqs, profile.sample_count),
            None => BehaviorBaseline::new(),
        }
    }

    /// Fold an evicted process's learned profile back into the store so
    /// the next process with this name starts warm.
    pub fn absorb(&mut self, name: &str, baseline: &BehaviorBaseline) {
        if baseline.observations() == 0 {
            return;
        }
        let incoming = baseline.frequencies();
        let entry = self
            .profiles
            .entry(name.to_string())
            .or_insert_with(|| StoredProfile {
                freqs: HashMap::new(),
                sample_count: 0,
            });

        let old_weight = entry.sample_count as f64;
        let new_weight = baseline.observations() as f64;
        let total = old_weight + new_weight;
        let mut merged: HashMap<String, f64> = HashMap::new();
        for (name, freq) in &entry.freqs {
            merged.insert(name.clone(), freq * old_weight / total);
        }
        for (name, freq) in incoming {
            *merged.entry(name).or_insert(0.0) += freq * new_weight / total;
        }
        entry.freqs = merged;
        entry.sample_count = entry.sample_count.saturating_add(baseline.observations());
    }

    /// Seed well-known daemon profiles into an empty store. Returns how
    /// many were added.
    pub fn seed_defaults_if_empty(&mut self) -> usize {
        if !self.profiles.is_empty() {
            return 0;
        }
        for (name, counts) in default_seed_profiles() {
            let total: f64 = counts.iter().map(|(_, c)| *c as f64).sum();
            let freqs = counts
                .iter()
                .map(|(syscall, count)| (syscall.to_string(), *count as f64 / total))
                .collect();
            self.profiles.insert(
                name.to_string(),
                StoredProfile {
                    freqs,
                    sample_count: counts.iter().map(|(_, c)| c).sum(),
                },
            );
        }
        self.profiles.len()
    }
}

fn default_seed_profiles() -> Vec<(&'static str, Vec<(&'static str, u64)>)> {
    vec![
        (
            "sshd",
            vec![
                ("read", 30),
                ("write", 25),
                ("openat", 15),
                ("close", 15),
                ("socket", 5),
                ("accept", 5),
                ("setuid", 2),
                ("execve", 3),
            ],
        ),
        (
            "nginx",
            vec![
                ("accept", 20),
                ("read", 25),
                ("write", 25),
                ("openat", 10),
                ("close", 10),
                ("sendfile", 8),
                ("connect", 2),
            ],
        ),
        (
            "bash",
            vec![
                ("execve", 15),
                ("fork", 10),
                ("openat", 20),
                ("read", 25),
                ("write", 15),
                ("close", 10),
                ("stat", 5),
            ],
        ),
        (
            "systemd",
            vec![
                ("openat", 25),
                ("read", 20),
                ("close", 20),
                ("epoll_wait", 20),
                ("clone", 10),
                ("execve", 5),
            ],
        ),
    ]
}
