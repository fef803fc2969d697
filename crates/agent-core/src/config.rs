//! Runtime configuration: documented defaults plus `PROCWARDEN_*`
//! environment overrides. Every detection threshold is runtime-tunable so
//! operators can recalibrate without rebuilding.

use std::path::PathBuf;

use detection::{ConnTrackConfig, EnsembleConfig, RiskConfig, MIN_WINDOW_FOR_SCORING};

#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Composite risk score at which a `HighRisk` detection fires.
    pub alert_threshold: f64,
    /// Ensemble score at which an `Anomaly` detection fires (with
    /// majority agreement).
    pub anomaly_alert_threshold: f64,
    /// Window length below which the ensemble never runs for a process.
    pub min_syscalls_for_ml: usize,
    /// Per-pid quiet period between emitted detections.
    pub alert_cooldown_secs: f64,
    /// Idle time after which a process's state is evicted.
    pub stale_timeout_secs: f64,
    /// Cadence of the eviction sweep task.
    pub sweep_interval_secs: u64,
    /// Cadence of periodic retraining.
    pub retrain_interval_secs: u64,
    /// Buffered feature vectors that trigger an early retrain.
    pub retrain_min_vectors: usize,
    /// Rolling capacity of the live training buffer.
    pub training_buffer_capacity: usize,
    /// Ensemble rate limit: run after this many syscalls...
    pub ml_every_events: u64,
    /// ...or after this much elapsed time, whichever comes first.
    pub ml_every_secs: f64,
    /// Collector → engine channel depth.
    pub event_channel_capacity: usize,
    /// Engine → subscriber broadcast depth.
    pub detection_channel_capacity: usize,
    /// Optional persisted per-name baseline store.
    pub baseline_store_path: Option<PathBuf>,
    /// Optional JSONL corpus for initial ensemble training.
    pub training_corpus_path: Option<PathBuf>,

    pub risk: RiskConfig,
    pub conntrack: ConnTrackConfig,
    pub ensemble: EnsembleConfig,
    pub baseline: baseline::BaselineConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            alert_threshold: 70.0,
            anomaly_alert_threshold: 70.0,
            min_syscalls_for_ml: MIN_WINDOW_FOR_SCORING,
            alert_cooldown_secs: 120.0,
            stale_timeout_secs: 300.0,
            sweep_interval_secs: 30,
            retrain_interval_secs: 3600,
            retrain_min_vectors: 256,
            training_buffer_capacity: 4096,
            ml_every_events: 10,
            ml_every_secs: 2.0,
            event_channel_capacity: 4096,
            detection_channel_capacity: 1024,
            baseline_store_path: None,
            training_corpus_path: None,
            risk: RiskConfig::default(),
            conntrack: ConnTrackConfig::default(),
            ensemble: EnsembleConfig::default(),
            baseline: baseline::BaselineConfig::default(),
        }
    }
}

impl AgentConfig {
    pub fn load() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    fn apply_env_overrides(&mut self) {
        if let Some(v) = env_f64("PROCWARDEN_ALERT_THRESHOLD") {
            self.alert_threshold = v.clamp(0.0, 100.0);
        }
        if let Some(v) = env_f64("PROCWARDEN_ANOMALY_THRESHOLD") {
            self.anomaly_alert_threshold = v.clamp(0.0, 100.0);
        }
        if let Some(v) = env_usize("PROCWARDEN_MIN_SYSCALLS_FOR_ML") {
            self.min_syscalls_for_ml = v.max(1);
        }
        if let Some(v) = env_f64("PROCWARDEN_ALERT_COOLDOWN_SECS") {
            self.alert_cooldown_secs = v.max(0.0);
        }
        if let Some(v) = env_f64("PROCWARDEN_STALE_TIMEOUT_SECS") {
            self.stale_timeout_secs = v.max(1.0);
        }
        if let Some(v) = env_u64("PROCWARDEN_SWEEP_INTERVAL_SECS") {
            self.sweep_interval_secs = v.max(1);
        }
        if let Some(v) = env_u64("PROCWARDEN_RETRAIN_INTERVAL_SECS") {
            self.retrain_interval_secs = v.max(10);
        }
        if let Some(v) = env_usize("PROCWARDEN_RETRAIN_MIN_VECTORS") {
            self.retrain_min_vectors = v;
        }
        if let Some(v) = env_f64("PROCWARDEN_DECAY_FACTOR") {
            self.risk.decay_factor = v.clamp(0.0, 1.0);
        }
        if let Some(v) = env_f64("PROCWARDEN_DECAY_INTERVAL_SECS") {
            self.risk.decay_interval_secs = v.max(1.0);
        }
        if let Some(v) = env_usize("PROCWARDEN_SCAN_MIN_PORTS") {
            self.conntrack.scan_min_ports = v.max(2);
        }
        if let Some(v) = env_f64("PROCWARDEN_SCAN_WINDOW_SECS") {
            self.conntrack.scan_window_secs = v.max(1.0);
        }
        if let Some(v) = env_f64("PROCWARDEN_BEACON_MIN_INTERVAL_SECS") {
            self.conntrack.beacon_min_interval_secs = v.max(0.0);
        }
        if let Some(v) = env_f64("PROCWARDEN_BEACON_MAX_STDDEV_SECS") {
            self.conntrack.beacon_max_stddev_secs = v.max(0.0);
        }
        if let Some(v) = env_u64("PROCWARDEN_EXFIL_BYTES_THRESHOLD") {
            self.conntrack.exfil_bytes_threshold = v;
        }
        if let Some(v) = env_non_empty("PROCWARDEN_BASELINE_STORE") {
            self.baseline_store_path = Some(PathBuf::from(v));
        }
        if let Some(v) = env_non_empty("PROCWARDEN_TRAINING_CORPUS") {
            self.training_corpus_path = Some(PathBuf::from(v));
        }
    }
}

fn env_non_empty(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_f64(name: &str) -> Option<f64> {
    env_non_empty(name)?.parse().ok()
}

fn env_u64(name: &str) -> Option<u64> {
    env_non_empty(name)?.parse().ok()
}

fn env_usize(name: &str) -> Option<usize> {
    env_non_empty(name)?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = AgentConfig::default();
        assert_eq!(config.alert_threshold, 70.0);
        assert_eq!(config.min_syscalls_for_ml, 15);
        assert_eq!(config.alert_cooldown_secs, 120.0);
        assert_eq!(config.stale_timeout_secs, 300.0);
        assert_eq!(config.risk.decay_factor, 0.95);
        assert_eq!(config.conntrack.scan_min_ports, 5);
        assert_eq!(config.conntrack.exfil_bytes_threshold, 100 * 1024 * 1024);
    }

    #[test]
    fn env_overrides_apply_and_clamp() {
        std::env::set_var("PROCWARDEN_ALERT_THRESHOLD", "150");
        std::env::set_var("PROCWARDEN_SCAN_MIN_PORTS", "7");
        std::env::set_var("PROCWARDEN_DECAY_FACTOR", "0.9");
        let config = AgentConfig::load();
        std::env::remove_var("PROCWARDEN_ALERT_THRESHOLD");
        std::env::remove_var("PROCWARDEN_SCAN_MIN_PORTS");
        std::env::remove_var("PROCWARDEN_DECAY_FACTOR");

        assert_eq!(config.alert_threshold, 100.0, "threshold clamps to scale");
        assert_eq!(config.conntrack.scan_min_ports, 7);
        assert_eq!(config.risk.decay_factor, 0.9);
    }

    #[test]
    fn malformed_env_values_fall_back_to_defaults() {
        std::env::set_var("PROCWARDEN_MIN_SYSCALLS_FOR_ML", "not-a-number");
        let config = AgentConfig::load();
        std::env::remove_var("PROCWARDEN_MIN_SYSCALLS_FOR_ML");
        assert_eq!(config.min_syscalls_for_ml, 15);
    }
}
