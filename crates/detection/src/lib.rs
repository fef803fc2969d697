//! Behavioral threat-detection engine: per-process syscall analysis,
//! connection-pattern detectors, composite risk scoring, and an
//! unsupervised anomaly ensemble. Synchronous and allocation-bounded;
//! the async orchestration lives in `agent-core`.

pub mod calibration;
mod conntrack;
pub mod ensemble;
mod features;
mod math;
mod risk;
mod types;
mod weights;
mod window;

pub use conntrack::{
    ActivePatterns, ConnTrackConfig, ConnectionRecord, ConnectionTrack, PatternHit,
    TRACK_CAPACITY,
};
pub use ensemble::{AnomalyResult, EnsembleConfig, ModelGeneration, TrainError};
pub use features::{
    feature_name, FeatureExtractor, FEATURE_COUNT, MIN_WINDOW_FOR_SCORING, TRACKED_SYSCALLS,
};
pub use risk::{RiskConfig, RiskInputs, RiskScorer, RiskState, MAX_SCORE};
pub use types::{
    ConnectionInfo, Detection, DetectionKind, ResourceSnapshot, Severity, SyscallEvent,
};
pub use weights::{SyscallWeightTable, DEFAULT_WEIGHT, HIGH_RISK_FLOOR};
pub use window::{SyscallWindow, WINDOW_CAPACITY};
