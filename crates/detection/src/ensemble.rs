//! Unsupervised anomaly ensemble.
//!
//! Three independently-fitted models behind one immutable `ModelGeneration`:
//!
//! 1. **Statistical outlier model** — robust per-dimension z-scores
//!    (median/MAD), flags vectors far from the training center
//! 2. **One-class boundary model** — hypersphere around the training
//!    centroid with a quantile radius, flags vectors outside it
//! 3. **Density cluster model** — deterministic k-means partition with
//!    per-cluster quantile radii, flags vectors in low-density territory
//!
//! plus a feature scaler and a principal-component reducer (50 → 10),
//! fitted together on the same corpus. A generation is never mutated after
//! `train` returns: retraining builds a fresh generation and the caller
//! swaps the reference, so a reader can never observe a half-updated
//! ensemble.
//!
//! A vector counts as anomalous only when at least two of the three models
//! agree it is an outlier; the returned score is the weighted average of
//! the sub-scores, so downstream consumers get magnitude, not a flag.
//!
//! Per-model normalization spans are calibration constants, not invariants
//! — they were tuned empirically and `calibration` can refit them against
//! a scored normal corpus.

mod boundary;
mod density;
mod reducer;
mod scaler;
mod stat;

pub use boundary::BoundaryModel;
pub use density::DensityModel;
pub use reducer::PrincipalReducer;
pub use scaler::FeatureScaler;
pub use stat::StatOutlierModel;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::features::{feature_name, FEATURE_COUNT};

/// Tunable ensemble parameters. Defaults are the calibrated production
/// values; none of them are load-bearing invariants.
#[derive(Debug, Clone)]
pub struct EnsembleConfig {
    /// Output dimensionality of the principal-component reducer.
    pub reduced_dims: usize,
    /// Minimum corpus size `train` accepts.
    pub min_train_samples: usize,
    /// Models that must flag a vector before it counts as anomalous.
    pub min_agreement: u8,
    /// Vote weights: statistical, boundary, density. Should sum to 1.
    pub vote_weights: [f64; 3],
    /// Robust z-score beyond which the statistical model votes outlier.
    pub stat_z_cut: f64,
    /// z-score mapped to sub-score 100.
    pub stat_z_span: f64,
    /// Distance/radius ratio beyond which the boundary model votes outlier.
    pub boundary_cut: f64,
    /// Ratio mapped to sub-score 100.
    pub boundary_span: f64,
    /// Distance/cluster-radius ratio beyond which density votes outlier.
    pub density_cut: f64,
    /// Ratio mapped to sub-score 100.
    pub density_span: f64,
    /// k-means cluster count (capped by corpus size).
    pub clusters: usize,
}

impl Default for EnsembleConfig {
    fn default() -> Self {
        Self {
            reduced_dims: 10,
            min_train_samples: 32,
            min_agreement: 2,
            vote_weights: [0.4, 0.4, 0.2],
            stat_z_cut: 3.0,
            stat_z_span: 6.0,
            boundary_cut: 1.0,
            boundary_span: 2.5,
            density_cut: 1.0,
            density_span: 2.5,
            clusters: 8,
        }
    }
}

/// One model's view of a vector.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ModelVerdict {
    pub sub_score: f64,
    pub outlier: bool,
}

/// Map a model's native ratio onto the 0–100 sub-score scale.
pub(crate) fn normalize_sub_score(ratio: f64, cut: f64, span: f64) -> ModelVerdict {
    let span = span.max(1e-9);
    ModelVerdict {
        sub_score: (ratio / span).clamp(0.0, 1.0) * 100.0,
        outlier: ratio > cut,
    }
}

/// Ensemble output for one feature vector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalyResult {
    /// Weighted average of the three sub-scores, in [0, 100].
    pub score: f64,
    /// How many models voted outlier (0–3).
    pub agreement_count: u8,
    /// Whether the agreement threshold was met.
    pub is_anomalous: bool,
    /// Feature names driving the deviation, most deviant first.
    pub contributing_features: Vec<String>,
}

impl AnomalyResult {
    /// The defined safe default when no generation has been trained yet.
    pub fn untrained() -> Self {
        Self {
            score: 0.0,
            agreement_count: 0,
            is_anomalous: false,
            contributing_features: Vec::new(),
        }
    }
}

/// One complete, immutable, swappable set of trained components.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelGeneration {
    scaler: FeatureScaler,
    reducer: PrincipalReducer,
    stat: StatOutlierModel,
    boundary: BoundaryModel,
    density: DensityModel,
    vote_weights: [f64; 3],
    min_agreement: u8,
    sample_count: usize,
}

impl ModelGeneration {
    pub fn sample_count(&self) -> usize {
        self.sample_count
    }

    /// Score a feature vector. Pure and lock-free; safe to call from any
    /// number of readers holding the same generation.
    pub fn score(&self, features: &[f64; FEATURE_COUNT]) -> AnomalyResult {
        let scaled = self.scaler.transform(features);
        let reduced = self.reducer.project(&scaled);

        let verdicts = [
            self.stat.evaluate(&reduced),
            self.boundary.evaluate(&reduced),
            self.density.evaluate(&reduced),
        ];

        let agreement_count = verdicts.iter().filter(|v| v.outlier).count() as u8;
        let score: f64 = verdicts
            .iter()
            .zip(self.vote_weights)
            .map(|(v, w)| v.sub_score * w)
            .sum();

        AnomalyResult {
            score: score.clamp(0.0, 100.0),
            agreement_count,
            is_anomalous: agreement_count >= self.min_agreement,
            contributing_features: contributing_features(&scaled),
        }
    }
}

/// Feature names whose scaled deviation stands out, capped at three.
fn contributing_features(scaled: &[f64]) -> Vec<String> {
    let mut indexed: Vec<(usize, f64)> = scaled
        .iter()
        .enumerate()
        .map(|(i, v)| (i, v.abs()))
        .filter(|(_, v)| *v > 1.0)
        .collect();
    indexed.sort_by(|a, b| b.1.total_cmp(&a.1));
    indexed
        .into_iter()
        .take(3)
        .map(|(i, _)| feature_name(i).to_string())
        .collect()
}

/// Fit a fresh generation on a corpus of normal-behavior vectors. Pure: no
/// shared state is touched, so the caller decides when to swap it in.
pub fn train(
    corpus: &[Vec<f64>],
    config: &EnsembleConfig,
) -> Result<ModelGeneration, TrainError> {
    if corpus.len() < config.min_train_samples {
        return Err(TrainError::TooFewSamples {
            got: corpus.len(),
            need: config.min_train_samples,
        });
    }
    for (row, vector) in corpus.iter().enumerate() {
        if vector.len() != FEATURE_COUNT {
            return Err(TrainError::DimensionMismatch {
                row,
                expected: FEATURE_COUNT,
                got: vector.len(),
            });
        }
        if let Some(col) = vector.iter().position(|v| !v.is_finite()) {
            return Err(TrainError::NonFiniteFeature { row, col });
        }
    }

    let scaler = FeatureScaler::fit(corpus);
    if scaler.is_degenerate() {
        return Err(TrainError::DegenerateCorpus);
    }

    let scaled: Vec<Vec<f64>> = corpus.iter().map(|v| scaler.transform_slice(v)).collect();
    let reducer = PrincipalReducer::fit(&scaled, config.reduced_dims)
        .ok_or(TrainError::DegenerateCorpus)?;
    let reduced: Vec<Vec<f64>> = scaled.iter().map(|v| reducer.project(v)).collect();

    let stat = StatOutlierModel::fit(&reduced, config.stat_z_cut, config.stat_z_span);
    let boundary = BoundaryModel::fit(&reduced, config.boundary_cut, config.boundary_span);
    let density = DensityModel::fit(
        &reduced,
        config.clusters,
        config.density_cut,
        config.density_span,
    );

    Ok(ModelGeneration {
        scaler,
        reducer,
        stat,
        boundary,
        density,
        vote_weights: config.vote_weights,
        min_agreement: config.min_agreement,
        sample_count: corpus.len(),
    })
}

#[derive(Debug)]
pub enum TrainError {
    TooFewSamples { got: usize, need: usize },
    DimensionMismatch { row: usize, expected: usize, got: usize },
    NonFiniteFeature { row: usize, col: usize },
    /// Zero variance everywhere — nothing to model.
    DegenerateCorpus,
}

impl fmt::Display for TrainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooFewSamples { got, need } => {
                write!(f, "corpus too small: {got} samples, need {need}")
            }
            Self::DimensionMismatch { row, expected, got } => {
                write!(f, "row {row}: expected {expected} features, got {got}")
            }
            Self::NonFiniteFeature { row, col } => {
                write!(f, "non-finite feature at row {row}, column {col}")
            }
            Self::DegenerateCorpus => write!(f, "corpus has no variance to model"),
        }
    }
}

impl std::error::Error for TrainError {}
