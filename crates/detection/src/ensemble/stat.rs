use serde::{Deserialize, Serialize};

use super::{normalize_sub_score, ModelVerdict};
use crate::math::robust_center_spread;

/// Statistical outlier model: robust per-dimension z-scores against the
/// training corpus. Median/MAD rather than mean/stddev so a few weird
/// training samples cannot widen the envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatOutlierModel {
    centers: Vec<f64>,
    spreads: Vec<f64>,
    z_cut: f64,
    z_span: f64,
}

impl StatOutlierModel {
    pub(crate) fn fit(reduced: &[Vec<f64>], z_cut: f64, z_span: f64) -> Self {
        let dims = reduced.first().map(Vec::len).unwrap_or(0);
        let mut centers = Vec::with_capacity(dims);
        let mut spreads = Vec::with_capacity(dims);
        for dim in 0..dims {
            let column: Vec<f64> = reduced.iter().map(|v| v[dim]).collect();
            let (center, spread) = robust_center_spread(&column);
            centers.push(center);
            spreads.push(spread);
        }
        Self {
            centers,
            spreads,
            z_cut,
            z_span,
        }
    }

    /// Native output is the worst per-dimension |z|.
    pub(crate) fn evaluate(&self, reduced: &[f64]) -> ModelVerdict {
        let max_z = reduced
            .iter()
            .zip(&self.centers)
            .zip(&self.spreads)
            .map(|((v, c), s)| ((v - c) / s).abs())
            .fold(0.0f64, f64::max);
        normalize_sub_score(max_z, self.z_cut, self.z_span)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spread_corpus() -> Vec<Vec<f64>> {
        (0..100)
            .map(|i| {
                let t = (i % 21) as f64 / 10.0 - 1.0; // [-1, 1]
                vec![t, 0.5 * t]
            })
            .collect()
    }

    #[test]
    fn center_vector_scores_low() {
        let model = StatOutlierModel::fit(&spread_corpus(), 3.0, 6.0);
        let verdict = model.evaluate(&[0.0, 0.0]);
        assert!(!verdict.outlier);
        assert!(verdict.sub_score < 20.0);
    }

    #[test]
    fn distant_vector_is_an_outlier() {
        let model = StatOutlierModel::fit(&spread_corpus(), 3.0, 6.0);
        let verdict = model.evaluate(&[50.0, 0.0]);
        assert!(verdict.outlier);
        assert_eq!(verdict.sub_score, 100.0);
    }

    #[test]
    fn sub_score_bounded() {
        let model = StatOutlierModel::fit(&spread_corpus(), 3.0, 6.0);
        for v in [-1e6, -1.0, 0.0, 1.0, 1e6] {
            let verdict = model.evaluate(&[v, v]);
            assert!((0.0..=100.0).contains(&verdict.sub_score));
        }
    }
}
