use serde::{Deserialize, Serialize};

use super::{normalize_sub_score, ModelVerdict};
use crate::math::{euclidean_distance, percentile_sorted};

/// One-class boundary model: a hypersphere around the training centroid
/// whose radius is the 95th-percentile training distance. Anything outside
/// the sphere votes outlier; the sub-score grows with how far outside.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundaryModel {
    centroid: Vec<f64>,
    radius: f64,
    ratio_cut: f64,
    ratio_span: f64,
}

impl BoundaryModel {
    pub(crate) fn fit(reduced: &[Vec<f64>], ratio_cut: f64, ratio_span: f64) -> Self {
        let dims = reduced.first().map(Vec::len).unwrap_or(0);
        let n = reduced.len().max(1) as f64;
        let mut centroid = vec![0.0; dims];
        for vector in reduced {
            for (c, v) in centroid.iter_mut().zip(vector) {
                *c += v;
            }
        }
        for c in &mut centroid {
            *c /= n;
        }

        let mut distances: Vec<f64> = reduced
            .iter()
            .map(|v| euclidean_distance(v, &centroid))
            .collect();
        distances.sort_by(|a, b| a.total_cmp(b));
        let radius = percentile_sorted(&distances, 95.0).max(1e-9);

        Self {
            centroid,
            radius,
            ratio_cut,
            ratio_span,
        }
    }

    /// Native output is distance over the learned radius.
    pub(crate) fn evaluate(&self, reduced: &[f64]) -> ModelVerdict {
        let ratio = euclidean_distance(reduced, &self.centroid) / self.radius;
        normalize_sub_score(ratio, self.ratio_cut, self.ratio_span)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ring_corpus() -> Vec<Vec<f64>> {
        (0..64)
            .map(|i| {
                let angle = i as f64 * std::f64::consts::TAU / 64.0;
                vec![angle.cos(), angle.sin()]
            })
            .collect()
    }

    #[test]
    fn training_points_sit_inside() {
        let model = BoundaryModel::fit(&ring_corpus(), 1.0, 2.5);
        let inside = model.evaluate(&[0.9, 0.0]);
        assert!(!inside.outlier);
    }

    #[test]
    fn far_point_votes_outlier() {
        let model = BoundaryModel::fit(&ring_corpus(), 1.0, 2.5);
        let outside = model.evaluate(&[10.0, 10.0]);
        assert!(outside.outlier);
        assert!(outside.sub_score > 90.0);
    }

    #[test]
    fn tight_cluster_keeps_radius_finite() {
        let corpus = vec![vec![5.0, 5.0]; 40];
        let model = BoundaryModel::fit(&corpus, 1.0, 2.5);
        let verdict = model.evaluate(&[5.0, 5.0]);
        assert!(verdict.sub_score.is_finite());
        assert!(!verdict.outlier);
    }
}
