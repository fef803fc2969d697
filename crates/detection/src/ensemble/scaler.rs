use serde::{Deserialize, Serialize};

use crate::features::FEATURE_COUNT;

const STD_FLOOR: f64 = 1e-9;

/// Per-dimension z-score standardization fitted on the training corpus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureScaler {
    means: Vec<f64>,
    stds: Vec<f64>,
}

impl FeatureScaler {
    /// Fit means and stddevs per dimension. Callers validate shape first.
    pub(crate) fn fit(corpus: &[Vec<f64>]) -> Self {
        let n = corpus.len().max(1) as f64;
        let dims = corpus.first().map(Vec::len).unwrap_or(FEATURE_COUNT);

        let mut means = vec![0.0; dims];
        for vector in corpus {
            for (m, v) in means.iter_mut().zip(vector) {
                *m += v;
            }
        }
        for m in &mut means {
            *m /= n;
        }

        let mut stds = vec![0.0; dims];
        for vector in corpus {
            for ((s, v), m) in stds.iter_mut().zip(vector).zip(&means) {
                *s += (v - m).powi(2);
            }
        }
        for s in &mut stds {
            *s = (*s / n).sqrt();
        }

        Self { means, stds }
    }

    /// True when no dimension carries variance — an unfittable corpus.
    pub(crate) fn is_degenerate(&self) -> bool {
        self.stds.iter().all(|s| *s <= STD_FLOOR)
    }

    pub fn transform(&self, vector: &[f64; FEATURE_COUNT]) -> Vec<f64> {
        self.transform_slice(vector)
    }

    pub(crate) fn transform_slice(&self, vector: &[f64]) -> Vec<f64> {
        vector
            .iter()
            .zip(&self.means)
            .zip(&self.stds)
            .map(|((v, m), s)| (v - m) / s.max(STD_FLOOR))
            .collect()
    }
}
