//! Density cluster model: deterministic k-means with per-cluster radii.
//!
//! Initialization is farthest-first traversal from the point nearest the
//! global centroid, so the same corpus always produces the same partition
//! — no RNG, reproducible scoring.

use serde::{Deserialize, Serialize};

use super::{normalize_sub_score, ModelVerdict};
use crate::math::{euclidean_distance, percentile_sorted};

const LLOYD_ITERATIONS: usize = 25;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DensityModel {
    centroids: Vec<Vec<f64>>,
    /// 95th-percentile member distance per cluster, the "density radius".
    radii: Vec<f64>,
    ratio_cut: f64,
    ratio_span: f64,
}

impl DensityModel {
    pub(crate) fn fit(
        reduced: &[Vec<f64>],
        clusters: usize,
        ratio_cut: f64,
        ratio_span: f64,
    ) -> Self {
        let k = clusters.clamp(1, reduced.len().max(1));
        let mut centroids = initial_centroids(reduced, k);

        let mut assignment = vec![0usize; reduced.len()];
        for _ in 0..LLOYD_ITERATIONS {
            let mut moved = false;
            for (idx, vector) in reduced.iter().enumerate() {
                let best = nearest_centroid(vector, &centroids).0;
                if assignment[idx] != best {
                    assignment[idx] = best;
                    moved = true;
                }
            }

            let dims = reduced.first().map(Vec::len).unwrap_or(0);
            let mut sums = vec![vec![0.0; dims]; centroids.len()];
            let mut counts = vec![0usize; centroids.len()];
            for (idx, vector) in reduced.iter().enumerate() {
                counts[assignment[idx]] += 1;
                for (s, v) in sums[assignment[idx]].iter_mut().zip(vector) {
                    *s += v;
                }
            }
            for (cluster, sum) in sums.into_iter().enumerate() {
                if counts[cluster] > 0 {
                    centroids[cluster] = sum
                        .into_iter()
                        .map(|s| s / counts[cluster] as f64)
                        .collect();
                }
            }

            if !moved {
                break;
            }
        }

        let mut radii = vec![1e-9f64; centroids.len()];
        let mut member_distances: Vec<Vec<f64>> = vec![Vec::new(); centroids.len()];
        for (idx, vector) in reduced.iter().enumerate() {
            member_distances[assignment[idx]]
                .push(euclidean_distance(vector, &centroids[assignment[idx]]));
        }
        // Clusters too small to carry a quantile inherit the global radius.
        let mut all: Vec<f64> = member_distances.iter().flatten().copied().collect();
        all.sort_by(|a, b| a.total_cmp(b));
        let global_radius = percentile_sorted(&all, 95.0).max(1e-9);
        for (cluster, distances) in member_distances.iter_mut().enumerate() {
            if distances.len() >= 5 {
                distances.sort_by(|a, b| a.total_cmp(b));
                radii[cluster] = percentile_sorted(distances, 95.0).max(1e-9);
            } else {
                radii[cluster] = global_radius;
            }
        }

        Self {
            centroids,
            radii,
            ratio_cut,
            ratio_span,
        }
    }

    /// Native output: distance to the nearest centroid over that cluster's
    /// density radius.
    pub(crate) fn evaluate(&self, reduced: &[f64]) -> ModelVerdict {
        let (cluster, distance) = nearest_centroid(reduced, &self.centroids);
        let ratio = distance / self.radii[cluster];
        normalize_sub_score(ratio, self.ratio_cut, self.ratio_span)
    }
}

fn nearest_centroid(vector: &[f64], centroids: &[Vec<f64>]) -> (usize, f64) {
    let mut best = (0usize, f64::INFINITY);
    for (idx, centroid) in centroids.iter().enumerate() {
        let d = euclidean_distance(vector, centroid);
        if d < best.1 {
            best = (idx, d);
        }
    }
    best
}

/// Farthest-first seeding anchored at the most central training point.
fn initial_centroids(reduced: &[Vec<f64>], k: usize) -> Vec<Vec<f64>> {
    let dims = reduced.first().map(Vec::len).unwrap_or(0);
    let n = reduced.len().max(1) as f64;
    let mut global = vec![0.0; dims];
    for vector in reduced {
        for (g, v) in global.iter_mut().zip(vector) {
            *g += v;
        }
    }
    for g in &mut global {
        *g /= n;
    }

    let (seed, _) = reduced
        .iter()
        .enumerate()
        .map(|(i, v)| (i, euclidean_distance(v, &global)))
        .min_by(|a, b| a.1.total_cmp(&b.1))
        .unwrap_or((0, 0.0));

    let mut chosen = vec![reduced[seed].clone()];
    while chosen.len() < k {
        let next = reduced
            .iter()
            .map(|v| {
                chosen
                    .iter()
                    .map(|c| euclidean_distance(v, c))
                    .fold(f64::INFINITY, f64::min)
            })
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(&b.1));
        match next {
            Some((idx, distance)) if distance > 0.0 => chosen.push(reduced[idx].clone()),
            _ => break,
        }
    }
    chosen
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_blob_corpus() -> Vec<Vec<f64>> {
        let mut corpus = Vec::new();
        for i in 0..40 {
            let jitter = (i % 7) as f64 / 10.0;
            corpus.push(vec![0.0 + jitter, 0.0 - jitter]);
            corpus.push(vec![10.0 - jitter, 10.0 + jitter]);
        }
        corpus
    }

    #[test]
    fn members_of_either_blob_are_dense() {
        let model = DensityModel::fit(&two_blob_corpus(), 4, 1.0, 2.5);
        assert!(!model.evaluate(&[0.2, -0.2]).outlier);
        assert!(!model.evaluate(&[9.8, 10.2]).outlier);
    }

    #[test]
    fn point_between_blobs_is_sparse() {
        let model = DensityModel::fit(&two_blob_corpus(), 4, 1.0, 2.5);
        let verdict = model.evaluate(&[5.0, 5.0]);
        assert!(verdict.outlier);
    }

    #[test]
    fn fit_is_deterministic() {
        let corpus = two_blob_corpus();
        let a = DensityModel::fit(&corpus, 4, 1.0, 2.5);
        let b = DensityModel::fit(&corpus, 4, 1.0, 2.5);
        assert_eq!(a.centroids, b.centroids);
        assert_eq!(a.radii, b.radii);
    }

    #[test]
    fn single_cluster_handles_uniform_corpus() {
        let corpus = vec![vec![1.0, 1.0]; 50];
        let model = DensityModel::fit(&corpus, 8, 1.0, 2.5);
        let verdict = model.evaluate(&[1.0, 1.0]);
        assert!(!verdict.outlier);
        assert!(verdict.sub_score.is_finite());
    }
}
