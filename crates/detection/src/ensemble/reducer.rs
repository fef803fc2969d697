//! Principal-component reduction via power iteration with deflation.
//!
//! The covariance matrix of the scaled corpus is small (50×50), so plain
//! power iteration per component is cheap and dependency-free. Each
//! extracted component is deflated out of the covariance before the next
//! iteration, yielding an orthogonal basis ordered by explained variance.

use serde::{Deserialize, Serialize};

const POWER_ITERATIONS: usize = 100;
const CONVERGENCE_EPS: f64 = 1e-10;
const EIGENVALUE_FLOOR: f64 = 1e-12;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrincipalReducer {
    /// Row-major principal components, one row per output dimension.
    components: Vec<Vec<f64>>,
}

impl PrincipalReducer {
    /// Fit up to `dims` components on pre-scaled data. Returns `None` when
    /// the data carries no usable variance (degenerate corpus).
    pub(crate) fn fit(scaled: &[Vec<f64>], dims: usize) -> Option<Self> {
        let n = scaled.len();
        let width = scaled.first()?.len();
        if n < 2 || dims == 0 {
            return None;
        }

        let mut cov = covariance(scaled, width);
        let mut components = Vec::with_capacity(dims.min(width));

        for _ in 0..dims.min(width) {
            let Some((eigenvalue, vector)) = dominant_eigenpair(&cov) else {
                break;
            };
            if eigenvalue <= EIGENVALUE_FLOOR {
                break;
            }
            deflate(&mut cov, eigenvalue, &vector);
            components.push(vector);
        }

        if components.is_empty() {
            return None;
        }
        Some(Self { components })
    }

    pub fn output_dims(&self) -> usize {
        self.components.len()
    }

    pub fn project(&self, vector: &[f64]) -> Vec<f64> {
        self.components
            .iter()
            .map(|component| {
                component
                    .iter()
                    .zip(vector)
                    .map(|(c, v)| c * v)
                    .sum::<f64>()
            })
            .collect()
    }
}

fn covariance(scaled: &[Vec<f64>], width: usize) -> Vec<Vec<f64>> {
    let n = scaled.len() as f64;
    let mut cov = vec![vec![0.0; width]; width];
    for vector in scaled {
        for i in 0..width {
            for j in i..width {
                cov[i][j] += vector[i] * vector[j];
            }
        }
    }
    for i in 0..width {
        for j in i..width {
            cov[i][j] /= n;
            cov[j][i] = cov[i][j];
        }
    }
    cov
}

/// Power iteration from a deterministic start vector: converges to the
/// dominant eigenpair of a symmetric positive-semidefinite matrix.
fn dominant_eigenpair(matrix: &[Vec<f64>]) -> Option<(f64, Vec<f64>)> {
    let n = matrix.len();
    if n == 0 {
        return None;
    }
    let mut v = vec![1.0 / (n as f64).sqrt(); n];
    let mut eigenvalue = 0.0;

    for _ in 0..POWER_ITERATIONS {
        let mut w = vec![0.0; n];
        for i in 0..n {
            for j in 0..n {
                w[i] += matrix[i][j] * v[j];
            }
        }
        let norm: f64 = w.iter().map(|x| x * x).sum::<f64>().sqrt();
        if norm < EIGENVALUE_FLOOR {
            return None;
        }
        eigenvalue = norm;
        for x in &mut w {
            *x /= norm;
        }
        let diff: f64 = v
            .iter()
            .zip(&w)
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f64>()
            .sqrt();
        v = w;
        if diff < CONVERGENCE_EPS {
            break;
        }
    }
    Some((eigenvalue, v))
}

fn deflate(matrix: &mut [Vec<f64>], eigenvalue: f64, vector: &[f64]) {
    let n = matrix.len();
    for i in 0..n {
        for j in 0..n {
            matrix[i][j] -= eigenvalue * vector[i] * vector[j];
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn projects_to_requested_dims() {
        // Variance concentrated along two axes of a 4-dim space.
        let mut scaled = Vec::new();
        for i in 0..40 {
            let t = i as f64 / 10.0;
            scaled.push(vec![t, -t, 0.1 * t, 0.0]);
        }
        let reducer = PrincipalReducer::fit(&scaled, 2).expect("fit");
        assert_eq!(reducer.output_dims(), 2);
        assert_eq!(reducer.project(&scaled[0]).len(), 2);
    }

    #[test]
    fn dominant_component_captures_spread_direction() {
        // Points along the diagonal: the first component projection should
        // separate them far better than any single raw coordinate.
        let scaled: Vec<Vec<f64>> = (0..50)
            .map(|i| {
                let t = (i as f64 - 25.0) / 5.0;
                vec![t, t, t]
            })
            .collect();
        let reducer = PrincipalReducer::fit(&scaled, 1).expect("fit");
        let low = reducer.project(&scaled[0])[0];
        let high = reducer.project(&scaled[49])[0];
        assert!((high - low).abs() > 10.0);
    }

    #[test]
    fn zero_variance_fit_fails() {
        let scaled = vec![vec![0.0; 5]; 20];
        assert!(PrincipalReducer::fit(&scaled, 3).is_none());
    }

    #[test]
    fn components_are_orthonormal() {
        let scaled: Vec<Vec<f64>> = (0..60)
            .map(|i| {
                let t = i as f64 / 7.0;
                vec![t.sin(), t.cos(), (2.0 * t).sin(), 0.5 * t.cos()]
            })
            .collect();
        let reducer = PrincipalReducer::fit(&scaled, 3).expect("fit");
        for (i, a) in reducer.components.iter().enumerate() {
            let norm: f64 = a.iter().map(|x| x * x).sum::<f64>().sqrt();
            assert!((norm - 1.0).abs() < 1e-6, "component {i} not unit length");
            for b in reducer.components.iter().skip(i + 1) {
                let dot: f64 = a.iter().zip(b).map(|(x, y)| x * y).sum();
                assert!(dot.abs() < 1e-4, "components not orthogonal: {dot}");
            }
        }
    }
}
