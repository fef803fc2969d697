//! Shared statistical primitives for the detection pipeline.

use std::collections::HashMap;

/// Shannon entropy (bits) of a frequency table.
pub(crate) fn shannon_entropy_bits<K>(counts: &HashMap<K, u64>) -> f64
where
    K: std::hash::Hash + Eq,
{
    let total: u64 = counts.values().sum();
    if total == 0 {
        return 0.0;
    }
    let n = total as f64;
    counts
        .values()
        .filter(|&&c| c > 0)
        .map(|&c| {
            let p = c as f64 / n;
            -p * p.log2()
        })
        .sum()
}

pub(crate) fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Bessel-corrected standard deviation. With a single value (or none) the
/// spread is zero by definition.
pub(crate) fn sample_stddev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    var.sqrt()
}

/// Nearest-rank percentile over a pre-sorted slice.
pub(crate) fn percentile_sorted(values: &[f64], p: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let rank = ((p / 100.0) * (values.len() - 1) as f64).round() as usize;
    values[rank.min(values.len() - 1)]
}

/// Median plus MAD-derived spread (1.4826 · MAD), the robust analogue of
/// mean/stddev. Spread is floored so downstream z-scores stay finite.
pub(crate) fn robust_center_spread(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 1e-9);
    }
    let mut sorted: Vec<f64> = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let median = percentile_sorted(&sorted, 50.0);

    let mut abs_dev: Vec<f64> = sorted.iter().map(|x| (x - median).abs()).collect();
    abs_dev.sort_by(|a, b| a.total_cmp(b));
    let mad = percentile_sorted(&abs_dev, 50.0);
    (median, (1.4826 * mad).max(1e-9))
}

pub(crate) fn euclidean_distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f64>()
        .sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entropy_of_uniform_distribution() {
        let mut counts = HashMap::new();
        for name in ["a", "b", "c", "d"] {
            counts.insert(name, 5u64);
        }
        let h = shannon_entropy_bits(&counts);
        assert!((h - 2.0).abs() < 1e-9, "uniform over 4 should be 2 bits: {h}");
    }

    #[test]
    fn entropy_of_constant_stream_is_zero() {
        let mut counts = HashMap::new();
        counts.insert("read", 100u64);
        assert_eq!(shannon_entropy_bits(&counts), 0.0);
    }

    #[test]
    fn sample_stddev_matches_hand_computation() {
        let values = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        // Sum of squared deviations is 32; 32/7 under Bessel correction.
        assert!((sample_stddev(&values) - (32.0f64 / 7.0).sqrt()).abs() < 1e-9);
        assert_eq!(sample_stddev(&[3.0]), 0.0);
    }

    #[test]
    fn robust_spread_ignores_single_outlier() {
        let values = [1.0, 1.1, 0.9, 1.0, 1.05, 0.95, 100.0];
        let (center, spread) = robust_center_spread(&values);
        assert!((center - 1.0).abs() < 0.1);
        assert!(spread < 1.0, "MAD spread should shrug off the outlier: {spread}");
    }

    #[test]
    fn percentile_bounds() {
        let values = [1.0, 2.0, 3.0, 4.0, 5.0];
        assert_eq!(percentile_sorted(&values, 0.0), 1.0);
        assert_eq!(percentile_sorted(&values, 100.0), 5.0);
        assert_eq!(percentile_sorted(&values, 50.0), 3.0);
    }
}
