//! Empirical threshold calibration against a normal-behavior holdout.
//!
//! The ensemble's normalization spans and the alert threshold are tuned
//! constants, not derived invariants. Before trusting absolute score
//! values, score a held-out normal corpus and calibrate: the conformal
//! quantile of those scores gives a threshold with a distribution-free
//! bound on the false-positive rate (P(score > threshold) ≤ α for
//! exchangeable future data).

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThresholdCalibration {
    /// Score threshold implied by the holdout at the requested miscoverage.
    pub threshold: f64,
    /// Requested miscoverage rate α.
    pub alpha: f64,
    /// Holdout size the guarantee was computed from.
    pub holdout_size: usize,
}

/// Conformal quantile of holdout anomaly scores: the ⌈(1-α)(n+1)⌉-th order
/// statistic. Returns `None` on an empty holdout or an α outside (0, 1).
pub fn calibrate_anomaly_threshold(scores: &[f64], alpha: f64) -> Option<ThresholdCalibration> {
    if scores.is_empty() || !(0.0..1.0).contains(&alpha) || alpha == 0.0 {
        return None;
    }
    let mut sorted: Vec<f64> = scores.iter().copied().filter(|s| s.is_finite()).collect();
    if sorted.is_empty() {
        return None;
    }
    sorted.sort_by(|a, b| a.total_cmp(b));
    let n = sorted.len();
    let rank = (((1.0 - alpha) * (n as f64 + 1.0)).ceil() as usize)
        .min(n)
        .saturating_sub(1);
    Some(ThresholdCalibration {
        threshold: sorted[rank],
        alpha,
        holdout_size: n,
    })
}

/// Fraction of holdout scores a threshold would have flagged — the
/// observed (not guaranteed) false-positive rate.
pub fn observed_fp_rate(scores: &[f64], threshold: f64) -> f64 {
    if scores.is_empty() {
        return 0.0;
    }
    let flagged = scores.iter().filter(|s| **s > threshold).count();
    flagged as f64 / scores.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threshold_sits_at_requested_quantile() {
        let scores: Vec<f64> = (0..100).map(|i| i as f64).collect();
        let cal = calibrate_anomaly_threshold(&scores, 0.05).expect("calibration");
        assert!(cal.threshold >= 94.0 && cal.threshold <= 99.0);
        assert_eq!(cal.holdout_size, 100);
    }

    #[test]
    fn observed_rate_matches_threshold() {
        let scores: Vec<f64> = (0..100).map(|i| i as f64).collect();
        let cal = calibrate_anomaly_threshold(&scores, 0.05).expect("calibration");
        assert!(observed_fp_rate(&scores, cal.threshold) <= 0.05);
    }

    #[test]
    fn empty_or_invalid_inputs_yield_none() {
        assert!(calibrate_anomaly_threshold(&[], 0.05).is_none());
        assert!(calibrate_anomaly_threshold(&[1.0], 0.0).is_none());
        assert!(calibrate_anomaly_threshold(&[1.0], 1.5).is_none());
        assert!(calibrate_anomaly_threshold(&[f64::NAN], 0.05).is_none());
    }
}
