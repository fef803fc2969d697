//! Composite risk scoring with wall-clock decay.
//!
//! The score is an accumulator, not a recomputation: each event decays the
//! existing score by elapsed time, then adds the event's contributions, then
//! clamps. Decay-before-add is load-bearing — reversing it would amplify
//! stale risk instead of fading it.

/// Upper bound of the risk scale.
pub const MAX_SCORE: f64 = 100.0;

#[derive(Debug, Clone)]
pub struct RiskConfig {
    /// Multiplicative decay applied per `decay_interval_secs` of elapsed
    /// wall-clock time since the last update.
    pub decay_factor: f64,
    pub decay_interval_secs: f64,
    /// Fraction of the ensemble anomaly score added to risk. Capped well
    /// below 1.0 so the ML signal can never dominate the composite.
    pub anomaly_weight: f64,
    /// Ceiling on the behavioral-deviation penalty per update.
    pub behavior_penalty_max: f64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            decay_factor: 0.95,
            decay_interval_secs: 60.0,
            anomaly_weight: 0.3,
            behavior_penalty_max: 20.0,
        }
    }
}

/// Per-event inputs to a risk update.
#[derive(Debug, Clone, Copy, Default)]
pub struct RiskInputs {
    /// Base weight of the triggering syscall (0–10).
    pub base_weight: f64,
    /// Deviation of the window distribution from the process's own
    /// baseline, in [0, 1]. `None` while the baseline is still learning.
    pub behavioral_deviation: Option<f64>,
    /// Ensemble anomaly score in [0, 100], present only when the ensemble
    /// actually ran this cycle.
    pub anomaly_score: Option<f64>,
    /// Sum of active connection-pattern bonuses.
    pub connection_bonus: f64,
}

/// Mutable scoring state carried per process.
#[derive(Debug, Clone, Copy, Default)]
pub struct RiskState {
    pub score: f64,
    pub last_update: f64,
}

#[derive(Debug, Clone, Default)]
pub struct RiskScorer {
    config: RiskConfig,
}

impl RiskScorer {
    pub fn new(config: RiskConfig) -> Self {
        Self { config }
    }

    /// Decay, add contributions in order, clamp. Returns the new score.
    pub fn update(&self, state: &mut RiskState, now: f64, inputs: &RiskInputs) -> f64 {
        self.apply_decay(state, now);

        let mut score = state.score;
        score += inputs.base_weight.clamp(0.0, 10.0);
        if let Some(deviation) = inputs.behavioral_deviation {
            score += (deviation.clamp(0.0, 1.0) * self.config.behavior_penalty_max)
                .min(self.config.behavior_penalty_max);
        }
        if let Some(anomaly) = inputs.anomaly_score {
            score += anomaly.clamp(0.0, MAX_SCORE) * self.config.anomaly_weight;
        }
        score += inputs.connection_bonus.max(0.0);

        state.score = score.clamp(0.0, MAX_SCORE);
        state.last_update = now;
        state.score
    }

    /// Decay only, for idle processes swept without new events. Strictly
    /// decreases the score (or holds it at zero).
    pub fn decay_idle(&self, state: &mut RiskState, now: f64) -> f64 {
        self.apply_decay(state, now);
        state.last_update = now;
        state.score
    }

    fn apply_decay(&self, state: &mut RiskState, now: f64) {
        let elapsed = now - state.last_update;
        if elapsed <= 0.0 || state.last_update == 0.0 {
            return;
        }
        let periods = elapsed / self.config.decay_interval_secs;
        state.score = (state.score * self.config.decay_factor.powf(periods)).clamp(0.0, MAX_SCORE);
    }
}
