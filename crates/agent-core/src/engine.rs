//! Detection runtime: routes collector events through the pipeline,
//! maintains per-process and per-connection state, emits detections to
//! subscribers, and runs the eviction sweep and retraining off the hot
//! path.
//!
//! Nothing in `handle_event` can abort event processing: malformed
//! sub-payloads skip their sub-analysis, an untrained ensemble scores
//! zero, and a failed retrain leaves the previous model generation in
//! service.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use baseline::BaselineStore;
use detection::{
    ensemble, AnomalyResult, ConnectionRecord, ConnectionTrack, Detection, DetectionKind,
    FeatureExtractor, ModelGeneration, PatternHit, RiskInputs, RiskScorer, Severity, SyscallEvent,
    SyscallWeightTable, FEATURE_COUNT,
};

use crate::config::AgentConfig;
use crate::state::{ProcessSnapshot, ProcessState, ShardedMap};

/// Unix time as fractional seconds.
pub fn unix_now() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}

#[derive(Debug, Default)]
pub struct EngineCounters {
    pub events_processed: AtomicU64,
    pub malformed_events: AtomicU64,
    pub network_events: AtomicU64,
    pub ml_evaluations: AtomicU64,
    pub alerts_emitted: AtomicU64,
    pub alerts_suppressed: AtomicU64,
    pub processes_evicted: AtomicU64,
    pub processes_exited: AtomicU64,
    pub tracks_evicted: AtomicU64,
    pub retrain_attempts: AtomicU64,
    pub retrain_failures: AtomicU64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CountersSnapshot {
    pub events_processed: u64,
    pub malformed_events: u64,
    pub network_events: u64,
    pub ml_evaluations: u64,
    pub alerts_emitted: u64,
    pub alerts_suppressed: u64,
    pub processes_evicted: u64,
    pub processes_exited: u64,
    pub tracks_evicted: u64,
    pub retrain_attempts: u64,
    pub retrain_failures: u64,
}

impl EngineCounters {
    fn snapshot(&self) -> CountersSnapshot {
        CountersSnapshot {
            events_processed: self.events_processed.load(Ordering::Relaxed),
            malformed_events: self.malformed_events.load(Ordering::Relaxed),
            network_events: self.network_events.load(Ordering::Relaxed),
            ml_evaluations: self.ml_evaluations.load(Ordering::Relaxed),
            alerts_emitted: self.alerts_emitted.load(Ordering::Relaxed),
            alerts_suppressed: self.alerts_suppressed.load(Ordering::Relaxed),
            processes_evicted: self.processes_evicted.load(Ordering::Relaxed),
            processes_exited: self.processes_exited.load(Ordering::Relaxed),
            tracks_evicted: self.tracks_evicted.load(Ordering::Relaxed),
            retrain_attempts: self.retrain_attempts.load(Ordering::Relaxed),
            retrain_failures: self.retrain_failures.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelInfo {
    pub trained: bool,
    pub generation: u64,
    pub sample_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct EngineSnapshot {
    pub generated_at: f64,
    pub model: ModelInfo,
    pub counters: CountersSnapshot,
    pub tracked_processes: usize,
    pub processes: Vec<ProcessSnapshot>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SweepStats {
    pub evicted_processes: usize,
    pub evicted_tracks: usize,
}

/// Output of the per-process bookkeeping phase.
struct EventContext {
    process_name: String,
    base_weight: f64,
    behavioral_deviation: Option<f64>,
    features: Option<[f64; FEATURE_COUNT]>,
}

pub struct DetectionRuntime {
    config: AgentConfig,
    weights: SyscallWeightTable,
    extractor: FeatureExtractor,
    scorer: RiskScorer,

    processes: ShardedMap<u32, ProcessState>,
    tracks_by_pid: ShardedMap<u32, ConnectionTrack>,
    /// Redundant (process-name, dest-ip) tracks so short-lived processes
    /// stay analyzable after their pid-keyed state is gone.
    tracks_by_peer: ShardedMap<(String, String), ConnectionTrack>,
    cooldowns: ShardedMap<u32, f64>,

    /// Read-mostly model generation; retraining swaps the Arc wholesale.
    model: RwLock<Option<Arc<ModelGeneration>>>,
    model_generation: AtomicU64,
    retrain_in_flight: AtomicBool,
    /// Rolling buffer of live feature vectors for incremental retraining.
    training_buffer: Mutex<VecDeque<Vec<f64>>>,

    baseline_store: Mutex<BaselineStore>,

    detections_tx: broadcast::Sender<Detection>,
    pub counters: EngineCounters,
}

impl DetectionRuntime {
    pub fn new(config: AgentConfig) -> Self {
        let (detections_tx, _) = broadcast::channel(config.detection_channel_capacity);
        let weights = SyscallWeightTable::new();
        let mut store = match &config.baseline_store_path {
            Some(path) => BaselineStore::load_or_new(path).unwrap_or_else(|err| {
                warn!(error = %err, "baseline store unreadable, starting empty");
                BaselineStore::new(path)
            }),
            None => BaselineStore::new("procwarden-baselines.bin"),
        };
        store.seed_defaults_if_empty();

        Self {
            extractor: FeatureExtractor::new(weights.clone()),
            weights,
            scorer: RiskScorer::new(config.risk.clone()),
            processes: ShardedMap::new(),
            tracks_by_pid: ShardedMap::new(),
            tracks_by_peer: ShardedMap::new(),
            cooldowns: ShardedMap::new(),
            model: RwLock::new(None),
            model_generation: AtomicU64::new(0),
            retrain_in_flight: AtomicBool::new(false),
            training_buffer: Mutex::new(VecDeque::with_capacity(
                config.training_buffer_capacity.min(4096),
            )),
            baseline_store: Mutex::new(store),
            detections_tx,
            counters: EngineCounters::default(),
            config,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Detection> {
        self.detections_tx.subscribe()
    }

    pub fn record_malformed_input(&self) {
        self.counters.malformed_events.fetch_add(1, Ordering::Relaxed);
    }

    // ─── Event pipeline ─────────────────────────────────────────────

    /// Process one collector event end to end. Never fails; a bad event's
    /// fallout is contained to that event.
    pub fn handle_event(&self, event: &SyscallEvent) {
        self.counters.events_processed.fetch_add(1, Ordering::Relaxed);
        let now = event.timestamp;

        if event.is_exit() {
            self.retire_process(event.pid);
            return;
        }

        let ctx = self.observe_process(event, now);

        // Connection-pattern analysis, only when the payload is complete.
        let (pattern_hits, connection_bonus) = self.observe_connection(event, &ctx, now);

        // Ensemble inference off the swappable generation; untrained is a
        // typed absence, not an error.
        let anomaly = ctx.features.as_ref().map(|vector| {
            self.counters.ml_evaluations.fetch_add(1, Ordering::Relaxed);
            self.push_training_vector(vector.to_vec());
            let generation = self.model.read().clone();
            match generation {
                Some(model) => model.score(vector),
                None => AnomalyResult::untrained(),
            }
        });

        let candidates = self.apply_scoring(event, &ctx, anomaly, pattern_hits, connection_bonus, now);
        self.emit_gated(event.pid, &ctx.process_name, candidates, now);
    }

    /// Per-process bookkeeping: identity, window, baseline, and the
    /// ensemble rate limit (every N syscalls or every T seconds,
    /// whichever comes first).
    fn observe_process(&self, event: &SyscallEvent, now: f64) -> EventContext {
        let base_weight = self.weights.weight(&event.syscall);
        self.processes.with_entry(
            event.pid,
            || {
                let name = event.resolved_name();
                let seeded = self.baseline_store.lock().baseline_for(&name);
                ProcessState::new(event.pid, name, now, seeded)
            },
            |state| {
                // Name resolution can improve after the first event.
                let name = event.resolved_name();
                if !name.starts_with("pid-") && name != state.resolved_name {
                    state.resolved_name = name;
                }
                state.last_seen = state.last_seen.max(now);
                state.window.push(&event.syscall, now);
                state.baseline.observe(&event.syscall, &self.config.baseline);
                if event.resources.is_some() {
                    state.last_resources = event.resources;
                }
                state.syscalls_since_ml = state.syscalls_since_ml.saturating_add(1);

                let ml_due = state.window.len() >= self.config.min_syscalls_for_ml
                    && (state.syscalls_since_ml >= self.config.ml_every_events
                        || now - state.last_ml_ts >= self.config.ml_every_secs);

                let features = if ml_due {
                    state.syscalls_since_ml = 0;
                    state.last_ml_ts = now;
                    Some(
                        self.extractor
                            .extract(&state.window, state.last_resources.as_ref()),
                    )
                } else {
                    None
                };

                let behavioral_deviation = state
                    .baseline
                    .deviation(&state.window.counts(), &self.config.baseline);

                EventContext {
                    process_name: state.resolved_name.clone(),
                    base_weight,
                    behavioral_deviation,
                    features,
                }
            },
        )
    }

    /// Feed the dual-keyed connection tracks and collect pattern hits plus
    /// the currently-active risk bonus.
    fn observe_connection(
        &self,
        event: &SyscallEvent,
        ctx: &EventContext,
        now: f64,
    ) -> (Vec<PatternHit>, f64) {
        let Some(conn) = event.connection() else {
            // No new record, but previously-established patterns keep
            // contributing their bonus.
            let bonus = self
                .tracks_by_pid
                .get_with(&event.pid, |t| t.active_bonus(now, &self.config.conntrack))
                .unwrap_or(0.0);
            return (Vec::new(), bonus);
        };

        self.counters.network_events.fetch_add(1, Ordering::Relaxed);
        let dest_ip = conn.dest_ip.clone().unwrap_or_default();
        let record = ConnectionRecord {
            dest_ip: dest_ip.clone(),
            dest_port: conn.dest_port.unwrap_or_default(),
            ts: now,
            bytes_sent: conn.bytes_sent,
            bytes_recv: conn.bytes_recv,
        };

        let (mut hits, pid_patterns) = self.tracks_by_pid.with_entry(
            event.pid,
            ConnectionTrack::new,
            |track| {
                let hits = track.observe(record.clone(), &self.config.conntrack);
                let patterns = track.active_patterns(now, &self.config.conntrack);
                (hits, patterns)
            },
        );

        let peer_key = (ctx.process_name.clone(), dest_ip);
        let (peer_hits, peer_patterns) = self.tracks_by_peer.with_entry(
            peer_key,
            ConnectionTrack::new,
            |track| {
                let hits = track.observe(record, &self.config.conntrack);
                let patterns = track.active_patterns(now, &self.config.conntrack);
                (hits, patterns)
            },
        );
        for hit in peer_hits {
            if !hits.iter().any(|h| h.kind == hit.kind) {
                hits.push(hit);
            }
        }

        (hits, pid_patterns.union(peer_patterns).bonus())
    }

    /// Risk update plus detection-candidate assembly.
    fn apply_scoring(
        &self,
        event: &SyscallEvent,
        ctx: &EventContext,
        anomaly: Option<AnomalyResult>,
        pattern_hits: Vec<PatternHit>,
        connection_bonus: f64,
        now: f64,
    ) -> Vec<Detection> {
        let inputs = RiskInputs {
            base_weight: ctx.base_weight,
            behavioral_deviation: ctx.behavioral_deviation,
            anomaly_score: anomaly.as_ref().map(|a| a.score),
            connection_bonus,
        };

        let risk_score = self.processes.with_entry(
            event.pid,
            || {
                ProcessState::new(
                    event.pid,
                    ctx.process_name.clone(),
                    now,
                    baseline::BehaviorBaseline::new(),
                )
            },
            |state| {
                let score = self.scorer.update(&mut state.risk, now, &inputs);
                if let Some(result) = anomaly.as_ref() {
                    state.anomaly_score = result.score;
                }
                score
            },
        );

        let mut candidates = Vec::new();
        for hit in pattern_hits {
            candidates.push(Detection {
                pid: event.pid,
                process_name: ctx.process_name.clone(),
                kind: hit.kind,
                severity: hit.severity,
                score: risk_score,
                confidence: hit.confidence,
                mitre_id: hit.kind.mitre_id().map(str::to_string),
                explanation: hit.explanation,
                timestamp: now,
            });
        }

        if let Some(result) = anomaly {
            if result.is_anomalous && result.score >= self.config.anomaly_alert_threshold {
                candidates.push(Detection {
                    pid: event.pid,
                    process_name: ctx.process_name.clone(),
                    kind: DetectionKind::Anomaly,
                    severity: Severity::Warning,
                    score: result.score,
                    confidence: f64::from(result.agreement_count) / 3.0,
                    mitre_id: None,
                    explanation: if result.contributing_features.is_empty() {
                        format!(
                            "{}/3 models agree on anomalous behavior",
                            result.agreement_count
                        )
                    } else {
                        format!(
                            "{}/3 models agree; deviating features: {}",
                            result.agreement_count,
                            result.contributing_features.join(", ")
                        )
                    },
                    timestamp: now,
                });
            }
        }

        if risk_score >= self.config.alert_threshold {
            candidates.push(Detection {
                pid: event.pid,
                process_name: ctx.process_name.clone(),
                kind: DetectionKind::HighRisk,
                severity: if risk_score >= 90.0 {
                    Severity::Critical
                } else {
                    Severity::Warning
                },
                score: risk_score,
                confidence: (risk_score / 100.0).clamp(0.0, 1.0),
                mitre_id: None,
                explanation: format!(
                    "composite risk {:.1} at or above threshold {:.0} (last syscall: {})",
                    risk_score, self.config.alert_threshold, event.syscall
                ),
                timestamp: now,
            });
        }

        candidates
    }

    /// Cooldown gate: one quiet period per pid. All detections from a
    /// single update cycle share the cooldown stamp, so simultaneous
    /// pattern hits are not split across cycles.
    fn emit_gated(&self, pid: u32, process_name: &str, candidates: Vec<Detection>, now: f64) {
        if candidates.is_empty() {
            return;
        }
        let allowed = self.cooldowns.with_entry(
            pid,
            || f64::NEG_INFINITY,
            |last| {
                if now - *last >= self.config.alert_cooldown_secs {
                    *last = now;
                    true
                } else {
                    false
                }
            },
        );

        if !allowed {
            self.counters
                .alerts_suppressed
                .fetch_add(candidates.len() as u64, Ordering::Relaxed);
            return;
        }

        for detection in candidates {
            info!(
                pid,
                process = %process_name,
                kind = detection.kind.as_str(),
                score = detection.score,
                confidence = detection.confidence,
                "detection emitted"
            );
            self.counters.alerts_emitted.fetch_add(1, Ordering::Relaxed);
            // A send error only means nobody is subscribed right now.
            let _ = self.detections_tx.send(detection);
        }
    }

    /// Immediate teardown on the process-exit signal. Connection tracks
    /// are left alone: the (name, ip) key must keep short-lived processes
    /// analyzable past their pid.
    fn retire_process(&self, pid: u32) {
        if let Some(state) = self.processes.remove(&pid) {
            self.baseline_store
                .lock()
                .absorb(&state.resolved_name, &state.baseline);
            self.cooldowns.remove(&pid);
            self.counters.processes_exited.fetch_add(1, Ordering::Relaxed);
        }
    }

    // ─── Background maintenance ─────────────────────────────────────

    /// Evict stale state and decay idle scores. Runs on a timer, off the
    /// per-event path.
    pub fn sweep(&self, now: f64) -> SweepStats {
        let timeout = self.config.stale_timeout_secs;

        self.processes
            .for_each_mut(|_, state| {
                self.scorer.decay_idle(&mut state.risk, now);
            });

        let removed = self
            .processes
            .retain_and_collect(|_, state| now - state.last_seen <= timeout);
        let mut stats = SweepStats {
            evicted_processes: removed.len(),
            ..SweepStats::default()
        };
        if !removed.is_empty() {
            let mut store = self.baseline_store.lock();
            for (pid, state) in &removed {
                store.absorb(&state.resolved_name, &state.baseline);
                self.cooldowns.remove(pid);
            }
            self.counters
                .processes_evicted
                .fetch_add(removed.len() as u64, Ordering::Relaxed);
        }

        let dead_pid_tracks = self
            .tracks_by_pid
            .retain_and_collect(|_, track| now - track.last_seen() <= timeout);
        let dead_peer_tracks = self
            .tracks_by_peer
            .retain_and_collect(|_, track| now - track.last_seen() <= timeout);
        stats.evicted_tracks = dead_pid_tracks.len() + dead_peer_tracks.len();
        self.counters
            .tracks_evicted
            .fetch_add(stats.evicted_tracks as u64, Ordering::Relaxed);

        stats
    }

    fn push_training_vector(&self, vector: Vec<f64>) {
        let mut buffer = self.training_buffer.lock();
        buffer.push_back(vector);
        while buffer.len() > self.config.training_buffer_capacity {
            buffer.pop_front();
        }
    }

    pub fn pending_training_vectors(&self) -> usize {
        self.training_buffer.lock().len()
    }

    /// Drain the buffer for training if it holds at least `min` vectors.
    /// Draining (rather than copying) keeps the event-driven trigger from
    /// refiring on every subsequent event.
    fn training_snapshot(&self, min: usize) -> Option<Vec<Vec<f64>>> {
        let mut buffer = self.training_buffer.lock();
        if buffer.len() < min {
            return None;
        }
        Some(std::mem::take(&mut *buffer).into())
    }

    pub fn install_generation(&self, generation: ModelGeneration) {
        let sample_count = generation.sample_count();
        *self.model.write() = Some(Arc::new(generation));
        let n = self.model_generation.fetch_add(1, Ordering::Relaxed) + 1;
        info!(generation = n, samples = sample_count, "model generation installed");
    }

    pub fn model_info(&self) -> ModelInfo {
        let guard = self.model.read();
        ModelInfo {
            trained: guard.is_some(),
            generation: self.model_generation.load(Ordering::Relaxed),
            sample_count: guard.as_ref().map(|g| g.sample_count()).unwrap_or(0),
        }
    }

    /// Retrain on the buffered live vectors if enough have accumulated and
    /// no retrain is already running. CPU-bound fitting happens on the
    /// blocking pool; the active generation stays in service throughout.
    pub fn maybe_spawn_retrain(self: Arc<Self>, min_vectors: usize) {
        if self.retrain_in_flight.swap(true, Ordering::AcqRel) {
            return;
        }
        let Some(corpus) = self.training_snapshot(min_vectors) else {
            self.retrain_in_flight.store(false, Ordering::Release);
            return;
        };

        let runtime = self;
        tokio::spawn(async move {
            runtime
                .counters
                .retrain_attempts
                .fetch_add(1, Ordering::Relaxed);
            let config = runtime.config.ensemble.clone();
            let samples = corpus.len();
            let outcome =
                tokio::task::spawn_blocking(move || ensemble::train(&corpus, &config)).await;

            match outcome {
                Ok(Ok(generation)) => {
                    debug!(samples, "retrain complete");
                    runtime.install_generation(generation);
                }
                Ok(Err(err)) => {
                    runtime
                        .counters
                        .retrain_failures
                        .fetch_add(1, Ordering::Relaxed);
                    warn!(error = %err, samples, "retrain failed, keeping active generation");
                }
                Err(err) => {
                    runtime
                        .counters
                        .retrain_failures
                        .fetch_add(1, Ordering::Relaxed);
                    warn!(error = %err, "retrain task aborted, keeping active generation");
                }
            }
            runtime.retrain_in_flight.store(false, Ordering::Release);
        });
    }

    /// One-shot initial training from the configured normal-behavior
    /// corpus. Failures leave the engine untrained but running.
    pub fn bootstrap_from_corpus(&self) {
        let Some(path) = self.config.training_corpus_path.clone() else {
            return;
        };
        let load = match baseline::corpus::load_jsonl(&path) {
            Ok(load) => load,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "training corpus unreadable, starting untrained");
                return;
            }
        };
        if load.skipped > 0 {
            warn!(skipped = load.skipped, "malformed corpus samples ignored");
        }

        let vectors: Vec<Vec<f64>> = load
            .samples
            .iter()
            .map(|sample| corpus_sample_vector(&self.extractor, sample).to_vec())
            .collect();

        match ensemble::train(&vectors, &self.config.ensemble) {
            Ok(generation) => {
                info!(samples = vectors.len(), "initial model trained from corpus");
                self.install_generation(generation);
            }
            Err(err) => {
                warn!(error = %err, "initial training failed, starting untrained");
            }
        }
    }

    // ─── Query surface ──────────────────────────────────────────────

    pub fn snapshot(&self, now: f64) -> EngineSnapshot {
        let tracked_processes = self.processes.len();
        let mut processes = Vec::with_capacity(tracked_processes);
        self.processes
            .for_each(|_, state| processes.push(ProcessSnapshot::from_state(state)));
        processes.sort_by(|a, b| b.risk_score.total_cmp(&a.risk_score));

        EngineSnapshot {
            generated_at: now,
            model: self.model_info(),
            counters: self.counters.snapshot(),
            tracked_processes,
            processes,
        }
    }

    pub fn persist_baselines(&self) {
        if self.config.baseline_store_path.is_none() {
            return;
        }
        if let Err(err) = self.baseline_store.lock().save() {
            warn!(error = %err, "baseline store save failed");
        }
    }

    // ─── Main loop ──────────────────────────────────────────────────

    /// Consume events until the channel closes. Events for one pid are
    /// processed in arrival order; sweeps and retrains interleave between
    /// events, never during one.
    pub async fn run(self: Arc<Self>, mut events: mpsc::Receiver<SyscallEvent>) {
        let sweep_period = Duration::from_secs(self.config.sweep_interval_secs);
        let mut sweep_tick =
            tokio::time::interval_at(tokio::time::Instant::now() + sweep_period, sweep_period);
        sweep_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        let retrain_period = Duration::from_secs(self.config.retrain_interval_secs);
        let mut retrain_tick =
            tokio::time::interval_at(tokio::time::Instant::now() + retrain_period, retrain_period);
        retrain_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                maybe_event = events.recv() => {
                    match maybe_event {
                        Some(event) => {
                            self.handle_event(&event);
                            if self.pending_training_vectors() >= self.config.retrain_min_vectors {
                                Arc::clone(&self).maybe_spawn_retrain(self.config.retrain_min_vectors);
                            }
                        }
                        None => {
                            info!("event channel closed, engine stopping");
                            break;
                        }
                    }
                }
                _ = sweep_tick.tick() => {
                    let now = unix_now();
                    let stats = self.sweep(now);
                    let snapshot = self.snapshot(now);
                    debug!(
                        tracked = snapshot.tracked_processes,
                        events = snapshot.counters.events_processed,
                        alerts = snapshot.counters.alerts_emitted,
                        evicted_processes = stats.evicted_processes,
                        evicted_tracks = stats.evicted_tracks,
                        "sweep complete"
                    );
                }
                _ = retrain_tick.tick() => {
                    Arc::clone(&self).maybe_spawn_retrain(self.config.ensemble.min_train_samples);
                }
            }
        }
    }
}

/// Turn a corpus sample into a feature vector through the real extractor,
/// with synthetic uniform spacing for the window timestamps.
fn corpus_sample_vector(
    extractor: &FeatureExtractor,
    sample: &baseline::corpus::NormalSample,
) -> [f64; FEATURE_COUNT] {
    let mut window = detection::SyscallWindow::new();
    for (i, name) in sample.syscalls.iter().enumerate() {
        window.push(name, i as f64 * 0.05);
    }
    let resources = sample.resources.map(|r| detection::ResourceSnapshot {
        cpu_percent: r.cpu_percent,
        mem_percent: r.mem_percent,
        threads: r.threads,
    });
    extractor.extract(&window, resources.as_ref())
}

#[cfg(test)]
mod tests;
