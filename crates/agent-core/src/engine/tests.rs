use std::sync::Arc;

use detection::{ensemble, DetectionKind};
use tokio::sync::broadcast::error::TryRecvError;

use super::*;
use crate::test_support::{connect_event, connect_event_with_bytes, syscall_event};

fn runtime() -> DetectionRuntime {
    DetectionRuntime::new(AgentConfig::default())
}

fn drain(rx: &mut tokio::sync::broadcast::Receiver<Detection>) -> Vec<Detection> {
    let mut out = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(detection) => out.push(detection),
            Err(TryRecvError::Empty | TryRecvError::Closed) => break,
            Err(TryRecvError::Lagged(_)) => continue,
        }
    }
    out
}

#[test]
fn cooldown_emits_exactly_one_alert_per_quiet_period() {
    let runtime = runtime();
    let mut rx = runtime.subscribe();

    // ptrace carries weight 9; ten in a row cross the 70-point threshold
    // well within one cooldown window.
    for i in 0..10 {
        runtime.handle_event(&syscall_event(42, "ptrace", 1000.0 + i as f64 * 0.1));
    }
    let first_burst = drain(&mut rx);
    let high_risk: Vec<_> = first_burst
        .iter()
        .filter(|d| d.kind == DetectionKind::HighRisk)
        .collect();
    assert_eq!(
        high_risk.len(),
        1,
        "repeated qualifying conditions within cooldown must emit once: {first_burst:?}"
    );
    assert!(runtime.counters.alerts_suppressed.load(std::sync::atomic::Ordering::Relaxed) > 0);

    // Past the cooldown the next qualifying condition emits again.
    runtime.handle_event(&syscall_event(42, "ptrace", 1000.0 + 125.0));
    let second_burst = drain(&mut rx);
    assert_eq!(
        second_burst
            .iter()
            .filter(|d| d.kind == DetectionKind::HighRisk)
            .count(),
        1
    );
}

#[test]
fn stale_process_absent_from_snapshot_after_sweep() {
    let runtime = runtime();
    for i in 0..5 {
        runtime.handle_event(&syscall_event(7, "read", 1000.0 + i as f64));
    }
    assert_eq!(runtime.snapshot(1010.0).processes.len(), 1);

    // Within the timeout nothing is evicted.
    runtime.sweep(1004.0 + 200.0);
    assert_eq!(runtime.snapshot(1204.0).processes.len(), 1);

    // Past the 300s stale timeout the sweep evicts it.
    runtime.sweep(1004.0 + 301.0);
    let snapshot = runtime.snapshot(1305.0);
    assert!(
        snapshot.processes.iter().all(|p| p.pid != 7),
        "stale process must be gone after sweep"
    );
    assert_eq!(snapshot.counters.processes_evicted, 1);
}

#[test]
fn port_scan_end_to_end() {
    let runtime = runtime();
    let mut rx = runtime.subscribe();

    // 20 connects to distinct ports 5001–5020 within 10 seconds.
    for i in 0..20u16 {
        runtime.handle_event(&connect_event(
            100,
            1000.0 + f64::from(i) * 0.5,
            "203.0.113.9",
            5001 + i,
        ));
    }

    let detections = drain(&mut rx);
    let scans: Vec<_> = detections
        .iter()
        .filter(|d| d.kind == DetectionKind::PortScanning)
        .collect();
    assert_eq!(scans.len(), 1, "exactly one scan detection: {detections:?}");
    assert_eq!(scans[0].mitre_id.as_deref(), Some("T1046"));
    assert!((scans[0].confidence - 0.85).abs() < 1e-9);
    assert_eq!(scans[0].pid, 100);

    // The scan bonus lands in the same update cycle: +75, clamped to 100.
    let snapshot = runtime.snapshot(1010.0);
    let process = snapshot
        .processes
        .iter()
        .find(|p| p.pid == 100)
        .expect("tracked");
    assert!(
        process.risk_score >= 75.0,
        "scan bonus must raise risk by at least 75: {}",
        process.risk_score
    );
}

#[test]
fn beaconing_end_to_end() {
    let runtime = runtime();
    let mut rx = runtime.subscribe();

    // Five connects to the same destination at clean 3-second intervals.
    for i in 0..5 {
        runtime.handle_event(&connect_event(
            200,
            2000.0 + i as f64 * 3.0,
            "10.0.0.5",
            4444,
        ));
    }

    let detections = drain(&mut rx);
    let beacons: Vec<_> = detections
        .iter()
        .filter(|d| d.kind == DetectionKind::C2Beaconing)
        .collect();
    assert_eq!(beacons.len(), 1, "exactly one beacon detection: {detections:?}");
    assert_eq!(beacons[0].mitre_id.as_deref(), Some("T1071"));
    assert!((beacons[0].confidence - 0.90).abs() < 1e-9);
    assert!(beacons[0].explanation.contains("10.0.0.5"));
}

#[test]
fn exfiltration_end_to_end() {
    let mut config = AgentConfig::default();
    config.conntrack.exfil_bytes_threshold = 10_000;
    let runtime = DetectionRuntime::new(config);
    let mut rx = runtime.subscribe();

    // One-second spacing keeps the intervals under the beaconing floor so
    // only the exfiltration detector is in play.
    for i in 0..8 {
        runtime.handle_event(&connect_event_with_bytes(
            300,
            3000.0 + i as f64,
            "198.51.100.7",
            443,
            2_000,
        ));
    }

    let detections = drain(&mut rx);
    let exfil: Vec<_> = detections
        .iter()
        .filter(|d| d.kind == DetectionKind::Exfiltration)
        .collect();
    assert_eq!(exfil.len(), 1);
    assert_eq!(exfil[0].mitre_id.as_deref(), Some("T1041"));
    assert_eq!(exfil[0].severity, Severity::Critical);
}

#[test]
fn untrained_model_scores_zero() {
    let runtime = runtime();
    let mut rx = runtime.subscribe();

    for i in 0..30 {
        runtime.handle_event(&syscall_event(400, "read", 4000.0 + i as f64 * 0.01));
    }

    let snapshot = runtime.snapshot(4001.0);
    let process = snapshot.processes.iter().find(|p| p.pid == 400).expect("tracked");
    assert_eq!(process.anomaly_score, 0.0, "untrained ensemble must score 0");
    assert!(snapshot.counters.ml_evaluations > 0, "ensemble gate must have run");
    assert!(!snapshot.model.trained);
    assert!(
        drain(&mut rx).iter().all(|d| d.kind != DetectionKind::Anomaly),
        "no anomaly detections before training"
    );
}

#[test]
fn ensemble_rate_limited_per_process() {
    let runtime = runtime();

    // 30 events a few milliseconds apart: evaluation at the 15th (window
    // gate) and the 25th (10-syscall limit); the 2-second clock never
    // elapses in between.
    for i in 0..30 {
        runtime.handle_event(&syscall_event(500, "read", 5000.0 + i as f64 * 0.01));
    }
    assert_eq!(
        runtime.counters.ml_evaluations.load(std::sync::atomic::Ordering::Relaxed),
        2
    );

    // A quiet gap beyond the 2-second limit makes the next event due.
    runtime.handle_event(&syscall_event(500, "read", 5010.0));
    assert_eq!(
        runtime.counters.ml_evaluations.load(std::sync::atomic::Ordering::Relaxed),
        3
    );
}

#[test]
fn short_windows_never_reach_the_ensemble() {
    let runtime = runtime();
    for i in 0..14 {
        runtime.handle_event(&syscall_event(600, "read", 6000.0 + i as f64));
    }
    assert_eq!(
        runtime.counters.ml_evaluations.load(std::sync::atomic::Ordering::Relaxed),
        0,
        "below the 15-syscall floor the ensemble must not run"
    );
}

#[test]
fn exit_signal_evicts_immediately() {
    let runtime = runtime();
    for i in 0..5 {
        runtime.handle_event(&syscall_event(700, "openat", 7000.0 + i as f64));
    }
    assert_eq!(runtime.snapshot(7005.0).processes.len(), 1);

    runtime.handle_event(&syscall_event(700, "exit_group", 7006.0));
    let snapshot = runtime.snapshot(7006.0);
    assert!(snapshot.processes.is_empty());
    assert_eq!(snapshot.counters.processes_exited, 1);
}

#[test]
fn incomplete_network_payload_skips_connection_analysis() {
    let runtime = runtime();
    let mut rx = runtime.subscribe();

    let mut event = syscall_event(800, "connect", 8000.0);
    event.network = Some(detection::ConnectionInfo {
        dest_ip: None,
        dest_port: Some(4444),
        bytes_sent: 0,
        bytes_recv: 0,
    });
    for i in 0..10 {
        let mut e = event.clone();
        e.timestamp += i as f64;
        runtime.handle_event(&e);
    }

    assert_eq!(
        runtime.counters.network_events.load(std::sync::atomic::Ordering::Relaxed),
        0
    );
    assert!(drain(&mut rx)
        .iter()
        .all(|d| d.kind != DetectionKind::PortScanning && d.kind != DetectionKind::C2Beaconing));
    // The event itself still counted and scored.
    assert_eq!(runtime.snapshot(8010.0).processes.len(), 1);
}

#[test]
fn trained_generation_flags_anomalous_process() {
    let runtime = runtime();

    // Train on quiet file-serving behavior.
    let extractor = detection::FeatureExtractor::default();
    let mut corpus = Vec::new();
    for s in 0..64 {
        let mut window = detection::SyscallWindow::new();
        for i in 0..(40 + s % 10) {
            let name = match (i + s) % 5 {
                0 => "openat",
                1 => "read",
                2 => "read",
                3 => "write",
                _ => "close",
            };
            window.push(name, (s * 100 + i) as f64 * 0.05);
        }
        corpus.push(extractor.extract(&window, None).to_vec());
    }
    let generation =
        ensemble::train(&corpus, &AgentConfig::default().ensemble).expect("train");
    runtime.install_generation(generation);
    assert!(runtime.model_info().trained);
    assert_eq!(runtime.model_info().generation, 1);

    // An injection-style burst should now carry a nonzero anomaly score.
    for i in 0..40 {
        let name = match i % 4 {
            0 => "ptrace",
            1 => "memfd_create",
            2 => "socket",
            _ => "connect",
        };
        runtime.handle_event(&syscall_event(900, name, 9000.0 + i as f64 * 0.001));
    }
    let snapshot = runtime.snapshot(9001.0);
    let process = snapshot.processes.iter().find(|p| p.pid == 900).expect("tracked");
    assert!(
        process.anomaly_score > 50.0,
        "trained ensemble should flag the burst: {}",
        process.anomaly_score
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn retrain_installs_new_generation_off_path() {
    let runtime = Arc::new(runtime());

    // Two processes with different steady behaviors build up a varied
    // training buffer through the normal event path.
    for i in 0..400u32 {
        let name = match i % 5 {
            0 => "openat",
            1 => "read",
            2 => "write",
            3 => "close",
            _ => "fstat",
        };
        runtime.handle_event(&syscall_event(1000, name, 10_000.0 + f64::from(i) * 0.01));
        let name2 = match i % 4 {
            0 => "socket",
            1 => "sendto",
            2 => "recvfrom",
            _ => "close",
        };
        runtime.handle_event(&syscall_event(1001, name2, 10_000.0 + f64::from(i) * 0.01));
    }
    assert!(runtime.pending_training_vectors() >= 32);

    Arc::clone(&runtime).maybe_spawn_retrain(32);
    for _ in 0..200 {
        if runtime.model_info().trained {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }

    let info = runtime.model_info();
    assert!(info.trained, "retrain should install a generation");
    assert_eq!(info.generation, 1);
    assert_eq!(
        runtime.counters.retrain_failures.load(std::sync::atomic::Ordering::Relaxed),
        0
    );
}

#[test]
fn snapshot_orders_by_risk_descending() {
    let runtime = runtime();
    for i in 0..10 {
        runtime.handle_event(&syscall_event(1, "read", 100.0 + i as f64));
        runtime.handle_event(&syscall_event(2, "ptrace", 100.0 + i as f64));
    }
    let snapshot = runtime.snapshot(111.0);
    assert_eq!(snapshot.processes[0].pid, 2, "riskiest process first");
    assert!(snapshot.processes[0].risk_score > snapshot.processes[1].risk_score);
}

#[test]
fn peer_keyed_track_survives_pid_eviction() {
    let runtime = runtime();
    let mut rx = runtime.subscribe();

    // A short-lived process beacons twice, exits, and a successor with
    // the same name (same comm → same peer key) continues the pattern.
    let mut first = connect_event(1100, 20_000.0, "192.0.2.44", 8443);
    first.comm = Some("dropper".to_string());
    let mut second = connect_event(1100, 20_003.0, "192.0.2.44", 8443);
    second.comm = Some("dropper".to_string());
    runtime.handle_event(&first);
    runtime.handle_event(&second);
    let mut exit = syscall_event(1100, "exit_group", 20_003.5);
    exit.comm = Some("dropper".to_string());
    runtime.handle_event(&exit);

    let mut third = connect_event(1177, 20_006.0, "192.0.2.44", 8443);
    third.comm = Some("dropper".to_string());
    runtime.handle_event(&third);

    let beacons: Vec<_> = drain(&mut rx)
        .into_iter()
        .filter(|d| d.kind == DetectionKind::C2Beaconing)
        .collect();
    assert_eq!(
        beacons.len(),
        1,
        "peer-keyed history must bridge the pid churn"
    );
}
