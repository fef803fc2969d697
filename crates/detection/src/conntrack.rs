//! Connection-pattern detectors: port scanning, C2 beaconing, exfiltration.
//!
//! Each tracked key (a pid, or a process-name + destination pair for
//! processes that die before their pid accumulates history) owns a
//! `ConnectionTrack`: a bounded sliding window of connection records plus
//! lifetime byte counters that survive window eviction — exfiltration is
//! judged on lifetime totals, not the window.
//!
//! All three detectors run on every observation, independently. A pattern
//! hit is reported on the rising edge (condition newly satisfied) and the
//! detector re-arms when the condition lapses; the *bonus* a pattern feeds
//! into risk scoring stays active for as long as the condition holds.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::math::{mean, sample_stddev};
use crate::types::{DetectionKind, Severity};

/// Sliding-window capacity per track.
pub const TRACK_CAPACITY: usize = 100;

/// Thresholds for the three pattern detectors. Runtime-tunable; the
/// defaults match the calibrated production values.
#[derive(Debug, Clone)]
pub struct ConnTrackConfig {
    /// Trailing window for distinct-port counting.
    pub scan_window_secs: f64,
    /// Distinct destination ports within the window that constitute a scan.
    pub scan_min_ports: usize,
    /// Minimum records to one destination before beacon analysis applies.
    pub beacon_min_records: usize,
    /// Intervals below this are ordinary traffic, not beaconing.
    pub beacon_min_interval_secs: f64,
    /// Stddev of inter-arrival intervals must stay below this.
    pub beacon_max_stddev_secs: f64,
    /// Lifetime bytes sent beyond which exfiltration fires.
    pub exfil_bytes_threshold: u64,
}

impl Default for ConnTrackConfig {
    fn default() -> Self {
        Self {
            scan_window_secs: 60.0,
            scan_min_ports: 5,
            beacon_min_records: 3,
            beacon_min_interval_secs: 2.0,
            beacon_max_stddev_secs: 5.0,
            exfil_bytes_threshold: 100 * 1024 * 1024,
        }
    }
}

/// One connection attempt. Malformed events (missing ip/port) never become
/// records; detectors only ever see valid ones.
#[derive(Debug, Clone)]
pub struct ConnectionRecord {
    pub dest_ip: String,
    pub dest_port: u16,
    pub ts: f64,
    pub bytes_sent: u64,
    pub bytes_recv: u64,
}

/// A pattern detector firing on its rising edge.
#[derive(Debug, Clone)]
pub struct PatternHit {
    pub kind: DetectionKind,
    pub severity: Severity,
    pub risk_bonus: f64,
    pub confidence: f64,
    pub explanation: String,
}

/// Sliding connection history for one tracked key.
#[derive(Debug, Clone, Default)]
pub struct ConnectionTrack {
    records: VecDeque<ConnectionRecord>,
    bytes_sent_total: u64,
    bytes_recv_total: u64,
    last_seen: f64,
    scan_active: bool,
    beacon_active: bool,
    exfil_active: bool,
}

impl ConnectionTrack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_seen(&self) -> f64 {
        self.last_seen
    }

    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    pub fn bytes_sent_total(&self) -> u64 {
        self.bytes_sent_total
    }

    pub fn bytes_recv_total(&self) -> u64 {
        self.bytes_recv_total
    }

    /// Append a record and run all detectors, reporting rising-edge hits.
    pub fn observe(&mut self, record: ConnectionRecord, config: &ConnTrackConfig) -> Vec<PatternHit> {
        let now = record.ts;
        self.bytes_sent_total = self.bytes_sent_total.saturating_add(record.bytes_sent);
        self.bytes_recv_total = self.bytes_recv_total.saturating_add(record.bytes_recv);
        self.last_seen = self.last_seen.max(now);
        self.records.push_back(record);
        while self.records.len() > TRACK_CAPACITY {
            self.records.pop_front();
        }

        let mut hits = Vec::new();

        let scan = self.port_scan_evidence(now, config);
        if let Some(ports) = &scan {
            if !self.scan_active {
                hits.push(PatternHit {
                    kind: DetectionKind::PortScanning,
                    severity: Severity::Warning,
                    risk_bonus: 75.0,
                    confidence: 0.85,
                    explanation: format!(
                        "{} distinct destination ports within {:.0}s",
                        ports.len(),
                        config.scan_window_secs
                    ),
                });
            }
        }
        self.scan_active = scan.is_some();

        let beacon = self.beacon_evidence(config);
        if let Some(evidence) = &beacon {
            if !self.beacon_active {
                hits.push(PatternHit {
                    kind: DetectionKind::C2Beaconing,
                    severity: Severity::Critical,
                    risk_bonus: 85.0,
                    confidence: 0.90,
                    explanation: format!(
                        "{} connections to {} at {:.1}s mean interval (stddev {:.2}s)",
                        evidence.record_count,
                        evidence.dest_ip,
                        evidence.mean_interval_secs,
                        evidence.stddev_secs
                    ),
                });
            }
        }
        self.beacon_active = beacon.is_some();

        if self.bytes_sent_total > config.exfil_bytes_threshold {
            if !self.exfil_active {
                hits.push(PatternHit {
                    kind: DetectionKind::Exfiltration,
                    severity: Severity::Critical,
                    risk_bonus: 90.0,
                    confidence: 0.80,
                    explanation: format!(
                        "{} bytes sent over lifetime of track (threshold {})",
                        self.bytes_sent_total, config.exfil_bytes_threshold
                    ),
                });
            }
            self.exfil_active = true;
        }

        hits
    }

    /// Patterns currently in effect for this track, evaluated at `now`.
    /// A pattern stays active for as long as its condition holds, not
    /// just at the edge that announced it.
    pub fn active_patterns(&self, now: f64, config: &ConnTrackConfig) -> ActivePatterns {
        ActivePatterns {
            port_scan: self.port_scan_evidence(now, config).is_some(),
            beaconing: self.beacon_evidence(config).is_some(),
            exfiltration: self.bytes_sent_total > config.exfil_bytes_threshold,
        }
    }

    /// Sum of risk bonuses for patterns currently in effect.
    pub fn active_bonus(&self, now: f64, config: &ConnTrackConfig) -> f64 {
        self.active_patterns(now, config).bonus()
    }

    /// Distinct destination ports within the trailing window, counted
    /// regardless of protocol or connection success. The set is recomputed
    /// from the window on demand, never stored.
    fn port_scan_evidence(&self, now: f64, config: &ConnTrackConfig) -> Option<HashSet<u16>> {
        let cutoff = now - config.scan_window_secs;
        let ports: HashSet<u16> = self
            .records
            .iter()
            .filter(|r| r.ts >= cutoff)
            .map(|r| r.dest_port)
            .collect();
        (ports.len() >= config.scan_min_ports).then_some(ports)
    }

    /// Per-destination inter-arrival regularity. Destinations are grouped
    /// by IP only — C2 channels rotate ports. All intervals must be at or
    /// above the traffic floor and their spread must be tight.
    fn beacon_evidence(&self, config: &ConnTrackConfig) -> Option<BeaconEvidence> {
        let mut by_ip: HashMap<&str, Vec<f64>> = HashMap::new();
        for record in &self.records {
            by_ip.entry(record.dest_ip.as_str()).or_default().push(record.ts);
        }

        let mut ips: Vec<&str> = by_ip.keys().copied().collect();
        ips.sort_unstable();

        for ip in ips {
            let timestamps = &by_ip[ip];
            if timestamps.len() < config.beacon_min_records {
                continue;
            }
            let intervals: Vec<f64> = timestamps.windows(2).map(|w| w[1] - w[0]).collect();
            if intervals
                .iter()
                .any(|dt| *dt < config.beacon_min_interval_secs)
            {
                continue;
            }
            let stddev = sample_stddev(&intervals);
            if stddev < config.beacon_max_stddev_secs {
                return Some(BeaconEvidence {
                    dest_ip: ip.to_string(),
                    record_count: timestamps.len(),
                    mean_interval_secs: mean(&intervals),
                    stddev_secs: stddev,
                });
            }
        }
        None
    }
}

/// Which patterns a track (or a union of tracks for one process) has in
/// effect right now. Summing per distinct pattern keeps a process seen
/// through both its pid track and a peer track from double-counting.
#[derive(Debug, Clone, Copy, Default)]
pub struct ActivePatterns {
    pub port_scan: bool,
    pub beaconing: bool,
    pub exfiltration: bool,
}

impl ActivePatterns {
    pub fn union(self, other: Self) -> Self {
        Self {
            port_scan: self.port_scan || other.port_scan,
            beaconing: self.beaconing || other.beaconing,
            exfiltration: self.exfiltration || other.exfiltration,
        }
    }

    pub fn bonus(&self) -> f64 {
        let mut bonus = 0.0;
        if self.port_scan {
            bonus += 75.0;
        }
        if self.beaconing {
            bonus += 85.0;
        }
        if self.exfiltration {
            bonus += 90.0;
        }
        bonus
    }
}

#[derive(Debug, Clone)]
struct BeaconEvidence {
    dest_ip: String,
    record_count: usize,
    mean_interval_secs: f64,
    stddev_secs: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(ip: &str, port: u16, ts: f64) -> ConnectionRecord {
        ConnectionRecord {
            dest_ip: ip.to_string(),
            dest_port: port,
            ts,
            bytes_sent: 0,
            bytes_recv: 0,
        }
    }

    #[test]
    fn four_distinct_ports_never_scan_five_always() {
        let config = ConnTrackConfig::default();

        let mut track = ConnectionTrack::new();
        let mut hits = Vec::new();
        for (i, port) in [8001u16, 8002, 8003, 8004].iter().enumerate() {
            hits.extend(track.observe(record("10.0.0.1", *port, i as f64), &config));
        }
        assert!(
            hits.iter().all(|h| h.kind != DetectionKind::PortScanning),
            "4 ports must not trigger a scan"
        );

        hits.extend(track.observe(record("10.0.0.1", 8005, 4.0), &config));
        let scans: Vec<_> = hits
            .iter()
            .filter(|h| h.kind == DetectionKind::PortScanning)
            .collect();
        assert_eq!(scans.len(), 1, "5th distinct port must trigger exactly once");
        assert!((scans[0].confidence - 0.85).abs() < 1e-9);
        assert!((scans[0].risk_bonus - 75.0).abs() < 1e-9);
    }

    #[test]
    fn scan_window_excludes_old_ports() {
        let config = ConnTrackConfig::default();
        let mut track = ConnectionTrack::new();
        // 4 ports at t=0..3, a 5th at t=100: the first four are outside the
        // trailing 60s window by then.
        for (i, port) in [1u16, 2, 3, 4].iter().enumerate() {
            track.observe(record("10.0.0.1", *port, i as f64), &config);
        }
        let hits = track.observe(record("10.0.0.1", 5, 100.0), &config);
        assert!(hits.iter().all(|h| h.kind != DetectionKind::PortScanning));
    }

    #[test]
    fn repeated_same_port_is_not_a_scan() {
        let config = ConnTrackConfig::default();
        let mut track = ConnectionTrack::new();
        for i in 0..20 {
            let hits = track.observe(record("10.0.0.1", 443, i as f64), &config);
            assert!(hits.iter().all(|h| h.kind != DetectionKind::PortScanning));
        }
    }

    #[test]
    fn regular_intervals_beacon() {
        let config = ConnTrackConfig::default();
        let mut track = ConnectionTrack::new();
        let mut hits = Vec::new();
        for i in 0..3 {
            hits.extend(track.observe(record("10.0.0.5", 4444, i as f64 * 3.0), &config));
        }
        let beacons: Vec<_> = hits
            .iter()
            .filter(|h| h.kind == DetectionKind::C2Beaconing)
            .collect();
        assert_eq!(beacons.len(), 1);
        assert!((beacons[0].confidence - 0.90).abs() < 1e-9);
        assert!(beacons[0].explanation.contains("10.0.0.5"));
    }

    #[test]
    fn irregular_intervals_do_not_beacon() {
        let config = ConnTrackConfig::default();
        let mut track = ConnectionTrack::new();
        let mut hits = Vec::new();
        // Intervals 3.0s, 8.0s, 15.0s: stddev is way past 5.0s.
        for ts in [0.0, 3.0, 11.0, 26.0] {
            hits.extend(track.observe(record("10.0.0.5", 4444, ts), &config));
        }
        assert!(hits.iter().all(|h| h.kind != DetectionKind::C2Beaconing));
    }

    #[test]
    fn sub_floor_intervals_are_traffic_not_beaconing() {
        let config = ConnTrackConfig::default();
        let mut track = ConnectionTrack::new();
        let mut hits = Vec::new();
        // Perfectly regular but 0.5s apart — busy traffic, not a beacon.
        for i in 0..10 {
            hits.extend(track.observe(record("1.2.3.4", 443, i as f64 * 0.5), &config));
        }
        assert!(hits.iter().all(|h| h.kind != DetectionKind::C2Beaconing));
    }

    #[test]
    fn beacon_groups_by_ip_across_ports() {
        let config = ConnTrackConfig::default();
        let mut track = ConnectionTrack::new();
        let mut hits = Vec::new();
        // Same destination IP rotating ports each beacon.
        for (i, port) in [4444u16, 4445, 4446].iter().enumerate() {
            hits.extend(track.observe(record("10.0.0.5", *port, i as f64 * 4.0), &config));
        }
        assert!(hits.iter().any(|h| h.kind == DetectionKind::C2Beaconing));
    }

    #[test]
    fn exfiltration_uses_lifetime_totals() {
        let config = ConnTrackConfig::default();
        let mut track = ConnectionTrack::new();
        let chunk = 2 * 1024 * 1024u64;
        let mut fired = 0;
        // 60 x 2 MiB = 120 MB; window holds only 100 records but the
        // lifetime counter keeps growing either way.
        for i in 0..60 {
            let mut r = record("172.16.0.9", 443, i as f64);
            r.bytes_sent = chunk;
            for hit in track.observe(r, &config) {
                if hit.kind == DetectionKind::Exfiltration {
                    fired += 1;
                    assert!((hit.confidence - 0.80).abs() < 1e-9);
                    assert_eq!(hit.severity, Severity::Critical);
                }
            }
        }
        assert_eq!(fired, 1, "exfiltration fires once at threshold crossing");
        assert!(track.bytes_sent_total() > config.exfil_bytes_threshold);
    }

    #[test]
    fn window_bounded_but_totals_monotonic() {
        let config = ConnTrackConfig::default();
        let mut track = ConnectionTrack::new();
        for i in 0..500 {
            let mut r = record("10.1.1.1", 80, i as f64);
            r.bytes_sent = 10;
            track.observe(r, &config);
        }
        assert!(track.record_count() <= TRACK_CAPACITY);
        assert_eq!(track.bytes_sent_total(), 5000);
    }

    #[test]
    fn active_bonus_persists_while_pattern_holds() {
        let config = ConnTrackConfig::default();
        let mut track = ConnectionTrack::new();
        for (i, port) in [1u16, 2, 3, 4, 5].iter().enumerate() {
            track.observe(record("10.0.0.1", *port, i as f64), &config);
        }
        assert!((track.active_bonus(5.0, &config) - 75.0).abs() < 1e-9);
        // Long after the window has drained, the scan bonus lapses.
        assert_eq!(track.active_bonus(500.0, &config), 0.0);
    }

    #[test]
    fn union_sums_distinct_patterns_once() {
        let a = ActivePatterns {
            port_scan: true,
            beaconing: true,
            exfiltration: false,
        };
        let b = ActivePatterns {
            port_scan: false,
            beaconing: true,
            exfiltration: false,
        };
        // Beaconing seen on both tracks still counts once.
        assert!((a.union(b).bonus() - 160.0).abs() < 1e-9);
        assert_eq!(ActivePatterns::default().bonus(), 0.0);
    }

    #[test]
    fn simultaneous_patterns_all_fire() {
        let config = ConnTrackConfig {
            exfil_bytes_threshold: 1000,
            ..ConnTrackConfig::default()
        };
        let mut track = ConnectionTrack::new();
        let mut kinds = HashSet::new();
        // Regular 3s beacons to one IP across 5 distinct ports with large
        // payloads: all three detectors should fire over the run.
        for (i, port) in [4441u16, 4442, 4443, 4444, 4445].iter().enumerate() {
            let mut r = record("10.0.0.5", *port, i as f64 * 3.0);
            r.bytes_sent = 400;
            for hit in track.observe(r, &config) {
                kinds.insert(hit.kind);
            }
        }
        assert!(kinds.contains(&DetectionKind::PortScanning));
        assert!(kinds.contains(&DetectionKind::C2Beaconing));
        assert!(kinds.contains(&DetectionKind::Exfiltration));
    }
}
