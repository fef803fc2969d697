//! Feature extraction: syscall window + resource snapshot → fixed vector.
//!
//! The extractor is deterministic and side-effect free: the same window and
//! snapshot always produce the same vector. Missing resource fields default
//! to zero rather than erroring. Every feature is named so ensemble
//! explanations can point at concrete behavior instead of vector indices.

use std::collections::HashMap;

use crate::math::shannon_entropy_bits;
use crate::weights::SyscallWeightTable;
use crate::window::{SyscallWindow, WINDOW_CAPACITY};
use crate::types::ResourceSnapshot;

/// Dimensionality of the extracted vector.
pub const FEATURE_COUNT: usize = 50;

/// Windows shorter than this are extractable but must not be fed to the
/// anomaly ensemble — too little behavior to judge a process by.
pub const MIN_WINDOW_FOR_SCORING: usize = 15;

/// Syscalls tracked with a dedicated frequency slot: the network, file,
/// and process-control calls that carry the most behavioral signal.
pub const TRACKED_SYSCALLS: [&str; 30] = [
    // Network
    "socket",
    "connect",
    "bind",
    "listen",
    "accept",
    "sendto",
    "recvfrom",
    "sendmsg",
    "recvmsg",
    "sendfile",
    // Filesystem
    "open",
    "openat",
    "read",
    "write",
    "close",
    "unlink",
    "unlinkat",
    "rename",
    "chmod",
    "chown",
    // Process control
    "execve",
    "fork",
    "clone",
    "ptrace",
    "kill",
    "setuid",
    "mprotect",
    "mmap",
    "memfd_create",
    "prctl",
];

/// Ordered syscall transitions with a dedicated frequency slot. Fixed set
/// rather than per-window top-k so vectors from different processes stay
/// comparable dimension by dimension.
pub const TRACKED_BIGRAMS: [(&str, &str); 10] = [
    ("socket", "connect"),
    ("connect", "sendto"),
    ("open", "read"),
    ("openat", "read"),
    ("read", "write"),
    ("write", "close"),
    ("fork", "execve"),
    ("clone", "execve"),
    ("mmap", "mprotect"),
    ("execve", "openat"),
];

/// Names for every vector slot, index-aligned with the extracted vector.
pub fn feature_name(index: usize) -> &'static str {
    const DERIVED: [&str; 10] = [
        "unique_syscall_ratio",
        "syscall_entropy_bits",
        "high_risk_ratio",
        "burst_rate",
        "network_ratio",
        "file_ratio",
        "cpu_percent",
        "mem_percent",
        "thread_count",
        "window_fill",
    ];
    if index < TRACKED_SYSCALLS.len() {
        return TRACKED_SYSCALLS[index];
    }
    let index = index - TRACKED_SYSCALLS.len();
    if index < DERIVED.len() {
        return DERIVED[index];
    }
    const BIGRAM_NAMES: [&str; 10] = [
        "bigram_socket_connect",
        "bigram_connect_sendto",
        "bigram_open_read",
        "bigram_openat_read",
        "bigram_read_write",
        "bigram_write_close",
        "bigram_fork_execve",
        "bigram_clone_execve",
        "bigram_mmap_mprotect",
        "bigram_execve_openat",
    ];
    BIGRAM_NAMES[index - DERIVED.len()]
}

/// Extracts fixed-length behavior vectors from syscall windows.
#[derive(Debug, Clone, Default)]
pub struct FeatureExtractor {
    weights: SyscallWeightTable,
}

impl FeatureExtractor {
    pub fn new(weights: SyscallWeightTable) -> Self {
        Self { weights }
    }

    /// Extract the feature vector. Never fails: an empty window yields the
    /// zero vector, absent resources contribute zeros.
    pub fn extract(
        &self,
        window: &SyscallWindow,
        resources: Option<&ResourceSnapshot>,
    ) -> [f64; FEATURE_COUNT] {
        let mut values = [0.0f64; FEATURE_COUNT];
        let len = window.len();
        if len == 0 {
            return values;
        }
        let n = len as f64;
        let counts = window.counts();

        // Per-syscall frequencies
        for (i, name) in TRACKED_SYSCALLS.iter().enumerate() {
            values[i] = counts.get(*name).copied().unwrap_or(0) as f64 / n;
        }

        let base = TRACKED_SYSCALLS.len();

        // Distribution shape
        values[base] = counts.len() as f64 / n;
        values[base + 1] = shannon_entropy_bits(&counts);

        // Weighted ratios
        let mut high_risk = 0u64;
        let mut network = 0u64;
        let mut file = 0u64;
        for (name, count) in &counts {
            if self.weights.is_high_risk(name) {
                high_risk += count;
            }
            if self.weights.is_network(name) {
                network += count;
            }
            if self.weights.is_file(name) {
                file += count;
            }
        }
        values[base + 2] = high_risk as f64 / n;

        // Burst rate: events per second across the window span. A window
        // observed in a single tick reads as the full window per second.
        let span = window.span_secs();
        values[base + 3] = if span > 0.0 { (n / span).min(10_000.0) } else { n };

        values[base + 4] = network as f64 / n;
        values[base + 5] = file as f64 / n;

        // Resource snapshot, zeros when absent
        let res = resources.copied().unwrap_or_default();
        values[base + 6] = (res.cpu_percent / 100.0).clamp(0.0, 1.0);
        values[base + 7] = (res.mem_percent / 100.0).clamp(0.0, 1.0);
        values[base + 8] = (res.threads as f64 / 128.0).min(1.0);
        values[base + 9] = n / WINDOW_CAPACITY as f64;

        // Transition frequencies
        if len >= 2 {
            let mut bigram_counts: HashMap<(&str, &str), u64> = HashMap::new();
            for pair in window.bigrams() {
                *bigram_counts.entry(pair).or_insert(0) += 1;
            }
            let pairs = (len - 1) as f64;
            for (i, pair) in TRACKED_BIGRAMS.iter().enumerate() {
                values[base + 10 + i] =
                    bigram_counts.get(pair).copied().unwrap_or(0) as f64 / pairs;
            }
        }

        values
    }
}
