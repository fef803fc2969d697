//! Static syscall risk weights.
//!
//! Every syscall maps to a base risk weight in 0–10. Weights encode how
//! often a syscall shows up in attack tooling relative to benign workloads:
//! `read` is noise, `ptrace` and module loading are almost always worth
//! attention. Unlisted syscalls get a small default so unknown activity
//! still accumulates risk slowly instead of being invisible.

use std::collections::HashMap;

/// Weight assigned to syscalls absent from the table.
pub const DEFAULT_WEIGHT: f64 = 2.0;

/// Weights at or above this count as "high risk" for feature extraction.
pub const HIGH_RISK_FLOOR: f64 = 7.0;

const BASE_WEIGHTS: &[(&str, f64)] = &[
    // Process control / injection
    ("ptrace", 9.0),
    ("process_vm_readv", 9.0),
    ("process_vm_writev", 10.0),
    ("memfd_create", 9.0),
    ("execve", 6.0),
    ("execveat", 7.0),
    ("fork", 3.0),
    ("vfork", 3.0),
    ("clone", 3.0),
    ("clone3", 3.0),
    ("kill", 4.0),
    ("tkill", 5.0),
    ("tgkill", 5.0),
    ("prctl", 5.0),
    ("seccomp", 6.0),
    ("personality", 7.0),
    // Privilege and identity
    ("setuid", 8.0),
    ("setgid", 7.0),
    ("setreuid", 8.0),
    ("setresuid", 8.0),
    ("setresgid", 7.0),
    ("capset", 8.0),
    ("keyctl", 7.0),
    ("add_key", 6.0),
    // Kernel surface
    ("init_module", 10.0),
    ("finit_module", 10.0),
    ("delete_module", 9.0),
    ("kexec_load", 10.0),
    ("bpf", 8.0),
    ("perf_event_open", 7.0),
    ("modify_ldt", 8.0),
    ("mount", 8.0),
    ("umount2", 7.0),
    ("pivot_root", 9.0),
    ("chroot", 8.0),
    // Memory
    ("mmap", 2.0),
    ("mprotect", 6.0),
    ("mremap", 4.0),
    ("brk", 0.0),
    // Network
    ("socket", 4.0),
    ("connect", 5.0),
    ("bind", 5.0),
    ("listen", 5.0),
    ("accept", 3.0),
    ("accept4", 3.0),
    ("sendto", 4.0),
    ("recvfrom", 3.0),
    ("sendmsg", 4.0),
    ("recvmsg", 3.0),
    ("sendfile", 5.0),
    ("setsockopt", 3.0),
    ("getsockopt", 2.0),
    ("shutdown", 2.0),
    // Filesystem
    ("open", 2.0),
    ("openat", 2.0),
    ("creat", 3.0),
    ("read", 1.0),
    ("write", 2.0),
    ("close", 0.0),
    ("unlink", 4.0),
    ("unlinkat", 4.0),
    ("rename", 3.0),
    ("renameat", 3.0),
    ("truncate", 3.0),
    ("ftruncate", 3.0),
    ("chmod", 4.0),
    ("fchmod", 4.0),
    ("chown", 5.0),
    ("fchown", 5.0),
    ("symlink", 3.0),
    ("link", 2.0),
    ("mknod", 4.0),
    ("utimensat", 3.0),
    ("stat", 1.0),
    ("lstat", 1.0),
    ("fstat", 0.0),
    ("newfstatat", 1.0),
    ("statx", 1.0),
    ("getdents64", 1.0),
    ("readlink", 1.0),
    ("readlinkat", 1.0),
    // Bookkeeping noise
    ("futex", 0.0),
    ("nanosleep", 0.0),
    ("clock_nanosleep", 0.0),
    ("epoll_wait", 0.0),
    ("poll", 0.0),
    ("select", 0.0),
    ("ioctl", 2.0),
    ("dup", 1.0),
    ("dup2", 1.0),
    ("pipe", 1.0),
    ("pipe2", 1.0),
    ("wait4", 1.0),
    ("exit", 0.0),
    ("exit_group", 0.0),
    ("getpid", 0.0),
    ("getuid", 0.0),
    ("geteuid", 1.0),
    ("getgid", 0.0),
    ("uname", 1.0),
    ("sysinfo", 1.0),
    ("sched_yield", 0.0),
];

/// Syscalls treated as network activity by the feature extractor and the
/// connection-pattern plumbing.
pub const NETWORK_SYSCALLS: &[&str] = &[
    "socket", "connect", "bind", "listen", "accept", "accept4", "sendto", "recvfrom", "sendmsg",
    "recvmsg", "sendfile", "setsockopt", "getsockopt", "shutdown",
];

/// Syscalls treated as filesystem activity by the feature extractor.
pub const FILE_SYSCALLS: &[&str] = &[
    "open", "openat", "creat", "read", "write", "close", "unlink", "unlinkat", "rename",
    "renameat", "truncate", "ftruncate", "chmod", "fchmod", "chown", "fchown", "symlink", "link",
    "mknod", "utimensat", "stat", "lstat", "fstat", "newfstatat", "statx", "getdents64",
    "readlink", "readlinkat",
];

/// Syscall name → base risk weight lookup with overridable entries.
#[derive(Debug, Clone)]
pub struct SyscallWeightTable {
    weights: HashMap<&'static str, f64>,
    overrides: HashMap<String, f64>,
    default_weight: f64,
}

impl SyscallWeightTable {
    pub fn new() -> Self {
        Self {
            weights: BASE_WEIGHTS.iter().copied().collect(),
            overrides: HashMap::new(),
            default_weight: DEFAULT_WEIGHT,
        }
    }

    /// Operator recalibration: override or add individual weights without
    /// rebuilding. Values are clamped to the 0–10 scale.
    pub fn with_overrides(mut self, overrides: impl IntoIterator<Item = (String, f64)>) -> Self {
        for (name, weight) in overrides {
            self.overrides.insert(name, weight.clamp(0.0, 10.0));
        }
        self
    }

    pub fn weight(&self, syscall: &str) -> f64 {
        if let Some(w) = self.overrides.get(syscall) {
            return *w;
        }
        self.weights
            .get(syscall)
            .copied()
            .unwrap_or(self.default_weight)
    }

    pub fn is_high_risk(&self, syscall: &str) -> bool {
        self.weight(syscall) >= HIGH_RISK_FLOOR
    }

    pub fn is_network(&self, syscall: &str) -> bool {
        NETWORK_SYSCALLS.contains(&syscall)
    }

    pub fn is_file(&self, syscall: &str) -> bool {
        FILE_SYSCALLS.contains(&syscall)
    }
}

impl Default for SyscallWeightTable {
    fn default() -> Self {
        Self::new()
    }
}
