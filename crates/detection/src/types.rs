use serde::{Deserialize, Serialize};

/// Network fields attached to a connection-related syscall event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionInfo {
    pub dest_ip: Option<String>,
    pub dest_port: Option<u16>,
    #[serde(default)]
    pub bytes_sent: u64,
    #[serde(default)]
    pub bytes_recv: u64,
}

impl ConnectionInfo {
    /// Both endpoint fields present. Sub-analyses that need a destination
    /// skip records failing this check instead of erroring.
    pub fn is_complete(&self) -> bool {
        self.dest_port.is_some() && self.dest_ip.as_deref().is_some_and(|ip| !ip.is_empty())
    }
}

/// Point-in-time resource usage reported by the collector.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ResourceSnapshot {
    #[serde(default)]
    pub cpu_percent: f64,
    #[serde(default)]
    pub mem_percent: f64,
    #[serde(default)]
    pub threads: u32,
}

/// One normalized syscall event from the collector. Immutable once received;
/// the engine never writes back into it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyscallEvent {
    pub pid: u32,
    pub syscall: String,
    /// Unix timestamp, fractional seconds.
    pub timestamp: f64,
    pub uid: Option<u32>,
    /// Reported process name (comm), best-effort.
    pub comm: Option<String>,
    /// Executable path, best-effort.
    pub exe: Option<String>,
    pub network: Option<ConnectionInfo>,
    pub resources: Option<ResourceSnapshot>,
}

impl SyscallEvent {
    /// Best-effort process name: comm, then exe basename, then a pid tag.
    pub fn resolved_name(&self) -> String {
        if let Some(comm) = self.comm.as_deref() {
            if !comm.is_empty() {
                return comm.to_string();
            }
        }
        if let Some(exe) = self.exe.as_deref() {
            if let Some(base) = exe.rsplit('/').next() {
                if !base.is_empty() {
                    return base.to_string();
                }
            }
        }
        format!("pid-{}", self.pid)
    }

    /// The connection payload, only if it carries enough fields to analyze.
    pub fn connection(&self) -> Option<&ConnectionInfo> {
        self.network.as_ref().filter(|n| n.is_complete())
    }

    pub fn is_exit(&self) -> bool {
        matches!(self.syscall.as_str(), "exit" | "exit_group")
    }
}

/// What a detection is claiming about the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DetectionKind {
    HighRisk,
    Anomaly,
    PortScanning,
    C2Beaconing,
    Exfiltration,
}

impl DetectionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::HighRisk => "high_risk",
            Self::Anomaly => "anomaly",
            Self::PortScanning => "port_scanning",
            Self::C2Beaconing => "c2_beaconing",
            Self::Exfiltration => "exfiltration",
        }
    }

    /// MITRE ATT&CK technique, carried as reporting metadata only.
    pub fn mitre_id(self) -> Option<&'static str> {
        match self {
            Self::PortScanning => Some("T1046"),
            Self::C2Beaconing => Some("T1071"),
            Self::Exfiltration => Some("T1041"),
            Self::HighRisk | Self::Anomaly => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Critical => "critical",
        }
    }
}

/// A detection emitted to subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Detection {
    pub pid: u32,
    pub process_name: String,
    pub kind: DetectionKind,
    pub severity: Severity,
    /// Risk score for risk-driven kinds, ensemble score for `Anomaly`.
    pub score: f64,
    pub confidence: f64,
    pub mitre_id: Option<String>,
    pub explanation: String,
    pub timestamp: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolved_name_prefers_comm() {
        let event = SyscallEvent {
            pid: 42,
            syscall: "openat".to_string(),
            timestamp: 0.0,
            uid: None,
            comm: Some("nginx".to_string()),
            exe: Some("/usr/sbin/nginx".to_string()),
            network: None,
            resources: None,
        };
        assert_eq!(event.resolved_name(), "nginx");
    }

    #[test]
    fn resolved_name_falls_back_to_exe_basename_then_pid() {
        let mut event = SyscallEvent {
            pid: 42,
            syscall: "openat".to_string(),
            timestamp: 0.0,
            uid: None,
            comm: None,
            exe: Some("/usr/bin/curl".to_string()),
            network: None,
            resources: None,
        };
        assert_eq!(event.resolved_name(), "curl");
        event.exe = None;
        assert_eq!(event.resolved_name(), "pid-42");
    }

    #[test]
    fn incomplete_connection_is_skipped() {
        let event = SyscallEvent {
            pid: 1,
            syscall: "connect".to_string(),
            timestamp: 0.0,
            uid: None,
            comm: None,
            exe: None,
            network: Some(ConnectionInfo {
                dest_ip: Some("10.0.0.5".to_string()),
                dest_port: None,
                bytes_sent: 0,
                bytes_recv: 0,
            }),
            resources: None,
        };
        assert!(event.connection().is_none());
    }

    #[test]
    fn mitre_ids_match_attack_taxonomy() {
        assert_eq!(DetectionKind::PortScanning.mitre_id(), Some("T1046"));
        assert_eq!(DetectionKind::C2Beaconing.mitre_id(), Some("T1071"));
        assert_eq!(DetectionKind::Exfiltration.mitre_id(), Some("T1041"));
        assert_eq!(DetectionKind::HighRisk.mitre_id(), None);
    }
}
