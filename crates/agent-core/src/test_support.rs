//! Shared event builders for engine tests.

use detection::{ConnectionInfo, SyscallEvent};

pub fn syscall_event(pid: u32, syscall: &str, timestamp: f64) -> SyscallEvent {
    SyscallEvent {
        pid,
        syscall: syscall.to_string(),
        timestamp,
        uid: Some(1000),
        comm: Some(format!("proc-{pid}")),
        exe: None,
        network: None,
        resources: None,
    }
}

pub fn connect_event(pid: u32, timestamp: f64, dest_ip: &str, dest_port: u16) -> SyscallEvent {
    let mut event = syscall_event(pid, "connect", timestamp);
    event.network = Some(ConnectionInfo {
        dest_ip: Some(dest_ip.to_string()),
        dest_port: Some(dest_port),
        bytes_sent: 0,
        bytes_recv: 0,
    });
    event
}

pub fn connect_event_with_bytes(
    pid: u32,
    timestamp: f64,
    dest_ip: &str,
    dest_port: u16,
    bytes_sent: u64,
) -> SyscallEvent {
    let mut event = connect_event(pid, timestamp, dest_ip, dest_port);
    if let Some(network) = event.network.as_mut() {
        network.bytes_sent = bytes_sent;
    }
    event
}
