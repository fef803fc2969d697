//! Thin collector adapter: NDJSON syscall events on stdin.
//!
//! The kernel-side collector is an external component; this adapter only
//! defines the transport for the normalized event shape. Malformed lines
//! are counted and skipped — a corrupt line never stalls the stream.

use std::sync::Arc;

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::debug;

use detection::SyscallEvent;

use crate::engine::DetectionRuntime;

pub async fn read_stdin_events(
    tx: mpsc::Sender<SyscallEvent>,
    runtime: Arc<DetectionRuntime>,
) -> Result<()> {
    let stdin = tokio::io::stdin();
    let mut lines = BufReader::new(stdin).lines();

    while let Some(line) = lines.next_line().await? {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        match serde_json::from_str::<SyscallEvent>(trimmed) {
            Ok(event) => {
                if tx.send(event).await.is_err() {
                    break;
                }
            }
            Err(err) => {
                runtime.record_malformed_input();
                debug!(error = %err, "skipping malformed event line");
            }
        }
    }
    Ok(())
}
