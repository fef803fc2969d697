mod collector;
mod config;
mod engine;
mod state;
#[cfg(test)]
mod test_support;

use std::sync::Arc;

use anyhow::Result;
use tokio::signal;
use tokio::sync::mpsc;
use tracing::info;

use config::AgentConfig;
use engine::DetectionRuntime;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let config = AgentConfig::load();
    let runtime = Arc::new(DetectionRuntime::new(config.clone()));

    info!(
        alert_threshold = config.alert_threshold,
        min_syscalls_for_ml = config.min_syscalls_for_ml,
        stale_timeout_secs = config.stale_timeout_secs,
        corpus_configured = config.training_corpus_path.is_some(),
        "procwarden engine started"
    );

    runtime.bootstrap_from_corpus();

    // Detections stream to stdout as NDJSON for downstream consumers.
    let mut detections = runtime.subscribe();
    tokio::spawn(async move {
        while let Ok(detection) = detections.recv().await {
            if let Ok(line) = serde_json::to_string(&detection) {
                println!("{line}");
            }
        }
    });

    let (tx, rx) = mpsc::channel(config.event_channel_capacity);
    tokio::spawn(collector::read_stdin_events(tx, runtime.clone()));

    tokio::select! {
        _ = signal::ctrl_c() => {
            info!("shutdown signal received");
        }
        _ = runtime.clone().run(rx) => {}
    }

    runtime.persist_baselines();
    info!("procwarden engine stopped");
    Ok(())
}
