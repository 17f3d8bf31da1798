//! Marks silent workers offline.

use std::sync::Arc;
use std::time::Duration;

use inkdex_pipeline::fleet::WorkerFleet;
use tokio_util::sync::CancellationToken;

pub async fn run(fleet: Arc<WorkerFleet>, every: Duration, cancel: CancellationToken) {
    tracing::info!(interval_secs = every.as_secs(), "Offline sweep started");

    let mut interval = tokio::time::interval(every);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Offline sweep stopping");
                break;
            }
            _ = interval.tick() => {
                match fleet.sweep_offline().await {
                    Ok(marked) if !marked.is_empty() => {
                        let names: Vec<&str> = marked.iter().map(|w| w.name.as_str()).collect();
                        tracing::warn!(count = marked.len(), workers = ?names, "Offline sweep: workers went silent");
                    }
                    Ok(_) => tracing::debug!("Offline sweep: all workers reporting"),
                    Err(e) => tracing::error!(error = %e, "Offline sweep: pass failed"),
                }
            }
        }
    }
}
