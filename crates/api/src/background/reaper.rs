//! Periodic stuck-job reaping.
//!
//! Cancels pending or running jobs with no activity for longer than the
//! configured threshold, so their category can be triggered again.

use std::sync::Arc;
use std::time::Duration;

use inkdex_pipeline::reaper::StuckJobReaper;
use tokio_util::sync::CancellationToken;

/// Run the reaper loop until `cancel` is triggered.
pub async fn run(reaper: Arc<StuckJobReaper>, every: Duration, cancel: CancellationToken) {
    tracing::info!(interval_secs = every.as_secs(), "Stuck job reaper started");

    let mut interval = tokio::time::interval(every);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Stuck job reaper stopping");
                break;
            }
            _ = interval.tick() => {
                match reaper.sweep().await {
                    Ok(cancelled) if !cancelled.is_empty() => {
                        tracing::info!(count = cancelled.len(), job_ids = ?cancelled, "Reaper: cancelled stuck jobs");
                    }
                    Ok(_) => tracing::debug!("Reaper: no stuck jobs"),
                    Err(e) => tracing::error!(error = %e, "Reaper: sweep failed"),
                }
            }
        }
    }
}
