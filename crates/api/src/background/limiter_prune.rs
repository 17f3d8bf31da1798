//! Drops trigger-limit state for callers that have gone quiet.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::middleware::trigger_limit::TriggerRateLimiter;

pub async fn run(limiter: Arc<TriggerRateLimiter>, every: Duration, cancel: CancellationToken) {
    tracing::info!(interval_secs = every.as_secs(), "Trigger limiter pruning started");

    let mut interval = tokio::time::interval(every);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Trigger limiter pruning stopping");
                break;
            }
            _ = interval.tick() => {
                let tracked = limiter.prune();
                tracing::debug!(tracked, "Trigger limiter pruned");
            }
        }
    }
}
