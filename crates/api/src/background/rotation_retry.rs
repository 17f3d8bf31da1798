//! Retries identity rotations that failed at the provider.
//!
//! A worker whose rotation could not be committed stays `rotating` and is
//! never assignable; this loop keeps asking for a fresh identity.

use std::sync::Arc;
use std::time::Duration;

use inkdex_pipeline::rotation::RotationEngine;
use tokio_util::sync::CancellationToken;

pub async fn run(engine: Arc<RotationEngine>, every: Duration, cancel: CancellationToken) {
    tracing::info!(interval_secs = every.as_secs(), "Rotation retry job started");

    let mut interval = tokio::time::interval(every);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Rotation retry job stopping");
                break;
            }
            _ = interval.tick() => {
                match engine.retry_pending().await {
                    Ok(0) => tracing::debug!("Rotation retry: nothing committed"),
                    Ok(rotated) => tracing::info!(rotated, "Rotation retry: committed pending rotations"),
                    Err(e) => tracing::error!(error = %e, "Rotation retry: pass failed"),
                }
            }
        }
    }
}
