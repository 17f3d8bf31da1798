//! Fleet membership: registration and the periodic check-in loop.

use std::time::Duration;

use inkdex_core::types::DbId;
use inkdex_core::worker_pool::{RegisterWorker, Worker};
use tokio_util::sync::CancellationToken;

use crate::client::{ClientError, OrchestratorClient};

/// Register with the orchestrator, logging the assigned identity.
pub async fn register(
    client: &OrchestratorClient,
    input: &RegisterWorker,
) -> Result<Worker, ClientError> {
    let worker = client.register(input).await?;
    tracing::info!(
        worker_id = worker.id,
        name = %worker.name,
        status = %worker.status,
        ip = %worker.ip_address,
        "Registered with orchestrator",
    );
    Ok(worker)
}

/// Check in every `every` until `cancel` fires. Failures are logged and
/// retried on the next tick; an identity change is logged when seen.
pub async fn check_in_loop(
    client: &OrchestratorClient,
    worker_id: DbId,
    every: Duration,
    cancel: CancellationToken,
) {
    tracing::info!(worker_id, interval_secs = every.as_secs(), "Check-in loop started");

    let mut interval = tokio::time::interval(every);
    let mut last_ip: Option<String> = None;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!(worker_id, "Check-in loop stopping");
                break;
            }
            _ = interval.tick() => {
                match client.check_in(worker_id).await {
                    Ok(worker) => {
                        if last_ip.as_deref().is_some_and(|ip| ip != worker.ip_address) {
                            tracing::info!(
                                worker_id,
                                ip = %worker.ip_address,
                                instance_id = %worker.instance_id,
                                "Orchestrator assigned a new identity",
                            );
                        }
                        tracing::debug!(worker_id, status = %worker.status, "Checked in");
                        last_ip = Some(worker.ip_address);
                    }
                    Err(e) => tracing::warn!(worker_id, error = %e, "Check-in failed"),
                }
            }
        }
    }
}
