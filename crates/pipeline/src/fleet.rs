//! Worker registration, check-ins, shutdown, and the offline sweep.

use chrono::Utc;
use inkdex_core::audit::{NewAuditEntry, ACTION_WORKER_SHUTDOWN, RESOURCE_WORKER};
use inkdex_core::error::CoreError;
use inkdex_core::types::{DbId, Timestamp};
use inkdex_core::worker_pool::{
    generate_worker_name, validate_identity, validate_worker_name, RegisterWorker, Worker,
    WorkerIdentity, WorkerStatus,
};
use serde_json::json;

use crate::SharedStore;

pub struct WorkerFleet {
    store: SharedStore,
    offline_after: chrono::TimeDelta,
}

impl WorkerFleet {
    pub fn new(store: SharedStore, offline_after: chrono::TimeDelta) -> Self {
        Self {
            store,
            offline_after,
        }
    }

    /// Register (or re-register) a worker. A missing name is filled with
    /// the first free `worker-NN`.
    pub async fn register(&self, input: RegisterWorker) -> Result<Worker, CoreError> {
        let identity = validate_identity(&WorkerIdentity {
            instance_id: input.instance_id,
            ip_address: input.ip_address,
        })?;
        let now = Utc::now();
        let name = match input.name.map(|n| n.trim().to_string()) {
            Some(name) if !name.is_empty() => {
                validate_worker_name(&name)?;
                name
            }
            _ => generate_worker_name(&self.store.worker_names().await?, now),
        };
        let worker = self.store.register_worker(&name, &identity, now).await?;
        tracing::info!(
            worker_id = worker.id,
            worker = %worker.name,
            ip = %worker.ip_address,
            status = %worker.status,
            "Worker registered",
        );
        Ok(worker)
    }

    pub async fn get(&self, id: DbId) -> Result<Worker, CoreError> {
        self.store
            .find_worker(id)
            .await?
            .ok_or(CoreError::NotFound { entity: "Worker", id })
    }

    pub async fn list(&self) -> Result<Vec<Worker>, CoreError> {
        self.store.list_workers().await
    }

    /// Workers that may receive new tasks: `active` only.
    pub async fn list_assignable(&self) -> Result<Vec<Worker>, CoreError> {
        Ok(self
            .store
            .list_workers()
            .await?
            .into_iter()
            .filter(|w| w.status.is_assignable())
            .collect())
    }

    pub async fn check_in(&self, id: DbId) -> Result<Worker, CoreError> {
        let worker = self.store.check_in_worker(id, Utc::now()).await?;
        tracing::trace!(worker_id = id, status = %worker.status, "Worker checked in");
        Ok(worker)
    }

    /// Take a worker out of service on operator request.
    pub async fn shutdown(&self, id: DbId, actor: &str) -> Result<Worker, CoreError> {
        let worker = self.get(id).await?;
        if worker.status == WorkerStatus::Offline {
            return Ok(worker);
        }
        let Some(stopped) = self
            .store
            .transition_worker(id, worker.status, WorkerStatus::Offline, Utc::now())
            .await?
        else {
            return Err(CoreError::Conflict(format!(
                "Worker {} changed state during shutdown; retry",
                worker.name
            )));
        };

        let audit = NewAuditEntry::new(actor, ACTION_WORKER_SHUTDOWN, RESOURCE_WORKER, id)
            .with_details(json!({ "worker": stopped.name, "previous_status": worker.status }));
        if let Err(e) = self.store.append_audit(&audit, Utc::now()).await {
            tracing::error!(worker_id = id, error = %e, "Failed to write shutdown audit entry");
        }
        tracing::info!(worker_id = id, worker = %stopped.name, actor, "Worker shut down");
        Ok(stopped)
    }

    pub async fn sweep_offline(&self) -> Result<Vec<Worker>, CoreError> {
        self.sweep_offline_at(Utc::now()).await
    }

    /// Mark workers silent for longer than the offline threshold at `now`.
    pub async fn sweep_offline_at(&self, now: Timestamp) -> Result<Vec<Worker>, CoreError> {
        let marked = self
            .store
            .mark_silent_workers_offline(now - self.offline_after, now)
            .await?;
        for worker in &marked {
            tracing::warn!(
                worker_id = worker.id,
                worker = %worker.name,
                last_seen_at = %worker.last_seen_at,
                "Worker missed check-ins, marked offline",
            );
        }
        Ok(marked)
    }
}
