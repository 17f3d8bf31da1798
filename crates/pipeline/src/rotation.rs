//! Rate-limit driven identity rotation.
//!
//! Events are appended first and evaluated afterwards. Evaluation for one
//! worker is serialized behind a per-worker lock so decisions see events in
//! the order they were stored. A worker that is already `rotating` ignores
//! further events until its rotation commits.
//!
//! Rotation is two writes: `active -> rotating` (CAS), then, once the
//! identity provider answers, `rotating -> active` with the new identity and
//! the log entry in one atomic commit. A provider failure leaves the worker
//! `rotating`; [`RotationEngine::retry_pending`] picks it up later.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use inkdex_core::audit::{NewAuditEntry, ACTION_WORKER_ROTATE as AUDIT_WORKER_ROTATE, RESOURCE_WORKER};
use inkdex_core::capability::IdentityProvider;
use inkdex_core::error::CoreError;
use inkdex_core::rotation::{
    IgnoreReason, NewOrchestratorLogEntry, NewRateLimitEvent, OrchestratorLogEntry,
    RateLimitEvent, RateLimitVerdict, RotationPolicy, ACTION_WORKER_ROTATE,
    REASON_OPERATOR_REQUEST, REASON_RATE_LIMIT_THRESHOLD, REASON_ROTATION_RETRY,
};
use inkdex_core::types::DbId;
use inkdex_core::worker_pool::{validate_identity, Worker, WorkerStatus};
use serde_json::json;
use tokio::sync::Mutex;

use crate::SharedStore;

/// What evaluating an event or a rotation request led to.
#[derive(Debug, Clone)]
pub enum RotationOutcome {
    /// The event was logged but does not count toward a decision.
    Ignored(IgnoreReason),
    BelowThreshold { count: i64 },
    /// New identity committed and logged.
    Rotated {
        worker: Worker,
        entry: OrchestratorLogEntry,
    },
    /// The worker is `rotating` and waiting for a retry.
    Pending { error: String },
    /// The worker vanished or changed state underneath us; nothing written.
    Skipped,
}

pub struct RotationEngine {
    store: SharedStore,
    identity: Arc<dyn IdentityProvider>,
    policy: RotationPolicy,
    worker_locks: Mutex<HashMap<DbId, Arc<Mutex<()>>>>,
}

impl RotationEngine {
    pub fn new(
        store: SharedStore,
        identity: Arc<dyn IdentityProvider>,
        policy: RotationPolicy,
    ) -> Self {
        Self {
            store,
            identity,
            policy,
            worker_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn policy(&self) -> RotationPolicy {
        self.policy
    }

    async fn worker_lock(&self, worker_id: DbId) -> Arc<Mutex<()>> {
        self.worker_locks
            .lock()
            .await
            .entry(worker_id)
            .or_default()
            .clone()
    }

    // ── Events ───────────────────────────────────────────────────────────

    /// Append a rate-limit event for a known worker.
    pub async fn record_event(&self, event: NewRateLimitEvent) -> Result<RateLimitEvent, CoreError> {
        let event = event.sanitized();
        if self.store.find_worker(event.worker_id).await?.is_none() {
            return Err(CoreError::NotFound {
                entity: "Worker",
                id: event.worker_id,
            });
        }
        let stored = self.store.append_rate_limit_event(&event, Utc::now()).await?;
        tracing::debug!(
            worker_id = stored.worker_id,
            ip = %stored.ip_address,
            error_code = %stored.error_code,
            "Rate-limit event recorded",
        );
        Ok(stored)
    }

    /// Decide whether `event` pushes its worker over the rotation threshold,
    /// and rotate if so.
    pub async fn evaluate(&self, event: &RateLimitEvent) -> Result<RotationOutcome, CoreError> {
        let lock = self.worker_lock(event.worker_id).await;
        let _guard = lock.lock().await;

        let Some(worker) = self.store.find_worker(event.worker_id).await? else {
            return Ok(RotationOutcome::Skipped);
        };
        if let Some(reason) = self.policy.screen(&worker, &event.ip_address) {
            return Ok(RotationOutcome::Ignored(reason));
        }

        let now = Utc::now();
        let count = self
            .store
            .count_rate_limit_events(worker.id, &worker.ip_address, self.policy.window_start(now))
            .await?;

        match self.policy.decide(&worker, &event.ip_address, count) {
            RateLimitVerdict::Ignore(reason) => Ok(RotationOutcome::Ignored(reason)),
            RateLimitVerdict::BelowThreshold { count } => {
                Ok(RotationOutcome::BelowThreshold { count })
            }
            RateLimitVerdict::Rotate { count } => {
                let Some(rotating) = self
                    .store
                    .transition_worker(worker.id, WorkerStatus::Active, WorkerStatus::Rotating, now)
                    .await?
                else {
                    return Ok(RotationOutcome::Skipped);
                };
                tracing::warn!(
                    worker_id = worker.id,
                    worker = %worker.name,
                    ip = %worker.ip_address,
                    count,
                    "Rate-limit threshold reached, rotating worker",
                );
                let details = json!({
                    "event_count": count,
                    "window_secs": self.policy.window.num_seconds(),
                    "error_code": event.error_code,
                });
                Ok(self
                    .attempt_rotation(rotating, REASON_RATE_LIMIT_THRESHOLD, details)
                    .await)
            }
        }
    }

    /// Record then evaluate in one call.
    pub async fn handle_event(
        &self,
        event: NewRateLimitEvent,
    ) -> Result<(RateLimitEvent, RotationOutcome), CoreError> {
        let stored = self.record_event(event).await?;
        let outcome = self.evaluate(&stored).await?;
        Ok((stored, outcome))
    }

    // ── Operator and retry paths ─────────────────────────────────────────

    /// Rotate a worker on operator request.
    ///
    /// An active worker is moved to `rotating` first; a worker already
    /// rotating gets an immediate retry. Offline workers are rejected.
    pub async fn request_rotation(
        &self,
        worker_id: DbId,
        actor: &str,
        note: Option<&str>,
    ) -> Result<RotationOutcome, CoreError> {
        let lock = self.worker_lock(worker_id).await;
        let _guard = lock.lock().await;

        let worker = self.store.find_worker(worker_id).await?.ok_or(CoreError::NotFound {
            entity: "Worker",
            id: worker_id,
        })?;

        let rotating = match worker.status {
            WorkerStatus::Offline => {
                return Err(CoreError::Conflict(format!(
                    "Worker {} is offline and cannot be rotated",
                    worker.name
                )))
            }
            WorkerStatus::Rotating => worker,
            WorkerStatus::Active => {
                match self
                    .store
                    .transition_worker(worker_id, WorkerStatus::Active, WorkerStatus::Rotating, Utc::now())
                    .await?
                {
                    Some(w) => w,
                    None => return Ok(RotationOutcome::Skipped),
                }
            }
        };

        let audit = NewAuditEntry::new(actor, AUDIT_WORKER_ROTATE, RESOURCE_WORKER, worker_id)
            .with_details(json!({
                "worker": rotating.name,
                "ip": rotating.ip_address,
                "note": note,
            }));
        if let Err(e) = self.store.append_audit(&audit, Utc::now()).await {
            tracing::error!(worker_id, error = %e, "Failed to write rotation audit entry");
        }

        Ok(self
            .attempt_rotation(
                rotating,
                REASON_OPERATOR_REQUEST,
                json!({ "requested_by": actor, "note": note }),
            )
            .await)
    }

    /// Retry every worker stuck in `rotating`. Returns how many committed.
    pub async fn retry_pending(&self) -> Result<usize, CoreError> {
        let rotating: Vec<Worker> = self
            .store
            .list_workers()
            .await?
            .into_iter()
            .filter(|w| w.status == WorkerStatus::Rotating)
            .collect();

        let mut rotated = 0;
        for candidate in rotating {
            let lock = self.worker_lock(candidate.id).await;
            let _guard = lock.lock().await;

            // Re-read under the lock; another path may have finished it.
            let Some(worker) = self
                .store
                .find_worker(candidate.id)
                .await?
                .filter(|w| w.status == WorkerStatus::Rotating)
            else {
                continue;
            };
            let outcome = self
                .attempt_rotation(worker, REASON_ROTATION_RETRY, json!({}))
                .await;
            if matches!(outcome, RotationOutcome::Rotated { .. }) {
                rotated += 1;
            }
        }
        Ok(rotated)
    }

    /// Ask for a fresh identity and commit it. Never returns an error: any
    /// failure leaves the worker `rotating` for the retry loop.
    async fn attempt_rotation(
        &self,
        worker: Worker,
        reason: &str,
        details: serde_json::Value,
    ) -> RotationOutcome {
        let fresh = match self.identity.fresh_identity(&worker).await {
            Ok(identity) => validate_identity(&identity).map_err(|e| {
                CoreError::IdentityRotation(format!("provider returned an invalid identity: {e}"))
            }),
            Err(e) => Err(e),
        };
        let identity = match fresh {
            Ok(identity) => identity,
            Err(e) => {
                tracing::warn!(
                    worker_id = worker.id,
                    worker = %worker.name,
                    error = %e,
                    "Identity rotation failed, worker stays rotating",
                );
                return RotationOutcome::Pending {
                    error: e.to_string(),
                };
            }
        };

        let entry = NewOrchestratorLogEntry {
            action: ACTION_WORKER_ROTATE.to_string(),
            worker_id: Some(worker.id),
            worker_name: Some(worker.name.clone()),
            old_instance_id: Some(worker.instance_id.clone()),
            new_instance_id: Some(identity.instance_id.clone()),
            old_ip: Some(worker.ip_address.clone()),
            new_ip: Some(identity.ip_address.clone()),
            reason: Some(reason.to_string()),
            details: Some(details),
        };

        match self
            .store
            .commit_rotation(worker.id, &identity, &entry, Utc::now())
            .await
        {
            Ok(Some((worker, entry))) => {
                tracing::info!(
                    worker_id = worker.id,
                    worker = %worker.name,
                    old_ip = ?entry.old_ip,
                    new_ip = %worker.ip_address,
                    reason,
                    "Worker rotated",
                );
                RotationOutcome::Rotated { worker, entry }
            }
            Ok(None) => RotationOutcome::Skipped,
            Err(e) => {
                tracing::error!(worker_id = worker.id, error = %e, "Failed to commit rotation");
                RotationOutcome::Pending {
                    error: e.to_string(),
                }
            }
        }
    }
}
