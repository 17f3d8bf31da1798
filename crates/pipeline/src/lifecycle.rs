//! Job lifecycle operations driven by the executing process and operators.
//!
//! The store enforces the state machine with conditional writes; this layer
//! adds validation, best-effort process termination on cancel, and logging.

use std::sync::Arc;

use chrono::Utc;
use inkdex_core::audit::{NewAuditEntry, ACTION_JOB_CANCEL, RESOURCE_JOB};
use inkdex_core::capability::ProcessTerminator;
use inkdex_core::error::CoreError;
use inkdex_core::job::{
    validate_progress, CancelOutcome, JobCompletion, JobProgress, JobStatus, PipelineJob,
};
use inkdex_core::types::{DbId, ProcessHandle};

use crate::SharedStore;

/// Maximum stored length of a failure message.
const MAX_ERROR_MESSAGE_LEN: usize = 4_000;

/// Reason recorded when an operator cancels without giving one.
pub const OPERATOR_CANCEL_REASON: &str = "cancelled by operator";

#[derive(Clone)]
pub struct JobLifecycle {
    store: SharedStore,
    terminator: Arc<dyn ProcessTerminator>,
}

impl JobLifecycle {
    pub fn new(store: SharedStore, terminator: Arc<dyn ProcessTerminator>) -> Self {
        Self { store, terminator }
    }

    pub async fn get(&self, id: DbId) -> Result<PipelineJob, CoreError> {
        self.store.find_job(id).await?.ok_or(CoreError::NotFound {
            entity: "PipelineJob",
            id,
        })
    }

    /// `pending -> running`. Records the process handle, if known, so the
    /// job can be force-terminated later.
    pub async fn start(
        &self,
        id: DbId,
        process_handle: Option<ProcessHandle>,
    ) -> Result<PipelineJob, CoreError> {
        let job = self.store.mark_running(id, process_handle, Utc::now()).await?;
        tracing::info!(job_id = id, category = %job.category, ?process_handle, "Job started");
        Ok(job)
    }

    /// Merge progress counters into a running job.
    pub async fn heartbeat(
        &self,
        id: DbId,
        progress: &JobProgress,
    ) -> Result<PipelineJob, CoreError> {
        validate_progress(progress)?;
        let job = self.store.record_heartbeat(id, progress, Utc::now()).await?;
        tracing::debug!(
            job_id = id,
            processed = job.processed_items,
            failed = job.failed_items,
            total = ?job.total_items,
            "Job heartbeat",
        );
        Ok(job)
    }

    pub async fn complete(
        &self,
        id: DbId,
        completion: &JobCompletion,
    ) -> Result<PipelineJob, CoreError> {
        if completion.total_items.is_some_and(|t| t < 0) {
            return Err(CoreError::Validation(
                "total_items must not be negative".to_string(),
            ));
        }
        let job = self.store.mark_completed(id, completion, Utc::now()).await?;
        tracing::info!(
            job_id = id,
            category = %job.category,
            processed = job.processed_items,
            failed = job.failed_items,
            "Job completed",
        );
        Ok(job)
    }

    pub async fn fail(&self, id: DbId, error_message: &str) -> Result<PipelineJob, CoreError> {
        let message: String = error_message.chars().take(MAX_ERROR_MESSAGE_LEN).collect();
        let job = self.store.mark_failed(id, &message, Utc::now()).await?;
        tracing::warn!(job_id = id, category = %job.category, error = %message, "Job failed");
        Ok(job)
    }

    /// Cancel a pending or running job.
    ///
    /// A running job with a known process handle is signalled first. A
    /// failed signal is logged and the cancel proceeds: the status write is
    /// authoritative and the process is expected to notice it on its next
    /// heartbeat. An already-terminal job is returned untouched.
    pub async fn cancel(
        &self,
        id: DbId,
        reason: &str,
        cancelled_by: &str,
    ) -> Result<CancelOutcome, CoreError> {
        let job = self.get(id).await?;
        if job.status.is_terminal() {
            tracing::debug!(job_id = id, status = %job.status, "Cancel on terminal job ignored");
            return Ok(CancelOutcome::AlreadyTerminal(job));
        }

        if let (JobStatus::Running, Some(handle)) = (job.status, job.process_handle) {
            if !self.terminator.terminate(handle) {
                let err = CoreError::TerminationSignal(format!("process {handle} not signalled"));
                tracing::warn!(job_id = id, handle, error = %err, "Proceeding with cancel");
            }
        }

        let outcome = self
            .store
            .mark_cancelled(id, reason, cancelled_by, Utc::now())
            .await?;
        match &outcome {
            CancelOutcome::Cancelled(_) => {
                tracing::info!(job_id = id, reason, cancelled_by, "Job cancelled");
            }
            CancelOutcome::AlreadyTerminal(job) => {
                tracing::info!(
                    job_id = id,
                    status = %job.status,
                    "Job reached a terminal state before cancel applied",
                );
            }
        }
        Ok(outcome)
    }

    /// Operator-initiated cancel. Audited when it takes effect.
    pub async fn cancel_by_operator(
        &self,
        id: DbId,
        reason: Option<&str>,
        actor: &str,
    ) -> Result<CancelOutcome, CoreError> {
        let reason = reason
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .unwrap_or(OPERATOR_CANCEL_REASON);
        let outcome = self.cancel(id, reason, actor).await?;

        if let CancelOutcome::Cancelled(job) = &outcome {
            let audit = NewAuditEntry::new(actor, ACTION_JOB_CANCEL, RESOURCE_JOB, id)
                .with_details(serde_json::json!({
                    "category": job.category,
                    "reason": reason,
                }));
            if let Err(e) = self.store.append_audit(&audit, Utc::now()).await {
                tracing::error!(job_id = id, error = %e, "Failed to write cancel audit entry");
            }
        }
        Ok(outcome)
    }
}
