//! Admission control: validate a trigger, enforce one active job per
//! category, launch the job process.

use std::sync::Arc;

use chrono::Utc;
use inkdex_core::audit::{NewAuditEntry, ACTION_JOB_TRIGGER, RESOURCE_JOB};
use inkdex_core::capability::{JobLauncher, TriggerAuthorizer};
use inkdex_core::error::CoreError;
use inkdex_core::job::PipelineJob;
use inkdex_core::trigger::TriggerRequest;
use serde_json::json;

use crate::SharedStore;

/// Reason recorded when a job is withdrawn because its process never started.
pub const LAUNCH_FAILED_REASON: &str = "launch failed";

/// Actor recorded for cancellations made by the admission controller.
pub const ADMISSION_ACTOR: &str = "admission";

pub struct AdmissionController {
    store: SharedStore,
    authorizer: Arc<dyn TriggerAuthorizer>,
    launcher: Arc<dyn JobLauncher>,
}

impl AdmissionController {
    pub fn new(
        store: SharedStore,
        authorizer: Arc<dyn TriggerAuthorizer>,
        launcher: Arc<dyn JobLauncher>,
    ) -> Self {
        Self {
            store,
            authorizer,
            launcher,
        }
    }

    /// Admit a trigger request from `caller`.
    ///
    /// Errors: `Forbidden` for callers the authorizer rejects, `Validation`
    /// for malformed input, `Conflict` when the category already has an
    /// active job. None of these write anything.
    ///
    /// If the launcher cannot start the process, the new job is cancelled
    /// so it does not hold the category, and `Internal` is returned.
    pub async fn trigger(
        &self,
        request: TriggerRequest,
        caller: &str,
    ) -> Result<PipelineJob, CoreError> {
        self.authorizer.authorize(caller)?;
        let new_job = request.into_new_job(caller)?;

        let job = self.store.create_pending_job(&new_job, Utc::now()).await?;
        tracing::info!(
            job_id = job.id,
            category = %job.category,
            scope = %job.scope,
            triggered_by = caller,
            "Job admitted",
        );

        let audit = NewAuditEntry::new(caller, ACTION_JOB_TRIGGER, RESOURCE_JOB, job.id)
            .with_details(json!({
                "category": job.category,
                "scope": job.scope,
                "target_city": job.target_city,
                "target_count": job.target_ids.as_ref().map(Vec::len),
                "limit": job.limit,
            }));
        if let Err(e) = self.store.append_audit(&audit, Utc::now()).await {
            tracing::error!(job_id = job.id, error = %e, "Failed to write trigger audit entry");
        }

        if let Err(launch_err) = self.launcher.launch(&job).await {
            tracing::error!(job_id = job.id, error = %launch_err, "Failed to launch job process");
            let reason = format!("{LAUNCH_FAILED_REASON}: {launch_err}");
            if let Err(e) = self
                .store
                .mark_cancelled(job.id, &reason, ADMISSION_ACTOR, Utc::now())
                .await
            {
                tracing::error!(job_id = job.id, error = %e, "Failed to withdraw unlaunched job");
            }
            return Err(CoreError::Internal(format!(
                "Job {} could not be launched: {launch_err}",
                job.id
            )));
        }

        Ok(job)
    }
}
