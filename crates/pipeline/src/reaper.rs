//! Periodic sweep that cancels jobs whose progress has gone silent.

use chrono::Utc;
use inkdex_core::error::CoreError;
use inkdex_core::job::{CancelOutcome, REAPER_ACTOR, STUCK_JOB_REASON};
use inkdex_core::reaper::is_reapable;
use inkdex_core::types::{DbId, Timestamp};

use crate::lifecycle::JobLifecycle;
use crate::SharedStore;

pub struct StuckJobReaper {
    store: SharedStore,
    lifecycle: JobLifecycle,
    threshold: chrono::TimeDelta,
}

impl StuckJobReaper {
    pub fn new(store: SharedStore, lifecycle: JobLifecycle, threshold: chrono::TimeDelta) -> Self {
        Self {
            store,
            lifecycle,
            threshold,
        }
    }

    pub async fn sweep(&self) -> Result<Vec<DbId>, CoreError> {
        self.sweep_at(Utc::now()).await
    }

    /// Cancel every reapable job as of `now` and return the ids actually
    /// cancelled. Failures on individual jobs are logged and skipped; a job
    /// that finished between selection and cancel is left as it is.
    pub async fn sweep_at(&self, now: Timestamp) -> Result<Vec<DbId>, CoreError> {
        let candidates = self.store.find_stale_jobs(now - self.threshold).await?;
        let mut cancelled = Vec::new();

        for job in candidates {
            if !is_reapable(&job, now, self.threshold) {
                continue;
            }
            match self.lifecycle.cancel(job.id, STUCK_JOB_REASON, REAPER_ACTOR).await {
                Ok(CancelOutcome::Cancelled(job)) => {
                    tracing::warn!(
                        job_id = job.id,
                        category = %job.category,
                        last_heartbeat_at = ?job.last_heartbeat_at,
                        "Reaped stuck job",
                    );
                    cancelled.push(job.id);
                }
                Ok(CancelOutcome::AlreadyTerminal(_)) => {}
                Err(e) => {
                    tracing::error!(job_id = job.id, error = %e, "Reaper failed to cancel job");
                }
            }
        }

        if cancelled.is_empty() {
            tracing::debug!("Reaper sweep: nothing stuck");
        } else {
            tracing::info!(count = cancelled.len(), "Reaper sweep complete");
        }
        Ok(cancelled)
    }
}
