//! [`PgStore`]: the PostgreSQL implementation of the orchestrator store.

use async_trait::async_trait;
use inkdex_core::audit::{AuditEntry, NewAuditEntry};
use inkdex_core::error::CoreError;
use inkdex_core::job::{
    CancelOutcome, JobCategory, JobCompletion, JobFilter, JobProgress, JobStatus, NewJob,
    PipelineJob,
};
use inkdex_core::rotation::{
    NewOrchestratorLogEntry, NewRateLimitEvent, OrchestratorLogEntry, RateLimitEvent,
    RateLimitFeedItem,
};
use inkdex_core::status::{QueueStatRow, QueueStats};
use inkdex_core::store::{
    AuditLog, JobStore, OrchestratorLog, OrchestratorStore, QueueStatsSource, RateLimitLog,
    WorkerRegistry,
};
use inkdex_core::types::{DbId, ProcessHandle, Timestamp};
use inkdex_core::worker_pool::{Worker, WorkerIdentity, WorkerStatus};

use crate::models::job::PipelineJobRow;
use crate::repositories::job_repo::ACTIVE_CATEGORY_INDEX;
use crate::repositories::{
    AuditRepo, JobRepo, OrchestratorLogRepo, QueueStatsRepo, RateLimitEventRepo, WorkerRepo,
};
use crate::DbPool;

#[derive(Clone)]
pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    /// Explain why a conditional job write matched no row.
    async fn rejected_transition(&self, id: DbId, to: JobStatus) -> CoreError {
        match JobRepo::find_by_id(&self.pool, id).await {
            Ok(Some(row)) => match PipelineJob::try_from(row) {
                Ok(job) => CoreError::InvalidTransition {
                    from: job.status,
                    to,
                },
                Err(e) => e,
            },
            Ok(None) => job_not_found(id),
            Err(e) => map_sqlx_error(e),
        }
    }

    async fn conditional_write(
        &self,
        id: DbId,
        to: JobStatus,
        result: Result<Option<PipelineJobRow>, sqlx::Error>,
    ) -> Result<PipelineJob, CoreError> {
        match result.map_err(map_sqlx_error)? {
            Some(row) => row.try_into(),
            None => Err(self.rejected_transition(id, to).await),
        }
    }
}

fn job_not_found(id: DbId) -> CoreError {
    CoreError::NotFound {
        entity: "PipelineJob",
        id,
    }
}

fn worker_not_found(id: DbId) -> CoreError {
    CoreError::NotFound {
        entity: "Worker",
        id,
    }
}

/// Map a sqlx error into the domain taxonomy.
///
/// - Unique violations (23505) on `uq_` constraints become `Conflict`.
/// - `RowNotFound` becomes `Internal`; repositories use `fetch_optional`
///   wherever absence is expected, so reaching it is a bug.
/// - Everything else is `Internal`.
pub fn map_sqlx_error(err: sqlx::Error) -> CoreError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.code().as_deref() == Some("23505") {
            let constraint = db_err.constraint().unwrap_or("unknown");
            if constraint.starts_with("uq_") {
                return CoreError::Conflict(format!(
                    "Duplicate value violates unique constraint: {constraint}"
                ));
            }
        }
    }
    tracing::error!(error = %err, "Database error");
    CoreError::Internal(format!("Database error: {err}"))
}

fn is_active_category_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db_err)
            if db_err.code().as_deref() == Some("23505")
                && db_err.constraint() == Some(ACTIVE_CATEGORY_INDEX)
    )
}

// ---------------------------------------------------------------------------
// Jobs
// ---------------------------------------------------------------------------

#[async_trait]
impl JobStore for PgStore {
    async fn create_pending_job(
        &self,
        job: &NewJob,
        now: Timestamp,
    ) -> Result<PipelineJob, CoreError> {
        match JobRepo::insert_pending(&self.pool, job, now).await {
            Ok(row) => row.try_into(),
            Err(e) if is_active_category_violation(&e) => Err(CoreError::Conflict(format!(
                "A {} job is already pending or running",
                job.category
            ))),
            Err(e) => Err(map_sqlx_error(e)),
        }
    }

    async fn find_job(&self, id: DbId) -> Result<Option<PipelineJob>, CoreError> {
        JobRepo::find_by_id(&self.pool, id)
            .await
            .map_err(map_sqlx_error)?
            .map(PipelineJob::try_from)
            .transpose()
    }

    async fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<PipelineJob>, CoreError> {
        JobRepo::list(&self.pool, filter)
            .await
            .map_err(map_sqlx_error)?
            .into_iter()
            .map(PipelineJob::try_from)
            .collect()
    }

    async fn mark_running(
        &self,
        id: DbId,
        process_handle: Option<ProcessHandle>,
        now: Timestamp,
    ) -> Result<PipelineJob, CoreError> {
        let result = JobRepo::mark_running(&self.pool, id, process_handle, now).await;
        self.conditional_write(id, JobStatus::Running, result).await
    }

    async fn record_heartbeat(
        &self,
        id: DbId,
        progress: &JobProgress,
        now: Timestamp,
    ) -> Result<PipelineJob, CoreError> {
        let result = JobRepo::record_heartbeat(&self.pool, id, progress, now).await;
        self.conditional_write(id, JobStatus::Running, result).await
    }

    async fn mark_completed(
        &self,
        id: DbId,
        completion: &JobCompletion,
        now: Timestamp,
    ) -> Result<PipelineJob, CoreError> {
        let result = JobRepo::mark_completed(&self.pool, id, completion, now).await;
        self.conditional_write(id, JobStatus::Completed, result).await
    }

    async fn mark_failed(
        &self,
        id: DbId,
        error_message: &str,
        now: Timestamp,
    ) -> Result<PipelineJob, CoreError> {
        let result = JobRepo::mark_failed(&self.pool, id, error_message, now).await;
        self.conditional_write(id, JobStatus::Failed, result).await
    }

    async fn mark_cancelled(
        &self,
        id: DbId,
        reason: &str,
        cancelled_by: &str,
        now: Timestamp,
    ) -> Result<CancelOutcome, CoreError> {
        let updated = JobRepo::mark_cancelled(&self.pool, id, reason, cancelled_by, now)
            .await
            .map_err(map_sqlx_error)?;
        if let Some(row) = updated {
            return Ok(CancelOutcome::Cancelled(row.try_into()?));
        }
        match self.find_job(id).await? {
            Some(job) => Ok(CancelOutcome::AlreadyTerminal(job)),
            None => Err(job_not_found(id)),
        }
    }

    async fn find_stale_jobs(&self, cutoff: Timestamp) -> Result<Vec<PipelineJob>, CoreError> {
        let exempt: Vec<JobCategory> = JobCategory::ALL
            .iter()
            .copied()
            .filter(|c| c.is_reaper_exempt())
            .collect();
        JobRepo::find_stale(&self.pool, cutoff, &exempt)
            .await
            .map_err(map_sqlx_error)?
            .into_iter()
            .map(PipelineJob::try_from)
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Workers
// ---------------------------------------------------------------------------

#[async_trait]
impl WorkerRegistry for PgStore {
    async fn register_worker(
        &self,
        name: &str,
        identity: &WorkerIdentity,
        now: Timestamp,
    ) -> Result<Worker, CoreError> {
        WorkerRepo::register(&self.pool, name, identity, now)
            .await
            .map_err(map_sqlx_error)?
            .try_into()
    }

    async fn find_worker(&self, id: DbId) -> Result<Option<Worker>, CoreError> {
        WorkerRepo::find_by_id(&self.pool, id)
            .await
            .map_err(map_sqlx_error)?
            .map(Worker::try_from)
            .transpose()
    }

    async fn list_workers(&self) -> Result<Vec<Worker>, CoreError> {
        WorkerRepo::list(&self.pool)
            .await
            .map_err(map_sqlx_error)?
            .into_iter()
            .map(Worker::try_from)
            .collect()
    }

    async fn worker_names(&self) -> Result<Vec<String>, CoreError> {
        WorkerRepo::names(&self.pool).await.map_err(map_sqlx_error)
    }

    async fn check_in_worker(&self, id: DbId, now: Timestamp) -> Result<Worker, CoreError> {
        WorkerRepo::check_in(&self.pool, id, now)
            .await
            .map_err(map_sqlx_error)?
            .ok_or_else(|| worker_not_found(id))?
            .try_into()
    }

    async fn transition_worker(
        &self,
        id: DbId,
        from: WorkerStatus,
        to: WorkerStatus,
        _now: Timestamp,
    ) -> Result<Option<Worker>, CoreError> {
        WorkerRepo::transition(&self.pool, id, from, to)
            .await
            .map_err(map_sqlx_error)?
            .map(Worker::try_from)
            .transpose()
    }

    async fn mark_silent_workers_offline(
        &self,
        cutoff: Timestamp,
        _now: Timestamp,
    ) -> Result<Vec<Worker>, CoreError> {
        WorkerRepo::mark_silent_offline(&self.pool, cutoff)
            .await
            .map_err(map_sqlx_error)?
            .into_iter()
            .map(Worker::try_from)
            .collect()
    }

    async fn commit_rotation(
        &self,
        id: DbId,
        identity: &WorkerIdentity,
        entry: &NewOrchestratorLogEntry,
        now: Timestamp,
    ) -> Result<Option<(Worker, OrchestratorLogEntry)>, CoreError> {
        let committed = WorkerRepo::commit_rotation(&self.pool, id, identity, entry, now)
            .await
            .map_err(map_sqlx_error)?;
        match committed {
            Some((worker, log)) => Ok(Some((worker.try_into()?, log.into()))),
            None => Ok(None),
        }
    }
}

// ---------------------------------------------------------------------------
// Logs and projections
// ---------------------------------------------------------------------------

#[async_trait]
impl RateLimitLog for PgStore {
    async fn append_rate_limit_event(
        &self,
        event: &NewRateLimitEvent,
        now: Timestamp,
    ) -> Result<RateLimitEvent, CoreError> {
        RateLimitEventRepo::insert(&self.pool, event, now)
            .await
            .map(RateLimitEvent::from)
            .map_err(map_sqlx_error)
    }

    async fn count_rate_limit_events(
        &self,
        worker_id: DbId,
        ip_address: &str,
        since: Timestamp,
    ) -> Result<i64, CoreError> {
        RateLimitEventRepo::count_since(&self.pool, worker_id, ip_address, since)
            .await
            .map_err(map_sqlx_error)
    }

    async fn recent_rate_limit_events(
        &self,
        limit: i64,
    ) -> Result<Vec<RateLimitFeedItem>, CoreError> {
        let rows = RateLimitEventRepo::recent_with_worker(&self.pool, limit)
            .await
            .map_err(map_sqlx_error)?;
        Ok(rows.into_iter().map(RateLimitFeedItem::from).collect())
    }
}

#[async_trait]
impl OrchestratorLog for PgStore {
    async fn recent_log_entries(&self, limit: i64) -> Result<Vec<OrchestratorLogEntry>, CoreError> {
        let rows = OrchestratorLogRepo::recent(&self.pool, limit)
            .await
            .map_err(map_sqlx_error)?;
        Ok(rows.into_iter().map(OrchestratorLogEntry::from).collect())
    }
}

#[async_trait]
impl AuditLog for PgStore {
    async fn append_audit(
        &self,
        entry: &NewAuditEntry,
        now: Timestamp,
    ) -> Result<AuditEntry, CoreError> {
        AuditRepo::insert(&self.pool, entry, now)
            .await
            .map(AuditEntry::from)
            .map_err(map_sqlx_error)
    }

    async fn recent_audit(&self, limit: i64) -> Result<Vec<AuditEntry>, CoreError> {
        let rows = AuditRepo::recent(&self.pool, limit)
            .await
            .map_err(map_sqlx_error)?;
        Ok(rows.into_iter().map(AuditEntry::from).collect())
    }
}

#[async_trait]
impl QueueStatsSource for PgStore {
    async fn queue_stats(&self) -> Result<QueueStats, CoreError> {
        let rows = QueueStatsRepo::stage_counts(&self.pool)
            .await
            .map_err(map_sqlx_error)?
            .into_iter()
            .map(QueueStatRow::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(QueueStats::from_rows(rows))
    }
}

#[async_trait]
impl OrchestratorStore for PgStore {
    async fn health_check(&self) -> Result<(), CoreError> {
        crate::health_check(&self.pool).await.map_err(map_sqlx_error)
    }
}
