//! Persistence contracts.
//!
//! Two implementations exist: `PgStore` in the `db` crate and the
//! in-process `MemoryStore` in the `pipeline` crate. Both must uphold the
//! same guarantees:
//!
//! - `create_pending_job` is atomic with respect to the one-active-job-per-
//!   category rule and returns [`CoreError::Conflict`] when it would be
//!   violated.
//! - Every job status write is conditional on the job still being in a
//!   status the state machine allows; otherwise it returns
//!   [`CoreError::InvalidTransition`] (or [`CoreError::NotFound`]).
//! - `commit_rotation` swaps the identity and appends the log entry in a
//!   single atomic step, and only while the worker is `rotating`.

use async_trait::async_trait;

use crate::audit::{AuditEntry, NewAuditEntry};
use crate::error::CoreError;
use crate::job::{
    CancelOutcome, JobCompletion, JobFilter, JobProgress, NewJob, PipelineJob,
};
use crate::rotation::{
    NewOrchestratorLogEntry, NewRateLimitEvent, OrchestratorLogEntry, RateLimitEvent,
    RateLimitFeedItem,
};
use crate::status::QueueStats;
use crate::types::{DbId, ProcessHandle, Timestamp};
use crate::worker_pool::{Worker, WorkerIdentity, WorkerStatus};

#[async_trait]
pub trait JobStore: Send + Sync {
    async fn create_pending_job(&self, job: &NewJob, now: Timestamp)
        -> Result<PipelineJob, CoreError>;

    async fn find_job(&self, id: DbId) -> Result<Option<PipelineJob>, CoreError>;

    /// Newest first, filtered and paginated per [`JobFilter::page`].
    async fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<PipelineJob>, CoreError>;

    /// `pending -> running`. Stamps `started_at` and the first heartbeat.
    async fn mark_running(
        &self,
        id: DbId,
        process_handle: Option<ProcessHandle>,
        now: Timestamp,
    ) -> Result<PipelineJob, CoreError>;

    /// Running jobs only. Counters are merged with
    /// [`merge_progress`](crate::job::merge_progress) semantics.
    async fn record_heartbeat(
        &self,
        id: DbId,
        progress: &JobProgress,
        now: Timestamp,
    ) -> Result<PipelineJob, CoreError>;

    async fn mark_completed(
        &self,
        id: DbId,
        completion: &JobCompletion,
        now: Timestamp,
    ) -> Result<PipelineJob, CoreError>;

    async fn mark_failed(
        &self,
        id: DbId,
        error_message: &str,
        now: Timestamp,
    ) -> Result<PipelineJob, CoreError>;

    /// `{pending, running} -> cancelled`, clearing the process handle.
    /// Already-terminal jobs are returned untouched.
    async fn mark_cancelled(
        &self,
        id: DbId,
        reason: &str,
        cancelled_by: &str,
        now: Timestamp,
    ) -> Result<CancelOutcome, CoreError>;

    /// Active, non-exempt jobs whose activity anchor is before `cutoff`.
    async fn find_stale_jobs(&self, cutoff: Timestamp) -> Result<Vec<PipelineJob>, CoreError>;
}

#[async_trait]
pub trait WorkerRegistry: Send + Sync {
    /// Upsert by name. A returning worker is reset to `active` with the
    /// identity it reports, unless it is mid-rotation, in which case it
    /// keeps both its status and its identity.
    async fn register_worker(
        &self,
        name: &str,
        identity: &WorkerIdentity,
        now: Timestamp,
    ) -> Result<Worker, CoreError>;

    async fn find_worker(&self, id: DbId) -> Result<Option<Worker>, CoreError>;

    /// Ordered by name.
    async fn list_workers(&self) -> Result<Vec<Worker>, CoreError>;

    async fn worker_names(&self) -> Result<Vec<String>, CoreError>;

    /// Stamp `last_seen_at`; an `offline` worker returns to `active`.
    async fn check_in_worker(&self, id: DbId, now: Timestamp) -> Result<Worker, CoreError>;

    /// Compare-and-set on status. `Ok(None)` when the worker was not in `from`.
    async fn transition_worker(
        &self,
        id: DbId,
        from: WorkerStatus,
        to: WorkerStatus,
        now: Timestamp,
    ) -> Result<Option<Worker>, CoreError>;

    /// Move every `active` worker last seen before `cutoff` to `offline`.
    /// A `rotating` worker keeps its state so its pending rotation survives.
    async fn mark_silent_workers_offline(
        &self,
        cutoff: Timestamp,
        now: Timestamp,
    ) -> Result<Vec<Worker>, CoreError>;

    /// `rotating -> active` with the new identity plus the log entry, in one
    /// atomic step. `Ok(None)` when the worker was no longer rotating.
    async fn commit_rotation(
        &self,
        id: DbId,
        identity: &WorkerIdentity,
        entry: &NewOrchestratorLogEntry,
        now: Timestamp,
    ) -> Result<Option<(Worker, OrchestratorLogEntry)>, CoreError>;
}

#[async_trait]
pub trait RateLimitLog: Send + Sync {
    async fn append_rate_limit_event(
        &self,
        event: &NewRateLimitEvent,
        now: Timestamp,
    ) -> Result<RateLimitEvent, CoreError>;

    /// Events for `worker_id` on `ip_address` at or after `since`.
    async fn count_rate_limit_events(
        &self,
        worker_id: DbId,
        ip_address: &str,
        since: Timestamp,
    ) -> Result<i64, CoreError>;

    /// Newest first, joined with worker names.
    async fn recent_rate_limit_events(
        &self,
        limit: i64,
    ) -> Result<Vec<RateLimitFeedItem>, CoreError>;
}

#[async_trait]
pub trait OrchestratorLog: Send + Sync {
    /// Newest first.
    async fn recent_log_entries(&self, limit: i64) -> Result<Vec<OrchestratorLogEntry>, CoreError>;
}

#[async_trait]
pub trait AuditLog: Send + Sync {
    async fn append_audit(&self, entry: &NewAuditEntry, now: Timestamp)
        -> Result<AuditEntry, CoreError>;

    /// Newest first.
    async fn recent_audit(&self, limit: i64) -> Result<Vec<AuditEntry>, CoreError>;
}

#[async_trait]
pub trait QueueStatsSource: Send + Sync {
    async fn queue_stats(&self) -> Result<QueueStats, CoreError>;
}

/// Everything the orchestrator needs from persistence.
#[async_trait]
pub trait OrchestratorStore:
    JobStore + WorkerRegistry + RateLimitLog + OrchestratorLog + AuditLog + QueueStatsSource
{
    /// Cheap liveness probe of the backing store.
    async fn health_check(&self) -> Result<(), CoreError>;
}
