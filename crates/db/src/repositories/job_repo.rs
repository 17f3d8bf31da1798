//! Repository for the `pipeline_jobs` table.
//!
//! Every status write carries its allowed source statuses in the `WHERE`
//! clause and returns `None` when the row did not match, so concurrent
//! writers can never move a job out of a terminal state.

use inkdex_core::job::{
    state_machine, JobCategory, JobCompletion, JobFilter, JobProgress, JobStatus, NewJob,
};
use inkdex_core::types::{DbId, ProcessHandle, Timestamp};
use sqlx::PgPool;

use crate::models::job::PipelineJobRow;

/// Column list for `pipeline_jobs` queries.
const COLUMNS: &str = "\
    id, category, status, scope, target_city, target_ids, item_limit, \
    total_items, processed_items, failed_items, triggered_by, process_handle, \
    started_at, completed_at, last_heartbeat_at, error_message, result_summary, \
    cancel_reason, cancelled_by, created_at, updated_at";

/// Name of the partial unique index enforcing one active job per category.
pub const ACTIVE_CATEGORY_INDEX: &str = "uq_pipeline_jobs_active_category";

fn status_texts(statuses: &[JobStatus]) -> Vec<String> {
    statuses.iter().map(|s| s.as_str().to_string()).collect()
}

/// Provides lifecycle operations for pipeline jobs.
pub struct JobRepo;

impl JobRepo {
    /// Insert a pending job. A concurrent active job of the same category
    /// surfaces as a unique violation on [`ACTIVE_CATEGORY_INDEX`].
    pub async fn insert_pending(
        pool: &PgPool,
        input: &NewJob,
        now: Timestamp,
    ) -> Result<PipelineJobRow, sqlx::Error> {
        let query = format!(
            "INSERT INTO pipeline_jobs \
                 (category, status, scope, target_city, target_ids, item_limit, \
                  triggered_by, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $8) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, PipelineJobRow>(&query)
            .bind(input.category.as_str())
            .bind(JobStatus::Pending.as_str())
            .bind(input.scope.as_str())
            .bind(&input.target_city)
            .bind(&input.target_ids)
            .bind(input.limit)
            .bind(&input.triggered_by)
            .bind(now)
            .fetch_one(pool)
            .await
    }

    pub async fn find_by_id(
        pool: &PgPool,
        id: DbId,
    ) -> Result<Option<PipelineJobRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM pipeline_jobs WHERE id = $1");
        sqlx::query_as::<_, PipelineJobRow>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// `pending -> running`; the start counts as the first heartbeat.
    pub async fn mark_running(
        pool: &PgPool,
        id: DbId,
        process_handle: Option<ProcessHandle>,
        now: Timestamp,
    ) -> Result<Option<PipelineJobRow>, sqlx::Error> {
        let query = format!(
            "UPDATE pipeline_jobs \
             SET status = $2, process_handle = COALESCE($3, process_handle), \
                 started_at = $4, last_heartbeat_at = $4 \
             WHERE id = $1 AND status = ANY($5) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, PipelineJobRow>(&query)
            .bind(id)
            .bind(JobStatus::Running.as_str())
            .bind(process_handle)
            .bind(now)
            .bind(status_texts(&state_machine::sources_for(JobStatus::Running)))
            .fetch_optional(pool)
            .await
    }

    /// Merge progress counters on a running job.
    ///
    /// Counters only grow. A known total is widened to cover
    /// `processed + failed`; the explicit `CASE` keeps an unknown total NULL
    /// because `GREATEST` ignores NULL arguments.
    pub async fn record_heartbeat(
        pool: &PgPool,
        id: DbId,
        progress: &JobProgress,
        now: Timestamp,
    ) -> Result<Option<PipelineJobRow>, sqlx::Error> {
        let query = format!(
            "UPDATE pipeline_jobs \
             SET processed_items = GREATEST(processed_items, $2), \
                 failed_items = GREATEST(failed_items, $3), \
                 total_items = CASE \
                     WHEN COALESCE($4, total_items) IS NULL THEN NULL \
                     ELSE GREATEST(COALESCE($4, total_items), \
                                   GREATEST(processed_items, $2) + GREATEST(failed_items, $3)) \
                 END, \
                 last_heartbeat_at = $5 \
             WHERE id = $1 AND status = $6 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, PipelineJobRow>(&query)
            .bind(id)
            .bind(progress.processed_items)
            .bind(progress.failed_items)
            .bind(progress.total_items)
            .bind(now)
            .bind(JobStatus::Running.as_str())
            .fetch_optional(pool)
            .await
    }

    /// `running -> completed`. The total is normalized the same way as in
    /// [`record_heartbeat`](Self::record_heartbeat), defaulting to the
    /// processed and failed counts when never reported.
    pub async fn mark_completed(
        pool: &PgPool,
        id: DbId,
        completion: &JobCompletion,
        now: Timestamp,
    ) -> Result<Option<PipelineJobRow>, sqlx::Error> {
        let query = format!(
            "UPDATE pipeline_jobs \
             SET status = $2, \
                 total_items = GREATEST(COALESCE($3, total_items, 0), processed_items + failed_items), \
                 result_summary = $4, completed_at = $5, process_handle = NULL \
             WHERE id = $1 AND status = ANY($6) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, PipelineJobRow>(&query)
            .bind(id)
            .bind(JobStatus::Completed.as_str())
            .bind(completion.total_items)
            .bind(&completion.result_summary)
            .bind(now)
            .bind(status_texts(&state_machine::sources_for(JobStatus::Completed)))
            .fetch_optional(pool)
            .await
    }

    /// `running -> failed`.
    pub async fn mark_failed(
        pool: &PgPool,
        id: DbId,
        error_message: &str,
        now: Timestamp,
    ) -> Result<Option<PipelineJobRow>, sqlx::Error> {
        let query = format!(
            "UPDATE pipeline_jobs \
             SET status = $2, error_message = $3, completed_at = $4, process_handle = NULL \
             WHERE id = $1 AND status = ANY($5) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, PipelineJobRow>(&query)
            .bind(id)
            .bind(JobStatus::Failed.as_str())
            .bind(error_message)
            .bind(now)
            .bind(status_texts(&state_machine::sources_for(JobStatus::Failed)))
            .fetch_optional(pool)
            .await
    }

    /// `{pending, running} -> cancelled`. Returns `None` when the job was
    /// already terminal (or does not exist).
    pub async fn mark_cancelled(
        pool: &PgPool,
        id: DbId,
        reason: &str,
        cancelled_by: &str,
        now: Timestamp,
    ) -> Result<Option<PipelineJobRow>, sqlx::Error> {
        let query = format!(
            "UPDATE pipeline_jobs \
             SET status = $2, completed_at = $3, process_handle = NULL, \
                 cancel_reason = $4, cancelled_by = $5 \
             WHERE id = $1 AND status = ANY($6) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, PipelineJobRow>(&query)
            .bind(id)
            .bind(JobStatus::Cancelled.as_str())
            .bind(now)
            .bind(reason)
            .bind(cancelled_by)
            .bind(status_texts(&state_machine::sources_for(JobStatus::Cancelled)))
            .fetch_optional(pool)
            .await
    }

    /// Active jobs outside `exempt` whose last heartbeat (or creation, if
    /// none) is older than `cutoff`.
    pub async fn find_stale(
        pool: &PgPool,
        cutoff: Timestamp,
        exempt: &[JobCategory],
    ) -> Result<Vec<PipelineJobRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM pipeline_jobs \
             WHERE status = ANY($1) \
               AND category <> ALL($2) \
               AND COALESCE(last_heartbeat_at, created_at) < $3 \
             ORDER BY created_at ASC"
        );
        let exempt: Vec<String> = exempt.iter().map(|c| c.as_str().to_string()).collect();
        sqlx::query_as::<_, PipelineJobRow>(&query)
            .bind(status_texts(JobStatus::ACTIVE))
            .bind(exempt)
            .bind(cutoff)
            .fetch_all(pool)
            .await
    }

    /// List jobs newest first with optional category and status filters.
    pub async fn list(
        pool: &PgPool,
        filter: &JobFilter,
    ) -> Result<Vec<PipelineJobRow>, sqlx::Error> {
        let (limit, offset) = filter.page();

        // Build the WHERE clause and track the next bind parameter index.
        let mut conditions: Vec<String> = Vec::new();
        let mut bind_idx: u32 = 1;

        if filter.category.is_some() {
            conditions.push(format!("category = ${bind_idx}"));
            bind_idx += 1;
        }
        if filter.status.is_some() {
            conditions.push(format!("status = ${bind_idx}"));
            bind_idx += 1;
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        let query = format!(
            "SELECT {COLUMNS} FROM pipeline_jobs \
             {where_clause} \
             ORDER BY created_at DESC, id DESC \
             LIMIT ${bind_idx} OFFSET ${}",
            bind_idx + 1,
        );

        let mut q = sqlx::query_as::<_, PipelineJobRow>(&query);
        if let Some(category) = filter.category {
            q = q.bind(category.as_str());
        }
        if let Some(status) = filter.status {
            q = q.bind(status.as_str());
        }
        q = q.bind(limit).bind(offset);

        q.fetch_all(pool).await
    }
}
