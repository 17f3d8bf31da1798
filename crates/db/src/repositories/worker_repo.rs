//! Repository for the `workers` table.

use inkdex_core::rotation::NewOrchestratorLogEntry;
use inkdex_core::types::{DbId, Timestamp};
use inkdex_core::worker_pool::{WorkerIdentity, WorkerStatus};
use sqlx::PgPool;

use crate::models::orchestrator_log::OrchestratorLogRow;
use crate::models::worker::WorkerRow;
use crate::repositories::orchestrator_log_repo::OrchestratorLogRepo;

/// Column list for `workers` queries.
const COLUMNS: &str = "\
    id, name, status, instance_id, ip_address, last_seen_at, created_at, updated_at";

/// Provides registration and status operations for fleet workers.
pub struct WorkerRepo;

impl WorkerRepo {
    // ── Registration ─────────────────────────────────────────────────────

    /// Register a worker, or refresh it on name conflict (upsert).
    ///
    /// A returning worker becomes `active` with the reported identity,
    /// except while `rotating`: then status and identity are left for the
    /// rotation engine to settle.
    pub async fn register(
        pool: &PgPool,
        name: &str,
        identity: &WorkerIdentity,
        now: Timestamp,
    ) -> Result<WorkerRow, sqlx::Error> {
        let query = format!(
            "INSERT INTO workers (name, status, instance_id, ip_address, last_seen_at, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $5, $5) \
             ON CONFLICT (name) DO UPDATE SET \
                instance_id = CASE WHEN workers.status = $6 THEN workers.instance_id ELSE EXCLUDED.instance_id END, \
                ip_address = CASE WHEN workers.status = $6 THEN workers.ip_address ELSE EXCLUDED.ip_address END, \
                status = CASE WHEN workers.status = $6 THEN workers.status ELSE EXCLUDED.status END, \
                last_seen_at = EXCLUDED.last_seen_at \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, WorkerRow>(&query)
            .bind(name)
            .bind(WorkerStatus::Active.as_str())
            .bind(&identity.instance_id)
            .bind(&identity.ip_address)
            .bind(now)
            .bind(WorkerStatus::Rotating.as_str())
            .fetch_one(pool)
            .await
    }

    // ── Queries ──────────────────────────────────────────────────────────

    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<WorkerRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM workers WHERE id = $1");
        sqlx::query_as::<_, WorkerRow>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    pub async fn list(pool: &PgPool) -> Result<Vec<WorkerRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM workers ORDER BY name ASC");
        sqlx::query_as::<_, WorkerRow>(&query).fetch_all(pool).await
    }

    pub async fn names(pool: &PgPool) -> Result<Vec<String>, sqlx::Error> {
        sqlx::query_scalar::<_, String>("SELECT name FROM workers ORDER BY name ASC")
            .fetch_all(pool)
            .await
    }

    // ── Status ───────────────────────────────────────────────────────────

    /// Stamp `last_seen_at`; an offline worker comes back as active.
    pub async fn check_in(
        pool: &PgPool,
        id: DbId,
        now: Timestamp,
    ) -> Result<Option<WorkerRow>, sqlx::Error> {
        let query = format!(
            "UPDATE workers \
             SET last_seen_at = $2, \
                 status = CASE WHEN status = $3 THEN $4 ELSE status END \
             WHERE id = $1 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, WorkerRow>(&query)
            .bind(id)
            .bind(now)
            .bind(WorkerStatus::Offline.as_str())
            .bind(WorkerStatus::Active.as_str())
            .fetch_optional(pool)
            .await
    }

    /// Compare-and-set the status. `None` when the worker was not in `from`.
    pub async fn transition(
        pool: &PgPool,
        id: DbId,
        from: WorkerStatus,
        to: WorkerStatus,
    ) -> Result<Option<WorkerRow>, sqlx::Error> {
        let query = format!(
            "UPDATE workers SET status = $3 \
             WHERE id = $1 AND status = $2 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, WorkerRow>(&query)
            .bind(id)
            .bind(from.as_str())
            .bind(to.as_str())
            .fetch_optional(pool)
            .await
    }

    /// Mark every active worker silent since before `cutoff` offline.
    /// Rotating workers are left to the rotation retry loop.
    pub async fn mark_silent_offline(
        pool: &PgPool,
        cutoff: Timestamp,
    ) -> Result<Vec<WorkerRow>, sqlx::Error> {
        let query = format!(
            "UPDATE workers SET status = $1 \
             WHERE status = $2 AND last_seen_at < $3 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, WorkerRow>(&query)
            .bind(WorkerStatus::Offline.as_str())
            .bind(WorkerStatus::Active.as_str())
            .bind(cutoff)
            .fetch_all(pool)
            .await
    }

    // ── Rotation ─────────────────────────────────────────────────────────

    /// Swap in a new identity and append the rotation log entry in one
    /// transaction. Returns `None` (and writes nothing) when the worker is
    /// no longer `rotating`.
    pub async fn commit_rotation(
        pool: &PgPool,
        id: DbId,
        identity: &WorkerIdentity,
        entry: &NewOrchestratorLogEntry,
        now: Timestamp,
    ) -> Result<Option<(WorkerRow, OrchestratorLogRow)>, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let query = format!(
            "UPDATE workers \
             SET status = $2, instance_id = $3, ip_address = $4, last_seen_at = $5 \
             WHERE id = $1 AND status = $6 \
             RETURNING {COLUMNS}"
        );
        let worker = sqlx::query_as::<_, WorkerRow>(&query)
            .bind(id)
            .bind(WorkerStatus::Active.as_str())
            .bind(&identity.instance_id)
            .bind(&identity.ip_address)
            .bind(now)
            .bind(WorkerStatus::Rotating.as_str())
            .fetch_optional(&mut *tx)
            .await?;

        let Some(worker) = worker else {
            tx.rollback().await?;
            return Ok(None);
        };

        let logged = OrchestratorLogRepo::insert(&mut *tx, entry, now).await?;
        tx.commit().await?;
        Ok(Some((worker, logged)))
    }
}
