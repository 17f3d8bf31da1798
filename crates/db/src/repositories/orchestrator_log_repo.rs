//! Repository for the append-only `orchestrator_log` table.

use inkdex_core::rotation::NewOrchestratorLogEntry;
use inkdex_core::types::Timestamp;
use sqlx::{PgExecutor, PgPool};

use crate::models::orchestrator_log::OrchestratorLogRow;

/// Column list for `orchestrator_log` queries.
const COLUMNS: &str = "\
    id, action, worker_id, worker_name, old_instance_id, new_instance_id, \
    old_ip, new_ip, reason, details, created_at";

pub struct OrchestratorLogRepo;

impl OrchestratorLogRepo {
    /// Append an entry. Accepts any executor so it can join a transaction.
    pub async fn insert<'e, E>(
        executor: E,
        entry: &NewOrchestratorLogEntry,
        now: Timestamp,
    ) -> Result<OrchestratorLogRow, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let query = format!(
            "INSERT INTO orchestrator_log \
                 (action, worker_id, worker_name, old_instance_id, new_instance_id, \
                  old_ip, new_ip, reason, details, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, OrchestratorLogRow>(&query)
            .bind(&entry.action)
            .bind(entry.worker_id)
            .bind(&entry.worker_name)
            .bind(&entry.old_instance_id)
            .bind(&entry.new_instance_id)
            .bind(&entry.old_ip)
            .bind(&entry.new_ip)
            .bind(&entry.reason)
            .bind(&entry.details)
            .bind(now)
            .fetch_one(executor)
            .await
    }

    /// Most recent entries, newest first.
    pub async fn recent(pool: &PgPool, limit: i64) -> Result<Vec<OrchestratorLogRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM orchestrator_log \
             ORDER BY created_at DESC, id DESC \
             LIMIT $1"
        );
        sqlx::query_as::<_, OrchestratorLogRow>(&query)
            .bind(limit)
            .fetch_all(pool)
            .await
    }
}
