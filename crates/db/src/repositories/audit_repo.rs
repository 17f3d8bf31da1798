//! Repository for the append-only `audit_log` table.

use inkdex_core::audit::NewAuditEntry;
use inkdex_core::types::Timestamp;
use sqlx::PgPool;

use crate::models::audit::AuditRow;

/// Column list for `audit_log` queries.
const COLUMNS: &str = "id, actor, action, resource_type, resource_id, details, created_at";

pub struct AuditRepo;

impl AuditRepo {
    pub async fn insert(
        pool: &PgPool,
        entry: &NewAuditEntry,
        now: Timestamp,
    ) -> Result<AuditRow, sqlx::Error> {
        let query = format!(
            "INSERT INTO audit_log (actor, action, resource_type, resource_id, details, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, AuditRow>(&query)
            .bind(&entry.actor)
            .bind(&entry.action)
            .bind(&entry.resource_type)
            .bind(&entry.resource_id)
            .bind(&entry.details)
            .bind(now)
            .fetch_one(pool)
            .await
    }

    pub async fn recent(pool: &PgPool, limit: i64) -> Result<Vec<AuditRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM audit_log ORDER BY created_at DESC, id DESC LIMIT $1"
        );
        sqlx::query_as::<_, AuditRow>(&query)
            .bind(limit)
            .fetch_all(pool)
            .await
    }
}
