//! Repository for the append-only `rate_limit_events` table.

use inkdex_core::rotation::NewRateLimitEvent;
use inkdex_core::types::{DbId, Timestamp};
use sqlx::PgPool;

use crate::models::rate_limit_event::{RateLimitEventRow, RateLimitFeedRow};

/// Column list for `rate_limit_events` queries.
const COLUMNS: &str = "\
    id, worker_id, ip_address, error_code, error_message, subject_handle, created_at";

pub struct RateLimitEventRepo;

impl RateLimitEventRepo {
    pub async fn insert(
        pool: &PgPool,
        event: &NewRateLimitEvent,
        now: Timestamp,
    ) -> Result<RateLimitEventRow, sqlx::Error> {
        let query = format!(
            "INSERT INTO rate_limit_events \
                 (worker_id, ip_address, error_code, error_message, subject_handle, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, RateLimitEventRow>(&query)
            .bind(event.worker_id)
            .bind(&event.ip_address)
            .bind(&event.error_code)
            .bind(&event.error_message)
            .bind(&event.subject_handle)
            .bind(now)
            .fetch_one(pool)
            .await
    }

    /// Count events for a worker on one IP at or after `since`.
    pub async fn count_since(
        pool: &PgPool,
        worker_id: DbId,
        ip_address: &str,
        since: Timestamp,
    ) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM rate_limit_events \
             WHERE worker_id = $1 AND ip_address = $2 AND created_at >= $3",
        )
        .bind(worker_id)
        .bind(ip_address)
        .bind(since)
        .fetch_one(pool)
        .await
    }

    /// Most recent events joined with the worker name, newest first.
    pub async fn recent_with_worker(
        pool: &PgPool,
        limit: i64,
    ) -> Result<Vec<RateLimitFeedRow>, sqlx::Error> {
        sqlx::query_as::<_, RateLimitFeedRow>(
            "SELECT e.id, e.worker_id, e.ip_address, e.error_code, e.error_message, \
                    e.subject_handle, e.created_at, w.name AS worker_name \
             FROM rate_limit_events e \
             LEFT JOIN workers w ON w.id = e.worker_id \
             ORDER BY e.created_at DESC, e.id DESC \
             LIMIT $1",
        )
        .bind(limit)
        .fetch_all(pool)
        .await
    }
}
