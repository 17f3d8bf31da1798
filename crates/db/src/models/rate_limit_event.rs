use inkdex_core::rotation::{RateLimitEvent, RateLimitFeedItem};
use inkdex_core::types::{DbId, Timestamp};
use sqlx::FromRow;

/// A row from the `rate_limit_events` table.
#[derive(Debug, Clone, FromRow)]
pub struct RateLimitEventRow {
    pub id: DbId,
    pub worker_id: DbId,
    pub ip_address: String,
    pub error_code: String,
    pub error_message: Option<String>,
    pub subject_handle: Option<String>,
    pub created_at: Timestamp,
}

/// An event joined with `workers.name`.
#[derive(Debug, Clone, FromRow)]
pub struct RateLimitFeedRow {
    #[sqlx(flatten)]
    pub event: RateLimitEventRow,
    pub worker_name: Option<String>,
}

impl From<RateLimitEventRow> for RateLimitEvent {
    fn from(row: RateLimitEventRow) -> Self {
        RateLimitEvent {
            id: row.id,
            worker_id: row.worker_id,
            ip_address: row.ip_address,
            error_code: row.error_code,
            error_message: row.error_message,
            subject_handle: row.subject_handle,
            created_at: row.created_at,
        }
    }
}

impl From<RateLimitFeedRow> for RateLimitFeedItem {
    fn from(row: RateLimitFeedRow) -> Self {
        RateLimitFeedItem {
            event: row.event.into(),
            worker_name: row.worker_name,
        }
    }
}
