use inkdex_core::error::CoreError;
use inkdex_core::job::PipelineJob;
use inkdex_core::types::{DbId, Timestamp};
use sqlx::FromRow;

use super::parse_column;

/// A row from the `pipeline_jobs` table.
#[derive(Debug, Clone, FromRow)]
pub struct PipelineJobRow {
    pub id: DbId,
    pub category: String,
    pub status: String,
    pub scope: String,
    pub target_city: Option<String>,
    pub target_ids: Option<Vec<uuid::Uuid>>,
    pub item_limit: Option<i64>,
    pub total_items: Option<i64>,
    pub processed_items: i64,
    pub failed_items: i64,
    pub triggered_by: String,
    pub process_handle: Option<i64>,
    pub started_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
    pub last_heartbeat_at: Option<Timestamp>,
    pub error_message: Option<String>,
    pub result_summary: Option<serde_json::Value>,
    pub cancel_reason: Option<String>,
    pub cancelled_by: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl TryFrom<PipelineJobRow> for PipelineJob {
    type Error = CoreError;

    fn try_from(row: PipelineJobRow) -> Result<Self, Self::Error> {
        Ok(PipelineJob {
            id: row.id,
            category: parse_column("pipeline_jobs.category", &row.category)?,
            status: parse_column("pipeline_jobs.status", &row.status)?,
            scope: parse_column("pipeline_jobs.scope", &row.scope)?,
            target_city: row.target_city,
            target_ids: row.target_ids,
            limit: row.item_limit,
            total_items: row.total_items,
            processed_items: row.processed_items,
            failed_items: row.failed_items,
            triggered_by: row.triggered_by,
            process_handle: row.process_handle,
            started_at: row.started_at,
            completed_at: row.completed_at,
            last_heartbeat_at: row.last_heartbeat_at,
            error_message: row.error_message,
            result_summary: row.result_summary,
            cancel_reason: row.cancel_reason,
            cancelled_by: row.cancelled_by,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}
