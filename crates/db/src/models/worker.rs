use inkdex_core::error::CoreError;
use inkdex_core::types::{DbId, Timestamp};
use inkdex_core::worker_pool::Worker;
use sqlx::FromRow;

use super::parse_column;

/// A row from the `workers` table.
#[derive(Debug, Clone, FromRow)]
pub struct WorkerRow {
    pub id: DbId,
    pub name: String,
    pub status: String,
    pub instance_id: String,
    pub ip_address: String,
    pub last_seen_at: Timestamp,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl TryFrom<WorkerRow> for Worker {
    type Error = CoreError;

    fn try_from(row: WorkerRow) -> Result<Self, Self::Error> {
        Ok(Worker {
            id: row.id,
            name: row.name,
            status: parse_column("workers.status", &row.status)?,
            instance_id: row.instance_id,
            ip_address: row.ip_address,
            last_seen_at: row.last_seen_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}
