use inkdex_core::rotation::OrchestratorLogEntry;
use inkdex_core::types::{DbId, Timestamp};
use sqlx::FromRow;

/// A row from the `orchestrator_log` table.
#[derive(Debug, Clone, FromRow)]
pub struct OrchestratorLogRow {
    pub id: DbId,
    pub action: String,
    pub worker_id: Option<DbId>,
    pub worker_name: Option<String>,
    pub old_instance_id: Option<String>,
    pub new_instance_id: Option<String>,
    pub old_ip: Option<String>,
    pub new_ip: Option<String>,
    pub reason: Option<String>,
    pub details: Option<serde_json::Value>,
    pub created_at: Timestamp,
}

impl From<OrchestratorLogRow> for OrchestratorLogEntry {
    fn from(row: OrchestratorLogRow) -> Self {
        OrchestratorLogEntry {
            id: row.id,
            action: row.action,
            worker_id: row.worker_id,
            worker_name: row.worker_name,
            old_instance_id: row.old_instance_id,
            new_instance_id: row.new_instance_id,
            old_ip: row.old_ip,
            new_ip: row.new_ip,
            reason: row.reason,
            details: row.details,
            created_at: row.created_at,
        }
    }
}
