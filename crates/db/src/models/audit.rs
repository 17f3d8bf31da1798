use inkdex_core::audit::AuditEntry;
use inkdex_core::types::{DbId, Timestamp};
use sqlx::FromRow;

/// A row from the `audit_log` table.
#[derive(Debug, Clone, FromRow)]
pub struct AuditRow {
    pub id: DbId,
    pub actor: String,
    pub action: String,
    pub resource_type: String,
    pub resource_id: Option<String>,
    pub details: Option<serde_json::Value>,
    pub created_at: Timestamp,
}

impl From<AuditRow> for AuditEntry {
    fn from(row: AuditRow) -> Self {
        AuditEntry {
            id: row.id,
            actor: row.actor,
            action: row.action,
            resource_type: row.resource_type,
            resource_id: row.resource_id,
            details: row.details,
            created_at: row.created_at,
        }
    }
}
