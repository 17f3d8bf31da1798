//! Operator audit trail entries.

use serde::{Deserialize, Serialize};

use crate::types::{DbId, Timestamp};

pub const ACTION_JOB_TRIGGER: &str = "job.trigger";
pub const ACTION_JOB_CANCEL: &str = "job.cancel";
pub const ACTION_WORKER_ROTATE: &str = "worker.rotate";
pub const ACTION_WORKER_SHUTDOWN: &str = "worker.shutdown";

pub const RESOURCE_JOB: &str = "pipeline_job";
pub const RESOURCE_WORKER: &str = "worker";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: DbId,
    pub actor: String,
    pub action: String,
    pub resource_type: String,
    pub resource_id: Option<String>,
    pub details: Option<serde_json::Value>,
    pub created_at: Timestamp,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewAuditEntry {
    pub actor: String,
    pub action: String,
    pub resource_type: String,
    pub resource_id: Option<String>,
    pub details: Option<serde_json::Value>,
}

impl NewAuditEntry {
    pub fn new(actor: &str, action: &str, resource_type: &str, resource_id: DbId) -> Self {
        Self {
            actor: actor.to_string(),
            action: action.to_string(),
            resource_type: resource_type.to_string(),
            resource_id: Some(resource_id.to_string()),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}
