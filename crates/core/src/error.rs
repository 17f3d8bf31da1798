use crate::job::JobStatus;
use crate::types::DbId;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: &'static str, id: DbId },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    /// A job write was rejected because the job is no longer in a state
    /// that permits it.
    #[error("Invalid transition: {from} -> {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },

    #[error("Identity rotation failed: {0}")]
    IdentityRotation(String),

    #[error("Termination signal failed: {0}")]
    TerminationSignal(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Internal error: {0}")]
    Internal(String),
}
