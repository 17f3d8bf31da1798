//! Injected capabilities for effects outside the store.

use async_trait::async_trait;

use crate::error::CoreError;
use crate::job::PipelineJob;
use crate::types::ProcessHandle;
use crate::worker_pool::{Worker, WorkerIdentity};

/// Decides whether a caller may trigger pipeline jobs.
pub trait TriggerAuthorizer: Send + Sync {
    fn authorize(&self, caller: &str) -> Result<(), CoreError>;
}

/// Allows every caller. Used when no allowlist is configured.
#[derive(Debug, Default, Clone)]
pub struct AllowAll;

impl TriggerAuthorizer for AllowAll {
    fn authorize(&self, _caller: &str) -> Result<(), CoreError> {
        Ok(())
    }
}

/// Case-insensitive allowlist of caller identities.
#[derive(Debug, Clone)]
pub struct AllowlistAuthorizer {
    allowed: Vec<String>,
}

impl AllowlistAuthorizer {
    pub fn new<I, S>(callers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            allowed: callers
                .into_iter()
                .map(|c| c.as_ref().trim().to_lowercase())
                .filter(|c| !c.is_empty())
                .collect(),
        }
    }
}

impl TriggerAuthorizer for AllowlistAuthorizer {
    fn authorize(&self, caller: &str) -> Result<(), CoreError> {
        let caller = caller.trim().to_lowercase();
        if self.allowed.iter().any(|a| *a == caller) {
            Ok(())
        } else {
            Err(CoreError::Forbidden(format!(
                "'{caller}' may not trigger pipeline jobs"
            )))
        }
    }
}

/// Starts the process that executes a freshly admitted job.
///
/// Must return once the process is spawned; it must not wait for the job.
#[async_trait]
pub trait JobLauncher: Send + Sync {
    async fn launch(&self, job: &PipelineJob) -> Result<(), CoreError>;
}

/// Best-effort OS-level termination of a job process.
pub trait ProcessTerminator: Send + Sync {
    /// Returns `false` when the signal could not be delivered.
    fn terminate(&self, handle: ProcessHandle) -> bool;
}

/// Requests a fresh network identity from the execution environment.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn fresh_identity(&self, worker: &Worker) -> Result<WorkerIdentity, CoreError>;
}
