//! One running job, seen from the process that executes it.
//!
//! The session attaches to the job, reports progress on an interval, and
//! stops the job body when the orchestrator no longer considers the job
//! running (it was cancelled, reaped, or finished elsewhere). The body
//! observes that through [`JobSession::cancelled`].

use std::sync::Arc;
use std::time::Duration;

use inkdex_core::job::{JobCompletion, JobProgress, JobStatus};
use inkdex_core::status::JobView;
use inkdex_core::types::{DbId, ProcessHandle};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::client::{ClientError, OrchestratorClient};

/// Set by the orchestrator's process launcher on every child it spawns.
pub const RUN_ID_ENV: &str = "PIPELINE_RUN_ID";

/// The job this process was launched for, if the orchestrator spawned it.
pub fn launched_job_id() -> Option<DbId> {
    std::env::var(RUN_ID_ENV).ok()?.trim().parse().ok()
}

/// What the session should do after a heartbeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatVerdict {
    Continue,
    /// The job left `running`. `None` when the orchestrator rejected the
    /// heartbeat without saying which state the job is in.
    Stop(Option<JobStatus>),
}

pub struct JobSession {
    client: Arc<OrchestratorClient>,
    job_id: DbId,
    cancel: CancellationToken,
}

impl JobSession {
    /// Attach to a pending job, moving it to `running`.
    pub async fn start(
        client: Arc<OrchestratorClient>,
        job_id: DbId,
        process_handle: Option<ProcessHandle>,
    ) -> Result<Self, ClientError> {
        let view = client.start_job(job_id, process_handle).await?;
        tracing::info!(job_id, category = %view.job.category, "Job session started");
        Ok(Self {
            client,
            job_id,
            cancel: CancellationToken::new(),
        })
    }

    /// Join a job that is already `running`, such as one whose process the
    /// orchestrator spawned itself (see [`launched_job_id`]).
    ///
    /// Sends an empty heartbeat. Counters only move up, so this never
    /// rewinds progress; a 409 means the job is not running.
    pub async fn attach(client: Arc<OrchestratorClient>, job_id: DbId) -> Result<Self, ClientError> {
        let ack = client.heartbeat(job_id, &JobProgress::default()).await?;
        tracing::info!(job_id, processed = ack.processed_items, "Job session attached");
        Ok(Self {
            client,
            job_id,
            cancel: CancellationToken::new(),
        })
    }

    pub fn job_id(&self) -> DbId {
        self.job_id
    }

    /// Fires once the orchestrator reports the job is no longer running.
    pub fn cancelled(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Send one heartbeat and decide whether to keep going.
    ///
    /// A rejected heartbeat (409) means the job already left `running`.
    /// Other failures are returned so the caller can retry on the next tick.
    pub async fn report(&self, progress: &JobProgress) -> Result<HeartbeatVerdict, ClientError> {
        let verdict = match self.client.heartbeat(self.job_id, progress).await {
            Ok(ack) if ack.status == JobStatus::Running => HeartbeatVerdict::Continue,
            Ok(ack) => HeartbeatVerdict::Stop(Some(ack.status)),
            Err(e) if e.is_conflict() => HeartbeatVerdict::Stop(None),
            Err(e) => return Err(e),
        };
        if let HeartbeatVerdict::Stop(status) = verdict {
            tracing::warn!(job_id = self.job_id, ?status, "Job is no longer running; stopping");
            self.cancel.cancel();
        }
        Ok(verdict)
    }

    /// Heartbeat the latest progress every `every` until the job stops or
    /// the session's token is cancelled.
    pub fn spawn_heartbeats(
        &self,
        mut progress: watch::Receiver<JobProgress>,
        every: Duration,
    ) -> JoinHandle<()> {
        let session = Self {
            client: Arc::clone(&self.client),
            job_id: self.job_id,
            cancel: self.cancel.clone(),
        };
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                tokio::select! {
                    _ = session.cancel.cancelled() => break,
                    _ = interval.tick() => {
                        let snapshot = *progress.borrow_and_update();
                        match session.report(&snapshot).await {
                            Ok(HeartbeatVerdict::Continue) => {}
                            Ok(HeartbeatVerdict::Stop(_)) => break,
                            Err(e) => {
                                tracing::warn!(job_id = session.job_id, error = %e, "Heartbeat failed");
                            }
                        }
                    }
                }
            }
        })
    }

    /// Report success. Consumes the session.
    pub async fn complete(self, completion: &JobCompletion) -> Result<JobView, ClientError> {
        self.cancel.cancel();
        let view = self.client.complete_job(self.job_id, completion).await?;
        tracing::info!(
            job_id = self.job_id,
            processed = view.job.processed_items,
            failed = view.job.failed_items,
            "Job completed",
        );
        Ok(view)
    }

    /// Report failure. Consumes the session.
    pub async fn fail(self, error_message: &str) -> Result<JobView, ClientError> {
        self.cancel.cancel();
        let view = self.client.fail_job(self.job_id, error_message).await?;
        tracing::warn!(job_id = self.job_id, error = error_message, "Job failed");
        Ok(view)
    }
}
