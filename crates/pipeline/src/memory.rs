//! In-process [`OrchestratorStore`] backed by a single `RwLock`.
//!
//! Every mutating call takes the write lock for its whole read-check-write
//! sequence, which gives the same atomicity the PostgreSQL store gets from
//! conditional updates and the active-category unique index. Used by tests
//! and by the API when no `DATABASE_URL` is configured.

use std::collections::BTreeMap;

use async_trait::async_trait;
use inkdex_core::audit::{AuditEntry, NewAuditEntry};
use inkdex_core::error::CoreError;
use inkdex_core::job::{
    merge_progress, normalized_total, state_machine, CancelOutcome, JobCompletion, JobFilter,
    JobProgress, JobStatus, NewJob, PipelineJob,
};
use inkdex_core::rotation::{
    NewOrchestratorLogEntry, NewRateLimitEvent, OrchestratorLogEntry, RateLimitEvent,
    RateLimitFeedItem,
};
use inkdex_core::status::QueueStats;
use inkdex_core::store::{
    AuditLog, JobStore, OrchestratorLog, OrchestratorStore, QueueStatsSource, RateLimitLog,
    WorkerRegistry,
};
use inkdex_core::types::{DbId, ProcessHandle, Timestamp};
use inkdex_core::worker_pool::{Worker, WorkerIdentity, WorkerStatus};
use tokio::sync::RwLock;

#[derive(Default)]
struct Inner {
    next_id: DbId,
    jobs: BTreeMap<DbId, PipelineJob>,
    workers: BTreeMap<DbId, Worker>,
    rate_limit_events: Vec<RateLimitEvent>,
    orchestrator_log: Vec<OrchestratorLogEntry>,
    audit_log: Vec<AuditEntry>,
    queue_stats: Option<QueueStats>,
}

impl Inner {
    fn next_id(&mut self) -> DbId {
        self.next_id += 1;
        self.next_id
    }

    /// Apply `write` to a job if its status permits a move to `to`.
    fn transition_job<F>(&mut self, id: DbId, to: JobStatus, write: F) -> Result<PipelineJob, CoreError>
    where
        F: FnOnce(&mut PipelineJob),
    {
        let job = self.jobs.get_mut(&id).ok_or(CoreError::NotFound {
            entity: "PipelineJob",
            id,
        })?;
        state_machine::validate_transition(job.status, to)?;
        write(job);
        job.status = to;
        Ok(job.clone())
    }
}

#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the queue projection returned by [`QueueStatsSource`].
    pub async fn set_queue_stats(&self, stats: QueueStats) {
        self.inner.write().await.queue_stats = Some(stats);
    }
}

fn newest_first<T, K: Ord>(items: &[T], limit: i64, key: impl Fn(&T) -> K) -> Vec<T>
where
    T: Clone,
{
    let mut sorted: Vec<T> = items.to_vec();
    sorted.sort_by_key(|item| std::cmp::Reverse(key(item)));
    sorted.truncate(limit.max(0) as usize);
    sorted
}

// ---------------------------------------------------------------------------
// Jobs
// ---------------------------------------------------------------------------

#[async_trait]
impl JobStore for MemoryStore {
    async fn create_pending_job(
        &self,
        job: &NewJob,
        now: Timestamp,
    ) -> Result<PipelineJob, CoreError> {
        let mut inner = self.inner.write().await;
        let occupied = inner
            .jobs
            .values()
            .any(|j| j.category == job.category && j.status.is_active());
        if occupied {
            return Err(CoreError::Conflict(format!(
                "A {} job is already pending or running",
                job.category
            )));
        }
        let id = inner.next_id();
        let created = PipelineJob {
            id,
            category: job.category,
            status: JobStatus::Pending,
            scope: job.scope,
            target_city: job.target_city.clone(),
            target_ids: job.target_ids.clone(),
            limit: job.limit,
            total_items: None,
            processed_items: 0,
            failed_items: 0,
            triggered_by: job.triggered_by.clone(),
            process_handle: None,
            started_at: None,
            completed_at: None,
            last_heartbeat_at: None,
            error_message: None,
            result_summary: None,
            cancel_reason: None,
            cancelled_by: None,
            created_at: now,
            updated_at: now,
        };
        inner.jobs.insert(id, created.clone());
        Ok(created)
    }

    async fn find_job(&self, id: DbId) -> Result<Option<PipelineJob>, CoreError> {
        Ok(self.inner.read().await.jobs.get(&id).cloned())
    }

    async fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<PipelineJob>, CoreError> {
        let (limit, offset) = filter.page();
        let inner = self.inner.read().await;
        let mut jobs: Vec<PipelineJob> = inner
            .jobs
            .values()
            .filter(|j| filter.matches(j))
            .cloned()
            .collect();
        jobs.sort_by_key(|j| std::cmp::Reverse((j.created_at, j.id)));
        Ok(jobs
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect())
    }

    async fn mark_running(
        &self,
        id: DbId,
        process_handle: Option<ProcessHandle>,
        now: Timestamp,
    ) -> Result<PipelineJob, CoreError> {
        self.inner
            .write()
            .await
            .transition_job(id, JobStatus::Running, |job| {
                job.process_handle = process_handle.or(job.process_handle);
                job.started_at = Some(now);
                job.last_heartbeat_at = Some(now);
                job.updated_at = now;
            })
    }

    async fn record_heartbeat(
        &self,
        id: DbId,
        progress: &JobProgress,
        now: Timestamp,
    ) -> Result<PipelineJob, CoreError> {
        let mut inner = self.inner.write().await;
        let job = inner.jobs.get_mut(&id).ok_or(CoreError::NotFound {
            entity: "PipelineJob",
            id,
        })?;
        if job.status != JobStatus::Running {
            return Err(CoreError::InvalidTransition {
                from: job.status,
                to: JobStatus::Running,
            });
        }
        let merged = merge_progress(job, progress);
        job.processed_items = merged.processed_items;
        job.failed_items = merged.failed_items;
        job.total_items = merged.total_items;
        job.last_heartbeat_at = Some(now);
        job.updated_at = now;
        Ok(job.clone())
    }

    async fn mark_completed(
        &self,
        id: DbId,
        completion: &JobCompletion,
        now: Timestamp,
    ) -> Result<PipelineJob, CoreError> {
        self.inner
            .write()
            .await
            .transition_job(id, JobStatus::Completed, |job| {
                let reported = completion.total_items.or(job.total_items).unwrap_or(0);
                job.total_items = Some(normalized_total(
                    reported,
                    job.processed_items,
                    job.failed_items,
                ));
                job.result_summary = completion.result_summary.clone();
                job.completed_at = Some(now);
                job.process_handle = None;
                job.updated_at = now;
            })
    }

    async fn mark_failed(
        &self,
        id: DbId,
        error_message: &str,
        now: Timestamp,
    ) -> Result<PipelineJob, CoreError> {
        self.inner
            .write()
            .await
            .transition_job(id, JobStatus::Failed, |job| {
                job.error_message = Some(error_message.to_string());
                job.completed_at = Some(now);
                job.process_handle = None;
                job.updated_at = now;
            })
    }

    async fn mark_cancelled(
        &self,
        id: DbId,
        reason: &str,
        cancelled_by: &str,
        now: Timestamp,
    ) -> Result<CancelOutcome, CoreError> {
        let mut inner = self.inner.write().await;
        match inner.jobs.get(&id) {
            None => {
                return Err(CoreError::NotFound {
                    entity: "PipelineJob",
                    id,
                })
            }
            Some(job) if job.status.is_terminal() => {
                return Ok(CancelOutcome::AlreadyTerminal(job.clone()))
            }
            Some(_) => {}
        }
        inner
            .transition_job(id, JobStatus::Cancelled, |job| {
                job.completed_at = Some(now);
                job.process_handle = None;
                job.cancel_reason = Some(reason.to_string());
                job.cancelled_by = Some(cancelled_by.to_string());
                job.updated_at = now;
            })
            .map(CancelOutcome::Cancelled)
    }

    async fn find_stale_jobs(&self, cutoff: Timestamp) -> Result<Vec<PipelineJob>, CoreError> {
        let inner = self.inner.read().await;
        let mut stale: Vec<PipelineJob> = inner
            .jobs
            .values()
            .filter(|j| {
                j.status.is_active()
                    && !j.category.is_reaper_exempt()
                    && j.activity_anchor() < cutoff
            })
            .cloned()
            .collect();
        stale.sort_by_key(|j| j.created_at);
        Ok(stale)
    }
}

// ---------------------------------------------------------------------------
// Workers
// ---------------------------------------------------------------------------

#[async_trait]
impl WorkerRegistry for MemoryStore {
    async fn register_worker(
        &self,
        name: &str,
        identity: &WorkerIdentity,
        now: Timestamp,
    ) -> Result<Worker, CoreError> {
        let mut inner = self.inner.write().await;
        if let Some(existing) = inner.workers.values_mut().find(|w| w.name == name) {
            if existing.status != WorkerStatus::Rotating {
                existing.status = WorkerStatus::Active;
                existing.instance_id = identity.instance_id.clone();
                existing.ip_address = identity.ip_address.clone();
            }
            existing.last_seen_at = now;
            existing.updated_at = now;
            return Ok(existing.clone());
        }
        let id = inner.next_id();
        let worker = Worker {
            id,
            name: name.to_string(),
            status: WorkerStatus::Active,
            instance_id: identity.instance_id.clone(),
            ip_address: identity.ip_address.clone(),
            last_seen_at: now,
            created_at: now,
            updated_at: now,
        };
        inner.workers.insert(id, worker.clone());
        Ok(worker)
    }

    async fn find_worker(&self, id: DbId) -> Result<Option<Worker>, CoreError> {
        Ok(self.inner.read().await.workers.get(&id).cloned())
    }

    async fn list_workers(&self) -> Result<Vec<Worker>, CoreError> {
        let mut workers: Vec<Worker> = self.inner.read().await.workers.values().cloned().collect();
        workers.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(workers)
    }

    async fn worker_names(&self) -> Result<Vec<String>, CoreError> {
        Ok(self
            .list_workers()
            .await?
            .into_iter()
            .map(|w| w.name)
            .collect())
    }

    async fn check_in_worker(&self, id: DbId, now: Timestamp) -> Result<Worker, CoreError> {
        let mut inner = self.inner.write().await;
        let worker = inner.workers.get_mut(&id).ok_or(CoreError::NotFound {
            entity: "Worker",
            id,
        })?;
        worker.last_seen_at = now;
        if worker.status == WorkerStatus::Offline {
            worker.status = WorkerStatus::Active;
        }
        worker.updated_at = now;
        Ok(worker.clone())
    }

    async fn transition_worker(
        &self,
        id: DbId,
        from: WorkerStatus,
        to: WorkerStatus,
        now: Timestamp,
    ) -> Result<Option<Worker>, CoreError> {
        let mut inner = self.inner.write().await;
        match inner.workers.get_mut(&id) {
            Some(worker) if worker.status == from => {
                worker.status = to;
                worker.updated_at = now;
                Ok(Some(worker.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn mark_silent_workers_offline(
        &self,
        cutoff: Timestamp,
        now: Timestamp,
    ) -> Result<Vec<Worker>, CoreError> {
        let mut inner = self.inner.write().await;
        let mut changed = Vec::new();
        for worker in inner.workers.values_mut() {
            if worker.status == WorkerStatus::Active && worker.last_seen_at < cutoff {
                worker.status = WorkerStatus::Offline;
                worker.updated_at = now;
                changed.push(worker.clone());
            }
        }
        Ok(changed)
    }

    async fn commit_rotation(
        &self,
        id: DbId,
        identity: &WorkerIdentity,
        entry: &NewOrchestratorLogEntry,
        now: Timestamp,
    ) -> Result<Option<(Worker, OrchestratorLogEntry)>, CoreError> {
        let mut inner = self.inner.write().await;
        let log_id = inner.next_id();
        let Some(worker) = inner
            .workers
            .get_mut(&id)
            .filter(|w| w.status == WorkerStatus::Rotating)
        else {
            return Ok(None);
        };
        worker.status = WorkerStatus::Active;
        worker.instance_id = identity.instance_id.clone();
        worker.ip_address = identity.ip_address.clone();
        worker.last_seen_at = now;
        worker.updated_at = now;
        let worker = worker.clone();

        let logged = OrchestratorLogEntry {
            id: log_id,
            action: entry.action.clone(),
            worker_id: entry.worker_id,
            worker_name: entry.worker_name.clone(),
            old_instance_id: entry.old_instance_id.clone(),
            new_instance_id: entry.new_instance_id.clone(),
            old_ip: entry.old_ip.clone(),
            new_ip: entry.new_ip.clone(),
            reason: entry.reason.clone(),
            details: entry.details.clone(),
            created_at: now,
        };
        inner.orchestrator_log.push(logged.clone());
        Ok(Some((worker, logged)))
    }
}

// ---------------------------------------------------------------------------
// Logs and projections
// ---------------------------------------------------------------------------

#[async_trait]
impl RateLimitLog for MemoryStore {
    async fn append_rate_limit_event(
        &self,
        event: &NewRateLimitEvent,
        now: Timestamp,
    ) -> Result<RateLimitEvent, CoreError> {
        let mut inner = self.inner.write().await;
        let stored = RateLimitEvent {
            id: inner.next_id(),
            worker_id: event.worker_id,
            ip_address: event.ip_address.clone(),
            error_code: event.error_code.clone(),
            error_message: event.error_message.clone(),
            subject_handle: event.subject_handle.clone(),
            created_at: now,
        };
        inner.rate_limit_events.push(stored.clone());
        Ok(stored)
    }

    async fn count_rate_limit_events(
        &self,
        worker_id: DbId,
        ip_address: &str,
        since: Timestamp,
    ) -> Result<i64, CoreError> {
        let inner = self.inner.read().await;
        let count = inner
            .rate_limit_events
            .iter()
            .filter(|e| e.worker_id == worker_id && e.ip_address == ip_address && e.created_at >= since)
            .count();
        Ok(count as i64)
    }

    async fn recent_rate_limit_events(
        &self,
        limit: i64,
    ) -> Result<Vec<RateLimitFeedItem>, CoreError> {
        let inner = self.inner.read().await;
        let events = newest_first(&inner.rate_limit_events, limit, |e| (e.created_at, e.id));
        Ok(events
            .into_iter()
            .map(|event| RateLimitFeedItem {
                worker_name: inner.workers.get(&event.worker_id).map(|w| w.name.clone()),
                event,
            })
            .collect())
    }
}

#[async_trait]
impl OrchestratorLog for MemoryStore {
    async fn recent_log_entries(&self, limit: i64) -> Result<Vec<OrchestratorLogEntry>, CoreError> {
        let inner = self.inner.read().await;
        Ok(newest_first(&inner.orchestrator_log, limit, |e| (e.created_at, e.id)))
    }
}

#[async_trait]
impl AuditLog for MemoryStore {
    async fn append_audit(
        &self,
        entry: &NewAuditEntry,
        now: Timestamp,
    ) -> Result<AuditEntry, CoreError> {
        let mut inner = self.inner.write().await;
        let stored = AuditEntry {
            id: inner.next_id(),
            actor: entry.actor.clone(),
            action: entry.action.clone(),
            resource_type: entry.resource_type.clone(),
            resource_id: entry.resource_id.clone(),
            details: entry.details.clone(),
            created_at: now,
        };
        inner.audit_log.push(stored.clone());
        Ok(stored)
    }

    async fn recent_audit(&self, limit: i64) -> Result<Vec<AuditEntry>, CoreError> {
        let inner = self.inner.read().await;
        Ok(newest_first(&inner.audit_log, limit, |e| (e.created_at, e.id)))
    }
}

#[async_trait]
impl QueueStatsSource for MemoryStore {
    async fn queue_stats(&self) -> Result<QueueStats, CoreError> {
        Ok(self
            .inner
            .read()
            .await
            .queue_stats
            .clone()
            .unwrap_or_default())
    }
}

#[async_trait]
impl OrchestratorStore for MemoryStore {
    async fn health_check(&self) -> Result<(), CoreError> {
        Ok(())
    }
}
