//! Read-only projections for operators. Nothing here is cached; every call
//! reads the store.

use chrono::Utc;
use inkdex_core::audit::AuditEntry;
use inkdex_core::error::CoreError;
use inkdex_core::job::JobFilter;
use inkdex_core::rotation::{OrchestratorLogEntry, RateLimitFeedItem};
use inkdex_core::status::{FleetSummary, JobView, QueueStats};
use inkdex_core::types::DbId;
use serde::Serialize;

use crate::SharedStore;

/// Default and maximum number of history rows returned per feed.
pub const DEFAULT_FEED_LIMIT: i64 = 20;
pub const MAX_FEED_LIMIT: i64 = 200;

/// Everything the operator dashboard polls, in one read.
#[derive(Debug, Clone, Serialize)]
pub struct OrchestratorStatus {
    pub fleet: FleetSummary,
    pub queue: QueueStats,
    pub rotations: Vec<OrchestratorLogEntry>,
    pub rate_limits: Vec<RateLimitFeedItem>,
}

pub struct StatusAggregator {
    store: SharedStore,
    stale_after: chrono::TimeDelta,
}

fn feed_limit(limit: Option<i64>) -> i64 {
    limit.unwrap_or(DEFAULT_FEED_LIMIT).clamp(1, MAX_FEED_LIMIT)
}

impl StatusAggregator {
    pub fn new(store: SharedStore, stale_after: chrono::TimeDelta) -> Self {
        Self { store, stale_after }
    }

    pub async fn fleet_summary(&self) -> Result<FleetSummary, CoreError> {
        let workers = self.store.list_workers().await?;
        Ok(FleetSummary::from_workers(&workers))
    }

    pub async fn queue_stats(&self) -> Result<QueueStats, CoreError> {
        self.store.queue_stats().await
    }

    pub async fn rotation_history(
        &self,
        limit: Option<i64>,
    ) -> Result<Vec<OrchestratorLogEntry>, CoreError> {
        self.store.recent_log_entries(feed_limit(limit)).await
    }

    pub async fn rate_limit_feed(
        &self,
        limit: Option<i64>,
    ) -> Result<Vec<RateLimitFeedItem>, CoreError> {
        self.store.recent_rate_limit_events(feed_limit(limit)).await
    }

    /// Most recent operator actions, newest first.
    pub async fn audit_trail(&self, limit: Option<i64>) -> Result<Vec<AuditEntry>, CoreError> {
        self.store.recent_audit(feed_limit(limit)).await
    }

    pub async fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<JobView>, CoreError> {
        let now = Utc::now();
        Ok(self
            .store
            .list_jobs(filter)
            .await?
            .into_iter()
            .map(|job| JobView::new(job, now, self.stale_after))
            .collect())
    }

    pub async fn get_job(&self, id: DbId) -> Result<JobView, CoreError> {
        let job = self.store.find_job(id).await?.ok_or(CoreError::NotFound {
            entity: "PipelineJob",
            id,
        })?;
        Ok(JobView::new(job, Utc::now(), self.stale_after))
    }

    pub async fn status(&self, limit: Option<i64>) -> Result<OrchestratorStatus, CoreError> {
        Ok(OrchestratorStatus {
            fleet: self.fleet_summary().await?,
            queue: self.queue_stats().await?,
            rotations: self.rotation_history(limit).await?,
            rate_limits: self.rate_limit_feed(limit).await?,
        })
    }
}
