//! Pipeline job model, progress merging rules, and the job state machine.

use serde::{Deserialize, Serialize};

use crate::types::{DbId, ProcessHandle, Timestamp};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Default page size for job listings.
pub const DEFAULT_LIST_LIMIT: i64 = 50;

/// Upper bound on a single job listing page.
pub const MAX_LIST_LIMIT: i64 = 100;

/// Reason recorded when the reaper force-cancels a silent job.
pub const STUCK_JOB_REASON: &str = "stuck job detected";

/// Actor recorded when the reaper force-cancels a silent job.
pub const REAPER_ACTOR: &str = "reaper";

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

define_text_enum! {
    /// The kind of work a job performs. Admission control is scoped per category.
    JobCategory ("job category") {
        Scrape => "scrape",
        Process => "process",
        Embed => "embed",
        IndexRebuild => "index-rebuild",
        /// Ad-hoc single target jobs. Cancelled individually, never swept.
        SingleItem => "single-item",
    }
}

impl JobCategory {
    /// Whether the stuck-job reaper must leave jobs of this category alone.
    pub fn is_reaper_exempt(self) -> bool {
        matches!(self, JobCategory::SingleItem)
    }
}

define_text_enum! {
    /// Which subset of target items a job acts on.
    JobScope ("job scope") {
        PendingItems => "pending-items",
        FailedItems => "failed-items",
        All => "all",
        SpecificIds => "specific-ids",
    }
}

define_text_enum! {
    JobStatus ("job status") {
        Pending => "pending",
        Running => "running",
        Completed => "completed",
        Failed => "failed",
        Cancelled => "cancelled",
    }
}

impl JobStatus {
    /// Statuses that count against the one-active-job-per-category rule.
    pub const ACTIVE: &'static [JobStatus] = &[JobStatus::Pending, JobStatus::Running];

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    pub fn is_active(self) -> bool {
        !self.is_terminal()
    }
}

// ---------------------------------------------------------------------------
// Entities and DTOs
// ---------------------------------------------------------------------------

/// One triggered unit of pipeline work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineJob {
    pub id: DbId,
    pub category: JobCategory,
    pub status: JobStatus,
    pub scope: JobScope,
    pub target_city: Option<String>,
    pub target_ids: Option<Vec<uuid::Uuid>>,
    pub limit: Option<i64>,
    pub total_items: Option<i64>,
    pub processed_items: i64,
    pub failed_items: i64,
    pub triggered_by: String,
    pub process_handle: Option<ProcessHandle>,
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

impl PipelineJob {
    /// The instant staleness is measured from: the last heartbeat, or
    /// creation time when the job never reported.
    pub fn activity_anchor(&self) -> Timestamp {
        self.last_heartbeat_at.unwrap_or(self.created_at)
    }
}

/// A validated request to create a pending job.
#[derive(Debug, Clone, PartialEq)]
pub struct NewJob {
    pub category: JobCategory,
    pub scope: JobScope,
    pub target_city: Option<String>,
    pub target_ids: Option<Vec<uuid::Uuid>>,
    pub limit: Option<i64>,
    pub triggered_by: String,
}

/// Progress counters reported by the executing process.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct JobProgress {
    pub processed_items: i64,
    pub failed_items: i64,
    #[serde(default)]
    pub total_items: Option<i64>,
}

/// Terminal success report from the executing process.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobCompletion {
    #[serde(default)]
    pub total_items: Option<i64>,
    #[serde(default)]
    pub result_summary: Option<serde_json::Value>,
}

/// Result of a cancel request.
#[derive(Debug, Clone)]
pub enum CancelOutcome {
    /// The job moved to `cancelled` as a result of this call.
    Cancelled(PipelineJob),
    /// The job was already terminal; nothing was written.
    AlreadyTerminal(PipelineJob),
}

impl CancelOutcome {
    pub fn job(&self) -> &PipelineJob {
        match self {
            CancelOutcome::Cancelled(job) | CancelOutcome::AlreadyTerminal(job) => job,
        }
    }
}

/// Filters for listing jobs, newest first.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JobFilter {
    pub category: Option<JobCategory>,
    pub status: Option<JobStatus>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl JobFilter {
    /// Effective `(limit, offset)` after clamping.
    pub fn page(&self) -> (i64, i64) {
        let limit = self
            .limit
            .unwrap_or(DEFAULT_LIST_LIMIT)
            .clamp(1, MAX_LIST_LIMIT);
        let offset = self.offset.unwrap_or(0).max(0);
        (limit, offset)
    }

    pub fn matches(&self, job: &PipelineJob) -> bool {
        self.category.map_or(true, |c| c == job.category)
            && self.status.map_or(true, |s| s == job.status)
    }
}

// ---------------------------------------------------------------------------
// Progress merging
// ---------------------------------------------------------------------------

/// Merge a heartbeat into the stored counters.
///
/// Counters never move backwards: a lower reported value keeps the stored
/// one. A reported total replaces the stored total but is widened so that
/// `processed + failed <= total` always holds.
pub fn merge_progress(job: &PipelineJob, report: &JobProgress) -> JobProgress {
    let processed_items = job.processed_items.max(report.processed_items);
    let failed_items = job.failed_items.max(report.failed_items);
    let total_items = report
        .total_items
        .or(job.total_items)
        .map(|total| normalized_total(total, processed_items, failed_items));
    JobProgress {
        processed_items,
        failed_items,
        total_items,
    }
}

/// Widen `total` so it covers every processed and failed item.
pub fn normalized_total(total: i64, processed: i64, failed: i64) -> i64 {
    total.max(processed.saturating_add(failed))
}

/// Reject negative counters before they reach the store.
pub fn validate_progress(report: &JobProgress) -> Result<(), crate::error::CoreError> {
    let negative = report.processed_items < 0
        || report.failed_items < 0
        || report.total_items.is_some_and(|t| t < 0);
    if negative {
        return Err(crate::error::CoreError::Validation(
            "Progress counters must not be negative".to_string(),
        ));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// State machine
// ---------------------------------------------------------------------------

/// Job state machine transition rules.
///
/// `pending -> running -> {completed | failed | cancelled}`, plus
/// `pending -> cancelled`. Terminal states have no exits.
pub mod state_machine {
    use super::JobStatus;
    use crate::error::CoreError;

    /// Return the set of valid target statuses from the given status.
    pub fn valid_transitions(from: JobStatus) -> &'static [JobStatus] {
        match from {
            JobStatus::Pending => &[JobStatus::Running, JobStatus::Cancelled],
            JobStatus::Running => &[
                JobStatus::Completed,
                JobStatus::Failed,
                JobStatus::Cancelled,
            ],
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled => &[],
        }
    }

    pub fn can_transition(from: JobStatus, to: JobStatus) -> bool {
        valid_transitions(from).contains(&to)
    }

    /// The statuses a job must be in for a write targeting `to` to apply.
    pub fn sources_for(to: JobStatus) -> Vec<JobStatus> {
        JobStatus::ALL
            .iter()
            .copied()
            .filter(|from| can_transition(*from, to))
            .collect()
    }

    pub fn validate_transition(from: JobStatus, to: JobStatus) -> Result<(), CoreError> {
        if can_transition(from, to) {
            Ok(())
        } else {
            Err(CoreError::InvalidTransition { from, to })
        }
    }
}
