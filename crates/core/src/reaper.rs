//! Staleness rules for the stuck-job reaper.

use crate::job::PipelineJob;
use crate::types::Timestamp;

/// An active job whose last sign of life is older than `threshold`.
pub fn is_stale(job: &PipelineJob, now: Timestamp, threshold: chrono::TimeDelta) -> bool {
    job.status.is_active() && job.activity_anchor() < now - threshold
}

/// A stale job the reaper is allowed to cancel.
pub fn is_reapable(job: &PipelineJob, now: Timestamp, threshold: chrono::TimeDelta) -> bool {
    is_stale(job, now, threshold) && !job.category.is_reaper_exempt()
}
