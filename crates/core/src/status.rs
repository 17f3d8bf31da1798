//! Read-side projections for operators: fleet summary, queue depth, job views.
//!
//! All projections are computed on demand and tolerate empty inputs.

use serde::{Deserialize, Serialize};

use crate::job::{JobCategory, PipelineJob};
use crate::types::Timestamp;
use crate::worker_pool::{Worker, WorkerStatus};

define_text_enum! {
    /// Processing stage of a single target item.
    ItemStage ("item stage") {
        Pending => "pending",
        InProgress => "in-progress",
        Completed => "completed",
        Failed => "failed",
    }
}

// ---------------------------------------------------------------------------
// Fleet
// ---------------------------------------------------------------------------

/// Worker counts by status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FleetSummary {
    pub total: i64,
    pub active: i64,
    pub rotating: i64,
    pub offline: i64,
}

impl FleetSummary {
    pub fn from_workers(workers: &[Worker]) -> Self {
        workers.iter().fold(Self::default(), |mut acc, w| {
            acc.total += 1;
            match w.status {
                WorkerStatus::Active => acc.active += 1,
                WorkerStatus::Rotating => acc.rotating += 1,
                WorkerStatus::Offline => acc.offline += 1,
            }
            acc
        })
    }
}

// ---------------------------------------------------------------------------
// Queue
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageCounts {
    pub pending: i64,
    pub in_progress: i64,
    pub completed: i64,
    pub failed: i64,
}

impl StageCounts {
    fn add(&mut self, stage: ItemStage, n: i64) {
        let slot = match stage {
            ItemStage::Pending => &mut self.pending,
            ItemStage::InProgress => &mut self.in_progress,
            ItemStage::Completed => &mut self.completed,
            ItemStage::Failed => &mut self.failed,
        };
        *slot += n;
    }

    pub fn total(&self) -> i64 {
        self.pending + self.in_progress + self.completed + self.failed
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryQueueStats {
    pub category: JobCategory,
    pub stages: StageCounts,
    pub items_collected: i64,
}

/// Per-category item counts by stage plus cumulative collected items.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub categories: Vec<CategoryQueueStats>,
    pub total_items_collected: i64,
}

/// One grouped count as produced by the item store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueStatRow {
    pub category: JobCategory,
    pub stage: ItemStage,
    pub item_count: i64,
    pub items_collected: i64,
}

impl Default for QueueStats {
    /// Every category present with zeroed counters.
    fn default() -> Self {
        Self {
            categories: JobCategory::ALL
                .iter()
                .map(|&category| CategoryQueueStats {
                    category,
                    stages: StageCounts::default(),
                    items_collected: 0,
                })
                .collect(),
            total_items_collected: 0,
        }
    }
}

impl QueueStats {
    pub fn from_rows<I>(rows: I) -> Self
    where
        I: IntoIterator<Item = QueueStatRow>,
    {
        let mut stats = Self::default();
        for row in rows {
            if let Some(entry) = stats
                .categories
                .iter_mut()
                .find(|c| c.category == row.category)
            {
                entry.stages.add(row.stage, row.item_count);
                entry.items_collected += row.items_collected;
            }
            stats.total_items_collected += row.items_collected;
        }
        stats
    }

    pub fn for_category(&self, category: JobCategory) -> Option<&CategoryQueueStats> {
        self.categories.iter().find(|c| c.category == category)
    }
}

// ---------------------------------------------------------------------------
// Jobs
// ---------------------------------------------------------------------------

/// A job as shown to operators, with a derived staleness flag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobView {
    #[serde(flatten)]
    pub job: PipelineJob,
    pub is_stale: bool,
}

impl JobView {
    pub fn new(job: PipelineJob, now: Timestamp, stale_after: chrono::TimeDelta) -> Self {
        let is_stale = crate::reaper::is_stale(&job, now, stale_after);
        Self { job, is_stale }
    }
}
