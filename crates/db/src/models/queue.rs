use inkdex_core::error::CoreError;
use inkdex_core::status::QueueStatRow;
use sqlx::FromRow;

use super::parse_column;

/// One `(category, stage)` group from `pipeline_items`.
#[derive(Debug, Clone, FromRow)]
pub struct QueueStageCount {
    pub category: String,
    pub stage: String,
    pub item_count: i64,
    pub items_collected: i64,
}

impl TryFrom<QueueStageCount> for QueueStatRow {
    type Error = CoreError;

    fn try_from(row: QueueStageCount) -> Result<Self, Self::Error> {
        Ok(QueueStatRow {
            category: parse_column("pipeline_items.category", &row.category)?,
            stage: parse_column("pipeline_items.stage", &row.stage)?,
            item_count: row.item_count,
            items_collected: row.items_collected,
        })
    }
}
