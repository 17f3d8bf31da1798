//! Grouped item counts from `pipeline_items`.

use sqlx::PgPool;

use crate::models::queue::QueueStageCount;

pub struct QueueStatsRepo;

impl QueueStatsRepo {
    /// One row per `(category, stage)` that has at least one item.
    pub async fn stage_counts(pool: &PgPool) -> Result<Vec<QueueStageCount>, sqlx::Error> {
        sqlx::query_as::<_, QueueStageCount>(
            "SELECT category, stage, \
                    COUNT(*)::BIGINT AS item_count, \
                    COALESCE(SUM(items_collected), 0)::BIGINT AS items_collected \
             FROM pipeline_items \
             GROUP BY category, stage",
        )
        .fetch_all(pool)
        .await
    }
}
