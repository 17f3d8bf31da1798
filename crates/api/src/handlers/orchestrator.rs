//! Handlers for the `/orchestrator` dashboard reads and the on-demand reaper.
//!
//! All endpoints require a [`Caller`].

use axum::extract::{Query, State};
use axum::Json;
use inkdex_core::audit::AuditEntry;
use inkdex_core::rotation::{OrchestratorLogEntry, RateLimitFeedItem};
use inkdex_core::status::{FleetSummary, QueueStats};
use inkdex_core::types::DbId;
use inkdex_pipeline::status::OrchestratorStatus;
use serde::Serialize;

use crate::error::AppResult;
use crate::middleware::caller::Caller;
use crate::query::LimitParams;
use crate::response::DataResponse;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct ReapResponse {
    pub cancelled: Vec<DbId>,
}

/// GET /api/v1/orchestrator/status
///
/// Fleet summary, queue stats, rotation history, and rate-limit feed in one
/// read. `?limit=` bounds both feeds.
pub async fn status(
    _caller: Caller,
    State(state): State<AppState>,
    Query(params): Query<LimitParams>,
) -> AppResult<Json<DataResponse<OrchestratorStatus>>> {
    let status = state.orchestrator.status.status(params.limit).await?;
    Ok(Json(DataResponse { data: status }))
}

/// GET /api/v1/orchestrator/fleet
pub async fn fleet(
    _caller: Caller,
    State(state): State<AppState>,
) -> AppResult<Json<DataResponse<FleetSummary>>> {
    let summary = state.orchestrator.status.fleet_summary().await?;
    Ok(Json(DataResponse { data: summary }))
}

/// GET /api/v1/orchestrator/queue
pub async fn queue(
    _caller: Caller,
    State(state): State<AppState>,
) -> AppResult<Json<DataResponse<QueueStats>>> {
    let stats = state.orchestrator.status.queue_stats().await?;
    Ok(Json(DataResponse { data: stats }))
}

/// GET /api/v1/orchestrator/rotations
pub async fn rotations(
    _caller: Caller,
    State(state): State<AppState>,
    Query(params): Query<LimitParams>,
) -> AppResult<Json<DataResponse<Vec<OrchestratorLogEntry>>>> {
    let entries = state.orchestrator.status.rotation_history(params.limit).await?;
    Ok(Json(DataResponse { data: entries }))
}

/// GET /api/v1/orchestrator/rate-limits
pub async fn rate_limits(
    _caller: Caller,
    State(state): State<AppState>,
    Query(params): Query<LimitParams>,
) -> AppResult<Json<DataResponse<Vec<RateLimitFeedItem>>>> {
    let feed = state.orchestrator.status.rate_limit_feed(params.limit).await?;
    Ok(Json(DataResponse { data: feed }))
}

/// GET /api/v1/orchestrator/audit
pub async fn audit(
    _caller: Caller,
    State(state): State<AppState>,
    Query(params): Query<LimitParams>,
) -> AppResult<Json<DataResponse<Vec<AuditEntry>>>> {
    let entries = state.orchestrator.status.audit_trail(params.limit).await?;
    Ok(Json(DataResponse { data: entries }))
}

/// POST /api/v1/orchestrator/reap
///
/// Run one reaper pass now instead of waiting for the background loop.
pub async fn reap(
    caller: Caller,
    State(state): State<AppState>,
) -> AppResult<Json<DataResponse<ReapResponse>>> {
    let cancelled = state.orchestrator.reaper.sweep().await?;
    tracing::info!(caller = caller.as_str(), count = cancelled.len(), "On-demand reap finished");
    Ok(Json(DataResponse {
        data: ReapResponse { cancelled },
    }))
}
