//! Handlers for the `/workers` resource.
//!
//! Agent endpoints (register, check-in, rate-limit reports) are called by
//! worker agents. Rotate and shutdown are operator actions and require a
//! [`Caller`].

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use inkdex_core::rotation::{IgnoreReason, NewRateLimitEvent, OrchestratorLogEntry, RateLimitEvent};
use inkdex_core::types::DbId;
use inkdex_core::worker_pool::{RegisterWorker, Worker};
use inkdex_pipeline::rotation::RotationOutcome;
use serde::{Deserialize, Serialize};

use crate::error::AppResult;
use crate::handlers::optional_json;
use crate::middleware::caller::Caller;
use crate::response::DataResponse;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
pub struct WorkerListQuery {
    /// Only workers that may receive new tasks.
    #[serde(default)]
    pub assignable: bool,
}

/// Body of `POST /workers/{id}/rate-limit-events`. The worker id comes from
/// the path.
#[derive(Debug, Deserialize)]
pub struct ReportRateLimit {
    #[serde(default)]
    pub ip_address: String,
    #[serde(default)]
    pub error_code: String,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub subject_handle: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RotateWorkerRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

/// Flat rendering of a [`RotationOutcome`].
#[derive(Debug, Serialize)]
pub struct RotationResponse {
    pub outcome: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker: Option<Worker>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_entry: Option<OrchestratorLogEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl From<RotationOutcome> for RotationResponse {
    fn from(outcome: RotationOutcome) -> Self {
        let bare = |label: &'static str, detail: Option<String>| RotationResponse {
            outcome: label,
            worker: None,
            log_entry: None,
            detail,
        };
        match outcome {
            RotationOutcome::Rotated { worker, entry } => RotationResponse {
                outcome: "rotated",
                worker: Some(worker),
                log_entry: Some(entry),
                detail: None,
            },
            RotationOutcome::Pending { error } => bare("pending", Some(error)),
            RotationOutcome::BelowThreshold { count } => {
                bare("below_threshold", Some(format!("{count} events in window")))
            }
            RotationOutcome::Ignored(IgnoreReason::NotActive(status)) => {
                bare("ignored", Some(format!("worker is {status}")))
            }
            RotationOutcome::Ignored(IgnoreReason::StaleIdentity) => {
                bare("ignored", Some("event came from a previous identity".to_string()))
            }
            RotationOutcome::Skipped => bare("skipped", None),
        }
    }
}

// ---------------------------------------------------------------------------
// Agent endpoints
// ---------------------------------------------------------------------------

/// POST /api/v1/workers
///
/// Register a worker or refresh an existing one's identity. A worker that
/// is mid-rotation keeps its state. Returns 201.
pub async fn register_worker(
    State(state): State<AppState>,
    Json(input): Json<RegisterWorker>,
) -> AppResult<impl IntoResponse> {
    let worker = state.orchestrator.fleet.register(input).await?;
    Ok((StatusCode::CREATED, Json(DataResponse { data: worker })))
}

/// POST /api/v1/workers/{id}/check-in
pub async fn check_in(
    State(state): State<AppState>,
    Path(id): Path<DbId>,
) -> AppResult<Json<DataResponse<Worker>>> {
    let worker = state.orchestrator.fleet.check_in(id).await?;
    Ok(Json(DataResponse { data: worker }))
}

/// POST /api/v1/workers/{id}/rate-limit-events
///
/// Record a rate-limit rejection and return 202 once it is stored. The
/// rotation decision runs in the background so a slow identity provider
/// never delays the reporting worker.
pub async fn report_rate_limit(
    State(state): State<AppState>,
    Path(id): Path<DbId>,
    Json(input): Json<ReportRateLimit>,
) -> AppResult<impl IntoResponse> {
    let event = state
        .orchestrator
        .rotation
        .record_event(NewRateLimitEvent {
            worker_id: id,
            ip_address: input.ip_address,
            error_code: input.error_code,
            error_message: input.error_message,
            subject_handle: input.subject_handle,
        })
        .await?;

    let engine = state.orchestrator.rotation.clone();
    let stored = event.clone();
    tokio::spawn(async move {
        if let Err(e) = engine.evaluate(&stored).await {
            tracing::error!(
                worker_id = stored.worker_id,
                event_id = stored.id,
                error = %e,
                "Rate-limit evaluation failed",
            );
        }
    });

    Ok((StatusCode::ACCEPTED, Json(DataResponse::<RateLimitEvent> { data: event })))
}

// ---------------------------------------------------------------------------
// Operator endpoints
// ---------------------------------------------------------------------------

/// GET /api/v1/workers
///
/// `?assignable=true` restricts the list to active workers.
pub async fn list_workers(
    _caller: Caller,
    State(state): State<AppState>,
    Query(query): Query<WorkerListQuery>,
) -> AppResult<Json<DataResponse<Vec<Worker>>>> {
    let fleet = &state.orchestrator.fleet;
    let workers = if query.assignable {
        fleet.list_assignable().await?
    } else {
        fleet.list().await?
    };
    Ok(Json(DataResponse { data: workers }))
}

/// GET /api/v1/workers/{id}
pub async fn get_worker(
    _caller: Caller,
    State(state): State<AppState>,
    Path(id): Path<DbId>,
) -> AppResult<Json<DataResponse<Worker>>> {
    let worker = state.orchestrator.fleet.get(id).await?;
    Ok(Json(DataResponse { data: worker }))
}

/// POST /api/v1/workers/{id}/rotate
///
/// Force an identity rotation. Body `{ "reason": "..." }` is optional and
/// is kept in the audit and rotation log. Returns 409 for offline workers.
pub async fn rotate_worker(
    caller: Caller,
    State(state): State<AppState>,
    Path(id): Path<DbId>,
    body: Bytes,
) -> AppResult<Json<DataResponse<RotationResponse>>> {
    let input: RotateWorkerRequest = optional_json(&body)?;
    let outcome = state
        .orchestrator
        .rotation
        .request_rotation(id, caller.as_str(), input.reason.as_deref())
        .await?;
    Ok(Json(DataResponse {
        data: outcome.into(),
    }))
}

/// POST /api/v1/workers/{id}/shutdown
pub async fn shutdown_worker(
    caller: Caller,
    State(state): State<AppState>,
    Path(id): Path<DbId>,
) -> AppResult<Json<DataResponse<Worker>>> {
    let worker = state.orchestrator.fleet.shutdown(id, caller.as_str()).await?;
    Ok(Json(DataResponse { data: worker }))
}
