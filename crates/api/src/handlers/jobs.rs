//! Handlers for the `/jobs` resource.
//!
//! Operator endpoints (trigger, list, get, cancel) require a caller identity
//! via [`Caller`]. The execution-signal endpoints (start, heartbeat,
//! complete, fail) are called by the job process itself and are keyed only
//! by the job id.

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;
use inkdex_core::error::CoreError;
use inkdex_core::job::{
    CancelOutcome, JobCategory, JobCompletion, JobFilter, JobProgress, JobStatus, PipelineJob,
};
use inkdex_core::status::JobView;
use inkdex_core::trigger::TriggerRequest;
use inkdex_core::types::{DbId, ProcessHandle, Timestamp};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};
use crate::handlers::optional_json;
use crate::middleware::caller::Caller;
use crate::response::DataResponse;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct TriggerResponse {
    pub job_id: DbId,
    pub category: JobCategory,
    pub status: JobStatus,
}

#[derive(Debug, Default, Deserialize)]
pub struct CancelJobRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct StartJobRequest {
    #[serde(default)]
    pub process_handle: Option<ProcessHandle>,
}

#[derive(Debug, Deserialize)]
pub struct FailJobRequest {
    pub error_message: String,
}

/// What a running process learns from each heartbeat.
#[derive(Debug, Serialize)]
pub struct HeartbeatResponse {
    pub status: JobStatus,
    pub processed_items: i64,
    pub failed_items: i64,
    pub total_items: Option<i64>,
    pub last_heartbeat_at: Option<Timestamp>,
}

fn view(state: &AppState, job: PipelineJob) -> JobView {
    JobView::new(job, Utc::now(), state.orchestrator.config.stuck_job_delta())
}

// ---------------------------------------------------------------------------
// Operator endpoints
// ---------------------------------------------------------------------------

/// POST /api/v1/jobs
///
/// Admit a new job for a category and launch it. Returns 201 with the job
/// id, 409 when the category already has an active job, and 429 when the
/// caller exceeded its trigger budget.
pub async fn trigger_job(
    caller: Caller,
    State(state): State<AppState>,
    Json(input): Json<TriggerRequest>,
) -> AppResult<impl IntoResponse> {
    state.trigger_limiter.check(caller.as_str())?;

    let job = state
        .orchestrator
        .admission
        .trigger(input, caller.as_str())
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(DataResponse {
            data: TriggerResponse {
                job_id: job.id,
                category: job.category,
                status: job.status,
            },
        }),
    ))
}

/// GET /api/v1/jobs
///
/// List jobs newest first. Supports `category`, `status`, `limit`, and
/// `offset` query parameters.
pub async fn list_jobs(
    _caller: Caller,
    State(state): State<AppState>,
    Query(filter): Query<JobFilter>,
) -> AppResult<Json<DataResponse<Vec<JobView>>>> {
    let jobs = state.orchestrator.status.list_jobs(&filter).await?;
    Ok(Json(DataResponse { data: jobs }))
}

/// GET /api/v1/jobs/{id}
pub async fn get_job(
    _caller: Caller,
    State(state): State<AppState>,
    Path(id): Path<DbId>,
) -> AppResult<Json<DataResponse<JobView>>> {
    let job = state.orchestrator.status.get_job(id).await?;
    Ok(Json(DataResponse { data: job }))
}

/// POST /api/v1/jobs/{id}/cancel
///
/// Cancel a pending or running job, signalling its process when one is
/// recorded. Body `{ "reason": "..." }` is optional. Returns 409 when the
/// job already finished.
pub async fn cancel_job(
    caller: Caller,
    State(state): State<AppState>,
    Path(id): Path<DbId>,
    body: Bytes,
) -> AppResult<Json<DataResponse<JobView>>> {
    let input: CancelJobRequest = optional_json(&body)?;

    let outcome = state
        .orchestrator
        .lifecycle
        .cancel_by_operator(id, input.reason.as_deref(), caller.as_str())
        .await?;

    match outcome {
        CancelOutcome::Cancelled(job) => Ok(Json(DataResponse { data: view(&state, job) })),
        CancelOutcome::AlreadyTerminal(job) => Err(AppError::Core(CoreError::Conflict(format!(
            "Job {id} is already {}",
            job.status
        )))),
    }
}

// ---------------------------------------------------------------------------
// Execution signals
// ---------------------------------------------------------------------------

/// POST /api/v1/jobs/{id}/start
pub async fn start_job(
    State(state): State<AppState>,
    Path(id): Path<DbId>,
    body: Bytes,
) -> AppResult<Json<DataResponse<JobView>>> {
    let input: StartJobRequest = optional_json(&body)?;
    let job = state.orchestrator.lifecycle.start(id, input.process_handle).await?;
    Ok(Json(DataResponse { data: view(&state, job) }))
}

/// POST /api/v1/jobs/{id}/heartbeat
///
/// Merge progress counters. The response carries the job's current status;
/// a 409 means the job is no longer running and the process should stop.
pub async fn heartbeat(
    State(state): State<AppState>,
    Path(id): Path<DbId>,
    Json(progress): Json<JobProgress>,
) -> AppResult<Json<DataResponse<HeartbeatResponse>>> {
    let job = state.orchestrator.lifecycle.heartbeat(id, &progress).await?;
    Ok(Json(DataResponse {
        data: HeartbeatResponse {
            status: job.status,
            processed_items: job.processed_items,
            failed_items: job.failed_items,
            total_items: job.total_items,
            last_heartbeat_at: job.last_heartbeat_at,
        },
    }))
}

/// POST /api/v1/jobs/{id}/complete
pub async fn complete_job(
    State(state): State<AppState>,
    Path(id): Path<DbId>,
    body: Bytes,
) -> AppResult<Json<DataResponse<JobView>>> {
    let completion: JobCompletion = optional_json(&body)?;
    let job = state.orchestrator.lifecycle.complete(id, &completion).await?;
    Ok(Json(DataResponse { data: view(&state, job) }))
}

/// POST /api/v1/jobs/{id}/fail
pub async fn fail_job(
    State(state): State<AppState>,
    Path(id): Path<DbId>,
    Json(input): Json<FailJobRequest>,
) -> AppResult<Json<DataResponse<JobView>>> {
    let job = state
        .orchestrator
        .lifecycle
        .fail(id, &input.error_message)
        .await?;
    Ok(Json(DataResponse { data: view(&state, job) }))
}
