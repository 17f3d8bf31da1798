use axum::routing::{get, post};
use axum::Router;

use crate::handlers::jobs;
use crate::state::AppState;

/// Routes mounted at `/jobs`.
///
/// ```text
/// POST /                -> trigger_job
/// GET  /                -> list_jobs
/// GET  /{id}            -> get_job
/// POST /{id}/cancel     -> cancel_job
/// POST /{id}/start      -> start_job
/// POST /{id}/heartbeat  -> heartbeat
/// POST /{id}/complete   -> complete_job
/// POST /{id}/fail       -> fail_job
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(jobs::list_jobs).post(jobs::trigger_job))
        .route("/{id}", get(jobs::get_job))
        .route("/{id}/cancel", post(jobs::cancel_job))
        .route("/{id}/start", post(jobs::start_job))
        .route("/{id}/heartbeat", post(jobs::heartbeat))
        .route("/{id}/complete", post(jobs::complete_job))
        .route("/{id}/fail", post(jobs::fail_job))
}
