//! Route definitions for the worker fleet.

use axum::routing::{get, post};
use axum::Router;

use crate::handlers::workers;
use crate::state::AppState;

/// Routes mounted at `/workers`.
///
/// Register, check-in, and rate-limit reports are agent calls and need no
/// caller identity. Listing, rotation, and shutdown are operator calls.
///
/// ```text
/// POST /                        -> register_worker
/// GET  /                        -> list_workers
/// GET  /{id}                    -> get_worker
/// POST /{id}/check-in           -> check_in
/// POST /{id}/rate-limit-events  -> report_rate_limit
/// POST /{id}/rotate             -> rotate_worker
/// POST /{id}/shutdown           -> shutdown_worker
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(workers::list_workers).post(workers::register_worker))
        .route("/{id}", get(workers::get_worker))
        .route("/{id}/check-in", post(workers::check_in))
        .route("/{id}/rate-limit-events", post(workers::report_rate_limit))
        .route("/{id}/rotate", post(workers::rotate_worker))
        .route("/{id}/shutdown", post(workers::shutdown_worker))
}
