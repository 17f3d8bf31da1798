use axum::routing::{get, post};
use axum::Router;

use crate::handlers::orchestrator;
use crate::state::AppState;

/// Routes mounted at `/orchestrator`.
///
/// ```text
/// GET  /status       -> status
/// GET  /fleet        -> fleet
/// GET  /queue        -> queue
/// GET  /rotations    -> rotations
/// GET  /rate-limits  -> rate_limits
/// GET  /audit        -> audit
/// POST /reap         -> reap
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/status", get(orchestrator::status))
        .route("/fleet", get(orchestrator::fleet))
        .route("/queue", get(orchestrator::queue))
        .route("/rotations", get(orchestrator::rotations))
        .route("/rate-limits", get(orchestrator::rate_limits))
        .route("/audit", get(orchestrator::audit))
        .route("/reap", post(orchestrator::reap))
}
