pub mod health;
pub mod jobs;
pub mod orchestrator;
pub mod workers;

use axum::Router;

use crate::state::AppState;

/// Build the `/api/v1` route tree.
///
/// ```text
/// /jobs                                   trigger (POST), list (GET)
/// /jobs/{id}                              get
/// /jobs/{id}/cancel                       operator cancel (POST)
/// /jobs/{id}/start                        execution signal (POST)
/// /jobs/{id}/heartbeat                    execution signal (POST)
/// /jobs/{id}/complete                     execution signal (POST)
/// /jobs/{id}/fail                         execution signal (POST)
///
/// /workers                                register (POST), list (GET)
/// /workers/{id}                           get
/// /workers/{id}/check-in                  agent check-in (POST)
/// /workers/{id}/rate-limit-events         rate-limit report (POST, 202)
/// /workers/{id}/rotate                    operator rotation (POST)
/// /workers/{id}/shutdown                  operator shutdown (POST)
///
/// /orchestrator/status                    combined dashboard read
/// /orchestrator/fleet                     fleet summary
/// /orchestrator/queue                     queue stats
/// /orchestrator/rotations                 rotation history
/// /orchestrator/rate-limits               rate-limit feed
/// /orchestrator/audit                     operator audit trail
/// /orchestrator/reap                      on-demand reaper sweep (POST)
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .nest("/jobs", jobs::router())
        .nest("/workers", workers::router())
        .nest("/orchestrator", orchestrator::router())
}
