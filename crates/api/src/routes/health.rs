use axum::extract::State;
use axum::http::StatusCode;
use axum::{routing::get, Json, Router};
use serde::Serialize;

use crate::state::AppState;

/// Health check response payload.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Overall service status.
    pub status: &'static str,
    /// Crate version from Cargo.toml.
    pub version: &'static str,
    /// Whether the backing store answered.
    pub store_healthy: bool,
}

/// GET /health -- liveness plus store health. Answers 503 when the store
/// is unreachable so load balancers can route around the instance.
async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let store_healthy = match state.orchestrator.store.health_check().await {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(error = %e, "Store health check failed");
            false
        }
    };

    let (code, status) = if store_healthy {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "degraded")
    };

    (
        code,
        Json(HealthResponse {
            status,
            version: env!("CARGO_PKG_VERSION"),
            store_healthy,
        }),
    )
}

/// Mount health check routes (root level, not under `/api/v1`).
pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
