//! Application router: the route tree plus the middleware stack.
//!
//! `main.rs` and the integration tests both build the app through
//! [`build_app_router`], so tests exercise the same stack production runs.

use std::time::Duration;

use axum::http::header::{CONTENT_TYPE, RETRY_AFTER};
use axum::http::{HeaderName, Method, StatusCode};
use axum::Router;
use tower::ServiceBuilder;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::CorsLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;

use crate::config::ServerConfig;
use crate::middleware::caller::CALLER_HEADER;
use crate::routes;
use crate::state::AppState;

/// Correlates a request with its log lines; echoed on every response.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Build the full application [`Router`].
///
/// `/health` sits at the root for load balancers; everything else lives
/// under `/api/v1`. Layers run top to bottom on the way in:
///
/// 1. CORS (dashboard origins only)
/// 2. Assign a request ID
/// 3. Trace the request, inside the request-ID span
/// 4. Copy the request ID onto the response
/// 5. Time out slow handlers with 408
/// 6. Turn handler panics into 500s
pub fn build_app_router(state: AppState, config: &ServerConfig) -> Router {
    let request_id = HeaderName::from_static(REQUEST_ID_HEADER);

    let middleware = ServiceBuilder::new()
        .layer(SetRequestIdLayer::new(request_id.clone(), MakeRequestUuid))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(PropagateRequestIdLayer::new(request_id))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(config.request_timeout_secs),
        ))
        .layer(CatchPanicLayer::new());

    Router::new()
        .merge(routes::health::router())
        .nest("/api/v1", routes::api_routes())
        .layer(middleware)
        .layer(build_cors_layer(config))
        .with_state(state)
}

/// CORS for the operator dashboard.
///
/// Every endpoint is GET or POST. The dashboard sends the caller identity
/// header set by the upstream auth proxy, and reads `Retry-After` after a
/// throttled trigger plus the request ID for support reports.
///
/// Panics at startup if any configured origin is invalid.
pub fn build_cors_layer(config: &ServerConfig) -> CorsLayer {
    let origins: Vec<_> = config
        .cors_origins
        .iter()
        .map(|o| {
            o.parse()
                .unwrap_or_else(|e| panic!("Invalid CORS origin '{o}': {e}"))
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([CONTENT_TYPE, HeaderName::from_static(CALLER_HEADER)])
        .expose_headers([RETRY_AFTER, HeaderName::from_static(REQUEST_ID_HEADER)])
        .allow_credentials(true)
        .max_age(Duration::from_secs(3600))
}
