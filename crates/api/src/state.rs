use std::sync::Arc;

use inkdex_pipeline::Orchestrator;

use crate::config::ServerConfig;
use crate::middleware::trigger_limit::TriggerRateLimiter;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// Cheaply cloneable: every field is an `Arc` or a clone of `Arc`s.
#[derive(Clone)]
pub struct AppState {
    /// The orchestration engine and its store.
    pub orchestrator: Orchestrator,
    pub config: Arc<ServerConfig>,
    pub trigger_limiter: Arc<TriggerRateLimiter>,
}

impl AppState {
    pub fn new(orchestrator: Orchestrator, config: ServerConfig) -> Self {
        let trigger_limiter = Arc::new(TriggerRateLimiter::new(
            config.trigger_rate_limit,
            config.trigger_rate_window(),
        ));
        Self {
            orchestrator,
            config: Arc::new(config),
            trigger_limiter,
        }
    }
}
