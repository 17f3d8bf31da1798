//! Shared query parameter types for API handlers.

use serde::Deserialize;

/// `?limit=` for feed endpoints. Clamped by the status aggregator.
#[derive(Debug, Default, Deserialize)]
pub struct LimitParams {
    pub limit: Option<i64>,
}
