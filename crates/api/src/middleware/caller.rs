//! Caller identity extractor.
//!
//! Authentication happens upstream; by the time a request reaches this
//! service the authenticated identity is in the `x-caller-identity` header.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use inkdex_core::error::CoreError;

use crate::error::AppError;
use crate::state::AppState;

pub const CALLER_HEADER: &str = "x-caller-identity";

/// Longest identity accepted from the header.
const MAX_CALLER_LEN: usize = 320;

/// Identity of the operator making the request.
///
/// ```ignore
/// async fn my_handler(caller: Caller) -> AppResult<Json<()>> {
///     tracing::info!(caller = %caller.0, "handling request");
///     Ok(Json(()))
/// }
/// ```
#[derive(Debug, Clone)]
pub struct Caller(pub String);

impl Caller {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromRequestParts<AppState> for Caller {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(CALLER_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| {
                AppError::Core(CoreError::Unauthorized(format!(
                    "Missing {CALLER_HEADER} header"
                )))
            })?;

        if raw.len() > MAX_CALLER_LEN {
            return Err(AppError::Core(CoreError::Unauthorized(
                "Caller identity is too long".into(),
            )));
        }
        Ok(Caller(raw.to_string()))
    }
}
