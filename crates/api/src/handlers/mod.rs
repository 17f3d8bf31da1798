//! Request handlers.
//!
//! Each submodule covers one resource. Handlers stay thin: they extract and
//! validate HTTP input, delegate to the [`inkdex_pipeline::Orchestrator`]
//! components on [`AppState`](crate::state::AppState), and map errors via
//! [`AppError`].

pub mod jobs;
pub mod orchestrator;
pub mod workers;

use axum::body::Bytes;
use serde::de::DeserializeOwned;

use crate::error::{AppError, AppResult};

/// Parse an optional JSON body. An empty body yields `T::default()`.
pub(crate) fn optional_json<T>(body: &Bytes) -> AppResult<T>
where
    T: DeserializeOwned + Default,
{
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|e| AppError::BadRequest(format!("Invalid JSON body: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Default, Deserialize)]
    struct Body {
        reason: Option<String>,
    }

    #[test]
    fn empty_body_is_default() {
        let parsed: Body = optional_json(&Bytes::from_static(b"  ")).unwrap();
        assert!(parsed.reason.is_none());
    }

    #[test]
    fn body_is_parsed() {
        let parsed: Body = optional_json(&Bytes::from_static(br#"{"reason":"x"}"#)).unwrap();
        assert_eq!(parsed.reason.as_deref(), Some("x"));
    }

    #[test]
    fn malformed_body_is_bad_request() {
        let err = optional_json::<Body>(&Bytes::from_static(b"{")).unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }
}
