//! Identity providers: where rotating workers get a fresh instance and IP.

use std::time::Duration;

use async_trait::async_trait;
use inkdex_core::capability::IdentityProvider;
use inkdex_core::error::CoreError;
use inkdex_core::worker_pool::{Worker, WorkerIdentity};
use serde::Serialize;

/// Asks an external provisioning service for a replacement identity.
///
/// `POST {endpoint}` with the worker's current identity; the service answers
/// `200` with `{ "instance_id": ..., "ip_address": ... }`.
pub struct HttpIdentityProvider {
    client: reqwest::Client,
    endpoint: String,
}

#[derive(Serialize)]
struct RotationRequest<'a> {
    worker_id: i64,
    worker_name: &'a str,
    instance_id: &'a str,
    ip_address: &'a str,
}

impl HttpIdentityProvider {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, CoreError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CoreError::Internal(format!("identity client: {e}")))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl IdentityProvider for HttpIdentityProvider {
    async fn fresh_identity(&self, worker: &Worker) -> Result<WorkerIdentity, CoreError> {
        let body = RotationRequest {
            worker_id: worker.id,
            worker_name: &worker.name,
            instance_id: &worker.instance_id,
            ip_address: &worker.ip_address,
        };
        let response = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| CoreError::IdentityRotation(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(CoreError::IdentityRotation(format!(
                "provider answered {status}"
            )));
        }
        response
            .json::<WorkerIdentity>()
            .await
            .map_err(|e| CoreError::IdentityRotation(format!("malformed response: {e}")))
    }
}

/// Used when no provider is configured. Every request fails, so rotating
/// workers stay out of assignment until an operator intervenes.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableIdentityProvider;

#[async_trait]
impl IdentityProvider for UnavailableIdentityProvider {
    async fn fresh_identity(&self, _worker: &Worker) -> Result<WorkerIdentity, CoreError> {
        Err(CoreError::IdentityRotation(
            "no identity provider configured".to_string(),
        ))
    }
}
