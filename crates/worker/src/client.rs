//! HTTP client for the orchestrator's worker-facing endpoints.

use inkdex_core::job::{JobCompletion, JobProgress, JobStatus};
use inkdex_core::rotation::RateLimitEvent;
use inkdex_core::status::JobView;
use inkdex_core::types::{DbId, ProcessHandle, Timestamp};
use inkdex_core::worker_pool::{RegisterWorker, Worker};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Errors from the orchestrator client.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The HTTP request itself failed (network, DNS, TLS, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The orchestrator answered with a non-2xx status.
    #[error("Orchestrator error ({status}, {code}): {message}")]
    Api {
        status: u16,
        /// Machine-readable code from the error body, or `UNKNOWN`.
        code: String,
        message: String,
    },
}

impl ClientError {
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Api { status, .. } => Some(*status),
            ClientError::Request(e) => e.status().map(|s| s.as_u16()),
        }
    }

    /// The orchestrator refused a state change, e.g. a heartbeat for a job
    /// that is no longer running.
    pub fn is_conflict(&self) -> bool {
        self.status() == Some(409)
    }
}

/// Rate-limit rejection observed by a worker.
#[derive(Debug, Clone, Serialize)]
pub struct RateLimitReport {
    pub ip_address: String,
    pub error_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject_handle: Option<String>,
}

/// Job status as returned by a heartbeat.
#[derive(Debug, Clone, Deserialize)]
pub struct HeartbeatAck {
    pub status: JobStatus,
    pub processed_items: i64,
    pub failed_items: i64,
    pub total_items: Option<i64>,
    pub last_heartbeat_at: Option<Timestamp>,
}

#[derive(Deserialize)]
struct Envelope<T> {
    data: T,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
    code: String,
}

/// Client for one orchestrator instance.
#[derive(Debug, Clone)]
pub struct OrchestratorClient {
    client: reqwest::Client,
    base_url: String,
}

impl OrchestratorClient {
    /// * `base_url` - Server root, e.g. `http://orchestrator:3000`.
    pub fn new(base_url: &str) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    /// Reuse an existing [`reqwest::Client`].
    pub fn with_client(client: reqwest::Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v1{path}", self.base_url)
    }

    // ---- fleet ----

    pub async fn register(&self, input: &RegisterWorker) -> Result<Worker, ClientError> {
        self.post(&self.url("/workers"), Some(input)).await
    }

    pub async fn check_in(&self, worker_id: DbId) -> Result<Worker, ClientError> {
        self.post::<(), _>(&self.url(&format!("/workers/{worker_id}/check-in")), None)
            .await
    }

    /// Report a rate-limit rejection. The orchestrator decides on rotation
    /// asynchronously.
    pub async fn report_rate_limit(
        &self,
        worker_id: DbId,
        report: &RateLimitReport,
    ) -> Result<RateLimitEvent, ClientError> {
        self.post(
            &self.url(&format!("/workers/{worker_id}/rate-limit-events")),
            Some(report),
        )
        .await
    }

    // ---- execution signals ----

    pub async fn start_job(
        &self,
        job_id: DbId,
        process_handle: Option<ProcessHandle>,
    ) -> Result<JobView, ClientError> {
        let body = serde_json::json!({ "process_handle": process_handle });
        self.post(&self.url(&format!("/jobs/{job_id}/start")), Some(&body))
            .await
    }

    pub async fn heartbeat(
        &self,
        job_id: DbId,
        progress: &JobProgress,
    ) -> Result<HeartbeatAck, ClientError> {
        self.post(&self.url(&format!("/jobs/{job_id}/heartbeat")), Some(progress))
            .await
    }

    pub async fn complete_job(
        &self,
        job_id: DbId,
        completion: &JobCompletion,
    ) -> Result<JobView, ClientError> {
        self.post(&self.url(&format!("/jobs/{job_id}/complete")), Some(completion))
            .await
    }

    pub async fn fail_job(&self, job_id: DbId, error_message: &str) -> Result<JobView, ClientError> {
        let body = serde_json::json!({ "error_message": error_message });
        self.post(&self.url(&format!("/jobs/{job_id}/fail")), Some(&body))
            .await
    }

    // ---- private helpers ----

    async fn post<B, T>(&self, url: &str, body: Option<&B>) -> Result<T, ClientError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let mut request = self.client.post(url);
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request.send().await?;
        Self::parse_response(response).await
    }

    /// Unwrap the `{ "data": ... }` envelope, or turn an error body into
    /// [`ClientError::Api`].
    async fn parse_response<T: DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ClientError> {
        let status = response.status();
        if status.is_success() {
            let envelope: Envelope<T> = response.json().await?;
            return Ok(envelope.data);
        }

        let text = response.text().await.unwrap_or_default();
        let (code, message) = match serde_json::from_str::<ErrorBody>(&text) {
            Ok(body) => (body.code, body.error),
            Err(_) => ("UNKNOWN".to_string(), text),
        };
        Err(ClientError::Api {
            status: status.as_u16(),
            code,
            message,
        })
    }
}
