#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request, Response};
use axum::Router;
use http_body_util::BodyExt;
use inkdex_api::config::ServerConfig;
use inkdex_api::middleware::caller::CALLER_HEADER;
use inkdex_api::router::build_app_router;
use inkdex_api::state::AppState;
use inkdex_core::capability::{AllowAll, IdentityProvider, JobLauncher, ProcessTerminator};
use inkdex_core::config::OrchestratorConfig;
use inkdex_core::error::CoreError;
use inkdex_core::job::PipelineJob;
use inkdex_core::types::{DbId, ProcessHandle};
use inkdex_core::worker_pool::{Worker, WorkerIdentity};
use inkdex_pipeline::{Capabilities, MemoryStore, Orchestrator, SharedStore};
use tower::ServiceExt;

pub const OPERATOR: &str = "ops@example.com";

/// Records launches without spawning anything.
#[derive(Default)]
pub struct RecordingLauncher {
    pub launched: Mutex<Vec<DbId>>,
}

#[async_trait]
impl JobLauncher for RecordingLauncher {
    async fn launch(&self, job: &PipelineJob) -> Result<(), CoreError> {
        self.launched.lock().unwrap().push(job.id);
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingTerminator {
    pub signalled: Mutex<Vec<ProcessHandle>>,
}

impl ProcessTerminator for RecordingTerminator {
    fn terminate(&self, handle: ProcessHandle) -> bool {
        self.signalled.lock().unwrap().push(handle);
        true
    }
}

/// Hands out `10.0.0.1`, `10.0.0.2`, ... on each request.
#[derive(Default)]
pub struct SequentialIdentity {
    next: AtomicU32,
}

#[async_trait]
impl IdentityProvider for SequentialIdentity {
    async fn fresh_identity(&self, worker: &Worker) -> Result<WorkerIdentity, CoreError> {
        let n = self.next.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(WorkerIdentity {
            instance_id: format!("{}-i{n}", worker.name),
            ip_address: format!("10.0.0.{n}"),
        })
    }
}

/// Build a test `ServerConfig` with safe defaults.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        shutdown_timeout_secs: 30,
        database_url: None,
        trigger_allowlist: Vec::new(),
        trigger_rate_limit: 100,
        trigger_rate_window_secs: 3600,
        identity_provider_url: None,
        job_workdir: None,
    }
}

pub struct TestApp {
    pub router: Router,
    pub orchestrator: Orchestrator,
    pub store: Arc<MemoryStore>,
    pub launcher: Arc<RecordingLauncher>,
    pub terminator: Arc<RecordingTerminator>,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with(test_config(), OrchestratorConfig::default())
    }

    /// Build the full application router, with all middleware, over a fresh
    /// in-memory store.
    pub fn with(server: ServerConfig, engine: OrchestratorConfig) -> Self {
        let store = Arc::new(MemoryStore::new());
        let launcher = Arc::new(RecordingLauncher::default());
        let terminator = Arc::new(RecordingTerminator::default());
        let shared: SharedStore = store.clone();

        let orchestrator = Orchestrator::new(
            shared,
            engine,
            Capabilities {
                authorizer: Arc::new(AllowAll),
                launcher: launcher.clone(),
                terminator: terminator.clone(),
                identity: Arc::new(SequentialIdentity::default()),
            },
        );
        let state = AppState::new(orchestrator.clone(), server.clone());
        let router = build_app_router(state, &server);

        Self {
            router,
            orchestrator,
            store,
            launcher,
            terminator,
        }
    }

    pub async fn get(&self, uri: &str, caller: Option<&str>) -> Response<Body> {
        self.send(Method::GET, uri, caller, None).await
    }

    pub async fn post(
        &self,
        uri: &str,
        caller: Option<&str>,
        body: Option<serde_json::Value>,
    ) -> Response<Body> {
        self.send(Method::POST, uri, caller, body).await
    }

    async fn send(
        &self,
        method: Method,
        uri: &str,
        caller: Option<&str>,
        body: Option<serde_json::Value>,
    ) -> Response<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(caller) = caller {
            builder = builder.header(CALLER_HEADER, caller);
        }
        let request = match body {
            Some(json) => builder
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(&json).unwrap()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        self.router.clone().oneshot(request).await.unwrap()
    }

    /// Trigger a job as [`OPERATOR`] and return its id.
    pub async fn trigger(&self, category: &str) -> DbId {
        let response = self
            .post(
                "/api/v1/jobs",
                Some(OPERATOR),
                Some(serde_json::json!({ "category": category, "scope": "all" })),
            )
            .await;
        assert_eq!(response.status(), 201);
        body_json(response).await["data"]["job_id"].as_i64().unwrap()
    }

    /// Register a worker and return its id.
    pub async fn register(&self, ip: &str) -> DbId {
        let response = self
            .post(
                "/api/v1/workers",
                None,
                Some(serde_json::json!({ "instance_id": "i-initial", "ip_address": ip })),
            )
            .await;
        assert_eq!(response.status(), 201);
        body_json(response).await["data"]["id"].as_i64().unwrap()
    }
}

/// Collect a response body and parse it as JSON.
pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}
