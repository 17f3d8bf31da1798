//! Worker runtime against a real orchestrator served on a local port.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use inkdex_api::config::ServerConfig;
use inkdex_api::router::build_app_router;
use inkdex_api::state::AppState;
use inkdex_core::capability::{AllowAll, IdentityProvider, JobLauncher, ProcessTerminator};
use inkdex_core::config::OrchestratorConfig;
use inkdex_core::error::CoreError;
use inkdex_core::job::{JobCompletion, JobProgress, JobStatus, PipelineJob};
use inkdex_core::trigger::TriggerRequest;
use inkdex_core::types::{DbId, ProcessHandle};
use inkdex_core::worker_pool::{RegisterWorker, Worker, WorkerIdentity};
use inkdex_pipeline::executor::{CommandSpec, CommandTable};
use inkdex_pipeline::{Capabilities, MemoryStore, Orchestrator, SharedStore};
use inkdex_worker::client::{ClientError, OrchestratorClient, RateLimitReport};
use inkdex_worker::session::{HeartbeatVerdict, JobSession};
use tokio::sync::watch;

struct NoopLauncher;

#[async_trait]
impl JobLauncher for NoopLauncher {
    async fn launch(&self, _job: &PipelineJob) -> Result<(), CoreError> {
        Ok(())
    }
}

struct NoopTerminator;

impl ProcessTerminator for NoopTerminator {
    fn terminate(&self, _handle: ProcessHandle) -> bool {
        true
    }
}

struct NoIdentity;

#[async_trait]
impl IdentityProvider for NoIdentity {
    async fn fresh_identity(&self, _worker: &Worker) -> Result<WorkerIdentity, CoreError> {
        Err(CoreError::IdentityRotation("not in tests".to_string()))
    }
}

fn server_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        shutdown_timeout_secs: 5,
        database_url: None,
        trigger_allowlist: Vec::new(),
        trigger_rate_limit: 100,
        trigger_rate_window_secs: 3600,
        identity_provider_url: None,
        job_workdir: None,
    }
}

async fn serve() -> (Orchestrator, Arc<OrchestratorClient>) {
    let store: SharedStore = Arc::new(MemoryStore::new());
    let orchestrator = Orchestrator::new(
        store,
        OrchestratorConfig::default(),
        Capabilities {
            authorizer: Arc::new(AllowAll),
            launcher: Arc::new(NoopLauncher),
            terminator: Arc::new(NoopTerminator),
            identity: Arc::new(NoIdentity),
        },
    );
    serve_orchestrator(orchestrator).await
}

/// Serve the full router on an ephemeral port.
async fn serve_orchestrator(orchestrator: Orchestrator) -> (Orchestrator, Arc<OrchestratorClient>) {
    let config = server_config();
    let app = build_app_router(AppState::new(orchestrator.clone(), config.clone()), &config);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let client = OrchestratorClient::new(&format!("http://{addr}/"));
    (orchestrator, Arc::new(client))
}

async fn pending_job(orchestrator: &Orchestrator) -> DbId {
    let request = TriggerRequest {
        category: "scrape".to_string(),
        scope: "all".to_string(),
        ..Default::default()
    };
    orchestrator.admission.trigger(request, "ops").await.unwrap().id
}

#[tokio::test]
async fn register_check_in_and_report() {
    let (_orchestrator, client) = serve().await;

    let worker = client
        .register(&RegisterWorker {
            name: Some("scraper-a".to_string()),
            instance_id: "i-1".to_string(),
            ip_address: "1.2.3.4".to_string(),
        })
        .await
        .unwrap();
    assert_eq!(worker.name, "scraper-a");

    let checked = client.check_in(worker.id).await.unwrap();
    assert!(checked.last_seen_at >= worker.last_seen_at);

    let event = client
        .report_rate_limit(
            worker.id,
            &RateLimitReport {
                ip_address: "1.2.3.4".to_string(),
                error_code: "429".to_string(),
                error_message: Some("Please wait a few minutes".to_string()),
                subject_handle: None,
            },
        )
        .await
        .unwrap();
    assert_eq!(event.worker_id, worker.id);
    assert_eq!(event.error_code, "429");
}

#[tokio::test]
async fn api_errors_carry_status_and_code() {
    let (_orchestrator, client) = serve().await;

    let err = client.check_in(404).await.unwrap_err();
    match err {
        ClientError::Api { status, ref code, .. } => {
            assert_eq!(status, 404);
            assert_eq!(code, "NOT_FOUND");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn session_reports_progress_and_completes() {
    let (orchestrator, client) = serve().await;
    let job_id = pending_job(&orchestrator).await;

    let session = JobSession::start(client, job_id, Some(999)).await.unwrap();
    let verdict = session
        .report(&JobProgress {
            processed_items: 30,
            failed_items: 2,
            total_items: None,
        })
        .await
        .unwrap();
    assert_eq!(verdict, HeartbeatVerdict::Continue);

    let view = session
        .complete(&JobCompletion {
            total_items: Some(30),
            result_summary: None,
        })
        .await
        .unwrap();
    assert_eq!(view.job.status, JobStatus::Completed);
    assert_eq!(view.job.total_items, Some(32));
}

#[tokio::test]
async fn session_stops_when_job_is_cancelled() {
    let (orchestrator, client) = serve().await;
    let job_id = pending_job(&orchestrator).await;

    let session = JobSession::start(client, job_id, None).await.unwrap();
    let cancelled = session.cancelled();
    let (progress_tx, progress_rx) = watch::channel(JobProgress::default());
    let heartbeats = session.spawn_heartbeats(progress_rx, Duration::from_millis(20));

    progress_tx
        .send(JobProgress {
            processed_items: 5,
            failed_items: 0,
            total_items: Some(100),
        })
        .unwrap();

    orchestrator
        .lifecycle
        .cancel(job_id, "operator stop", "ops")
        .await
        .unwrap();

    tokio::time::timeout(Duration::from_secs(5), cancelled.cancelled())
        .await
        .expect("session never noticed the cancel");
    tokio::time::timeout(Duration::from_secs(5), heartbeats)
        .await
        .expect("heartbeat task did not exit")
        .unwrap();

    let job = orchestrator.lifecycle.get(job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Cancelled);
}

#[cfg(unix)]
#[tokio::test]
async fn session_attaches_to_launched_process_and_stops_on_cancel() {
    use inkdex_core::job::JobCategory;
    use inkdex_pipeline::terminator::SignalTerminator;

    let mut commands = CommandTable::default();
    commands.set(JobCategory::Scrape, CommandSpec::new("sh", &["-c", "sleep 30"]));
    let store: SharedStore = Arc::new(MemoryStore::new());
    let orchestrator = Orchestrator::with_process_launcher(
        store,
        OrchestratorConfig::default(),
        Arc::new(AllowAll),
        Arc::new(SignalTerminator),
        Arc::new(NoIdentity),
        commands,
    );
    let (orchestrator, client) = serve_orchestrator(orchestrator).await;

    let job_id = pending_job(&orchestrator).await;
    let launched = orchestrator.lifecycle.get(job_id).await.unwrap();
    assert_eq!(launched.status, JobStatus::Running);
    assert!(launched.process_handle.is_some());

    // The launcher already started the job; only attaching is possible.
    let err = client.start_job(job_id, None).await.unwrap_err();
    assert!(err.is_conflict());

    let session = JobSession::attach(Arc::clone(&client), job_id).await.unwrap();
    let verdict = session
        .report(&JobProgress {
            processed_items: 3,
            failed_items: 0,
            total_items: None,
        })
        .await
        .unwrap();
    assert_eq!(verdict, HeartbeatVerdict::Continue);

    let cancelled = session.cancelled();
    let (_progress_tx, progress_rx) = watch::channel(JobProgress::default());
    let heartbeats = session.spawn_heartbeats(progress_rx, Duration::from_millis(20));

    orchestrator
        .lifecycle
        .cancel(job_id, "operator stop", "ops")
        .await
        .unwrap();

    tokio::time::timeout(Duration::from_secs(5), cancelled.cancelled())
        .await
        .expect("session never noticed the cancel");
    tokio::time::timeout(Duration::from_secs(5), heartbeats)
        .await
        .expect("heartbeat task did not exit")
        .unwrap();

    let job = orchestrator.lifecycle.get(job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Cancelled);
    assert_eq!(job.processed_items, 3);
}

#[tokio::test]
async fn attach_is_refused_for_a_job_that_is_not_running() {
    let (orchestrator, client) = serve().await;
    let job_id = pending_job(&orchestrator).await;

    let err = JobSession::attach(client, job_id).await.err().unwrap();
    assert!(err.is_conflict());
}
