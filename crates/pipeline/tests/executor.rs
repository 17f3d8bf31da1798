#![cfg(unix)]

use std::sync::Arc;
use std::time::Duration;

use inkdex_core::capability::AllowAll;
use inkdex_core::config::OrchestratorConfig;
use inkdex_core::job::{JobCategory, JobStatus, PipelineJob};
use inkdex_core::trigger::TriggerRequest;
use inkdex_core::types::DbId;
use inkdex_pipeline::executor::{CommandSpec, CommandTable};
use inkdex_pipeline::identity::UnavailableIdentityProvider;
use inkdex_pipeline::terminator::SignalTerminator;
use inkdex_pipeline::{MemoryStore, Orchestrator, SharedStore};

fn orchestrator(script: &str, max_runtime: Duration) -> Orchestrator {
    let mut commands = CommandTable::default();
    commands.set(JobCategory::Scrape, CommandSpec::new("sh", &["-c", script]));

    let config = OrchestratorConfig {
        max_job_runtime: max_runtime,
        kill_grace: Duration::from_millis(200),
        ..Default::default()
    };
    let store: SharedStore = Arc::new(MemoryStore::new());
    Orchestrator::with_process_launcher(
        store,
        config,
        Arc::new(AllowAll),
        Arc::new(SignalTerminator),
        Arc::new(UnavailableIdentityProvider),
        commands,
    )
}

fn scrape() -> TriggerRequest {
    TriggerRequest {
        category: "scrape".to_string(),
        scope: "all".to_string(),
        limit: Some(7),
        ..Default::default()
    }
}

async fn wait_for_terminal(o: &Orchestrator, id: DbId) -> PipelineJob {
    for _ in 0..200 {
        let job = o.lifecycle.get(id).await.unwrap();
        if job.status.is_terminal() {
            return job;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("job {id} did not finish");
}

#[tokio::test]
async fn successful_process_completes_job() {
    let o = orchestrator(
        r#"[ "$PIPELINE_LIMIT" = "7" ] && [ -n "$PIPELINE_RUN_ID" ] && echo collected"#,
        Duration::from_secs(30),
    );
    let job = o.admission.trigger(scrape(), "ops").await.unwrap();

    let done = wait_for_terminal(&o, job.id).await;
    assert_eq!(done.status, JobStatus::Completed);
    let summary = done.result_summary.unwrap();
    assert_eq!(summary["exit_code"], 0);
    assert_eq!(summary["timed_out"], false);
    assert_eq!(summary["stdout_bytes"], 10);
}

#[tokio::test]
async fn failing_process_records_stderr_tail() {
    let o = orchestrator("echo 'quota exhausted' >&2; exit 3", Duration::from_secs(30));
    let job = o.admission.trigger(scrape(), "ops").await.unwrap();

    let done = wait_for_terminal(&o, job.id).await;
    assert_eq!(done.status, JobStatus::Failed);
    assert_eq!(done.error_message.as_deref(), Some("quota exhausted"));
}

#[tokio::test]
async fn overrunning_process_is_stopped_and_failed() {
    let o = orchestrator("sleep 30", Duration::from_millis(300));
    let job = o.admission.trigger(scrape(), "ops").await.unwrap();

    let done = wait_for_terminal(&o, job.id).await;
    assert_eq!(done.status, JobStatus::Failed);
    assert!(done.error_message.unwrap().contains("timed out"));
}

#[tokio::test]
async fn cancelled_job_keeps_cancelled_status() {
    let o = orchestrator("sleep 30", Duration::from_secs(60));
    let job = o.admission.trigger(scrape(), "ops").await.unwrap();
    let running = o.lifecycle.get(job.id).await.unwrap();
    assert_eq!(running.status, JobStatus::Running);
    assert!(running.process_handle.is_some());

    o.lifecycle.cancel(job.id, "operator stop", "ops").await.unwrap();

    // Give the supervisor time to observe the exit.
    tokio::time::sleep(Duration::from_millis(300)).await;
    let after = o.lifecycle.get(job.id).await.unwrap();
    assert_eq!(after.status, JobStatus::Cancelled);
}

#[tokio::test]
async fn category_without_command_is_released() {
    let o = orchestrator("true", Duration::from_secs(5));
    let request = TriggerRequest {
        category: "embed".to_string(),
        scope: "all".to_string(),
        ..Default::default()
    };
    assert!(o.admission.trigger(request, "ops").await.is_err());
    let jobs = o.status.list_jobs(&Default::default()).await.unwrap();
    assert_eq!(jobs[0].job.status, JobStatus::Cancelled);
}
