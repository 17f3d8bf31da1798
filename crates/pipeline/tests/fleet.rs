mod common;

use assert_matches::assert_matches;
use chrono::{TimeDelta, Utc};
use inkdex_core::error::CoreError;
use inkdex_core::rotation::{IgnoreReason, NewRateLimitEvent};
use inkdex_core::store::{AuditLog, OrchestratorLog, RateLimitLog};
use inkdex_core::types::DbId;
use inkdex_core::worker_pool::{RegisterWorker, Worker, WorkerStatus};
use inkdex_pipeline::rotation::RotationOutcome;

use common::{harness, Harness};

async fn register(h: &Harness, name: &str, ip: &str) -> Worker {
    h.orchestrator
        .fleet
        .register(RegisterWorker {
            name: Some(name.to_string()),
            instance_id: format!("i-{name}"),
            ip_address: ip.to_string(),
        })
        .await
        .unwrap()
}

fn event(worker_id: DbId, ip: &str) -> NewRateLimitEvent {
    NewRateLimitEvent {
        worker_id,
        ip_address: ip.to_string(),
        error_code: "429".to_string(),
        error_message: Some("Please wait a few minutes".to_string()),
        subject_handle: Some("some_artist".to_string()),
    }
}

// ---------------------------------------------------------------------------
// Registration and check-ins
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unnamed_workers_get_sequential_names() {
    let h = harness();
    let mut names = Vec::new();
    for i in 0..3 {
        let worker = h
            .orchestrator
            .fleet
            .register(RegisterWorker {
                name: None,
                instance_id: format!("i-{i}"),
                ip_address: format!("10.0.0.{}", i + 1),
            })
            .await
            .unwrap();
        names.push(worker.name);
    }
    assert_eq!(names, ["worker-01", "worker-02", "worker-03"]);
}

#[tokio::test]
async fn registration_rejects_bad_identity() {
    let h = harness();
    let result = h
        .orchestrator
        .fleet
        .register(RegisterWorker {
            name: Some("worker-01".to_string()),
            instance_id: "i-1".to_string(),
            ip_address: "not-an-ip".to_string(),
        })
        .await;
    assert_matches!(result, Err(CoreError::Validation(_)));
}

#[tokio::test]
async fn re_registration_updates_identity() {
    let h = harness();
    let first = register(&h, "worker-01", "10.0.0.1").await;
    let again = register(&h, "worker-01", "10.0.0.9").await;
    assert_eq!(first.id, again.id);
    assert_eq!(again.ip_address, "10.0.0.9");
    assert_eq!(h.orchestrator.fleet.list().await.unwrap().len(), 1);
}

#[tokio::test]
async fn silent_workers_go_offline_and_return_on_check_in() {
    let h = harness();
    let worker = register(&h, "worker-01", "10.0.0.1").await;

    let later = Utc::now() + TimeDelta::minutes(10);
    let marked = h.orchestrator.fleet.sweep_offline_at(later).await.unwrap();
    assert_eq!(marked.len(), 1);
    assert_eq!(marked[0].status, WorkerStatus::Offline);
    assert!(h.orchestrator.fleet.list_assignable().await.unwrap().is_empty());

    let back = h.orchestrator.fleet.check_in(worker.id).await.unwrap();
    assert_eq!(back.status, WorkerStatus::Active);
    assert_eq!(h.orchestrator.fleet.list_assignable().await.unwrap().len(), 1);
}

#[tokio::test]
async fn silent_rotating_worker_keeps_its_pending_rotation() {
    let h = harness();
    let worker = register(&h, "worker-01", "1.2.3.4").await;
    let rotating = register(&h, "worker-02", "1.2.3.5").await;
    h.identity.push_err("provider busy");
    for _ in 0..5 {
        h.orchestrator
            .rotation
            .handle_event(event(rotating.id, "1.2.3.5"))
            .await
            .unwrap();
    }

    let later = Utc::now() + TimeDelta::minutes(10);
    let marked = h.orchestrator.fleet.sweep_offline_at(later).await.unwrap();
    assert_eq!(marked.iter().map(|w| w.id).collect::<Vec<_>>(), [worker.id]);
    let current = h.orchestrator.fleet.get(rotating.id).await.unwrap();
    assert_eq!(current.status, WorkerStatus::Rotating);

    // Checking in does not put the rate-limited address back in service.
    let back = h.orchestrator.fleet.check_in(rotating.id).await.unwrap();
    assert_eq!(back.status, WorkerStatus::Rotating);
    assert_eq!(back.ip_address, "1.2.3.5");

    h.identity.push_ok("i-fresh", "5.6.7.8");
    assert_eq!(h.orchestrator.rotation.retry_pending().await.unwrap(), 1);
    let rotated = h.orchestrator.fleet.get(rotating.id).await.unwrap();
    assert_eq!(rotated.status, WorkerStatus::Active);
    assert_eq!(rotated.ip_address, "5.6.7.8");
}

#[tokio::test]
async fn recent_check_ins_keep_workers_online() {
    let h = harness();
    register(&h, "worker-01", "10.0.0.1").await;
    let marked = h.orchestrator.fleet.sweep_offline().await.unwrap();
    assert!(marked.is_empty());
}

#[tokio::test]
async fn check_in_of_unknown_worker_is_not_found() {
    let h = harness();
    let result = h.orchestrator.fleet.check_in(404).await;
    assert_matches!(result, Err(CoreError::NotFound { .. }));
}

#[tokio::test]
async fn shutdown_takes_worker_offline_and_is_audited() {
    let h = harness();
    let worker = register(&h, "worker-01", "10.0.0.1").await;

    let stopped = h.orchestrator.fleet.shutdown(worker.id, "ops").await.unwrap();
    assert_eq!(stopped.status, WorkerStatus::Offline);

    let audit = h.store.recent_audit(5).await.unwrap();
    assert_eq!(audit.len(), 1);
    assert_eq!(audit[0].action, "worker.shutdown");

    // Idempotent.
    let again = h.orchestrator.fleet.shutdown(worker.id, "ops").await.unwrap();
    assert_eq!(again.status, WorkerStatus::Offline);
    assert_eq!(h.store.recent_audit(5).await.unwrap().len(), 1);
}

// ---------------------------------------------------------------------------
// Rotation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn threshold_of_events_rotates_worker_once() {
    let h = harness();
    let worker = register(&h, "worker-01", "1.2.3.4").await;
    h.identity.push_ok("i-fresh", "5.6.7.8");

    let rotation = &h.orchestrator.rotation;
    for n in 1..=4 {
        let (_, outcome) = rotation.handle_event(event(worker.id, "1.2.3.4")).await.unwrap();
        assert_matches!(outcome, RotationOutcome::BelowThreshold { count } if count == n);
    }
    let (_, outcome) = rotation.handle_event(event(worker.id, "1.2.3.4")).await.unwrap();
    let (rotated, entry) =
        assert_matches!(outcome, RotationOutcome::Rotated { worker, entry } => (worker, entry));

    assert_eq!(rotated.status, WorkerStatus::Active);
    assert_eq!(rotated.ip_address, "5.6.7.8");
    assert_eq!(rotated.instance_id, "i-fresh");
    assert_eq!(entry.old_ip.as_deref(), Some("1.2.3.4"));
    assert_eq!(entry.new_ip.as_deref(), Some("5.6.7.8"));
    assert_eq!(entry.old_instance_id.as_deref(), Some("i-worker-01"));

    let log = h.store.recent_log_entries(10).await.unwrap();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].old_ip.as_deref(), Some("1.2.3.4"));

    // Late events from the old address are logged but do not count.
    let (_, outcome) = rotation.handle_event(event(worker.id, "1.2.3.4")).await.unwrap();
    assert_matches!(outcome, RotationOutcome::Ignored(IgnoreReason::StaleIdentity));
    assert_eq!(h.store.recent_log_entries(10).await.unwrap().len(), 1);
    assert_eq!(h.store.recent_rate_limit_events(10).await.unwrap().len(), 6);
}

#[tokio::test]
async fn failed_identity_request_leaves_worker_rotating_until_retry() {
    let h = harness();
    let worker = register(&h, "worker-01", "1.2.3.4").await;
    h.identity.push_err("provider busy");

    let rotation = &h.orchestrator.rotation;
    let mut last = None;
    for _ in 0..5 {
        last = Some(rotation.handle_event(event(worker.id, "1.2.3.4")).await.unwrap().1);
    }
    assert_matches!(last, Some(RotationOutcome::Pending { .. }));

    let current = h.orchestrator.fleet.get(worker.id).await.unwrap();
    assert_eq!(current.status, WorkerStatus::Rotating);
    assert!(h.orchestrator.fleet.list_assignable().await.unwrap().is_empty());
    assert!(h.store.recent_log_entries(10).await.unwrap().is_empty());

    // Events while rotating are recorded but ignored.
    let (_, outcome) = rotation.handle_event(event(worker.id, "1.2.3.4")).await.unwrap();
    assert_matches!(
        outcome,
        RotationOutcome::Ignored(IgnoreReason::NotActive(WorkerStatus::Rotating))
    );

    // A re-registration mid-rotation keeps the worker out of service.
    let again = register(&h, "worker-01", "1.2.3.4").await;
    assert_eq!(again.status, WorkerStatus::Rotating);

    h.identity.push_ok("i-fresh", "5.6.7.8");
    assert_eq!(rotation.retry_pending().await.unwrap(), 1);

    let current = h.orchestrator.fleet.get(worker.id).await.unwrap();
    assert_eq!(current.status, WorkerStatus::Active);
    assert_eq!(current.ip_address, "5.6.7.8");
    let log = h.store.recent_log_entries(10).await.unwrap();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].reason.as_deref(), Some("rotation_retry"));
}

#[tokio::test]
async fn events_for_unknown_workers_are_rejected() {
    let h = harness();
    let result = h.orchestrator.rotation.record_event(event(77, "1.2.3.4")).await;
    assert_matches!(result, Err(CoreError::NotFound { .. }));
}

#[tokio::test]
async fn operator_rotation_is_immediate_and_audited() {
    let h = harness();
    let worker = register(&h, "worker-02", "10.1.1.1").await;
    h.identity.push_ok("i-new", "10.2.2.2");

    let outcome = h
        .orchestrator
        .rotation
        .request_rotation(worker.id, "ops", Some("ip flagged"))
        .await
        .unwrap();
    let entry = assert_matches!(outcome, RotationOutcome::Rotated { entry, .. } => entry);
    assert_eq!(entry.reason.as_deref(), Some("operator_request"));

    let audit = h.store.recent_audit(5).await.unwrap();
    assert_eq!(audit.len(), 1);
    assert_eq!(audit[0].action, "worker.rotate");
}

#[tokio::test]
async fn offline_worker_cannot_be_rotated() {
    let h = harness();
    let worker = register(&h, "worker-03", "10.1.1.1").await;
    h.orchestrator.fleet.shutdown(worker.id, "ops").await.unwrap();

    let result = h
        .orchestrator
        .rotation
        .request_rotation(worker.id, "ops", None)
        .await;
    assert_matches!(result, Err(CoreError::Conflict(_)));
}

#[tokio::test]
async fn concurrent_events_rotate_exactly_once() {
    let h = harness();
    let worker = register(&h, "worker-01", "1.2.3.4").await;
    h.identity.push_ok("i-a", "5.6.7.8");
    h.identity.push_ok("i-b", "9.9.9.9");

    let mut handles = Vec::new();
    for _ in 0..12 {
        let rotation = h.orchestrator.rotation.clone();
        let id = worker.id;
        handles.push(tokio::spawn(async move {
            rotation.handle_event(event(id, "1.2.3.4")).await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(h.store.recent_log_entries(10).await.unwrap().len(), 1);
    let current = h.orchestrator.fleet.get(worker.id).await.unwrap();
    assert_eq!(current.ip_address, "5.6.7.8");
    assert_eq!(h.identity.requests.lock().unwrap().len(), 1);
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

#[tokio::test]
async fn empty_status_is_zeroed() {
    let h = harness();
    let status = h.orchestrator.status.status(None).await.unwrap();
    assert_eq!(status.fleet.total, 0);
    assert!(status.rotations.is_empty());
    assert!(status.rate_limits.is_empty());
    assert_eq!(status.queue.total_items_collected, 0);
    assert!(status.queue.categories.iter().all(|c| c.stages.total() == 0));
}

#[tokio::test]
async fn rate_limit_feed_carries_worker_names() {
    let h = harness();
    let worker = register(&h, "worker-07", "10.0.0.7").await;
    h.orchestrator
        .rotation
        .handle_event(event(worker.id, "10.0.0.7"))
        .await
        .unwrap();

    let status = h.orchestrator.status.status(Some(10)).await.unwrap();
    assert_eq!(status.fleet.total, 1);
    assert_eq!(status.fleet.active, 1);
    assert_eq!(status.rate_limits.len(), 1);
    assert_eq!(status.rate_limits[0].worker_name.as_deref(), Some("worker-07"));
}
