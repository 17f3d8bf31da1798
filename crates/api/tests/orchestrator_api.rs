//! HTTP-level tests for `/api/v1/orchestrator`.

mod common;

use std::time::Duration;

use axum::http::StatusCode;
use common::{body_json, test_config, TestApp, OPERATOR};
use inkdex_core::config::OrchestratorConfig;

#[tokio::test]
async fn status_of_empty_system_is_zeroed() {
    let app = TestApp::new();

    let response = app.get("/api/v1/orchestrator/status", Some(OPERATOR)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;

    assert_eq!(json["data"]["fleet"]["total"], 0);
    assert_eq!(json["data"]["fleet"]["active"], 0);
    assert_eq!(json["data"]["queue"]["total_items_collected"], 0);
    assert_eq!(json["data"]["queue"]["categories"].as_array().unwrap().len(), 5);
    assert!(json["data"]["rotations"].as_array().unwrap().is_empty());
    assert!(json["data"]["rate_limits"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn fleet_summary_counts_by_status() {
    let app = TestApp::new();
    app.register("1.2.3.4").await;
    let second = app.register("1.2.3.5").await;
    app.post(&format!("/api/v1/workers/{second}/shutdown"), Some(OPERATOR), None)
        .await;

    let json = body_json(app.get("/api/v1/orchestrator/fleet", Some(OPERATOR)).await).await;
    assert_eq!(json["data"]["total"], 2);
    assert_eq!(json["data"]["active"], 1);
    assert_eq!(json["data"]["offline"], 1);
}

#[tokio::test]
async fn dashboard_reads_require_caller() {
    let app = TestApp::new();
    for path in ["status", "fleet", "queue", "rotations", "rate-limits", "audit"] {
        let response = app.get(&format!("/api/v1/orchestrator/{path}"), None).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "{path}");
    }
}

#[tokio::test]
async fn reap_cancels_stale_jobs_on_demand() {
    let engine = OrchestratorConfig {
        stuck_job_threshold: Duration::ZERO,
        ..Default::default()
    };
    let app = TestApp::with(test_config(), engine);
    let scrape = app.trigger("scrape").await;
    let single = app.trigger("single-item").await;
    tokio::time::sleep(Duration::from_millis(10)).await;

    let response = app.post("/api/v1/orchestrator/reap", Some(OPERATOR), None).await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["data"]["cancelled"], serde_json::json!([scrape]));

    let json = body_json(app.get(&format!("/api/v1/jobs/{scrape}"), Some(OPERATOR)).await).await;
    assert_eq!(json["data"]["status"], "cancelled");
    assert_eq!(json["data"]["cancelled_by"], "reaper");

    // Single-item jobs are exempt from reaping but still flagged.
    let json = body_json(app.get(&format!("/api/v1/jobs/{single}"), Some(OPERATOR)).await).await;
    assert_eq!(json["data"]["status"], "pending");
    assert_eq!(json["data"]["is_stale"], true);
}
