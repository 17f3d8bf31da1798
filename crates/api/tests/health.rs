//! Integration tests for the health check endpoint and general HTTP behaviour.

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::{body_json, TestApp};
use inkdex_api::router::REQUEST_ID_HEADER;
use tower::ServiceExt;

#[tokio::test]
async fn health_check_returns_ok_with_json() {
    let app = TestApp::new();
    let response = app.get("/health", None).await;

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "ok");
    assert!(json["version"].is_string());
    assert_eq!(json["store_healthy"], true);
}

#[tokio::test]
async fn unknown_route_returns_404() {
    let app = TestApp::new();
    let response = app.get("/this-route-does-not-exist", None).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn response_contains_x_request_id_header() {
    let app = TestApp::new();
    let response = app.get("/health", None).await;

    let request_id = response
        .headers()
        .get(REQUEST_ID_HEADER)
        .expect("Response must contain an x-request-id header");
    assert_eq!(request_id.to_str().unwrap().len(), 36);
}

#[tokio::test]
async fn dashboard_origin_can_read_retry_after_and_request_id() {
    let app = TestApp::new();
    let request = Request::builder()
        .uri("/health")
        .header("origin", "http://localhost:5173")
        .body(Body::empty())
        .unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();

    let headers = response.headers();
    assert_eq!(headers["access-control-allow-origin"], "http://localhost:5173");
    let exposed = headers["access-control-expose-headers"].to_str().unwrap().to_lowercase();
    assert!(exposed.contains("retry-after"));
    assert!(exposed.contains(REQUEST_ID_HEADER));
}
