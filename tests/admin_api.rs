mod common;

use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::http::{header::AUTHORIZATION, Method, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use portal_resilience::admin::{setup_admin_router, AdminState};
use portal_resilience::storage::PersistenceProvider;

const KEY: &str = "test-admin-key";

fn router(h: &common::Harness) -> Router {
    let state = AdminState::new(h.components.orchestrator.clone(), KEY);
    setup_admin_router(state, Duration::from_secs(5))
}

fn request(method: Method, uri: &str, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(AUTHORIZATION, format!("Bearer {}", KEY));
    match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn call(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let res = app.clone().oneshot(req).await.unwrap();
    let status = res.status();
    let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

#[tokio::test]
async fn test_rejects_missing_or_wrong_key() {
    let h = common::harness();
    let app = router(&h);

    let bare = Request::get("/admin/health").body(Body::empty()).unwrap();
    let (status, _) = call(&app, bare).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let wrong = Request::get("/admin/status")
        .header(AUTHORIZATION, "Bearer nope")
        .body(Body::empty())
        .unwrap();
    let (status, _) = call(&app, wrong).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_health_and_status() {
    let h = common::harness();
    let app = router(&h);

    let (status, body) = call(&app, request(Method::GET, "/admin/health", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["degradedMode"], false);
    assert_eq!(body["missingMethods"], json!([]));

    let (status, body) = call(&app, request(Method::GET, "/admin/status", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["isRunning"], false);
    assert_eq!(body["activeIncidents"]["threats"], 0);
    assert!(body["lastHealthCheck"].is_null());
}

#[tokio::test]
async fn test_health_check_is_recorded() {
    let h = common::harness();
    let app = router(&h);

    let (status, body) = call(&app, request(Method::POST, "/admin/health-check", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert!(body["subsystems"].as_array().unwrap().len() >= 4);

    let (_, status_body) = call(&app, request(Method::GET, "/admin/status", None)).await;
    assert_eq!(status_body["lastHealthCheck"]["status"], "healthy");
}

#[tokio::test]
async fn test_threat_report_lookup_and_release() {
    let h = common::harness();
    let app = router(&h);

    let report = json!({
        "sourceIp": "203.0.113.9",
        "category": "brute_force",
        "severity": "high",
        "confidence": 98,
        "indicators": ["failed_logins"]
    });
    let (status, body) = call(&app, request(Method::POST, "/admin/threats", Some(report))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["action"], "block");
    assert_eq!(body["classification"], "blocked");

    let (status, body) = call(&app, request(Method::GET, "/admin/threats/203.0.113.9", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["blocked"], true);
    assert_eq!(body["record"]["reportCount"], 1);

    let (status, body) = call(&app, request(Method::DELETE, "/admin/threats/203.0.113.9", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["released"], true);

    let (_, body) = call(&app, request(Method::GET, "/admin/threats/203.0.113.9", None)).await;
    assert_eq!(body["blocked"], false);
    assert!(body["record"].is_null());
}

#[tokio::test]
async fn test_bad_ip_is_rejected() {
    let h = common::harness();
    let app = router(&h);

    let (status, _) = call(&app, request(Method::GET, "/admin/threats/not-an-ip", None)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_fault_report() {
    let h = common::harness();
    let app = router(&h);

    let (status, body) = call(
        &app,
        request(Method::POST, "/admin/faults", Some(json!({ "faultType": "memory_leak" }))),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["faultType"], "memory_leak");

    let (status, _) = call(
        &app,
        request(Method::POST, "/admin/faults", Some(json!({ "faultType": "meteor_strike" }))),
    )
    .await;
    assert!(status.is_client_error());
}

#[tokio::test]
async fn test_breakers_listed_after_use() {
    let h = common::harness();
    let app = router(&h);
    h.components.storage.list_users().await.unwrap();

    let (status, body) = call(&app, request(Method::GET, "/admin/breakers", None)).await;
    assert_eq!(status, StatusCode::OK);
    let breakers = body.as_array().unwrap();
    let database = breakers.iter().find(|b| b["dependency"] == "database").unwrap();
    assert_eq!(database["state"], "closed");
    assert_eq!(database["failureCount"], 0);
}
