// SPDX-License-Identifier: MIT OR Apache-2.0
use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use patchplane_audit::AuditLog;
use patchplane_cleanup::ProcessCleanupScanner;
use patchplane_config::ControlPlaneConfig;
use patchplane_cors::{CorsConfig, CorsManager};
use patchplane_daemon::{build_app, AppState};
use patchplane_eventlog::EventLog;
use patchplane_forward::Forwarder;
use patchplane_health::{HealthAggregator, HealthRegistry};
use patchplane_processor::UnifiedProcessor;
use patchplane_ratelimit::RateLimiter;
use patchplane_resource::ResourceMonitor;
use patchplane_store::PatchStore;
use patchplane_validate::RequestValidator;
use patchplane_workflow::WorkflowEngine;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tower::ServiceExt;

fn test_state(patches_dir: &std::path::Path, audit_dir: &std::path::Path) -> Arc<AppState> {
    let config = ControlPlaneConfig::default();
    let health_registry = Arc::new(HealthRegistry::new());

    Arc::new(AppState::new(
        config.clone(),
        PatchStore::new(patches_dir),
        Arc::new(EventLog::new(patches_dir.join("events.json"))),
        Arc::new(AuditLog::new(audit_dir, config.audit.clone())),
        audit_dir.to_path_buf(),
        Arc::new(RateLimiter::new(HashMap::new())),
        Arc::new(Mutex::new(CorsManager::new(CorsConfig::default()))),
        Arc::new(ResourceMonitor::new(config.resource_thresholds.clone())),
        Arc::new(ProcessCleanupScanner::new(Vec::new(), Vec::new())),
        health_registry.clone(),
        Arc::new(HealthAggregator::new(health_registry)),
        Arc::new(WorkflowEngine::new(100)),
        Arc::new(UnifiedProcessor::new(100)),
        Arc::new(RequestValidator::with_defaults()),
    ))
}

fn test_app(patches_dir: &std::path::Path, audit_dir: &std::path::Path) -> axum::Router {
    let state = test_state(patches_dir, audit_dir);
    build_app(state, Forwarder::new("http://127.0.0.1:0/patch", 0))
}

async fn body_json(resp: axum::response::Response) -> serde_json::Value {
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn health_returns_ok_with_contract_fields() {
    let patches = tempfile::tempdir().unwrap();
    let audit = tempfile::tempdir().unwrap();
    let app = test_app(patches.path(), audit.path());

    let resp = app.oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap()).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let json = body_json(resp).await;
    assert!(json["overall_status"].is_string());
    assert_eq!(json["components"]["webhook_endpoint"], "operational");
    assert_eq!(json["components"]["port_5555_bound"], false);
}

#[tokio::test]
async fn events_all_starts_empty() {
    let patches = tempfile::tempdir().unwrap();
    let audit = tempfile::tempdir().unwrap();
    let app = test_app(patches.path(), audit.path());

    let resp = app.oneshot(Request::builder().uri("/events").body(Body::empty()).unwrap()).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let json = body_json(resp).await;
    assert_eq!(json["total"], 0);
}

#[tokio::test]
async fn events_filtered_unknown_kind_is_empty_not_error() {
    let patches = tempfile::tempdir().unwrap();
    let audit = tempfile::tempdir().unwrap();
    let app = test_app(patches.path(), audit.path());

    let resp =
        app.oneshot(Request::builder().uri("/events/bogus").body(Body::empty()).unwrap()).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let json = body_json(resp).await;
    assert_eq!(json["total"], 0);
}

#[tokio::test]
async fn processor_stats_reports_zero_queue_initially() {
    let patches = tempfile::tempdir().unwrap();
    let audit = tempfile::tempdir().unwrap();
    let app = test_app(patches.path(), audit.path());

    let resp = app.oneshot(Request::builder().uri("/api/processor").body(Body::empty()).unwrap()).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let json = body_json(resp).await;
    assert_eq!(json["queue_size"], 0);
}

#[tokio::test]
async fn processor_submit_accepts_a_webhook_request() {
    let patches = tempfile::tempdir().unwrap();
    let audit = tempfile::tempdir().unwrap();
    let app = test_app(patches.path(), audit.path());

    let body = serde_json::json!({"type": "webhook", "data": {"source": "test"}}).to_string();
    let resp = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/processor")
                .header("content-type", "application/json")
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let json = body_json(resp).await;
    assert_eq!(json["status"], "success");
    assert!(json["request_id"].is_string());
}

#[tokio::test]
async fn sequential_submit_unknown_workflow_is_bad_request() {
    let patches = tempfile::tempdir().unwrap();
    let audit = tempfile::tempdir().unwrap();
    let app = test_app(patches.path(), audit.path());

    let body = serde_json::json!({"workflow": "does_not_exist", "data": {}}).to_string();
    let resp = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/sequential")
                .header("content-type", "application/json")
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn sequential_submit_known_workflow_then_status_pending() {
    let patches = tempfile::tempdir().unwrap();
    let audit = tempfile::tempdir().unwrap();
    let app = test_app(patches.path(), audit.path());

    let body = serde_json::json!({"workflow": "webhook_processing", "data": {}}).to_string();
    let resp = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/sequential")
                .header("content-type", "application/json")
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let json = body_json(resp).await;
    let request_id = json["request_id"].as_str().unwrap().to_string();

    let resp = app
        .oneshot(Request::builder().uri(format!("/api/sequential/{request_id}")).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn sequential_status_unknown_id_is_not_found() {
    let patches = tempfile::tempdir().unwrap();
    let audit = tempfile::tempdir().unwrap();
    let app = test_app(patches.path(), audit.path());

    let resp =
        app.oneshot(Request::builder().uri("/api/sequential/nope").body(Body::empty()).unwrap()).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn errors_list_starts_empty() {
    let patches = tempfile::tempdir().unwrap();
    let audit = tempfile::tempdir().unwrap();
    let app = test_app(patches.path(), audit.path());

    let resp = app.oneshot(Request::builder().uri("/api/errors").body(Body::empty()).unwrap()).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let json = body_json(resp).await;
    assert_eq!(json["total"], 0);
}

#[tokio::test]
async fn rate_limits_reports_configured_rules() {
    let patches = tempfile::tempdir().unwrap();
    let audit = tempfile::tempdir().unwrap();
    let app = test_app(patches.path(), audit.path());

    let resp = app.oneshot(Request::builder().uri("/api/rate-limits").body(Body::empty()).unwrap()).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let json = body_json(resp).await;
    assert!(json["rules"]["webhook"].is_object());
}

#[tokio::test]
async fn audit_view_reports_configuration_not_entries() {
    let patches = tempfile::tempdir().unwrap();
    let audit = tempfile::tempdir().unwrap();
    let app = test_app(patches.path(), audit.path());

    let resp = app.oneshot(Request::builder().uri("/api/audit").body(Body::empty()).unwrap()).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let json = body_json(resp).await;
    assert!(json["sensitive_keys"].is_array());
    assert!(json["retention_days"].is_number());
}

#[tokio::test]
async fn error_handler_taxonomy_lists_all_error_types() {
    let patches = tempfile::tempdir().unwrap();
    let audit = tempfile::tempdir().unwrap();
    let app = test_app(patches.path(), audit.path());

    let resp =
        app.oneshot(Request::builder().uri("/api/error-handler").body(Body::empty()).unwrap()).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let json = body_json(resp).await;
    assert_eq!(json["taxonomy"].as_array().unwrap().len(), 8);
}

#[tokio::test]
async fn validation_endpoint_flags_missing_required_field() {
    let patches = tempfile::tempdir().unwrap();
    let audit = tempfile::tempdir().unwrap();
    let app = test_app(patches.path(), audit.path());

    let body = serde_json::json!({"request_type": "webhook", "data": {}}).to_string();
    let resp = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/validation")
                .header("content-type", "application/json")
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let json = body_json(resp).await;
    assert_eq!(json["is_valid"], false);
    assert!(json["errors"].as_array().unwrap().iter().any(|e| e["field_name"] == "source"));
}

#[tokio::test]
async fn webhook_route_is_reachable_through_the_composed_app() {
    let patches = tempfile::tempdir().unwrap();
    let audit = tempfile::tempdir().unwrap();
    let app = test_app(patches.path(), audit.path());

    let body = serde_json::json!({
        "id": "p1",
        "role": "ui",
        "target_file": "src/main.ts",
        "patch": {"pattern": "foo", "replacement": "bar"},
    })
    .to_string();
    let resp = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/webhook")
                .header("content-type", "application/json")
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    assert!(resp.headers().contains_key("x-request-id"), "request-id middleware should wrap ingest routes too");
}

#[tokio::test]
async fn validation_endpoint_unknown_request_type_is_bad_request() {
    let patches = tempfile::tempdir().unwrap();
    let audit = tempfile::tempdir().unwrap();
    let app = test_app(patches.path(), audit.path());

    let body = serde_json::json!({"request_type": "no_such_type", "data": {}}).to_string();
    let resp = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/validation")
                .header("content-type", "application/json")
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}
