// SPDX-License-Identifier: MIT OR Apache-2.0
//! HTTP control-plane API types and handlers.
//!
//! This module defines the request/response envelopes and handler bodies
//! for every route the daemon mounts beyond the ingest pipeline's own
//! `/webhook`, `/api/patches`, and `/api/summaries` (owned by
//! `patchplane-ingest`).

use crate::AppState;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use patchplane_core::{Priority, RequestType};
use patchplane_eventlog::EventKind;
use patchplane_validate::ValidationLevel;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

fn error_response(status: StatusCode, error: &str, details: Vec<String>) -> Response {
    (status, Json(json!({"status": "error", "error": error, "details": details}))).into_response()
}

fn ok(value: Value) -> Response {
    (StatusCode::OK, Json(value)).into_response()
}

// ---------------------------------------------------------------------------
// GET /health
// ---------------------------------------------------------------------------

/// `components` block of the `/health` response, field names kept as the
/// data contract the downstream dashboard already expects.
#[derive(Debug, Serialize)]
struct HealthComponents {
    ghost_runner: &'static str,
    port_5555_bound: bool,
    fs_writable: bool,
    flask_responsive: bool,
    webhook_endpoint: &'static str,
}

#[derive(Debug, Serialize)]
struct SystemMetrics {
    cpu: f64,
    memory: f64,
    disk: f64,
    network: Value,
}

async fn probe_tcp(addr: &str) -> bool {
    tokio::time::timeout(Duration::from_millis(300), tokio::net::TcpStream::connect(addr))
        .await
        .map(|r| r.is_ok())
        .unwrap_or(false)
}

async fn fs_writable(dir: &std::path::Path) -> bool {
    let probe = dir.join(".health_probe");
    let writable = tokio::fs::write(&probe, b"ok").await.is_ok();
    let _ = tokio::fs::remove_file(&probe).await;
    writable
}

pub async fn health_handler(State(state): State<Arc<AppState>>) -> Response {
    let ghost_host = state
        .config
        .local_ghost_url
        .parse::<url::Url>()
        .ok()
        .and_then(|u| u.host_str().map(|h| format!("{h}:{}", u.port_or_known_default().unwrap_or(80))));
    let ghost_up = match ghost_host {
        Some(addr) => probe_tcp(&addr).await,
        None => false,
    };
    let flask_responsive = probe_tcp(&format!("127.0.0.1:{}", state.config.python_port)).await;
    let fs_ok = fs_writable(state.store.patches_dir()).await;
    let port_bound = state.port_bound.load(Ordering::Relaxed);

    let components = HealthComponents {
        ghost_runner: if ghost_up { "up" } else { "down" },
        port_5555_bound: port_bound,
        fs_writable: fs_ok,
        flask_responsive,
        webhook_endpoint: "operational",
    };

    let overall_status = if ghost_up && port_bound && fs_ok && flask_responsive {
        "healthy"
    } else if !ghost_up && port_bound && fs_ok && flask_responsive {
        "degraded"
    } else {
        "unknown"
    };

    let sample = state.resource_monitor.latest_sample();
    let system_metrics = SystemMetrics {
        cpu: sample.as_ref().map(|s| s.cpu_percent).unwrap_or(0.0),
        memory: sample.as_ref().map(|s| s.memory_percent).unwrap_or(0.0),
        disk: sample.as_ref().map(|s| s.disk_percent).unwrap_or(0.0),
        network: sample
            .as_ref()
            .map(|s| json!(s.network_io))
            .unwrap_or_else(|| json!(null)),
    };

    ok(json!({
        "overall_status": overall_status,
        "components": components,
        "system_metrics": system_metrics,
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": Utc::now(),
    }))
}

// ---------------------------------------------------------------------------
// GET /events, /events/summary, /events/patch, /events/slack
// ---------------------------------------------------------------------------

fn event_kind_filter(path: &str) -> Option<EventKind> {
    match path {
        "patch" => Some(EventKind::PatchEvent),
        "slack" => Some(EventKind::SlackEvent),
        "summary" => Some(EventKind::SystemEvent),
        _ => None,
    }
}

pub async fn events_all_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.event_log.events().await {
        Ok(events) => ok(json!({"events": events, "total": events.len()})),
        Err(err) => error_response(StatusCode::INTERNAL_SERVER_ERROR, "failed to read event log", vec![err.to_string()]),
    }
}

pub async fn events_filtered_handler(Path(kind): Path<String>, State(state): State<Arc<AppState>>) -> Response {
    match state.event_log.events().await {
        Ok(events) => {
            let filtered: Vec<_> = match event_kind_filter(&kind) {
                Some(k) if kind == "summary" => {
                    events.into_iter().filter(|e| e.kind == k && e.event_type.contains("summary")).collect()
                }
                Some(k) => events.into_iter().filter(|e| e.kind == k).collect(),
                None => Vec::new(),
            };
            ok(json!({"events": filtered, "total": filtered.len()}))
        }
        Err(err) => error_response(StatusCode::INTERNAL_SERVER_ERROR, "failed to read event log", vec![err.to_string()]),
    }
}

// ---------------------------------------------------------------------------
// GET /api/resources
// ---------------------------------------------------------------------------

pub async fn resources_handler(State(state): State<Arc<AppState>>) -> Response {
    ok(json!({
        "latest": state.resource_monitor.latest_sample(),
        "samples": state.resource_monitor.samples(),
        "alerts": state.resource_monitor.alerts(),
    }))
}

// ---------------------------------------------------------------------------
// GET /api/processes
// ---------------------------------------------------------------------------

pub async fn processes_handler(State(state): State<Arc<AppState>>) -> Response {
    ok(json!({
        "history": state.cleanup_scanner.history(),
        "whitelist": state.config.process_whitelist,
    }))
}

// ---------------------------------------------------------------------------
// GET|POST /api/processor
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct ProcessorSubmitRequest {
    #[serde(rename = "type")]
    pub request_type: RequestType,
    pub data: Value,
    #[serde(default)]
    pub priority: Priority,
}

pub async fn processor_stats_handler(State(state): State<Arc<AppState>>) -> Response {
    ok(json!(state.processor.snapshot().await))
}

pub async fn processor_submit_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ProcessorSubmitRequest>,
) -> Response {
    match state
        .processor
        .submit(req.request_type, req.data, req.priority, Duration::from_secs(30))
        .await
    {
        Ok(request_id) => ok(json!({"status": "success", "request_id": request_id})),
        Err(err) => {
            let perr = patchplane_error::PatchplaneError::new(patchplane_error::ErrorType::Resource, err.to_string());
            record_error(&state, &perr).await;
            error_response(StatusCode::SERVICE_UNAVAILABLE, "ProcessorQueueFull", vec![err.to_string()])
        }
    }
}

// ---------------------------------------------------------------------------
// GET|POST /api/sequential, GET /api/sequential/<id>
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct SequentialSubmitRequest {
    pub workflow: String,
    pub data: Value,
    #[serde(default)]
    pub priority: Priority,
}

pub async fn sequential_stats_handler(State(state): State<Arc<AppState>>) -> Response {
    ok(json!({
        "queue_len": state.workflow_engine.queue_len().await,
        "avg_processing_time_ms": state.workflow_engine.avg_processing_time_ms().await,
    }))
}

pub async fn sequential_submit_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SequentialSubmitRequest>,
) -> Response {
    match state.workflow_engine.submit(&req.workflow, req.data, req.priority).await {
        Ok(request_id) => ok(json!({"status": "success", "request_id": request_id})),
        Err(err) => {
            let perr = patchplane_error::PatchplaneError::new(patchplane_error::ErrorType::Validation, err.to_string());
            record_error(&state, &perr).await;
            error_response(StatusCode::BAD_REQUEST, "UnknownWorkflow", vec![err.to_string()])
        }
    }
}

pub async fn sequential_status_handler(
    Path(request_id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Response {
    match state.workflow_engine.completed(&request_id).await {
        Some(request) => ok(json!(request)),
        None => error_response(StatusCode::NOT_FOUND, "NotFound", vec![format!("no sequential request '{request_id}'")]),
    }
}

// ---------------------------------------------------------------------------
// GET /api/errors
// ---------------------------------------------------------------------------

pub async fn errors_handler(State(state): State<Arc<AppState>>) -> Response {
    let errors = state.recent_errors.lock().await;
    ok(json!({"errors": &*errors, "total": errors.len()}))
}

// ---------------------------------------------------------------------------
// GET /api/rate-limits
// ---------------------------------------------------------------------------

pub async fn rate_limits_handler(State(state): State<Arc<AppState>>) -> Response {
    ok(json!({"rules": state.config.rate_limit_rules}))
}

// ---------------------------------------------------------------------------
// GET /api/audit
// ---------------------------------------------------------------------------

pub async fn audit_handler(State(state): State<Arc<AppState>>) -> Response {
    // `patchplane_audit::AuditLog` is write-only by design (append-only
    // trail with no in-process read-back); this view exposes the active
    // write configuration rather than entry contents. Reading entries back
    // means tailing `logs/audit/audit_<date>.log` directly.
    ok(json!({
        "directory": state.audit_dir.display().to_string(),
        "retention_days": state.config.audit.retention_days,
        "max_file_size_mb": state.config.audit.max_file_size_mb,
        "sensitive_keys": state.config.audit.sensitive_keys,
    }))
}

// ---------------------------------------------------------------------------
// GET /api/server-fixes
// ---------------------------------------------------------------------------

pub async fn server_fixes_handler(State(state): State<Arc<AppState>>) -> Response {
    ok(json!({
        "rules": state.config.cleanup_rules,
        "recent_actions": state.cleanup_scanner.history(),
    }))
}

// ---------------------------------------------------------------------------
// GET /api/error-handler
// ---------------------------------------------------------------------------

pub async fn error_handler_handler(State(_state): State<Arc<AppState>>) -> Response {
    use patchplane_error::ErrorType;
    let taxonomy: Vec<Value> = [
        ErrorType::Validation,
        ErrorType::System,
        ErrorType::Network,
        ErrorType::Database,
        ErrorType::Authentication,
        ErrorType::Timeout,
        ErrorType::Resource,
        ErrorType::Unknown,
    ]
    .into_iter()
    .map(|t| {
        json!({
            "error_type": t,
            "default_severity": t.default_severity(),
            "default_recovery": t.default_recovery(),
            "http_status": t.http_status(),
        })
    })
    .collect();
    ok(json!({"taxonomy": taxonomy}))
}

// ---------------------------------------------------------------------------
// GET /api/health-endpoints
// ---------------------------------------------------------------------------

pub async fn health_endpoints_handler(State(state): State<Arc<AppState>>) -> Response {
    ok(json!({"checks": state.health_registry.latest_per_check()}))
}

// ---------------------------------------------------------------------------
// GET /api/cors
// ---------------------------------------------------------------------------

pub async fn cors_handler(State(state): State<Arc<AppState>>) -> Response {
    let manager = state.cors_manager.lock().await;
    ok(json!({"history": manager.history()}))
}

// ---------------------------------------------------------------------------
// POST /api/validation
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct ValidationRequest {
    pub request_type: String,
    pub data: Value,
    #[serde(default)]
    pub strict: bool,
}

#[derive(Debug, Serialize)]
struct ValidationReportDto {
    is_valid: bool,
    errors: Vec<ValidationErrorDto>,
    warnings: Vec<ValidationErrorDto>,
    validated_data: Value,
}

#[derive(Debug, Serialize)]
struct ValidationErrorDto {
    field_name: String,
    error_type: String,
    message: String,
}

pub async fn validation_handler(State(state): State<Arc<AppState>>, Json(req): Json<ValidationRequest>) -> Response {
    let level = if req.strict { ValidationLevel::Strict } else { ValidationLevel::Basic };
    match state.validator.validate(&req.request_type, &req.data, level) {
        Ok(report) => {
            if !report.is_valid {
                let summary = report.errors.iter().map(|e| e.message.as_str()).collect::<Vec<_>>().join("; ");
                let perr = patchplane_error::PatchplaneError::new(patchplane_error::ErrorType::Validation, summary)
                    .with_context("request_type", &req.request_type);
                record_error(&state, &perr).await;
            }
            let dto = ValidationReportDto {
                is_valid: report.is_valid,
                errors: report
                    .errors
                    .into_iter()
                    .map(|e| ValidationErrorDto { field_name: e.field_name, error_type: e.error_type, message: e.message })
                    .collect(),
                warnings: report
                    .warnings
                    .into_iter()
                    .map(|e| ValidationErrorDto { field_name: e.field_name, error_type: e.error_type, message: e.message })
                    .collect(),
                validated_data: report.validated_data,
            };
            ok(json!(dto))
        }
        Err(err) => {
            let perr = patchplane_error::PatchplaneError::new(patchplane_error::ErrorType::Validation, err.to_string());
            record_error(&state, &perr).await;
            error_response(StatusCode::BAD_REQUEST, "UnknownRequestType", vec![err.to_string()])
        }
    }
}

/// Record a [`patchplane_error::PatchplaneError`] occurrence into the
/// bounded ring the `/api/errors` view reads from, and into the audit log
/// when its severity warrants it.
pub async fn record_error(state: &AppState, err: &patchplane_error::PatchplaneError) {
    err.record(&state.recent_errors, &state.audit_log).await;
}
