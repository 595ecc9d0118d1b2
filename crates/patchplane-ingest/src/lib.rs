// SPDX-License-Identifier: MIT OR Apache-2.0
//! Ingest Pipeline.
//!
//! `POST /webhook` accepts a JSON object. A request carrying a
//! chat-platform signature header is delegated to the (out-of-scope)
//! chat-command collaborator; everything else is treated as a patch
//! descriptor and run through schema validation, persistence, and
//! best-effort forwarding, synchronously within the request. `POST
//! /api/patches` runs the same pipeline directly. `POST /api/summaries`
//! only checks that the body is a mapping with an `id` and logs receipt.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use patchplane_audit::AuditLog;
use patchplane_core::{is_dangerous_pattern, PatchBody, PatchDescriptor};
use patchplane_error::{ErrorType, PatchplaneError, PatchplaneErrorDto};
use patchplane_eventlog::{EventKind, EventLog};
use patchplane_forward::Forwarder;
use patchplane_json_guard::{validate_json_object, JsonGuardLimits};
use patchplane_store::PatchStore;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Header chat-platform (Slack-style) signed requests carry; its presence
/// delegates the request away from the patch-descriptor pipeline.
pub const CHAT_SIGNATURE_HEADER: &str = "x-slack-signature";

/// Size/nesting guardrails applied to every ingested payload before schema
/// validation.
const PAYLOAD_LIMITS: JsonGuardLimits = JsonGuardLimits::new(32, 1024 * 1024);

/// Shared state for the ingest router.
pub struct IngestState {
    /// Where validated patch descriptors are persisted.
    pub store: PatchStore,
    /// Downstream patch-execution runner forwarder.
    pub forwarder: Forwarder,
    /// Append-only event journal.
    pub event_log: Arc<EventLog>,
    /// Audit trail, shared with the daemon so ingest failures land in the
    /// same log as the rest of the control plane.
    pub audit_log: Arc<AuditLog>,
    /// Bounded ring of recent error occurrences backing `/api/errors`,
    /// shared with the daemon for the same reason.
    pub recent_errors: Arc<Mutex<Vec<PatchplaneErrorDto>>>,
}

impl IngestState {
    /// Build ingest state from its collaborators. `event_log`, `audit_log`,
    /// and `recent_errors` are shared (rather than owned) so a daemon
    /// composing this pipeline alongside its own observability routes
    /// appends to the same journal, audit trail, and error ring rather than
    /// racing independent writers over the same resources.
    #[must_use]
    pub fn new(
        store: PatchStore,
        forwarder: Forwarder,
        event_log: Arc<EventLog>,
        audit_log: Arc<AuditLog>,
        recent_errors: Arc<Mutex<Vec<PatchplaneErrorDto>>>,
    ) -> Self {
        Self { store, forwarder, event_log, audit_log, recent_errors }
    }
}

/// Build the ingest router: `/webhook`, `/api/patches`, `/api/summaries`.
pub fn router(state: Arc<IngestState>) -> Router {
    Router::new()
        .route("/webhook", post(webhook_handler))
        .route("/api/patches", post(patches_handler))
        .route("/api/summaries", post(summaries_handler))
        .with_state(state)
}

fn error_response(status: StatusCode, error: &str, details: Vec<String>) -> Response {
    (status, Json(json!({"status": "error", "error": error, "details": details}))).into_response()
}

/// Record an ingest-pipeline failure into the shared error ring and audit
/// log, the same sink the daemon's own handlers write into.
async fn record_error(state: &IngestState, err: &PatchplaneError) {
    err.record(&state.recent_errors, &state.audit_log).await;
}

/// Schema-validate `data` into a [`PatchDescriptor`] step 1.
/// Returns the list of failure messages on error.
fn validate_patch_schema(data: &Value) -> Result<PatchDescriptor, Vec<String>> {
    let mut errors = Vec::new();
    let obj = data.as_object();

    let id = obj.and_then(|o| o.get("id")).and_then(Value::as_str);
    if id.is_none() {
        errors.push("missing or non-string field 'id'".to_string());
    }
    let role = obj.and_then(|o| o.get("role")).and_then(Value::as_str);
    if role.is_none() {
        errors.push("missing or non-string field 'role'".to_string());
    }
    let target_file = obj.and_then(|o| o.get("target_file")).and_then(Value::as_str);
    if target_file.is_none() {
        errors.push("missing or non-string field 'target_file'".to_string());
    }

    let patch_obj = obj.and_then(|o| o.get("patch")).and_then(Value::as_object);
    let pattern = patch_obj.and_then(|p| p.get("pattern")).and_then(Value::as_str);
    let replacement = patch_obj.and_then(|p| p.get("replacement")).and_then(Value::as_str);
    if patch_obj.is_none() {
        errors.push("missing or non-object field 'patch'".to_string());
    } else {
        if pattern.is_none() {
            errors.push("missing or non-string field 'patch.pattern'".to_string());
        }
        if replacement.is_none() {
            errors.push("missing or non-string field 'patch.replacement'".to_string());
        }
    }

    let force = obj.and_then(|o| o.get("force")).and_then(Value::as_bool).unwrap_or(false);
    if let Some(p) = pattern {
        if is_dangerous_pattern(p) && !force {
            errors.push(format!("pattern '{p}' is reserved as dangerous; set force to override"));
        }
    }

    if !errors.is_empty() {
        return Err(errors);
    }

    let description = obj.and_then(|o| o.get("description")).and_then(Value::as_str).map(str::to_string);
    let metadata = obj
        .and_then(|o| o.get("metadata"))
        .and_then(Value::as_object)
        .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
        .unwrap_or_default();

    Ok(PatchDescriptor {
        id: id.unwrap().to_string(),
        role: role.unwrap().to_string(),
        target_file: target_file.unwrap().to_string(),
        patch: PatchBody {
            pattern: pattern.unwrap().to_string(),
            replacement: replacement.unwrap().to_string(),
        },
        description,
        force,
        metadata,
    })
}

async fn process_patch_descriptor(state: &IngestState, data: Value) -> Response {
    let guard_errors = validate_json_object(&data, PAYLOAD_LIMITS);
    if !guard_errors.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "ValidationError", guard_errors);
    }

    let descriptor = match validate_patch_schema(&data) {
        Ok(d) => d,
        Err(details) => {
            let _ = state
                .event_log
                .append(EventKind::PatchEvent, "webhook_validation_error", json!({"payload": data, "errors": details}))
                .await;
            let perr = PatchplaneError::new(ErrorType::Validation, details.join("; "));
            record_error(state, &perr).await;
            return error_response(StatusCode::BAD_REQUEST, "ValidationError", details);
        }
    };

    let path = match state.store.save(&descriptor).await {
        Ok(path) => path,
        Err(err) => {
            tracing::error!(error = %err, patch_id = %descriptor.id, "failed to persist patch descriptor");
            let perr = PatchplaneError::new(ErrorType::Database, err.to_string()).with_context("patch_id", &descriptor.id);
            record_error(state, &perr).await;
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "failed to persist patch descriptor", vec![err.to_string()]);
        }
    };
    let filepath = path.display().to_string();
    let _ = state
        .event_log
        .append(EventKind::PatchEvent, "webhook_patch_saved", json!({"patch_id": descriptor.id, "path": filepath}))
        .await;

    let body = match serde_json::to_vec(&descriptor) {
        Ok(b) => b,
        Err(err) => {
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "failed to serialize patch descriptor", vec![err.to_string()]);
        }
    };
    let outcome = state.forwarder.forward(body).await;
    if !outcome.forwarded {
        let message = outcome.last_error.clone().unwrap_or_else(|| "forward failed".to_string());
        let perr = PatchplaneError::new(ErrorType::Network, message).with_context("patch_id", &descriptor.id);
        record_error(state, &perr).await;
    }

    (
        StatusCode::OK,
        Json(json!({
            "status": "success",
            "result": {
                "success": true,
                "patch_id": descriptor.id,
                "filepath": filepath,
                "message": "patch persisted",
                "forwarded": outcome.forwarded,
            }
        })),
    )
        .into_response()
}

async fn webhook_handler(State(state): State<Arc<IngestState>>, headers: HeaderMap, Json(data): Json<Value>) -> Response {
    if headers.contains_key(CHAT_SIGNATURE_HEADER) {
        // Delegated to the chat-platform collaborator; out of scope here.
        return (StatusCode::OK, Json(json!({"status": "success", "result": {"delegated": true}}))).into_response();
    }
    process_patch_descriptor(&state, data).await
}

async fn patches_handler(State(state): State<Arc<IngestState>>, Json(data): Json<Value>) -> Response {
    process_patch_descriptor(&state, data).await
}

async fn summaries_handler(State(state): State<Arc<IngestState>>, Json(data): Json<Value>) -> Response {
    let has_id = data.as_object().map(|o| o.contains_key("id")).unwrap_or(false);
    if !has_id {
        return error_response(StatusCode::BAD_REQUEST, "ValidationError", vec!["missing field 'id'".to_string()]);
    }
    let _ = state.event_log.append(EventKind::SystemEvent, "summary_received", data).await;
    (StatusCode::OK, Json(json!({"status": "success"}))).into_response()
}
