// SPDX-License-Identifier: MIT OR Apache-2.0
//! Middleware stack for the control-plane HTTP API.

use axum::{
    extract::Request,
    http::{HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use patchplane_cors::CorsManager;
use patchplane_ratelimit::RateLimiter;
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::info;
use uuid::Uuid;

/// Unique identifier attached to every inbound request, surfaced back on the
/// `x-request-id` response header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(pub Uuid);

/// Stamp every request with a [`RequestId`] and echo it on the response.
pub async fn request_id_middleware(mut req: Request, next: Next) -> Response {
    let id = RequestId(Uuid::new_v4());
    req.extensions_mut().insert(id);
    let mut resp = next.run(req).await;
    resp.headers_mut().insert(
        "x-request-id",
        HeaderValue::from_str(&id.0.to_string()).unwrap(),
    );
    resp
}

/// Logs one structured `tracing` event per completed request.
pub struct RequestLogger;

impl RequestLogger {
    /// `axum::middleware::from_fn` entry point.
    pub async fn layer(req: Request, next: Next) -> Response {
        let method = req.method().clone();
        let path = req.uri().path().to_owned();
        let start = Instant::now();
        let resp = next.run(req).await;
        let duration = start.elapsed();
        let status = resp.status().as_u16();
        info!(
            http.method = %method,
            http.path = %path,
            http.status = status,
            http.duration_ms = duration.as_millis() as u64,
            "request completed"
        );
        resp
    }
}

/// Admit or reject `req` under `rule_name` against the shared
/// [`RateLimiter`], rejecting with a structured `429` body once the
/// rule denies admission. Client identity falls back to `x-forwarded-for`
/// in the absence of authenticated identity.
///
/// Intended to be wrapped per route group via
/// `axum::middleware::from_fn(move |req, next| rate_limit_check(limiter.clone(), "webhook", req, next))`.
pub async fn rate_limit_check(limiter: Arc<RateLimiter>, rule_name: &'static str, req: Request, next: Next) -> Response {
    let client_id = req
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
        .to_string();

    match limiter.is_allowed(&client_id, rule_name) {
        Ok((true, _)) => next.run(req).await,
        Ok((false, info)) => (
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({
                "status": "error",
                "error": "RateLimitExceeded",
                "details": [format!("rate limit '{rule_name}' exceeded")],
                "remaining": info.remaining,
                "reset_time": info.reset_time,
            })),
        )
            .into_response(),
        Err(err) => {
            tracing::error!(error = %err, rule = rule_name, "rate limit rule missing");
            next.run(req).await
        }
    }
}

/// Evaluate `req` against the shared [`CorsManager`] and attach the
/// resulting headers to the response. Behind a mutex since
/// [`CorsManager::evaluate`] takes `&mut self` to record decision history.
///
/// Intended to be wrapped via
/// `axum::middleware::from_fn(move |req, next| cors_check(manager.clone(), req, next))`.
pub async fn cors_check(manager: Arc<Mutex<CorsManager>>, req: Request, next: Next) -> Response {
    let origin = req
        .headers()
        .get("origin")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();
    let method = req.method().as_str().to_string();
    let requested_headers: Vec<String> = req
        .headers()
        .get("access-control-request-headers")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.split(',').map(|h| h.trim().to_string()).collect())
        .unwrap_or_default();

    let decision = {
        let mut manager = manager.lock().await;
        manager.evaluate(&origin, &method, &requested_headers)
    };

    let mut resp = next.run(req).await;
    if decision.allowed {
        for (key, value) in &decision.response_headers {
            if let Ok(header_value) = HeaderValue::from_str(value) {
                if let Ok(name) = axum::http::HeaderName::try_from(key.as_str()) {
                    resp.headers_mut().insert(name, header_value);
                }
            }
        }
    }
    resp
}
