// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
//! Composes every control-plane component crate into one HTTP daemon.

pub mod api;
pub mod middleware;

use axum::routing::{get, post};
use axum::Router;
use patchplane_audit::AuditLog;
use patchplane_config::ControlPlaneConfig;
use patchplane_cors::CorsManager;
use patchplane_error::PatchplaneErrorDto;
use patchplane_eventlog::EventLog;
use patchplane_forward::Forwarder;
use patchplane_health::{HealthAggregator, HealthRegistry};
use patchplane_ingest::IngestState;
use patchplane_processor::UnifiedProcessor;
use patchplane_ratelimit::RateLimiter;
use patchplane_resource::ResourceMonitor;
use patchplane_store::PatchStore;
use patchplane_validate::RequestValidator;
use patchplane_workflow::WorkflowEngine;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Shared application state reachable from every handler.
pub struct AppState {
    /// Loaded and validated control-plane configuration.
    pub config: ControlPlaneConfig,
    /// Where validated patch descriptors are persisted.
    pub store: PatchStore,
    /// Append-only bounded event journal.
    pub event_log: Arc<EventLog>,
    /// Hash-chained audit trail.
    pub audit_log: Arc<AuditLog>,
    /// Directory the audit trail writes under, kept for the read-only view.
    pub audit_dir: PathBuf,
    /// Per-client sliding-window admission control.
    pub rate_limiter: Arc<RateLimiter>,
    /// CORS policy evaluator.
    pub cors_manager: Arc<Mutex<CorsManager>>,
    /// CPU/memory/disk/network/process-count sampler.
    pub resource_monitor: Arc<ResourceMonitor>,
    /// Rule-driven process cleanup scanner.
    pub cleanup_scanner: Arc<patchplane_cleanup::ProcessCleanupScanner>,
    /// Health check registry.
    pub health_registry: Arc<HealthRegistry>,
    /// Health aggregation over the registry.
    pub health_aggregator: Arc<HealthAggregator>,
    /// Dependency-ordered sequential workflow engine.
    pub workflow_engine: Arc<WorkflowEngine>,
    /// Priority-queued async request processor.
    pub processor: Arc<UnifiedProcessor>,
    /// Named request-shape validator.
    pub validator: Arc<RequestValidator>,
    /// Bounded ring of recent error occurrences backing `/api/errors`,
    /// shared with the ingest pipeline so forward/validation failures
    /// recorded there show up in the same view.
    pub recent_errors: Arc<Mutex<Vec<PatchplaneErrorDto>>>,
    /// Set once the HTTP listener is bound, read by `/health`.
    pub port_bound: AtomicBool,
}

impl AppState {
    /// Assemble application state from its already-constructed
    /// collaborators.
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        config: ControlPlaneConfig,
        store: PatchStore,
        event_log: Arc<EventLog>,
        audit_log: Arc<AuditLog>,
        audit_dir: PathBuf,
        rate_limiter: Arc<RateLimiter>,
        cors_manager: Arc<Mutex<CorsManager>>,
        resource_monitor: Arc<ResourceMonitor>,
        cleanup_scanner: Arc<patchplane_cleanup::ProcessCleanupScanner>,
        health_registry: Arc<HealthRegistry>,
        health_aggregator: Arc<HealthAggregator>,
        workflow_engine: Arc<WorkflowEngine>,
        processor: Arc<UnifiedProcessor>,
        validator: Arc<RequestValidator>,
    ) -> Self {
        Self {
            config,
            store,
            event_log,
            audit_log,
            audit_dir,
            rate_limiter,
            cors_manager,
            resource_monitor,
            cleanup_scanner,
            health_registry,
            health_aggregator,
            workflow_engine,
            processor,
            validator,
            recent_errors: Arc::new(Mutex::new(Vec::new())),
            port_bound: AtomicBool::new(false),
        }
    }
}

/// Build the full daemon router: the ingest pipeline's own routes (rate
/// limited under the `webhook` rule) merged with every observability/
/// control route, wrapped in CORS, request-id, and logging middleware.
pub fn build_app(state: Arc<AppState>, forwarder: Forwarder) -> Router {
    let ingest_state = Arc::new(IngestState::new(
        PatchStore::new(state.store.patches_dir()),
        forwarder,
        state.event_log.clone(),
        state.audit_log.clone(),
        state.recent_errors.clone(),
    ));

    let rate_limiter = state.rate_limiter.clone();
    let ingest_routes = patchplane_ingest::router(ingest_state).layer(axum::middleware::from_fn(
        move |req: axum::extract::Request, next: axum::middleware::Next| {
            let limiter = rate_limiter.clone();
            middleware::rate_limit_check(limiter, "webhook", req, next)
        },
    ));

    let control_routes = Router::new()
        .route("/health", get(api::health_handler))
        .route("/events", get(api::events_all_handler))
        .route("/events/{kind}", get(api::events_filtered_handler))
        .route("/api/resources", get(api::resources_handler))
        .route("/api/processes", get(api::processes_handler))
        .route(
            "/api/processor",
            get(api::processor_stats_handler).post(api::processor_submit_handler),
        )
        .route(
            "/api/sequential",
            get(api::sequential_stats_handler).post(api::sequential_submit_handler),
        )
        .route("/api/sequential/{id}", get(api::sequential_status_handler))
        .route("/api/errors", get(api::errors_handler))
        .route("/api/rate-limits", get(api::rate_limits_handler))
        .route("/api/audit", get(api::audit_handler))
        .route("/api/server-fixes", get(api::server_fixes_handler))
        .route("/api/error-handler", get(api::error_handler_handler))
        .route("/api/health-endpoints", get(api::health_endpoints_handler))
        .route("/api/cors", get(api::cors_handler))
        .route("/api/validation", post(api::validation_handler))
        .with_state(state.clone());

    let cors_manager = state.cors_manager.clone();

    ingest_routes
        .merge(control_routes)
        .layer(axum::middleware::from_fn(
            move |req: axum::extract::Request, next: axum::middleware::Next| {
                let manager = cors_manager.clone();
                middleware::cors_check(manager, req, next)
            },
        ))
        .layer(axum::middleware::from_fn(middleware::RequestLogger::layer))
        .layer(axum::middleware::from_fn(middleware::request_id_middleware))
}
