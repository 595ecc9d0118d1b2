#![deny(unsafe_code)]
use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use futures::FutureExt;
use patchplane_audit::AuditLog;
use patchplane_cleanup::ProcessCleanupScanner;
use patchplane_config::{apply_env_overrides, load_config, resolve_patches_dir, validate_config, ControlPlaneConfig};
use patchplane_core::{ComponentType, RequestType};
use patchplane_cors::CorsManager;
use patchplane_daemon::{build_app, AppState};
use patchplane_eventlog::EventLog;
use patchplane_forward::Forwarder;
use patchplane_health::{HealthAggregator, HealthCheckDef, HealthRegistry};
use patchplane_processor::UnifiedProcessor;
use patchplane_ratelimit::{RateLimitRule, RateLimiter};
use patchplane_resource::ResourceMonitor;
use patchplane_store::PatchStore;
use patchplane_validate::RequestValidator;
use patchplane_workflow::WorkflowEngine;
use serde_json::json;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "patchplane-daemon", version, about = "Webhook-ingesting control-plane daemon")]
struct Args {
    /// Path to a TOML configuration file. Defaults are used when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Bind address; overrides the configured `python_port` when set.
    #[arg(long)]
    bind: Option<String>,

    /// Directory patches are persisted to, overriding config resolution.
    #[arg(long)]
    patches_dir: Option<PathBuf>,

    /// Directory the audit trail writes to.
    #[arg(long, default_value = "logs/audit")]
    audit_dir: PathBuf,

    /// Enable verbose request/response debug logging.
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = if args.debug {
        EnvFilter::new("patchplane=debug,tower_http=debug")
    } else {
        EnvFilter::new("patchplane=info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut config = load_config(args.config.as_deref()).context("load configuration")?;
    apply_env_overrides(&mut config);
    for warning in validate_config(&config).context("validate configuration")? {
        tracing::warn!(%warning, "configuration warning");
    }

    let patches_dir = match &args.patches_dir {
        Some(dir) => {
            tokio::fs::create_dir_all(dir).await.with_context(|| format!("create patches dir {}", dir.display()))?;
            dir.clone()
        }
        None => resolve_patches_dir(config.patches_directory.as_deref(), "patches")
            .context("resolve patches directory")?,
    };

    let store = PatchStore::new(patches_dir.as_path());
    let event_log = Arc::new(EventLog::new(patches_dir.join("events.json")));
    let audit_log = Arc::new(AuditLog::new(args.audit_dir.clone(), config.audit.clone()));
    let rate_limiter = Arc::new(build_rate_limiter(&config));
    let cors_manager = Arc::new(Mutex::new(CorsManager::new(config.cors.clone())));
    let resource_monitor = Arc::new(ResourceMonitor::new(config.resource_thresholds.clone()));
    let cleanup_scanner =
        Arc::new(ProcessCleanupScanner::new(config.cleanup_rules.clone(), config.process_whitelist.clone()));
    let health_registry = Arc::new(build_health_registry(&resource_monitor, &cleanup_scanner));
    let health_aggregator = Arc::new(HealthAggregator::new(health_registry.clone()));
    let workflow_engine = Arc::new(build_workflow_engine());
    let processor = Arc::new(build_processor(forwarder_for_processor(&config)));
    let validator = Arc::new(RequestValidator::with_defaults());

    let state = Arc::new(AppState::new(
        config.clone(),
        store,
        event_log,
        audit_log.clone(),
        args.audit_dir.clone(),
        rate_limiter.clone(),
        cors_manager,
        resource_monitor.clone(),
        cleanup_scanner.clone(),
        health_registry.clone(),
        health_aggregator.clone(),
        workflow_engine.clone(),
        processor.clone(),
        validator,
    ));

    let _resource_ticker = resource_monitor.clone().spawn_ticker(config.resource_thresholds.sample_interval_secs);
    let _cleanup_ticker = cleanup_scanner.clone().spawn_ticker(60);
    let _rate_limit_sweeper = rate_limiter.spawn_sweeper();
    let _health_ticker = health_registry.clone().spawn_ticker(30);
    let _health_aggregate_ticker = health_aggregator.clone().spawn_ticker(30);
    spawn_processor_loop(processor.clone());
    spawn_workflow_loop(workflow_engine.clone());
    spawn_audit_retention_sweep(audit_log);

    let app = build_app(state.clone(), Forwarder::new(config.local_ghost_url.clone(), config.retry_count));

    let bind = args.bind.unwrap_or_else(|| format!("0.0.0.0:{}", config.python_port));
    let listener = tokio::net::TcpListener::bind(&bind).await.with_context(|| format!("bind {bind}"))?;
    state.port_bound.store(true, Ordering::Relaxed);

    info!(bind = %bind, patches_dir = %patches_dir.display(), "patchplane-daemon listening");

    axum::serve(listener, app).await.context("serve")
}

/// Forwarder is cheap to construct (an HTTP client plus two owned
/// strings); built twice rather than threaded through `AppState` so the
/// processor's patch handler and the router's own ingest pipeline never
/// share a client whose in-flight state could leak between them.
fn forwarder_for_processor(config: &ControlPlaneConfig) -> Forwarder {
    Forwarder::new(config.local_ghost_url.clone(), config.retry_count)
}

fn build_rate_limiter(config: &ControlPlaneConfig) -> RateLimiter {
    let rules: HashMap<String, RateLimitRule> =
        config.rate_limit_rules.iter().map(|(name, cfg)| (name.clone(), RateLimitRule::from(cfg))).collect();
    RateLimiter::new(rules)
}

fn build_health_registry(
    resource_monitor: &Arc<ResourceMonitor>,
    cleanup_scanner: &Arc<ProcessCleanupScanner>,
) -> HealthRegistry {
    let registry = HealthRegistry::new();

    let resource_monitor = resource_monitor.clone();
    registry.register(HealthCheckDef::new("resources", ComponentType::System, 95.0, 80.0, Arc::new(move || {
        let resource_monitor = resource_monitor.clone();
        async move {
            match resource_monitor.latest_sample() {
                Some(sample) => {
                    let worst = sample.cpu_percent.max(sample.memory_percent).max(sample.disk_percent);
                    (worst, "resource sample".to_string(), json!(sample))
                }
                None => (0.0, "no resource sample yet".to_string(), json!(null)),
            }
        }
        .boxed()
    })));

    let cleanup_scanner = cleanup_scanner.clone();
    registry.register(HealthCheckDef::new("process_cleanup", ComponentType::Process, 1.0, 1.0, Arc::new(move || {
        let cleanup_scanner = cleanup_scanner.clone();
        async move {
            let history = cleanup_scanner.history();
            (0.0, format!("{} cleanup actions recorded", history.len()), json!(history.len()))
        }
        .boxed()
    })));

    registry
}

fn build_workflow_engine() -> WorkflowEngine {
    let mut engine = WorkflowEngine::new(1_000);
    for name in ["validate", "log", "process", "update_metrics", "backup", "apply", "verify", "update_status"] {
        engine.register_handler(name, Arc::new(|_data, _results| Ok(serde_json::Value::Bool(true))));
    }
    engine
}

fn build_processor(forwarder: Forwarder) -> UnifiedProcessor {
    let mut processor = UnifiedProcessor::new(1_000);
    let forwarder = Arc::new(forwarder);

    let patch_forwarder = forwarder.clone();
    processor.register_handler(RequestType::Patch, Arc::new(move |data| {
        let forwarder = patch_forwarder.clone();
        async move {
            let body = serde_json::to_vec(&data).map_err(|e| e.to_string())?;
            let outcome = forwarder.forward(body).await;
            if outcome.forwarded {
                Ok(json!({"forwarded": true, "attempts": outcome.attempts}))
            } else {
                Err(outcome.last_error.unwrap_or_else(|| "forward failed".to_string()))
            }
        }
        .boxed()
    }));

    for request_type in [
        RequestType::Webhook,
        RequestType::Summary,
        RequestType::SlackCommand,
        RequestType::SlackEvent,
        RequestType::HealthCheck,
        RequestType::ResourceCheck,
        RequestType::ProcessCheck,
    ] {
        processor.register_handler(request_type, Arc::new(|data| async move { Ok(data) }.boxed()));
    }

    processor
}

/// Drains the priority queue at a steady cadence; [`UnifiedProcessor`]
/// has no built-in ticker, unlike the registry/monitor/limiter
/// collaborators.
fn spawn_processor_loop(processor: Arc<UnifiedProcessor>) {
    tokio::spawn(async move {
        loop {
            if processor.process_next().await.is_none() {
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
    });
}

fn spawn_workflow_loop(engine: Arc<WorkflowEngine>) {
    tokio::spawn(async move {
        loop {
            if engine.process_next().await.is_none() {
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
    });
}

fn spawn_audit_retention_sweep(audit_log: Arc<AuditLog>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(3_600));
        loop {
            interval.tick().await;
            if let Err(err) = audit_log.sweep_retention(Utc::now()).await {
                tracing::error!(error = %err, "audit retention sweep failed");
            }
        }
    });
}

