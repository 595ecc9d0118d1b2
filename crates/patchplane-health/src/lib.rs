// SPDX-License-Identifier: MIT OR Apache-2.0
//! Health Check Registry and Aggregator.
//!
//! Named checks run on a 30-second ticker; each produces a `(value,
//! message, details)` triple that is classified against the check's
//! warning/critical thresholds. A check that overruns its timeout is
//! forced to `critical` regardless of what it would have returned. The
//! aggregator rolls the latest per-check result into one system-wide
//! status every 30 seconds and carries the most recent resource sample
//! alongside it for the combined status view.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use patchplane_core::{ComponentType, HealthStatus};
use patchplane_resource::ResourceSample;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

/// Maximum retained check results across all checks.
pub const HISTORY_RING_SIZE: usize = 1_000;

/// A probe function: runs the check and reports a raw value, a
/// human-readable message, and free-form structured detail.
pub type CheckFn = std::sync::Arc<dyn Fn() -> BoxFuture<'static, (f64, String, Value)> + Send + Sync>;

/// A registered named check.
#[derive(Clone)]
pub struct HealthCheckDef {
    /// Unique check name.
    pub name: String,
    /// The kind of component this check probes.
    pub component_type: ComponentType,
    /// The probe itself.
    pub check_fn: CheckFn,
    /// Maximum time the probe may run before being forced `critical`.
    pub timeout: Duration,
    /// Value at or above which the status is `critical`.
    pub critical_threshold: f64,
    /// Value at or above which the status is `warning`.
    pub warning_threshold: f64,
    /// Whether this check is run by [`HealthRegistry::run_all_enabled`].
    pub enabled: bool,
}

impl HealthCheckDef {
    /// Build a check definition with a 5-second default timeout and
    /// enabled by default.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        component_type: ComponentType,
        critical_threshold: f64,
        warning_threshold: f64,
        check_fn: CheckFn,
    ) -> Self {
        Self {
            name: name.into(),
            component_type,
            check_fn,
            timeout: Duration::from_secs(5),
            critical_threshold,
            warning_threshold,
            enabled: true,
        }
    }
}

/// One recorded check outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckResult {
    /// Name of the check that produced this result.
    pub name: String,
    /// The kind of component probed.
    pub component_type: ComponentType,
    /// Derived status.
    pub status: HealthStatus,
    /// The raw value returned (or `critical_threshold` if the probe
    /// timed out).
    pub value: f64,
    /// Human-readable message (or a timeout notice).
    pub message: String,
    /// Free-form structured detail.
    pub details: Value,
    /// When the check ran.
    pub timestamp: DateTime<Utc>,
}

/// A registry of named health checks and their bounded result history.
pub struct HealthRegistry {
    checks: Mutex<HashMap<String, HealthCheckDef>>,
    history: Mutex<VecDeque<CheckResult>>,
}

impl Default for HealthRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthRegistry {
    /// Build an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            checks: Mutex::new(HashMap::new()),
            history: Mutex::new(VecDeque::new()),
        }
    }

    /// Register (or replace) a named check.
    pub fn register(&self, check: HealthCheckDef) {
        self.checks.lock().unwrap_or_else(|e| e.into_inner()).insert(check.name.clone(), check);
    }

    /// Enable or disable a registered check by name. No-op if unknown.
    pub fn set_enabled(&self, name: &str, enabled: bool) {
        if let Some(check) = self.checks.lock().unwrap_or_else(|e| e.into_inner()).get_mut(name) {
            check.enabled = enabled;
        }
    }

    /// Run a single named check, forcing `critical` if it overruns its
    /// timeout. Returns `None` if no check is registered under `name`.
    pub async fn run_check(&self, name: &str) -> Option<CheckResult> {
        let check = self.checks.lock().unwrap_or_else(|e| e.into_inner()).get(name).cloned()?;
        let result = self.run_one(&check).await;
        self.record(result.clone());
        Some(result)
    }

    async fn run_one(&self, check: &HealthCheckDef) -> CheckResult {
        let timestamp = Utc::now();
        match tokio::time::timeout(check.timeout, (check.check_fn)()).await {
            Ok((value, message, details)) => CheckResult {
                name: check.name.clone(),
                component_type: check.component_type,
                status: HealthStatus::from_thresholds(value, check.warning_threshold, check.critical_threshold),
                value,
                message,
                details,
                timestamp,
            },
            Err(_) => CheckResult {
                name: check.name.clone(),
                component_type: check.component_type,
                status: HealthStatus::Critical,
                value: check.critical_threshold,
                message: format!("check timed out after {:?}", check.timeout),
                details: Value::Null,
                timestamp,
            },
        }
    }

    fn record(&self, result: CheckResult) {
        let mut history = self.history.lock().unwrap_or_else(|e| e.into_inner());
        history.push_back(result);
        if history.len() > HISTORY_RING_SIZE {
            history.pop_front();
        }
    }

    /// Run every enabled check. Intended to be driven by a 30-second
    /// ticker.
    pub async fn run_all_enabled(&self) -> Vec<CheckResult> {
        let enabled: Vec<HealthCheckDef> =
            self.checks.lock().unwrap_or_else(|e| e.into_inner()).values().filter(|c| c.enabled).cloned().collect();
        let mut results = Vec::with_capacity(enabled.len());
        for check in &enabled {
            let result = self.run_one(check).await;
            self.record(result.clone());
            results.push(result);
        }
        results
    }

    /// Spawn the periodic check-running ticker at `interval_secs`
    /// cadence.
    pub fn spawn_ticker(self: std::sync::Arc<Self>, interval_secs: u64) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
            loop {
                interval.tick().await;
                self.run_all_enabled().await;
            }
        })
    }

    /// Return the retained result history, oldest first.
    #[must_use]
    pub fn history(&self) -> Vec<CheckResult> {
        self.history.lock().unwrap_or_else(|e| e.into_inner()).iter().cloned().collect()
    }

    /// Return the most recent result for each check name, in no
    /// particular order.
    #[must_use]
    pub fn latest_per_check(&self) -> Vec<CheckResult> {
        let history = self.history.lock().unwrap_or_else(|e| e.into_inner());
        let mut latest: HashMap<String, CheckResult> = HashMap::new();
        for result in history.iter() {
            latest.insert(result.name.clone(), result.clone());
        }
        latest.into_values().collect()
    }
}

/// System-wide status derived from the latest per-check results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemStatus {
    /// Every known check's latest result was `healthy`.
    Healthy,
    /// No check is `critical` but at least one is not `healthy`.
    Degraded,
    /// At least one check's latest result was `critical`.
    Critical,
}

/// Aggregated system-wide health view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregateHealth {
    /// Rolled-up status.
    pub status: SystemStatus,
    /// The per-check results this status was derived from.
    pub checks: Vec<CheckResult>,
    /// The most recently observed resource sample, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_resource_sample: Option<ResourceSample>,
    /// When this aggregate was produced.
    pub timestamp: DateTime<Utc>,
}

/// Produces a system-wide status by rolling up the registry's latest
/// per-check results, every 30 seconds.
pub struct HealthAggregator {
    registry: std::sync::Arc<HealthRegistry>,
    latest_resource_sample: Mutex<Option<ResourceSample>>,
}

impl HealthAggregator {
    /// Build an aggregator over the given registry.
    #[must_use]
    pub fn new(registry: std::sync::Arc<HealthRegistry>) -> Self {
        Self {
            registry,
            latest_resource_sample: Mutex::new(None),
        }
    }

    /// Record the latest resource sample to be carried alongside the
    /// aggregate status.
    pub fn set_latest_resource_sample(&self, sample: ResourceSample) {
        *self.latest_resource_sample.lock().unwrap_or_else(|e| e.into_inner()) = Some(sample);
    }

    /// Roll up the registry's latest per-check results into a
    /// system-wide status. No checks known yields `Healthy` with an
    /// empty check list.
    #[must_use]
    pub fn aggregate(&self) -> AggregateHealth {
        let checks = self.registry.latest_per_check();
        let status = if checks.iter().any(|c| c.status == HealthStatus::Critical) {
            SystemStatus::Critical
        } else if checks.iter().all(|c| c.status == HealthStatus::Healthy) {
            SystemStatus::Healthy
        } else {
            SystemStatus::Degraded
        };
        AggregateHealth {
            status,
            checks,
            latest_resource_sample: self.latest_resource_sample.lock().unwrap_or_else(|e| e.into_inner()).clone(),
            timestamp: Utc::now(),
        }
    }

    /// Spawn the periodic aggregation ticker at `interval_secs` cadence.
    /// The produced aggregate is discarded; callers that need it should
    /// call [`HealthAggregator::aggregate`] directly or poll
    /// [`HealthRegistry::latest_per_check`].
    pub fn spawn_ticker(self: std::sync::Arc<Self>, interval_secs: u64) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
            loop {
                interval.tick().await;
                self.aggregate();
            }
        })
    }
}
