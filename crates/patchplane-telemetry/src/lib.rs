// SPDX-License-Identifier: MIT OR Apache-2.0
//! Structured telemetry for the Unified Processor and other request
//! dispatchers: per-request outcome recording, running statistics, and a
//! span helper for ad-hoc tracing.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use tracing::info;

// ---------------------------------------------------------------------------
// RequestOutcome
// ---------------------------------------------------------------------------

/// Terminal status of one dispatched request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    /// The handler returned successfully.
    Completed,
    /// The handler raised an error on the final attempt.
    Failed,
    /// The handler did not finish within its configured timeout.
    Timeout,
}

/// One recorded request outcome.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RequestOutcome {
    /// Name of the request type dispatched (`webhook`, `patch`, …).
    pub request_type: String,
    /// Terminal status.
    pub status: OutcomeStatus,
    /// Wall-clock processing time, in milliseconds.
    pub processing_time_ms: u64,
    /// Number of attempts made before reaching this status.
    pub attempts: u32,
}

// ---------------------------------------------------------------------------
// ProcessorStats
// ---------------------------------------------------------------------------

/// Aggregated statistics across recorded request outcomes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProcessorStats {
    /// Total outcomes recorded.
    pub total: usize,
    /// Number completed successfully.
    pub completed: usize,
    /// Number that failed (including exhausted-retry and timeout).
    pub failed: usize,
    /// Running average processing time, in milliseconds, across all
    /// recorded outcomes.
    pub avg_processing_time_ms: f64,
    /// Median (p50) processing time, in milliseconds.
    pub p50_processing_time_ms: f64,
    /// 99th-percentile processing time, in milliseconds.
    pub p99_processing_time_ms: f64,
    /// Per-request-type outcome counts (deterministic ordering).
    pub by_request_type: BTreeMap<String, usize>,
}

impl Default for ProcessorStats {
    fn default() -> Self {
        Self {
            total: 0,
            completed: 0,
            failed: 0,
            avg_processing_time_ms: 0.0,
            p50_processing_time_ms: 0.0,
            p99_processing_time_ms: 0.0,
            by_request_type: BTreeMap::new(),
        }
    }
}

/// Linear-interpolation percentile over already-sorted values.
fn percentile(sorted: &[u64], pct: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    if sorted.len() == 1 {
        return sorted[0] as f64;
    }
    let rank = pct / 100.0 * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let frac = rank - lower as f64;
    sorted[lower] as f64 * (1.0 - frac) + sorted[upper] as f64 * frac
}

// ---------------------------------------------------------------------------
// ProcessorTelemetry
// ---------------------------------------------------------------------------

/// Thread-safe collector of request outcomes.
///
/// Wrap in an `Arc` to share across worker tasks (the inner storage is
/// already behind a `Mutex`).
#[derive(Debug, Clone)]
pub struct ProcessorTelemetry {
    inner: Arc<Mutex<Vec<RequestOutcome>>>,
}

impl Default for ProcessorTelemetry {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessorTelemetry {
    /// Create a new, empty collector.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Record one request's outcome.
    pub fn record(&self, outcome: RequestOutcome) {
        let mut data = self.inner.lock().expect("telemetry lock poisoned");
        data.push(outcome);
    }

    /// Return all recorded outcomes, in recording order.
    #[must_use]
    pub fn outcomes(&self) -> Vec<RequestOutcome> {
        let data = self.inner.lock().expect("telemetry lock poisoned");
        data.clone()
    }

    /// Number of outcomes recorded so far.
    #[must_use]
    pub fn len(&self) -> usize {
        let data = self.inner.lock().expect("telemetry lock poisoned");
        data.len()
    }

    /// Whether no outcomes have been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Compute an aggregated summary of all recorded outcomes.
    #[must_use]
    pub fn stats(&self) -> ProcessorStats {
        let data = self.inner.lock().expect("telemetry lock poisoned");
        if data.is_empty() {
            return ProcessorStats::default();
        }

        let total = data.len();
        let completed = data.iter().filter(|o| o.status == OutcomeStatus::Completed).count();
        let failed = total - completed;

        let mut durations: Vec<u64> = data.iter().map(|o| o.processing_time_ms).collect();
        durations.sort_unstable();
        let sum: u64 = durations.iter().sum();

        let mut by_request_type: BTreeMap<String, usize> = BTreeMap::new();
        for o in data.iter() {
            *by_request_type.entry(o.request_type.clone()).or_insert(0) += 1;
        }

        ProcessorStats {
            total,
            completed,
            failed,
            avg_processing_time_ms: sum as f64 / total as f64,
            p50_processing_time_ms: percentile(&durations, 50.0),
            p99_processing_time_ms: percentile(&durations, 99.0),
            by_request_type,
        }
    }

    /// Clear all recorded outcomes.
    pub fn clear(&self) {
        let mut data = self.inner.lock().expect("telemetry lock poisoned");
        data.clear();
    }
}

// ---------------------------------------------------------------------------
// TelemetrySpan
// ---------------------------------------------------------------------------

/// A structured span for ad-hoc tracing integration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetrySpan {
    /// Span name / operation.
    pub name: String,
    /// Arbitrary key-value attributes (deterministic ordering).
    pub attributes: BTreeMap<String, String>,
}

impl TelemetrySpan {
    /// Create a new span with the given name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: BTreeMap::new(),
        }
    }

    /// Insert an attribute.
    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Emit the span via `tracing::info!`.
    pub fn emit(&self) {
        info!(
            span_name = %self.name,
            attributes = ?self.attributes,
            "telemetry_span"
        );
    }
}

// ---------------------------------------------------------------------------
// TelemetryExporter
// ---------------------------------------------------------------------------

/// Trait for exporting collected statistics.
pub trait TelemetryExporter: Send + Sync {
    /// Export the given summary. Returns the serialized output on success.
    fn export(&self, stats: &ProcessorStats) -> Result<String, String>;
}

/// Exports statistics as pretty-printed JSON to a string.
#[derive(Debug, Default)]
pub struct JsonExporter;

impl TelemetryExporter for JsonExporter {
    fn export(&self, stats: &ProcessorStats) -> Result<String, String> {
        serde_json::to_string_pretty(stats).map_err(|e| e.to_string())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(request_type: &str, status: OutcomeStatus, duration_ms: u64) -> RequestOutcome {
        RequestOutcome {
            request_type: request_type.to_string(),
            status,
            processing_time_ms: duration_ms,
            attempts: 1,
        }
    }

    #[test]
    fn collector_new_is_empty() {
        let c = ProcessorTelemetry::new();
        assert!(c.is_empty());
        assert_eq!(c.len(), 0);
    }

    #[test]
    fn collector_record_and_len() {
        let c = ProcessorTelemetry::new();
        c.record(outcome("webhook", OutcomeStatus::Completed, 100));
        assert_eq!(c.len(), 1);
        assert!(!c.is_empty());
    }

    #[test]
    fn collector_outcomes_returns_all_in_order() {
        let c = ProcessorTelemetry::new();
        c.record(outcome("webhook", OutcomeStatus::Completed, 10));
        c.record(outcome("patch", OutcomeStatus::Failed, 20));
        let recorded = c.outcomes();
        assert_eq!(recorded.len(), 2);
        assert_eq!(recorded[0].request_type, "webhook");
        assert_eq!(recorded[1].request_type, "patch");
    }

    #[test]
    fn collector_clear() {
        let c = ProcessorTelemetry::new();
        c.record(outcome("webhook", OutcomeStatus::Completed, 50));
        c.clear();
        assert!(c.is_empty());
    }

    #[test]
    fn empty_collector_stats() {
        let c = ProcessorTelemetry::new();
        let s = c.stats();
        assert_eq!(s.total, 0);
        assert_eq!(s.avg_processing_time_ms, 0.0);
    }

    #[test]
    fn stats_split_completed_and_failed() {
        let c = ProcessorTelemetry::new();
        c.record(outcome("webhook", OutcomeStatus::Completed, 100));
        c.record(outcome("webhook", OutcomeStatus::Failed, 200));
        c.record(outcome("patch", OutcomeStatus::Timeout, 300));
        let stats = c.stats();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.failed, 2);
        assert_eq!(stats.by_request_type["webhook"], 2);
        assert_eq!(stats.by_request_type["patch"], 1);
    }

    #[test]
    fn stats_compute_average_and_percentiles() {
        let c = ProcessorTelemetry::new();
        for ms in [10, 20, 30, 40, 50] {
            c.record(outcome("webhook", OutcomeStatus::Completed, ms));
        }
        let stats = c.stats();
        assert_eq!(stats.avg_processing_time_ms, 30.0);
        assert_eq!(stats.p50_processing_time_ms, 30.0);
    }

    #[test]
    fn percentile_empty_is_zero() {
        assert_eq!(percentile(&[], 50.0), 0.0);
    }

    #[test]
    fn percentile_single_value() {
        assert_eq!(percentile(&[42], 99.0), 42.0);
    }

    #[test]
    fn span_builder_accumulates_attributes() {
        let span = TelemetrySpan::new("ingest").with_attribute("patch_id", "p1");
        assert_eq!(span.attributes.get("patch_id"), Some(&"p1".to_string()));
    }

    #[test]
    fn json_exporter_produces_valid_json() {
        let c = ProcessorTelemetry::new();
        c.record(outcome("webhook", OutcomeStatus::Completed, 10));
        let exported = JsonExporter.export(&c.stats()).unwrap();
        assert!(exported.contains("\"total\""));
    }
}
