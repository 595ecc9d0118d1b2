//! Shared domain types for the control plane: the patch descriptor wire
//! shape, request-type and priority enumerations, and the small set of
//! health/resource vocabulary shared by the observability crates.
//!
//! Keeping these in one crate (rather than re-declaring them per component)
//! avoids the "globals as singletons" smell the control plane's original
//! implementation had at the module level: one process-owned set of types,
//! constructed once, passed into every handler.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ---------------------------------------------------------------------------
// Patch Descriptor
// ---------------------------------------------------------------------------

/// A single text substitution to apply to `target_file`.
///
/// Both `pattern` and `replacement` are required and must be non-empty
/// (invariant enforced by `patchplane-validate`, not here — this type is a
/// plain wire shape).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct PatchBody {
    /// The text (or regex, see [`is_regex_pattern`]) to find.
    pub pattern: String,
    /// The text to substitute in place of `pattern`.
    pub replacement: String,
}

/// Client-supplied description of a single patch to apply.
///
/// Immutable once persisted; `metadata` is free-form and passed through
/// verbatim to the downstream runner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PatchDescriptor {
    /// Opaque client-supplied identifier.
    pub id: String,
    /// The role requesting this patch (e.g. `"ui"`, `"backend"`).
    pub role: String,
    /// Path to the file the patch applies to.
    pub target_file: String,
    /// The substitution itself.
    pub patch: PatchBody,
    /// Optional human-readable description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Whether to bypass the dangerous-pattern guard. Preserved verbatim in
    /// the stored record; only the (out-of-scope) applier honors it.
    #[serde(default, skip_serializing_if = "is_false")]
    pub force: bool,
    /// Free-form client metadata, passed through unmodified.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

fn is_false(b: &bool) -> bool {
    !*b
}

/// Characters whose presence in a pattern indicates it should be treated as
/// a regular expression rather than a literal string.
const REGEX_INDICATOR_CHARS: &[char] =
    &['^', '$', '.', '*', '+', '?', '{', '}', '[', ']', '(', ')', '|', '\\'];

/// Returns `true` if `pattern` contains any character that indicates it
/// should be interpreted as a regular expression rather than a literal
/// string match.
#[must_use]
pub fn is_regex_pattern(pattern: &str) -> bool {
    pattern.chars().any(|c| REGEX_INDICATOR_CHARS.contains(&c))
}

/// Patterns considered dangerous enough to reject without an explicit
/// `force` flag: they would match (and so replace) an
/// entire file's contents.
const DANGEROUS_PATTERNS: &[&str] = &["^.*$", ".*", "^", "$"];

/// Returns `true` if `pattern` is one of the reserved dangerous patterns.
#[must_use]
pub fn is_dangerous_pattern(pattern: &str) -> bool {
    DANGEROUS_PATTERNS.contains(&pattern)
}

/// Sanitize a client-supplied id for use in a filename: `/` and space become
/// `_`; every other character passes through unchanged.
#[must_use]
pub fn sanitize_id(id: &str) -> String {
    id.chars()
        .map(|c| if c == '/' || c == ' ' { '_' } else { c })
        .collect()
}

/// Build the persisted filename for a patch descriptor: `<sanitized
/// id>_<UTC yyyyMMdd_HHMMSS>.json`.
#[must_use]
pub fn patch_filename(id: &str, now: DateTime<Utc>) -> String {
    format!("{}_{}.json", sanitize_id(id), now.format("%Y%m%d_%H%M%S"))
}

// ---------------------------------------------------------------------------
// RequestType / Priority (shared by the Unified Processor and HTTP surface)
// ---------------------------------------------------------------------------

/// The set of request kinds the Unified Processor can dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum RequestType {
    /// A raw `/webhook` submission.
    Webhook,
    /// A `/api/patches` submission.
    Patch,
    /// A `/api/summaries` submission.
    Summary,
    /// A chat-platform slash command (delegated, tracked here for stats).
    SlackCommand,
    /// A chat-platform event callback.
    SlackEvent,
    /// An on-demand health check invocation.
    HealthCheck,
    /// An on-demand resource sample invocation.
    ResourceCheck,
    /// An on-demand process-cleanup scan invocation.
    ProcessCheck,
}

impl RequestType {
    /// All built-in request types, in declaration order.
    pub const ALL: &'static [RequestType] = &[
        Self::Webhook,
        Self::Patch,
        Self::Summary,
        Self::SlackCommand,
        Self::SlackEvent,
        Self::HealthCheck,
        Self::ResourceCheck,
        Self::ProcessCheck,
    ];
}

/// Priority used by both the Sequential Workflow Engine and the
/// Unified Processor priority queues. Higher variants are dequeued
/// first; ties break FIFO.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// Lowest dispatch priority.
    Low,
    /// Default dispatch priority.
    Normal,
    /// Above-default dispatch priority.
    High,
    /// Highest dispatch priority.
    Critical,
}

impl Default for Priority {
    fn default() -> Self {
        Self::Normal
    }
}

// ---------------------------------------------------------------------------
// Health / resource vocabulary
// ---------------------------------------------------------------------------

/// Status derived from comparing a sampled value against warning/critical
/// thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// Below both thresholds.
    Healthy,
    /// At or above the warning threshold, below critical.
    Warning,
    /// At or above the critical threshold, or the check timed out.
    Critical,
    /// No result recorded yet.
    Unknown,
}

impl HealthStatus {
    /// Derive a status from a sampled `value` and its thresholds:
    /// `value >= critical -> critical; value >= warning -> warning;
    /// else healthy`.
    #[must_use]
    pub fn from_thresholds(value: f64, warning: f64, critical: f64) -> Self {
        if value >= critical {
            Self::Critical
        } else if value >= warning {
            Self::Warning
        } else {
            Self::Healthy
        }
    }
}

/// The kind of component a health check probes, used to group checks in the
/// registry and on the `/api/health-endpoints` read-only view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ComponentType {
    /// The host operating system as a whole.
    System,
    /// An internal control-plane service/subsystem.
    Service,
    /// A database or persistence backend.
    Database,
    /// Network reachability of a peer.
    Network,
    /// Disk/filesystem capacity or writability.
    Storage,
    /// Memory usage.
    Memory,
    /// CPU usage.
    Cpu,
    /// Process liveness/count.
    Process,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_id_replaces_slash_and_space() {
        assert_eq!(sanitize_id("p/1 two"), "p_1_two");
        assert_eq!(sanitize_id("plain"), "plain");
    }

    #[test]
    fn sanitize_id_preserves_other_characters() {
        assert_eq!(sanitize_id("p.1-2_3"), "p.1-2_3");
    }

    #[test]
    fn patch_filename_format() {
        let ts = DateTime::parse_from_rfc3339("2026-01-02T03:04:05Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(patch_filename("p/1", ts), "p_1_20260102_030405.json");
    }

    #[test]
    fn is_regex_pattern_detects_indicator_chars() {
        assert!(is_regex_pattern("^foo$"));
        assert!(is_regex_pattern("a.b"));
        assert!(is_regex_pattern("a|b"));
        assert!(!is_regex_pattern("plain_text"));
    }

    #[test]
    fn is_dangerous_pattern_matches_reserved_set() {
        assert!(is_dangerous_pattern("^.*$"));
        assert!(is_dangerous_pattern(".*"));
        assert!(is_dangerous_pattern("^"));
        assert!(is_dangerous_pattern("$"));
        assert!(!is_dangerous_pattern("foo.*bar"));
    }

    #[test]
    fn health_status_from_thresholds() {
        assert_eq!(HealthStatus::from_thresholds(50.0, 70.0, 90.0), HealthStatus::Healthy);
        assert_eq!(HealthStatus::from_thresholds(75.0, 70.0, 90.0), HealthStatus::Warning);
        assert_eq!(HealthStatus::from_thresholds(95.0, 70.0, 90.0), HealthStatus::Critical);
        assert_eq!(HealthStatus::from_thresholds(90.0, 70.0, 90.0), HealthStatus::Critical);
    }

    #[test]
    fn priority_ordering() {
        assert!(Priority::Low < Priority::Normal);
        assert!(Priority::Normal < Priority::High);
        assert!(Priority::High < Priority::Critical);
    }

    #[test]
    fn priority_default_is_normal() {
        assert_eq!(Priority::default(), Priority::Normal);
    }

    #[test]
    fn patch_descriptor_serde_roundtrip() {
        let pd = PatchDescriptor {
            id: "p/1".into(),
            role: "ui".into(),
            target_file: "a.ts".into(),
            patch: PatchBody {
                pattern: "foo".into(),
                replacement: "bar".into(),
            },
            description: None,
            force: false,
            metadata: BTreeMap::new(),
        };
        let json = serde_json::to_string(&pd).unwrap();
        let back: PatchDescriptor = serde_json::from_str(&json).unwrap();
        assert_eq!(pd, back);
        assert!(!json.contains("force"));
    }

    #[test]
    fn request_type_all_has_eight_entries() {
        assert_eq!(RequestType::ALL.len(), 8);
    }
}
