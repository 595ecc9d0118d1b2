//! Unified error taxonomy, severity, and recovery-action classification for
//! the control plane.
//!
//! Every [`PatchplaneError`] carries an [`ErrorType`] (the broad family), a
//! [`Severity`], a human-readable message, an optional cause chain, and
//! arbitrary key-value context. Use the builder returned by
//! [`PatchplaneError::new`] to construct errors fluently. [`classify`]
//! recovers an [`ErrorType`] from an arbitrary error's type name and message,
//! mirroring how the control plane classifies exceptions raised deep inside a
//! handler before they reach the HTTP boundary.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

// ---------------------------------------------------------------------------
// ErrorType
// ---------------------------------------------------------------------------

/// Broad family an error belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    /// Caller-supplied data failed schema or shape checks.
    Validation,
    /// Host-level failure (disk, process, OS resource).
    System,
    /// Transport-level failure talking to another service.
    Network,
    /// Persistence-layer failure.
    Database,
    /// Caller failed to prove identity or lacks permission.
    Authentication,
    /// An operation exceeded its allotted time.
    Timeout,
    /// A resource threshold (cpu, memory, disk, queue capacity) was exceeded.
    Resource,
    /// Did not match any known substring pattern.
    Unknown,
}

impl fmt::Display for ErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Validation => "validation",
            Self::System => "system",
            Self::Network => "network",
            Self::Database => "database",
            Self::Authentication => "authentication",
            Self::Timeout => "timeout",
            Self::Resource => "resource",
            Self::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

impl ErrorType {
    /// The default [`Severity`] assigned to a freshly classified error of
    /// this type, of the control-plane error handling design.
    #[must_use]
    pub fn default_severity(&self) -> Severity {
        match self {
            Self::Validation => Severity::Low,
            Self::Network | Self::Timeout => Severity::Medium,
            Self::Database | Self::Resource | Self::Unknown => Severity::High,
            Self::System | Self::Authentication => Severity::Critical,
        }
    }

    /// The default [`RecoveryAction`] for this error type.
    #[must_use]
    pub fn default_recovery(&self) -> RecoveryAction {
        match self {
            Self::Network | Self::Database | Self::Timeout => RecoveryAction::Retry,
            Self::System | Self::Resource => RecoveryAction::Restart,
            Self::Authentication => RecoveryAction::Escalate,
            Self::Validation => RecoveryAction::Ignore,
            Self::Unknown => RecoveryAction::Escalate,
        }
    }

    /// The HTTP status this error type should surface as,
    #[must_use]
    pub fn http_status(&self) -> u16 {
        match self {
            Self::Validation => 400,
            _ => 500,
        }
    }
}

/// Classify an error by substring match on its type name and message, the
/// way the original exception-oriented pipeline classified caught
/// exceptions before this taxonomy existed as a typed enum.
#[must_use]
pub fn classify(type_name: &str, message: &str) -> ErrorType {
    let haystack = format!("{type_name} {message}").to_ascii_lowercase();
    let hits: &[(&str, ErrorType)] = &[
        ("timeout", ErrorType::Timeout),
        ("timed out", ErrorType::Timeout),
        ("auth", ErrorType::Authentication),
        ("permission", ErrorType::Authentication),
        ("forbidden", ErrorType::Authentication),
        ("database", ErrorType::Database),
        ("sql", ErrorType::Database),
        ("connection", ErrorType::Network),
        ("network", ErrorType::Network),
        ("dns", ErrorType::Network),
        ("validation", ErrorType::Validation),
        ("invalid", ErrorType::Validation),
        ("schema", ErrorType::Validation),
        ("resource", ErrorType::Resource),
        ("capacity", ErrorType::Resource),
        ("memory", ErrorType::Resource),
        ("disk", ErrorType::Resource),
        ("os error", ErrorType::System),
        ("system", ErrorType::System),
    ];
    for (needle, kind) in hits {
        if haystack.contains(needle) {
            return *kind;
        }
    }
    ErrorType::Unknown
}

// ---------------------------------------------------------------------------
// Severity
// ---------------------------------------------------------------------------

/// How serious an error is, independent of its [`ErrorType`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Logged, otherwise ignored.
    Low,
    /// Logged and counted but does not page anyone.
    Medium,
    /// Recorded to the audit log at `error` level.
    High,
    /// Recorded to the audit log at `critical` level and may trigger
    /// escalation.
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// RecoveryAction
// ---------------------------------------------------------------------------

/// The action chosen to recover from an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryAction {
    /// Retry the operation with exponential backoff.
    Retry,
    /// Fall back to a degraded code path.
    Fallback,
    /// Restart the owning service process group.
    Restart,
    /// Drop the error; no action taken beyond recording it.
    Ignore,
    /// Notify an operator via the configured escalation channel.
    Escalate,
}

impl fmt::Display for RecoveryAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Retry => "retry",
            Self::Fallback => "fallback",
            Self::Restart => "restart",
            Self::Ignore => "ignore",
            Self::Escalate => "escalate",
        };
        f.write_str(s)
    }
}

/// Exponential backoff delay for attempt `attempt` (0-indexed), given a base
/// delay and a cap on the number of retries. Returns `None` once `attempt`
/// has exhausted `max_retries`.
///
/// `delay = base * 2^attempt`, matching's `retry_delay × 2^attempt`.
#[must_use]
pub fn backoff_delay(base: Duration, attempt: u32, max_retries: u32) -> Option<Duration> {
    if attempt >= max_retries {
        return None;
    }
    base.checked_mul(1u32.checked_shl(attempt).unwrap_or(u32::MAX))
}

// ---------------------------------------------------------------------------
// PatchplaneError
// ---------------------------------------------------------------------------

/// Unified control-plane error.
///
/// Carries an [`ErrorType`], a [`Severity`], a human-readable message, an
/// opaque error id, an optional source error for cause-chaining, and
/// arbitrary structured context.
///
/// # Builder usage
///
/// ```
/// use patchplane_error::{PatchplaneError, ErrorType, Severity};
///
/// let err = PatchplaneError::new(ErrorType::Network, "downstream unreachable")
///     .with_context("url", "http://localhost:5053/patch")
///     .with_severity(Severity::Medium);
/// ```
pub struct PatchplaneError {
    /// Opaque identifier, stable for the lifetime of this error value.
    pub error_id: String,
    /// Broad error family.
    pub error_type: ErrorType,
    /// Severity of this occurrence.
    pub severity: Severity,
    /// Human-readable description.
    pub message: String,
    /// Optional underlying cause.
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
    /// Arbitrary structured context for diagnostics.
    pub context: BTreeMap<String, serde_json::Value>,
}

impl PatchplaneError {
    /// Create a new error of `error_type` with its default severity.
    pub fn new(error_type: ErrorType, message: impl Into<String>) -> Self {
        let severity = error_type.default_severity();
        Self {
            error_id: uuid::Uuid::new_v4().to_string(),
            error_type,
            severity,
            message: message.into(),
            source: None,
            context: BTreeMap::new(),
        }
    }

    /// Override the default severity.
    #[must_use]
    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    /// Attach a key-value pair to the diagnostic context. Serialisation
    /// failures are silently skipped.
    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.context.insert(key.into(), v);
        }
        self
    }

    /// Attach an underlying cause.
    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// The recovery action this error's type prescribes by default.
    #[must_use]
    pub fn recovery_action(&self) -> RecoveryAction {
        self.error_type.default_recovery()
    }

    /// Whether this error should be recorded to the audit log at `error`
    /// level or above (`high` or `critical` severity).
    #[must_use]
    pub fn is_audit_worthy(&self) -> bool {
        self.severity >= Severity::High
    }

    /// The HTTP status this error surfaces as at the API boundary.
    #[must_use]
    pub fn http_status(&self) -> u16 {
        self.error_type.http_status()
    }

    /// Record this occurrence into a bounded recent-errors ring, and into
    /// `audit_log` when [`is_audit_worthy`](Self::is_audit_worthy) holds.
    ///
    /// Shared by every crate that can raise a [`PatchplaneError`] along a
    /// real failure path, so `/api/errors` and the audit trail see every
    /// occurrence regardless of which component recorded it.
    pub async fn record(
        &self,
        recent_errors: &tokio::sync::Mutex<Vec<PatchplaneErrorDto>>,
        audit_log: &patchplane_audit::AuditLog,
    ) {
        {
            let mut errors = recent_errors.lock().await;
            errors.push(PatchplaneErrorDto::from(self));
            let overflow = errors.len().saturating_sub(MAX_RECENT_ERRORS);
            if overflow > 0 {
                errors.drain(0..overflow);
            }
        }
        if self.is_audit_worthy() {
            let level = if self.severity == Severity::Critical {
                patchplane_audit::AuditLevel::Critical
            } else {
                patchplane_audit::AuditLevel::Error
            };
            let _ = audit_log
                .record(patchplane_audit::AuditEntryInput {
                    level: Some(level),
                    category: Some(patchplane_audit::AuditCategory::Error),
                    message: self.message.clone(),
                    request_id: None,
                    data: serde_json::json!({"error_id": self.error_id, "error_type": self.error_type}),
                    ..Default::default()
                })
                .await;
        }
    }
}

/// Number of occurrences retained by [`PatchplaneError::record`]'s ring
/// before the oldest are dropped.
const MAX_RECENT_ERRORS: usize = 200;

impl fmt::Debug for PatchplaneError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("PatchplaneError");
        d.field("error_id", &self.error_id);
        d.field("error_type", &self.error_type);
        d.field("severity", &self.severity);
        d.field("message", &self.message);
        if let Some(ref src) = self.source {
            d.field("source", &src.to_string());
        }
        if !self.context.is_empty() {
            d.field("context", &self.context);
        }
        d.finish()
    }
}

impl fmt::Display for PatchplaneError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}/{}] {} (id={})",
            self.error_type, self.severity, self.message, self.error_id
        )
    }
}

impl std::error::Error for PatchplaneError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

/// Serialisable snapshot of a [`PatchplaneError`] (without the opaque
/// source), suitable for the `/api/errors` read-only view.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PatchplaneErrorDto {
    /// Opaque error id.
    pub error_id: String,
    /// Error family.
    pub error_type: ErrorType,
    /// Severity.
    pub severity: Severity,
    /// Human-readable message.
    pub message: String,
    /// Structured context.
    pub context: BTreeMap<String, serde_json::Value>,
    /// String representation of the source error, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_message: Option<String>,
}

impl From<&PatchplaneError> for PatchplaneErrorDto {
    fn from(err: &PatchplaneError) -> Self {
        Self {
            error_id: err.error_id.clone(),
            error_type: err.error_type,
            severity: err.severity,
            message: err.message.clone(),
            context: err.context.clone(),
            source_message: err.source.as_ref().map(|s| s.to_string()),
        }
    }
}
