// SPDX-License-Identifier: MIT OR Apache-2.0
//! Append-only audit trail.
//!
//! One JSON record per line, appended to a daily file. Each entry's `hash`
//! is the hex-encoded SHA-256 of the canonical concatenation of its other
//! fields — reproducible from the entry alone, in the same spirit as the
//! receipt chain's `compute_hash`/`canonicalize` pair, but over a flat
//! audit record rather than a whole receipt.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use anyhow::Context as _;
use chrono::{DateTime, Utc};
use patchplane_config::AuditConfig;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;

/// Severity of an audit entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditLevel {
    /// Diagnostic detail, not actionable on its own.
    Debug,
    /// Routine notice.
    Info,
    /// Notable but non-fatal condition.
    Warning,
    /// A request or operation failed.
    Error,
    /// Immediate attention required.
    Critical,
}

impl AuditLevel {
    fn as_str(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Critical => "critical",
        }
    }
}

/// The subsystem an audit entry concerns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditCategory {
    /// General system lifecycle events.
    System,
    /// Authentication, authorization, and signature checks.
    Security,
    /// Timing and throughput observations.
    Performance,
    /// An action a human or integration explicitly requested.
    UserAction,
    /// An error surfaced through the error taxonomy.
    Error,
    /// Patch ingest, persistence, or forwarding.
    Patch,
    /// Health check or aggregation events.
    Health,
    /// Resource sampling or alerting events.
    Resource,
    /// Process cleanup scanner events.
    Process,
}

impl AuditCategory {
    fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::Security => "security",
            Self::Performance => "performance",
            Self::UserAction => "user_action",
            Self::Error => "error",
            Self::Patch => "patch",
            Self::Health => "health",
            Self::Resource => "resource",
            Self::Process => "process",
        }
    }
}

/// A single audit record, as written to the daily log file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    /// When the event occurred.
    pub timestamp: DateTime<Utc>,
    /// Severity.
    pub level: AuditLevel,
    /// Subsystem category.
    pub category: AuditCategory,
    /// Human-readable description.
    pub message: String,
    /// Authenticated user, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Session identifier, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Originating IP address, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    /// Correlated request id, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// Component that raised the event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub component: Option<String>,
    /// Free-form payload, with sensitive keys redacted before hashing.
    #[serde(default)]
    pub data: Value,
    /// Hex-encoded, 16-character SHA-256 prefix over the entry's other
    /// fields, computed after redaction.
    pub hash: String,
}

/// Replace the value at any object key listed in `sensitive_keys` with the
/// literal `***REDACTED***`, recursively.
fn redact(value: &Value, sensitive_keys: &[String]) -> Value {
    match value {
        Value::Object(map) => {
            let redacted = map
                .iter()
                .map(|(k, v)| {
                    if sensitive_keys.iter().any(|s| s.eq_ignore_ascii_case(k)) {
                        (k.clone(), Value::String("***REDACTED***".to_string()))
                    } else {
                        (k.clone(), redact(v, sensitive_keys))
                    }
                })
                .collect();
            Value::Object(redacted)
        }
        Value::Array(items) => {
            Value::Array(items.iter().map(|v| redact(v, sensitive_keys)).collect())
        }
        other => other.clone(),
    }
}

/// Canonical string used as the hash preimage: every field but `hash`
/// itself, in a fixed order, independent of JSON key ordering.
fn canonicalize(entry_without_hash: &AuditEntry) -> String {
    format!(
        "{}|{}|{}|{}|{}|{}|{}|{}|{}|{}",
        entry_without_hash.timestamp.to_rfc3339(),
        entry_without_hash.level.as_str(),
        entry_without_hash.category.as_str(),
        entry_without_hash.message,
        entry_without_hash.user_id.as_deref().unwrap_or(""),
        entry_without_hash.session_id.as_deref().unwrap_or(""),
        entry_without_hash.ip_address.as_deref().unwrap_or(""),
        entry_without_hash.request_id.as_deref().unwrap_or(""),
        entry_without_hash.component.as_deref().unwrap_or(""),
        entry_without_hash.data,
    )
}

/// Compute the 16-hex-character entry hash, reproducible from the
/// entry's other fields.
#[must_use]
pub fn compute_hash(entry: &AuditEntry) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonicalize(entry).as_bytes());
    let digest = hasher.finalize();
    format!("{digest:x}")[..16].to_string()
}

/// Fields needed to record a new audit entry; `hash` is computed by
/// [`AuditLog::record`], not supplied by the caller.
#[derive(Debug, Clone, Default)]
pub struct AuditEntryInput {
    /// Severity.
    pub level: Option<AuditLevel>,
    /// Subsystem category.
    pub category: Option<AuditCategory>,
    /// Human-readable description.
    pub message: String,
    /// Authenticated user, if any.
    pub user_id: Option<String>,
    /// Session identifier, if any.
    pub session_id: Option<String>,
    /// Originating IP address, if known.
    pub ip_address: Option<String>,
    /// Correlated request id, if any.
    pub request_id: Option<String>,
    /// Component that raised the event.
    pub component: Option<String>,
    /// Free-form payload.
    pub data: Value,
}

/// Appends hash-stamped [`AuditEntry`] records to a daily, size-rotated
/// log file.
pub struct AuditLog {
    dir: PathBuf,
    config: AuditConfig,
    write_lock: Mutex<()>,
}

impl AuditLog {
    /// Construct an audit log writing under `dir`.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>, config: AuditConfig) -> Self {
        Self {
            dir: dir.into(),
            config,
            write_lock: Mutex::new(()),
        }
    }

    fn active_file_path(&self, now: DateTime<Utc>) -> PathBuf {
        self.dir.join(format!("audit_{}.log", now.format("%Y%m%d")))
    }

    /// Redact, hash, and append one entry. Rotates the active file first
    /// if it has grown past `max_file_size_mb`.
    ///
    /// # Errors
    ///
    /// Propagates directory creation, rotation, and write failures.
    pub async fn record(&self, input: AuditEntryInput) -> anyhow::Result<AuditEntry> {
        let _guard = self.write_lock.lock().await;

        fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("create audit dir {}", self.dir.display()))?;

        let now = Utc::now();
        let path = self.active_file_path(now);
        self.rotate_if_needed(&path).await?;

        let data = redact(&input.data, &self.config.sensitive_keys);
        let mut entry = AuditEntry {
            timestamp: now,
            level: input.level.unwrap_or(AuditLevel::Info),
            category: input.category.unwrap_or(AuditCategory::System),
            message: input.message,
            user_id: input.user_id,
            session_id: input.session_id,
            ip_address: input.ip_address,
            request_id: input.request_id,
            component: input.component,
            data,
            hash: String::new(),
        };
        entry.hash = compute_hash(&entry);

        let mut line = serde_json::to_string(&entry).context("serialize audit entry")?;
        line.push('\n');

        use tokio::io::AsyncWriteExt;
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .with_context(|| format!("open audit file {}", path.display()))?;
        file.write_all(line.as_bytes())
            .await
            .context("append audit entry")?;

        if matches!(entry.level, AuditLevel::Critical | AuditLevel::Error) {
            tracing::warn!(category = entry.category.as_str(), message = %entry.message, "audit-worthy event recorded");
        }

        Ok(entry)
    }

    async fn rotate_if_needed(&self, path: &Path) -> anyhow::Result<()> {
        let Ok(metadata) = fs::metadata(path).await else {
            return Ok(());
        };
        let max_bytes = self.config.max_file_size_mb.saturating_mul(1_000_000);
        if metadata.len() <= max_bytes {
            return Ok(());
        }
        let suffix = Utc::now().format("%Y%m%dT%H%M%SZ");
        let rotated = path.with_extension(format!("log.{suffix}"));
        fs::rename(path, &rotated)
            .await
            .with_context(|| format!("rotate audit file {}", path.display()))?;
        tracing::info!(from = %path.display(), to = %rotated.display(), "audit file rotated");
        Ok(())
    }

    /// Delete files whose date suffix is older than `retention_days`
    /// relative to `now`. Intended to run on an hourly sweep alongside the
    /// event log's cleaner.
    ///
    /// # Errors
    ///
    /// Returns an error only if the directory cannot be read; individual
    /// file removal failures are logged and skipped.
    pub async fn sweep_retention(&self, now: DateTime<Utc>) -> anyhow::Result<()> {
        let cutoff = now - chrono::Duration::days(i64::from(self.config.retention_days));
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(e) => e,
            Err(_) => return Ok(()),
        };
        while let Some(entry) = entries.next_entry().await.context("iterate audit dir")? {
            let path = entry.path();
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let Some(date_part) = name.strip_prefix("audit_") else {
                continue;
            };
            let Ok(date) = chrono::NaiveDate::parse_from_str(date_part, "%Y%m%d") else {
                continue;
            };
            if date.and_hms_opt(0, 0, 0).unwrap().and_utc() < cutoff {
                if let Err(err) = fs::remove_file(&path).await {
                    tracing::error!(path = %path.display(), error = ?err, "failed to remove expired audit file");
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config() -> AuditConfig {
        AuditConfig {
            sensitive_keys: vec!["password".to_string(), "token".to_string()],
            max_file_size_mb: 1,
            retention_days: 30,
        }
    }

    #[test]
    fn redact_masks_sensitive_keys_recursively() {
        let value = json!({"password": "hunter2", "nested": {"token": "abc"}, "safe": "ok"});
        let redacted = redact(&value, &["password".to_string(), "token".to_string()]);
        assert_eq!(redacted["password"], json!("***REDACTED***"));
        assert_eq!(redacted["nested"]["token"], json!("***REDACTED***"));
        assert_eq!(redacted["safe"], json!("ok"));
    }

    #[test]
    fn hash_is_reproducible_from_entry_fields() {
        let entry = AuditEntry {
            timestamp: Utc::now(),
            level: AuditLevel::Info,
            category: AuditCategory::System,
            message: "hello".to_string(),
            user_id: None,
            session_id: None,
            ip_address: None,
            request_id: None,
            component: None,
            data: json!({}),
            hash: String::new(),
        };
        let h1 = compute_hash(&entry);
        let h2 = compute_hash(&entry);
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 16);
    }

    #[test]
    fn hash_changes_if_message_changes() {
        let base = AuditEntry {
            timestamp: DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z").unwrap().with_timezone(&Utc),
            level: AuditLevel::Info,
            category: AuditCategory::System,
            message: "a".to_string(),
            user_id: None,
            session_id: None,
            ip_address: None,
            request_id: None,
            component: None,
            data: json!({}),
            hash: String::new(),
        };
        let mut other = base.clone();
        other.message = "b".to_string();
        assert_ne!(compute_hash(&base), compute_hash(&other));
    }

    #[tokio::test]
    async fn record_appends_a_line_and_redacts_data() {
        let dir = tempfile::tempdir().unwrap();
        let log = AuditLog::new(dir.path(), config());
        let entry = log
            .record(AuditEntryInput {
                level: Some(AuditLevel::Warning),
                category: Some(AuditCategory::Security),
                message: "login attempt".to_string(),
                data: json!({"password": "hunter2"}),
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(entry.data["password"], json!("***REDACTED***"));
        assert_eq!(entry.hash.len(), 16);

        let path = log.active_file_path(entry.timestamp);
        let contents = tokio::fs::read_to_string(path).await.unwrap();
        assert_eq!(contents.lines().count(), 1);
    }

    #[tokio::test]
    async fn record_rotates_when_file_exceeds_max_size() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config();
        cfg.max_file_size_mb = 0; // force rotation on the very next write
        let log = AuditLog::new(dir.path(), cfg);

        log.record(AuditEntryInput {
            message: "first".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();
        log.record(AuditEntryInput {
            message: "second".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();

        let mut rotated = 0;
        let mut entries = tokio::fs::read_dir(dir.path()).await.unwrap();
        while let Some(e) = entries.next_entry().await.unwrap() {
            if e.file_name().to_string_lossy().contains(".log.") {
                rotated += 1;
            }
        }
        assert_eq!(rotated, 1);
    }

    #[tokio::test]
    async fn sweep_retention_removes_expired_files_only() {
        let dir = tempfile::tempdir().unwrap();
        let log = AuditLog::new(dir.path(), config());
        tokio::fs::create_dir_all(dir.path()).await.unwrap();
        tokio::fs::write(dir.path().join("audit_20200101.log"), b"old\n").await.unwrap();
        tokio::fs::write(dir.path().join("audit_20991231.log"), b"future\n").await.unwrap();

        log.sweep_retention(Utc::now()).await.unwrap();

        assert!(!dir.path().join("audit_20200101.log").exists());
        assert!(dir.path().join("audit_20991231.log").exists());
    }
}
