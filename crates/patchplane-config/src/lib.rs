// SPDX-License-Identifier: MIT OR Apache-2.0
//! Configuration loading, validation, and merging for the control plane.
//!
//! This crate provides [`ControlPlaneConfig`] — the top-level runtime
//! settings — together with helpers for loading from TOML, applying the
//! documented environment-variable overrides, validating (hard errors vs.
//! advisory [`ConfigWarning`]s), and merging overlays.
#![deny(unsafe_code)]
#![warn(missing_docs)]

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors that can occur during configuration loading or validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The requested configuration file was not found.
    #[error("config file not found: {path}")]
    FileNotFound {
        /// Path that was requested.
        path: String,
    },

    /// The file could not be parsed as valid TOML.
    #[error("failed to parse config: {reason}")]
    ParseError {
        /// Human-readable parse error detail.
        reason: String,
    },

    /// Semantic validation failed (one or more problems).
    #[error("config validation failed: {reasons:?}")]
    ValidationError {
        /// Individual validation failure messages.
        reasons: Vec<String>,
    },
}

// ---------------------------------------------------------------------------
// Warnings
// ---------------------------------------------------------------------------

/// Advisory-level issues that do not prevent operation but deserve attention.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigWarning {
    /// A recommended optional field is missing.
    MissingOptionalField {
        /// Name of the missing field.
        field: String,
        /// Why it matters.
        hint: String,
    },
    /// A rate-limit rule has an unusually large window.
    LargeRateLimitWindow {
        /// Rule name.
        rule: String,
        /// Window size in seconds.
        secs: u64,
    },
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingOptionalField { field, hint } => {
                write!(f, "missing optional field '{field}': {hint}")
            }
            Self::LargeRateLimitWindow { rule, secs } => {
                write!(f, "rate limit rule '{rule}' has a large window ({secs}s)")
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Nested config shapes
// ---------------------------------------------------------------------------

/// A named rate-limit rule: `max_requests` admissions per
/// `window_seconds`.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct RateLimitRuleConfig {
    /// Maximum admissions within the window.
    pub max_requests: u32,
    /// Sliding window length, in seconds.
    pub window_seconds: u64,
}

/// Warning/critical thresholds for one sampled resource.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct ThresholdPair {
    /// Warning-level threshold.
    pub warning: f64,
    /// Critical-level threshold.
    pub critical: f64,
}

/// Resource Monitor thresholds, one pair per sampled dimension.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct ResourceThresholds {
    /// CPU percent thresholds.
    pub cpu: ThresholdPair,
    /// Memory percent thresholds.
    pub memory: ThresholdPair,
    /// Root-disk percent thresholds.
    pub disk: ThresholdPair,
    /// Process-count thresholds.
    pub process_count: ThresholdPair,
    /// Sampling interval, in seconds.
    pub sample_interval_secs: u64,
}

impl Default for ResourceThresholds {
    fn default() -> Self {
        Self {
            cpu: ThresholdPair {
                warning: 70.0,
                critical: 90.0,
            },
            memory: ThresholdPair {
                warning: 80.0,
                critical: 95.0,
            },
            disk: ThresholdPair {
                warning: 85.0,
                critical: 95.0,
            },
            process_count: ThresholdPair {
                warning: 200.0,
                critical: 300.0,
            },
            sample_interval_secs: 30,
        }
    }
}

/// The action a cleanup rule takes when it matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum CleanupAction {
    /// Send a polite stop signal.
    Terminate,
    /// Send an immediate kill signal.
    Kill,
    /// Reserved no-op.
    Restart,
}

/// A single process-cleanup rule.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct CleanupRuleConfig {
    /// Case-insensitive regex matched against the process name.
    pub name_pattern: String,
    /// Minimum process age, in hours, for the rule to match.
    pub max_age_hours: f64,
    /// CPU percent threshold (0 combined with `max_memory_percent == 0`
    /// means "zombie sweep": any non-zero age with zero cpu and zero memory
    /// matches).
    pub max_cpu_percent: f64,
    /// Memory percent threshold, see `max_cpu_percent`.
    pub max_memory_percent: f64,
    /// Action to take when this rule matches.
    pub action: CleanupAction,
    /// Ascending priority; lower values are evaluated first, first match
    /// wins.
    pub priority: u32,
}

/// Default cleanup rule set.
fn default_cleanup_rules() -> Vec<CleanupRuleConfig> {
    vec![
        CleanupRuleConfig {
            name_pattern: "python".into(),
            max_age_hours: 24.0,
            max_cpu_percent: 80.0,
            max_memory_percent: 80.0,
            action: CleanupAction::Terminate,
            priority: 10,
        },
        CleanupRuleConfig {
            name_pattern: "node".into(),
            max_age_hours: 12.0,
            max_cpu_percent: 80.0,
            max_memory_percent: 80.0,
            action: CleanupAction::Terminate,
            priority: 20,
        },
        CleanupRuleConfig {
            name_pattern: ".*".into(),
            max_age_hours: 48.0,
            max_cpu_percent: 0.0,
            max_memory_percent: 0.0,
            action: CleanupAction::Kill,
            priority: 100,
        },
    ]
}

/// Process names the cleanup scanner never acts on.
fn default_process_whitelist() -> Vec<String> {
    vec![
        "systemd".into(),
        "kernel".into(),
        "init".into(),
        "launchd".into(),
    ]
}

/// How the CORS manager evaluates a `(origin, method, headers)` triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum CorsPolicy {
    /// Every origin, method, and header is allowed.
    AllowAll,
    /// Origin, method, and every header must each appear in their
    /// respective allow-lists.
    Restricted,
    /// Only the origin is checked against `allowed_origins`; any method or
    /// header is permitted once the origin clears.
    Whitelist,
    /// `allowed_origins` is read as a block-list: any origin not in it is
    /// permitted, with unrestricted method/headers.
    Blacklist,
}

/// CORS configuration: policy plus the allow-lists it consults.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, JsonSchema)]
pub struct CorsConfig {
    /// Active policy.
    pub policy: CorsPolicy,
    /// Origins consulted by `Restricted`/`Whitelist`/`Blacklist`.
    pub allowed_origins: Vec<String>,
    /// Methods consulted by `Restricted`.
    pub allowed_methods: Vec<String>,
    /// Headers consulted by `Restricted`.
    pub allowed_headers: Vec<String>,
    /// Headers advertised via `Access-Control-Expose-Headers` on allow.
    pub expose_headers: Vec<String>,
    /// `Access-Control-Max-Age` value, in seconds.
    pub max_age_secs: u64,
    /// Whether `Access-Control-Allow-Credentials: true` is emitted on
    /// allow.
    pub allow_credentials: bool,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            policy: CorsPolicy::Restricted,
            allowed_origins: vec![
                "http://localhost:3000".into(),
                "http://localhost:8080".into(),
                "http://localhost:8081".into(),
                "http://localhost:8082".into(),
                "http://localhost:8083".into(),
                "https://slack.com".into(),
                "https://hooks.slack.com".into(),
                "https://webhook-thoughtmarks.thoughtmarks.app".into(),
                "https://thoughtmarks.app".into(),
            ],
            allowed_methods: vec![
                "GET".into(),
                "POST".into(),
                "PUT".into(),
                "DELETE".into(),
                "OPTIONS".into(),
                "PATCH".into(),
            ],
            allowed_headers: vec![
                "Content-Type".into(),
                "Authorization".into(),
                "X-Requested-With".into(),
                "Accept".into(),
                "Origin".into(),
            ],
            expose_headers: vec!["X-Total-Count".into(), "X-Page-Count".into(), "X-Current-Page".into()],
            max_age_secs: 86_400,
            allow_credentials: false,
        }
    }
}

/// Audit Log configuration: redaction, rotation, retention.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct AuditConfig {
    /// Field names whose values are replaced by `***REDACTED***` before
    /// writing, applied recursively.
    pub sensitive_keys: Vec<String>,
    /// Rotate the active file once it exceeds this size.
    pub max_file_size_mb: u64,
    /// Delete audit entries (from in-memory history) older than this many
    /// days.
    pub retention_days: u32,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            sensitive_keys: vec![
                "password".into(),
                "token".into(),
                "secret".into(),
                "signing_secret".into(),
                "api_key".into(),
            ],
            max_file_size_mb: 10,
            retention_days: 30,
        }
    }
}

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level runtime configuration for the control plane.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct ControlPlaneConfig {
    /// Downstream patch-execution runner URL (`LOCAL_GHOST_URL`).
    #[serde(default = "default_local_ghost_url")]
    pub local_ghost_url: String,

    /// Directory patch descriptors are persisted to (`PATCHES_DIRECTORY`).
    /// When unset, resolved at startup by [`resolve_patches_dir`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patches_directory: Option<String>,

    /// HTTP listen port (`PYTHON_PORT`).
    #[serde(default = "default_python_port")]
    pub python_port: u16,

    /// Skips chat-platform signature verification when set (`DEBUG_MODE`).
    #[serde(default)]
    pub debug_mode: bool,

    /// Chat-platform webhook signing secret (`SLACK_SIGNING_SECRET`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slack_signing_secret: Option<String>,
    /// Chat-platform notification webhook URL (`SLACK_WEBHOOK_URL`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slack_webhook_url: Option<String>,
    /// Chat-platform channel name (`SLACK_CHANNEL`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slack_channel: Option<String>,
    /// Chat-platform display username (`SLACK_USERNAME`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slack_username: Option<String>,

    /// Additional forward attempts after the first.
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,

    /// Log level override (e.g. `"debug"`, `"info"`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,

    /// Named rate-limit rules, keyed by rule name.
    #[serde(default = "default_rate_limit_rules")]
    pub rate_limit_rules: BTreeMap<String, RateLimitRuleConfig>,

    /// Resource Monitor thresholds.
    #[serde(default)]
    pub resource_thresholds: ResourceThresholds,

    /// Process Cleanup Scanner rules.
    #[serde(default = "default_cleanup_rules")]
    pub cleanup_rules: Vec<CleanupRuleConfig>,

    /// Process names the cleanup scanner never acts on.
    #[serde(default = "default_process_whitelist")]
    pub process_whitelist: Vec<String>,

    /// Audit Log settings.
    #[serde(default)]
    pub audit: AuditConfig,

    /// CORS policy and allow-lists.
    #[serde(default)]
    pub cors: CorsConfig,
}

fn default_local_ghost_url() -> String {
    "http://localhost:5053/patch".to_string()
}

fn default_python_port() -> u16 {
    5051
}

fn default_retry_count() -> u32 {
    2
}

fn default_rate_limit_rules() -> BTreeMap<String, RateLimitRuleConfig> {
    BTreeMap::from([
        (
            "webhook".to_string(),
            RateLimitRuleConfig {
                max_requests: 100,
                window_seconds: 60,
            },
        ),
        (
            "slack_command".to_string(),
            RateLimitRuleConfig {
                max_requests: 30,
                window_seconds: 60,
            },
        ),
    ])
}

impl Default for ControlPlaneConfig {
    fn default() -> Self {
        Self {
            local_ghost_url: default_local_ghost_url(),
            patches_directory: None,
            python_port: default_python_port(),
            debug_mode: false,
            slack_signing_secret: None,
            slack_webhook_url: None,
            slack_channel: None,
            slack_username: None,
            retry_count: default_retry_count(),
            log_level: Some("info".into()),
            rate_limit_rules: default_rate_limit_rules(),
            resource_thresholds: ResourceThresholds::default(),
            cleanup_rules: default_cleanup_rules(),
            process_whitelist: default_process_whitelist(),
            audit: AuditConfig::default(),
            cors: CorsConfig::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Load a [`ControlPlaneConfig`] from an optional TOML file path, then apply
/// environment-variable overrides.
pub fn load_config(path: Option<&Path>) -> Result<ControlPlaneConfig, ConfigError> {
    let mut config = match path {
        Some(p) => {
            let content = std::fs::read_to_string(p).map_err(|_| ConfigError::FileNotFound {
                path: p.display().to_string(),
            })?;
            parse_toml(&content)?
        }
        None => ControlPlaneConfig::default(),
    };
    apply_env_overrides(&mut config);
    Ok(config)
}

/// Parse a TOML string into a [`ControlPlaneConfig`].
pub fn parse_toml(content: &str) -> Result<ControlPlaneConfig, ConfigError> {
    toml::from_str::<ControlPlaneConfig>(content).map_err(|e| ConfigError::ParseError {
        reason: e.to_string(),
    })
}

// ---------------------------------------------------------------------------
// Env overrides
// ---------------------------------------------------------------------------

/// Apply the environment-variable overrides documented in:
/// `LOCAL_GHOST_URL`, `PATCHES_DIRECTORY`, `PYTHON_PORT`, `DEBUG_MODE`,
/// `SLACK_SIGNING_SECRET`, `SLACK_WEBHOOK_URL`, `SLACK_CHANNEL`,
/// `SLACK_USERNAME`.
pub fn apply_env_overrides(config: &mut ControlPlaneConfig) {
    if let Ok(val) = std::env::var("LOCAL_GHOST_URL") {
        config.local_ghost_url = val;
    }
    if let Ok(val) = std::env::var("PATCHES_DIRECTORY") {
        config.patches_directory = Some(val);
    }
    if let Ok(val) = std::env::var("PYTHON_PORT") {
        if let Ok(port) = val.parse::<u16>() {
            config.python_port = port;
        }
    }
    if let Ok(val) = std::env::var("DEBUG_MODE") {
        config.debug_mode = matches!(val.to_ascii_lowercase().as_str(), "1" | "true" | "yes");
    }
    if let Ok(val) = std::env::var("SLACK_SIGNING_SECRET") {
        config.slack_signing_secret = Some(val);
    }
    if let Ok(val) = std::env::var("SLACK_WEBHOOK_URL") {
        config.slack_webhook_url = Some(val);
    }
    if let Ok(val) = std::env::var("SLACK_CHANNEL") {
        config.slack_channel = Some(val);
    }
    if let Ok(val) = std::env::var("SLACK_USERNAME") {
        config.slack_username = Some(val);
    }
}

/// Resolve the patches directory: `PATCHES_DIRECTORY` env var, else a
/// cloud-specific default when a cloud-environment flag (`FLY_APP_NAME`) is
/// present, else `local_default`. Creates the directory if it does not
/// already exist.
///
/// # Errors
///
/// Returns an error if directory creation fails.
pub fn resolve_patches_dir(
    configured: Option<&str>,
    local_default: &str,
) -> std::io::Result<PathBuf> {
    let dir = if let Some(d) = configured {
        PathBuf::from(d)
    } else if std::env::var_os("FLY_APP_NAME").is_some() {
        PathBuf::from("/tmp/patches")
    } else {
        PathBuf::from(local_default)
    };
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

const VALID_LOG_LEVELS: &[&str] = &["error", "warn", "info", "debug", "trace"];
const LARGE_WINDOW_THRESHOLD_SECS: u64 = 3_600;

/// Validate a parsed configuration, returning advisory warnings.
///
/// Hard errors (invalid log level, zero-capacity rate-limit rules, invalid
/// thresholds, invalid regex in cleanup rules) are returned as a
/// [`ConfigError::ValidationError`]; soft issues come back as warnings.
pub fn validate_config(config: &ControlPlaneConfig) -> Result<Vec<ConfigWarning>, ConfigError> {
    let mut errors: Vec<String> = Vec::new();
    let mut warnings: Vec<ConfigWarning> = Vec::new();

    if let Some(ref level) = config.log_level
        && !VALID_LOG_LEVELS.contains(&level.as_str())
    {
        errors.push(format!("invalid log_level '{level}'"));
    }

    for (name, rule) in &config.rate_limit_rules {
        if rule.max_requests == 0 {
            errors.push(format!("rate limit rule '{name}': max_requests must be > 0"));
        }
        if rule.window_seconds == 0 {
            errors.push(format!("rate limit rule '{name}': window_seconds must be > 0"));
        } else if rule.window_seconds > LARGE_WINDOW_THRESHOLD_SECS {
            warnings.push(ConfigWarning::LargeRateLimitWindow {
                rule: name.clone(),
                secs: rule.window_seconds,
            });
        }
    }

    for pair in [
        ("cpu", &config.resource_thresholds.cpu),
        ("memory", &config.resource_thresholds.memory),
        ("disk", &config.resource_thresholds.disk),
        ("process_count", &config.resource_thresholds.process_count),
    ] {
        let (name, t) = pair;
        if t.warning > t.critical {
            errors.push(format!(
                "resource threshold '{name}': warning ({}) must be <= critical ({})",
                t.warning, t.critical
            ));
        }
    }

    for rule in &config.cleanup_rules {
        if regex::RegexBuilder::new(&rule.name_pattern)
            .case_insensitive(true)
            .build()
            .is_err()
        {
            errors.push(format!(
                "cleanup rule pattern '{}' is not a valid regex",
                rule.name_pattern
            ));
        }
    }

    if config.slack_webhook_url.is_none() {
        warnings.push(ConfigWarning::MissingOptionalField {
            field: "slack_webhook_url".into(),
            hint: "critical/error audit entries will not be forwarded to chat".into(),
        });
    }

    if errors.is_empty() {
        Ok(warnings)
    } else {
        Err(ConfigError::ValidationError { reasons: errors })
    }
}

// ---------------------------------------------------------------------------
// Merging
// ---------------------------------------------------------------------------

/// Merge two configurations. Values in `overlay` take precedence over
/// `base`. Maps (`rate_limit_rules`) are combined; on key collisions the
/// overlay entry wins. `cleanup_rules` from the overlay replace the base
/// list wholesale when non-empty.
#[must_use]
pub fn merge_configs(base: ControlPlaneConfig, overlay: ControlPlaneConfig) -> ControlPlaneConfig {
    let mut rate_limit_rules = base.rate_limit_rules;
    rate_limit_rules.extend(overlay.rate_limit_rules);
    let cleanup_rules = if overlay.cleanup_rules.is_empty() {
        base.cleanup_rules
    } else {
        overlay.cleanup_rules
    };
    ControlPlaneConfig {
        local_ghost_url: overlay.local_ghost_url,
        patches_directory: overlay.patches_directory.or(base.patches_directory),
        python_port: overlay.python_port,
        debug_mode: overlay.debug_mode || base.debug_mode,
        slack_signing_secret: overlay.slack_signing_secret.or(base.slack_signing_secret),
        slack_webhook_url: overlay.slack_webhook_url.or(base.slack_webhook_url),
        slack_channel: overlay.slack_channel.or(base.slack_channel),
        slack_username: overlay.slack_username.or(base.slack_username),
        retry_count: overlay.retry_count,
        log_level: overlay.log_level.or(base.log_level),
        rate_limit_rules,
        resource_thresholds: overlay.resource_thresholds,
        cleanup_rules,
        process_whitelist: if overlay.process_whitelist.is_empty() {
            base.process_whitelist
        } else {
            overlay.process_whitelist
        },
        audit: overlay.audit,
        cors: overlay.cors,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config_has_sensible_defaults() {
        let cfg = ControlPlaneConfig::default();
        assert_eq!(cfg.local_ghost_url, "http://localhost:5053/patch");
        assert_eq!(cfg.python_port, 5051);
        assert_eq!(cfg.retry_count, 2);
        assert!(!cfg.debug_mode);
        assert!(cfg.rate_limit_rules.contains_key("webhook"));
        assert_eq!(cfg.cleanup_rules.len(), 3);
        assert!(cfg.process_whitelist.contains(&"systemd".to_string()));
    }

    #[test]
    fn default_config_passes_validation_with_one_warning() {
        let cfg = ControlPlaneConfig::default();
        let warnings = validate_config(&cfg).expect("default config should be valid");
        assert_eq!(warnings.len(), 1);
        assert!(matches!(
            warnings[0],
            ConfigWarning::MissingOptionalField { .. }
        ));
    }

    #[test]
    fn parse_valid_toml_string() {
        let toml = r#"
            local_ghost_url = "http://example.com/patch"
            python_port = 9000
        "#;
        let cfg = parse_toml(toml).unwrap();
        assert_eq!(cfg.local_ghost_url, "http://example.com/patch");
        assert_eq!(cfg.python_port, 9000);
        // Defaults still apply for un-set fields.
        assert!(cfg.rate_limit_rules.contains_key("webhook"));
    }

    #[test]
    fn parse_invalid_toml_gives_parse_error() {
        let bad = "this is [not valid toml =";
        let err = parse_toml(bad).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn validation_catches_invalid_log_level() {
        let cfg = ControlPlaneConfig {
            log_level: Some("verbose".into()),
            ..Default::default()
        };
        let err = validate_config(&cfg).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError { .. }));
    }

    #[test]
    fn validation_catches_zero_max_requests() {
        let mut cfg = ControlPlaneConfig::default();
        cfg.rate_limit_rules.insert(
            "bad".into(),
            RateLimitRuleConfig {
                max_requests: 0,
                window_seconds: 60,
            },
        );
        let err = validate_config(&cfg).unwrap_err();
        match err {
            ConfigError::ValidationError { reasons } => {
                assert!(reasons.iter().any(|r| r.contains("max_requests")));
            }
            other => panic!("expected ValidationError, got {other:?}"),
        }
    }

    #[test]
    fn validation_catches_inverted_thresholds() {
        let mut cfg = ControlPlaneConfig::default();
        cfg.resource_thresholds.cpu = ThresholdPair {
            warning: 95.0,
            critical: 70.0,
        };
        let err = validate_config(&cfg).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError { .. }));
    }

    #[test]
    fn validation_catches_invalid_cleanup_regex() {
        let mut cfg = ControlPlaneConfig::default();
        cfg.cleanup_rules.push(CleanupRuleConfig {
            name_pattern: "[unterminated".into(),
            max_age_hours: 1.0,
            max_cpu_percent: 1.0,
            max_memory_percent: 1.0,
            action: CleanupAction::Terminate,
            priority: 1,
        });
        let err = validate_config(&cfg).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError { .. }));
    }

    #[test]
    fn large_rate_limit_window_produces_warning() {
        let mut cfg = ControlPlaneConfig::default();
        cfg.slack_webhook_url = Some("http://hooks.example.com".into());
        cfg.rate_limit_rules.insert(
            "bulk".into(),
            RateLimitRuleConfig {
                max_requests: 10,
                window_seconds: 7200,
            },
        );
        let warnings = validate_config(&cfg).unwrap();
        assert!(
            warnings
                .iter()
                .any(|w| matches!(w, ConfigWarning::LargeRateLimitWindow { .. }))
        );
    }

    #[test]
    fn merge_overlay_overrides_base_scalars() {
        let base = ControlPlaneConfig {
            local_ghost_url: "http://a".into(),
            ..Default::default()
        };
        let overlay = ControlPlaneConfig {
            local_ghost_url: "http://b".into(),
            ..Default::default()
        };
        let merged = merge_configs(base, overlay);
        assert_eq!(merged.local_ghost_url, "http://b");
    }

    #[test]
    fn merge_combines_rate_limit_rule_maps() {
        let mut base_rules = BTreeMap::new();
        base_rules.insert(
            "a".to_string(),
            RateLimitRuleConfig {
                max_requests: 1,
                window_seconds: 1,
            },
        );
        let base = ControlPlaneConfig {
            rate_limit_rules: base_rules,
            ..Default::default()
        };
        let mut overlay_rules = BTreeMap::new();
        overlay_rules.insert(
            "b".to_string(),
            RateLimitRuleConfig {
                max_requests: 2,
                window_seconds: 2,
            },
        );
        let overlay = ControlPlaneConfig {
            rate_limit_rules: overlay_rules,
            ..Default::default()
        };
        let merged = merge_configs(base, overlay);
        assert!(merged.rate_limit_rules.contains_key("a"));
        assert!(merged.rate_limit_rules.contains_key("b"));
    }

    #[test]
    fn resolve_patches_dir_uses_configured_value() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("patches");
        let resolved =
            resolve_patches_dir(Some(target.to_str().unwrap()), "should-not-be-used").unwrap();
        assert_eq!(resolved, target);
        assert!(target.exists());
    }

    #[test]
    #[allow(unsafe_code)]
    fn resolve_patches_dir_falls_back_to_local_default() {
        // SAFETY: single-threaded within this test; FLY_APP_NAME is not
        // otherwise set or read concurrently.
        unsafe {
            std::env::remove_var("FLY_APP_NAME");
        }
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("local-default");
        let resolved = resolve_patches_dir(None, local.to_str().unwrap()).unwrap();
        assert_eq!(resolved, local);
    }

    #[test]
    fn load_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("patchplane.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "python_port = 6000").unwrap();
        let cfg = load_config(Some(&path)).unwrap();
        assert_eq!(cfg.python_port, 6000);
    }

    #[test]
    fn load_missing_file_gives_file_not_found() {
        let err = load_config(Some(Path::new("/nonexistent/patchplane.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound { .. }));
    }

    #[test]
    fn load_none_returns_default() {
        let cfg = load_config(None).unwrap();
        assert_eq!(cfg.python_port, 5051);
    }

    #[test]
    fn toml_roundtrip() {
        let cfg = ControlPlaneConfig::default();
        let serialized = toml::to_string(&cfg).unwrap();
        let deserialized: ControlPlaneConfig = toml::from_str(&serialized).unwrap();
        assert_eq!(cfg, deserialized);
    }
}
