// SPDX-License-Identifier: MIT OR Apache-2.0
//! Named request-shape validation.
//!
//! Holds, per request type, an ordered list of field rules. Rule ordering
//! only matters for reporting: every rule is evaluated independently and
//! all failures for a request are collected into one [`ValidationReport`].

#![deny(unsafe_code)]
#![warn(missing_docs)]

use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;

/// How strictly non-required-field failures are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationLevel {
    /// Length/pattern/allowed-values/custom failures are reported as warnings.
    Basic,
    /// Length/pattern/allowed-values/custom failures are reported as errors.
    Strict,
    /// Like `Basic`, but also runs any registered custom validators.
    Custom,
}

/// The JSON type a field is expected to hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    /// A JSON string.
    String,
    /// A JSON number with no fractional part.
    Integer,
    /// A JSON boolean.
    Boolean,
    /// A JSON object.
    Dict,
    /// A JSON array.
    List,
}

impl FieldType {
    fn matches(self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Boolean => value.is_boolean(),
            Self::Dict => value.is_object(),
            Self::List => value.is_array(),
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Boolean => "boolean",
            Self::Dict => "dict",
            Self::List => "list",
        }
    }
}

/// A function that performs an extra, type-specific check on a field's
/// value, returning `Ok(())` or a human-readable failure reason.
pub type CustomValidator = fn(&Value) -> Result<(), String>;

/// A single field constraint within a named request type.
#[derive(Clone)]
pub struct FieldRule {
    /// Name of the field within the request body.
    pub field_name: String,
    /// Expected JSON type.
    pub field_type: FieldType,
    /// Whether the field must be present.
    pub required: bool,
    /// Minimum string length (string fields only).
    pub min_length: Option<usize>,
    /// Maximum string length (string fields only).
    pub max_length: Option<usize>,
    /// Regular expression the string value must match.
    pub pattern: Option<String>,
    /// Set of values the field may take.
    pub allowed_values: Option<Vec<Value>>,
    /// Additional programmatic check.
    pub custom: Option<CustomValidator>,
}

impl FieldRule {
    /// A required field with no further constraints.
    #[must_use]
    pub fn required(field_name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            field_name: field_name.into(),
            field_type,
            required: true,
            min_length: None,
            max_length: None,
            pattern: None,
            allowed_values: None,
            custom: None,
        }
    }

    /// An optional field with no further constraints.
    #[must_use]
    pub fn optional(field_name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            required: false,
            ..Self::required(field_name, field_type)
        }
    }

    /// Set a maximum string length.
    #[must_use]
    pub fn with_max_length(mut self, max_length: usize) -> Self {
        self.max_length = Some(max_length);
        self
    }

    /// Set a minimum string length.
    #[must_use]
    pub fn with_min_length(mut self, min_length: usize) -> Self {
        self.min_length = Some(min_length);
        self
    }

    /// Require the string value to match `pattern`.
    #[must_use]
    pub fn with_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = Some(pattern.into());
        self
    }

    /// Restrict the value to a fixed set.
    #[must_use]
    pub fn with_allowed_values(mut self, values: Vec<Value>) -> Self {
        self.allowed_values = Some(values);
        self
    }

    /// Attach a custom validator.
    #[must_use]
    pub fn with_custom(mut self, validator: CustomValidator) -> Self {
        self.custom = Some(validator);
        self
    }
}

/// A single validation failure or warning.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationError {
    /// Field the failure applies to.
    pub field_name: String,
    /// Short machine-readable category (`missing_required`, `type_mismatch`,
    /// `min_length`, `max_length`, `pattern`, `allowed_values`, `custom`).
    pub error_type: String,
    /// Human-readable explanation.
    pub message: String,
}

/// Outcome of validating one request against its named rule set.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationReport {
    /// `true` iff `errors` is empty.
    pub is_valid: bool,
    /// Hard failures.
    pub errors: Vec<ValidationError>,
    /// Soft failures (only produced under [`ValidationLevel::Basic`]/`Custom`).
    pub warnings: Vec<ValidationError>,
    /// The subset of `data` that rules were declared for, unchanged.
    pub validated_data: Value,
}

/// Errors raised by the validator itself, as opposed to a request failing
/// validation.
#[derive(Debug, thiserror::Error)]
pub enum ValidatorError {
    /// No rule set registered for the given request type name.
    #[error("no validation rules registered for request type '{0}'")]
    UnknownType(String),
}

/// Holds named rule sets and runs requests against them.
#[derive(Default)]
pub struct RequestValidator {
    rules: HashMap<String, Vec<FieldRule>>,
}

impl RequestValidator {
    /// Create a validator with no rule sets registered.
    #[must_use]
    pub fn new() -> Self {
        Self {
            rules: HashMap::new(),
        }
    }

    /// Create a validator pre-populated with the default rule sets for
    /// `webhook`, `patch`, `slack_command`, `slack_event`, `health_check`,
    /// and `resource_check`.
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut validator = Self::new();
        validator.register(
            "webhook",
            vec![
                FieldRule::required("source", FieldType::String),
                FieldRule::required("data", FieldType::Dict),
                FieldRule::optional("timestamp", FieldType::String),
                FieldRule::optional("version", FieldType::String),
            ],
        );
        validator.register(
            "patch",
            vec![
                FieldRule::required("patch", FieldType::Dict),
                FieldRule::required("target", FieldType::String),
                FieldRule::required("version", FieldType::String),
                FieldRule::optional("description", FieldType::String).with_max_length(500),
                FieldRule::optional("author", FieldType::String),
                FieldRule::optional("timestamp", FieldType::String),
            ],
        );
        validator.register(
            "slack_command",
            vec![
                FieldRule::required("command", FieldType::String),
                FieldRule::optional("text", FieldType::String),
                FieldRule::required("user_id", FieldType::String),
                FieldRule::required("channel_id", FieldType::String),
                FieldRule::required("team_id", FieldType::String),
                FieldRule::optional("response_url", FieldType::String),
            ],
        );
        validator.register(
            "slack_event",
            vec![
                FieldRule::required("type", FieldType::String),
                FieldRule::required("event", FieldType::Dict),
                FieldRule::required("team_id", FieldType::String),
                FieldRule::required("event_id", FieldType::String),
                FieldRule::required("event_time", FieldType::Integer),
            ],
        );
        validator.register(
            "health_check",
            vec![
                FieldRule::optional("component", FieldType::String),
                FieldRule::optional("detailed", FieldType::Boolean),
            ],
        );
        validator.register(
            "resource_check",
            vec![
                FieldRule::optional("resource_type", FieldType::String),
                FieldRule::optional("threshold", FieldType::Integer),
            ],
        );
        validator
    }

    /// Register (or replace) the rule set for a request type.
    pub fn register(&mut self, request_type: impl Into<String>, rules: Vec<FieldRule>) {
        self.rules.insert(request_type.into(), rules);
    }

    /// Validate `data` against the rule set named `request_type` at the
    /// given strictness level.
    ///
    /// # Errors
    ///
    /// Returns [`ValidatorError::UnknownType`] if no rule set is registered
    /// under that name.
    pub fn validate(
        &self,
        request_type: &str,
        data: &Value,
        level: ValidationLevel,
    ) -> Result<ValidationReport, ValidatorError> {
        let rules = self
            .rules
            .get(request_type)
            .ok_or_else(|| ValidatorError::UnknownType(request_type.to_string()))?;

        let mut errors = Vec::new();
        let mut warnings = Vec::new();
        let empty = serde_json::Map::new();
        let object = data.as_object().unwrap_or(&empty);

        for rule in rules {
            let field_value = object.get(&rule.field_name);

            let Some(value) = field_value else {
                if rule.required {
                    errors.push(ValidationError {
                        field_name: rule.field_name.clone(),
                        error_type: "missing_required".to_string(),
                        message: format!("field '{}' is required", rule.field_name),
                    });
                }
                continue;
            };

            if !rule.field_type.matches(value) {
                errors.push(ValidationError {
                    field_name: rule.field_name.clone(),
                    error_type: "type_mismatch".to_string(),
                    message: format!(
                        "field '{}' must be of type {}",
                        rule.field_name,
                        rule.field_type.name()
                    ),
                });
                continue;
            }

            let soft_as_error = matches!(level, ValidationLevel::Strict);
            let mut push = |error_type: &str, message: String| {
                let entry = ValidationError {
                    field_name: rule.field_name.clone(),
                    error_type: error_type.to_string(),
                    message,
                };
                if soft_as_error {
                    errors.push(entry);
                } else {
                    warnings.push(entry);
                }
            };

            if let Some(text) = value.as_str() {
                if let Some(min) = rule.min_length {
                    if text.len() < min {
                        push(
                            "min_length",
                            format!("field '{}' must be at least {min} characters", rule.field_name),
                        );
                    }
                }
                if let Some(max) = rule.max_length {
                    if text.len() > max {
                        push(
                            "max_length",
                            format!("field '{}' must be at most {max} characters", rule.field_name),
                        );
                    }
                }
                if let Some(pattern) = &rule.pattern {
                    match Regex::new(pattern) {
                        Ok(re) if !re.is_match(text) => {
                            push(
                                "pattern",
                                format!("field '{}' does not match required pattern", rule.field_name),
                            );
                        }
                        Err(e) => {
                            push("pattern", format!("invalid pattern for '{}': {e}", rule.field_name));
                        }
                        _ => {}
                    }
                }
            }

            if let Some(allowed) = &rule.allowed_values {
                if !allowed.contains(value) {
                    push(
                        "allowed_values",
                        format!("field '{}' is not an allowed value", rule.field_name),
                    );
                }
            }

            if matches!(level, ValidationLevel::Custom) {
                if let Some(validator) = rule.custom {
                    if let Err(reason) = validator(value) {
                        push("custom", reason);
                    }
                }
            }
        }

        Ok(ValidationReport {
            is_valid: errors.is_empty(),
            errors,
            warnings,
            validated_data: data.clone(),
        })
    }
}

/// A minimal ad-hoc JSON-schema checker honoring only the `type` keyword
/// and a top-level `required` list, for validation that does not warrant a
/// registered [`FieldRule`] set.
pub fn check_minimal_schema(schema: &Value, data: &Value) -> Vec<String> {
    let mut errors = Vec::new();

    if let Some(expected_type) = schema.get("type").and_then(Value::as_str) {
        let matches = match expected_type {
            "object" => data.is_object(),
            "array" => data.is_array(),
            "string" => data.is_string(),
            "integer" => data.is_i64() || data.is_u64(),
            "number" => data.is_number(),
            "boolean" => data.is_boolean(),
            _ => true,
        };
        if !matches {
            errors.push(format!("value is not of type '{expected_type}'"));
        }
    }

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        let empty = serde_json::Map::new();
        let object = data.as_object().unwrap_or(&empty);
        for field in required {
            if let Some(name) = field.as_str() {
                if !object.contains_key(name) {
                    errors.push(format!("missing required field '{name}'"));
                }
            }
        }
    }

    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn missing_required_field_is_an_error() {
        let validator = RequestValidator::with_defaults();
        let report = validator
            .validate("webhook", &json!({"data": {}}), ValidationLevel::Basic)
            .unwrap();
        assert!(!report.is_valid);
        assert!(report.errors.iter().any(|e| e.error_type == "missing_required" && e.field_name == "source"));
    }

    #[test]
    fn type_mismatch_is_always_an_error() {
        let validator = RequestValidator::with_defaults();
        let report = validator
            .validate(
                "webhook",
                &json!({"source": "x", "data": "not-an-object"}),
                ValidationLevel::Basic,
            )
            .unwrap();
        assert!(!report.is_valid);
        assert!(report.errors.iter().any(|e| e.error_type == "type_mismatch"));
    }

    #[test]
    fn max_length_is_warning_under_basic_and_error_under_strict() {
        let validator = RequestValidator::with_defaults();
        let long_desc = "x".repeat(600);
        let data = json!({
            "patch": {},
            "target": "f.py",
            "version": "1",
            "description": long_desc,
        });

        let basic = validator.validate("patch", &data, ValidationLevel::Basic).unwrap();
        assert!(basic.is_valid);
        assert_eq!(basic.warnings.len(), 1);

        let strict = validator.validate("patch", &data, ValidationLevel::Strict).unwrap();
        assert!(!strict.is_valid);
        assert_eq!(strict.errors.len(), 1);
    }

    #[test]
    fn allowed_values_restricts_the_field() {
        let mut validator = RequestValidator::new();
        validator.register(
            "thing",
            vec![FieldRule::required("status", FieldType::String)
                .with_allowed_values(vec![json!("open"), json!("closed")])],
        );
        let report = validator
            .validate("thing", &json!({"status": "pending"}), ValidationLevel::Basic)
            .unwrap();
        assert!(report.is_valid); // basic: warning only
        assert_eq!(report.warnings.len(), 1);
    }

    #[test]
    fn custom_validator_runs_only_under_custom_level() {
        fn even_length(v: &Value) -> Result<(), String> {
            let s = v.as_str().unwrap_or_default();
            if s.len() % 2 == 0 {
                Ok(())
            } else {
                Err("must have even length".to_string())
            }
        }

        let mut validator = RequestValidator::new();
        validator.register(
            "thing",
            vec![FieldRule::required("name", FieldType::String).with_custom(even_length)],
        );
        let data = json!({"name": "odd"});

        let basic = validator.validate("thing", &data, ValidationLevel::Basic).unwrap();
        assert!(basic.warnings.is_empty());

        let custom = validator.validate("thing", &data, ValidationLevel::Custom).unwrap();
        assert_eq!(custom.warnings.len(), 1);
    }

    #[test]
    fn unknown_request_type_is_an_error() {
        let validator = RequestValidator::with_defaults();
        let err = validator
            .validate("nonexistent", &json!({}), ValidationLevel::Basic)
            .unwrap_err();
        assert!(matches!(err, ValidatorError::UnknownType(name) if name == "nonexistent"));
    }

    #[test]
    fn default_rule_sets_cover_all_named_request_types() {
        let validator = RequestValidator::with_defaults();
        for name in ["webhook", "patch", "slack_command", "slack_event", "health_check", "resource_check"] {
            assert!(validator.rules.contains_key(name));
        }
    }

    #[test]
    fn minimal_schema_checker_reports_type_and_required_failures() {
        let schema = json!({"type": "object", "required": ["id"]});
        let errors = check_minimal_schema(&schema, &json!({"other": 1}));
        assert!(errors.iter().any(|e| e.contains("missing required field 'id'")));

        let errors = check_minimal_schema(&schema, &json!([1, 2]));
        assert!(errors.iter().any(|e| e.contains("not of type 'object'")));
    }

    #[test]
    fn optional_missing_field_produces_no_error() {
        let validator = RequestValidator::with_defaults();
        let report = validator
            .validate("health_check", &json!({}), ValidationLevel::Strict)
            .unwrap();
        assert!(report.is_valid);
    }
}
