// SPDX-License-Identifier: MIT OR Apache-2.0
//! CORS policy decisions.
//!
//! An explicit policy engine over [`patchplane_config::CorsConfig`]: the
//! caller gets back a decision and a bounded history of past decisions for
//! observability, rather than handing a fixed allow-list straight to
//! `tower_http::cors::CorsLayer`.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use chrono::{DateTime, Duration, Utc};
pub use patchplane_config::{CorsConfig, CorsPolicy};
use std::collections::{BTreeMap, VecDeque};

/// Record of a single CORS evaluation, kept for a bounded observability
/// window.
#[derive(Debug, Clone)]
pub struct CorsDecision {
    /// Requesting origin.
    pub origin: String,
    /// Requested method.
    pub method: String,
    /// Requested headers.
    pub headers: Vec<String>,
    /// Whether the request was allowed.
    pub allowed: bool,
    /// Response headers to apply, empty when `allowed` is `false`.
    pub response_headers: BTreeMap<String, String>,
    /// When the decision was made.
    pub timestamp: DateTime<Utc>,
}

/// Evaluates CORS requests against a [`CorsConfig`] and retains a 24-hour
/// decision history.
pub struct CorsManager {
    config: CorsConfig,
    history: VecDeque<CorsDecision>,
}

impl CorsManager {
    /// Build a manager from the given configuration.
    #[must_use]
    pub fn new(config: CorsConfig) -> Self {
        Self {
            config,
            history: VecDeque::new(),
        }
    }

    /// Evaluate one `(origin, method, headers)` triple, recording the
    /// decision in history and pruning entries older than 24 hours.
    pub fn evaluate(&mut self, origin: &str, method: &str, headers: &[String]) -> CorsDecision {
        let allowed = match self.config.policy {
            CorsPolicy::AllowAll => true,
            CorsPolicy::Restricted => {
                self.config.allowed_origins.iter().any(|o| o == origin)
                    && self.config.allowed_methods.iter().any(|m| m.eq_ignore_ascii_case(method))
                    && headers
                        .iter()
                        .all(|h| self.config.allowed_headers.iter().any(|a| a.eq_ignore_ascii_case(h)))
            }
            CorsPolicy::Whitelist => self.config.allowed_origins.iter().any(|o| o == origin),
            CorsPolicy::Blacklist => !self.config.allowed_origins.iter().any(|o| o == origin),
        };

        let response_headers = if allowed {
            self.build_headers(origin)
        } else {
            BTreeMap::new()
        };

        let decision = CorsDecision {
            origin: origin.to_string(),
            method: method.to_string(),
            headers: headers.to_vec(),
            allowed,
            response_headers,
            timestamp: Utc::now(),
        };

        self.history.push_back(decision.clone());
        self.prune_history(decision.timestamp);
        decision
    }

    fn build_headers(&self, origin: &str) -> BTreeMap<String, String> {
        let mut headers = BTreeMap::new();
        let origin_header = match self.config.policy {
            CorsPolicy::AllowAll => "*".to_string(),
            _ => origin.to_string(),
        };
        headers.insert("Access-Control-Allow-Origin".to_string(), origin_header);
        headers.insert(
            "Access-Control-Allow-Methods".to_string(),
            self.config.allowed_methods.join(", "),
        );
        headers.insert(
            "Access-Control-Allow-Headers".to_string(),
            self.config.allowed_headers.join(", "),
        );
        if !self.config.expose_headers.is_empty() {
            headers.insert(
                "Access-Control-Expose-Headers".to_string(),
                self.config.expose_headers.join(", "),
            );
        }
        headers.insert("Access-Control-Max-Age".to_string(), self.config.max_age_secs.to_string());
        if self.config.allow_credentials {
            headers.insert("Access-Control-Allow-Credentials".to_string(), "true".to_string());
        }
        headers
    }

    fn prune_history(&mut self, now: DateTime<Utc>) {
        let cutoff = now - Duration::hours(24);
        while let Some(front) = self.history.front() {
            if front.timestamp < cutoff {
                self.history.pop_front();
            } else {
                break;
            }
        }
    }

    /// Return the retained decision history, oldest first.
    #[must_use]
    pub fn history(&self) -> &VecDeque<CorsDecision> {
        &self.history
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn restricted_manager() -> CorsManager {
        CorsManager::new(CorsConfig {
            policy: CorsPolicy::Restricted,
            allowed_origins: vec!["https://ok.example".to_string()],
            allowed_methods: vec!["GET".to_string(), "POST".to_string()],
            allowed_headers: vec!["Content-Type".to_string()],
            ..CorsConfig::default()
        })
    }

    #[test]
    fn allow_all_always_allows_and_uses_wildcard_origin() {
        let mut manager = CorsManager::new(CorsConfig {
            policy: CorsPolicy::AllowAll,
            ..CorsConfig::default()
        });
        let decision = manager.evaluate("https://anything.example", "GET", &[]);
        assert!(decision.allowed);
        assert_eq!(decision.response_headers["Access-Control-Allow-Origin"], "*");
    }

    #[test]
    fn restricted_requires_origin_method_and_all_headers_to_match() {
        let mut manager = restricted_manager();
        let allowed = manager.evaluate(
            "https://ok.example",
            "POST",
            &["Content-Type".to_string()],
        );
        assert!(allowed.allowed);

        let bad_origin = manager.evaluate("https://bad.example", "POST", &[]);
        assert!(!bad_origin.allowed);
        assert!(bad_origin.response_headers.is_empty());

        let bad_header = manager.evaluate(
            "https://ok.example",
            "POST",
            &["X-Custom".to_string()],
        );
        assert!(!bad_header.allowed);
    }

    #[test]
    fn whitelist_ignores_method_and_headers() {
        let mut manager = CorsManager::new(CorsConfig {
            policy: CorsPolicy::Whitelist,
            allowed_origins: vec!["https://ok.example".to_string()],
            ..CorsConfig::default()
        });
        let decision = manager.evaluate("https://ok.example", "DELETE", &["X-Anything".to_string()]);
        assert!(decision.allowed);
    }

    #[test]
    fn blacklist_allows_everything_not_listed() {
        let mut manager = CorsManager::new(CorsConfig {
            policy: CorsPolicy::Blacklist,
            allowed_origins: vec!["https://blocked.example".to_string()],
            ..CorsConfig::default()
        });
        assert!(!manager.evaluate("https://blocked.example", "GET", &[]).allowed);
        assert!(manager.evaluate("https://anyone-else.example", "GET", &[]).allowed);
    }

    #[test]
    fn history_accumulates_decisions() {
        let mut manager = restricted_manager();
        manager.evaluate("https://ok.example", "GET", &[]);
        manager.evaluate("https://bad.example", "GET", &[]);
        assert_eq!(manager.history().len(), 2);
    }

    #[test]
    fn history_prunes_entries_older_than_24_hours() {
        let mut manager = restricted_manager();
        manager.history.push_back(CorsDecision {
            origin: "https://old.example".to_string(),
            method: "GET".to_string(),
            headers: vec![],
            allowed: true,
            response_headers: BTreeMap::new(),
            timestamp: Utc::now() - Duration::hours(48),
        });
        manager.evaluate("https://ok.example", "GET", &[]);
        assert_eq!(manager.history().len(), 1);
    }
}
