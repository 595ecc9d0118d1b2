// SPDX-License-Identifier: MIT OR Apache-2.0
//! Per-client sliding-window admission control.
//!
//! Keeps, per `(rule_name, client_id)`, a FIFO of admission timestamps.
//! Adapted from the request-level `RateLimiter` in the daemon's middleware
//! layer, generalized from a single anonymous limiter to named,
//! independently configured rules keyed by caller-supplied client id.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use chrono::{DateTime, Utc};
use patchplane_config::RateLimitRuleConfig;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// A named admission rule: `max_requests` admissions per `window`.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitRule {
    /// Maximum admissions within the window.
    pub max_requests: u32,
    /// Sliding window length.
    pub window: Duration,
}

impl From<&RateLimitRuleConfig> for RateLimitRule {
    fn from(cfg: &RateLimitRuleConfig) -> Self {
        Self {
            max_requests: cfg.max_requests,
            window: Duration::from_secs(cfg.window_seconds),
        }
    }
}

/// Outcome of an admission check, returned alongside the bool.
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitInfo {
    /// Requests remaining in the current window after this check.
    pub remaining: u32,
    /// Wall-clock time at which the window is expected to have room again.
    pub reset_time: DateTime<Utc>,
}

/// Errors returned by [`RateLimiter`].
#[derive(Debug, thiserror::Error)]
pub enum RateLimitError {
    /// No rule registered under the given name.
    #[error("no rate limit rule named '{0}'")]
    UnknownRule(String),
}

/// Per `(rule_name, client_id)` sliding-window admission controller.
pub struct RateLimiter {
    rules: HashMap<String, RateLimitRule>,
    counters: Mutex<HashMap<(String, String), VecDeque<Instant>>>,
}

impl RateLimiter {
    /// Build a limiter from a named rule set (typically
    /// `ControlPlaneConfig::rate_limit_rules`).
    #[must_use]
    pub fn new(rules: HashMap<String, RateLimitRule>) -> Self {
        Self {
            rules,
            counters: Mutex::new(HashMap::new()),
        }
    }

    /// Register or replace a rule at runtime.
    pub fn register_rule(&mut self, name: impl Into<String>, rule: RateLimitRule) {
        self.rules.insert(name.into(), rule);
    }

    /// Check whether `client_id` may be admitted under `rule_name`.
    ///
    /// 1. Compute `cutoff = now - rule.window`; drop timestamps older than
    ///    the cutoff from the front of the FIFO.
    /// 2. If the remaining length is below `rule.max_requests`, admit:
    ///    append `now` and return `(true, remaining = max - len)`.
    /// 3. Otherwise reject: return `(false, remaining = 0)`.
    ///
    /// # Errors
    ///
    /// Returns [`RateLimitError::UnknownRule`] if `rule_name` was never
    /// registered.
    pub fn is_allowed(
        &self,
        client_id: &str,
        rule_name: &str,
    ) -> Result<(bool, RateLimitInfo), RateLimitError> {
        let rule = *self
            .rules
            .get(rule_name)
            .ok_or_else(|| RateLimitError::UnknownRule(rule_name.to_string()))?;
        let now = Instant::now();
        let cutoff = now.checked_sub(rule.window).unwrap_or(now);

        let mut counters = self.counters.lock().unwrap_or_else(|e| e.into_inner());
        let key = (rule_name.to_string(), client_id.to_string());
        let timestamps = counters.entry(key).or_default();
        while let Some(front) = timestamps.front() {
            if *front < cutoff {
                timestamps.pop_front();
            } else {
                break;
            }
        }

        let reset_time = Utc::now() + chrono::Duration::from_std(rule.window).unwrap_or_default();
        if timestamps.len() < rule.max_requests as usize {
            timestamps.push_back(now);
            let remaining = rule.max_requests - timestamps.len() as u32;
            Ok((true, RateLimitInfo { remaining, reset_time }))
        } else {
            Ok((
                false,
                RateLimitInfo {
                    remaining: 0,
                    reset_time,
                },
            ))
        }
    }

    /// Clear all recorded admissions for `(client_id, rule_name)`, as if the
    /// client had never been seen.
    pub fn reset_client(&self, client_id: &str, rule_name: &str) {
        let mut counters = self.counters.lock().unwrap_or_else(|e| e.into_inner());
        counters.remove(&(rule_name.to_string(), client_id.to_string()));
    }

    /// Prune every counter's expired timestamps. Intended to be invoked by a
    /// background ticker every 30 seconds so idle `(rule, client)`
    /// pairs do not hold stale timestamps indefinitely.
    pub fn sweep(&self) {
        let now = Instant::now();
        let mut counters = self.counters.lock().unwrap_or_else(|e| e.into_inner());
        for (key, timestamps) in counters.iter_mut() {
            let Some(rule) = self.rules.get(&key.0) else {
                continue;
            };
            let cutoff = now.checked_sub(rule.window).unwrap_or(now);
            while let Some(front) = timestamps.front() {
                if *front < cutoff {
                    timestamps.pop_front();
                } else {
                    break;
                }
            }
        }
        counters.retain(|_, timestamps| !timestamps.is_empty());
    }

    /// Spawn the 30-second background sweep as a long-lived task. Returns
    /// the [`tokio::task::JoinHandle`] so callers can await it on shutdown.
    pub fn spawn_sweeper(self: std::sync::Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(30));
            loop {
                interval.tick().await;
                self.sweep();
                tracing::debug!("rate limiter sweep completed");
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter_with(max_requests: u32, window_secs: u64) -> RateLimiter {
        let mut rules = HashMap::new();
        rules.insert(
            "webhook".to_string(),
            RateLimitRule {
                max_requests,
                window: Duration::from_secs(window_secs),
            },
        );
        RateLimiter::new(rules)
    }

    #[test]
    fn admits_up_to_max_then_rejects() {
        let limiter = limiter_with(2, 60);
        let (a, _) = limiter.is_allowed("c1", "webhook").unwrap();
        let (b, _) = limiter.is_allowed("c1", "webhook").unwrap();
        let (c, info) = limiter.is_allowed("c1", "webhook").unwrap();
        assert!(a);
        assert!(b);
        assert!(!c);
        assert_eq!(info.remaining, 0);
    }

    #[test]
    fn separate_clients_have_independent_counters() {
        let limiter = limiter_with(1, 60);
        let (a, _) = limiter.is_allowed("c1", "webhook").unwrap();
        let (b, _) = limiter.is_allowed("c2", "webhook").unwrap();
        assert!(a);
        assert!(b);
    }

    #[test]
    fn separate_rules_have_independent_counters() {
        let mut rules = HashMap::new();
        rules.insert(
            "webhook".to_string(),
            RateLimitRule {
                max_requests: 1,
                window: Duration::from_secs(60),
            },
        );
        rules.insert(
            "slack_command".to_string(),
            RateLimitRule {
                max_requests: 1,
                window: Duration::from_secs(60),
            },
        );
        let limiter = RateLimiter::new(rules);
        let (a, _) = limiter.is_allowed("c1", "webhook").unwrap();
        let (b, _) = limiter.is_allowed("c1", "slack_command").unwrap();
        assert!(a);
        assert!(b);
    }

    #[test]
    fn unknown_rule_is_an_error() {
        let limiter = limiter_with(1, 60);
        let err = limiter.is_allowed("c1", "nonexistent").unwrap_err();
        assert!(matches!(err, RateLimitError::UnknownRule(name) if name == "nonexistent"));
    }

    #[test]
    fn reset_client_restores_full_capacity() {
        let limiter = limiter_with(1, 60);
        limiter.is_allowed("c1", "webhook").unwrap();
        let (rejected, _) = limiter.is_allowed("c1", "webhook").unwrap();
        assert!(!rejected);

        limiter.reset_client("c1", "webhook");
        let (allowed, info) = limiter.is_allowed("c1", "webhook").unwrap();
        assert!(allowed);
        assert_eq!(info.remaining, 0); // max=1, now len=1 -> remaining = 0
    }

    #[test]
    fn sweep_drops_expired_entries_for_stale_clients() {
        let mut rules = HashMap::new();
        rules.insert(
            "webhook".to_string(),
            RateLimitRule {
                max_requests: 1,
                window: Duration::from_millis(1),
            },
        );
        let limiter = RateLimiter::new(rules);
        limiter.is_allowed("c1", "webhook").unwrap();
        std::thread::sleep(Duration::from_millis(5));
        limiter.sweep();
        let counters = limiter.counters.lock().unwrap();
        assert!(counters.is_empty());
    }

    #[test]
    fn register_rule_at_runtime() {
        let mut limiter = RateLimiter::new(HashMap::new());
        limiter.register_rule(
            "custom",
            RateLimitRule {
                max_requests: 5,
                window: Duration::from_secs(10),
            },
        );
        let (allowed, info) = limiter.is_allowed("c1", "custom").unwrap();
        assert!(allowed);
        assert_eq!(info.remaining, 4);
    }

    #[test]
    fn from_config_rule_converts_seconds_to_duration() {
        let cfg = RateLimitRuleConfig {
            max_requests: 10,
            window_seconds: 120,
        };
        let rule: RateLimitRule = (&cfg).into();
        assert_eq!(rule.max_requests, 10);
        assert_eq!(rule.window, Duration::from_secs(120));
    }
}
