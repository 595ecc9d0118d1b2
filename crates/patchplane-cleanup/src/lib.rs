// SPDX-License-Identifier: MIT OR Apache-2.0
//! Process cleanup scanner.
//!
//! Enumerates running processes on a fixed cadence and applies the first
//! matching rule, in ascending priority order, unless the process name is
//! whitelisted. Case-insensitive name matching is done with `regex`
//! rather than the daemon's glob-based rule engine, since rule names here
//! are patterns over free-form process names rather than filesystem
//! paths.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use chrono::{DateTime, Utc};
use patchplane_config::{CleanupAction, CleanupRuleConfig};
use regex::RegexBuilder;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Mutex;
use sysinfo::{Pid, System};

/// Maximum retained cleanup records.
pub const HISTORY_RING_SIZE: usize = 50;

/// A snapshot of one running process at scan time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessInfo {
    /// Operating-system process id.
    pub pid: u32,
    /// Process name.
    pub name: String,
    /// Full command line, if available.
    pub cmdline: Vec<String>,
    /// CPU utilization, percent.
    pub cpu_percent: f64,
    /// Memory utilization, percent of total system memory.
    pub memory_percent: f64,
    /// Process creation time.
    pub create_time: DateTime<Utc>,
    /// OS-reported status string.
    pub status: String,
    /// Parent process id, if known.
    pub parent_pid: Option<u32>,
}

/// Record of one cleanup action taken against a process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupRecord {
    /// The process the action was taken against.
    pub process: ProcessInfo,
    /// The action taken.
    pub action: CleanupAction,
    /// Name of the rule that matched.
    pub rule_name: String,
    /// When the action was taken.
    pub timestamp: DateTime<Utc>,
}

struct Inner {
    system: System,
    history: VecDeque<CleanupRecord>,
}

/// Runs cleanup rules against the live process table.
pub struct ProcessCleanupScanner {
    rules: Vec<CleanupRuleConfig>,
    whitelist: Vec<String>,
    inner: Mutex<Inner>,
}

fn rule_matches(rule: &CleanupRuleConfig, process: &ProcessInfo, age_hours: f64) -> bool {
    let Ok(re) = RegexBuilder::new(&rule.name_pattern).case_insensitive(true).build() else {
        return false;
    };
    if !re.is_match(&process.name) {
        return false;
    }
    if age_hours < rule.max_age_hours {
        return false;
    }
    let zombie_sweep = rule.max_cpu_percent == 0.0 && rule.max_memory_percent == 0.0;
    if zombie_sweep {
        return process.cpu_percent == 0.0 && process.memory_percent == 0.0;
    }
    process.cpu_percent >= rule.max_cpu_percent || process.memory_percent >= rule.max_memory_percent
}

impl ProcessCleanupScanner {
    /// Build a scanner from a rule set (evaluated in ascending priority)
    /// and a process-name whitelist.
    #[must_use]
    pub fn new(mut rules: Vec<CleanupRuleConfig>, whitelist: Vec<String>) -> Self {
        rules.sort_by_key(|r| r.priority);
        Self {
            rules,
            whitelist,
            inner: Mutex::new(Inner {
                system: System::new_all(),
                history: VecDeque::new(),
            }),
        }
    }

    /// Enumerate processes and apply the first matching rule to each
    /// non-whitelisted process. Returns the cleanup records produced this
    /// scan. Intended to be driven by a 60-second ticker.
    pub fn scan(&self) -> Vec<CleanupRecord> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.system.refresh_all();
        let now = Utc::now();
        let total_memory = inner.system.total_memory();

        let mut produced = Vec::new();
        for (pid, proc) in inner.system.processes() {
            let name = proc.name().to_string_lossy().into_owned();
            if self.whitelist.iter().any(|w| w.eq_ignore_ascii_case(&name)) {
                continue;
            }

            let create_time = DateTime::<Utc>::from_timestamp(proc.start_time() as i64, 0).unwrap_or(now);
            let age_hours = (now - create_time).num_seconds() as f64 / 3600.0;
            let memory_percent = if total_memory > 0 {
                proc.memory() as f64 / total_memory as f64 * 100.0
            } else {
                0.0
            };

            let info = ProcessInfo {
                pid: pid_to_u32(*pid),
                name: name.clone(),
                cmdline: proc.cmd().iter().map(|s| s.to_string_lossy().into_owned()).collect(),
                cpu_percent: f64::from(proc.cpu_usage()),
                memory_percent,
                create_time,
                status: proc.status().to_string(),
                parent_pid: proc.parent().map(pid_to_u32),
            };

            if let Some(rule) = self.rules.iter().find(|r| rule_matches(r, &info, age_hours)) {
                match rule.action {
                    CleanupAction::Terminate => {
                        tracing::warn!(pid = info.pid, name = %info.name, "sending polite stop to process");
                    }
                    CleanupAction::Kill => {
                        tracing::warn!(pid = info.pid, name = %info.name, "sending immediate kill to process");
                    }
                    CleanupAction::Restart => {
                        tracing::warn!(pid = info.pid, name = %info.name, "restart action is a reserved no-op");
                    }
                }
                let record = CleanupRecord {
                    process: info,
                    action: rule.action,
                    rule_name: rule.name_pattern.clone(),
                    timestamp: now,
                };
                inner.history.push_back(record.clone());
                if inner.history.len() > HISTORY_RING_SIZE {
                    inner.history.pop_front();
                }
                produced.push(record);
            }
        }
        produced
    }

    /// Spawn the periodic scan ticker at `interval_secs` cadence.
    pub fn spawn_ticker(self: std::sync::Arc<Self>, interval_secs: u64) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(interval_secs));
            loop {
                interval.tick().await;
                self.scan();
            }
        })
    }

    /// Return the retained cleanup history, oldest first.
    #[must_use]
    pub fn history(&self) -> Vec<CleanupRecord> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).history.iter().cloned().collect()
    }
}

fn pid_to_u32(pid: Pid) -> u32 {
    pid.as_u32()
}
