// SPDX-License-Identifier: MIT OR Apache-2.0
//! Periodic resource sampling with threshold alerts.
//!
//! A single background ticker samples CPU, memory, disk, network, and
//! process count on a fixed cadence, pushes the sample onto a bounded
//! ring, and raises a bounded alert history entry whenever a dimension
//! crosses its configured warning or critical threshold.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use chrono::{DateTime, Utc};
use patchplane_config::ResourceThresholds;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Mutex;
use sysinfo::{Disks, Networks, System};

/// Maximum retained resource samples.
pub const SAMPLE_RING_SIZE: usize = 50;
/// Maximum retained alerts.
pub const ALERT_RING_SIZE: usize = 100;

/// Cumulative network counters observed at sample time.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct NetworkIo {
    /// Total bytes sent since boot across all interfaces.
    pub bytes_sent: u64,
    /// Total bytes received since boot across all interfaces.
    pub bytes_recv: u64,
    /// Total packets sent since boot across all interfaces.
    pub packets_sent: u64,
    /// Total packets received since boot across all interfaces.
    pub packets_recv: u64,
}

/// One tick's worth of resource observations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceSample {
    /// CPU utilization, percent.
    pub cpu_percent: f64,
    /// Virtual memory utilization, percent.
    pub memory_percent: f64,
    /// Root-disk utilization, percent.
    pub disk_percent: f64,
    /// Cumulative network counters.
    pub network_io: NetworkIo,
    /// Number of running processes.
    pub process_count: usize,
    /// When the sample was taken.
    pub timestamp: DateTime<Utc>,
}

/// Severity of a threshold breach.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    /// The warning threshold was met or exceeded.
    Warning,
    /// The critical threshold was met or exceeded.
    Critical,
}

/// A single threshold breach.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceAlert {
    /// Which sampled dimension breached (`cpu`, `memory`, `disk`,
    /// `process_count`).
    pub resource_name: String,
    /// The value observed.
    pub current_value: f64,
    /// The threshold that was crossed.
    pub threshold_value: f64,
    /// Severity of the breach.
    pub alert_level: AlertLevel,
    /// When the breach was observed.
    pub timestamp: DateTime<Utc>,
    /// Human-readable summary.
    pub message: String,
}

/// A callback invoked synchronously whenever a new alert is raised.
pub type AlertCallback = Box<dyn Fn(&ResourceAlert) + Send + Sync>;

struct Inner {
    system: System,
    samples: VecDeque<ResourceSample>,
    alerts: VecDeque<ResourceAlert>,
}

/// Samples system resources on a ticker and tracks threshold breaches.
pub struct ResourceMonitor {
    thresholds: ResourceThresholds,
    inner: Mutex<Inner>,
    callbacks: Mutex<Vec<AlertCallback>>,
}

impl ResourceMonitor {
    /// Build a monitor with the given thresholds.
    #[must_use]
    pub fn new(thresholds: ResourceThresholds) -> Self {
        Self {
            thresholds,
            inner: Mutex::new(Inner {
                system: System::new_all(),
                samples: VecDeque::new(),
                alerts: VecDeque::new(),
            }),
            callbacks: Mutex::new(Vec::new()),
        }
    }

    /// Register a callback invoked synchronously for every new alert.
    pub fn on_alert(&self, callback: AlertCallback) {
        self.callbacks.lock().unwrap_or_else(|e| e.into_inner()).push(callback);
    }

    /// Take one sample, push it onto the ring, and evaluate thresholds.
    /// Intended to be driven by a 30-second ticker.
    pub fn tick(&self) -> ResourceSample {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.system.refresh_cpu_usage();
        inner.system.refresh_memory();
        inner.system.refresh_processes(sysinfo::ProcessesToUpdate::All, true);

        let cpu_percent = f64::from(inner.system.global_cpu_usage());
        let memory_percent = if inner.system.total_memory() > 0 {
            inner.system.used_memory() as f64 / inner.system.total_memory() as f64 * 100.0
        } else {
            0.0
        };
        let disk_percent = root_disk_percent();
        let network_io = cumulative_network_io();
        let process_count = inner.system.processes().len();
        let timestamp = Utc::now();

        let sample = ResourceSample {
            cpu_percent,
            memory_percent,
            disk_percent,
            network_io,
            process_count,
            timestamp,
        };

        inner.samples.push_back(sample.clone());
        if inner.samples.len() > SAMPLE_RING_SIZE {
            inner.samples.pop_front();
        }

        let candidates = [
            ("cpu", cpu_percent, self.thresholds.cpu.warning, self.thresholds.cpu.critical),
            ("memory", memory_percent, self.thresholds.memory.warning, self.thresholds.memory.critical),
            ("disk", disk_percent, self.thresholds.disk.warning, self.thresholds.disk.critical),
            (
                "process_count",
                process_count as f64,
                self.thresholds.process_count.warning,
                self.thresholds.process_count.critical,
            ),
        ];

        let mut raised = Vec::new();
        for (name, value, warning, critical) in candidates {
            let level = if value >= critical {
                Some((AlertLevel::Critical, critical))
            } else if value >= warning {
                Some((AlertLevel::Warning, warning))
            } else {
                None
            };
            if let Some((alert_level, threshold_value)) = level {
                let alert = ResourceAlert {
                    resource_name: name.to_string(),
                    current_value: value,
                    threshold_value,
                    alert_level,
                    timestamp,
                    message: format!("{name} at {value:.1} crossed {alert_level:?} threshold {threshold_value:.1}"),
                };
                inner.alerts.push_back(alert.clone());
                if inner.alerts.len() > ALERT_RING_SIZE {
                    inner.alerts.pop_front();
                }
                raised.push(alert);
            }
        }
        drop(inner);

        if !raised.is_empty() {
            let callbacks = self.callbacks.lock().unwrap_or_else(|e| e.into_inner());
            for alert in &raised {
                for callback in callbacks.iter() {
                    callback(alert);
                }
            }
        }

        sample
    }

    /// Spawn the periodic sampling ticker at `interval_secs` cadence.
    pub fn spawn_ticker(self: std::sync::Arc<Self>, interval_secs: u64) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(interval_secs));
            loop {
                interval.tick().await;
                self.tick();
            }
        })
    }

    /// Return the most recent sample, if any have been taken.
    #[must_use]
    pub fn latest_sample(&self) -> Option<ResourceSample> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).samples.back().cloned()
    }

    /// Return all retained samples, oldest first.
    #[must_use]
    pub fn samples(&self) -> Vec<ResourceSample> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).samples.iter().cloned().collect()
    }

    /// Return all retained alerts, oldest first.
    #[must_use]
    pub fn alerts(&self) -> Vec<ResourceAlert> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).alerts.iter().cloned().collect()
    }
}

fn root_disk_percent() -> f64 {
    let disks = Disks::new_with_refreshed_list();
    disks
        .list()
        .iter()
        .find(|d| d.mount_point().to_str() == Some("/"))
        .or_else(|| disks.list().first())
        .map(|d| {
            let total = d.total_space();
            if total == 0 {
                0.0
            } else {
                (total - d.available_space()) as f64 / total as f64 * 100.0
            }
        })
        .unwrap_or(0.0)
}

fn cumulative_network_io() -> NetworkIo {
    let networks = Networks::new_with_refreshed_list();
    networks.iter().fold(NetworkIo::default(), |mut acc, (_, data)| {
        acc.bytes_sent += data.total_transmitted();
        acc.bytes_recv += data.total_received();
        acc.packets_sent += data.total_packets_transmitted();
        acc.packets_recv += data.total_packets_received();
        acc
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn low_thresholds() -> ResourceThresholds {
        ResourceThresholds {
            cpu: patchplane_config::ThresholdPair { warning: -1.0, critical: 10_000.0 },
            memory: patchplane_config::ThresholdPair { warning: -1.0, critical: 10_000.0 },
            disk: patchplane_config::ThresholdPair { warning: 10_000.0, critical: 20_000.0 },
            process_count: patchplane_config::ThresholdPair { warning: 0.0, critical: 10_000_000.0 },
            sample_interval_secs: 30,
        }
    }

    #[test]
    fn tick_pushes_a_sample_onto_the_ring() {
        let monitor = ResourceMonitor::new(ResourceThresholds::default());
        monitor.tick();
        assert_eq!(monitor.samples().len(), 1);
        assert!(monitor.latest_sample().is_some());
    }

    #[test]
    fn sample_ring_is_bounded() {
        let monitor = ResourceMonitor::new(ResourceThresholds::default());
        for _ in 0..(SAMPLE_RING_SIZE + 5) {
            monitor.tick();
        }
        assert_eq!(monitor.samples().len(), SAMPLE_RING_SIZE);
    }

    #[test]
    fn low_thresholds_raise_warning_alerts_for_cpu_and_memory() {
        let monitor = ResourceMonitor::new(low_thresholds());
        monitor.tick();
        let alerts = monitor.alerts();
        assert!(alerts.iter().any(|a| a.resource_name == "cpu"));
        assert!(alerts.iter().any(|a| a.resource_name == "memory"));
    }

    #[test]
    fn alert_callbacks_fire_synchronously() {
        let monitor = Arc::new(ResourceMonitor::new(low_thresholds()));
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = count.clone();
        monitor.on_alert(Box::new(move |_alert| {
            count_clone.fetch_add(1, Ordering::SeqCst);
        }));
        monitor.tick();
        assert!(count.load(Ordering::SeqCst) > 0);
    }
}
