//! Threshold alerts on collected metrics
//!
//! The agent compares every snapshot it collects against its configured
//! [`Thresholds`]. Alerts are keyed by section: `cpu`, `memory` and
//! `disk_<mount>` for each mount above the disk threshold.

use std::collections::BTreeMap;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::collector::MetricsSource;
use crate::bridge::protocol::DEFAULT_CPU_THRESHOLD;
use crate::{CpuMetrics, MetricsData};

const DEFAULT_MEMORY_THRESHOLD: f64 = 85.0;

const DEFAULT_DISK_THRESHOLD: f64 = 90.0;

/// Usage limits in percent, exceeded when usage is strictly greater
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    #[serde(default = "default_cpu")]
    pub cpu: f64,
    #[serde(default = "default_memory")]
    pub memory: f64,
    #[serde(default = "default_disk")]
    pub disk: f64,
}

fn default_cpu() -> f64 {
    DEFAULT_CPU_THRESHOLD
}

fn default_memory() -> f64 {
    DEFAULT_MEMORY_THRESHOLD
}

fn default_disk() -> f64 {
    DEFAULT_DISK_THRESHOLD
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            cpu: default_cpu(),
            memory: default_memory(),
            disk: default_disk(),
        }
    }
}

/// Alert messages for every section above its threshold.
///
/// Missing sections and unknown values never alert.
pub fn check_thresholds(metrics: &MetricsData, thresholds: &Thresholds) -> BTreeMap<String, String> {
    let mut alerts = BTreeMap::new();

    if let Some(message) = metrics.cpu.as_ref().and_then(|cpu| cpu_alert(cpu, thresholds.cpu)) {
        alerts.insert("cpu".to_string(), message);
    }

    if let Some(memory) = &metrics.memory {
        if memory.used_percent > thresholds.memory {
            alerts.insert(
                "memory".to_string(),
                format!(
                    "Memory usage is {:.1}%, which exceeds the threshold of {}%",
                    memory.used_percent, thresholds.memory
                ),
            );
        }
    }

    for (mount, disk) in metrics.disk.iter().flatten() {
        if disk.used_percent > thresholds.disk {
            alerts.insert(
                format!("disk_{mount}"),
                format!(
                    "Disk usage for {mount} is {:.1}%, which exceeds the threshold of {}%",
                    disk.used_percent, thresholds.disk
                ),
            );
        }
    }

    alerts
}

fn cpu_alert(cpu: &CpuMetrics, threshold: f64) -> Option<String> {
    let usage = cpu.usage.filter(|usage| *usage > threshold)?;
    Some(format!(
        "CPU usage is {usage:.1}%, which exceeds the threshold of {threshold}%"
    ))
}

/// [`MetricsSource`] that logs a warning for every exceeded threshold in the
/// figures it passes through
pub struct ThresholdWatch<S> {
    inner: S,
    thresholds: Thresholds,
}

impl<S> ThresholdWatch<S> {
    pub fn new(inner: S, thresholds: Thresholds) -> Self {
        Self { inner, thresholds }
    }
}

#[async_trait]
impl<S: MetricsSource> MetricsSource for ThresholdWatch<S> {
    async fn cpu(&self) -> Result<CpuMetrics> {
        let cpu = self.inner.cpu().await?;
        if let Some(message) = cpu_alert(&cpu, self.thresholds.cpu) {
            warn!(alert = "cpu", "{message}");
        }
        Ok(cpu)
    }

    async fn snapshot(&self) -> Result<MetricsData> {
        let metrics = self.inner.snapshot().await?;
        for (key, message) in check_thresholds(&metrics, &self.thresholds) {
            warn!(alert = %key, "{message}");
        }
        Ok(metrics)
    }
}
