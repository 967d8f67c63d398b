#[cfg(feature = "api")]
pub mod api;
pub mod bridge;
pub mod config;
pub mod coordinator;
pub mod dispatch;
pub mod metrics;
pub mod notifier;
pub mod store;
pub mod util;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Snapshot of the local metrics of one agent.
///
/// Every section is optional: collectors may skip sections they cannot read and
/// the formatter substitutes a marker for anything that is missing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<CpuMetrics>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<MemoryMetrics>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disk: Option<BTreeMap<String, DiskMetrics>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CpuMetrics {
    /// Average usage over all cores in percent, absent if it could not be read
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cores: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load_avg: Option<Vec<f64>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryMetrics {
    pub total: u64,
    pub used: u64,
    pub free: u64,
    pub used_percent: f64,
}

/// Usage of one mounted file system, keyed by mount point in [`MetricsData`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiskMetrics {
    pub total: u64,
    pub used: u64,
    pub free: u64,
    pub used_percent: f64,
}

/// Result of a `checkCpuThreshold` request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdCheck {
    pub usage: f64,
    pub threshold: f64,
    pub exceeded: bool,
}

impl ThresholdCheck {
    pub fn evaluate(usage: f64, threshold: f64) -> Self {
        Self {
            usage,
            threshold,
            exceeded: usage > threshold,
        }
    }
}
