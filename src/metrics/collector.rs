//! Metrics collection via `sysinfo`

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sysinfo::{Disks, System};
use tracing::{instrument, trace};

use crate::{CpuMetrics, DiskMetrics, MemoryMetrics, MetricsData};

/// Source of local metrics for an agent
///
/// The responder only depends on this trait, so tests can plug in fixed
/// values instead of reading the host.
#[async_trait]
pub trait MetricsSource: Send + Sync {
    /// Current CPU figures
    async fn cpu(&self) -> Result<CpuMetrics>;

    /// Every enabled section
    async fn snapshot(&self) -> Result<MetricsData>;
}

/// Which sections `snapshot` collects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricSections {
    #[serde(default = "enabled")]
    pub cpu: bool,
    #[serde(default = "enabled")]
    pub memory: bool,
    #[serde(default = "enabled")]
    pub disk: bool,
}

fn enabled() -> bool {
    true
}

impl Default for MetricSections {
    fn default() -> Self {
        Self {
            cpu: true,
            memory: true,
            disk: true,
        }
    }
}

/// Reads metrics from the host the agent runs on
#[derive(Debug, Clone, Default)]
pub struct SysinfoCollector {
    sections: MetricSections,
}

impl SysinfoCollector {
    pub fn new(sections: MetricSections) -> Self {
        Self { sections }
    }
}

#[async_trait]
impl MetricsSource for SysinfoCollector {
    #[instrument(skip(self))]
    async fn cpu(&self) -> Result<CpuMetrics> {
        // CPU usage needs two refreshes with a sleep in between
        tokio::task::spawn_blocking(read_cpu)
            .await
            .context("CPU collection task failed")
    }

    #[instrument(skip(self))]
    async fn snapshot(&self) -> Result<MetricsData> {
        let sections = self.sections;
        let cpu = if sections.cpu {
            Some(self.cpu().await?)
        } else {
            None
        };

        let (memory, disk) = tokio::task::spawn_blocking(move || {
            let memory = sections.memory.then(read_memory);
            let disk = sections.disk.then(read_disks);
            (memory, disk)
        })
        .await
        .context("memory/disk collection task failed")?;

        trace!("collected metrics snapshot");

        Ok(MetricsData { cpu, memory, disk })
    }
}

fn read_cpu() -> CpuMetrics {
    let mut sys = System::new();
    sys.refresh_cpu_usage();
    std::thread::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL);
    sys.refresh_cpu_usage();

    let cpus = sys.cpus();
    let usage = (!cpus.is_empty()).then(|| {
        let sum = cpus.iter().map(|cpu| cpu.cpu_usage() as f64).sum::<f64>();
        sum / cpus.len() as f64
    });

    let load = System::load_average();

    CpuMetrics {
        usage: usage.map(|usage| usage.clamp(0.0, 100.0)),
        cores: (!cpus.is_empty()).then_some(cpus.len()),
        load_avg: Some(vec![load.one, load.five, load.fifteen]),
    }
}

fn read_memory() -> MemoryMetrics {
    let mut sys = System::new();
    sys.refresh_memory();

    let total = sys.total_memory();
    let used = sys.used_memory();

    MemoryMetrics {
        total,
        used,
        free: total.saturating_sub(used),
        used_percent: percent(used, total),
    }
}

fn read_disks() -> BTreeMap<String, DiskMetrics> {
    let disks = Disks::new_with_refreshed_list();

    disks
        .list()
        .iter()
        .map(|disk| {
            let total = disk.total_space();
            let free = disk.available_space();
            let used = total.saturating_sub(free);

            (
                disk.mount_point().to_string_lossy().into_owned(),
                DiskMetrics {
                    total,
                    used,
                    free,
                    used_percent: percent(used, total),
                },
            )
        })
        .collect()
}

fn percent(part: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64 * 100.0
    }
}
