//! Human-readable rendering of metrics payloads
//!
//! None of these functions fail. Missing fields render as [`NOT_AVAILABLE`];
//! input that cannot be interpreted at all renders as [`COULD_NOT_FORMAT`] and
//! leaves a warning in the log.

use serde_json::Value;
use tracing::warn;

use crate::bridge::protocol::ResponseBody;
use crate::{CpuMetrics, MetricsData, ThresholdCheck};

pub const NOT_AVAILABLE: &str = "N/A";

pub const COULD_NOT_FORMAT: &str = "Error: Could not format metrics";

/// First line of a full snapshot report
pub const REPORT_HEADER: &str = "📊 Current Server Metrics";

/// Render a full metrics snapshot.
///
/// Starts with [`REPORT_HEADER`] and a blank line. The CPU block is always
/// present; memory and disk blocks only when the agent collected them.
pub fn format(metrics: &MetricsData) -> String {
    let mut lines = match &metrics.cpu {
        Some(cpu) => cpu_lines(cpu),
        None => vec![
            format!("CPU Usage: {NOT_AVAILABLE}"),
            format!("CPU Cores: {NOT_AVAILABLE}"),
            format!("Load Average: {NOT_AVAILABLE}"),
        ],
    };

    if let Some(memory) = &metrics.memory {
        lines.push(format!(
            "Memory Usage: {} ({} of {})",
            percentage(memory.used_percent),
            human_bytes(memory.used),
            human_bytes(memory.total)
        ));
    }

    if let Some(disks) = &metrics.disk {
        for (mount, disk) in disks {
            lines.push(format!(
                "Disk {mount}: {} ({} of {})",
                percentage(disk.used_percent),
                human_bytes(disk.used),
                human_bytes(disk.total)
            ));
        }
    }

    format!("{REPORT_HEADER}\n\n{}", lines.join("\n"))
}

/// Render the CPU block only
pub fn format_cpu(cpu: &CpuMetrics) -> String {
    cpu_lines(cpu).join("\n")
}

/// Render an untyped payload, e.g. the `data` of a reply from an older agent
pub fn format_value(raw: &Value) -> String {
    match serde_json::from_value::<MetricsData>(raw.clone()) {
        Ok(metrics) => format(&metrics),
        Err(e) => {
            warn!("could not format metrics payload {raw}: {e}");
            COULD_NOT_FORMAT.to_string()
        }
    }
}

/// Render the payload of a successful response
pub fn format_response(body: &ResponseBody) -> String {
    match body {
        ResponseBody::CpuUsage(usage) => format!("CPU Usage: {}", percentage(*usage)),
        ResponseBody::CpuMetrics(cpu) => format_cpu(cpu),
        ResponseBody::FormattedCpuMetrics(text) => text.clone(),
        ResponseBody::CpuThreshold(check) => format_threshold(check),
        ResponseBody::Metrics(metrics) => format(metrics),
        ResponseBody::Pong => "Agent is alive".to_string(),
        ResponseBody::Failed { message, .. } | ResponseBody::Error(message) => {
            warn!("asked to format an error response: {message}");
            COULD_NOT_FORMAT.to_string()
        }
    }
}

fn format_threshold(check: &ThresholdCheck) -> String {
    let threshold = if check.threshold.is_finite() {
        format!("{}%", check.threshold)
    } else {
        NOT_AVAILABLE.to_string()
    };

    if check.exceeded {
        format!(
            "CPU usage is {}, which exceeds the threshold of {threshold}",
            percentage(check.usage)
        )
    } else {
        format!(
            "CPU usage is {}, within the threshold of {threshold}",
            percentage(check.usage)
        )
    }
}

fn cpu_lines(cpu: &CpuMetrics) -> Vec<String> {
    let usage = cpu
        .usage
        .map(percentage)
        .unwrap_or_else(|| NOT_AVAILABLE.to_string());
    let cores = cpu
        .cores
        .map(|cores| cores.to_string())
        .unwrap_or_else(|| NOT_AVAILABLE.to_string());

    let load = match cpu.load_avg.as_deref() {
        Some(load) if !load.is_empty() && load.iter().all(|l| l.is_finite()) => load
            .iter()
            .map(|l| format!("{l:.2}"))
            .collect::<Vec<_>>()
            .join(", "),
        _ => NOT_AVAILABLE.to_string(),
    };

    vec![
        format!("CPU Usage: {usage}"),
        format!("CPU Cores: {cores}"),
        format!("Load Average: {load}"),
    ]
}

fn percentage(value: f64) -> String {
    if value.is_finite() {
        format!("{value:.2}%")
    } else {
        NOT_AVAILABLE.to_string()
    }
}

fn human_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];

    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.2} {}", UNITS[unit])
    }
}
