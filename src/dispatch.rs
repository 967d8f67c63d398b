//! Agent-side execution of a single request
//!
//! Maps each [`Command`] onto the local [`MetricsSource`]. A failing metrics
//! read is answered with a response that echoes the request type and carries
//! the error message; it never bubbles up to the serving loop.

use anyhow::{Result, anyhow};
use tracing::{instrument, warn};

use crate::{CpuMetrics, ThresholdCheck};
use crate::bridge::protocol::{Command, Request, Response, ResponseBody};
use crate::metrics::{MetricsSource, format_cpu};

#[instrument(skip(source, request), fields(kind = %request.kind()))]
pub async fn dispatch(source: &dyn MetricsSource, request: &Request) -> Response {
    let kind = request.kind();

    let body = match &request.command {
        Command::Ping => Ok(ResponseBody::Pong),
        Command::GetCpuUsage => source
            .cpu()
            .await
            .and_then(|cpu| usage_of(&cpu))
            .map(ResponseBody::CpuUsage),
        Command::GetCpuMetrics => source.cpu().await.map(ResponseBody::CpuMetrics),
        Command::GetFormattedCpuMetrics => source
            .cpu()
            .await
            .map(|cpu| ResponseBody::FormattedCpuMetrics(format_cpu(&cpu))),
        Command::CheckCpuThreshold { threshold } => source
            .cpu()
            .await
            .and_then(|cpu| usage_of(&cpu))
            .map(|usage| ResponseBody::CpuThreshold(ThresholdCheck::evaluate(usage, *threshold))),
        Command::GetMetrics => source.snapshot().await.map(ResponseBody::Metrics),
    };

    match body {
        Ok(body) => Response::new(body),
        Err(e) => {
            warn!("failed to execute {kind}: {e:#}");
            Response::new(ResponseBody::Failed {
                kind,
                message: format!("{e:#}"),
            })
        }
    }
}

fn usage_of(cpu: &CpuMetrics) -> Result<f64> {
    cpu.usage.ok_or_else(|| anyhow!("CPU usage not available"))
}
