//! Direct queries against the agent of a channel

use axum::{Json, extract::State};
use serde_json::Value;

use crate::api::error::{ApiError, ApiResult};
use crate::api::state::ApiState;
use crate::api::types::{AppResponse, CpuRequest};
use crate::bridge::protocol::{DEFAULT_CPU_THRESHOLD, WireResponse};
use crate::bridge::{BridgeResult, Command, Response};

fn require_channel(request: &CpuRequest) -> ApiResult<&str> {
    request
        .channel()
        .ok_or_else(|| ApiError::InvalidRequest("Channel ID is required".to_string()))
}

fn data_of(response: BridgeResult<Response>) -> BridgeResult<Value> {
    let response = response?.into_result()?;
    Ok(WireResponse::from(response).data.unwrap_or(Value::Null))
}

/// POST /get-cpu-metrics
pub async fn get_cpu_metrics(
    State(state): State<ApiState>,
    Json(request): Json<CpuRequest>,
) -> ApiResult<Json<AppResponse>> {
    let channel_id = require_channel(&request)?;

    let data = data_of(
        state
            .coordinator
            .fetch(channel_id, Command::GetCpuMetrics)
            .await,
    )
    .map_err(ApiError::bridge("get CPU metrics"))?;

    Ok(Json(AppResponse::success("Success").with_data(data)))
}

/// POST /check-cpu-threshold
pub async fn check_cpu_threshold(
    State(state): State<ApiState>,
    Json(request): Json<CpuRequest>,
) -> ApiResult<Json<AppResponse>> {
    let channel_id = require_channel(&request)?;
    let threshold = request.threshold.unwrap_or(DEFAULT_CPU_THRESHOLD);

    let data = data_of(
        state
            .coordinator
            .fetch(channel_id, Command::CheckCpuThreshold { threshold })
            .await,
    )
    .map_err(ApiError::bridge("check CPU threshold"))?;

    Ok(Json(AppResponse::success("Success").with_data(data)))
}
