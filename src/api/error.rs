//! API error types and conversions

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};

use super::types::AppResponse;
use crate::bridge::BridgeError;

/// API result type
pub type ApiResult<T> = Result<T, ApiError>;

/// API error types
#[derive(Debug)]
pub enum ApiError {
    /// Invalid request parameters
    InvalidRequest(String),

    /// The agent of a channel could not deliver
    Bridge {
        operation: &'static str,
        source: BridgeError,
    },
}

impl ApiError {
    pub fn bridge(operation: &'static str) -> impl FnOnce(BridgeError) -> Self {
        move |source| ApiError::Bridge { operation, source }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::InvalidRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Bridge { operation, source } => {
                tracing::error!("Failed to {operation}: {source}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    format!("Failed to {operation}: {source}"),
                )
            }
        };

        (status, Json(AppResponse::error(message))).into_response()
    }
}
