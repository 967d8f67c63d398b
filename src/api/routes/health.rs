//! Health check and fallback

use axum::{Json, http::StatusCode};

use crate::api::types::AppResponse;
use crate::coordinator::REPOSITORY_URL;

/// GET /health
pub async fn health_check() -> Json<AppResponse> {
    Json(AppResponse::success("Server is healthy"))
}

/// Any route that does not exist
pub async fn not_found() -> (StatusCode, Json<AppResponse>) {
    (
        StatusCode::NOT_FOUND,
        Json(AppResponse::error(format!(
            "🤔 Hmm... looks like you're lost in the matrix! 🕴️, visit 👉 {REPOSITORY_URL} 👈"
        ))),
    )
}
