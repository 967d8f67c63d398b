//! Webhook front-end of the hub
//!
//! A thin HTTP layer between the chat platform and the [`Coordinator`]. Chat
//! events are acknowledged right away; the actual work runs in the background
//! and its outcome is delivered through the notifier.
//!
//! ## Endpoints
//!
//! - `GET /health` - Health check
//! - `GET /integration-config` - Integration manifest for the chat platform
//! - `POST /webhook` - Chat message from a channel
//! - `POST /tick` - Periodic trigger from the chat platform
//! - `POST /get-cpu-metrics` - CPU metrics of a channel's agent
//! - `POST /check-cpu-threshold` - Threshold check on a channel's agent
//!
//! [`Coordinator`]: crate::coordinator::Coordinator

pub mod error;
pub mod routes;
pub mod state;
pub mod types;

pub use error::{ApiError, ApiResult};
pub use state::ApiState;
pub use types::{AppResponse, ChannelEvent, CpuRequest};

use std::net::SocketAddr;

use axum::{
    Router,
    routing::{get, post},
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

/// All routes of the front-end
pub fn router(state: ApiState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(routes::health::health_check))
        .route(
            "/integration-config",
            get(routes::integration::integration_config),
        )
        .route("/webhook", post(routes::events::webhook))
        .route("/tick", post(routes::events::tick))
        .route("/get-cpu-metrics", post(routes::metrics::get_cpu_metrics))
        .route(
            "/check-cpu-threshold",
            post(routes::metrics::check_cpu_threshold),
        )
        .fallback(routes::health::not_found)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

/// Spawn the API server
///
/// This starts an Axum HTTP server in a background task.
/// Returns the server's local address.
pub async fn spawn_api_server(bind: SocketAddr, state: ApiState) -> anyhow::Result<SocketAddr> {
    info!("starting API server on {bind}");

    let app = router(state);

    let listener = tokio::net::TcpListener::bind(bind).await?;
    let addr = listener.local_addr()?;

    info!("API server listening on {}", addr);

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!("API server error: {}", e);
        }
    });

    Ok(addr)
}
