//! Chat platform events
//!
//! Both handlers answer immediately; the coordinator does the rest in the
//! background and reports to the channel through the notifier.

use axum::{Json, extract::State};
use tracing::{debug, warn};

use crate::api::state::ApiState;
use crate::api::types::{AppResponse, ChannelEvent};

fn received() -> Json<AppResponse> {
    Json(AppResponse::success("Message received"))
}

/// POST /webhook
pub async fn webhook(
    State(state): State<ApiState>,
    Json(event): Json<ChannelEvent>,
) -> Json<AppResponse> {
    debug!("new webhook for channel {:?}", event.channel_id);

    if event.channel_id.is_empty() {
        warn!("webhook without channel id ignored");
        return received();
    }

    let coordinator = state.coordinator.clone();
    tokio::spawn(async move {
        coordinator
            .handle_chat_message(&event.channel_id, &event.message, &event.settings)
            .await;
    });

    received()
}

/// POST /tick
pub async fn tick(
    State(state): State<ApiState>,
    Json(event): Json<ChannelEvent>,
) -> Json<AppResponse> {
    debug!("new tick for channel {:?}", event.channel_id);

    if event.channel_id.is_empty() {
        warn!("tick without channel id ignored");
        return received();
    }

    let coordinator = state.coordinator.clone();
    tokio::spawn(async move {
        coordinator
            .handle_tick(&event.channel_id, &event.settings)
            .await;
    });

    received()
}
