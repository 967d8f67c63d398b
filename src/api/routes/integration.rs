//! Integration manifest read by the chat platform

use axum::{Json, extract::State};
use serde_json::{Value, json};

use crate::api::state::ApiState;

/// GET /integration-config
pub async fn integration_config(State(state): State<ApiState>) -> Json<Value> {
    Json(manifest(&state.public_url, &state.app_name))
}

pub fn manifest(url: &str, app_name: &str) -> Value {
    json!({
        "data": {
            "date": {
                "created_at": "2025-03-11",
                "updated_at": "2025-03-11"
            },
            "integration_category": "AI & Machine Learning",
            "integration_type": "interval",
            "descriptions": {
                "app_name": app_name,
                "app_description": "A server monitoring agent that reports system metrics of your servers to a chat channel",
                "app_url": url,
                "background_color": "#4A90E2"
            },
            "target_url": format!("{url}/webhook"),
            "tick_url": format!("{url}/tick"),
            "key_features": [
                "Real-time system metrics monitoring (CPU, Memory, Disk)",
                "Periodic metrics reports to the channel",
                "One command agent setup from the chat"
            ],
            "settings": [
                {
                    "label": "interval",
                    "type": "text",
                    "required": true,
                    "default": "* * * * *"
                }
            ],
            "endpoints": [],
            "is_active": true,
            "version": env!("CARGO_PKG_VERSION")
        }
    })
}
