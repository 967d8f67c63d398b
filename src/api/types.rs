//! Request and response bodies of the webhook front-end

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Envelope of every JSON answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppResponse {
    pub status: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl AppResponse {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            status: "success".to_string(),
            message: message.into(),
            data: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: "error".to_string(),
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// Body of `/webhook` and `/tick` as posted by the chat platform
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChannelEvent {
    #[serde(default)]
    pub channel_id: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub settings: Value,
}

/// Body of the direct CPU endpoints
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CpuRequest {
    #[serde(default)]
    pub channel_id: Option<String>,
    #[serde(default)]
    pub threshold: Option<f64>,
}

impl CpuRequest {
    /// The channel id, if one was given and is not blank
    pub fn channel(&self) -> Option<&str> {
        self.channel_id.as_deref().filter(|id| !id.trim().is_empty())
    }
}
