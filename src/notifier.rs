use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::{error, info, instrument};

use crate::config::TelexConfig;

/// Delivers plain-text messages to a chat channel
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, channel_id: &str, message: &str);
}

/// Payload of a Telex channel webhook
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TelexMessage {
    pub event_name: String,
    pub message: String,
    pub status: String,
    pub username: String,
}

impl TelexMessage {
    pub fn new(app_name: &str, message: impl ToString) -> Self {
        Self {
            event_name: app_name.to_string(),
            message: message.to_string(),
            status: "success".to_string(),
            username: app_name.to_string(),
        }
    }
}

/// Posts messages to `{webhook_url}/{channel_id}`.
///
/// Fire and forget: failures are logged, never returned.
#[derive(Debug, Clone)]
pub struct TelexNotifier {
    client: Client,
    config: TelexConfig,
}

impl TelexNotifier {
    pub fn new(config: TelexConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    pub fn channel_url(&self, channel_id: &str) -> String {
        format!("{}/{channel_id}", self.config.webhook_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl Notifier for TelexNotifier {
    #[instrument(skip(self, message))]
    async fn notify(&self, channel_id: &str, message: &str) {
        if channel_id.is_empty() || message.is_empty() {
            error!("refusing to send a notification without channel id or message");
            return;
        }

        let payload = TelexMessage::new(&self.config.app_name, message);

        match self
            .client
            .post(self.channel_url(channel_id))
            .json(&payload)
            .send()
            .await
        {
            Ok(response) => {
                if response.status().is_success() {
                    info!("Successfully sent notification to channel {channel_id}");
                } else {
                    error!("Notification failed with status: {}", response.status());
                }
            }
            Err(e) => {
                error!("Failed to send notification: {}", e);
            }
        }
    }
}
