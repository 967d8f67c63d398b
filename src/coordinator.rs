//! Hub-side glue between chat events, the bridge and the notifier
//!
//! ```text
//! chat event ──▶ Coordinator ──▶ Requester / Publisher ──▶ agent
//!                    │                                       │
//!                    ◀──────────── reply (correlated) ◀──────┘
//!                    │
//!                    └──▶ formatter ──▶ Notifier ──▶ chat channel
//! ```
//!
//! Whatever goes wrong on the way, the channel receives one polite notice;
//! the actual error only ends up in the log.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, error, info, instrument};

use crate::bridge::{
    BridgeResult, Command, PublisherHandle, ReplyCorrelator, ReplyListenerHandle,
    Request, Requester, ResolvedAddress, Response, spawn_reply_listener,
};
use crate::config::{BridgeMode, Config};
use crate::metrics::format_response;
use crate::notifier::Notifier;

/// Sent to the channel whenever metrics could not be obtained
pub const FAILURE_NOTICE: &str = "Sorry 😔, I am not able to get metrics from your server at this time, ensure the agent is active on your server";

pub const SETUP_COMMAND: &str = "/setup-monitoring";

pub const REPOSITORY_URL: &str = "https://github.com/JC-Coder/server-monitor-telex-integration";

const INSTALL_SCRIPT_URL: &str = "https://raw.githubusercontent.com/JC-Coder/server-monitor-telex-integration/refs/heads/dev/install-telex-sdk.sh";

pub fn install_command(channel_id: &str) -> String {
    format!("curl -sSL {INSTALL_SCRIPT_URL} | bash -s -- --channel-id {channel_id}")
}

pub fn setup_instructions(channel_id: &str) -> String {
    format!(
        "🚀 *Server Monitoring Setup Guide*\n\
         \n\
         1. Open a terminal on the server you want to monitor.\n\
         \n\
         2. Run the installation command:\n\
         ```\n\
         {}\n\
         ```\n\
         This installs the monitoring agent and configures it for this channel.\n\
         \n\
         3. Check that the agent is up:\n\
         ```\n\
         channel-agent status\n\
         ```\n\
         \n\
         Metrics reports for your server will show up in this channel from now on.\n\
         \n\
         ❓ Need help? Visit {REPOSITORY_URL}",
        install_command(channel_id)
    )
}

#[derive(Clone)]
enum Transport {
    Direct(Requester),
    PubSub {
        publisher: PublisherHandle,
        replies: ReplyListenerHandle,
        correlator: ReplyCorrelator,
        timeout: Duration,
    },
}

/// Entry point of the hub for chat events.
///
/// Cheap to clone.
#[derive(Clone)]
pub struct Coordinator {
    transport: Transport,
    notifier: Arc<dyn Notifier>,
}

impl Coordinator {
    /// Request/reply on the derived ports
    pub fn direct(requester: Requester, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            transport: Transport::Direct(requester),
            notifier,
        }
    }

    /// Commands through `publisher`, replies through `replies` into `correlator`
    pub fn pubsub(
        publisher: PublisherHandle,
        replies: ReplyListenerHandle,
        correlator: ReplyCorrelator,
        timeout: Duration,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            transport: Transport::PubSub {
                publisher,
                replies,
                correlator,
                timeout,
            },
            notifier,
        }
    }

    /// Build the transport described by `config`, binding sockets as needed
    pub async fn start(config: &Config, notifier: Arc<dyn Notifier>) -> anyhow::Result<Self> {
        match config.bridge.mode {
            BridgeMode::Direct => {
                let requester = Requester::new(config.requester_config());
                for agent in &config.agents {
                    requester
                        .register_agent(&agent.channel_id, &agent.host, agent.port)
                        .await;
                }
                info!("coordinator using direct request/reply");
                Ok(Self::direct(requester, notifier))
            }
            BridgeMode::Pubsub => {
                let ports = config.pubsub_ports()?;
                let host = config.bridge.host.clone();

                let publisher =
                    PublisherHandle::spawn(ResolvedAddress::new(host.clone(), ports.commands)).await?;
                let correlator = ReplyCorrelator::new();
                let replies = match spawn_reply_listener(
                    ResolvedAddress::new(host, ports.replies),
                    correlator.clone(),
                )
                .await
                {
                    Ok(replies) => replies,
                    Err(e) => {
                        publisher.stop();
                        return Err(e.into());
                    }
                };

                info!(
                    "coordinator publishing on {} and collecting replies on {}",
                    publisher.local_addr(),
                    replies.local_addr()
                );
                Ok(Self::pubsub(
                    publisher,
                    replies,
                    correlator,
                    Duration::from_millis(config.bridge.timeout_ms),
                    notifier,
                ))
            }
        }
    }

    /// Run `command` on the agent of `channel_id` and return its raw reply
    #[instrument(skip(self))]
    pub async fn fetch(&self, channel_id: &str, command: Command) -> BridgeResult<Response> {
        match &self.transport {
            Transport::Direct(requester) => requester.request(channel_id, command).await,
            Transport::PubSub {
                publisher,
                correlator,
                timeout,
                ..
            } => {
                // register first, a fast agent may answer before publish returns
                let pending = correlator.register(channel_id);
                let request = Request::new(command).for_channel(channel_id);

                let subscribers = publisher.publish(channel_id, &request)?;
                if subscribers == 0 {
                    debug!("no agent subscribed to {channel_id}, waiting anyway");
                }

                pending.wait(*timeout).await
            }
        }
    }

    /// Full metrics of a channel, formatted for the chat
    pub async fn fetch_metrics(&self, channel_id: &str) -> BridgeResult<String> {
        let response = self.fetch(channel_id, Command::GetMetrics).await?;
        Ok(format_response(&response.into_result()?.body))
    }

    /// Fetch metrics and deliver them, or the failure notice, to the channel
    #[instrument(skip(self))]
    pub async fn report_metrics(&self, channel_id: &str) {
        match self.fetch_metrics(channel_id).await {
            Ok(text) => self.notifier.notify(channel_id, &text).await,
            Err(e) => {
                error!("failed to get metrics for {channel_id}: {e}");
                self.notifier.notify(channel_id, FAILURE_NOTICE).await;
            }
        }
    }

    /// Start a metrics report in the background.
    ///
    /// Returns `false` if the report could not even be started; the outcome of
    /// a started report is delivered through the notifier.
    #[instrument(skip(self, settings))]
    pub fn request_metrics(&self, channel_id: &str, settings: &Value) -> bool {
        if channel_id.is_empty() {
            error!("metrics requested without a channel id");
            return false;
        }
        if self.is_closed() {
            error!("metrics requested for {channel_id} after shutdown");
            return false;
        }

        debug!("channel settings: {settings}");

        let coordinator = self.clone();
        let channel_id = channel_id.to_string();
        tokio::spawn(async move { coordinator.report_metrics(&channel_id).await });

        true
    }

    /// React to a chat message posted in `channel_id`
    #[instrument(skip(self, message, settings))]
    pub async fn handle_chat_message(&self, channel_id: &str, message: &str, settings: &Value) {
        if message.contains(SETUP_COMMAND) {
            info!("sending setup instructions to {channel_id}");
            self.notifier
                .notify(channel_id, &setup_instructions(channel_id))
                .await;
            return;
        }

        self.handle_tick(channel_id, settings).await;
    }

    /// Periodic trigger from the chat platform
    pub async fn handle_tick(&self, channel_id: &str, settings: &Value) {
        if !self.request_metrics(channel_id, settings) && !channel_id.is_empty() {
            self.notifier.notify(channel_id, FAILURE_NOTICE).await;
        }
    }

    pub fn is_closed(&self) -> bool {
        match &self.transport {
            Transport::Direct(requester) => requester.is_closed(),
            Transport::PubSub { publisher, .. } => publisher.is_closed(),
        }
    }

    /// Close every socket of the coordinator. Idempotent.
    pub async fn shutdown(&self) {
        match &self.transport {
            Transport::Direct(requester) => requester.close().await,
            Transport::PubSub {
                publisher,
                replies,
                correlator,
                ..
            } => {
                publisher.stop();
                replies.stop();
                publisher.stopped().await;
                replies.stopped().await;
                correlator.clear();
            }
        }
    }
}
