use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::bridge::{PubSubPorts, RequesterConfig};
use crate::util;

/// How the hub reaches its agents
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BridgeMode {
    /// Request/reply on the port derived from the channel id
    #[default]
    Direct,

    /// Commands published on `base_port`, replies pushed to `base_port + 1`
    Pubsub,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeConfig {
    #[serde(default)]
    pub mode: BridgeMode,

    /// Interface the pub/sub sockets bind to
    #[serde(default = "crate::util::get_default_bridge_host")]
    pub host: String,

    #[serde(default = "crate::util::get_default_base_port")]
    pub base_port: u16,

    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default = "default_reconnect_interval_ms")]
    pub reconnect_interval_ms: u64,

    /// Host of agents without an entry in `agents`
    #[serde(default = "crate::util::get_default_bridge_host")]
    pub default_agent_host: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            mode: BridgeMode::default(),
            host: util::get_default_bridge_host(),
            base_port: util::get_default_base_port(),
            timeout_ms: default_timeout_ms(),
            reconnect_interval_ms: default_reconnect_interval_ms(),
            default_agent_host: util::get_default_bridge_host(),
        }
    }
}

fn default_timeout_ms() -> u64 {
    5000
}

fn default_reconnect_interval_ms() -> u64 {
    100
}

/// A known agent that does not run on the default host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    pub channel_id: String,
    pub host: String,

    /// Overrides the port derived from the channel id
    pub port: Option<u16>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelexConfig {
    #[serde(default = "default_webhook_url")]
    pub webhook_url: String,

    #[serde(default = "default_app_name")]
    pub app_name: String,
}

impl Default for TelexConfig {
    fn default() -> Self {
        Self {
            webhook_url: default_webhook_url(),
            app_name: default_app_name(),
        }
    }
}

fn default_webhook_url() -> String {
    "https://ping.telex.im/v1/webhooks".to_string()
}

fn default_app_name() -> String {
    "Server Monitor Agent".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "crate::util::get_default_api_bind")]
    pub bind: SocketAddr,

    /// Public base URL, advertised in the integration config
    #[serde(default = "crate::util::get_default_integration_url")]
    pub public_url: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind: util::get_default_api_bind(),
            public_url: util::get_default_integration_url(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub bridge: BridgeConfig,

    #[serde(default)]
    pub agents: Vec<AgentConfig>,

    #[serde(default)]
    pub telex: TelexConfig,

    #[serde(default)]
    pub api: ApiConfig,
}

impl Config {
    /// Apply overrides from the environment
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(host) = util::get_bridge_host() {
            self.bridge.host = host;
        }
        if let Some(port) = util::get_base_port() {
            self.bridge.base_port = port;
        }
        if let Some(host) = util::get_default_agent_host() {
            self.bridge.default_agent_host = host;
        }
        if let Some(port) = util::get_integration_port() {
            self.api.bind.set_port(port);
        }
        if let Some(url) = util::get_integration_url() {
            self.api.public_url = url;
        }
        self
    }

    pub fn requester_config(&self) -> RequesterConfig {
        RequesterConfig {
            timeout: Duration::from_millis(self.bridge.timeout_ms),
            reconnect_interval: Duration::from_millis(self.bridge.reconnect_interval_ms),
            default_host: self.bridge.default_agent_host.clone(),
        }
    }

    pub fn pubsub_ports(&self) -> anyhow::Result<PubSubPorts> {
        PubSubPorts::from_base(self.bridge.base_port)
            .with_context(|| format!("base port {} leaves no room for the reply port", self.bridge.base_port))
    }
}

pub fn read_config_file(path: &str) -> anyhow::Result<Config> {
    let file_content =
        std::fs::read_to_string(path).with_context(|| format!("failed to read {path}"))?;
    serde_json::from_str(&file_content)
        .map_err(|e| anyhow::anyhow!("Invalid configuration file provided: {e}"))
        .inspect(|config| trace!("loaded config: {config:?}"))
}
