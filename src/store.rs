//! On-disk settings of the agent
//!
//! Written by `channel-agent setup` and removed by `channel-agent reset`. The
//! file only remembers how the agent is configured. Whether an agent is running
//! is never stored here; ask the agent itself (`channel-agent status` pings it).

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::metrics::{MetricSections, Thresholds};

const SETTINGS_DIR: &str = ".channel-monitor";

const SETTINGS_FILE: &str = "agent.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSettings {
    pub channel_id: String,

    /// Interface the responder binds to
    #[serde(default = "default_bind_host")]
    pub bind_host: String,

    /// Where the hub runs (pub/sub only)
    #[serde(default = "crate::util::get_default_bridge_host")]
    pub coordinator_host: String,

    #[serde(default = "crate::util::get_default_base_port")]
    pub base_port: u16,

    /// Subscribe to the hub instead of binding the derived port
    #[serde(default)]
    pub pubsub: bool,

    #[serde(default)]
    pub metrics: MetricSections,

    /// Usage limits the agent warns about
    #[serde(default)]
    pub thresholds: Thresholds,
}

fn default_bind_host() -> String {
    "0.0.0.0".to_string()
}

impl AgentSettings {
    pub fn new(channel_id: impl Into<String>) -> Self {
        Self {
            channel_id: channel_id.into(),
            bind_host: default_bind_host(),
            coordinator_host: crate::util::get_default_bridge_host(),
            base_port: crate::util::get_default_base_port(),
            pubsub: false,
            metrics: MetricSections::default(),
            thresholds: Thresholds::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store at `~/.channel-monitor/agent.toml`
    pub fn default_location() -> Result<Self> {
        let home = dirs::home_dir().ok_or_else(|| anyhow!("could not determine home directory"))?;
        Ok(Self::new(home.join(SETTINGS_DIR).join(SETTINGS_FILE)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Saved settings, or `None` if `setup` never ran
    pub fn load(&self) -> Result<Option<AgentSettings>> {
        if !self.path.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read settings file: {}", self.path.display()))?;

        toml::from_str(&content)
            .map(Some)
            .with_context(|| format!("Failed to parse settings file: {}", self.path.display()))
    }

    pub fn save(&self, settings: &AgentSettings) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?;
        }

        let content = toml::to_string_pretty(settings).context("Failed to serialize settings")?;
        std::fs::write(&self.path, content)
            .with_context(|| format!("Failed to write settings file: {}", self.path.display()))?;

        debug!("saved settings to {}", self.path.display());
        Ok(())
    }

    /// Remove the settings file. Returns `false` if there was none.
    pub fn clear(&self) -> Result<bool> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e)
                .with_context(|| format!("Failed to remove settings file: {}", self.path.display())),
        }
    }
}
