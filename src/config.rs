//! Configuration loading and persistence.
//!
//! The hub needs very little: where to bind its socket, the tree's
//! branching factor, the spawn depth limit, and what image to launch
//! helpers from. Stored as JSON in the platform config directory, with
//! environment-variable overrides for scripting and tests.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{fs, path::PathBuf};

use crate::addressing::Breadth;

/// Configuration for the swarmhub CLI and hub.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Config {
    /// Filesystem path of the hub's Unix socket.
    pub socket_path: PathBuf,
    /// Branching factor of the helper tree; `-1` means unbounded.
    pub breadth: i64,
    /// Maximum tree depth a spawn may reach; `-1` means unlimited.
    pub spawn_depth: i64,
    /// Container image helpers are launched from.
    pub image: String,
    /// Container name prefix, usually the project container name.
    pub container_prefix: String,
    /// Force a specific runtime binary instead of autodetecting.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime_command: Option<String>,
    /// Where to append the inter-agent message log; `None` disables it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_log: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        let state_dir = dirs::runtime_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("swarmhub");
        Self {
            socket_path: state_dir.join("hub.sock"),
            breadth: 4,
            spawn_depth: 4,
            image: "swarmhub-agent:latest".to_string(),
            container_prefix: "swarmhub".to_string(),
            runtime_command: None,
            message_log: dirs::data_dir().map(|d| d.join("swarmhub/messages.jsonl")),
        }
    }
}

impl Config {
    /// Returns the configuration directory, creating it if necessary.
    ///
    /// `SWARMHUB_CONFIG_DIR` overrides the platform default so tests and
    /// scripts can isolate themselves.
    pub fn config_dir() -> Result<PathBuf> {
        let dir = if let Ok(dir) = std::env::var("SWARMHUB_CONFIG_DIR") {
            PathBuf::from(dir)
        } else {
            dirs::config_dir()
                .context("Could not determine config directory")?
                .join("swarmhub")
        };
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    /// Loads configuration from file, with environment overrides applied.
    ///
    /// Missing file falls back to defaults (nothing is written until
    /// [`Config::save`]).
    pub fn load() -> Result<Self> {
        let config_path = Self::config_dir()?.join("config.json");
        let mut config = if config_path.exists() {
            let content = fs::read_to_string(&config_path)
                .with_context(|| format!("reading {}", config_path.display()))?;
            serde_json::from_str(&content)
                .with_context(|| format!("parsing {}", config_path.display()))?
        } else {
            Self::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Persist the configuration as pretty-printed JSON.
    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_dir()?.join("config.json");
        fs::write(&config_path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Resolve the raw breadth value into the explicit two-case type.
    ///
    /// # Errors
    ///
    /// Fails for 0 or values below -1.
    pub fn breadth(&self) -> Result<Breadth> {
        Ok(Breadth::from_raw(self.breadth)?)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var("SWARMHUB_SOCKET") {
            self.socket_path = PathBuf::from(path);
        }
        if let Ok(raw) = std::env::var("SWARMHUB_BREADTH") {
            match raw.parse() {
                Ok(breadth) => self.breadth = breadth,
                Err(_) => log::warn!("Ignoring non-integer SWARMHUB_BREADTH={raw}"),
            }
        }
        if let Ok(image) = std::env::var("SWARMHUB_IMAGE") {
            self.image = image;
        }
    }
}
