use std::fs;
use std::path::Path;

use anyhow::Result;
use log::*;
use serde::{Deserialize, Serialize};

/// The name of the client's config file, looked up in the game directory.
pub const CONFIG_FILE_NAME: &str = "apclient.json";

/// User-editable client settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// How many game ticks pass between attempts to grant queued items.
    pub grant_interval_ticks: u32,

    /// Whether a line is printed to the in-game console for each granted
    /// item.
    pub log_grants_to_console: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            grant_interval_ticks: 30,
            log_grants_to_console: true,
        }
    }
}

impl ClientConfig {
    /// Loads the config from `path`, falling back to the defaults if it's
    /// missing or broken.
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        if !path.exists() {
            return Default::default();
        }
        match Self::try_load(path) {
            Ok(config) => config,
            Err(err) => {
                warn!("Ignoring {}: {err:#}", path.display());
                Default::default()
            }
        }
    }

    pub fn try_load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(json::from_str(&content)?)
    }

    /// The interval to actually wait, never less than one tick.
    pub fn grant_interval(&self) -> u32 {
        self.grant_interval_ticks.max(1)
    }
}
