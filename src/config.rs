// Configuration save/restore functionality

use crate::engine::filter::FilterSettings;
use crate::engine::{EngineTiming, RuntimeSettings};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

const CONFIG_DIR: &str = "connwatch";
const CONFIG_FILE: &str = "config.json";

/// Configuration file structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// How often the connection table is polled
    pub refresh_interval_ms: u64,

    /// How often the displayed view is reconciled
    pub display_interval_ms: u64,

    /// Show sockets whose owning process could not be determined
    pub view_pid_zero: bool,

    /// Apply `connection_filter`
    pub filter_enabled: bool,

    /// Case-insensitive regex matched against each connection's text
    pub connection_filter: String,

    /// Preferred connection source backend
    pub preferred_connection_source: Option<String>,

    /// Interfaces to capture on: None = every interface that is up
    pub capture_interfaces: Option<Vec<String>>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            refresh_interval_ms: 250,
            display_interval_ms: 750,
            view_pid_zero: false,
            filter_enabled: false,
            connection_filter: String::new(),
            preferred_connection_source: None,
            capture_interfaces: None,
        }
    }
}

impl Config {
    /// Get the config file path
    pub fn config_path() -> Result<PathBuf> {
        let base = match dirs::config_dir() {
            Some(dir) => dir,
            None => {
                let home = std::env::var("HOME").context("HOME environment variable not set")?;
                PathBuf::from(home).join(".config")
            }
        };
        let config_dir = base.join(CONFIG_DIR);

        fs::create_dir_all(&config_dir).context(format!(
            "Failed to create config directory: {:?}",
            config_dir
        ))?;

        Ok(config_dir.join(CONFIG_FILE))
    }

    /// Load configuration from disk
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;

        if !path.exists() {
            log::debug!("Config file not found, using defaults");
            return Ok(Config::default());
        }

        let contents =
            fs::read_to_string(&path).context(format!("Failed to read config file: {:?}", path))?;

        let config: Config =
            serde_json::from_str(&contents).context("Failed to parse config file")?;

        log::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Save configuration to disk
    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;

        let contents = serde_json::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(&path, contents).context(format!("Failed to write config file: {:?}", path))?;

        log::info!("Saved configuration to {:?}", path);
        Ok(())
    }

    pub fn timing(&self) -> EngineTiming {
        EngineTiming {
            refresh_interval: Duration::from_millis(self.refresh_interval_ms),
            display_interval: Duration::from_millis(self.display_interval_ms),
        }
    }

    pub fn runtime_settings(&self) -> RuntimeSettings {
        RuntimeSettings {
            view_pid_zero: self.view_pid_zero,
            filter: FilterSettings {
                enabled: self.filter_enabled,
                pattern: self.connection_filter.clone(),
            },
        }
    }

    /// Remember settings changed while running
    pub fn store_runtime_settings(&mut self, settings: &RuntimeSettings) {
        self.view_pid_zero = settings.view_pid_zero;
        self.filter_enabled = settings.filter.enabled;
        self.connection_filter.clone_from(&settings.filter.pattern);
    }
}
