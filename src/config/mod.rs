pub mod connection_config;
pub mod scanner_config;

use std::path::{Path, PathBuf};

use anyhow::Result;
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::config::connection_config::ConnectionConfig;
use crate::config::scanner_config::ScannerConfig;
use crate::core::bluetooth::ACTIVITY_LOG_CAPACITY;
use crate::utils::ensure_directory_exists;

pub const CONFIG_FILE_NAME: &str = "hublink_scanner.json";
pub const COMMANDS_FILE_NAME: &str = "commands.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandsConfig {
    /// Location of the named command definitions
    pub path: PathBuf,
}

impl Default for CommandsConfig {
    fn default() -> Self {
        CommandsConfig {
            path: PathBuf::from(COMMANDS_FILE_NAME),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ActivityConfig {
    /// Events kept before the oldest is evicted
    pub capacity: usize,
}

impl Default for ActivityConfig {
    fn default() -> Self {
        ActivityConfig {
            capacity: ACTIVITY_LOG_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub scanner: ScannerConfig,
    pub connection: ConnectionConfig,
    pub commands: CommandsConfig,
    pub activity: ActivityConfig,
    /// Use the simulated radio instead of the platform adapter
    pub simulation: bool,
}

impl AppConfig {
    /// Loads the config from a configuration file.
    pub async fn load_config(file_path: &Path) -> Result<Self> {
        if !file_path.exists() {
            warn!("Config file not found at {:?}, using default.", file_path);
            return Ok(Self::default());
        }

        let config_json = fs::read_to_string(file_path).await?;
        let config: Self = serde_json::from_str(&config_json)?;

        info!("Config loaded from {:?}", file_path);
        Ok(config)
    }

    /// Saves the current config to a configuration file.
    pub async fn save_config(&self, file_path: &Path) -> Result<()> {
        if let Some(dir) = file_path.parent() {
            ensure_directory_exists(dir).await?;
        }

        let config_json = match serde_json::to_string_pretty(&self) {
            Ok(json) => json,
            Err(e) => {
                error!("Failed to serialize config to JSON: {}", e);
                return Err(e.into());
            }
        };

        fs::write(file_path, config_json).await?;

        info!("Config saved to {:?}.", file_path);
        Ok(())
    }
}
