//! Opcmon configuration management
//! Handles loading and saving the config file

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::monitor::{
    ItemToMonitor, MonitoredItemGroup, MonitoringParameters, NodeId, TimestampsToReturn,
};
use crate::session::{SimulationConfig, SubscriptionSession};

/// Opcmon configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Node attributes watched by the group, in order
    #[serde(default = "default_targets")]
    pub targets: Vec<ItemToMonitor>,

    /// Sampling parameters shared by every target
    #[serde(default)]
    pub parameters: MonitoringParameters,

    /// Timestamps attached to reported values (Neither when absent)
    #[serde(default)]
    pub timestamps: Option<TimestampsToReturn>,

    /// Simulated server settings
    #[serde(default)]
    pub simulation: SimulationConfig,
}

fn default_targets() -> Vec<ItemToMonitor> {
    vec![
        // Server_ServerStatus_CurrentTime
        ItemToMonitor::value(NodeId::numeric(0, 2258)),
        ItemToMonitor::value(NodeId::string(1, "Boiler.Temperature")),
    ]
}

impl Default for Config {
    fn default() -> Self {
        Self {
            targets: default_targets(),
            parameters: MonitoringParameters::default(),
            timestamps: None,
            simulation: SimulationConfig::default(),
        }
    }
}

impl Config {
    /// Load config from the default location or specified path
    pub fn load(path: Option<&str>) -> Result<Self> {
        let config_path = Self::config_path(path)?;

        if !config_path.exists() {
            info!(
                "Config file not found, creating default at {:?}",
                config_path
            );
            let config = Config::default();
            config.save(path)?;
            return Ok(config);
        }

        let raw = fs::read_to_string(&config_path).context("Failed to read config file")?;

        let config: Config = serde_yaml::from_str(&raw).context("Failed to parse config file")?;

        debug!("Loaded config from {:?}", config_path);
        Ok(config)
    }

    /// Save config to the default location
    pub fn save(&self, path: Option<&str>) -> Result<()> {
        let config_path = Self::config_path(path)?;

        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = serde_yaml::to_string(&self)?;
        fs::write(&config_path, content).context("Failed to write config file")?;

        info!("Saved config to {:?}", config_path);
        Ok(())
    }

    /// Get the config file path
    ///
    /// An explicit `path` wins, then `OPCMON_CONFIG`, then `~/.opcmon/config.yml`.
    pub fn config_path(path: Option<&str>) -> Result<PathBuf> {
        if let Some(p) = path {
            return Ok(PathBuf::from(p));
        }

        if let Ok(env_path) = std::env::var("OPCMON_CONFIG") {
            return Ok(PathBuf::from(env_path));
        }

        let home = dirs::home_dir().context("Cannot find home directory")?;
        Ok(home.join(".opcmon").join("config.yml"))
    }

    /// Build the configured group on top of `session`
    pub fn build_group(&self, session: Arc<dyn SubscriptionSession>) -> Result<MonitoredItemGroup> {
        MonitoredItemGroup::new(
            session,
            self.targets.clone(),
            self.parameters.clone(),
            self.timestamps,
        )
        .context("Invalid group definition in config")
    }
}
