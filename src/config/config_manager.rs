use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// Core configuration structure
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PlacementConfiguration {
    pub network: NetworkConfig,
    pub authority: AuthorityConfig,
    pub replication: ReplicationConfig,
    pub persistence: PersistenceConfig,
    pub placement: PlacementDefaults,
}

// Network configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    // How long a requester waits for the authority's create
    pub ack_timeout_ms: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self { ack_timeout_ms: 5000 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthorityConfig {
    pub reconciliation_interval_ms: u64,
    // Wait after promotion before the recovery scan, 0 runs it immediately
    pub recovery_delay_ms: u64,
}

impl Default for AuthorityConfig {
    fn default() -> Self {
        Self { reconciliation_interval_ms: 3000, recovery_delay_ms: 0 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplicationConfig {
    // Removed ids remembered to ignore replayed creates
    pub tombstone_capacity: usize,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self { tombstone_capacity: 1024 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    pub default_save_path: PathBuf,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self { default_save_path: PathBuf::from("placements.json") }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlacementDefaults {
    pub grid_size: f32,
    pub surface_offset: f32,
    pub rotation_increment_deg: f32,
    pub max_ray_distance: f32,
}

impl Default for PlacementDefaults {
    fn default() -> Self {
        Self {
            grid_size: 1.0,
            surface_offset: 0.0,
            rotation_increment_deg: 90.0,
            max_ray_distance: 100.0,
        }
    }
}

impl PlacementConfiguration {
    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.network.ack_timeout_ms)
    }

    pub fn reconciliation_interval(&self) -> Duration {
        Duration::from_millis(self.authority.reconciliation_interval_ms)
    }

    pub fn recovery_delay(&self) -> Duration {
        Duration::from_millis(self.authority.recovery_delay_ms)
    }
}

// Custom error type for configuration errors
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("failed to read config {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("{0} must be greater than zero")]
    NonPositive(&'static str),
}

// Configuration Manager
#[derive(Debug, Clone, Default)]
pub struct ConfigurationManager {
    current_config: PlacementConfiguration,
    config_path: Option<PathBuf>,
}

impl ConfigurationManager {
    pub fn with_config(config: PlacementConfiguration, config_path: Option<PathBuf>) -> Self {
        Self { current_config: config, config_path }
    }

    /// Loads a TOML file. Missing sections and fields fall back to defaults.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigurationError> {
        let path = path.as_ref();
        let config_str = fs::read_to_string(path)
            .map_err(|source| ConfigurationError::Io { path: path.to_path_buf(), source })?;
        let config: PlacementConfiguration = toml::from_str(&config_str)
            .map_err(|source| ConfigurationError::Parse { path: path.to_path_buf(), source })?;

        let manager = Self { current_config: config, config_path: Some(path.to_path_buf()) };
        manager.validate()?;
        Ok(manager)
    }

    // Save configuration to file, a no-op without a path
    pub fn save_to_file(&self) -> Result<(), ConfigurationError> {
        if let Some(path) = &self.config_path {
            let toml_string = toml::to_string_pretty(&self.current_config)?;
            fs::write(path, toml_string)
                .map_err(|source| ConfigurationError::Io { path: path.clone(), source })?;
        }
        Ok(())
    }

    pub fn set_config_path<P: AsRef<Path>>(&mut self, path: P) {
        self.config_path = Some(path.as_ref().to_path_buf());
    }

    pub fn config_path(&self) -> Option<&Path> {
        self.config_path.as_deref()
    }

    pub fn update_config(&mut self, updates: PlacementConfiguration) -> Result<(), ConfigurationError> {
        let previous = std::mem::replace(&mut self.current_config, updates);
        if let Err(e) = self.validate() {
            self.current_config = previous;
            return Err(e);
        }
        Ok(())
    }

    pub fn get_config(&self) -> &PlacementConfiguration {
        &self.current_config
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let config = &self.current_config;
        if config.network.ack_timeout_ms == 0 {
            return Err(ConfigurationError::NonPositive("network.ack_timeout_ms"));
        }
        if config.authority.reconciliation_interval_ms == 0 {
            return Err(ConfigurationError::NonPositive("authority.reconciliation_interval_ms"));
        }
        if config.replication.tombstone_capacity == 0 {
            return Err(ConfigurationError::NonPositive("replication.tombstone_capacity"));
        }
        if config.placement.max_ray_distance <= 0.0 {
            return Err(ConfigurationError::NonPositive("placement.max_ray_distance"));
        }
        Ok(())
    }
}
