// Configuration management with layered configuration (file, env)

use crate::errors::ConfigurationError;
use crate::launch::TaskExecutor;
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main settings structure containing all configuration options
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub launcher: LauncherConfig,
    pub observability: ObservabilityConfig,
    pub worker: WorkerConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LauncherConfig {
    pub task_executor: TaskExecutor,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    pub log_level: String,
    pub json_logs: bool,
    /// Prometheus listener port; no exporter when unset
    pub metrics_port: Option<u16>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
            metrics_port: None,
        }
    }
}

/// Settings of the partitioned demo run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub partitions: u32,
    pub items_per_partition: u32,
    pub chunk_size: usize,
    pub fail_first_attempt: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            partitions: 4,
            items_per_partition: 25,
            chunk_size: 10,
            fail_first_attempt: true,
        }
    }
}

impl Settings {
    /// Load configuration with layered precedence: defaults → file → env
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_path("config")
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // local overrides, not committed
            .add_source(File::from(config_dir.join("local.toml")).required(false))
            .add_source(
                Environment::with_prefix("BATCH")
                    .separator("__")
                    .try_parsing(true),
            );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Validate configuration settings
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.observability.log_level.trim().is_empty() {
            return Err(ConfigurationError::InvalidSettings(
                "observability.log_level cannot be empty".to_string(),
            ));
        }
        if self.observability.metrics_port == Some(0) {
            return Err(ConfigurationError::InvalidSettings(
                "observability.metrics_port must be greater than 0".to_string(),
            ));
        }

        if self.worker.partitions == 0 {
            return Err(ConfigurationError::InvalidSettings(
                "worker.partitions must be greater than 0".to_string(),
            ));
        }
        if self.worker.chunk_size == 0 {
            return Err(ConfigurationError::InvalidSettings(
                "worker.chunk_size must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}
