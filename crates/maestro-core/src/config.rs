/*!
 * Configuration management for Maestro.
 *
 * This module provides functionality to load, validate, and access configuration
 * settings for Maestro components. Sources are layered: built-in defaults, an
 * optional file, then environment variables.
 */
use std::path::Path;
use std::time::Duration;

use config::{Config as ConfigLib, Environment, File};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Core configuration for Maestro
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// General configuration
    #[serde(default)]
    pub general: GeneralConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Protocol adapter configuration
    #[serde(default)]
    pub adapters: AdapterConfig,

    /// Activity engine configuration
    #[serde(default)]
    pub engine: EngineConfig,
}

/// General configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Application name
    #[serde(default = "default_app_name")]
    pub app_name: String,

    /// Application environment (development, production, etc.)
    #[serde(default = "default_environment")]
    pub environment: String,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level or filter directive (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to print the event target
    #[serde(default = "default_true")]
    pub with_target: bool,
}

/// Timeouts and limits shared by all protocol adapters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdapterConfig {
    /// Deadline for establishing a session, handshake included
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Deadline for a single command round trip
    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,

    /// Deadline for a status query
    #[serde(default = "default_status_timeout_ms")]
    pub status_timeout_ms: u64,

    /// How long an operation waits for the adapter's session before failing as busy
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    /// Largest ADB payload accepted or advertised, in bytes
    #[serde(default = "default_adb_max_payload")]
    pub adb_max_payload: u32,

    /// Base64 encoded key used to sign ADB authentication challenges
    #[serde(default)]
    pub adb_auth_key: Option<String>,

    /// System identity sent in the ADB CNXN banner
    #[serde(default = "default_adb_system_identity")]
    pub adb_system_identity: String,
}

/// Activity engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Upper bound applied to any single step delay
    #[serde(default = "default_max_step_delay_ms")]
    pub max_step_delay_ms: u64,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            app_name: default_app_name(),
            environment: default_environment(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            with_target: true,
        }
    }
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout_ms(),
            send_timeout_ms: default_send_timeout_ms(),
            status_timeout_ms: default_status_timeout_ms(),
            busy_timeout_ms: default_busy_timeout_ms(),
            adb_max_payload: default_adb_max_payload(),
            adb_auth_key: None,
            adb_system_identity: default_adb_system_identity(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_step_delay_ms: default_max_step_delay_ms(),
        }
    }
}

impl AdapterConfig {
    /// Connect deadline as a duration
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Send deadline as a duration
    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    /// Status deadline as a duration
    pub fn status_timeout(&self) -> Duration {
        Duration::from_millis(self.status_timeout_ms)
    }

    /// Busy deadline as a duration
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

impl Config {
    /// Reject values that would make adapters or the engine unusable
    pub fn validate(&self) -> Result<()> {
        let adapters = &self.adapters;
        if adapters.connect_timeout_ms == 0
            || adapters.send_timeout_ms == 0
            || adapters.status_timeout_ms == 0
        {
            return Err(Error::config("Adapter timeouts must be greater than zero"));
        }
        if adapters.adb_max_payload < 4096 {
            return Err(Error::config(format!(
                "adb_max_payload must be at least 4096 bytes, got {}",
                adapters.adb_max_payload
            )));
        }
        Ok(())
    }
}

fn default_app_name() -> String {
    "maestro".to_string()
}

fn default_environment() -> String {
    "development".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}

fn default_send_timeout_ms() -> u64 {
    5_000
}

fn default_status_timeout_ms() -> u64 {
    3_000
}

fn default_busy_timeout_ms() -> u64 {
    10_000
}

fn default_adb_max_payload() -> u32 {
    256 * 1024
}

fn default_adb_system_identity() -> String {
    "host::maestro".to_string()
}

fn default_max_step_delay_ms() -> u64 {
    60_000
}

/// A builder for creating a configuration
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    config_file: Option<String>,
    environment_prefix: Option<String>,
}

impl ConfigBuilder {
    /// Create a new ConfigBuilder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the config file path
    pub fn with_config_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_file = Some(path.as_ref().to_string_lossy().to_string());
        self
    }

    /// Set the environment variable prefix for configuration
    pub fn with_environment_prefix<S: AsRef<str>>(mut self, prefix: S) -> Self {
        self.environment_prefix = Some(prefix.as_ref().to_string());
        self
    }

    /// Build the configuration
    pub fn build(self) -> Result<Config> {
        let mut config_builder = ConfigLib::builder();

        // Start with default values
        let default_config = Config::default();
        config_builder = config_builder.add_source(
            ConfigLib::try_from(&default_config)
                .map_err(|e| Error::config(format!("Failed to create default config: {}", e)))?,
        );

        if let Some(config_file) = self.config_file {
            let path = Path::new(&config_file);
            if path.exists() {
                debug!("Loading configuration from {}", config_file);
                config_builder = config_builder.add_source(File::from(path));
            } else {
                debug!("Configuration file {} does not exist, using defaults", config_file);
            }
        }

        if let Some(prefix) = self.environment_prefix {
            debug!("Loading configuration from environment variables with prefix {}", prefix);
            config_builder = config_builder.add_source(
                Environment::with_prefix(&prefix)
                    .separator("__")
                    .try_parsing(true),
            );
        }

        let config: Config = config_builder
            .build()
            .map_err(|e| Error::config(format!("Failed to build configuration: {}", e)))?
            .try_deserialize()
            .map_err(|e| Error::config(format!("Failed to deserialize configuration: {}", e)))?;

        config.validate()?;

        info!("Configuration loaded successfully");
        Ok(config)
    }
}
