//! Configuration types for the lix engine

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{LixError, Result};

/// Main configuration for a lix instance
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LixConfig {
    /// Backing store configuration
    #[serde(default)]
    pub storage: StorageConfig,

    /// Change queue worker configuration
    #[serde(default)]
    pub queue: QueueConfig,

    /// Server sync configuration
    #[serde(default)]
    pub sync: SyncConfig,
}

/// Backing store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Path of the SQLite store. `None` keeps the store in memory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,

    /// Take an exclusive lock file next to an on-disk store
    pub lock: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: None,
            lock: true,
        }
    }
}

/// Change queue worker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Idle polling interval of the drain loop
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,

    /// Capacity of the trigger channel; extra triggers coalesce
    pub trigger_capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            trigger_capacity: 1,
        }
    }
}

/// Server sync configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Base URL of the lix server
    pub server_url: String,

    /// Request timeout
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,

    /// Attempts per request, including the first one
    pub max_attempts: usize,

    /// Delay before the first retry
    #[serde(with = "humantime_serde")]
    pub initial_backoff: Duration,

    /// Upper bound for the retry delay
    #[serde(with = "humantime_serde")]
    pub max_backoff: Duration,

    /// Rows per upsert statement when pushing or pulling
    pub batch_size: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            server_url: "http://localhost:3000".to_string(),
            timeout: Duration::from_secs(30),
            max_attempts: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(10),
            batch_size: 100,
        }
    }
}

/// Builder for lix configuration
pub struct ConfigBuilder {
    config: LixConfig,
}

impl ConfigBuilder {
    /// Create a new configuration builder
    pub fn new() -> Self {
        Self {
            config: LixConfig::default(),
        }
    }

    /// Store the lix at the given path
    pub fn path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.storage.path = Some(path.into());
        self
    }

    /// Keep the lix in memory
    pub fn in_memory(mut self) -> Self {
        self.config.storage.path = None;
        self
    }

    /// Enable or disable the store lock file
    pub fn lock(mut self, lock: bool) -> Self {
        self.config.storage.lock = lock;
        self
    }

    /// Set the drain loop polling interval
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.queue.poll_interval = interval;
        self
    }

    /// Set sync configuration
    pub fn sync(mut self, config: SyncConfig) -> Self {
        self.config.sync = config;
        self
    }

    /// Set the sync server URL
    pub fn server_url(mut self, url: impl Into<String>) -> Self {
        self.config.sync.server_url = url.into();
        self
    }

    /// Build the configuration
    pub fn build(self) -> LixConfig {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl LixConfig {
    /// Load configuration from file and environment variables.
    ///
    /// Loads in this order:
    /// 1. Default configuration
    /// 2. Configuration file (lix.toml, then the path from LIX_CONFIG_PATH)
    /// 3. Environment variable overrides (`LIX_QUEUE__POLL_INTERVAL=500ms`)
    ///
    /// # Errors
    ///
    /// Returns an error if a configuration file is invalid or a value fails validation.
    pub fn load() -> Result<Self> {
        use figment::{
            Figment,
            providers::{Env, Format, Serialized, Toml},
        };

        let mut figment = Figment::from(Serialized::defaults(LixConfig::default()))
            .merge(Toml::file("lix.toml"));

        if let Ok(path) = std::env::var("LIX_CONFIG_PATH") {
            figment = figment.merge(Toml::file(path));
        }

        let config: LixConfig = figment
            .merge(Env::prefixed("LIX_").split("__"))
            .extract()
            .map_err(|e| LixError::Configuration(format!("Failed to load configuration: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        use figment::{
            Figment,
            providers::{Format, Serialized, Toml},
        };

        let config: LixConfig = Figment::from(Serialized::defaults(LixConfig::default()))
            .merge(Toml::file(path))
            .extract()
            .map_err(|e| {
                LixError::Configuration(format!("Failed to load configuration file: {}", e))
            })?;

        config.validate()?;
        Ok(config)
    }

    /// Create a builder starting from defaults
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<()> {
        if self.queue.poll_interval.is_zero() {
            return Err(LixError::Configuration(
                "queue.poll_interval must be greater than zero".to_string(),
            ));
        }
        if self.queue.trigger_capacity == 0 {
            return Err(LixError::Configuration(
                "queue.trigger_capacity must be at least 1".to_string(),
            ));
        }
        if self.sync.max_attempts == 0 {
            return Err(LixError::Configuration(
                "sync.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.sync.batch_size == 0 {
            return Err(LixError::Configuration(
                "sync.batch_size must be at least 1".to_string(),
            ));
        }
        if self.sync.server_url.trim().is_empty() {
            return Err(LixError::Configuration(
                "sync.server_url must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}
