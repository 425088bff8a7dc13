use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};

/// Default file looked up by [`Configuration::load`].
pub const DEFAULT_CONFIG_FILE: &str = "storage-partition.toml";

/// Prefix of environment variables merged over the file configuration.
pub const ENV_PREFIX: &str = "STORAGE_PARTITION__";

/// Errors raised while validating a loaded configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("partition path must not be empty")]
    EmptyPartitionPath,

    #[error("slow task timeout must be positive, got {0:?}")]
    InvalidSlowTaskTimeout(Duration),

    #[error("failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),
}

/// Settings for one storage partition and its data-clearing pipeline.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PartitionConfig {
    /// Root directory of the partition on disk.
    ///
    /// Env: STORAGE_PARTITION__PARTITION__PATH
    pub path: String,

    /// Off-the-record partitions never construct a shared storage manager.
    ///
    /// Env: STORAGE_PARTITION__PARTITION__OFF_THE_RECORD
    #[serde(default)]
    pub off_the_record: bool,

    /// Feature switch for the shared storage category.
    ///
    /// Env: STORAGE_PARTITION__PARTITION__SHARED_STORAGE_ENABLED
    #[serde(default = "default_shared_storage_enabled")]
    pub shared_storage_enabled: bool,

    /// Delay after which still-pending clearing tasks are reported.
    ///
    /// Env: STORAGE_PARTITION__PARTITION__SLOW_TASK_TIMEOUT
    #[serde(with = "humantime_serde", default = "default_slow_task_timeout")]
    pub slow_task_timeout: Duration,
}

fn default_shared_storage_enabled() -> bool {
    true
}

fn default_slow_task_timeout() -> Duration {
    Duration::from_secs(180)
}

impl Default for PartitionConfig {
    fn default() -> Self {
        Self {
            path: ".data/partition".to_string(),
            off_the_record: false,
            shared_storage_enabled: default_shared_storage_enabled(),
            slow_task_timeout: default_slow_task_timeout(),
        }
    }
}

impl PartitionConfig {
    /// Configuration for an off-the-record partition rooted at `path`.
    pub fn off_the_record(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            off_the_record: true,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.path.trim().is_empty() {
            return Err(ConfigError::EmptyPartitionPath);
        }
        if self.slow_task_timeout.is_zero() {
            return Err(ConfigError::InvalidSlowTaskTimeout(self.slow_task_timeout));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is not set.
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct Configuration {
    pub partition: PartitionConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Configuration {
    pub fn load() -> Result<Self, ConfigError> {
        let config: Configuration = Figment::from(Serialized::defaults(Configuration::default()))
            .merge(Toml::file(DEFAULT_CONFIG_FILE))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .map_err(Box::new)?;

        config.partition.validate()?;
        Ok(config)
    }

    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let config: Configuration = Figment::from(Serialized::defaults(Configuration::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .map_err(Box::new)?;

        config.partition.validate()?;
        Ok(config)
    }
}
