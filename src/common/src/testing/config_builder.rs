//! Test configuration builder for creating partition setups quickly.

use std::time::Duration;

use crate::config::{Configuration, LoggingConfig, PartitionConfig};

/// Builder for creating test configurations.
///
/// # Example
///
/// ```rust,ignore
/// use common::testing::TestConfigBuilder;
///
/// let config = TestConfigBuilder::new()
///     .with_path("/tmp/profile")
///     .off_the_record()
///     .build();
/// ```
#[derive(Debug, Clone)]
pub struct TestConfigBuilder {
    config: Configuration,
}

impl Default for TestConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TestConfigBuilder {
    /// Defaults suited to tests: a relative partition path and debug logging.
    pub fn new() -> Self {
        Self {
            config: Configuration {
                partition: PartitionConfig {
                    path: "test-partition".to_string(),
                    slow_task_timeout: Duration::from_secs(180),
                    ..PartitionConfig::default()
                },
                logging: LoggingConfig {
                    filter: "debug".to_string(),
                },
            },
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.config.partition.path = path.into();
        self
    }

    pub fn off_the_record(mut self) -> Self {
        self.config.partition.off_the_record = true;
        self
    }

    pub fn without_shared_storage(mut self) -> Self {
        self.config.partition.shared_storage_enabled = false;
        self
    }

    pub fn with_slow_task_timeout(mut self, timeout: Duration) -> Self {
        self.config.partition.slow_task_timeout = timeout;
        self
    }

    pub fn build(self) -> Configuration {
        self.config
    }

    pub fn build_partition(self) -> PartitionConfig {
        self.config.partition
    }
}
