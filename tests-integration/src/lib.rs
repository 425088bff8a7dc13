//! Common test utilities and helpers for integration tests
use tracing_subscriber::EnvFilter;

pub mod fixtures;

pub use fixtures::{CompletionProbe, PartitionTestContext};

/// Initialize test logging
pub fn init_test_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}
