//! Test utilities for building configurations.

pub mod config_builder;

pub use config_builder::TestConfigBuilder;
