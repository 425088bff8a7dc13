use std::time::Duration;

use common::config::{ConfigError, Configuration};
use tempfile::TempDir;

fn write_config(dir: &TempDir, contents: &str) -> std::path::PathBuf {
    let path = dir.path().join("storage-partition.toml");
    std::fs::write(&path, contents).expect("Failed to write config file");
    path
}

#[test]
fn test_load_partition_from_file() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let path = write_config(
        &dir,
        r#"
        [partition]
        path = "/srv/profiles/work"
        shared_storage_enabled = false
        slow_task_timeout = "2m"

        [logging]
        filter = "clearing=debug"
        "#,
    );

    let config = Configuration::load_from_path(&path).expect("configuration loads");
    assert_eq!(config.partition.path, "/srv/profiles/work");
    assert!(!config.partition.shared_storage_enabled);
    assert_eq!(config.partition.slow_task_timeout, Duration::from_secs(120));
    assert_eq!(config.logging.filter, "clearing=debug");
}

#[test]
fn test_missing_sections_fall_back_to_defaults() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let path = write_config(&dir, "");

    let config = Configuration::load_from_path(&path).expect("configuration loads");
    assert_eq!(config.partition.path, ".data/partition");
    assert_eq!(config.logging.filter, "info");
}

#[test]
fn test_empty_path_in_file_rejected() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let path = write_config(&dir, "[partition]\npath = \"\"\n");

    assert!(matches!(
        Configuration::load_from_path(&path),
        Err(ConfigError::EmptyPartitionPath)
    ));
}

#[test]
fn test_malformed_duration_rejected() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let path = write_config(&dir, "[partition]\nslow_task_timeout = \"soon\"\n");

    assert!(matches!(
        Configuration::load_from_path(&path),
        Err(ConfigError::Load(_))
    ));
}
