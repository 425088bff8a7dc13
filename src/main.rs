//! Storage partition clearing tool.
//!
//! Wipes on-disk data of one partition directory through the same pipeline
//! a running profile uses. Only the disk-backed subsystems are wired up;
//! every other category has nothing to delete.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use clearing::subsystems::{DiskShaderCache, LocalFileSystemContext};
use clearing::{
    QuotaStorageMask, RemoveDataMask, StorageKey, StoragePartition, SubsystemRegistry, TimeRange,
};
use common::config::Configuration;
use common::logging::init_tracing;
use tokio::sync::oneshot;
use url::Url;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "storage-partition.toml")]
    config: String,

    /// Partition directory, overrides the configured path
    #[arg(long)]
    path: Option<String>,

    /// Data categories to remove, comma separated, or "all"
    #[arg(long, default_value = "shader-cache,plugin-private")]
    remove: RemoveDataMask,

    /// Only remove data modified within this window, e.g. "2h"
    #[arg(long, value_parser = humantime_serde::re::humantime::parse_duration)]
    since: Option<Duration>,

    /// Restrict clearing to one origin
    #[arg(long)]
    origin: Option<Url>,

    /// Treat the partition as off-the-record
    #[arg(long)]
    off_the_record: bool,
}

fn load_configuration(args: &Args) -> Result<Configuration> {
    let config_path = Path::new(&args.config);
    let mut config = if config_path.exists() {
        Configuration::load_from_path(config_path).context("Failed to load configuration")?
    } else {
        Configuration::load().context("Failed to load configuration")?
    };

    if let Some(path) = &args.path {
        config.partition.path = path.clone();
    }
    if args.off_the_record {
        config.partition.off_the_record = true;
    }
    config
        .partition
        .validate()
        .context("Invalid partition configuration")?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_configuration(&args)?;
    init_tracing(&config.logging);

    let registry = SubsystemRegistry {
        shader_cache: Some(Arc::new(DiskShaderCache::new())),
        filesystem_context: Some(Arc::new(LocalFileSystemContext::new(
            &config.partition.path,
        ))),
        ..SubsystemRegistry::new()
    };
    let partition = StoragePartition::builder(config.partition.clone())
        .with_subsystems(registry)
        .build()
        .context("Failed to initialize storage partition")?;

    let range = match args.since {
        Some(window) => {
            let window = chrono::Duration::from_std(window).context("Window out of range")?;
            TimeRange::since(Utc::now() - window)
        }
        None => TimeRange::all_time(),
    };

    let (done_tx, done_rx) = oneshot::channel();
    let on_done = move || {
        let _ = done_tx.send(());
    };
    let request_id = match (&args.origin, range.is_all_time()) {
        (Some(origin), true) => partition.clear_data_for_origin(
            args.remove,
            QuotaStorageMask::ALL,
            origin,
            on_done,
        ),
        (origin, _) => {
            let key = origin
                .as_ref()
                .map(StorageKey::from_url)
                .unwrap_or_else(StorageKey::opaque);
            partition.clear_data(args.remove, QuotaStorageMask::ALL, &key, range, on_done)
        }
    }
    .context("Failed to start clearing")?;

    tracing::info!(
        request_id = %request_id,
        path = %config.partition.path,
        remove = %args.remove,
        range = %range,
        "Clearing storage partition"
    );

    done_rx
        .await
        .context("Clearing finished without reporting completion")?;
    partition.wait_for_deletion_tasks().await;

    let summary = partition.metrics().summary();
    let report = serde_json::json!({
        "request_id": request_id.to_string(),
        "path": config.partition.path,
        "removed": args.remove.names().collect::<Vec<_>>(),
        "range": range.to_string(),
        "tasks_dispatched": summary.tasks_dispatched,
        "subsystem_failures": summary.subsystem_failures,
        "storage_cleanups": summary.storage_cleanups,
    });
    println!(
        "{}",
        serde_json::to_string_pretty(&report).context("Failed to render summary")?
    );

    if summary.subsystem_failures > 0 {
        anyhow::bail!("{} subsystem(s) failed to clear data", summary.subsystem_failures);
    }
    Ok(())
}
