//! Disk-backed subsystem implementations.
//!
//! These operate directly on a partition directory and are what the
//! `storage-partition` binary wires up.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, info};

use super::{FileSystemContext, ShaderCacheFactory, SubsystemResult};
use crate::request::TimeRange;

/// Directory, relative to the partition, holding shader cache entries.
pub const SHADER_CACHE_DIR: &str = "ShaderCache";

/// Directory of the deprecated plugin private file system.
pub const PLUGIN_PRIVATE_DIR: [&str; 2] = ["File System", "Plugins"];

/// Shader cache whose entries are plain files under `<partition>/ShaderCache`.
#[derive(Debug, Default)]
pub struct DiskShaderCache;

impl DiskShaderCache {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ShaderCacheFactory for DiskShaderCache {
    async fn clear_by_path(&self, path: &Path, range: TimeRange) -> SubsystemResult<()> {
        let cache_dir = path.join(SHADER_CACHE_DIR);
        let mut entries = match tokio::fs::read_dir(&cache_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %cache_dir.display(), "No shader cache directory");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        let mut deleted = 0usize;
        while let Some(entry) = entries.next_entry().await? {
            let metadata = entry.metadata().await?;
            if !metadata.is_file() {
                continue;
            }
            let modified: DateTime<Utc> = metadata.modified()?.into();
            if !range.contains(modified) {
                continue;
            }
            match tokio::fs::remove_file(entry.path()).await {
                Ok(()) => deleted += 1,
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }

        info!(
            path = %cache_dir.display(),
            deleted,
            range = %range,
            "Cleared shader cache entries"
        );
        Ok(())
    }
}

/// File system context rooted at a partition directory.
#[derive(Debug, Clone)]
pub struct LocalFileSystemContext {
    partition_path: PathBuf,
}

impl LocalFileSystemContext {
    pub fn new(partition_path: impl Into<PathBuf>) -> Self {
        Self {
            partition_path: partition_path.into(),
        }
    }

    pub fn plugin_private_path(&self) -> PathBuf {
        PLUGIN_PRIVATE_DIR
            .iter()
            .fold(self.partition_path.clone(), |path, part| path.join(part))
    }
}

#[async_trait]
impl FileSystemContext for LocalFileSystemContext {
    fn partition_path(&self) -> PathBuf {
        self.partition_path.clone()
    }

    async fn delete_plugin_private_data(&self) -> SubsystemResult<()> {
        let plugin_path = self.plugin_private_path();
        debug!(path = %plugin_path.display(), "Clearing plugin private data");

        match tokio::fs::remove_dir_all(&plugin_path).await {
            Ok(()) => {
                info!(path = %plugin_path.display(), "Removed plugin private data");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[tokio::test]
    async fn test_plugin_private_directory_removed() {
        let dir = tempfile::tempdir().unwrap();
        let context = LocalFileSystemContext::new(dir.path());
        let plugins = context.plugin_private_path();
        tokio::fs::create_dir_all(plugins.join("nested")).await.unwrap();
        tokio::fs::write(plugins.join("nested/data.bin"), b"x")
            .await
            .unwrap();

        context.delete_plugin_private_data().await.unwrap();

        assert!(!plugins.exists());
        assert!(dir.path().join("File System").exists());
    }

    #[tokio::test]
    async fn test_missing_plugin_directory_is_success() {
        let dir = tempfile::tempdir().unwrap();
        let context = LocalFileSystemContext::new(dir.path());
        assert!(context.delete_plugin_private_data().await.is_ok());
    }

    #[tokio::test]
    async fn test_shader_cache_respects_range() {
        let dir = tempfile::tempdir().unwrap();
        let cache_dir = dir.path().join(SHADER_CACHE_DIR);
        tokio::fs::create_dir_all(&cache_dir).await.unwrap();
        tokio::fs::write(cache_dir.join("entry_0"), b"shader")
            .await
            .unwrap();

        // Entries were just written, so a range ending an hour ago keeps them.
        let past = TimeRange::new(None, Some(Utc::now() - Duration::hours(1)));
        DiskShaderCache::new()
            .clear_by_path(dir.path(), past)
            .await
            .unwrap();
        assert!(cache_dir.join("entry_0").exists());

        DiskShaderCache::new()
            .clear_by_path(dir.path(), TimeRange::all_time())
            .await
            .unwrap();
        assert!(!cache_dir.join("entry_0").exists());
        assert!(cache_dir.exists());
    }

    #[tokio::test]
    async fn test_missing_shader_cache_is_success() {
        let dir = tempfile::tempdir().unwrap();
        assert!(
            DiskShaderCache::new()
                .clear_by_path(dir.path(), TimeRange::all_time())
                .await
                .is_ok()
        );
    }
}
