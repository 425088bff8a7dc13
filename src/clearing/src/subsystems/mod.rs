//! Capability interfaces of the storage subsystems a partition owns.
//!
//! Every subsystem is optional. An absent subsystem is a valid state and its
//! category is treated as having nothing to delete.

pub mod disk;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use url::Url;

use crate::cookie::CookieDeletionFilter;
use crate::error::SubsystemError;
use crate::key::{StorageKey, StorageKeyMatcher, StorageKeyPolicyMatcher};
use crate::mask::{QuotaClientTypes, StorageType};
use crate::request::TimeRange;

pub use disk::{DiskShaderCache, LocalFileSystemContext, PLUGIN_PRIVATE_DIR, SHADER_CACHE_DIR};

pub type SubsystemResult<T> = Result<T, SubsystemError>;

/// Opaque handle of one quota-managed bucket.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct BucketLocator {
    pub id: i64,
    pub storage_key: StorageKey,
    pub storage_type: StorageType,
    pub is_default: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StorageUsageInfo {
    pub storage_key: StorageKey,
    pub total_size_bytes: u64,
    pub last_modified: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionStorageUsageInfo {
    pub storage_key: StorageKey,
    pub namespace_id: String,
}

/// Outcome of a shared storage purge, fed back to the manager.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SharedStorageOperationResult {
    Success,
    InitFailure,
    SqlError,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CodeCacheKind {
    JavaScript,
    WebAssembly,
    WebUi,
}

/// Predicate over resource URLs used by code cache clearing.
pub type UrlMatcher = Arc<dyn Fn(&Url) -> bool + Send + Sync>;

#[async_trait]
pub trait CookieManager: Send + Sync {
    /// Delete cookies matching `filter`, returning how many were removed.
    async fn delete_cookies(&self, filter: CookieDeletionFilter) -> SubsystemResult<u32>;
}

#[async_trait]
pub trait QuotaManager: Send + Sync {
    async fn buckets_modified_between(
        &self,
        storage_type: StorageType,
        range: TimeRange,
    ) -> SubsystemResult<Vec<BucketLocator>>;

    async fn delete_bucket_data(
        &self,
        bucket: &BucketLocator,
        client_types: &QuotaClientTypes,
    ) -> SubsystemResult<()>;

    async fn perform_storage_cleanup(
        &self,
        storage_type: StorageType,
        client_types: &QuotaClientTypes,
    ) -> SubsystemResult<()>;
}

/// Local and session storage backend.
#[async_trait]
pub trait DomStorageContext: Send + Sync {
    async fn local_storage_usage(&self) -> SubsystemResult<Vec<StorageUsageInfo>>;

    async fn delete_local_storage(&self, key: &StorageKey) -> SubsystemResult<()>;

    async fn perform_local_storage_cleanup(&self) -> SubsystemResult<()>;

    async fn session_storage_usage(&self) -> SubsystemResult<Vec<SessionStorageUsageInfo>>;

    async fn delete_session_storage(&self, info: &SessionStorageUsageInfo) -> SubsystemResult<()>;

    async fn perform_session_storage_cleanup(&self) -> SubsystemResult<()>;
}

/// Process-wide shader cache, keyed by partition path.
#[async_trait]
pub trait ShaderCacheFactory: Send + Sync {
    async fn clear_by_path(&self, path: &Path, range: TimeRange) -> SubsystemResult<()>;
}

#[async_trait]
pub trait AttributionManager: Send + Sync {
    async fn clear_data(
        &self,
        range: TimeRange,
        filter: Option<StorageKeyMatcher>,
        delete_rate_limit_data: bool,
    ) -> SubsystemResult<()>;
}

#[async_trait]
pub trait AggregationService: Send + Sync {
    async fn clear_data(
        &self,
        range: TimeRange,
        filter: Option<StorageKeyMatcher>,
    ) -> SubsystemResult<()>;
}

#[async_trait]
pub trait SharedStorageManager: Send + Sync {
    async fn purge_matching_origins(
        &self,
        matcher: Option<StorageKeyPolicyMatcher>,
        range: TimeRange,
        perform_storage_cleanup: bool,
    ) -> SharedStorageOperationResult;

    fn on_operation_result(&self, result: SharedStorageOperationResult);
}

#[async_trait]
pub trait InterestGroupManager: Send + Sync {
    async fn delete_interest_group_data(
        &self,
        filter: Option<StorageKeyMatcher>,
    ) -> SubsystemResult<()>;

    async fn clear_permissions_cache(&self) -> SubsystemResult<()>;
}

/// File system context owning the partition's file system directories.
#[async_trait]
pub trait FileSystemContext: Send + Sync {
    fn partition_path(&self) -> PathBuf;

    /// Remove everything the deprecated plugin private file system left.
    async fn delete_plugin_private_data(&self) -> SubsystemResult<()>;
}

#[async_trait]
pub trait CodeCache: Send + Sync {
    fn kind(&self) -> CodeCacheKind;

    async fn clear(&self, range: TimeRange, url_matcher: Option<UrlMatcher>)
    -> SubsystemResult<()>;
}

/// The subsystems constructed for one partition.
///
/// Handles are independently reference counted, so in-flight deletions keep
/// their subsystem alive after the partition itself is gone.
#[derive(Clone, Default)]
pub struct SubsystemRegistry {
    pub cookie_manager: Option<Arc<dyn CookieManager>>,
    pub quota_manager: Option<Arc<dyn QuotaManager>>,
    pub dom_storage: Option<Arc<dyn DomStorageContext>>,
    pub shader_cache: Option<Arc<dyn ShaderCacheFactory>>,
    pub attribution_manager: Option<Arc<dyn AttributionManager>>,
    pub aggregation_service: Option<Arc<dyn AggregationService>>,
    pub shared_storage_manager: Option<Arc<dyn SharedStorageManager>>,
    pub interest_group_manager: Option<Arc<dyn InterestGroupManager>>,
    pub filesystem_context: Option<Arc<dyn FileSystemContext>>,
    pub code_caches: Vec<Arc<dyn CodeCache>>,
}

impl SubsystemRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Names of the constructed subsystems, for logging.
    pub fn present(&self) -> Vec<&'static str> {
        let mut names = Vec::new();
        if self.cookie_manager.is_some() {
            names.push("cookies");
        }
        if self.quota_manager.is_some() {
            names.push("quota");
        }
        if self.dom_storage.is_some() {
            names.push("dom_storage");
        }
        if self.shader_cache.is_some() {
            names.push("shader_cache");
        }
        if self.attribution_manager.is_some() {
            names.push("attribution");
        }
        if self.aggregation_service.is_some() {
            names.push("aggregation");
        }
        if self.shared_storage_manager.is_some() {
            names.push("shared_storage");
        }
        if self.interest_group_manager.is_some() {
            names.push("interest_groups");
        }
        if self.filesystem_context.is_some() {
            names.push("filesystem");
        }
        if !self.code_caches.is_empty() {
            names.push("code_caches");
        }
        names
    }
}
