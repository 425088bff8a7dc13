use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{CallLog, FakeBehavior, Gate};
use crate::cookie::{CanonicalCookie, CookieDeletionFilter};
use crate::error::SubsystemError;
use crate::key::{StorageKey, StorageKeyMatcher, StorageKeyPolicyMatcher};
use crate::mask::{QuotaClientTypes, StorageType};
use crate::request::TimeRange;
use crate::subsystems::{
    AggregationService, AttributionManager, BucketLocator, CodeCache, CodeCacheKind,
    CookieManager, DomStorageContext, FileSystemContext, InterestGroupManager, QuotaManager,
    SessionStorageUsageInfo, ShaderCacheFactory, SharedStorageManager,
    SharedStorageOperationResult, StorageUsageInfo, SubsystemResult, UrlMatcher,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

macro_rules! behavior_builders {
    ($fake:ty) => {
        impl $fake {
            pub fn with_behavior(mut self, behavior: FakeBehavior) -> Self {
                self.behavior = behavior;
                self
            }

            pub fn with_gate(self, gate: Gate) -> Self {
                self.with_behavior(FakeBehavior::gated(gate))
            }
        }
    };
}

/// Cookie store holding cookies in memory.
#[derive(Default)]
pub struct FakeCookieManager {
    behavior: FakeBehavior,
    cookies: Mutex<Vec<CanonicalCookie>>,
    pub filters: CallLog<CookieDeletionFilter>,
}

behavior_builders!(FakeCookieManager);

impl FakeCookieManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_cookie(&self, cookie: CanonicalCookie) {
        lock(&self.cookies).push(cookie);
    }

    pub fn cookies(&self) -> Vec<CanonicalCookie> {
        lock(&self.cookies).clone()
    }

    pub fn count_matching(&self, filter: &CookieDeletionFilter) -> usize {
        lock(&self.cookies)
            .iter()
            .filter(|cookie| filter.matches(cookie))
            .count()
    }

    pub fn delete_calls(&self) -> usize {
        self.filters.len()
    }
}

#[async_trait]
impl CookieManager for FakeCookieManager {
    async fn delete_cookies(&self, filter: CookieDeletionFilter) -> SubsystemResult<u32> {
        self.filters.record(filter.clone());
        self.behavior.before_reply("cookies").await?;

        let mut cookies = lock(&self.cookies);
        let before = cookies.len();
        cookies.retain(|cookie| !filter.matches(cookie));
        Ok((before - cookies.len()) as u32)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum QuotaCall {
    List(StorageType),
    Delete(BucketLocator),
    Cleanup(StorageType),
}

struct StoredBucket {
    locator: BucketLocator,
    last_modified: DateTime<Utc>,
}

/// Quota manager over an in-memory bucket table.
#[derive(Default)]
pub struct FakeQuotaManager {
    behavior: FakeBehavior,
    buckets: Mutex<Vec<StoredBucket>>,
    next_id: AtomicI64,
    fail_deletions: AtomicBool,
    completed_deletions: AtomicUsize,
    pub log: CallLog<QuotaCall>,
}

behavior_builders!(FakeQuotaManager);

impl FakeQuotaManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a default bucket last modified now.
    pub fn add_bucket(&self, storage_key: StorageKey, storage_type: StorageType) -> BucketLocator {
        self.add_bucket_modified_at(storage_key, storage_type, Utc::now())
    }

    pub fn add_bucket_modified_at(
        &self,
        storage_key: StorageKey,
        storage_type: StorageType,
        last_modified: DateTime<Utc>,
    ) -> BucketLocator {
        let locator = BucketLocator {
            id: self.next_id.fetch_add(1, Ordering::Relaxed) + 1,
            storage_key,
            storage_type,
            is_default: true,
        };
        lock(&self.buckets).push(StoredBucket {
            locator: locator.clone(),
            last_modified,
        });
        locator
    }

    pub fn fail_deletions(&self) {
        self.fail_deletions.store(true, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<QuotaCall> {
        self.log.snapshot()
    }

    pub fn list_calls(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, QuotaCall::List(_)))
            .count()
    }

    pub fn deleted_buckets(&self) -> Vec<BucketLocator> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                QuotaCall::Delete(bucket) => Some(bucket),
                _ => None,
            })
            .collect()
    }

    pub fn cleanup_calls(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, QuotaCall::Cleanup(_)))
            .count()
    }

    /// Deletions whose reply has been produced.
    pub fn completed_deletions(&self) -> usize {
        self.completed_deletions.load(Ordering::SeqCst)
    }

    pub fn remaining_buckets(&self) -> Vec<BucketLocator> {
        lock(&self.buckets)
            .iter()
            .map(|bucket| bucket.locator.clone())
            .collect()
    }
}

#[async_trait]
impl QuotaManager for FakeQuotaManager {
    async fn buckets_modified_between(
        &self,
        storage_type: StorageType,
        range: TimeRange,
    ) -> SubsystemResult<Vec<BucketLocator>> {
        self.log.record(QuotaCall::List(storage_type));
        self.behavior.before_reply("quota").await?;

        Ok(lock(&self.buckets)
            .iter()
            .filter(|bucket| bucket.locator.storage_type == storage_type)
            .filter(|bucket| range.contains(bucket.last_modified))
            .map(|bucket| bucket.locator.clone())
            .collect())
    }

    async fn delete_bucket_data(
        &self,
        bucket: &BucketLocator,
        _client_types: &QuotaClientTypes,
    ) -> SubsystemResult<()> {
        self.log.record(QuotaCall::Delete(bucket.clone()));
        let result = self.behavior.before_reply("quota").await;
        self.completed_deletions.fetch_add(1, Ordering::SeqCst);
        result?;

        if self.fail_deletions.load(Ordering::SeqCst) {
            return Err(SubsystemError::failed("quota", "bucket deletion failed"));
        }
        lock(&self.buckets).retain(|stored| stored.locator != *bucket);
        Ok(())
    }

    async fn perform_storage_cleanup(
        &self,
        storage_type: StorageType,
        _client_types: &QuotaClientTypes,
    ) -> SubsystemResult<()> {
        self.log.record(QuotaCall::Cleanup(storage_type));
        self.behavior.before_reply("quota").await
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DomStorageCall {
    LocalUsage,
    DeleteLocal(StorageKey),
    LocalCleanup,
    SessionUsage,
    DeleteSession(StorageKey),
    SessionCleanup,
}

/// Local and session storage held in memory.
#[derive(Default)]
pub struct FakeDomStorage {
    behavior: FakeBehavior,
    local: Mutex<Vec<StorageUsageInfo>>,
    session: Mutex<Vec<SessionStorageUsageInfo>>,
    pub log: CallLog<DomStorageCall>,
}

behavior_builders!(FakeDomStorage);

impl FakeDomStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_local(&self, storage_key: StorageKey, last_modified: DateTime<Utc>) {
        lock(&self.local).push(StorageUsageInfo {
            storage_key,
            total_size_bytes: 1024,
            last_modified,
        });
    }

    pub fn add_session(&self, storage_key: StorageKey, namespace_id: impl Into<String>) {
        lock(&self.session).push(SessionStorageUsageInfo {
            storage_key,
            namespace_id: namespace_id.into(),
        });
    }

    pub fn local_keys(&self) -> Vec<StorageKey> {
        lock(&self.local)
            .iter()
            .map(|info| info.storage_key.clone())
            .collect()
    }

    pub fn session_keys(&self) -> Vec<StorageKey> {
        lock(&self.session)
            .iter()
            .map(|info| info.storage_key.clone())
            .collect()
    }

    pub fn calls(&self) -> Vec<DomStorageCall> {
        self.log.snapshot()
    }

    pub async fn wait_for_calls(&self, count: usize) {
        self.log.wait_for(count).await
    }
}

#[async_trait]
impl DomStorageContext for FakeDomStorage {
    async fn local_storage_usage(&self) -> SubsystemResult<Vec<StorageUsageInfo>> {
        self.log.record(DomStorageCall::LocalUsage);
        self.behavior.before_reply("local_storage").await?;
        Ok(lock(&self.local).clone())
    }

    async fn delete_local_storage(&self, key: &StorageKey) -> SubsystemResult<()> {
        self.log.record(DomStorageCall::DeleteLocal(key.clone()));
        self.behavior.before_reply("local_storage").await?;
        lock(&self.local).retain(|info| info.storage_key != *key);
        Ok(())
    }

    async fn perform_local_storage_cleanup(&self) -> SubsystemResult<()> {
        self.log.record(DomStorageCall::LocalCleanup);
        self.behavior.before_reply("local_storage").await
    }

    async fn session_storage_usage(&self) -> SubsystemResult<Vec<SessionStorageUsageInfo>> {
        self.log.record(DomStorageCall::SessionUsage);
        self.behavior.before_reply("session_storage").await?;
        Ok(lock(&self.session).clone())
    }

    async fn delete_session_storage(&self, info: &SessionStorageUsageInfo) -> SubsystemResult<()> {
        self.log
            .record(DomStorageCall::DeleteSession(info.storage_key.clone()));
        self.behavior.before_reply("session_storage").await?;
        lock(&self.session).retain(|stored| stored != info);
        Ok(())
    }

    async fn perform_session_storage_cleanup(&self) -> SubsystemResult<()> {
        self.log.record(DomStorageCall::SessionCleanup);
        self.behavior.before_reply("session_storage").await
    }
}

#[derive(Default)]
pub struct FakeShaderCache {
    behavior: FakeBehavior,
    pub log: CallLog<(PathBuf, TimeRange)>,
}

behavior_builders!(FakeShaderCache);

impl FakeShaderCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ShaderCacheFactory for FakeShaderCache {
    async fn clear_by_path(&self, path: &Path, range: TimeRange) -> SubsystemResult<()> {
        self.log.record((path.to_path_buf(), range));
        self.behavior.before_reply("shader_cache").await
    }
}

#[derive(Clone)]
pub struct AttributionCall {
    pub range: TimeRange,
    pub filter: Option<StorageKeyMatcher>,
    pub delete_rate_limit_data: bool,
}

#[derive(Default)]
pub struct FakeAttributionManager {
    behavior: FakeBehavior,
    pub log: CallLog<AttributionCall>,
}

behavior_builders!(FakeAttributionManager);

impl FakeAttributionManager {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AttributionManager for FakeAttributionManager {
    async fn clear_data(
        &self,
        range: TimeRange,
        filter: Option<StorageKeyMatcher>,
        delete_rate_limit_data: bool,
    ) -> SubsystemResult<()> {
        self.log.record(AttributionCall {
            range,
            filter,
            delete_rate_limit_data,
        });
        self.behavior.before_reply("attribution").await
    }
}

#[derive(Default)]
pub struct FakeAggregationService {
    behavior: FakeBehavior,
    pub log: CallLog<(TimeRange, Option<StorageKeyMatcher>)>,
}

behavior_builders!(FakeAggregationService);

impl FakeAggregationService {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AggregationService for FakeAggregationService {
    async fn clear_data(
        &self,
        range: TimeRange,
        filter: Option<StorageKeyMatcher>,
    ) -> SubsystemResult<()> {
        self.log.record((range, filter));
        self.behavior.before_reply("aggregation_service").await
    }
}

#[derive(Clone)]
pub struct SharedStoragePurge {
    pub matcher: Option<StorageKeyPolicyMatcher>,
    pub range: TimeRange,
    pub perform_storage_cleanup: bool,
}

pub struct FakeSharedStorageManager {
    behavior: FakeBehavior,
    result: Mutex<SharedStorageOperationResult>,
    pub purges: CallLog<SharedStoragePurge>,
    pub results: CallLog<SharedStorageOperationResult>,
}

impl Default for FakeSharedStorageManager {
    fn default() -> Self {
        Self {
            behavior: FakeBehavior::default(),
            result: Mutex::new(SharedStorageOperationResult::Success),
            purges: CallLog::default(),
            results: CallLog::default(),
        }
    }
}

behavior_builders!(FakeSharedStorageManager);

impl FakeSharedStorageManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_result(&self, result: SharedStorageOperationResult) {
        *lock(&self.result) = result;
    }

    pub fn purge_calls(&self) -> usize {
        self.purges.len()
    }
}

#[async_trait]
impl SharedStorageManager for FakeSharedStorageManager {
    async fn purge_matching_origins(
        &self,
        matcher: Option<StorageKeyPolicyMatcher>,
        range: TimeRange,
        perform_storage_cleanup: bool,
    ) -> SharedStorageOperationResult {
        self.purges.record(SharedStoragePurge {
            matcher,
            range,
            perform_storage_cleanup,
        });
        match self.behavior.before_reply("shared_storage").await {
            Ok(()) => *lock(&self.result),
            Err(_) => SharedStorageOperationResult::InitFailure,
        }
    }

    fn on_operation_result(&self, result: SharedStorageOperationResult) {
        self.results.record(result);
    }
}

#[derive(Clone)]
pub enum InterestGroupCall {
    DeleteData(Option<StorageKeyMatcher>),
    ClearPermissionsCache,
}

#[derive(Default)]
pub struct FakeInterestGroupManager {
    behavior: FakeBehavior,
    pub log: CallLog<InterestGroupCall>,
}

behavior_builders!(FakeInterestGroupManager);

impl FakeInterestGroupManager {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl InterestGroupManager for FakeInterestGroupManager {
    async fn delete_interest_group_data(
        &self,
        filter: Option<StorageKeyMatcher>,
    ) -> SubsystemResult<()> {
        self.log.record(InterestGroupCall::DeleteData(filter));
        self.behavior.before_reply("interest_groups").await
    }

    async fn clear_permissions_cache(&self) -> SubsystemResult<()> {
        self.log.record(InterestGroupCall::ClearPermissionsCache);
        self.behavior.before_reply("interest_groups").await
    }
}

pub struct FakeFileSystemContext {
    behavior: FakeBehavior,
    partition_path: PathBuf,
    pub plugin_deletions: CallLog<()>,
}

behavior_builders!(FakeFileSystemContext);

impl FakeFileSystemContext {
    pub fn new(partition_path: impl Into<PathBuf>) -> Self {
        Self {
            behavior: FakeBehavior::default(),
            partition_path: partition_path.into(),
            plugin_deletions: CallLog::default(),
        }
    }
}

#[async_trait]
impl FileSystemContext for FakeFileSystemContext {
    fn partition_path(&self) -> PathBuf {
        self.partition_path.clone()
    }

    async fn delete_plugin_private_data(&self) -> SubsystemResult<()> {
        self.plugin_deletions.record(());
        self.behavior.before_reply("filesystem").await
    }
}

pub struct FakeCodeCache {
    behavior: FakeBehavior,
    kind: CodeCacheKind,
    pub log: CallLog<(TimeRange, Option<UrlMatcher>)>,
}

behavior_builders!(FakeCodeCache);

impl FakeCodeCache {
    pub fn new(kind: CodeCacheKind) -> Self {
        Self {
            behavior: FakeBehavior::default(),
            kind,
            log: CallLog::default(),
        }
    }
}

#[async_trait]
impl CodeCache for FakeCodeCache {
    fn kind(&self) -> CodeCacheKind {
        self.kind
    }

    async fn clear(
        &self,
        range: TimeRange,
        url_matcher: Option<UrlMatcher>,
    ) -> SubsystemResult<()> {
        self.log.record((range, url_matcher));
        self.behavior.before_reply("code_cache").await
    }
}
