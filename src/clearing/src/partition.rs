//! Storage partition: the public entry points for clearing data.
//!
//! Every entry point normalises its arguments into one [`DeletionRequest`],
//! validates it, tells the registered observers, and hands it to a fresh
//! deletion helper. Callers get their callback exactly once, always after
//! the call has returned.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use common::PartitionConfig;
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tracing::{debug, info};
use url::Url;
use uuid::Uuid;

use crate::callback::OnceClosure;
use crate::code_cache::CodeCacheDataRemover;
use crate::cookie::CookieDeletionFilter;
use crate::error::ClearDataError;
use crate::key::{
    InMemoryStoragePolicy, SpecialStoragePolicy, StorageKey, StorageKeyPolicyMatcher,
    generic_storage_key_matcher,
};
use crate::mask::{QuotaStorageMask, RemoveDataMask};
use crate::metrics::ClearDataMetrics;
use crate::observer::{DataRemovalObserver, ObserverList};
use crate::orchestrator::{DataDeletionHelper, HelperOptions};
use crate::request::{DeletionRequest, TimeRange};
use crate::subsystems::{SubsystemRegistry, UrlMatcher};

/// Bookkeeping reached from completion paths through a weak reference.
#[derive(Default)]
struct DeletionTracking {
    helpers_running: AtomicUsize,
    idle: Notify,
}

impl DeletionTracking {
    fn helper_started(&self) {
        self.helpers_running.fetch_add(1, Ordering::AcqRel);
    }

    fn helper_done(&self) {
        let previous = self.helpers_running.fetch_sub(1, Ordering::AcqRel);
        if previous == 1 {
            self.idle.notify_waiters();
        }
    }
}

pub struct StoragePartition {
    config: PartitionConfig,
    subsystems: SubsystemRegistry,
    policy: Arc<dyn SpecialStoragePolicy>,
    runtime: Handle,
    metrics: ClearDataMetrics,
    observers: ObserverList,
    tracking: Arc<DeletionTracking>,
}

impl StoragePartition {
    pub fn builder(config: PartitionConfig) -> StoragePartitionBuilder {
        StoragePartitionBuilder::new(config)
    }

    pub fn path(&self) -> &Path {
        Path::new(&self.config.path)
    }

    pub fn config(&self) -> &PartitionConfig {
        &self.config
    }

    pub fn is_off_the_record(&self) -> bool {
        self.config.off_the_record
    }

    pub fn subsystems(&self) -> &SubsystemRegistry {
        &self.subsystems
    }

    pub fn metrics(&self) -> &ClearDataMetrics {
        &self.metrics
    }

    pub fn add_observer(&self, observer: &Arc<dyn DataRemovalObserver>) {
        self.observers.add(observer);
    }

    pub fn remove_observer(&self, observer: &Arc<dyn DataRemovalObserver>) {
        self.observers.remove(observer);
    }

    /// Clear all data of `origin`, for all time, without storage cleanup.
    pub fn clear_data_for_origin(
        &self,
        remove_mask: RemoveDataMask,
        quota_storage_mask: QuotaStorageMask,
        origin: &Url,
        callback: impl FnOnce() + Send + 'static,
    ) -> Result<Uuid, ClearDataError> {
        let mut cookie_filter = CookieDeletionFilter::new();
        if let Some(host) = origin.host_str().filter(|host| !host.is_empty()) {
            cookie_filter.host_name = Some(host.to_string());
        }

        let request = DeletionRequest::new(remove_mask, quota_storage_mask)
            .with_storage_key(StorageKey::from_url(origin))
            .with_cookie_filter(cookie_filter)
            .with_range(TimeRange::all_time());
        self.clear(request, callback)
    }

    /// Clear data of `storage_key` (or everything, for an opaque key) in
    /// `range`. Storage cleanup runs only for a full wipe: an opaque key and
    /// an unbounded range.
    pub fn clear_data(
        &self,
        remove_mask: RemoveDataMask,
        quota_storage_mask: QuotaStorageMask,
        storage_key: &StorageKey,
        range: TimeRange,
        callback: impl FnOnce() + Send + 'static,
    ) -> Result<Uuid, ClearDataError> {
        let mut cookie_filter = CookieDeletionFilter::new();
        if let Some(host) = storage_key.host().filter(|host| !host.is_empty()) {
            cookie_filter.host_name = Some(host);
        }
        let perform_storage_cleanup = range.is_all_time() && storage_key.is_opaque();

        let request = DeletionRequest::new(remove_mask, quota_storage_mask)
            .with_storage_key(storage_key.clone())
            .with_cookie_filter(cookie_filter)
            .with_range(range)
            .with_storage_cleanup(perform_storage_cleanup);
        self.clear(request, callback)
    }

    /// Clear data selected by a policy matcher.
    #[allow(clippy::too_many_arguments)]
    pub fn clear_data_with_matcher(
        &self,
        remove_mask: RemoveDataMask,
        quota_storage_mask: QuotaStorageMask,
        key_matcher: Option<StorageKeyPolicyMatcher>,
        cookie_filter: CookieDeletionFilter,
        perform_storage_cleanup: bool,
        range: TimeRange,
        callback: impl FnOnce() + Send + 'static,
    ) -> Result<Uuid, ClearDataError> {
        let mut request = DeletionRequest::new(remove_mask, quota_storage_mask)
            .with_cookie_filter(cookie_filter)
            .with_range(range)
            .with_storage_cleanup(perform_storage_cleanup);
        request.key_matcher = key_matcher;
        self.clear(request, callback)
    }

    /// Start clearing for an already built request.
    ///
    /// An invalid request is rejected before any observer or subsystem is
    /// touched, and `callback` is then never run.
    pub fn clear(
        &self,
        request: DeletionRequest,
        callback: impl FnOnce() + Send + 'static,
    ) -> Result<Uuid, ClearDataError> {
        request.validate()?;

        for observer in self.observers.snapshot() {
            let matcher = generic_storage_key_matcher(
                &request.storage_key,
                request.key_matcher.as_ref(),
                &self.policy,
            );
            observer.on_storage_key_data_cleared(request.remove_mask, matcher, request.range);
        }

        let helper = DataDeletionHelper::new(
            request,
            self.subsystems.clone(),
            self.policy.clone(),
            HelperOptions {
                partition_path: PathBuf::from(&self.config.path),
                slow_task_timeout: self.config.slow_task_timeout,
                shared_storage_enabled: self.config.shared_storage_enabled,
            },
            self.metrics.clone(),
        );
        let request_id = helper.request_id();

        let tracking: Weak<DeletionTracking> = Arc::downgrade(&self.tracking);
        let done = OnceClosure::closure(move || {
            callback();
            if let Some(tracking) = tracking.upgrade() {
                tracking.helper_done();
            }
        });

        self.metrics.record_request_started();
        self.tracking.helper_started();
        helper.start(&self.runtime, done);
        Ok(request_id)
    }

    /// Clear every generated code cache of this partition.
    pub fn clear_code_caches(
        &self,
        range: TimeRange,
        url_matcher: Option<UrlMatcher>,
        callback: impl FnOnce() + Send + 'static,
    ) {
        CodeCacheDataRemover::new(
            self.subsystems.code_caches.clone(),
            range,
            url_matcher,
            self.metrics.clone(),
        )
        .remove(&self.runtime, OnceClosure::closure(callback));
    }

    /// Clear requests whose callback has not run yet.
    pub fn deletion_helpers_running(&self) -> usize {
        self.tracking.helpers_running.load(Ordering::Acquire)
    }

    /// Resolve once no clear request is running.
    pub async fn wait_for_deletion_tasks(&self) {
        loop {
            let idle = self.tracking.idle.notified();
            tokio::pin!(idle);
            idle.as_mut().enable();
            if self.deletion_helpers_running() == 0 {
                return;
            }
            idle.await;
        }
    }
}

impl Drop for StoragePartition {
    fn drop(&mut self) {
        let running = self.deletion_helpers_running();
        if running > 0 {
            debug!(
                path = %self.config.path,
                running,
                "Storage partition dropped with deletions in flight"
            );
        }
    }
}

pub struct StoragePartitionBuilder {
    config: PartitionConfig,
    subsystems: SubsystemRegistry,
    policy: Option<Arc<dyn SpecialStoragePolicy>>,
    metrics: Option<ClearDataMetrics>,
    runtime: Option<Handle>,
}

impl StoragePartitionBuilder {
    pub fn new(config: PartitionConfig) -> Self {
        Self {
            config,
            subsystems: SubsystemRegistry::new(),
            policy: None,
            metrics: None,
            runtime: None,
        }
    }

    pub fn with_subsystems(mut self, subsystems: SubsystemRegistry) -> Self {
        self.subsystems = subsystems;
        self
    }

    pub fn with_storage_policy(mut self, policy: Arc<dyn SpecialStoragePolicy>) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn with_metrics(mut self, metrics: ClearDataMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Runtime the clearing tasks are spawned on. Defaults to the current one.
    pub fn with_runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn build(self) -> Result<StoragePartition, ClearDataError> {
        self.config.validate()?;
        let runtime = match self.runtime {
            Some(runtime) => runtime,
            None => Handle::try_current()?,
        };

        let mut subsystems = self.subsystems;
        if self.config.off_the_record && subsystems.shared_storage_manager.take().is_some() {
            debug!(
                path = %self.config.path,
                "Off-the-record partition, discarding shared storage manager"
            );
        }

        info!(
            path = %self.config.path,
            off_the_record = self.config.off_the_record,
            subsystems = ?subsystems.present(),
            "Storage partition initialized"
        );

        Ok(StoragePartition {
            config: self.config,
            subsystems,
            policy: self
                .policy
                .unwrap_or_else(|| Arc::new(InMemoryStoragePolicy::new())),
            runtime,
            metrics: self.metrics.unwrap_or_default(),
            observers: ObserverList::default(),
            tracking: Arc::new(DeletionTracking::default()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RequestError;
    use crate::key::unprotected_origins_matcher;
    use crate::testing::{DomStorageCall, FakeBehavior, FakeSubsystems, Gate, RecordingObserver};
    use chrono::{Duration, Utc};
    use common::testing::TestConfigBuilder;
    use ntest::timeout;
    use std::sync::atomic::AtomicBool;
    use tokio::sync::oneshot;

    fn partition(fakes: &FakeSubsystems) -> StoragePartition {
        StoragePartition::builder(TestConfigBuilder::new().build_partition())
            .with_subsystems(fakes.registry())
            .build()
            .unwrap()
    }

    fn notifier() -> (impl FnOnce() + Send + 'static, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (
            move || {
                let _ = tx.send(());
            },
            rx,
        )
    }

    #[tokio::test]
    #[timeout(10000)]
    async fn test_clear_data_for_origin_scopes_everything() {
        let fakes = FakeSubsystems::new();
        let partition = partition(&fakes);
        let origin = Url::parse("https://www.example.test/page").unwrap();

        let (done, rx) = notifier();
        partition
            .clear_data_for_origin(
                RemoveDataMask::COOKIES | RemoveDataMask::LOCAL_STORAGE,
                QuotaStorageMask::ALL,
                &origin,
                done,
            )
            .unwrap();
        rx.await.unwrap();

        let filters = fakes.cookies.filters.snapshot();
        assert_eq!(filters.len(), 1);
        assert_eq!(filters[0].host_name.as_deref(), Some("www.example.test"));
        assert!(!filters[0].has_time_bounds());

        // Local storage is deleted directly by key; session storage is skipped.
        assert_eq!(
            fakes.dom_storage.calls(),
            vec![DomStorageCall::DeleteLocal(StorageKey::from_url(&origin))]
        );
    }

    #[tokio::test]
    #[timeout(10000)]
    async fn test_cleanup_only_for_full_wipe() {
        let fakes = FakeSubsystems::new();
        let partition = partition(&fakes);

        let (done, rx) = notifier();
        partition
            .clear_data(
                RemoveDataMask::LOCAL_STORAGE,
                QuotaStorageMask::ALL,
                &StorageKey::opaque(),
                TimeRange::all_time(),
                done,
            )
            .unwrap();
        rx.await.unwrap();
        let calls = fakes.dom_storage.calls();
        assert!(calls.contains(&DomStorageCall::LocalCleanup));
        assert!(calls.contains(&DomStorageCall::SessionCleanup));

        let fakes = FakeSubsystems::new();
        let partition = self::partition(&fakes);
        let (done, rx) = notifier();
        partition
            .clear_data(
                RemoveDataMask::LOCAL_STORAGE,
                QuotaStorageMask::ALL,
                &StorageKey::opaque(),
                TimeRange::new(None, Some(Utc::now())),
                done,
            )
            .unwrap();
        rx.await.unwrap();
        let calls = fakes.dom_storage.calls();
        assert!(!calls.contains(&DomStorageCall::LocalCleanup));
        assert!(!calls.contains(&DomStorageCall::SessionCleanup));
    }

    #[tokio::test]
    #[timeout(10000)]
    async fn test_invalid_request_never_calls_back() {
        let fakes = FakeSubsystems::new();
        let partition = partition(&fakes);
        let observer = Arc::new(RecordingObserver::new());
        let dyn_observer: Arc<dyn DataRemovalObserver> = observer.clone();
        partition.add_observer(&dyn_observer);

        let called = Arc::new(AtomicBool::new(false));
        let request = DeletionRequest::new(RemoveDataMask::COOKIES, QuotaStorageMask::ALL)
            .with_storage_key(StorageKey::parse("https://a.test").unwrap())
            .with_key_matcher(unprotected_origins_matcher());
        let result = {
            let called = called.clone();
            partition.clear(request, move || called.store(true, Ordering::SeqCst))
        };

        assert!(matches!(
            result,
            Err(ClearDataError::InvalidRequest(RequestError::KeyAndMatcher))
        ));
        tokio::task::yield_now().await;
        assert!(!called.load(Ordering::SeqCst));
        assert!(observer.notifications.is_empty());
        assert_eq!(partition.deletion_helpers_running(), 0);
        assert!(fakes.cookies.filters.is_empty());
    }

    #[tokio::test]
    #[timeout(10000)]
    async fn test_observers_notified_before_dispatch() {
        let gate = Gate::new();
        let fakes = FakeSubsystems::with_behavior(FakeBehavior::gated(gate.clone()));
        let partition = partition(&fakes);
        let observer = Arc::new(RecordingObserver::new());
        let dyn_observer: Arc<dyn DataRemovalObserver> = observer.clone();
        partition.add_observer(&dyn_observer);

        let key = StorageKey::parse("https://a.test").unwrap();
        let other = StorageKey::parse("https://b.test").unwrap();
        let range = TimeRange::since(Utc::now() - Duration::hours(1));
        let (done, rx) = notifier();
        partition
            .clear_data(RemoveDataMask::COOKIES, QuotaStorageMask::ALL, &key, range, done)
            .unwrap();

        let notifications = observer.notifications.snapshot();
        assert_eq!(notifications.len(), 1);
        assert_eq!(notifications[0].remove_mask, RemoveDataMask::COOKIES);
        assert_eq!(notifications[0].range, range);
        let matcher = notifications[0].matcher.clone().unwrap();
        assert!(matcher(&key));
        assert!(!matcher(&other));
        assert!(fakes.cookies.filters.is_empty());

        partition.remove_observer(&dyn_observer);
        gate.open();
        rx.await.unwrap();
    }

    #[tokio::test]
    #[timeout(10000)]
    async fn test_wait_for_deletion_tasks() {
        let gate = Gate::new();
        let fakes = FakeSubsystems::with_behavior(FakeBehavior::gated(gate.clone()));
        let partition = partition(&fakes);

        for _ in 0..3 {
            partition
                .clear_data(
                    RemoveDataMask::SHADER_CACHE,
                    QuotaStorageMask::empty(),
                    &StorageKey::opaque(),
                    TimeRange::all_time(),
                    || {},
                )
                .unwrap();
        }
        assert_eq!(partition.deletion_helpers_running(), 3);

        gate.open();
        partition.wait_for_deletion_tasks().await;
        assert_eq!(partition.deletion_helpers_running(), 0);
        assert_eq!(partition.metrics().requests_completed(), 3);
        assert_eq!(fakes.shader_cache.log.len(), 3);
    }

    #[tokio::test]
    #[timeout(10000)]
    async fn test_off_the_record_discards_shared_storage() {
        let fakes = FakeSubsystems::new();
        let partition = StoragePartition::builder(
            TestConfigBuilder::new().off_the_record().build_partition(),
        )
        .with_subsystems(fakes.registry())
        .build()
        .unwrap();
        assert!(partition.subsystems().shared_storage_manager.is_none());

        let (done, rx) = notifier();
        partition
            .clear_data_with_matcher(
                RemoveDataMask::SHARED_STORAGE,
                QuotaStorageMask::empty(),
                None,
                CookieDeletionFilter::new(),
                false,
                TimeRange::all_time(),
                done,
            )
            .unwrap();
        rx.await.unwrap();
        assert_eq!(fakes.shared_storage.purge_calls(), 0);
    }

    #[test]
    fn test_build_requires_runtime() {
        let result = StoragePartition::builder(TestConfigBuilder::new().build_partition()).build();
        assert!(matches!(result, Err(ClearDataError::NoRuntime(_))));
    }

    #[test]
    fn test_build_rejects_invalid_config() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let result = StoragePartition::builder(TestConfigBuilder::new().with_path("").build_partition())
            .with_runtime(runtime.handle().clone())
            .build();
        assert!(matches!(result, Err(ClearDataError::Config(_))));
    }
}
