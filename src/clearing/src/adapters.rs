//! Per-category deletion adapters.
//!
//! Each adapter translates the canonical request into one subsystem call and
//! always releases its completion slot exactly once. Absent subsystems count
//! as nothing to delete. Subsystem failures are logged and recorded, never
//! propagated.

use std::path::PathBuf;
use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::callback::OnceClosure;
use crate::error::SubsystemError;
use crate::key::{SpecialStoragePolicy, StorageKey, StorageKeyMatcher};
use crate::mask::RemoveDataMask;
use crate::metrics::ClearDataMetrics;
use crate::orchestrator::DeletionTask;
use crate::request::DeletionRequest;
use crate::subsystems::{
    AggregationService, AttributionManager, CookieManager, DomStorageContext, FileSystemContext,
    InterestGroupManager, ShaderCacheFactory, SharedStorageManager,
};

/// State shared by every category of one clear request.
pub(crate) struct DeletionContext {
    pub request_id: Uuid,
    pub request: DeletionRequest,
    pub policy: Arc<dyn SpecialStoragePolicy>,
    /// Plain key filter derived from the request's key or matcher.
    pub generic_matcher: Option<StorageKeyMatcher>,
    pub partition_path: PathBuf,
    pub metrics: ClearDataMetrics,
}

impl DeletionContext {
    /// Whether the request's policy matcher, if any, selects `key`.
    pub(crate) fn matcher_allows(&self, key: &StorageKey) -> bool {
        self.request
            .key_matcher
            .as_ref()
            .is_none_or(|matcher| matcher(key, self.policy.as_ref()))
    }

    pub(crate) fn report_failure(&self, task: DeletionTask, error: &SubsystemError) {
        self.metrics.record_subsystem_failure();
        warn!(
            request_id = %self.request_id,
            task = %task,
            error = %error,
            "Subsystem failed to clear data"
        );
    }

    fn report_absent(&self, task: DeletionTask) {
        debug!(
            request_id = %self.request_id,
            task = %task,
            "Subsystem not constructed, nothing to clear"
        );
    }
}

pub(crate) async fn clear_cookies(
    ctx: Arc<DeletionContext>,
    manager: Option<Arc<dyn CookieManager>>,
    done: OnceClosure,
) {
    let Some(manager) = manager else {
        ctx.report_absent(DeletionTask::Cookies);
        return done.done();
    };

    let filter = ctx.request.merged_cookie_filter();
    match manager.delete_cookies(filter).await {
        Ok(deleted) => debug!(request_id = %ctx.request_id, deleted, "Deleted cookies"),
        Err(e) => ctx.report_failure(DeletionTask::Cookies, &e),
    }
    done.done();
}

pub(crate) async fn clear_interest_groups(
    ctx: Arc<DeletionContext>,
    manager: Option<Arc<dyn InterestGroupManager>>,
    done: OnceClosure,
) {
    let Some(manager) = manager else {
        ctx.report_absent(DeletionTask::InterestGroups);
        return done.done();
    };

    if let Err(e) = manager
        .delete_interest_group_data(ctx.generic_matcher.clone())
        .await
    {
        ctx.report_failure(DeletionTask::InterestGroups, &e);
    }
    done.done();
}

pub(crate) async fn clear_interest_group_permissions(
    ctx: Arc<DeletionContext>,
    manager: Option<Arc<dyn InterestGroupManager>>,
    done: OnceClosure,
) {
    let Some(manager) = manager else {
        ctx.report_absent(DeletionTask::InterestGroupPermissionsCache);
        return done.done();
    };

    if let Err(e) = manager.clear_permissions_cache().await {
        ctx.report_failure(DeletionTask::InterestGroupPermissionsCache, &e);
    }
    done.done();
}

/// Local storage: an explicit key is deleted directly, otherwise every
/// matching entry modified in range is deleted and the store optionally
/// compacted afterwards.
pub(crate) async fn clear_local_storage(
    ctx: Arc<DeletionContext>,
    dom_storage: Option<Arc<dyn DomStorageContext>>,
    done: OnceClosure,
) {
    let Some(dom_storage) = dom_storage else {
        ctx.report_absent(DeletionTask::LocalStorage);
        return done.done();
    };

    if let Some(key) = ctx.request.explicit_key() {
        if ctx.matcher_allows(key)
            && let Err(e) = dom_storage.delete_local_storage(key).await
        {
            ctx.report_failure(DeletionTask::LocalStorage, &e);
        }
        return done.done();
    }

    let infos = match dom_storage.local_storage_usage().await {
        Ok(infos) => infos,
        Err(e) => {
            ctx.report_failure(DeletionTask::LocalStorage, &e);
            Vec::new()
        }
    };

    let matching: Vec<_> = infos
        .iter()
        .filter(|info| ctx.matcher_allows(&info.storage_key))
        .filter(|info| ctx.request.range.contains(info.last_modified))
        .collect();
    let results = join_all(
        matching
            .iter()
            .map(|info| dom_storage.delete_local_storage(&info.storage_key)),
    )
    .await;
    for error in results.iter().filter_map(|r| r.as_ref().err()) {
        ctx.report_failure(DeletionTask::LocalStorage, error);
    }
    debug!(
        request_id = %ctx.request_id,
        listed = infos.len(),
        deleted = matching.len(),
        "Cleared local storage"
    );

    if ctx.request.perform_storage_cleanup {
        ctx.metrics.record_storage_cleanup();
        if let Err(e) = dom_storage.perform_local_storage_cleanup().await {
            ctx.report_failure(DeletionTask::LocalStorage, &e);
        }
    }
    done.done();
}

/// Session storage cannot be scoped to one key; the caller only dispatches
/// this for unscoped requests.
pub(crate) async fn clear_session_storage(
    ctx: Arc<DeletionContext>,
    dom_storage: Option<Arc<dyn DomStorageContext>>,
    done: OnceClosure,
) {
    let Some(dom_storage) = dom_storage else {
        ctx.report_absent(DeletionTask::SessionStorage);
        return done.done();
    };

    let infos = match dom_storage.session_storage_usage().await {
        Ok(infos) => infos,
        Err(e) => {
            ctx.report_failure(DeletionTask::SessionStorage, &e);
            Vec::new()
        }
    };

    let results = join_all(
        infos
            .iter()
            .filter(|info| ctx.matcher_allows(&info.storage_key))
            .map(|info| dom_storage.delete_session_storage(info)),
    )
    .await;
    for error in results.iter().filter_map(|r| r.as_ref().err()) {
        ctx.report_failure(DeletionTask::SessionStorage, error);
    }

    if ctx.request.perform_storage_cleanup {
        ctx.metrics.record_storage_cleanup();
        if let Err(e) = dom_storage.perform_session_storage_cleanup().await {
            ctx.report_failure(DeletionTask::SessionStorage, &e);
        }
    }
    done.done();
}

pub(crate) async fn clear_shader_cache(
    ctx: Arc<DeletionContext>,
    factory: Option<Arc<dyn ShaderCacheFactory>>,
    done: OnceClosure,
) {
    let Some(factory) = factory else {
        ctx.report_absent(DeletionTask::ShaderCache);
        return done.done();
    };

    if let Err(e) = factory
        .clear_by_path(&ctx.partition_path, ctx.request.range)
        .await
    {
        ctx.report_failure(DeletionTask::ShaderCache, &e);
    }
    done.done();
}

pub(crate) async fn clear_attribution_data(
    ctx: Arc<DeletionContext>,
    manager: Option<Arc<dyn AttributionManager>>,
    done: OnceClosure,
) {
    let Some(manager) = manager else {
        ctx.report_absent(DeletionTask::Attribution);
        return done.done();
    };

    let delete_rate_limit_data = ctx
        .request
        .remove_mask
        .contains(RemoveDataMask::ATTRIBUTION_REPORTING_INTERNAL);
    if let Err(e) = manager
        .clear_data(
            ctx.request.range,
            ctx.generic_matcher.clone(),
            delete_rate_limit_data,
        )
        .await
    {
        ctx.report_failure(DeletionTask::Attribution, &e);
    }
    done.done();
}

pub(crate) async fn clear_aggregation_data(
    ctx: Arc<DeletionContext>,
    service: Option<Arc<dyn AggregationService>>,
    done: OnceClosure,
) {
    let Some(service) = service else {
        ctx.report_absent(DeletionTask::AggregationService);
        return done.done();
    };

    if let Err(e) = service
        .clear_data(ctx.request.range, ctx.generic_matcher.clone())
        .await
    {
        ctx.report_failure(DeletionTask::AggregationService, &e);
    }
    done.done();
}

/// Shared storage purge. The manager gets its own result back, failures
/// included.
pub(crate) async fn clear_shared_storage(
    ctx: Arc<DeletionContext>,
    manager: Option<Arc<dyn SharedStorageManager>>,
    done: OnceClosure,
) {
    let Some(manager) = manager else {
        ctx.report_absent(DeletionTask::SharedStorage);
        return done.done();
    };

    let result = manager
        .purge_matching_origins(
            ctx.request.key_matcher.clone(),
            ctx.request.range,
            ctx.request.perform_storage_cleanup,
        )
        .await;
    debug!(request_id = %ctx.request_id, ?result, "Shared storage purge finished");
    manager.on_operation_result(result);
    done.done();
}

pub(crate) async fn clear_plugin_private_data(
    ctx: Arc<DeletionContext>,
    filesystem: Option<Arc<dyn FileSystemContext>>,
    done: OnceClosure,
) {
    let Some(filesystem) = filesystem else {
        ctx.report_absent(DeletionTask::PluginPrivate);
        return done.done();
    };

    match filesystem.delete_plugin_private_data().await {
        Ok(()) => info!(
            request_id = %ctx.request_id,
            path = %filesystem.partition_path().display(),
            "Cleared plugin private data"
        ),
        Err(e) => ctx.report_failure(DeletionTask::PluginPrivate, &e),
    }
    done.done();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::{InMemoryStoragePolicy, generic_storage_key_matcher};
    use crate::mask::QuotaStorageMask;
    use crate::request::TimeRange;
    use crate::subsystems::SharedStorageOperationResult;
    use crate::testing::{
        DomStorageCall, FakeAttributionManager, FakeDomStorage, FakeSharedStorageManager, Gate,
    };
    use chrono::{Duration, Utc};
    use ntest::timeout;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn context(request: DeletionRequest) -> Arc<DeletionContext> {
        let policy: Arc<dyn SpecialStoragePolicy> = Arc::new(InMemoryStoragePolicy::new());
        Arc::new(DeletionContext {
            request_id: Uuid::new_v4(),
            generic_matcher: generic_storage_key_matcher(
                &request.storage_key,
                request.key_matcher.as_ref(),
                &policy,
            ),
            request,
            policy,
            partition_path: "partition".into(),
            metrics: ClearDataMetrics::new(),
        })
    }

    fn flag() -> (Arc<AtomicBool>, OnceClosure) {
        let fired = Arc::new(AtomicBool::new(false));
        let done = {
            let fired = fired.clone();
            OnceClosure::closure(move || fired.store(true, Ordering::SeqCst))
        };
        (fired, done)
    }

    #[tokio::test]
    async fn test_attribution_internal_bit_deletes_rate_limits() {
        for (mask, expected) in [
            (RemoveDataMask::ATTRIBUTION_REPORTING, false),
            (
                RemoveDataMask::ATTRIBUTION_REPORTING
                    | RemoveDataMask::ATTRIBUTION_REPORTING_INTERNAL,
                true,
            ),
        ] {
            let manager = Arc::new(FakeAttributionManager::new());
            let (fired, done) = flag();
            let ctx = context(DeletionRequest::new(mask, QuotaStorageMask::empty()));
            clear_attribution_data(ctx, Some(manager.clone()), done).await;

            assert!(fired.load(Ordering::SeqCst));
            let calls = manager.log.snapshot();
            assert_eq!(calls.len(), 1);
            assert_eq!(calls[0].delete_rate_limit_data, expected);
            assert!(calls[0].filter.is_none());
        }
    }

    #[tokio::test]
    async fn test_local_storage_filters_by_range() {
        let dom = Arc::new(FakeDomStorage::new());
        let old = StorageKey::parse("https://old.test").unwrap();
        let recent = StorageKey::parse("https://recent.test").unwrap();
        dom.add_local(old.clone(), Utc::now() - Duration::days(2));
        dom.add_local(recent.clone(), Utc::now() - Duration::minutes(5));

        let request = DeletionRequest::new(RemoveDataMask::LOCAL_STORAGE, QuotaStorageMask::empty())
            .with_range(TimeRange::since(Utc::now() - Duration::hours(1)));
        let ctx = context(request);
        let (fired, done) = flag();
        clear_local_storage(ctx.clone(), Some(dom.clone()), done).await;

        assert!(fired.load(Ordering::SeqCst));
        assert_eq!(dom.local_keys(), vec![old]);
        assert_eq!(
            dom.calls(),
            vec![DomStorageCall::LocalUsage, DomStorageCall::DeleteLocal(recent)]
        );
        assert_eq!(ctx.metrics.storage_cleanups(), 0);
    }

    #[tokio::test]
    async fn test_local_storage_explicit_key_deletes_directly() {
        let dom = Arc::new(FakeDomStorage::new());
        let key = StorageKey::parse("https://a.test").unwrap();
        dom.add_local(key.clone(), Utc::now());

        let request = DeletionRequest::new(RemoveDataMask::LOCAL_STORAGE, QuotaStorageMask::empty())
            .with_storage_key(key.clone())
            .with_storage_cleanup(true);
        let (_, done) = flag();
        clear_local_storage(context(request), Some(dom.clone()), done).await;

        // Explicit keys skip the usage listing and never compact.
        assert_eq!(dom.calls(), vec![DomStorageCall::DeleteLocal(key)]);
        assert!(dom.local_keys().is_empty());
    }

    #[tokio::test]
    async fn test_shared_storage_result_reported_back() {
        let manager = Arc::new(FakeSharedStorageManager::new());
        manager.set_result(SharedStorageOperationResult::SqlError);

        let request = DeletionRequest::new(RemoveDataMask::SHARED_STORAGE, QuotaStorageMask::empty())
            .with_storage_cleanup(true);
        let (fired, done) = flag();
        clear_shared_storage(context(request), Some(manager.clone()), done).await;

        assert!(fired.load(Ordering::SeqCst));
        let purges = manager.purges.snapshot();
        assert_eq!(purges.len(), 1);
        assert!(purges[0].perform_storage_cleanup);
        assert!(purges[0].matcher.is_none());
        assert_eq!(
            manager.results.snapshot(),
            vec![SharedStorageOperationResult::SqlError]
        );
    }

    #[tokio::test]
    #[timeout(5000)]
    async fn test_shared_storage_failure_reported_back() {
        let gate = Gate::new();
        gate.disconnect();
        let manager = Arc::new(FakeSharedStorageManager::new().with_gate(gate));

        let request =
            DeletionRequest::new(RemoveDataMask::SHARED_STORAGE, QuotaStorageMask::empty());
        let (fired, done) = flag();
        clear_shared_storage(context(request), Some(manager.clone()), done).await;

        assert!(fired.load(Ordering::SeqCst));
        assert_eq!(
            manager.results.snapshot(),
            vec![SharedStorageOperationResult::InitFailure]
        );
    }

    #[tokio::test]
    #[timeout(5000)]
    async fn test_failure_still_releases_slot() {
        let gate = Gate::new();
        gate.disconnect();
        let dom = Arc::new(FakeDomStorage::new().with_gate(gate));

        let ctx = context(DeletionRequest::new(
            RemoveDataMask::LOCAL_STORAGE,
            QuotaStorageMask::empty(),
        ));
        let (fired, done) = flag();
        clear_session_storage(ctx.clone(), Some(dom), done).await;

        assert!(fired.load(Ordering::SeqCst));
        assert_eq!(ctx.metrics.subsystem_failures(), 1);
    }

    #[tokio::test]
    async fn test_absent_subsystem_completes() {
        let ctx = context(DeletionRequest::new(
            RemoveDataMask::COOKIES,
            QuotaStorageMask::empty(),
        ));
        let (fired, done) = flag();
        clear_cookies(ctx.clone(), None, done).await;
        assert!(fired.load(Ordering::SeqCst));
        assert_eq!(ctx.metrics.subsystem_failures(), 0);
    }
}
