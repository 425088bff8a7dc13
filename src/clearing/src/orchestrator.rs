//! Top-level fan-out and join for one clear request.
//!
//! A [`DataDeletionHelper`] is created per request and consumed by
//! [`DataDeletionHelper::start`]. It reserves one barrier slot per requested
//! category plus one slot held for the duration of dispatch, runs every
//! category on its own task, and releases the caller's callback when the
//! last slot is signalled. Completions are marshalled to a single control
//! task which owns the pending task set; if tasks are still pending after
//! the slow task timeout, they are logged and counted once.

use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::adapters::{self, DeletionContext};
use crate::barrier::BarrierClosure;
use crate::callback::OnceClosure;
use crate::key::{SpecialStoragePolicy, generic_storage_key_matcher};
use crate::mask::RemoveDataMask;
use crate::metrics::ClearDataMetrics;
use crate::quota::QuotaManagedDataDeletionHelper;
use crate::request::DeletionRequest;
use crate::subsystems::SubsystemRegistry;

/// Identifies one outstanding unit of a clear request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DeletionTask {
    /// Held while categories are being dispatched.
    Synchronous,
    Cookies,
    Quota,
    LocalStorage,
    SessionStorage,
    ShaderCache,
    PluginPrivate,
    Attribution,
    AggregationService,
    SharedStorage,
    InterestGroups,
    InterestGroupPermissionsCache,
}

impl DeletionTask {
    pub const COUNT: usize = 12;

    pub const ALL: [DeletionTask; Self::COUNT] = [
        DeletionTask::Synchronous,
        DeletionTask::Cookies,
        DeletionTask::Quota,
        DeletionTask::LocalStorage,
        DeletionTask::SessionStorage,
        DeletionTask::ShaderCache,
        DeletionTask::PluginPrivate,
        DeletionTask::Attribution,
        DeletionTask::AggregationService,
        DeletionTask::SharedStorage,
        DeletionTask::InterestGroups,
        DeletionTask::InterestGroupPermissionsCache,
    ];

    pub const fn index(self) -> usize {
        self as usize
    }

    pub const fn name(self) -> &'static str {
        match self {
            DeletionTask::Synchronous => "synchronous",
            DeletionTask::Cookies => "cookies",
            DeletionTask::Quota => "quota",
            DeletionTask::LocalStorage => "local_storage",
            DeletionTask::SessionStorage => "session_storage",
            DeletionTask::ShaderCache => "shader_cache",
            DeletionTask::PluginPrivate => "plugin_private",
            DeletionTask::Attribution => "attribution",
            DeletionTask::AggregationService => "aggregation_service",
            DeletionTask::SharedStorage => "shared_storage",
            DeletionTask::InterestGroups => "interest_groups",
            DeletionTask::InterestGroupPermissionsCache => "interest_group_permissions_cache",
        }
    }
}

impl fmt::Display for DeletionTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Options fixed per partition.
#[derive(Clone, Debug)]
pub(crate) struct HelperOptions {
    pub partition_path: PathBuf,
    pub slow_task_timeout: Duration,
    pub shared_storage_enabled: bool,
}

pub(crate) struct DataDeletionHelper {
    request_id: Uuid,
    request: DeletionRequest,
    subsystems: SubsystemRegistry,
    policy: Arc<dyn SpecialStoragePolicy>,
    options: HelperOptions,
    metrics: ClearDataMetrics,
}

impl DataDeletionHelper {
    pub(crate) fn new(
        request: DeletionRequest,
        subsystems: SubsystemRegistry,
        policy: Arc<dyn SpecialStoragePolicy>,
        options: HelperOptions,
        metrics: ClearDataMetrics,
    ) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            request,
            subsystems,
            policy,
            options,
            metrics,
        }
    }

    pub(crate) fn request_id(&self) -> Uuid {
        self.request_id
    }

    /// Categories this request dispatches, in dispatch order.
    pub(crate) fn requested_tasks(&self) -> Vec<DeletionTask> {
        let mask = self.request.remove_mask;
        let mut tasks = Vec::new();

        if mask.contains(RemoveDataMask::COOKIES) {
            tasks.push(DeletionTask::Cookies);
        }
        if mask.contains(RemoveDataMask::INTEREST_GROUPS) {
            tasks.push(DeletionTask::InterestGroups);
        }
        if mask.contains(RemoveDataMask::INTEREST_GROUP_PERMISSIONS_CACHE) {
            tasks.push(DeletionTask::InterestGroupPermissionsCache);
        }
        if mask.intersects(RemoveDataMask::QUOTA_MANAGED) {
            tasks.push(DeletionTask::Quota);
        }
        if mask.contains(RemoveDataMask::LOCAL_STORAGE) {
            tasks.push(DeletionTask::LocalStorage);
            if self.request.explicit_key().is_none() {
                tasks.push(DeletionTask::SessionStorage);
            }
        }
        if mask.contains(RemoveDataMask::SHADER_CACHE) {
            tasks.push(DeletionTask::ShaderCache);
        }
        if mask.contains(RemoveDataMask::ATTRIBUTION_REPORTING) {
            tasks.push(DeletionTask::Attribution);
        }
        if mask.contains(RemoveDataMask::AGGREGATION_SERVICE) {
            tasks.push(DeletionTask::AggregationService);
        }
        if mask.contains(RemoveDataMask::PLUGIN_PRIVATE) {
            tasks.push(DeletionTask::PluginPrivate);
        }
        if mask.contains(RemoveDataMask::SHARED_STORAGE) && self.options.shared_storage_enabled {
            tasks.push(DeletionTask::SharedStorage);
        }
        tasks
    }

    /// Spawn the control task on `runtime`. `done` runs exactly once, never
    /// before this returns.
    pub(crate) fn start(self, runtime: &Handle, done: OnceClosure) -> JoinHandle<()> {
        runtime.spawn(self.run(done))
    }

    async fn run(self, done: OnceClosure) {
        let tasks = self.requested_tasks();
        let (completions_tx, mut completions_rx) = mpsc::unbounded_channel::<DeletionTask>();

        info!(
            request_id = %self.request_id,
            remove_mask = %self.request.remove_mask,
            storage_key = %self.request.storage_key,
            range = %self.request.range,
            perform_storage_cleanup = self.request.perform_storage_cleanup,
            tasks = tasks.len(),
            "Starting data deletion"
        );

        let request_id = self.request_id;
        let metrics = self.metrics.clone();
        let barrier = BarrierClosure::new(tasks.len() + 1, move || {
            info!(request_id = %request_id, "Data deletion complete");
            metrics.record_request_completed();
            done.done();
        });

        let mut pending = HashSet::with_capacity(tasks.len() + 1);
        pending.insert(DeletionTask::Synchronous);

        let ctx = Arc::new(DeletionContext {
            request_id: self.request_id,
            generic_matcher: generic_storage_key_matcher(
                &self.request.storage_key,
                self.request.key_matcher.as_ref(),
                &self.policy,
            ),
            request: self.request.clone(),
            policy: self.policy.clone(),
            partition_path: self.options.partition_path.clone(),
            metrics: self.metrics.clone(),
        });

        for task in tasks {
            if !pending.insert(task) {
                error!(request_id = %self.request_id, task = %task, "Task already started");
                continue;
            }
            let completions_tx = completions_tx.clone();
            let slot = OnceClosure::run_on_drop(move || {
                let _ = completions_tx.send(task);
            });
            self.dispatch(task, ctx.clone(), slot);
            self.metrics.record_task_dispatched();
        }
        let _ = completions_tx.send(DeletionTask::Synchronous);
        drop(completions_tx);

        let slow_timer = tokio::time::sleep(self.options.slow_task_timeout);
        tokio::pin!(slow_timer);
        let mut slow_reported = false;

        while !barrier.is_complete() {
            tokio::select! {
                completion = completions_rx.recv() => {
                    let Some(task) = completion else {
                        warn!(
                            request_id = %self.request_id,
                            pending = pending.len(),
                            "Completion channel closed with tasks pending"
                        );
                        break;
                    };
                    self.on_task_complete(&mut pending, task, &barrier);
                }
                () = &mut slow_timer, if !slow_reported => {
                    slow_reported = true;
                    self.record_unfinished_tasks(&pending);
                }
            }
        }
    }

    fn dispatch(&self, task: DeletionTask, ctx: Arc<DeletionContext>, slot: OnceClosure) {
        let subsystems = &self.subsystems;
        debug!(request_id = %self.request_id, task = %task, "Dispatching deletion task");

        match task {
            DeletionTask::Synchronous => slot.done(),
            DeletionTask::Cookies => {
                let manager = subsystems.cookie_manager.clone();
                tokio::spawn(adapters::clear_cookies(ctx, manager, slot));
            }
            DeletionTask::InterestGroups => {
                let manager = subsystems.interest_group_manager.clone();
                tokio::spawn(adapters::clear_interest_groups(ctx, manager, slot));
            }
            DeletionTask::InterestGroupPermissionsCache => {
                let manager = subsystems.interest_group_manager.clone();
                tokio::spawn(adapters::clear_interest_group_permissions(
                    ctx, manager, slot,
                ));
            }
            DeletionTask::Quota => {
                let manager = subsystems.quota_manager.clone();
                tokio::spawn(QuotaManagedDataDeletionHelper::run(ctx, manager, slot));
            }
            DeletionTask::LocalStorage => {
                let dom_storage = subsystems.dom_storage.clone();
                tokio::spawn(adapters::clear_local_storage(ctx, dom_storage, slot));
            }
            DeletionTask::SessionStorage => {
                let dom_storage = subsystems.dom_storage.clone();
                tokio::spawn(adapters::clear_session_storage(ctx, dom_storage, slot));
            }
            DeletionTask::ShaderCache => {
                let factory = subsystems.shader_cache.clone();
                tokio::spawn(adapters::clear_shader_cache(ctx, factory, slot));
            }
            DeletionTask::Attribution => {
                let manager = subsystems.attribution_manager.clone();
                tokio::spawn(adapters::clear_attribution_data(ctx, manager, slot));
            }
            DeletionTask::AggregationService => {
                let service = subsystems.aggregation_service.clone();
                tokio::spawn(adapters::clear_aggregation_data(ctx, service, slot));
            }
            DeletionTask::SharedStorage => {
                let manager = subsystems.shared_storage_manager.clone();
                tokio::spawn(adapters::clear_shared_storage(ctx, manager, slot));
            }
            DeletionTask::PluginPrivate => {
                let filesystem = subsystems.filesystem_context.clone();
                tokio::spawn(adapters::clear_plugin_private_data(ctx, filesystem, slot));
            }
        }
    }

    fn on_task_complete(
        &self,
        pending: &mut HashSet<DeletionTask>,
        task: DeletionTask,
        barrier: &BarrierClosure,
    ) {
        if !pending.remove(&task) {
            error!(
                request_id = %self.request_id,
                task = %task,
                "Completion reported for a task that is not pending"
            );
            return;
        }
        debug!(
            request_id = %self.request_id,
            task = %task,
            remaining = pending.len(),
            "Deletion task finished"
        );
        if let Err(e) = barrier.signal() {
            error!(request_id = %self.request_id, error = %e, "Barrier overrun");
        }
    }

    fn record_unfinished_tasks(&self, pending: &HashSet<DeletionTask>) {
        let mut unfinished: Vec<_> = pending.iter().copied().collect();
        unfinished.sort();
        for task in &unfinished {
            self.metrics.record_slow_task(*task);
        }
        warn!(
            request_id = %self.request_id,
            timeout = ?self.options.slow_task_timeout,
            pending = ?unfinished.iter().map(|t| t.name()).collect::<Vec<_>>(),
            "Data deletion tasks are taking unusually long"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::{InMemoryStoragePolicy, StorageKey};
    use crate::mask::QuotaStorageMask;
    use crate::testing::{FakeCookieManager, FakeDomStorage, FakeSharedStorageManager, Gate};
    use ntest::timeout;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::oneshot;

    fn options() -> HelperOptions {
        HelperOptions {
            partition_path: "partition".into(),
            slow_task_timeout: Duration::from_secs(180),
            shared_storage_enabled: true,
        }
    }

    fn helper(request: DeletionRequest, subsystems: SubsystemRegistry) -> DataDeletionHelper {
        DataDeletionHelper::new(
            request,
            subsystems,
            Arc::new(InMemoryStoragePolicy::new()),
            options(),
            ClearDataMetrics::new(),
        )
    }

    fn completion() -> (OnceClosure, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (
            OnceClosure::closure(move || {
                let _ = tx.send(());
            }),
            rx,
        )
    }

    #[test]
    fn test_task_indices_are_dense() {
        for (i, task) in DeletionTask::ALL.iter().enumerate() {
            assert_eq!(task.index(), i);
        }
    }

    #[test]
    fn test_session_storage_skipped_for_explicit_key() {
        let key = StorageKey::parse("https://a.test").unwrap();
        let scoped = helper(
            DeletionRequest::new(RemoveDataMask::LOCAL_STORAGE, QuotaStorageMask::ALL)
                .with_storage_key(key),
            SubsystemRegistry::new(),
        );
        assert_eq!(scoped.requested_tasks(), vec![DeletionTask::LocalStorage]);

        let unscoped = helper(
            DeletionRequest::new(RemoveDataMask::LOCAL_STORAGE, QuotaStorageMask::ALL),
            SubsystemRegistry::new(),
        );
        assert_eq!(
            unscoped.requested_tasks(),
            vec![DeletionTask::LocalStorage, DeletionTask::SessionStorage]
        );
    }

    #[test]
    fn test_quota_requested_once_for_many_bits() {
        let request = DeletionRequest::new(
            RemoveDataMask::INDEXEDDB | RemoveDataMask::WEBSQL | RemoveDataMask::BACKGROUND_FETCH,
            QuotaStorageMask::ALL,
        );
        assert_eq!(
            helper(request, SubsystemRegistry::new()).requested_tasks(),
            vec![DeletionTask::Quota]
        );
    }

    #[test]
    fn test_disabled_shared_storage_is_not_requested() {
        let request = DeletionRequest::new(RemoveDataMask::SHARED_STORAGE, QuotaStorageMask::ALL);
        let mut disabled = helper(request, SubsystemRegistry::new());
        disabled.options.shared_storage_enabled = false;
        assert!(disabled.requested_tasks().is_empty());
    }

    #[tokio::test]
    #[timeout(10000)]
    async fn test_completes_with_absent_subsystems() {
        let (done, rx) = completion();
        let helper = helper(
            DeletionRequest::new(RemoveDataMask::ALL, QuotaStorageMask::ALL),
            SubsystemRegistry::new(),
        );
        let metrics = helper.metrics.clone();
        helper.start(&Handle::current(), done);
        rx.await.unwrap();
        assert_eq!(metrics.requests_completed(), 1);
    }

    #[tokio::test]
    #[timeout(10000)]
    async fn test_completion_is_never_synchronous() {
        let fired = Arc::new(AtomicUsize::new(0));
        let done = {
            let fired = fired.clone();
            OnceClosure::closure(move || {
                fired.fetch_add(1, Ordering::SeqCst);
            })
        };
        let handle = helper(
            DeletionRequest::new(RemoveDataMask::SHARED_STORAGE, QuotaStorageMask::empty()),
            SubsystemRegistry::new(),
        )
        .start(&Handle::current(), done);
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        handle.await.unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    #[timeout(10000)]
    async fn test_waits_for_every_category() {
        let gate = Gate::new();
        let cookies = Arc::new(FakeCookieManager::new().with_gate(gate.clone()));
        let dom_storage = Arc::new(FakeDomStorage::new());
        let registry = SubsystemRegistry {
            cookie_manager: Some(cookies.clone()),
            dom_storage: Some(dom_storage.clone()),
            ..SubsystemRegistry::new()
        };

        let (done, mut rx) = completion();
        helper(
            DeletionRequest::new(
                RemoveDataMask::COOKIES | RemoveDataMask::LOCAL_STORAGE,
                QuotaStorageMask::empty(),
            ),
            registry,
        )
        .start(&Handle::current(), done);

        dom_storage.wait_for_calls(2).await;
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(rx.try_recv().is_err());

        gate.open();
        rx.await.unwrap();
        assert_eq!(cookies.delete_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_tasks_are_recorded_once() {
        let gate = Gate::new();
        let shared = Arc::new(FakeSharedStorageManager::new().with_gate(gate.clone()));
        let registry = SubsystemRegistry {
            shared_storage_manager: Some(shared.clone()),
            ..SubsystemRegistry::new()
        };
        let helper = helper(
            DeletionRequest::new(RemoveDataMask::SHARED_STORAGE, QuotaStorageMask::empty()),
            registry,
        );
        let metrics = helper.metrics.clone();

        let (done, rx) = completion();
        helper.start(&Handle::current(), done);

        tokio::time::sleep(Duration::from_secs(181)).await;
        assert_eq!(metrics.slow_tasks(DeletionTask::SharedStorage), 1);
        assert_eq!(metrics.slow_tasks(DeletionTask::Synchronous), 0);

        tokio::time::sleep(Duration::from_secs(400)).await;
        assert_eq!(metrics.slow_tasks(DeletionTask::SharedStorage), 1);

        gate.open();
        rx.await.unwrap();
        assert_eq!(shared.purge_calls(), 1);
    }
}
