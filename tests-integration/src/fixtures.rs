//! Partition fixtures backed by the in-memory subsystem fakes.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::Result;
use clearing::testing::{
    FakeAggregationService, FakeAttributionManager, FakeBehavior, FakeCookieManager,
    FakeDomStorage, FakeFileSystemContext, FakeInterestGroupManager, FakeQuotaManager,
    FakeShaderCache, FakeSharedStorageManager, FakeSubsystems, Gate,
};
use clearing::{RemoveDataMask, StoragePartition};
use common::PartitionConfig;
use common::testing::TestConfigBuilder;
use tokio::sync::Notify;

/// A partition wired to one set of fakes.
pub struct PartitionTestContext {
    pub fakes: FakeSubsystems,
    pub partition: StoragePartition,
}

impl PartitionTestContext {
    /// Fakes that reply immediately.
    pub fn new() -> Result<Self> {
        Self::with_behavior(FakeBehavior::default())
    }

    pub fn with_behavior(behavior: FakeBehavior) -> Result<Self> {
        Self::with_fakes(
            TestConfigBuilder::new().build_partition(),
            FakeSubsystems::with_behavior(behavior),
        )
    }

    pub fn with_config(config: PartitionConfig) -> Result<Self> {
        Self::with_fakes(config, FakeSubsystems::new())
    }

    pub fn with_fakes(config: PartitionConfig, fakes: FakeSubsystems) -> Result<Self> {
        let partition = StoragePartition::builder(config)
            .with_subsystems(fakes.registry())
            .build()?;
        Ok(Self { fakes, partition })
    }
}

/// One gate per subsystem so tests can release categories one at a time.
pub struct GatedSubsystems {
    pub fakes: FakeSubsystems,
    /// Gates in category order: cookies, quota, DOM storage, shader cache,
    /// attribution, aggregation, shared storage, interest groups, file system.
    pub gates: Vec<Gate>,
}

impl GatedSubsystems {
    pub fn new() -> Self {
        let gates: Vec<Gate> = (0..9).map(|_| Gate::new()).collect();
        let fakes = FakeSubsystems {
            cookies: Arc::new(FakeCookieManager::new().with_gate(gates[0].clone())),
            quota: Arc::new(FakeQuotaManager::new().with_gate(gates[1].clone())),
            dom_storage: Arc::new(FakeDomStorage::new().with_gate(gates[2].clone())),
            shader_cache: Arc::new(FakeShaderCache::new().with_gate(gates[3].clone())),
            attribution: Arc::new(FakeAttributionManager::new().with_gate(gates[4].clone())),
            aggregation: Arc::new(FakeAggregationService::new().with_gate(gates[5].clone())),
            shared_storage: Arc::new(FakeSharedStorageManager::new().with_gate(gates[6].clone())),
            interest_groups: Arc::new(
                FakeInterestGroupManager::new().with_gate(gates[7].clone()),
            ),
            filesystem: Arc::new(
                FakeFileSystemContext::new("test-partition").with_gate(gates[8].clone()),
            ),
            code_caches: Vec::new(),
        };
        Self { fakes, gates }
    }

    /// Mask engaging every gated subsystem exactly once per gate.
    pub fn mask() -> RemoveDataMask {
        RemoveDataMask::COOKIES
            | RemoveDataMask::INDEXEDDB
            | RemoveDataMask::LOCAL_STORAGE
            | RemoveDataMask::SHADER_CACHE
            | RemoveDataMask::ATTRIBUTION_REPORTING
            | RemoveDataMask::AGGREGATION_SERVICE
            | RemoveDataMask::SHARED_STORAGE
            | RemoveDataMask::INTEREST_GROUPS
            | RemoveDataMask::PLUGIN_PRIVATE
    }
}

impl Default for GatedSubsystems {
    fn default() -> Self {
        Self::new()
    }
}

/// Removal categories that each map to a distinct deletion task, with
/// `INDEXEDDB` standing in for every quota-managed bit.
pub const CATEGORY_GROUPS: [RemoveDataMask; 10] = [
    RemoveDataMask::COOKIES,
    RemoveDataMask::INTEREST_GROUPS,
    RemoveDataMask::INTEREST_GROUP_PERMISSIONS_CACHE,
    RemoveDataMask::INDEXEDDB,
    RemoveDataMask::LOCAL_STORAGE,
    RemoveDataMask::SHADER_CACHE,
    RemoveDataMask::ATTRIBUTION_REPORTING,
    RemoveDataMask::AGGREGATION_SERVICE,
    RemoveDataMask::PLUGIN_PRIVATE,
    RemoveDataMask::SHARED_STORAGE,
];

/// Mask built from the groups selected by the bits of `subset`.
pub fn mask_for_subset(subset: u32) -> RemoveDataMask {
    CATEGORY_GROUPS
        .iter()
        .enumerate()
        .filter(|(i, _)| subset & (1 << i) != 0)
        .fold(RemoveDataMask::empty(), |mask, (_, group)| mask | *group)
}

/// Tasks a request with `mask` and no explicit key dispatches.
pub fn expected_task_count(mask: RemoveDataMask) -> usize {
    let groups = CATEGORY_GROUPS
        .iter()
        .filter(|group| mask.contains(**group))
        .count();
    // Local storage without an explicit key also clears session storage.
    if mask.contains(RemoveDataMask::LOCAL_STORAGE) {
        groups + 1
    } else {
        groups
    }
}

#[derive(Default)]
struct ProbeState {
    calls: AtomicUsize,
    notify: Notify,
}

/// Completion callback recorder.
#[derive(Clone, Default)]
pub struct CompletionProbe {
    state: Arc<ProbeState>,
}

impl CompletionProbe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn callback(&self) -> impl FnOnce() + Send + 'static {
        let state = self.state.clone();
        move || {
            state.calls.fetch_add(1, Ordering::SeqCst);
            state.notify.notify_waiters();
        }
    }

    pub fn count(&self) -> usize {
        self.state.calls.load(Ordering::SeqCst)
    }

    pub fn is_done(&self) -> bool {
        self.count() > 0
    }

    /// Resolve once the callback has run.
    pub async fn wait(&self) {
        loop {
            let notified = self.state.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_done() {
                return;
            }
            notified.await;
        }
    }
}
