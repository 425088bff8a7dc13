//! Test doubles for the storage subsystems.
//!
//! Every fake records its calls and replies through a [`FakeBehavior`],
//! which can hold replies behind a [`Gate`] and add a random delay so tests
//! can control or shuffle completion order.

mod fakes;

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use rand::Rng;
use tokio::sync::{Notify, watch};

use crate::error::SubsystemError;
use crate::key::StorageKeyMatcher;
use crate::mask::RemoveDataMask;
use crate::observer::DataRemovalObserver;
use crate::request::TimeRange;
use crate::subsystems::{CodeCacheKind, SubsystemRegistry, SubsystemResult};

pub use fakes::{
    AttributionCall, DomStorageCall, FakeAggregationService, FakeAttributionManager,
    FakeCodeCache, FakeCookieManager, FakeDomStorage, FakeFileSystemContext,
    FakeInterestGroupManager, FakeQuotaManager, FakeShaderCache, FakeSharedStorageManager,
    InterestGroupCall, QuotaCall, SharedStoragePurge,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum GateState {
    Closed,
    Open,
    Disconnected,
}

/// Holds fake replies until opened. Clones share state.
#[derive(Clone, Debug)]
pub struct Gate {
    state: Arc<watch::Sender<GateState>>,
}

impl Default for Gate {
    fn default() -> Self {
        Self::new()
    }
}

impl Gate {
    /// A closed gate.
    pub fn new() -> Self {
        Self {
            state: Arc::new(watch::Sender::new(GateState::Closed)),
        }
    }

    /// Let every held and future reply through.
    pub fn open(&self) {
        self.state.send_replace(GateState::Open);
    }

    /// Fail every held and future reply as if the subsystem shut down.
    pub fn disconnect(&self) {
        self.state.send_replace(GateState::Disconnected);
    }

    pub fn is_open(&self) -> bool {
        *self.state.borrow() == GateState::Open
    }

    pub async fn pass(&self, subsystem: &'static str) -> SubsystemResult<()> {
        let mut rx = self.state.subscribe();
        let state = rx
            .wait_for(|state| *state != GateState::Closed)
            .await
            .map(|state| *state)
            .unwrap_or(GateState::Disconnected);
        match state {
            GateState::Open => Ok(()),
            GateState::Closed | GateState::Disconnected => {
                Err(SubsystemError::Disconnected { subsystem })
            }
        }
    }
}

/// How a fake delays its replies.
#[derive(Clone, Debug, Default)]
pub struct FakeBehavior {
    pub gate: Option<Gate>,
    pub max_delay: Option<Duration>,
}

impl FakeBehavior {
    pub fn gated(gate: Gate) -> Self {
        Self {
            gate: Some(gate),
            max_delay: None,
        }
    }

    pub fn random_delay(max_delay: Duration) -> Self {
        Self {
            gate: None,
            max_delay: Some(max_delay),
        }
    }

    pub(crate) async fn before_reply(&self, subsystem: &'static str) -> SubsystemResult<()> {
        if let Some(gate) = &self.gate {
            gate.pass(subsystem).await?;
        }
        if let Some(max_delay) = self.max_delay {
            let millis = max_delay.as_millis().max(1) as u64;
            let delay = rand::thread_rng().gen_range(0..=millis);
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        Ok(())
    }
}

/// Ordered call record that tests can wait on.
pub struct CallLog<T> {
    calls: Mutex<Vec<T>>,
    notify: Notify,
}

impl<T> Default for CallLog<T> {
    fn default() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            notify: Notify::new(),
        }
    }
}

impl<T: Clone> CallLog<T> {
    pub fn record(&self, call: T) {
        self.lock().push(call);
        self.notify.notify_waiters();
    }

    pub fn snapshot(&self) -> Vec<T> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Resolve once at least `count` calls were recorded.
    pub async fn wait_for(&self, count: usize) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.len() >= count {
                return;
            }
            notified.await;
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<T>> {
        match self.calls.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// One instance of every fake, wired into a registry.
#[derive(Clone)]
pub struct FakeSubsystems {
    pub cookies: Arc<FakeCookieManager>,
    pub quota: Arc<FakeQuotaManager>,
    pub dom_storage: Arc<FakeDomStorage>,
    pub shader_cache: Arc<FakeShaderCache>,
    pub attribution: Arc<FakeAttributionManager>,
    pub aggregation: Arc<FakeAggregationService>,
    pub shared_storage: Arc<FakeSharedStorageManager>,
    pub interest_groups: Arc<FakeInterestGroupManager>,
    pub filesystem: Arc<FakeFileSystemContext>,
    pub code_caches: Vec<Arc<FakeCodeCache>>,
}

impl Default for FakeSubsystems {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeSubsystems {
    pub fn new() -> Self {
        Self::with_behavior(FakeBehavior::default())
    }

    /// Every fake shares `behavior`.
    pub fn with_behavior(behavior: FakeBehavior) -> Self {
        Self {
            cookies: Arc::new(FakeCookieManager::new().with_behavior(behavior.clone())),
            quota: Arc::new(FakeQuotaManager::new().with_behavior(behavior.clone())),
            dom_storage: Arc::new(FakeDomStorage::new().with_behavior(behavior.clone())),
            shader_cache: Arc::new(FakeShaderCache::new().with_behavior(behavior.clone())),
            attribution: Arc::new(FakeAttributionManager::new().with_behavior(behavior.clone())),
            aggregation: Arc::new(FakeAggregationService::new().with_behavior(behavior.clone())),
            shared_storage: Arc::new(
                FakeSharedStorageManager::new().with_behavior(behavior.clone()),
            ),
            interest_groups: Arc::new(
                FakeInterestGroupManager::new().with_behavior(behavior.clone()),
            ),
            filesystem: Arc::new(
                FakeFileSystemContext::new("partition").with_behavior(behavior.clone()),
            ),
            code_caches: [
                CodeCacheKind::JavaScript,
                CodeCacheKind::WebAssembly,
                CodeCacheKind::WebUi,
            ]
            .into_iter()
            .map(|kind| Arc::new(FakeCodeCache::new(kind).with_behavior(behavior.clone())))
            .collect(),
        }
    }

    pub fn registry(&self) -> SubsystemRegistry {
        SubsystemRegistry {
            cookie_manager: Some(self.cookies.clone()),
            quota_manager: Some(self.quota.clone()),
            dom_storage: Some(self.dom_storage.clone()),
            shader_cache: Some(self.shader_cache.clone()),
            attribution_manager: Some(self.attribution.clone()),
            aggregation_service: Some(self.aggregation.clone()),
            shared_storage_manager: Some(self.shared_storage.clone()),
            interest_group_manager: Some(self.interest_groups.clone()),
            filesystem_context: Some(self.filesystem.clone()),
            code_caches: self
                .code_caches
                .iter()
                .map(|cache| cache.clone() as Arc<dyn crate::subsystems::CodeCache>)
                .collect(),
        }
    }
}

/// One observer notification.
#[derive(Clone)]
pub struct ObservedClear {
    pub remove_mask: RemoveDataMask,
    pub matcher: Option<StorageKeyMatcher>,
    pub range: TimeRange,
}

/// Observer that records every notification.
#[derive(Default)]
pub struct RecordingObserver {
    pub notifications: CallLog<ObservedClear>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DataRemovalObserver for RecordingObserver {
    fn on_storage_key_data_cleared(
        &self,
        remove_mask: RemoveDataMask,
        matcher: Option<StorageKeyMatcher>,
        range: TimeRange,
    ) {
        self.notifications.record(ObservedClear {
            remove_mask,
            matcher,
            range,
        });
    }
}
