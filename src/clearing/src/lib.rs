//! Data clearing for a storage partition.
//!
//! A clear request names data categories, a time range and a scope (one
//! storage key or a policy matcher). [`StoragePartition`] validates it,
//! fans it out to every storage subsystem the categories touch, and runs
//! the caller's callback once all of them have finished, successfully or
//! not.
//!
//! ```rust,ignore
//! use clearing::{QuotaStorageMask, RemoveDataMask, StorageKey, StoragePartition, TimeRange};
//!
//! let partition = StoragePartition::builder(config)
//!     .with_subsystems(registry)
//!     .build()?;
//! partition.clear_data(
//!     RemoveDataMask::COOKIES | RemoveDataMask::LOCAL_STORAGE,
//!     QuotaStorageMask::ALL,
//!     &StorageKey::opaque(),
//!     TimeRange::all_time(),
//!     || println!("done"),
//! )?;
//! ```

pub mod barrier;
pub mod callback;
pub mod cookie;
pub mod error;
pub mod key;
pub mod mask;
pub mod metrics;
pub mod observer;
pub mod orchestrator;
pub mod partition;
pub mod request;
pub mod subsystems;

mod adapters;
mod code_cache;
mod quota;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use barrier::BarrierClosure;
pub use callback::{OnceCallback, OnceClosure};
pub use cookie::{CanonicalCookie, CookieDeletionFilter, SessionControl};
pub use error::{BarrierError, ClearDataError, RequestError, SubsystemError};
pub use key::{
    InMemoryStoragePolicy, SpecialStoragePolicy, StorageKey, StorageKeyMatcher,
    StorageKeyPolicyMatcher, generic_storage_key_matcher, unprotected_origins_matcher,
};
pub use mask::{
    QuotaClientType, QuotaClientTypes, QuotaStorageMask, RemoveDataMask, StorageType,
    quota_client_types,
};
pub use metrics::{ClearDataMetrics, ClearDataMetricsSummary};
pub use observer::DataRemovalObserver;
pub use orchestrator::DeletionTask;
pub use partition::{StoragePartition, StoragePartitionBuilder};
pub use request::{DeletionRequest, TimeRange};
pub use subsystems::SubsystemRegistry;
