//! Data removal observers.

use std::sync::{Arc, Mutex, Weak};

use crate::key::StorageKeyMatcher;
use crate::mask::RemoveDataMask;
use crate::request::TimeRange;

/// Listener told about every clear request before any deletion starts.
pub trait DataRemovalObserver: Send + Sync {
    /// `matcher` is `None` when the request is not scoped to any key.
    fn on_storage_key_data_cleared(
        &self,
        remove_mask: RemoveDataMask,
        matcher: Option<StorageKeyMatcher>,
        range: TimeRange,
    );
}

/// Weakly held observer registry. Dropped observers are pruned lazily.
#[derive(Default)]
pub(crate) struct ObserverList {
    observers: Mutex<Vec<Weak<dyn DataRemovalObserver>>>,
}

impl ObserverList {
    pub(crate) fn add(&self, observer: &Arc<dyn DataRemovalObserver>) {
        let mut observers = self.lock();
        let weak = Arc::downgrade(observer);
        if !observers.iter().any(|o| o.ptr_eq(&weak)) {
            observers.push(weak);
        }
    }

    pub(crate) fn remove(&self, observer: &Arc<dyn DataRemovalObserver>) {
        let weak = Arc::downgrade(observer);
        self.lock().retain(|o| !o.ptr_eq(&weak));
    }

    /// Live observers, in registration order.
    pub(crate) fn snapshot(&self) -> Vec<Arc<dyn DataRemovalObserver>> {
        let mut observers = self.lock();
        observers.retain(|o| o.strong_count() > 0);
        observers.iter().filter_map(Weak::upgrade).collect()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.snapshot().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Weak<dyn DataRemovalObserver>>> {
        match self.observers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
