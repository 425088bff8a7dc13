//! Join primitive: run a final callback once after N completions.
//!
//! A [`BarrierClosure`] reserves a fixed number of slots up front. Every
//! [`BarrierClosure::signal`] consumes one slot; the final callback runs on
//! the signal that consumes the last one. With zero slots the callback runs
//! before [`BarrierClosure::new`] returns.
//!
//! Signalling is lock-free on the counter and safe from any thread. The
//! final callback is guarded by a mutex that is only taken once.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tracing::error;

use crate::error::BarrierError;

type FinalCallback = Box<dyn FnOnce() + Send + 'static>;

struct BarrierInner {
    reserved: usize,
    remaining: AtomicUsize,
    final_callback: Mutex<Option<FinalCallback>>,
}

/// Repeatable signal handle. Clones share the same slots.
#[derive(Clone)]
pub struct BarrierClosure {
    inner: Arc<BarrierInner>,
}

impl BarrierClosure {
    pub fn new(count: usize, final_callback: impl FnOnce() + Send + 'static) -> Self {
        let inner = Arc::new(BarrierInner {
            reserved: count,
            remaining: AtomicUsize::new(count),
            final_callback: Mutex::new(None),
        });

        if count == 0 {
            final_callback();
        } else if let Ok(mut slot) = inner.final_callback.lock() {
            *slot = Some(Box::new(final_callback));
        }

        Self { inner }
    }

    /// Consume one reserved slot.
    ///
    /// Returns `Ok(true)` when this signal released the final callback.
    /// Signalling past the reserved count is a caller bug; it changes nothing
    /// and returns [`BarrierError::Overrun`].
    pub fn signal(&self) -> Result<bool, BarrierError> {
        let previous = self
            .inner
            .remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |remaining| {
                remaining.checked_sub(1)
            });

        match previous {
            Ok(1) => {
                let callback = match self.inner.final_callback.lock() {
                    Ok(mut slot) => slot.take(),
                    Err(poisoned) => poisoned.into_inner().take(),
                };
                if let Some(callback) = callback {
                    callback();
                }
                Ok(true)
            }
            Ok(_) => Ok(false),
            Err(_) => {
                error!(
                    reserved = self.inner.reserved,
                    "Barrier signalled more times than slots were reserved"
                );
                Err(BarrierError::Overrun {
                    reserved: self.inner.reserved,
                })
            }
        }
    }

    pub fn remaining(&self) -> usize {
        self.inner.remaining.load(Ordering::Acquire)
    }

    pub fn is_complete(&self) -> bool {
        self.remaining() == 0
    }
}

impl fmt::Debug for BarrierClosure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BarrierClosure")
            .field("reserved", &self.inner.reserved)
            .field("remaining", &self.remaining())
            .finish()
    }
}
