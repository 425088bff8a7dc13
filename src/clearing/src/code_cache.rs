//! Generated code cache clearing.

use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::barrier::BarrierClosure;
use crate::callback::OnceClosure;
use crate::metrics::ClearDataMetrics;
use crate::request::TimeRange;
use crate::subsystems::{CodeCache, UrlMatcher};

/// Clears every registered code cache and joins them through one barrier.
pub(crate) struct CodeCacheDataRemover {
    caches: Vec<Arc<dyn CodeCache>>,
    range: TimeRange,
    url_matcher: Option<UrlMatcher>,
    metrics: ClearDataMetrics,
}

impl CodeCacheDataRemover {
    pub(crate) fn new(
        caches: Vec<Arc<dyn CodeCache>>,
        range: TimeRange,
        url_matcher: Option<UrlMatcher>,
        metrics: ClearDataMetrics,
    ) -> Self {
        Self {
            caches,
            range,
            url_matcher,
            metrics,
        }
    }

    pub(crate) fn remove(self, runtime: &Handle, done: OnceClosure) -> JoinHandle<()> {
        runtime.spawn(self.run(done))
    }

    async fn run(self, done: OnceClosure) {
        let range = self.range;
        let barrier = BarrierClosure::new(self.caches.len(), move || {
            info!(range = %range, "Code caches cleared");
            done.done();
        });

        for cache in self.caches {
            let slot = {
                let barrier = barrier.clone();
                OnceClosure::run_on_drop(move || {
                    let _ = barrier.signal();
                })
            };
            let url_matcher = self.url_matcher.clone();
            let metrics = self.metrics.clone();
            tokio::spawn(async move {
                let kind = cache.kind();
                match cache.clear(range, url_matcher).await {
                    Ok(()) => debug!(kind = ?kind, "Cleared code cache"),
                    Err(e) => {
                        metrics.record_subsystem_failure();
                        warn!(kind = ?kind, error = %e, "Failed to clear code cache");
                    }
                }
                slot.done();
            });
        }
    }
}
