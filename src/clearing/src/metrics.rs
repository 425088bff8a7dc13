//! Clearing Metrics
//!
//! Thread-safe counters for monitoring data clearing operations.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::orchestrator::DeletionTask;

/// Thread-safe metrics for tracking clear operations
#[derive(Debug, Clone)]
pub struct ClearDataMetrics {
    inner: Arc<MetricsInner>,
}

#[derive(Debug)]
struct MetricsInner {
    /// Clear requests accepted by the router
    requests_started: AtomicUsize,
    /// Clear requests whose completion callback ran
    requests_completed: AtomicUsize,
    /// Category tasks dispatched, excluding the synchronous slot
    tasks_dispatched: AtomicUsize,
    /// Subsystem calls that reported an error
    subsystem_failures: AtomicUsize,
    /// Quota buckets deleted successfully
    buckets_deleted: AtomicUsize,
    /// Quota buckets whose deletion failed
    bucket_deletion_failures: AtomicUsize,
    /// Post-deletion cleanup passes issued
    storage_cleanups: AtomicUsize,
    /// Tasks still pending when the slow task timeout fired, by task
    slow_tasks: [AtomicUsize; DeletionTask::COUNT],
}

impl Default for ClearDataMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ClearDataMetrics {
    /// Create a new metrics tracker
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner {
                requests_started: AtomicUsize::new(0),
                requests_completed: AtomicUsize::new(0),
                tasks_dispatched: AtomicUsize::new(0),
                subsystem_failures: AtomicUsize::new(0),
                buckets_deleted: AtomicUsize::new(0),
                bucket_deletion_failures: AtomicUsize::new(0),
                storage_cleanups: AtomicUsize::new(0),
                slow_tasks: std::array::from_fn(|_| AtomicUsize::new(0)),
            }),
        }
    }

    /// Record a clear request accepted by the router
    pub fn record_request_started(&self) {
        self.inner.requests_started.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a completion callback that ran
    pub fn record_request_completed(&self) {
        self.inner.requests_completed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a category task dispatched
    pub fn record_task_dispatched(&self) {
        self.inner.tasks_dispatched.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a subsystem call that failed
    pub fn record_subsystem_failure(&self) {
        self.inner.subsystem_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a quota bucket deleted
    pub fn record_bucket_deleted(&self) {
        self.inner.buckets_deleted.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a failed quota bucket deletion
    pub fn record_bucket_deletion_failure(&self) {
        self.inner
            .bucket_deletion_failures
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Record a storage cleanup pass
    pub fn record_storage_cleanup(&self) {
        self.inner.storage_cleanups.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a task still pending when the slow task timeout fired
    pub fn record_slow_task(&self, task: DeletionTask) {
        self.inner.slow_tasks[task.index()].fetch_add(1, Ordering::Relaxed);
    }

    /// Get total requests started
    pub fn requests_started(&self) -> usize {
        self.inner.requests_started.load(Ordering::Relaxed)
    }

    /// Get total requests completed
    pub fn requests_completed(&self) -> usize {
        self.inner.requests_completed.load(Ordering::Relaxed)
    }

    /// Get total tasks dispatched
    pub fn tasks_dispatched(&self) -> usize {
        self.inner.tasks_dispatched.load(Ordering::Relaxed)
    }

    /// Get total subsystem failures
    pub fn subsystem_failures(&self) -> usize {
        self.inner.subsystem_failures.load(Ordering::Relaxed)
    }

    /// Get total buckets deleted
    pub fn buckets_deleted(&self) -> usize {
        self.inner.buckets_deleted.load(Ordering::Relaxed)
    }

    /// Get total bucket deletion failures
    pub fn bucket_deletion_failures(&self) -> usize {
        self.inner.bucket_deletion_failures.load(Ordering::Relaxed)
    }

    /// Get total storage cleanups
    pub fn storage_cleanups(&self) -> usize {
        self.inner.storage_cleanups.load(Ordering::Relaxed)
    }

    /// Get how often `task` was reported slow
    pub fn slow_tasks(&self, task: DeletionTask) -> usize {
        self.inner.slow_tasks[task.index()].load(Ordering::Relaxed)
    }

    /// Get a summary of all metrics
    pub fn summary(&self) -> ClearDataMetricsSummary {
        ClearDataMetricsSummary {
            requests_started: self.requests_started(),
            requests_completed: self.requests_completed(),
            tasks_dispatched: self.tasks_dispatched(),
            subsystem_failures: self.subsystem_failures(),
            buckets_deleted: self.buckets_deleted(),
            bucket_deletion_failures: self.bucket_deletion_failures(),
            storage_cleanups: self.storage_cleanups(),
            slow_tasks: DeletionTask::ALL
                .iter()
                .map(|task| (*task, self.slow_tasks(*task)))
                .filter(|(_, count)| *count > 0)
                .collect(),
        }
    }
}

/// Summary of clearing metrics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClearDataMetricsSummary {
    pub requests_started: usize,
    pub requests_completed: usize,
    pub tasks_dispatched: usize,
    pub subsystem_failures: usize,
    pub buckets_deleted: usize,
    pub bucket_deletion_failures: usize,
    pub storage_cleanups: usize,
    pub slow_tasks: Vec<(DeletionTask, usize)>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = ClearDataMetrics::new();
        assert_eq!(metrics.requests_started(), 0);
        assert_eq!(metrics.buckets_deleted(), 0);
        assert!(metrics.summary().slow_tasks.is_empty());
    }

    #[test]
    fn test_clones_share_counters() {
        let metrics = ClearDataMetrics::new();
        let clone = metrics.clone();

        metrics.record_request_started();
        clone.record_bucket_deleted();
        clone.record_bucket_deleted();
        metrics.record_slow_task(DeletionTask::Quota);

        assert_eq!(clone.requests_started(), 1);
        assert_eq!(metrics.buckets_deleted(), 2);
        assert_eq!(
            metrics.summary().slow_tasks,
            vec![(DeletionTask::Quota, 1)]
        );
    }
}
