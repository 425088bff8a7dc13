//! Nested fan-out over quota-managed storage.
//!
//! One helper serves the whole quota category of a request: it lists the
//! buckets modified in range for every requested storage type, deletes every
//! bucket that matches the request scope, optionally cleans up each storage
//! type afterwards, and completes once nothing is outstanding.
//!
//! All bookkeeping happens on the helper's own control task. Listings,
//! deletions and cleanups run as separate tasks and report back over a
//! channel.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::adapters::DeletionContext;
use crate::callback::{OnceCallback, OnceClosure};
use crate::mask::{QuotaClientTypes, StorageType, quota_client_types};
use crate::orchestrator::DeletionTask;
use crate::subsystems::{BucketLocator, QuotaManager};

#[derive(Debug)]
enum QuotaEvent {
    BucketsListed {
        storage_type: StorageType,
        buckets: Vec<BucketLocator>,
    },
    BucketDeleted {
        storage_type: StorageType,
    },
    CleanupDone {
        storage_type: StorageType,
    },
}

pub(crate) struct QuotaManagedDataDeletionHelper {
    ctx: Arc<DeletionContext>,
    quota_manager: Arc<dyn QuotaManager>,
    client_types: QuotaClientTypes,
    /// Outstanding units: one for dispatch plus one per storage type branch.
    task_count: usize,
    /// Bucket deletions still running, per storage type.
    deletions_remaining: HashMap<StorageType, usize>,
    events_tx: mpsc::UnboundedSender<QuotaEvent>,
}

impl QuotaManagedDataDeletionHelper {
    /// Run the quota category to completion, then release `done`.
    ///
    /// An absent quota manager completes immediately.
    pub(crate) async fn run(
        ctx: Arc<DeletionContext>,
        quota_manager: Option<Arc<dyn QuotaManager>>,
        done: OnceClosure,
    ) {
        let Some(quota_manager) = quota_manager else {
            debug!(
                request_id = %ctx.request_id,
                "No quota manager, nothing to clear"
            );
            return done.done();
        };

        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let mut helper = Self {
            client_types: quota_client_types(ctx.request.remove_mask),
            ctx,
            quota_manager,
            task_count: 0,
            deletions_remaining: HashMap::new(),
            events_tx,
        };

        helper.task_count += 1;
        for storage_type in helper.ctx.request.quota_storage_mask.storage_types() {
            helper.task_count += 1;
            helper.list_buckets(storage_type);
        }
        helper.decrement_task_count();

        while helper.task_count > 0 {
            let Some(event) = events_rx.recv().await else {
                break;
            };
            helper.handle_event(event);
        }

        info!(
            request_id = %helper.ctx.request_id,
            "Quota managed data cleared"
        );
        done.done();
    }

    fn list_buckets(&self, storage_type: StorageType) {
        let events_tx = self.events_tx.clone();
        let reply = OnceCallback::with_default_on_drop(
            move |buckets| {
                let _ = events_tx.send(QuotaEvent::BucketsListed {
                    storage_type,
                    buckets,
                });
            },
            Vec::new(),
        );

        let ctx = self.ctx.clone();
        let quota_manager = self.quota_manager.clone();
        tokio::spawn(async move {
            let buckets = match quota_manager
                .buckets_modified_between(storage_type, ctx.request.range)
                .await
            {
                Ok(buckets) => buckets,
                Err(e) => {
                    ctx.report_failure(DeletionTask::Quota, &e);
                    Vec::new()
                }
            };
            reply.run(buckets);
        });
    }

    fn handle_event(&mut self, event: QuotaEvent) {
        match event {
            QuotaEvent::BucketsListed {
                storage_type,
                buckets,
            } => self.on_buckets_listed(storage_type, buckets),
            QuotaEvent::BucketDeleted { storage_type } => {
                let remaining = match self.deletions_remaining.get_mut(&storage_type) {
                    Some(remaining) if *remaining > 0 => remaining,
                    _ => {
                        error!(
                            request_id = %self.ctx.request_id,
                            storage_type = %storage_type,
                            "Bucket deletion reported without one outstanding"
                        );
                        return;
                    }
                };
                *remaining -= 1;
                if *remaining == 0 {
                    self.finish_storage_type(storage_type);
                }
            }
            QuotaEvent::CleanupDone { storage_type } => {
                debug!(
                    request_id = %self.ctx.request_id,
                    storage_type = %storage_type,
                    "Quota storage cleanup finished"
                );
                self.decrement_task_count();
            }
        }
    }

    fn on_buckets_listed(&mut self, storage_type: StorageType, buckets: Vec<BucketLocator>) {
        if buckets.is_empty() {
            self.decrement_task_count();
            return;
        }

        let explicit_key = self.ctx.request.explicit_key().cloned();
        let matching: Vec<_> = buckets
            .into_iter()
            .filter(|bucket| {
                explicit_key
                    .as_ref()
                    .is_none_or(|key| bucket.storage_key == *key)
            })
            .filter(|bucket| self.ctx.matcher_allows(&bucket.storage_key))
            .collect();

        debug!(
            request_id = %self.ctx.request_id,
            storage_type = %storage_type,
            matching = matching.len(),
            "Listed quota buckets"
        );

        if matching.is_empty() {
            self.finish_storage_type(storage_type);
            return;
        }

        self.deletions_remaining
            .insert(storage_type, matching.len());
        for bucket in matching {
            self.delete_bucket(storage_type, bucket);
        }
    }

    fn delete_bucket(&self, storage_type: StorageType, bucket: BucketLocator) {
        let events_tx = self.events_tx.clone();
        let reply = OnceClosure::run_on_drop(move || {
            let _ = events_tx.send(QuotaEvent::BucketDeleted { storage_type });
        });

        let ctx = self.ctx.clone();
        let quota_manager = self.quota_manager.clone();
        let client_types = self.client_types.clone();
        tokio::spawn(async move {
            match quota_manager.delete_bucket_data(&bucket, &client_types).await {
                Ok(()) => ctx.metrics.record_bucket_deleted(),
                Err(e) => {
                    ctx.metrics.record_bucket_deletion_failure();
                    warn!(
                        request_id = %ctx.request_id,
                        bucket_id = bucket.id,
                        storage_key = %bucket.storage_key,
                        storage_type = %bucket.storage_type,
                        is_default = bucket.is_default,
                        error = %e,
                        "Failed to remove storage bucket"
                    );
                }
            }
            reply.done();
        });
    }

    /// Every deletion of `storage_type` is done; clean up if requested.
    fn finish_storage_type(&mut self, storage_type: StorageType) {
        self.deletions_remaining.remove(&storage_type);
        if !self.ctx.request.perform_storage_cleanup {
            self.decrement_task_count();
            return;
        }

        self.ctx.metrics.record_storage_cleanup();
        let events_tx = self.events_tx.clone();
        let reply = OnceClosure::run_on_drop(move || {
            let _ = events_tx.send(QuotaEvent::CleanupDone { storage_type });
        });

        let ctx = self.ctx.clone();
        let quota_manager = self.quota_manager.clone();
        let client_types = self.client_types.clone();
        tokio::spawn(async move {
            if let Err(e) = quota_manager
                .perform_storage_cleanup(storage_type, &client_types)
                .await
            {
                ctx.report_failure(DeletionTask::Quota, &e);
            }
            reply.done();
        });
    }

    fn decrement_task_count(&mut self) {
        match self.task_count.checked_sub(1) {
            Some(count) => self.task_count = count,
            None => error!(
                request_id = %self.ctx.request_id,
                "Quota task count decremented below zero"
            ),
        }
    }
}
