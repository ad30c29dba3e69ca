// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-process dispatcher: one bounded queue, one worker task.
//!
//! Producers never block: a dispatch either lands in the queue immediately or
//! fails with [`FeatureError::QueueFull`]. The single worker drains jobs in
//! FIFO order across all clusters and features, so operator calls never run
//! concurrently.
//!
//! The worker is fail-fast. The first failed job marks its feature `ERROR`
//! and then the worker exits for good; every later dispatch fails with
//! [`FeatureError::DispatcherStopped`]. Use [`LocalDispatcher::is_running`]
//! to detect this state.
//!
//! [`LocalDispatcher::shutdown`] lets the in-flight job finish and drops
//! whatever is still queued.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::{Mutex, watch};
use tracing::{debug, error, info, warn};

use super::FeatureOperationDispatcher;
use crate::error::{FeatureError, Result};
use crate::registry::FeatureOperatorRegistry;
use crate::repository::FeatureRepository;
use crate::types::{ClusterId, FeatureSpec, FeatureStatus, Job, Operation};

/// Local dispatcher configuration.
#[derive(Debug, Clone)]
pub struct LocalDispatcherConfig {
    /// Maximum number of queued jobs. `0` allows a single hand-off slot.
    pub queue_capacity: usize,
}

impl Default for LocalDispatcherConfig {
    fn default() -> Self {
        Self { queue_capacity: 32 }
    }
}

type JobKey = (ClusterId, String);

/// Number of queued (not yet dequeued) jobs per (cluster, feature).
type QueuedJobs = Arc<Mutex<HashMap<JobKey, usize>>>;

/// Dispatcher backed by a bounded in-process queue.
pub struct LocalDispatcher {
    sender: mpsc::Sender<Job>,
    queued: QueuedJobs,
    /// The worker holds the only receiver; closed once it has exited.
    shutdown: watch::Sender<bool>,
}

impl LocalDispatcher {
    /// Create the dispatcher and spawn its worker task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(
        config: LocalDispatcherConfig,
        operators: Arc<FeatureOperatorRegistry>,
        repository: Arc<dyn FeatureRepository>,
    ) -> Self {
        // tokio's bounded channel needs at least one slot
        let (sender, receiver) = mpsc::channel(config.queue_capacity.max(1));
        let queued: QueuedJobs = Arc::default();
        let (shutdown, shutdown_rx) = watch::channel(false);

        let worker = LocalWorker {
            receiver,
            shutdown: shutdown_rx,
            operators,
            repository,
            queued: queued.clone(),
        };
        tokio::spawn(worker.run());

        info!(
            queue_capacity = config.queue_capacity,
            "Local feature operation dispatcher started"
        );

        Self {
            sender,
            queued,
            shutdown,
        }
    }

    /// Whether the worker task is still consuming jobs.
    pub fn is_running(&self) -> bool {
        !self.shutdown.is_closed()
    }

    /// Stop the worker and wait for it to exit.
    ///
    /// The job being processed runs to completion; queued jobs are dropped
    /// and later dispatches fail with [`FeatureError::DispatcherStopped`].
    pub async fn shutdown(&self) {
        self.shutdown.send_replace(true);
        self.shutdown.closed().await;
        info!("Local feature operation dispatcher shut down");
    }

    async fn enqueue(&self, job: Job) -> Result<()> {
        let key = (job.cluster_id, job.feature_name.clone());
        let operation = job.operation;

        // Count before sending so the worker never decrements first.
        *self.queued.lock().await.entry(key.clone()).or_default() += 1;

        match self.sender.try_send(job) {
            Ok(()) => {
                debug!(
                    cluster_id = key.0,
                    feature = %key.1,
                    operation = %operation,
                    "Feature operation queued"
                );
                Ok(())
            }
            Err(err) => {
                forget_queued(&self.queued, &key).await;
                match err {
                    TrySendError::Full(_) => {
                        warn!(
                            cluster_id = key.0,
                            feature = %key.1,
                            operation = %operation,
                            "Feature operation queue is full"
                        );
                        Err(FeatureError::QueueFull)
                    }
                    TrySendError::Closed(_) => Err(FeatureError::DispatcherStopped),
                }
            }
        }
    }
}

#[async_trait]
impl FeatureOperationDispatcher for LocalDispatcher {
    async fn dispatch_apply(
        &self,
        cluster_id: ClusterId,
        feature_name: &str,
        spec: &FeatureSpec,
    ) -> Result<()> {
        self.enqueue(Job {
            operation: Operation::Apply,
            cluster_id,
            feature_name: feature_name.to_string(),
            spec: spec.clone(),
        })
        .await
    }

    async fn dispatch_deactivate(
        &self,
        cluster_id: ClusterId,
        feature_name: &str,
        spec: &FeatureSpec,
    ) -> Result<()> {
        self.enqueue(Job {
            operation: Operation::Deactivate,
            cluster_id,
            feature_name: feature_name.to_string(),
            spec: spec.clone(),
        })
        .await
    }
}

/// Decrement the queued count for a key, returning what remains.
async fn forget_queued(queued: &QueuedJobs, key: &JobKey) -> usize {
    let mut queued = queued.lock().await;
    match queued.get_mut(key) {
        Some(count) if *count > 1 => {
            *count -= 1;
            *count
        }
        _ => {
            queued.remove(key);
            0
        }
    }
}

/// The single consumer of the job queue.
struct LocalWorker {
    receiver: mpsc::Receiver<Job>,
    shutdown: watch::Receiver<bool>,
    operators: Arc<FeatureOperatorRegistry>,
    repository: Arc<dyn FeatureRepository>,
    queued: QueuedJobs,
}

impl LocalWorker {
    async fn run(mut self) {
        info!("Local feature operation worker started");

        loop {
            let job = tokio::select! {
                biased;
                _ = self.shutdown.changed() => break,
                job = self.receiver.recv() => match job {
                    Some(job) => job,
                    None => break,
                },
            };

            let key = (job.cluster_id, job.feature_name.clone());
            forget_queued(&self.queued, &key).await;

            info!(
                cluster_id = job.cluster_id,
                feature = %job.feature_name,
                operation = %job.operation,
                "Processing feature operation"
            );

            if let Err(e) = self.process_job(&job).await {
                error!(
                    cluster_id = job.cluster_id,
                    feature = %job.feature_name,
                    operation = %job.operation,
                    error = %e,
                    "Feature operation failed"
                );
                self.mark_failed(&job).await;
                error!("Local feature operation worker stopped after job failure");
                return;
            }

            // A later job for the same feature finalizes the record instead.
            let still_queued = self.queued.lock().await.get(&key).copied().unwrap_or(0);
            if still_queued > 0 {
                debug!(
                    cluster_id = job.cluster_id,
                    feature = %job.feature_name,
                    queued = still_queued,
                    "Newer operation queued, skipping finalize"
                );
                continue;
            }

            if let Err(e) = self.finalize(&job).await {
                error!(
                    cluster_id = job.cluster_id,
                    feature = %job.feature_name,
                    error = %e,
                    "Failed to record feature operation result"
                );
            }
        }

        info!("Local feature operation worker stopped");
    }

    async fn process_job(&self, job: &Job) -> Result<()> {
        let operator = self.operators.get_feature_operator(&job.feature_name)?;
        match job.operation {
            Operation::Apply => operator.apply(job.cluster_id, &job.spec).await,
            Operation::Deactivate => operator.deactivate(job.cluster_id, &job.spec).await,
        }
    }

    async fn finalize(&self, job: &Job) -> Result<()> {
        match job.operation {
            Operation::Apply => {
                match self
                    .repository
                    .update_feature_status(job.cluster_id, &job.feature_name, FeatureStatus::Active)
                    .await
                {
                    Err(FeatureError::FeatureNotFound { .. }) => {
                        warn!(
                            cluster_id = job.cluster_id,
                            feature = %job.feature_name,
                            "Applied feature has no persisted record"
                        );
                        Ok(())
                    }
                    other => other,
                }?;
                info!(
                    cluster_id = job.cluster_id,
                    feature = %job.feature_name,
                    "Feature is active"
                );
            }
            Operation::Deactivate => {
                self.repository
                    .delete_feature(job.cluster_id, &job.feature_name)
                    .await?;
                info!(
                    cluster_id = job.cluster_id,
                    feature = %job.feature_name,
                    "Feature deactivated"
                );
            }
        }
        Ok(())
    }

    async fn mark_failed(&self, job: &Job) {
        if let Err(e) = self
            .repository
            .update_feature_status(job.cluster_id, &job.feature_name, FeatureStatus::Error)
            .await
        {
            warn!(
                cluster_id = job.cluster_id,
                feature = %job.feature_name,
                error = %e,
                "Failed to mark feature as failed"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = LocalDispatcherConfig::default();
        assert_eq!(config.queue_capacity, 32);
    }

    #[tokio::test]
    async fn test_forget_queued_counts_down() {
        let queued: QueuedJobs = Arc::default();
        let key = (1, "dns".to_string());
        queued.lock().await.insert(key.clone(), 2);

        assert_eq!(forget_queued(&queued, &key).await, 1);
        assert_eq!(forget_queued(&queued, &key).await, 0);
        assert_eq!(forget_queued(&queued, &key).await, 0);
        assert!(queued.lock().await.is_empty());
    }
}
