// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Job workers.
//!
//! Each worker repeatedly leases an eligible workflow from the [`JobStore`]
//! and runs it, renewing the lease while the job executes. Idle workers sleep
//! until the poll interval elapses or the dispatcher wakes them.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, interval_at};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::activities::FeatureActivities;
use super::store::JobStore;
use super::workflow::{JobWorkflow, WorkflowOutcome};
use crate::error::Result;

/// Job worker pool configuration.
#[derive(Debug, Clone)]
pub struct JobWorkerConfig {
    /// Number of concurrent workers.
    pub workers: usize,
    /// How often idle workers poll for eligible workflows (fired retry timers).
    pub poll_interval: Duration,
    /// How long a lease lasts without renewal.
    pub lease_duration: Duration,
}

impl Default for JobWorkerConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            poll_interval: Duration::from_secs(1),
            lease_duration: Duration::from_secs(60),
        }
    }
}

/// A single worker identity.
pub struct JobWorker {
    id: String,
    store: Arc<dyn JobStore>,
    activities: FeatureActivities,
    lease_duration: Duration,
}

impl JobWorker {
    /// Create a worker with a fresh lease owner id.
    pub fn new(
        store: Arc<dyn JobStore>,
        activities: FeatureActivities,
        lease_duration: Duration,
    ) -> Self {
        Self {
            id: format!("worker-{}", Uuid::new_v4()),
            store,
            activities,
            lease_duration,
        }
    }

    /// Lease owner id of this worker.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Lease and run one eligible workflow.
    ///
    /// Returns `Ok(None)` when nothing is eligible.
    pub async fn run_once(&self) -> Result<Option<WorkflowOutcome>> {
        let Some(record) = self
            .store
            .acquire_next(&self.id, self.lease_duration)
            .await?
        else {
            return Ok(None);
        };

        let workflow_id = record.workflow_id.clone();
        debug!(worker_id = %self.id, workflow_id = %workflow_id, "Workflow leased");

        let run = JobWorkflow::new(self.store.as_ref(), &self.activities, &self.id, record).run();
        tokio::pin!(run);

        let period = (self.lease_duration / 3).max(Duration::from_millis(10));
        let mut renew = interval_at(Instant::now() + period, period);

        let result = loop {
            tokio::select! {
                result = &mut run => break result,
                _ = renew.tick() => {
                    match self.store.renew_lease(&workflow_id, &self.id, self.lease_duration).await {
                        Ok(true) => {}
                        Ok(false) => warn!(
                            worker_id = %self.id,
                            workflow_id = %workflow_id,
                            "Workflow lease lost while job was running"
                        ),
                        Err(e) => warn!(
                            worker_id = %self.id,
                            workflow_id = %workflow_id,
                            error = %e,
                            "Failed to renew workflow lease"
                        ),
                    }
                }
            }
        };

        match result {
            Ok(outcome) => Ok(Some(outcome)),
            Err(e) => {
                if let Err(release_err) = self.store.release_lease(&workflow_id, &self.id).await {
                    warn!(
                        workflow_id = %workflow_id,
                        error = %release_err,
                        "Failed to release workflow lease"
                    );
                }
                Err(e)
            }
        }
    }
}

/// Pool of job workers sharing one store.
pub struct JobWorkerPool {
    store: Arc<dyn JobStore>,
    activities: FeatureActivities,
    config: JobWorkerConfig,
    wake: Arc<Notify>,
}

impl JobWorkerPool {
    /// Create a pool. `wake` is notified by the dispatcher on every signal.
    pub fn new(
        store: Arc<dyn JobStore>,
        activities: FeatureActivities,
        config: JobWorkerConfig,
        wake: Arc<Notify>,
    ) -> Self {
        Self {
            store,
            activities,
            config,
            wake,
        }
    }

    /// Spawn the workers onto the current tokio runtime.
    pub fn spawn(self) -> JobWorkerPoolHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let workers = self.config.workers.max(1);

        info!(
            workers,
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            lease_secs = self.config.lease_duration.as_secs(),
            "Job worker pool started"
        );

        let tasks = (0..workers)
            .map(|_| {
                let worker = JobWorker::new(
                    self.store.clone(),
                    self.activities.clone(),
                    self.config.lease_duration,
                );
                tokio::spawn(worker_loop(
                    worker,
                    self.wake.clone(),
                    self.config.poll_interval,
                    shutdown_rx.clone(),
                ))
            })
            .collect();

        JobWorkerPoolHandle { shutdown_tx, tasks }
    }
}

async fn worker_loop(
    worker: JobWorker,
    wake: Arc<Notify>,
    poll_interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    debug!(worker_id = %worker.id(), "Job worker started");

    loop {
        if *shutdown.borrow() {
            break;
        }

        match worker.run_once().await {
            Ok(Some(outcome)) => {
                debug!(worker_id = %worker.id(), outcome = ?outcome, "Workflow slice finished");
                continue;
            }
            Ok(None) => {}
            Err(e) => {
                error!(worker_id = %worker.id(), error = %e, "Failed to run workflow");
            }
        }

        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = wake.notified() => {}
            _ = tokio::time::sleep(poll_interval) => {}
        }
    }

    debug!(worker_id = %worker.id(), "Job worker stopped");
}

/// Handle to a running worker pool.
pub struct JobWorkerPoolHandle {
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl JobWorkerPoolHandle {
    /// Whether any worker task is still running.
    pub fn is_running(&self) -> bool {
        self.tasks.iter().any(|task| !task.is_finished())
    }

    /// Stop all workers after their current workflow slice and wait for them.
    pub async fn shutdown(self) {
        info!("Shutting down job worker pool");
        let _ = self.shutdown_tx.send(true);

        for task in self.tasks {
            if let Err(e) = task.await {
                error!(error = %e, "Job worker task panicked");
            }
        }

        info!("Job worker pool stopped");
    }
}
