// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Durable dispatcher.
//!
//! Every (cluster, feature) pair maps to one long-lived job workflow whose
//! state lives in SQLite. Dispatching is signal-with-start: the workflow is
//! started if it is not running and the job is appended to its signal queue,
//! atomically. A [`JobWorkerPool`] executes the workflows.
//!
//! Operations for the same pair are therefore serialized and, when several
//! arrive while a job runs, only the newest is executed next. Operations for
//! different pairs run in parallel. Jobs survive process restarts: an
//! interrupted job is picked up again once its lease expires.

mod activities;
mod signal;
mod store;
mod worker;
mod workflow;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tracing::{debug, error};

pub use self::activities::FeatureActivities;
pub use self::signal::{
    JobSignal, StartOptions, WORKFLOW_NAME, WorkflowIdReusePolicy, workflow_id,
};
pub use self::store::{
    JobStore, SignalWithStartOutcome, SqliteJobStore, WorkflowRecord, WorkflowState,
};
pub use self::worker::{JobWorker, JobWorkerConfig, JobWorkerPool, JobWorkerPoolHandle};
pub use self::workflow::{JobWorkflow, WorkflowOutcome};

use super::FeatureOperationDispatcher;
use crate::error::{FeatureError, Result};
use crate::types::{ClusterId, FeatureSpec, Operation};

/// Durable dispatcher configuration.
#[derive(Debug, Clone)]
pub struct DurableDispatcherConfig {
    /// Delay before a retryable failure is retried.
    pub retry_interval: Duration,
    /// Maximum lifetime of a workflow run.
    pub execution_timeout: Duration,
    /// Behaviour when a finished workflow id is signalled again.
    pub id_reuse_policy: WorkflowIdReusePolicy,
}

impl Default for DurableDispatcherConfig {
    fn default() -> Self {
        Self {
            retry_interval: Duration::from_secs(60),
            execution_timeout: Duration::from_secs(24 * 60 * 60),
            id_reuse_policy: WorkflowIdReusePolicy::AllowDuplicate,
        }
    }
}

/// Dispatcher that hands jobs to durable workflows.
pub struct DurableDispatcher {
    store: Arc<dyn JobStore>,
    config: DurableDispatcherConfig,
    wake: Arc<Notify>,
}

impl DurableDispatcher {
    /// Create a dispatcher over a job store.
    pub fn new(store: Arc<dyn JobStore>, config: DurableDispatcherConfig) -> Self {
        Self {
            store,
            config,
            wake: Arc::new(Notify::new()),
        }
    }

    /// Notified after every delivered signal; pass to [`JobWorkerPool::new`].
    pub fn wake_handle(&self) -> Arc<Notify> {
        self.wake.clone()
    }

    async fn signal(
        &self,
        operation: Operation,
        cluster_id: ClusterId,
        feature_name: &str,
        spec: &FeatureSpec,
    ) -> Result<()> {
        let workflow_id = workflow_id(cluster_id, feature_name);
        let signal = JobSignal {
            operation,
            spec: spec.clone(),
            retry_interval: self.config.retry_interval,
        };
        let options = StartOptions {
            execution_timeout: self.config.execution_timeout,
            id_reuse_policy: self.config.id_reuse_policy,
        };

        let outcome = self
            .store
            .signal_with_start(&workflow_id, cluster_id, feature_name, &signal, &options)
            .await
            .map_err(|e| match e {
                FeatureError::WorkflowIdReused { .. } => e,
                other => {
                    error!(workflow_id = %workflow_id, error = %other, "Signal-with-start failed");
                    FeatureError::DispatchFailed(other.to_string())
                }
            })?;

        debug!(
            workflow_id = %workflow_id,
            run_id = %outcome.run_id,
            started = outcome.started,
            operation = %operation,
            "Feature operation signalled"
        );

        self.wake.notify_one();
        Ok(())
    }
}

#[async_trait]
impl FeatureOperationDispatcher for DurableDispatcher {
    async fn dispatch_apply(
        &self,
        cluster_id: ClusterId,
        feature_name: &str,
        spec: &FeatureSpec,
    ) -> Result<()> {
        self.signal(Operation::Apply, cluster_id, feature_name, spec)
            .await
    }

    async fn dispatch_deactivate(
        &self,
        cluster_id: ClusterId,
        feature_name: &str,
        spec: &FeatureSpec,
    ) -> Result<()> {
        self.signal(Operation::Deactivate, cluster_id, feature_name, spec)
            .await
    }
}
