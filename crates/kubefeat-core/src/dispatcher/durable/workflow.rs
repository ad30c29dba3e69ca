// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The job workflow: one run slice executed under a lease.
//!
//! A slice starts by checking for a newer signal. If one is pending it
//! replaces whatever job the workflow was holding (drain-to-latest), otherwise
//! the stored job resumes. The job then loops:
//!
//! - success: if another signal arrived meanwhile, adopt it and loop;
//!   otherwise finalize the feature record and complete the run (a signal
//!   that lands before completion commits is adopted instead);
//! - retryable failure: if a signal arrived meanwhile, adopt it and loop;
//!   otherwise arm the retry timer and suspend (the lease is released);
//! - any other failure: mark the feature `ERROR` and fail the run.
//!
//! Every adopted job sets the feature `PENDING` first.

use tracing::{debug, error, info, warn};

use super::activities::FeatureActivities;
use super::signal::JobSignal;
use super::store::{JobStore, WorkflowRecord, now_millis};
use crate::error::Result;
use crate::types::FeatureStatus;

/// How a workflow slice ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkflowOutcome {
    /// The last job finalized and the run completed.
    Completed,
    /// The run failed and the feature is marked `ERROR`.
    Failed(String),
    /// A retryable failure armed the retry timer.
    Suspended {
        /// When the job re-runs, in unix milliseconds.
        retry_at: i64,
    },
    /// There was nothing to execute; the lease was released.
    Idle,
}

/// Executes a leased workflow.
pub struct JobWorkflow<'a> {
    store: &'a dyn JobStore,
    activities: &'a FeatureActivities,
    owner: &'a str,
    record: WorkflowRecord,
}

impl<'a> JobWorkflow<'a> {
    /// Bind a leased workflow record to the worker that holds its lease.
    pub fn new(
        store: &'a dyn JobStore,
        activities: &'a FeatureActivities,
        owner: &'a str,
        record: WorkflowRecord,
    ) -> Self {
        Self {
            store,
            activities,
            owner,
            record,
        }
    }

    /// Run until the workflow completes, fails or suspends.
    pub async fn run(self) -> Result<WorkflowOutcome> {
        let workflow_id = self.record.workflow_id.as_str();

        if self.record.deadline_at <= now_millis() {
            return self.fail("workflow execution timed out").await;
        }

        let mut job = match self.next_signal().await? {
            Some(job) => job,
            None => match self.record.current_job.clone() {
                Some(job) => {
                    debug!(workflow_id = %workflow_id, "Resuming stored job");
                    job
                }
                None => {
                    self.store.release_lease(workflow_id, self.owner).await?;
                    return Ok(WorkflowOutcome::Idle);
                }
            },
        };

        'jobs: loop {
            info!(
                workflow_id = %workflow_id,
                cluster_id = self.record.cluster_id,
                feature = %self.record.feature_name,
                operation = %job.operation,
                "Executing feature job"
            );

            match self
                .activities
                .execute(self.record.cluster_id, &self.record.feature_name, &job)
                .await
            {
                Ok(()) => {
                    if let Some(next) = self.next_signal().await? {
                        debug!(workflow_id = %workflow_id, "Newer signal arrived, skipping finalize");
                        job = next;
                        continue;
                    }

                    self.activities
                        .finalize(
                            self.record.cluster_id,
                            &self.record.feature_name,
                            job.operation,
                        )
                        .await?;

                    while !self.store.complete(workflow_id, self.owner).await? {
                        if let Some(next) = self.next_signal().await? {
                            debug!(workflow_id = %workflow_id, "Signal arrived during finalize");
                            job = next;
                            continue 'jobs;
                        }
                    }

                    info!(
                        workflow_id = %workflow_id,
                        operation = %job.operation,
                        "Feature job completed"
                    );
                    return Ok(WorkflowOutcome::Completed);
                }
                Err(e) if e.is_retryable() => {
                    if let Some(next) = self.next_signal().await? {
                        info!(
                            workflow_id = %workflow_id,
                            error = %e,
                            "Retryable failure preempted by newer signal"
                        );
                        job = next;
                        continue;
                    }

                    let delay = i64::try_from(job.retry_interval.as_millis()).unwrap_or(i64::MAX);
                    let retry_at = now_millis().saturating_add(delay);
                    self.store
                        .schedule_retry(workflow_id, self.owner, retry_at)
                        .await?;

                    warn!(
                        workflow_id = %workflow_id,
                        error = %e,
                        retry_in_ms = job.retry_interval.as_millis() as u64,
                        "Feature job failed, will retry"
                    );
                    return Ok(WorkflowOutcome::Suspended { retry_at });
                }
                Err(e) => {
                    error!(
                        workflow_id = %workflow_id,
                        operation = %job.operation,
                        error = %e,
                        "Feature job failed"
                    );
                    return self.fail(&e.to_string()).await;
                }
            }
        }
    }

    /// Adopt the newest pending signal, if any.
    async fn next_signal(&self) -> Result<Option<JobSignal>> {
        let Some(job) = self
            .store
            .take_latest_signal(&self.record.workflow_id, &self.record.run_id)
            .await?
        else {
            return Ok(None);
        };

        self.store
            .set_current_job(&self.record.workflow_id, self.owner, &job)
            .await?;
        self.activities
            .set_status(
                self.record.cluster_id,
                &self.record.feature_name,
                FeatureStatus::Pending,
            )
            .await?;

        Ok(Some(job))
    }

    async fn fail(&self, message: &str) -> Result<WorkflowOutcome> {
        self.activities
            .set_status(
                self.record.cluster_id,
                &self.record.feature_name,
                FeatureStatus::Error,
            )
            .await?;
        self.store
            .fail(&self.record.workflow_id, self.owner, message)
            .await?;
        Ok(WorkflowOutcome::Failed(message.to_string()))
    }
}
