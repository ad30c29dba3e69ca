// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Durable job store.
//!
//! Workflows and their inbound signals live in two SQLite tables. A workflow
//! row carries the job it is currently running, the time its retry timer
//! fires and the lease of the worker executing it. Signals are appended in a
//! queue per run and consumed newest-wins.
//!
//! A workflow is *eligible* for a worker when it is running, its lease is free
//! or expired, and it either has an unconsumed signal or a current job whose
//! retry timer has fired (or that was interrupted mid-run).

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use tracing::debug;
use uuid::Uuid;

use super::signal::{JobSignal, StartOptions, WorkflowIdReusePolicy};
use crate::error::{FeatureError, Result};
use crate::types::ClusterId;

/// Lifecycle state of a workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowState {
    /// Accepting signals and executing jobs.
    Running,
    /// The last job finalized and no signal was pending.
    Completed,
    /// A job failed with a non-retryable error or the run timed out.
    Failed,
}

impl WorkflowState {
    /// Database representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    fn parse(value: &str) -> Result<Self> {
        match value {
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(FeatureError::Repository(format!(
                "unknown workflow state: {}",
                other
            ))),
        }
    }
}

/// Snapshot of a workflow row.
#[derive(Debug, Clone)]
pub struct WorkflowRecord {
    /// Deterministic workflow id.
    pub workflow_id: String,
    /// Id of the current run.
    pub run_id: String,
    /// Target cluster.
    pub cluster_id: ClusterId,
    /// Target feature.
    pub feature_name: String,
    /// Lifecycle state.
    pub state: WorkflowState,
    /// Job being executed or waiting for its retry timer.
    pub current_job: Option<JobSignal>,
    /// When the retry timer fires, in unix milliseconds.
    pub retry_at: Option<i64>,
    /// Worker currently holding the lease.
    pub lease_owner: Option<String>,
    /// Execution deadline of the run, in unix milliseconds.
    pub deadline_at: i64,
    /// Failure message for failed runs.
    pub error: Option<String>,
}

/// Result of [`JobStore::signal_with_start`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalWithStartOutcome {
    /// Run that received the signal.
    pub run_id: String,
    /// Whether this call started the run.
    pub started: bool,
}

/// Persistence for job workflows and their signals.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Deliver a signal, starting the workflow first if it is not running.
    ///
    /// Start and signal commit atomically.
    async fn signal_with_start(
        &self,
        workflow_id: &str,
        cluster_id: ClusterId,
        feature_name: &str,
        signal: &JobSignal,
        options: &StartOptions,
    ) -> Result<SignalWithStartOutcome>;

    /// Lease the next eligible workflow to `owner`.
    async fn acquire_next(&self, owner: &str, lease: Duration) -> Result<Option<WorkflowRecord>>;

    /// Extend a held lease. Returns `false` if the lease is no longer held.
    async fn renew_lease(&self, workflow_id: &str, owner: &str, lease: Duration) -> Result<bool>;

    /// Give up a held lease without changing anything else.
    async fn release_lease(&self, workflow_id: &str, owner: &str) -> Result<()>;

    /// Consume every pending signal of the run, returning the newest.
    async fn take_latest_signal(&self, workflow_id: &str, run_id: &str)
    -> Result<Option<JobSignal>>;

    /// Record the job the workflow is about to execute and clear its retry timer.
    async fn set_current_job(&self, workflow_id: &str, owner: &str, job: &JobSignal)
    -> Result<()>;

    /// Arm the retry timer and release the lease.
    async fn schedule_retry(&self, workflow_id: &str, owner: &str, retry_at: i64) -> Result<()>;

    /// Finish the run successfully and release the lease.
    ///
    /// Returns `false` and keeps both the run and the lease when a signal
    /// arrived after the last drain; the caller must adopt it.
    async fn complete(&self, workflow_id: &str, owner: &str) -> Result<bool>;

    /// Finish the run with an error and release the lease.
    async fn fail(&self, workflow_id: &str, owner: &str, error: &str) -> Result<()>;

    /// Load a workflow by id.
    async fn get_workflow(&self, workflow_id: &str) -> Result<Option<WorkflowRecord>>;
}

pub(crate) fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

fn millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

#[derive(Debug, sqlx::FromRow)]
struct WorkflowRow {
    workflow_id: String,
    run_id: String,
    cluster_id: i64,
    feature_name: String,
    state: String,
    current_job: Option<String>,
    retry_at: Option<i64>,
    lease_owner: Option<String>,
    deadline_at: i64,
    error: Option<String>,
}

impl TryFrom<WorkflowRow> for WorkflowRecord {
    type Error = FeatureError;

    fn try_from(row: WorkflowRow) -> Result<Self> {
        let current_job = row
            .current_job
            .as_deref()
            .map(serde_json::from_str::<JobSignal>)
            .transpose()?;

        Ok(WorkflowRecord {
            workflow_id: row.workflow_id,
            run_id: row.run_id,
            cluster_id: row.cluster_id as ClusterId,
            feature_name: row.feature_name,
            state: WorkflowState::parse(&row.state)?,
            current_job,
            retry_at: row.retry_at,
            lease_owner: row.lease_owner,
            deadline_at: row.deadline_at,
            error: row.error,
        })
    }
}

const WORKFLOW_COLUMNS: &str = "workflow_id, run_id, cluster_id, feature_name, state, current_job, \
     retry_at, lease_owner, deadline_at, error";

/// SQLite-backed job store sharing the feature database.
#[derive(Clone)]
pub struct SqliteJobStore {
    pool: SqlitePool,
}

impl SqliteJobStore {
    /// Create a store from an existing, migrated pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn lease_lost(workflow_id: &str) -> FeatureError {
        FeatureError::LeaseLost {
            workflow_id: workflow_id.to_string(),
        }
    }

    async fn finish(
        &self,
        workflow_id: &str,
        owner: &str,
        state: WorkflowState,
        error: Option<&str>,
    ) -> Result<u64> {
        // A completed run must not leave accepted signals behind.
        let result = sqlx::query(
            r#"
            UPDATE feature_workflows
            SET state = ?1, error = ?2, finished_at = ?3,
                current_job = NULL, retry_at = NULL,
                lease_owner = NULL, lease_expires_at = NULL
            WHERE workflow_id = ?4 AND lease_owner = ?5
              AND (?1 != 'completed' OR NOT EXISTS (
                  SELECT 1 FROM feature_workflow_signals s
                  WHERE s.workflow_id = ?4
                    AND s.run_id = feature_workflows.run_id
                    AND s.consumed_at IS NULL
              ))
            "#,
        )
        .bind(state.as_str())
        .bind(error)
        .bind(now_millis())
        .bind(workflow_id)
        .bind(owner)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn holds_lease(&self, workflow_id: &str, owner: &str) -> Result<bool> {
        let held: Option<(i64,)> = sqlx::query_as(
            "SELECT 1 FROM feature_workflows WHERE workflow_id = ?1 AND lease_owner = ?2",
        )
        .bind(workflow_id)
        .bind(owner)
        .fetch_optional(&self.pool)
        .await?;

        Ok(held.is_some())
    }
}

#[async_trait]
impl JobStore for SqliteJobStore {
    async fn signal_with_start(
        &self,
        workflow_id: &str,
        cluster_id: ClusterId,
        feature_name: &str,
        signal: &JobSignal,
        options: &StartOptions,
    ) -> Result<SignalWithStartOutcome> {
        let now = now_millis();
        let deadline_at = now.saturating_add(millis(options.execution_timeout));
        let payload = serde_json::to_string(signal)?;

        let mut tx = self.pool.begin().await?;

        let existing: Option<(String, String)> =
            sqlx::query_as("SELECT run_id, state FROM feature_workflows WHERE workflow_id = ?")
                .bind(workflow_id)
                .fetch_optional(&mut *tx)
                .await?;

        let (run_id, started) = match existing {
            Some((run_id, state)) if WorkflowState::parse(&state)? == WorkflowState::Running => {
                (run_id, false)
            }
            Some(_) if options.id_reuse_policy == WorkflowIdReusePolicy::RejectDuplicate => {
                return Err(FeatureError::WorkflowIdReused {
                    workflow_id: workflow_id.to_string(),
                });
            }
            Some(_) => {
                let run_id = Uuid::new_v4().to_string();
                sqlx::query(
                    r#"
                    UPDATE feature_workflows
                    SET run_id = ?1, state = ?2, current_job = NULL, retry_at = NULL,
                        lease_owner = NULL, lease_expires_at = NULL, deadline_at = ?3,
                        error = NULL, started_at = ?4, finished_at = NULL
                    WHERE workflow_id = ?5
                    "#,
                )
                .bind(&run_id)
                .bind(WorkflowState::Running.as_str())
                .bind(deadline_at)
                .bind(now)
                .bind(workflow_id)
                .execute(&mut *tx)
                .await?;
                (run_id, true)
            }
            None => {
                let run_id = Uuid::new_v4().to_string();
                sqlx::query(
                    r#"
                    INSERT INTO feature_workflows
                        (workflow_id, run_id, cluster_id, feature_name, state, deadline_at, started_at)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                    "#,
                )
                .bind(workflow_id)
                .bind(&run_id)
                .bind(cluster_id as i64)
                .bind(feature_name)
                .bind(WorkflowState::Running.as_str())
                .bind(deadline_at)
                .bind(now)
                .execute(&mut *tx)
                .await?;
                (run_id, true)
            }
        };

        sqlx::query(
            r#"
            INSERT INTO feature_workflow_signals (workflow_id, run_id, payload, created_at)
            VALUES (?1, ?2, ?3, ?4)
            "#,
        )
        .bind(workflow_id)
        .bind(&run_id)
        .bind(payload)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        debug!(workflow_id = %workflow_id, run_id = %run_id, started, "Signal delivered");
        Ok(SignalWithStartOutcome { run_id, started })
    }

    async fn acquire_next(&self, owner: &str, lease: Duration) -> Result<Option<WorkflowRecord>> {
        let now = now_millis();
        let query = format!(
            r#"
            UPDATE feature_workflows
            SET lease_owner = ?1, lease_expires_at = ?2
            WHERE workflow_id = (
                SELECT w.workflow_id FROM feature_workflows w
                WHERE w.state = 'running'
                  AND (w.lease_owner IS NULL OR w.lease_expires_at <= ?3)
                  AND (
                    EXISTS (
                        SELECT 1 FROM feature_workflow_signals s
                        WHERE s.workflow_id = w.workflow_id
                          AND s.run_id = w.run_id
                          AND s.consumed_at IS NULL
                    )
                    OR (w.current_job IS NOT NULL AND (w.retry_at IS NULL OR w.retry_at <= ?3))
                    OR w.deadline_at <= ?3
                  )
                ORDER BY w.started_at
                LIMIT 1
            )
            RETURNING {}
            "#,
            WORKFLOW_COLUMNS
        );

        let row = sqlx::query_as::<_, WorkflowRow>(&query)
            .bind(owner)
            .bind(now.saturating_add(millis(lease)))
            .bind(now)
            .fetch_optional(&self.pool)
            .await?;

        row.map(WorkflowRecord::try_from).transpose()
    }

    async fn renew_lease(&self, workflow_id: &str, owner: &str, lease: Duration) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE feature_workflows
            SET lease_expires_at = ?1
            WHERE workflow_id = ?2 AND lease_owner = ?3
            "#,
        )
        .bind(now_millis().saturating_add(millis(lease)))
        .bind(workflow_id)
        .bind(owner)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn release_lease(&self, workflow_id: &str, owner: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE feature_workflows
            SET lease_owner = NULL, lease_expires_at = NULL
            WHERE workflow_id = ?1 AND lease_owner = ?2
            "#,
        )
        .bind(workflow_id)
        .bind(owner)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn take_latest_signal(
        &self,
        workflow_id: &str,
        run_id: &str,
    ) -> Result<Option<JobSignal>> {
        let mut tx = self.pool.begin().await?;

        let latest: Option<(String,)> = sqlx::query_as(
            r#"
            SELECT payload FROM feature_workflow_signals
            WHERE workflow_id = ?1 AND run_id = ?2 AND consumed_at IS NULL
            ORDER BY id DESC
            LIMIT 1
            "#,
        )
        .bind(workflow_id)
        .bind(run_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some((payload,)) = latest else {
            return Ok(None);
        };

        let consumed = sqlx::query(
            r#"
            UPDATE feature_workflow_signals
            SET consumed_at = ?1
            WHERE workflow_id = ?2 AND run_id = ?3 AND consumed_at IS NULL
            "#,
        )
        .bind(now_millis())
        .bind(workflow_id)
        .bind(run_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        if consumed.rows_affected() > 1 {
            debug!(
                workflow_id = %workflow_id,
                discarded = consumed.rows_affected() - 1,
                "Superseded signals discarded"
            );
        }

        Ok(Some(serde_json::from_str(&payload)?))
    }

    async fn set_current_job(
        &self,
        workflow_id: &str,
        owner: &str,
        job: &JobSignal,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE feature_workflows
            SET current_job = ?1, retry_at = NULL
            WHERE workflow_id = ?2 AND lease_owner = ?3
            "#,
        )
        .bind(serde_json::to_string(job)?)
        .bind(workflow_id)
        .bind(owner)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Self::lease_lost(workflow_id));
        }
        Ok(())
    }

    async fn schedule_retry(&self, workflow_id: &str, owner: &str, retry_at: i64) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE feature_workflows
            SET retry_at = ?1, lease_owner = NULL, lease_expires_at = NULL
            WHERE workflow_id = ?2 AND lease_owner = ?3
            "#,
        )
        .bind(retry_at)
        .bind(workflow_id)
        .bind(owner)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Self::lease_lost(workflow_id));
        }
        Ok(())
    }

    async fn complete(&self, workflow_id: &str, owner: &str) -> Result<bool> {
        if self
            .finish(workflow_id, owner, WorkflowState::Completed, None)
            .await?
            > 0
        {
            return Ok(true);
        }

        if !self.holds_lease(workflow_id, owner).await? {
            return Err(Self::lease_lost(workflow_id));
        }
        debug!(workflow_id = %workflow_id, "Completion deferred, signal pending");
        Ok(false)
    }

    async fn fail(&self, workflow_id: &str, owner: &str, error: &str) -> Result<()> {
        if self
            .finish(workflow_id, owner, WorkflowState::Failed, Some(error))
            .await?
            == 0
        {
            return Err(Self::lease_lost(workflow_id));
        }
        Ok(())
    }

    async fn get_workflow(&self, workflow_id: &str) -> Result<Option<WorkflowRecord>> {
        let query = format!(
            "SELECT {} FROM feature_workflows WHERE workflow_id = ?",
            WORKFLOW_COLUMNS
        );
        let row = sqlx::query_as::<_, WorkflowRow>(&query)
            .bind(workflow_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(WorkflowRecord::try_from).transpose()
    }
}
