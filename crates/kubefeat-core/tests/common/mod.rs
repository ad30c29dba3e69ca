// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for kubefeat-core integration tests.
//!
//! Provides scriptable feature managers and operators, failing collaborators
//! and an in-memory SQLite pool.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;
use tokio::sync::Notify;

use kubefeat_core::{
    ClusterId, ClusterService, Feature, FeatureError, FeatureManager, FeatureManagerRegistry,
    FeatureOperationDispatcher, FeatureOperator, FeatureOperatorRegistry, FeatureOutput,
    FeatureRepository, FeatureSpec, FeatureStatus, InMemoryFeatureRepository, Operation, Result,
};

/// Initialize tracing once; honours `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Create an in-memory SQLite pool with all migrations applied.
pub async fn test_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to create in-memory SQLite pool");

    kubefeat_core::migrations::run(&pool)
        .await
        .expect("Failed to run migrations");

    pool
}

/// Build a spec from a JSON object literal.
pub fn spec(value: Value) -> FeatureSpec {
    value.as_object().cloned().unwrap_or_default()
}

/// Registry over the given managers.
pub fn managers(managers: impl IntoIterator<Item = MockManager>) -> FeatureManagerRegistry {
    FeatureManagerRegistry::new(
        managers
            .into_iter()
            .map(|manager| Arc::new(manager) as Arc<dyn FeatureManager>),
    )
}

/// Registry over the given operators.
pub fn operators(operators: &[Arc<MockOperator>]) -> FeatureOperatorRegistry {
    FeatureOperatorRegistry::new(
        operators
            .iter()
            .map(|operator| operator.clone() as Arc<dyn FeatureOperator>),
    )
}

/// Poll until the stored status matches, or panic after two seconds.
pub async fn wait_for_status(
    repository: &dyn FeatureRepository,
    cluster_id: ClusterId,
    name: &str,
    expected: FeatureStatus,
) {
    let result = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            if let Ok(feature) = repository.get_feature(cluster_id, name).await
                && feature.status == expected
            {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(
        result.is_ok(),
        "feature {} on cluster {} never reached {}",
        name,
        cluster_id,
        expected
    );
}

/// Poll until the record is gone, or panic after two seconds.
pub async fn wait_for_deleted(repository: &dyn FeatureRepository, cluster_id: ClusterId, name: &str) {
    let result = tokio::time::timeout(Duration::from_secs(2), async {
        while repository.get_feature(cluster_id, name).await.is_ok() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(result.is_ok(), "feature {} was never deleted", name);
}

/// Feature manager with a fixed output.
///
/// `prepare_spec` marks the spec with `"prepared": true` so tests can tell the
/// prepared spec from the submitted one.
pub struct MockManager {
    name: String,
    output: FeatureOutput,
    reject: Option<String>,
    broken: Option<String>,
}

impl MockManager {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            output: FeatureOutput::new(),
            reject: None,
            broken: None,
        }
    }

    pub fn with_output(mut self, output: Value) -> Self {
        self.output = spec(output);
        self
    }

    pub fn rejecting(mut self, problem: &str) -> Self {
        self.reject = Some(problem.to_string());
        self
    }

    /// `validate_spec` fails with an error that is not a validation error.
    pub fn broken(mut self, message: &str) -> Self {
        self.broken = Some(message.to_string());
        self
    }
}

#[async_trait]
impl FeatureManager for MockManager {
    fn name(&self) -> &str {
        &self.name
    }

    async fn validate_spec(&self, _spec: &FeatureSpec) -> Result<()> {
        if let Some(message) = &self.broken {
            return Err(FeatureError::Operator {
                feature_name: self.name.clone(),
                message: message.clone(),
            });
        }
        match &self.reject {
            Some(problem) => Err(FeatureError::InvalidFeatureSpec {
                feature_name: self.name.clone(),
                problem: problem.clone(),
            }),
            None => Ok(()),
        }
    }

    async fn prepare_spec(&self, _cluster_id: ClusterId, mut spec: FeatureSpec) -> Result<FeatureSpec> {
        spec.insert("prepared".to_string(), Value::Bool(true));
        Ok(spec)
    }

    async fn get_output(&self, _cluster_id: ClusterId, _spec: &FeatureSpec) -> Result<FeatureOutput> {
        Ok(self.output.clone())
    }
}

/// What a [`MockOperator`] does on one call.
#[derive(Clone)]
pub enum Behavior {
    Succeed,
    /// Fail with a retryable error.
    NotReady,
    /// Fail with a non-retryable error.
    Fail(&'static str),
    /// Block until the gate is notified, then succeed.
    WaitFor(Arc<Notify>),
}

/// One recorded operator call.
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub operation: Operation,
    pub cluster_id: ClusterId,
    pub spec: FeatureSpec,
}

/// Operator that follows a per-call script and records every call.
///
/// Once the script is exhausted every call succeeds.
pub struct MockOperator {
    name: String,
    script: Mutex<VecDeque<Behavior>>,
    calls: Mutex<Vec<Call>>,
    entered: Notify,
}

impl MockOperator {
    pub fn new(name: &str) -> Arc<Self> {
        Self::scripted(name, [])
    }

    pub fn scripted(name: &str, script: impl IntoIterator<Item = Behavior>) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            script: Mutex::new(script.into_iter().collect()),
            calls: Mutex::new(Vec::new()),
            entered: Notify::new(),
        })
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    /// Wait until the next call starts.
    pub async fn entered(&self) {
        tokio::time::timeout(Duration::from_secs(2), self.entered.notified())
            .await
            .expect("operator was never called");
    }

    async fn run(&self, operation: Operation, cluster_id: ClusterId, spec: &FeatureSpec) -> Result<()> {
        self.calls.lock().unwrap().push(Call {
            operation,
            cluster_id,
            spec: spec.clone(),
        });
        self.entered.notify_one();

        let behavior = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Behavior::Succeed);

        match behavior {
            Behavior::Succeed => Ok(()),
            Behavior::NotReady => Err(FeatureError::ClusterIsNotReady { cluster_id }),
            Behavior::Fail(message) => Err(FeatureError::Operator {
                feature_name: self.name.clone(),
                message: message.to_string(),
            }),
            Behavior::WaitFor(gate) => {
                gate.notified().await;
                Ok(())
            }
        }
    }
}

#[async_trait]
impl FeatureOperator for MockOperator {
    fn name(&self) -> &str {
        &self.name
    }

    async fn apply(&self, cluster_id: ClusterId, spec: &FeatureSpec) -> Result<()> {
        self.run(Operation::Apply, cluster_id, spec).await
    }

    async fn deactivate(&self, cluster_id: ClusterId, spec: &FeatureSpec) -> Result<()> {
        self.run(Operation::Deactivate, cluster_id, spec).await
    }
}

/// Repository whose saves always fail.
#[derive(Default)]
pub struct FailingSaveRepository {
    inner: InMemoryFeatureRepository,
}

#[async_trait]
impl FeatureRepository for FailingSaveRepository {
    async fn get_features(&self, cluster_id: ClusterId) -> Result<Vec<Feature>> {
        self.inner.get_features(cluster_id).await
    }

    async fn get_feature(&self, cluster_id: ClusterId, name: &str) -> Result<Feature> {
        self.inner.get_feature(cluster_id, name).await
    }

    async fn save_feature(
        &self,
        _cluster_id: ClusterId,
        _name: &str,
        _spec: &FeatureSpec,
        _status: FeatureStatus,
    ) -> Result<()> {
        Err(FeatureError::Repository("persistence error".to_string()))
    }

    async fn update_feature_status(
        &self,
        cluster_id: ClusterId,
        name: &str,
        status: FeatureStatus,
    ) -> Result<()> {
        self.inner.update_feature_status(cluster_id, name, status).await
    }

    async fn update_feature_spec(&self, cluster_id: ClusterId, name: &str, spec: &FeatureSpec) -> Result<()> {
        self.inner.update_feature_spec(cluster_id, name, spec).await
    }

    async fn delete_feature(&self, cluster_id: ClusterId, name: &str) -> Result<()> {
        self.inner.delete_feature(cluster_id, name).await
    }
}

/// Cluster service that reports every cluster as not ready.
pub struct NotReadyClusters;

#[async_trait]
impl ClusterService for NotReadyClusters {
    async fn check_cluster_ready(&self, cluster_id: ClusterId) -> Result<()> {
        Err(FeatureError::ClusterIsNotReady { cluster_id })
    }
}

/// One recorded dispatch.
#[derive(Debug, Clone, PartialEq)]
pub struct Dispatched {
    pub operation: Operation,
    pub cluster_id: ClusterId,
    pub feature_name: String,
    pub spec: FeatureSpec,
}

/// Dispatcher that records dispatches, optionally rejecting them all.
#[derive(Default)]
pub struct RecordingDispatcher {
    dispatched: Mutex<Vec<Dispatched>>,
    reject: bool,
}

impl RecordingDispatcher {
    /// A dispatcher whose every dispatch fails with a full queue.
    pub fn rejecting() -> Self {
        Self {
            reject: true,
            ..Self::default()
        }
    }

    pub fn dispatched(&self) -> Vec<Dispatched> {
        self.dispatched.lock().unwrap().clone()
    }

    fn record(&self, operation: Operation, cluster_id: ClusterId, feature_name: &str, spec: &FeatureSpec) -> Result<()> {
        if self.reject {
            return Err(FeatureError::QueueFull);
        }
        self.dispatched.lock().unwrap().push(Dispatched {
            operation,
            cluster_id,
            feature_name: feature_name.to_string(),
            spec: spec.clone(),
        });
        Ok(())
    }
}

#[async_trait]
impl FeatureOperationDispatcher for RecordingDispatcher {
    async fn dispatch_apply(&self, cluster_id: ClusterId, feature_name: &str, spec: &FeatureSpec) -> Result<()> {
        self.record(Operation::Apply, cluster_id, feature_name, spec)
    }

    async fn dispatch_deactivate(
        &self,
        cluster_id: ClusterId,
        feature_name: &str,
        spec: &FeatureSpec,
    ) -> Result<()> {
        self.record(Operation::Deactivate, cluster_id, feature_name, spec)
    }
}
