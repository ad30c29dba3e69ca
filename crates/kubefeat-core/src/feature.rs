// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Capability sets implemented by each feature type.
//!
//! A feature type supplies a [`FeatureManager`] for the synchronous
//! validate/read path and a [`FeatureOperator`] for the slow work against the
//! cluster. Both are looked up by [`name`](FeatureManager::name) through the
//! registries in [`crate::registry`].

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{ClusterId, FeatureOutput, FeatureSpec};

/// Synchronous capabilities of a feature type.
///
/// Implementations must be fast and must not mutate the cluster.
#[async_trait]
pub trait FeatureManager: Send + Sync {
    /// The feature type name this manager is registered under.
    fn name(&self) -> &str;

    /// Reject specs that cannot be applied.
    ///
    /// Return [`FeatureError::InvalidFeatureSpec`](crate::error::FeatureError::InvalidFeatureSpec)
    /// to have the request surfaced as a bad request.
    async fn validate_spec(&self, spec: &FeatureSpec) -> Result<()>;

    /// Apply defaults and resolve references (e.g. secrets) before dispatch.
    ///
    /// The returned spec is what the operator receives; the original spec is
    /// what gets persisted.
    async fn prepare_spec(&self, cluster_id: ClusterId, spec: FeatureSpec) -> Result<FeatureSpec>;

    /// Compute the current output for a feature from its persisted spec.
    async fn get_output(&self, cluster_id: ClusterId, spec: &FeatureSpec)
    -> Result<FeatureOutput>;
}

/// Asynchronous, cluster-mutating capabilities of a feature type.
#[async_trait]
pub trait FeatureOperator: Send + Sync {
    /// The feature type name this operator is registered under.
    fn name(&self) -> &str;

    /// Install or update the feature on the cluster.
    ///
    /// Failures that may succeed later should be reported as
    /// [`FeatureError::ClusterIsNotReady`](crate::error::FeatureError::ClusterIsNotReady)
    /// or [`FeatureError::Retryable`](crate::error::FeatureError::Retryable).
    async fn apply(&self, cluster_id: ClusterId, spec: &FeatureSpec) -> Result<()>;

    /// Remove the feature from the cluster, using the spec it was created with.
    async fn deactivate(&self, cluster_id: ClusterId, spec: &FeatureSpec) -> Result<()>;
}

/// Cluster readiness check consulted before activating or updating a feature.
#[async_trait]
pub trait ClusterService: Send + Sync {
    /// Fail with [`FeatureError::ClusterIsNotReady`](crate::error::FeatureError::ClusterIsNotReady)
    /// when the cluster cannot accept feature operations.
    async fn check_cluster_ready(&self, cluster_id: ClusterId) -> Result<()>;
}

/// A [`ClusterService`] that treats every cluster as ready.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysReady;

#[async_trait]
impl ClusterService for AlwaysReady {
    async fn check_cluster_ready(&self, _cluster_id: ClusterId) -> Result<()> {
        Ok(())
    }
}
