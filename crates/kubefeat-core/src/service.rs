// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Feature service: the entry point request handlers call.
//!
//! Mutating calls validate and prepare synchronously, hand the operation to
//! the dispatcher and persist the record as `PENDING`. They never wait for
//! the operation itself. Dispatch happens before persistence, so a rejected
//! dispatch leaves no record behind.
//!
//! Reads recompute each feature's output from its stored spec and merge it
//! over the stored output.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::dispatcher::FeatureOperationDispatcher;
use crate::error::{FeatureError, Result};
use crate::feature::{AlwaysReady, ClusterService};
use crate::registry::FeatureManagerRegistry;
use crate::repository::FeatureRepository;
use crate::types::{ClusterId, Feature, FeatureSpec, FeatureStatus, merge_output};

/// Orchestrates feature activation, update, deactivation and reads.
#[derive(Clone)]
pub struct FeatureService {
    managers: Arc<FeatureManagerRegistry>,
    dispatcher: Arc<dyn FeatureOperationDispatcher>,
    repository: Arc<dyn FeatureRepository>,
    clusters: Arc<dyn ClusterService>,
}

impl FeatureService {
    /// Create a service that treats every cluster as ready.
    pub fn new(
        managers: Arc<FeatureManagerRegistry>,
        dispatcher: Arc<dyn FeatureOperationDispatcher>,
        repository: Arc<dyn FeatureRepository>,
    ) -> Self {
        Self {
            managers,
            dispatcher,
            repository,
            clusters: Arc::new(AlwaysReady),
        }
    }

    /// Use a cluster readiness check for activate and update.
    pub fn with_cluster_service(mut self, clusters: Arc<dyn ClusterService>) -> Self {
        self.clusters = clusters;
        self
    }

    /// List all features of a cluster with fresh output.
    pub async fn list(&self, cluster_id: ClusterId) -> Result<Vec<Feature>> {
        let features = self.repository.get_features(cluster_id).await?;

        let mut result = Vec::with_capacity(features.len());
        for feature in features {
            result.push(self.with_fresh_output(feature).await?);
        }
        Ok(result)
    }

    /// Get one feature with fresh output.
    pub async fn details(&self, cluster_id: ClusterId, feature_name: &str) -> Result<Feature> {
        let feature = self.repository.get_feature(cluster_id, feature_name).await?;
        self.with_fresh_output(feature).await
    }

    /// Activate a feature that has no record yet.
    pub async fn activate(
        &self,
        cluster_id: ClusterId,
        feature_name: &str,
        spec: FeatureSpec,
    ) -> Result<()> {
        self.clusters.check_cluster_ready(cluster_id).await?;

        match self.repository.get_feature(cluster_id, feature_name).await {
            Ok(_) => {
                return Err(FeatureError::FeatureAlreadyExists {
                    cluster_id,
                    feature_name: feature_name.to_string(),
                });
            }
            Err(FeatureError::FeatureNotFound { .. }) => {}
            Err(e) => return Err(e.context("check existing feature")),
        }

        self.apply(cluster_id, feature_name, spec).await?;

        info!(cluster_id, feature = %feature_name, "Feature activation requested");
        Ok(())
    }

    /// Apply a new spec to a feature. No existing record is required.
    pub async fn update(
        &self,
        cluster_id: ClusterId,
        feature_name: &str,
        spec: FeatureSpec,
    ) -> Result<()> {
        self.clusters.check_cluster_ready(cluster_id).await?;
        self.apply(cluster_id, feature_name, spec).await?;

        info!(cluster_id, feature = %feature_name, "Feature update requested");
        Ok(())
    }

    /// Deactivate a feature. Deactivating an absent feature succeeds.
    pub async fn deactivate(&self, cluster_id: ClusterId, feature_name: &str) -> Result<()> {
        self.managers.get_feature_manager(feature_name)?;

        let feature = match self.repository.get_feature(cluster_id, feature_name).await {
            Ok(feature) => feature,
            Err(FeatureError::FeatureNotFound { .. }) => {
                debug!(cluster_id, feature = %feature_name, "Feature already absent");
                return Ok(());
            }
            Err(e) => return Err(e.context("get feature")),
        };

        self.dispatcher
            .dispatch_deactivate(cluster_id, feature_name, &feature.spec)
            .await
            .map_err(|e| e.context("dispatch deactivate operation"))?;

        match self
            .repository
            .update_feature_status(cluster_id, feature_name, FeatureStatus::Pending)
            .await
        {
            Ok(()) | Err(FeatureError::FeatureNotFound { .. }) => {}
            Err(e) => return Err(e.context("update feature status")),
        }

        info!(cluster_id, feature = %feature_name, "Feature deactivation requested");
        Ok(())
    }

    /// Validate, prepare, dispatch and persist as pending.
    async fn apply(&self, cluster_id: ClusterId, feature_name: &str, spec: FeatureSpec) -> Result<()> {
        let manager = self.managers.get_feature_manager(feature_name)?;

        manager.validate_spec(&spec).await.map_err(|e| match e {
            FeatureError::InvalidFeatureSpec { .. } => e,
            other => FeatureError::InvalidFeatureSpec {
                feature_name: feature_name.to_string(),
                problem: other.to_string(),
            },
        })?;
        let prepared = manager.prepare_spec(cluster_id, spec.clone()).await?;

        self.dispatcher
            .dispatch_apply(cluster_id, feature_name, &prepared)
            .await
            .map_err(|e| e.context("dispatch apply operation"))?;

        self.repository
            .save_feature(cluster_id, feature_name, &spec, FeatureStatus::Pending)
            .await
            .map_err(|e| e.context("persist feature"))
    }

    async fn with_fresh_output(&self, mut feature: Feature) -> Result<Feature> {
        let manager = match self.managers.get_feature_manager(&feature.name) {
            Ok(manager) => manager,
            Err(_) => {
                warn!(
                    cluster_id = feature.cluster_id,
                    feature = %feature.name,
                    "No manager registered for stored feature, returning stored output"
                );
                return Ok(feature);
            }
        };

        let computed = manager
            .get_output(feature.cluster_id, &feature.spec)
            .await
            .map_err(|e| e.context("get feature output"))?;
        feature.output = merge_output(&feature.output, computed);
        Ok(feature)
    }
}
