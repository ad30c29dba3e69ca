// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-memory feature repository.
//!
//! Reference implementation of [`FeatureRepository`], used in tests and in
//! single-process deployments that do not need records to survive restarts.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::FeatureRepository;
use crate::error::{FeatureError, Result};
use crate::types::{ClusterId, Feature, FeatureOutput, FeatureSpec, FeatureStatus};

/// Feature records held in a process-local map.
#[derive(Debug, Default)]
pub struct InMemoryFeatureRepository {
    features: RwLock<BTreeMap<(ClusterId, String), Feature>>,
}

impl InMemoryFeatureRepository {
    /// Create an empty repository.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a repository pre-populated with records.
    pub fn with_features(features: impl IntoIterator<Item = Feature>) -> Self {
        let map = features
            .into_iter()
            .map(|feature| ((feature.cluster_id, feature.name.clone()), feature))
            .collect();
        Self {
            features: RwLock::new(map),
        }
    }
}

fn not_found(cluster_id: ClusterId, name: &str) -> FeatureError {
    FeatureError::FeatureNotFound {
        cluster_id,
        feature_name: name.to_string(),
    }
}

#[async_trait]
impl FeatureRepository for InMemoryFeatureRepository {
    async fn get_features(&self, cluster_id: ClusterId) -> Result<Vec<Feature>> {
        let features = self.features.read().await;
        Ok(features
            .values()
            .filter(|feature| feature.cluster_id == cluster_id)
            .cloned()
            .collect())
    }

    async fn get_feature(&self, cluster_id: ClusterId, name: &str) -> Result<Feature> {
        let features = self.features.read().await;
        features
            .get(&(cluster_id, name.to_string()))
            .cloned()
            .ok_or_else(|| not_found(cluster_id, name))
    }

    async fn save_feature(
        &self,
        cluster_id: ClusterId,
        name: &str,
        spec: &FeatureSpec,
        status: FeatureStatus,
    ) -> Result<()> {
        let mut features = self.features.write().await;
        features
            .entry((cluster_id, name.to_string()))
            .and_modify(|feature| {
                feature.spec = spec.clone();
                feature.status = status;
            })
            .or_insert_with(|| Feature {
                cluster_id,
                name: name.to_string(),
                spec: spec.clone(),
                output: FeatureOutput::new(),
                status,
            });
        Ok(())
    }

    async fn update_feature_status(
        &self,
        cluster_id: ClusterId,
        name: &str,
        status: FeatureStatus,
    ) -> Result<()> {
        let mut features = self.features.write().await;
        let feature = features
            .get_mut(&(cluster_id, name.to_string()))
            .ok_or_else(|| not_found(cluster_id, name))?;
        feature.status = status;
        Ok(())
    }

    async fn update_feature_spec(
        &self,
        cluster_id: ClusterId,
        name: &str,
        spec: &FeatureSpec,
    ) -> Result<()> {
        let mut features = self.features.write().await;
        let feature = features
            .get_mut(&(cluster_id, name.to_string()))
            .ok_or_else(|| not_found(cluster_id, name))?;
        feature.spec = spec.clone();
        Ok(())
    }

    async fn delete_feature(&self, cluster_id: ClusterId, name: &str) -> Result<()> {
        self.features
            .write()
            .await
            .remove(&(cluster_id, name.to_string()));
        Ok(())
    }
}
