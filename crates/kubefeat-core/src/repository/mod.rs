// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Feature repository interface and backends.
//!
//! The repository is pure state storage: one record per (cluster, feature).
//! It is shared between request handlers and dispatcher workers, so every
//! backend must be safe for concurrent use.

pub mod memory;
pub mod sqlite;

pub use self::memory::InMemoryFeatureRepository;
pub use self::sqlite::SqliteFeatureRepository;

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{ClusterId, Feature, FeatureSpec, FeatureStatus};

/// Persistence interface for feature records.
#[async_trait]
pub trait FeatureRepository: Send + Sync {
    /// All features attached to a cluster.
    async fn get_features(&self, cluster_id: ClusterId) -> Result<Vec<Feature>>;

    /// A single feature, or [`FeatureError::FeatureNotFound`](crate::error::FeatureError::FeatureNotFound).
    async fn get_feature(&self, cluster_id: ClusterId, name: &str) -> Result<Feature>;

    /// Create the record, or overwrite spec and status if it already exists.
    async fn save_feature(
        &self,
        cluster_id: ClusterId,
        name: &str,
        spec: &FeatureSpec,
        status: FeatureStatus,
    ) -> Result<()>;

    /// Set the status of an existing record.
    ///
    /// Fails with [`FeatureError::FeatureNotFound`](crate::error::FeatureError::FeatureNotFound)
    /// if there is no record.
    async fn update_feature_status(
        &self,
        cluster_id: ClusterId,
        name: &str,
        status: FeatureStatus,
    ) -> Result<()>;

    /// Set the spec of an existing record.
    async fn update_feature_spec(
        &self,
        cluster_id: ClusterId,
        name: &str,
        spec: &FeatureSpec,
    ) -> Result<()>;

    /// Remove the record. Removing an absent record is not an error.
    async fn delete_feature(&self, cluster_id: ClusterId, name: &str) -> Result<()>;
}
