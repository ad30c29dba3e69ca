// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Side effects performed by job workflows.

use std::sync::Arc;

use tracing::warn;

use super::signal::JobSignal;
use crate::error::{FeatureError, Result};
use crate::registry::FeatureOperatorRegistry;
use crate::repository::FeatureRepository;
use crate::types::{ClusterId, FeatureStatus, Operation};

/// Operator calls and repository writes available to a workflow.
#[derive(Clone)]
pub struct FeatureActivities {
    operators: Arc<FeatureOperatorRegistry>,
    repository: Arc<dyn FeatureRepository>,
}

impl FeatureActivities {
    /// Create activities over the operator registry and feature repository.
    pub fn new(
        operators: Arc<FeatureOperatorRegistry>,
        repository: Arc<dyn FeatureRepository>,
    ) -> Self {
        Self {
            operators,
            repository,
        }
    }

    /// Run the operator for a job.
    pub async fn execute(
        &self,
        cluster_id: ClusterId,
        feature_name: &str,
        job: &JobSignal,
    ) -> Result<()> {
        let operator = self.operators.get_feature_operator(feature_name)?;
        match job.operation {
            Operation::Apply => operator.apply(cluster_id, &job.spec).await,
            Operation::Deactivate => operator.deactivate(cluster_id, &job.spec).await,
        }
    }

    /// Set the persisted status. A missing record is not an error.
    pub async fn set_status(
        &self,
        cluster_id: ClusterId,
        feature_name: &str,
        status: FeatureStatus,
    ) -> Result<()> {
        match self
            .repository
            .update_feature_status(cluster_id, feature_name, status)
            .await
        {
            Err(FeatureError::FeatureNotFound { .. }) => {
                warn!(
                    cluster_id,
                    feature = %feature_name,
                    status = %status,
                    "Feature has no persisted record, status not recorded"
                );
                Ok(())
            }
            other => other,
        }
    }

    /// Apply the finalize step of a completed job.
    pub async fn finalize(
        &self,
        cluster_id: ClusterId,
        feature_name: &str,
        operation: Operation,
    ) -> Result<()> {
        match operation {
            Operation::Apply => {
                self.set_status(cluster_id, feature_name, FeatureStatus::Active)
                    .await
            }
            Operation::Deactivate => {
                self.repository
                    .delete_feature(cluster_id, feature_name)
                    .await
            }
        }
    }
}
