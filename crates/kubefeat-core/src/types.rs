// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Core data types: features, their status, and dispatched jobs.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Identifier of a remote Kubernetes cluster.
pub type ClusterId = u64;

/// Declarative feature specification. The schema is owned by the feature type.
pub type FeatureSpec = serde_json::Map<String, serde_json::Value>;

/// Derived, read-only feature output. The schema is owned by the feature type.
pub type FeatureOutput = serde_json::Map<String, serde_json::Value>;

/// Status of a persisted feature record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FeatureStatus {
    /// An operation was dispatched and has not been confirmed complete.
    Pending,
    /// The last apply finished successfully.
    Active,
    /// The last operation failed.
    Error,
}

impl FeatureStatus {
    /// Storage representation of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Active => "ACTIVE",
            Self::Error => "ERROR",
        }
    }
}

impl fmt::Display for FeatureStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown status string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown feature status: {0}")]
pub struct ParseStatusError(pub String);

impl FromStr for FeatureStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "ACTIVE" => Ok(Self::Active),
            "ERROR" => Ok(Self::Error),
            other => Err(ParseStatusError(other.to_string())),
        }
    }
}

/// A feature attached to a cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    /// The cluster the feature is attached to.
    pub cluster_id: ClusterId,
    /// Feature type name, e.g. `dns`.
    pub name: String,
    /// Desired state as submitted by the user.
    pub spec: FeatureSpec,
    /// Derived state; recomputed on every read.
    pub output: FeatureOutput,
    /// Lifecycle status.
    pub status: FeatureStatus,
}

/// Operation carried by a dispatched job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    /// Install or update the feature on the cluster.
    Apply,
    /// Remove the feature from the cluster.
    Deactivate,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Apply => f.write_str("apply"),
            Self::Deactivate => f.write_str("deactivate"),
        }
    }
}

/// An operation in flight in the dispatch layer.
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    /// What to do.
    pub operation: Operation,
    /// Target cluster.
    pub cluster_id: ClusterId,
    /// Target feature.
    pub feature_name: String,
    /// Prepared spec handed to the operator.
    pub spec: FeatureSpec,
}

/// Shallow-merge freshly computed output over the stored output.
///
/// Keys present in `computed` override the stored values.
pub fn merge_output(stored: &FeatureOutput, computed: FeatureOutput) -> FeatureOutput {
    let mut merged = stored.clone();
    merged.extend(computed);
    merged
}
