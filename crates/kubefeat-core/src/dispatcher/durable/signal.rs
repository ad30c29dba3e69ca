// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Workflow identity, start options and the job signal payload.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::{ClusterId, FeatureSpec, Operation};

/// Name of the job workflow; prefix of every workflow id.
pub const WORKFLOW_NAME: &str = "cluster-feature-job";

/// Deterministic workflow id for a (cluster, feature) pair.
///
/// Every operation for the same pair targets the same workflow, which is what
/// serializes them.
pub fn workflow_id(cluster_id: ClusterId, feature_name: &str) -> String {
    format!("{}-{}-{}", WORKFLOW_NAME, cluster_id, feature_name)
}

/// Payload delivered to a job workflow.
///
/// Serialized as `{"Operation": "apply", "Spec": {...}, "RetryInterval": <nanoseconds>}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct JobSignal {
    /// Operation to run.
    pub operation: Operation,
    /// Prepared spec handed to the operator.
    pub spec: FeatureSpec,
    /// Delay before re-running the job after a retryable failure.
    #[serde(with = "duration_nanos")]
    pub retry_interval: Duration,
}

/// What happens when a signal targets a workflow id whose last run finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WorkflowIdReusePolicy {
    /// Start a fresh run under the same id.
    #[default]
    AllowDuplicate,
    /// Refuse with [`FeatureError::WorkflowIdReused`](crate::error::FeatureError::WorkflowIdReused).
    RejectDuplicate,
}

/// Options applied when a signal starts a new workflow run.
#[derive(Debug, Clone)]
pub struct StartOptions {
    /// Maximum wall-clock lifetime of a run.
    pub execution_timeout: Duration,
    /// Id reuse behaviour for finished workflows.
    pub id_reuse_policy: WorkflowIdReusePolicy,
}

impl Default for StartOptions {
    fn default() -> Self {
        Self {
            execution_timeout: Duration::from_secs(24 * 60 * 60),
            id_reuse_policy: WorkflowIdReusePolicy::AllowDuplicate,
        }
    }
}

mod duration_nanos {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_nanos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_workflow_id() {
        assert_eq!(workflow_id(42, "dns"), "cluster-feature-job-42-dns");
    }

    #[test]
    fn test_workflow_id_distinguishes_keys() {
        assert_eq!(workflow_id(1, "dns"), workflow_id(1, "dns"));
        assert_ne!(workflow_id(1, "dns"), workflow_id(1, "vault"));
        assert_ne!(workflow_id(1, "dns"), workflow_id(2, "dns"));
    }

    #[test]
    fn test_signal_wire_format() {
        let signal = JobSignal {
            operation: Operation::Apply,
            spec: json!({"zone": "example.org"}).as_object().cloned().unwrap(),
            retry_interval: Duration::from_secs(30),
        };

        let value = serde_json::to_value(&signal).unwrap();
        assert_eq!(
            value,
            json!({
                "Operation": "apply",
                "Spec": {"zone": "example.org"},
                "RetryInterval": 30_000_000_000u64
            })
        );

        let decoded: JobSignal = serde_json::from_value(value).unwrap();
        assert_eq!(decoded, signal);
    }

    #[test]
    fn test_start_options_default() {
        let options = StartOptions::default();
        assert_eq!(options.execution_timeout, Duration::from_secs(86400));
        assert_eq!(options.id_reuse_policy, WorkflowIdReusePolicy::AllowDuplicate);
    }
}
