// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for kubefeat-core.
//!
//! Every fallible operation in the engine returns [`FeatureError`]. The
//! [`FeatureError::error_code`] classification tells request handlers how to
//! surface an error (not found, bad request, retry later, internal).

use thiserror::Error;

use crate::types::ClusterId;

/// Result type using FeatureError.
pub type Result<T> = std::result::Result<T, FeatureError>;

/// Errors produced by the feature operation engine.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum FeatureError {
    /// No manager or operator is registered under this name.
    #[error("unknown feature: {feature_name}")]
    UnknownFeature {
        /// The requested feature name.
        feature_name: String,
    },

    /// The submitted spec failed validation.
    #[error("invalid spec for feature '{feature_name}': {problem}")]
    InvalidFeatureSpec {
        /// The feature whose spec was rejected.
        feature_name: String,
        /// What is wrong with the spec.
        problem: String,
    },

    /// No persisted record exists for the (cluster, feature) pair.
    #[error("feature '{feature_name}' not found on cluster {cluster_id}")]
    FeatureNotFound {
        /// The cluster that was searched.
        cluster_id: ClusterId,
        /// The missing feature.
        feature_name: String,
    },

    /// Activation was requested for a feature that already has a record.
    #[error("feature already exists")]
    FeatureAlreadyExists {
        /// The cluster the feature is attached to.
        cluster_id: ClusterId,
        /// The existing feature.
        feature_name: String,
    },

    /// The target cluster cannot accept feature operations yet.
    #[error("cluster is not ready")]
    ClusterIsNotReady {
        /// The cluster that is not ready.
        cluster_id: ClusterId,
    },

    /// An operator failure explicitly marked as worth retrying.
    #[error("{0}")]
    Retryable(String),

    /// An operator failed with an unclassified error.
    #[error("operator for feature '{feature_name}' failed: {message}")]
    Operator {
        /// The feature whose operator failed.
        feature_name: String,
        /// The operator's error message.
        message: String,
    },

    /// The local dispatcher queue has no free capacity.
    #[error("feature operation queue is full")]
    QueueFull,

    /// The local dispatcher worker has terminated and accepts no more jobs.
    #[error("feature operation dispatcher has stopped")]
    DispatcherStopped,

    /// Signal-with-start against the durable job store failed.
    #[error("signal-with-start failed: {0}")]
    DispatchFailed(String),

    /// A terminal workflow id was reused while the reuse policy rejects duplicates.
    #[error("workflow '{workflow_id}' already finished and its id may not be reused")]
    WorkflowIdReused {
        /// The rejected workflow id.
        workflow_id: String,
    },

    /// A worker tried to advance a workflow whose lease it no longer holds.
    #[error("lease on workflow '{workflow_id}' is no longer held by this worker")]
    LeaseLost {
        /// The workflow whose lease was lost.
        workflow_id: String,
    },

    /// A feature repository implementation reported a failure.
    #[error("{0}")]
    Repository(String),

    /// Database operation failed.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Database migration failed.
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration loading failed.
    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// An error annotated with the action that was being attempted.
    #[error("failed to {action}: {source}")]
    Context {
        /// What was being attempted, e.g. "persist feature".
        action: &'static str,
        /// The underlying error.
        source: Box<FeatureError>,
    },
}

impl FeatureError {
    /// Wrap this error with the action that was being attempted.
    pub fn context(self, action: &'static str) -> Self {
        Self::Context {
            action,
            source: Box::new(self),
        }
    }

    /// The innermost error, skipping any context wrappers.
    pub fn root(&self) -> &FeatureError {
        match self {
            Self::Context { source, .. } => source.root(),
            other => other,
        }
    }

    /// Whether a failed operation should be retried rather than abandoned.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.root(),
            Self::ClusterIsNotReady { .. } | Self::Retryable(_)
        )
    }

    /// Get the error code string used to surface this error to callers.
    pub fn error_code(&self) -> &'static str {
        match self.root() {
            Self::UnknownFeature { .. } | Self::FeatureNotFound { .. } => "NOT_FOUND",
            Self::InvalidFeatureSpec { .. } => "BAD_REQUEST",
            Self::FeatureAlreadyExists { .. } | Self::WorkflowIdReused { .. } => "CONFLICT",
            Self::ClusterIsNotReady { .. } | Self::Retryable(_) => "RETRY_LATER",
            _ => "INTERNAL",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let test_cases = vec![
            (
                FeatureError::UnknownFeature {
                    feature_name: "dns".to_string(),
                },
                "NOT_FOUND",
            ),
            (
                FeatureError::FeatureNotFound {
                    cluster_id: 1,
                    feature_name: "dns".to_string(),
                },
                "NOT_FOUND",
            ),
            (
                FeatureError::InvalidFeatureSpec {
                    feature_name: "dns".to_string(),
                    problem: "missing provider".to_string(),
                },
                "BAD_REQUEST",
            ),
            (
                FeatureError::FeatureAlreadyExists {
                    cluster_id: 1,
                    feature_name: "dns".to_string(),
                },
                "CONFLICT",
            ),
            (FeatureError::ClusterIsNotReady { cluster_id: 1 }, "RETRY_LATER"),
            (FeatureError::QueueFull, "INTERNAL"),
            (
                FeatureError::DispatchFailed("connection refused".to_string()),
                "INTERNAL",
            ),
        ];

        for (error, expected_code) in test_cases {
            assert_eq!(
                error.error_code(),
                expected_code,
                "Error {:?} should have code {}",
                error,
                expected_code
            );
        }
    }

    #[test]
    fn test_exact_messages() {
        assert_eq!(
            FeatureError::ClusterIsNotReady { cluster_id: 7 }.to_string(),
            "cluster is not ready"
        );
        assert_eq!(
            FeatureError::FeatureAlreadyExists {
                cluster_id: 7,
                feature_name: "dns".to_string()
            }
            .to_string(),
            "feature already exists"
        );
    }

    #[test]
    fn test_context_wrapping() {
        let err = FeatureError::Repository("persistence error".to_string())
            .context("persist feature");
        assert_eq!(err.to_string(), "failed to persist feature: persistence error");
        assert!(matches!(err.root(), FeatureError::Repository(_)));
        assert_eq!(err.error_code(), "INTERNAL");
    }

    #[test]
    fn test_retryable_classification() {
        assert!(FeatureError::ClusterIsNotReady { cluster_id: 1 }.is_retryable());
        assert!(FeatureError::Retryable("chart repo unavailable".to_string()).is_retryable());
        assert!(
            FeatureError::ClusterIsNotReady { cluster_id: 1 }
                .context("apply feature")
                .is_retryable()
        );
        assert!(
            !FeatureError::Operator {
                feature_name: "dns".to_string(),
                message: "boom".to_string()
            }
            .is_retryable()
        );
        assert!(!FeatureError::QueueFull.is_retryable());
    }
}
