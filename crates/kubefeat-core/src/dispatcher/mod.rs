// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Feature operation dispatchers.
//!
//! A dispatcher accepts an operation and schedules its asynchronous
//! execution, returning as soon as the operation is durably (or, for the
//! local dispatcher, in-memory) queued. Two interchangeable backends exist:
//!
//! | Dispatcher | Ordering | Survives restarts |
//! |------------|----------|-------------------|
//! | [`LocalDispatcher`] | FIFO across all clusters and features, one worker | No |
//! | [`DurableDispatcher`] | Serialized per (cluster, feature), parallel across keys | Yes |

pub mod durable;
pub mod local;

pub use self::durable::DurableDispatcher;
pub use self::local::LocalDispatcher;

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{ClusterId, FeatureSpec};

/// Schedules feature operations for asynchronous execution.
#[async_trait]
pub trait FeatureOperationDispatcher: Send + Sync {
    /// Schedule an apply (activate or update) of `spec`.
    async fn dispatch_apply(
        &self,
        cluster_id: ClusterId,
        feature_name: &str,
        spec: &FeatureSpec,
    ) -> Result<()>;

    /// Schedule a deactivation; `spec` is the one the feature was created with.
    async fn dispatch_deactivate(
        &self,
        cluster_id: ClusterId,
        feature_name: &str,
        spec: &FeatureSpec,
    ) -> Result<()>;
}
