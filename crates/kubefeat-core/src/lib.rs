// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! kubefeat Core - Cluster Feature Operation Engine
//!
//! This crate manages optional features (DNS, secret stores, ingress, ...)
//! attached to clusters. Callers activate, update or deactivate a feature;
//! the engine validates the request synchronously and runs the cluster-side
//! operation asynchronously, tracking progress in a persisted status.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Request handlers                         │
//! └─────────────────────────────────────────────────────────────────┘
//!                                 │
//!                                 ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         FeatureService                          │
//! │        validate → prepare → dispatch → persist (PENDING)        │
//! └─────────────────────────────────────────────────────────────────┘
//!        │ FeatureManager        │ dispatch              │ read/write
//!        ▼                       ▼                       ▼
//! ┌──────────────┐   ┌───────────────────────┐   ┌─────────────────┐
//! │  Registries  │   │ Local  │   Durable    │   │ FeatureRepository│
//! └──────────────┘   │ queue  │ job workflows│   └─────────────────┘
//!                    └───────────────────────┘            ▲
//!                                │ FeatureOperator        │
//!                                ▼                        │
//!                        apply / deactivate ──────────────┘
//!                                              ACTIVE / ERROR / deleted
//! ```
//!
//! # Feature Status
//!
//! | Status | Description |
//! |--------|-------------|
//! | `PENDING` | An operation was dispatched and has not finished |
//! | `ACTIVE` | The last apply finished successfully |
//! | `ERROR` | The last operation failed |
//!
//! A missing record means the feature was never activated or has been fully
//! deactivated.
//!
//! # Dispatchers
//!
//! | Dispatcher | Ordering | On failure |
//! |------------|----------|------------|
//! | Local | FIFO across everything, one worker | Marks `ERROR`, worker stops |
//! | Durable | Serialized per (cluster, feature), newest wins | Retryable errors retry on a timer; others mark `ERROR` |
//!
//! # Configuration
//!
//! Configuration is loaded from environment variables:
//!
//! | Variable | Required | Default | Description |
//! |----------|----------|---------|-------------|
//! | `KUBEFEAT_DATABASE_URL` | Yes | - | SQLite connection string |
//! | `KUBEFEAT_DISPATCHER` | No | `local` | `local` or `durable` |
//! | `KUBEFEAT_QUEUE_CAPACITY` | No | `32` | Local dispatcher queue capacity |
//! | `KUBEFEAT_RETRY_INTERVAL_SECS` | No | `60` | Retry delay for retryable failures |
//! | `KUBEFEAT_WORKFLOW_TIMEOUT_SECS` | No | `86400` | Job workflow execution timeout |
//! | `KUBEFEAT_JOB_WORKERS` | No | `4` | Durable job workers |
//! | `KUBEFEAT_JOB_POLL_INTERVAL_MS` | No | `1000` | Idle worker poll interval |
//! | `KUBEFEAT_JOB_LEASE_SECS` | No | `60` | Workflow lease duration |

#![deny(missing_docs)]

/// Configuration loaded from environment variables.
pub mod config;

/// Local and durable feature operation dispatchers.
pub mod dispatcher;

/// Error types with error code mapping.
pub mod error;

/// Feature manager, operator and cluster readiness contracts.
pub mod feature;

/// Embedded database migrations.
pub mod migrations;

/// Name-keyed manager and operator registries.
pub mod registry;

/// Feature record storage.
pub mod repository;

/// Embeddable runtime wiring all components together.
pub mod runtime;

/// The feature service entry point.
pub mod service;

/// Core data types.
pub mod types;

pub use config::{Config, ConfigError, DispatcherKind};
pub use dispatcher::{DurableDispatcher, FeatureOperationDispatcher, LocalDispatcher};
pub use error::{FeatureError, Result};
pub use feature::{AlwaysReady, ClusterService, FeatureManager, FeatureOperator};
pub use registry::{FeatureManagerRegistry, FeatureOperatorRegistry};
pub use repository::{FeatureRepository, InMemoryFeatureRepository, SqliteFeatureRepository};
pub use runtime::FeatureRuntime;
pub use service::FeatureService;
pub use types::{
    ClusterId, Feature, FeatureOutput, FeatureSpec, FeatureStatus, Job, Operation, merge_output,
};
