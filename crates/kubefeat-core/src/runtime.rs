// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Embeddable runtime for kubefeat-core.
//!
//! [`FeatureRuntime`] wires the repository, dispatcher and (for the durable
//! dispatcher) the job worker pool around one SQLite pool, and hands out a
//! ready [`FeatureService`].
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use kubefeat_core::config::Config;
//! use kubefeat_core::runtime::FeatureRuntime;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let pool = sqlx::SqlitePool::connect(&config.database_url).await?;
//!
//!     let runtime = FeatureRuntime::builder()
//!         .pool(pool)
//!         .managers(managers)
//!         .operators(operators)
//!         .config(&config)
//!         .build()?
//!         .start()
//!         .await?;
//!
//!     runtime.service().activate(1, "dns", spec).await?;
//!
//!     runtime.shutdown().await?;
//!     Ok(())
//! }
//! ```

use std::sync::Arc;

use anyhow::Result;
use sqlx::SqlitePool;
use tracing::info;

use crate::config::{Config, DispatcherKind};
use crate::dispatcher::FeatureOperationDispatcher;
use crate::dispatcher::durable::{
    DurableDispatcher, DurableDispatcherConfig, FeatureActivities, JobWorkerConfig, JobWorkerPool,
    JobWorkerPoolHandle, SqliteJobStore,
};
use crate::dispatcher::local::{LocalDispatcher, LocalDispatcherConfig};
use crate::feature::{AlwaysReady, ClusterService};
use crate::registry::{FeatureManagerRegistry, FeatureOperatorRegistry};
use crate::repository::{FeatureRepository, SqliteFeatureRepository};
use crate::service::FeatureService;

/// Builder for creating a [`FeatureRuntime`].
#[derive(Default)]
pub struct FeatureRuntimeBuilder {
    pool: Option<SqlitePool>,
    managers: Option<Arc<FeatureManagerRegistry>>,
    operators: Option<Arc<FeatureOperatorRegistry>>,
    cluster_service: Option<Arc<dyn ClusterService>>,
    dispatcher: DispatcherKind,
    local: LocalDispatcherConfig,
    durable: DurableDispatcherConfig,
    workers: JobWorkerConfig,
}

impl std::fmt::Debug for FeatureRuntimeBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeatureRuntimeBuilder")
            .field("pool", &self.pool.as_ref().map(|_| "..."))
            .field("managers", &self.managers)
            .field("operators", &self.operators)
            .field("dispatcher", &self.dispatcher)
            .finish()
    }
}

impl FeatureRuntimeBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the SQLite pool (required). Migrations run on start.
    pub fn pool(mut self, pool: SqlitePool) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Set the feature managers (required).
    pub fn managers(mut self, managers: FeatureManagerRegistry) -> Self {
        self.managers = Some(Arc::new(managers));
        self
    }

    /// Set the feature operators (required).
    pub fn operators(mut self, operators: FeatureOperatorRegistry) -> Self {
        self.operators = Some(Arc::new(operators));
        self
    }

    /// Set the cluster readiness check.
    ///
    /// Default: every cluster is ready.
    pub fn cluster_service(mut self, cluster_service: Arc<dyn ClusterService>) -> Self {
        self.cluster_service = Some(cluster_service);
        self
    }

    /// Select the dispatcher backend.
    ///
    /// Default: [`DispatcherKind::Local`]
    pub fn dispatcher(mut self, dispatcher: DispatcherKind) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    /// Set the local dispatcher settings.
    pub fn local_dispatcher(mut self, config: LocalDispatcherConfig) -> Self {
        self.local = config;
        self
    }

    /// Set the durable dispatcher settings.
    pub fn durable_dispatcher(mut self, config: DurableDispatcherConfig) -> Self {
        self.durable = config;
        self
    }

    /// Set the job worker pool settings (durable dispatcher only).
    pub fn job_workers(mut self, config: JobWorkerConfig) -> Self {
        self.workers = config;
        self
    }

    /// Take dispatcher and worker settings from an environment [`Config`].
    pub fn config(self, config: &Config) -> Self {
        self.dispatcher(config.dispatcher)
            .local_dispatcher(config.local_dispatcher())
            .durable_dispatcher(config.durable_dispatcher())
            .job_workers(config.job_workers())
    }

    /// Build the runtime configuration.
    ///
    /// Returns an error if required fields are missing.
    pub fn build(self) -> Result<FeatureRuntimeConfig> {
        let pool = self
            .pool
            .ok_or_else(|| anyhow::anyhow!("database pool is required"))?;
        let managers = self
            .managers
            .ok_or_else(|| anyhow::anyhow!("feature managers are required"))?;
        let operators = self
            .operators
            .ok_or_else(|| anyhow::anyhow!("feature operators are required"))?;

        Ok(FeatureRuntimeConfig {
            pool,
            managers,
            operators,
            cluster_service: self
                .cluster_service
                .unwrap_or_else(|| Arc::new(AlwaysReady)),
            dispatcher: self.dispatcher,
            local: self.local,
            durable: self.durable,
            workers: self.workers,
        })
    }
}

/// Configuration for a [`FeatureRuntime`].
pub struct FeatureRuntimeConfig {
    pool: SqlitePool,
    managers: Arc<FeatureManagerRegistry>,
    operators: Arc<FeatureOperatorRegistry>,
    cluster_service: Arc<dyn ClusterService>,
    dispatcher: DispatcherKind,
    local: LocalDispatcherConfig,
    durable: DurableDispatcherConfig,
    workers: JobWorkerConfig,
}

impl std::fmt::Debug for FeatureRuntimeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeatureRuntimeConfig")
            .field("pool", &"...")
            .field("dispatcher", &self.dispatcher)
            .field("local", &self.local)
            .field("durable", &self.durable)
            .field("workers", &self.workers)
            .finish()
    }
}

impl FeatureRuntimeConfig {
    /// Run migrations, build the dispatcher and start its workers.
    pub async fn start(self) -> Result<FeatureRuntime> {
        crate::migrations::run(&self.pool).await?;

        let repository: Arc<dyn FeatureRepository> =
            Arc::new(SqliteFeatureRepository::new(self.pool.clone()));

        let (dispatcher, backend): (Arc<dyn FeatureOperationDispatcher>, Backend) =
            match self.dispatcher {
                DispatcherKind::Local => {
                    let local = Arc::new(LocalDispatcher::new(
                        self.local,
                        self.operators,
                        repository.clone(),
                    ));
                    (local.clone(), Backend::Local(local))
                }
                DispatcherKind::Durable => {
                    let store = Arc::new(SqliteJobStore::new(self.pool.clone()));
                    let durable = DurableDispatcher::new(store.clone(), self.durable);
                    let workers = JobWorkerPool::new(
                        store,
                        FeatureActivities::new(self.operators, repository.clone()),
                        self.workers,
                        durable.wake_handle(),
                    )
                    .spawn();
                    (Arc::new(durable), Backend::Durable(workers))
                }
            };

        let service = FeatureService::new(self.managers, dispatcher, repository.clone())
            .with_cluster_service(self.cluster_service);

        info!(dispatcher = ?self.dispatcher, "FeatureRuntime started");

        Ok(FeatureRuntime {
            service,
            repository,
            backend,
        })
    }
}

enum Backend {
    Local(Arc<LocalDispatcher>),
    Durable(JobWorkerPoolHandle),
}

/// A running feature engine that can be embedded in an application.
///
/// Call [`shutdown`](Self::shutdown) for graceful termination.
pub struct FeatureRuntime {
    service: FeatureService,
    repository: Arc<dyn FeatureRepository>,
    backend: Backend,
}

impl FeatureRuntime {
    /// Create a new builder for configuring the runtime.
    pub fn builder() -> FeatureRuntimeBuilder {
        FeatureRuntimeBuilder::new()
    }

    /// The feature service backed by this runtime.
    pub fn service(&self) -> &FeatureService {
        &self.service
    }

    /// The feature repository backed by this runtime.
    pub fn repository(&self) -> &Arc<dyn FeatureRepository> {
        &self.repository
    }

    /// Check if the dispatcher is still executing operations.
    pub fn is_running(&self) -> bool {
        match &self.backend {
            Backend::Local(local) => local.is_running(),
            Backend::Durable(workers) => workers.is_running(),
        }
    }

    /// Gracefully shut down the runtime.
    ///
    /// Durable workers finish their current workflow slice first. The local
    /// worker finishes its in-flight job; jobs still queued are dropped.
    pub async fn shutdown(self) -> Result<()> {
        info!("FeatureRuntime shutting down...");

        match self.backend {
            Backend::Local(local) => local.shutdown().await,
            Backend::Durable(workers) => workers.shutdown().await,
        }

        info!("FeatureRuntime shutdown complete");
        Ok(())
    }
}
