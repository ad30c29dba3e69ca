// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration loading from environment variables.

use std::str::FromStr;
use std::time::Duration;

use crate::dispatcher::durable::{DurableDispatcherConfig, JobWorkerConfig};
use crate::dispatcher::local::LocalDispatcherConfig;

/// Which dispatcher backend executes feature operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DispatcherKind {
    /// Bounded in-process queue with a single worker.
    #[default]
    Local,
    /// SQLite-backed workflows with a worker pool.
    Durable,
}

impl FromStr for DispatcherKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "durable" => Ok(Self::Durable),
            _ => Err(ConfigError::Invalid(
                "KUBEFEAT_DISPATCHER",
                "must be 'local' or 'durable'",
            )),
        }
    }
}

/// kubefeat configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite connection URL
    pub database_url: String,
    /// Dispatcher backend
    pub dispatcher: DispatcherKind,
    /// Local dispatcher queue capacity
    pub queue_capacity: usize,
    /// Delay before retrying a retryable failure (durable dispatcher)
    pub retry_interval: Duration,
    /// Maximum lifetime of a job workflow run (durable dispatcher)
    pub workflow_timeout: Duration,
    /// Number of job workers (durable dispatcher)
    pub job_workers: usize,
    /// Idle poll interval of job workers (durable dispatcher)
    pub job_poll_interval: Duration,
    /// Workflow lease duration (durable dispatcher)
    pub job_lease: Duration,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Required:
    /// - `KUBEFEAT_DATABASE_URL`: SQLite connection string
    ///
    /// Optional (with defaults):
    /// - `KUBEFEAT_DISPATCHER`: `local` or `durable` (default: local)
    /// - `KUBEFEAT_QUEUE_CAPACITY`: local queue capacity (default: 32)
    /// - `KUBEFEAT_RETRY_INTERVAL_SECS`: retry delay (default: 60)
    /// - `KUBEFEAT_WORKFLOW_TIMEOUT_SECS`: workflow execution timeout (default: 86400)
    /// - `KUBEFEAT_JOB_WORKERS`: worker count (default: 4)
    /// - `KUBEFEAT_JOB_POLL_INTERVAL_MS`: worker poll interval (default: 1000)
    /// - `KUBEFEAT_JOB_LEASE_SECS`: workflow lease (default: 60)
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = std::env::var("KUBEFEAT_DATABASE_URL")
            .map_err(|_| ConfigError::Missing("KUBEFEAT_DATABASE_URL"))?;

        let dispatcher = match std::env::var("KUBEFEAT_DISPATCHER") {
            Ok(value) => value.parse()?,
            Err(_) => DispatcherKind::default(),
        };

        let queue_capacity: usize = parse_env(
            "KUBEFEAT_QUEUE_CAPACITY",
            "32",
            "must be a non-negative integer",
        )?;
        let retry_interval_secs: u64 = parse_env(
            "KUBEFEAT_RETRY_INTERVAL_SECS",
            "60",
            "must be a number of seconds",
        )?;
        let workflow_timeout_secs: u64 = parse_env(
            "KUBEFEAT_WORKFLOW_TIMEOUT_SECS",
            "86400",
            "must be a number of seconds",
        )?;
        let job_workers: usize =
            parse_env("KUBEFEAT_JOB_WORKERS", "4", "must be a positive integer")?;
        if job_workers == 0 {
            return Err(ConfigError::Invalid(
                "KUBEFEAT_JOB_WORKERS",
                "must be a positive integer",
            ));
        }
        let job_poll_interval_ms: u64 = parse_env(
            "KUBEFEAT_JOB_POLL_INTERVAL_MS",
            "1000",
            "must be a number of milliseconds",
        )?;
        let job_lease_secs: u64 = parse_env(
            "KUBEFEAT_JOB_LEASE_SECS",
            "60",
            "must be a number of seconds",
        )?;

        Ok(Self {
            database_url,
            dispatcher,
            queue_capacity,
            retry_interval: Duration::from_secs(retry_interval_secs),
            workflow_timeout: Duration::from_secs(workflow_timeout_secs),
            job_workers,
            job_poll_interval: Duration::from_millis(job_poll_interval_ms),
            job_lease: Duration::from_secs(job_lease_secs),
        })
    }

    /// Local dispatcher settings.
    pub fn local_dispatcher(&self) -> LocalDispatcherConfig {
        LocalDispatcherConfig {
            queue_capacity: self.queue_capacity,
        }
    }

    /// Durable dispatcher settings.
    pub fn durable_dispatcher(&self) -> DurableDispatcherConfig {
        DurableDispatcherConfig {
            retry_interval: self.retry_interval,
            execution_timeout: self.workflow_timeout,
            ..DurableDispatcherConfig::default()
        }
    }

    /// Job worker pool settings.
    pub fn job_workers(&self) -> JobWorkerConfig {
        JobWorkerConfig {
            workers: self.job_workers,
            poll_interval: self.job_poll_interval,
            lease_duration: self.job_lease,
        }
    }
}

fn parse_env<T: FromStr>(
    key: &'static str,
    default: &str,
    problem: &'static str,
) -> Result<T, ConfigError> {
    std::env::var(key)
        .unwrap_or_else(|_| default.to_string())
        .parse()
        .map_err(|_| ConfigError::Invalid(key, problem))
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),

    /// An environment variable has an invalid value.
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, &'static str),
}
