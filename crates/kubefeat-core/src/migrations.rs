// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Database migrations for kubefeat-core.
//!
//! Both the feature repository and the durable job store live in the same
//! SQLite schema. Products embedding kubefeat-core call [`run`] once at startup.
//!
//! # Example
//!
//! ```ignore
//! use sqlx::SqlitePool;
//! use kubefeat_core::migrations;
//!
//! let pool = SqlitePool::connect(&database_url).await?;
//! migrations::run(&pool).await?;
//! ```

use sqlx::migrate::MigrateError;

/// SQLite migrator with all kubefeat-core migrations embedded.
pub static SQLITE: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

/// Run SQLite migrations.
///
/// Applies all pending migrations to the database. Safe to call multiple times;
/// already-applied migrations are skipped.
pub async fn run(pool: &sqlx::SqlitePool) -> Result<(), MigrateError> {
    SQLITE.run(pool).await
}
