// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! SQLite-backed feature repository.

use std::path::Path;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;

use super::FeatureRepository;
use crate::error::{FeatureError, Result};
use crate::types::{ClusterId, Feature, FeatureOutput, FeatureSpec, FeatureStatus};

/// Raw `cluster_features` row.
#[derive(Debug, sqlx::FromRow)]
struct FeatureRow {
    cluster_id: i64,
    feature_name: String,
    spec: String,
    output: String,
    status: String,
}

impl TryFrom<FeatureRow> for Feature {
    type Error = FeatureError;

    fn try_from(row: FeatureRow) -> Result<Self> {
        let status = row
            .status
            .parse::<FeatureStatus>()
            .map_err(|e| FeatureError::Repository(e.to_string()))?;

        Ok(Feature {
            cluster_id: row.cluster_id as ClusterId,
            name: row.feature_name,
            spec: serde_json::from_str::<FeatureSpec>(&row.spec)?,
            output: serde_json::from_str::<FeatureOutput>(&row.output)?,
            status,
        })
    }
}

/// SQLite-backed feature repository.
#[derive(Clone)]
pub struct SqliteFeatureRepository {
    pool: SqlitePool,
}

impl SqliteFeatureRepository {
    /// Create a repository from an existing, migrated pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create and initialize a repository from a database file path.
    ///
    /// Creates parent directories and the database file if needed, then runs
    /// all migrations.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                FeatureError::Repository(format!(
                    "failed to create directory {:?}: {}",
                    parent, e
                ))
            })?;
        }

        let url = format!("sqlite:{}?mode=rwc", path.to_string_lossy());
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await?;

        crate::migrations::run(&pool).await?;

        Ok(Self { pool })
    }

    /// The underlying connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl FeatureRepository for SqliteFeatureRepository {
    async fn get_features(&self, cluster_id: ClusterId) -> Result<Vec<Feature>> {
        let rows = sqlx::query_as::<_, FeatureRow>(
            r#"
            SELECT cluster_id, feature_name, spec, output, status
            FROM cluster_features
            WHERE cluster_id = ?
            ORDER BY feature_name
            "#,
        )
        .bind(cluster_id as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Feature::try_from).collect()
    }

    async fn get_feature(&self, cluster_id: ClusterId, name: &str) -> Result<Feature> {
        let row = sqlx::query_as::<_, FeatureRow>(
            r#"
            SELECT cluster_id, feature_name, spec, output, status
            FROM cluster_features
            WHERE cluster_id = ? AND feature_name = ?
            "#,
        )
        .bind(cluster_id as i64)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Feature::try_from(row),
            None => Err(FeatureError::FeatureNotFound {
                cluster_id,
                feature_name: name.to_string(),
            }),
        }
    }

    async fn save_feature(
        &self,
        cluster_id: ClusterId,
        name: &str,
        spec: &FeatureSpec,
        status: FeatureStatus,
    ) -> Result<()> {
        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO cluster_features (cluster_id, feature_name, spec, output, status, created_at, updated_at)
            VALUES (?1, ?2, ?3, '{}', ?4, ?5, ?5)
            ON CONFLICT (cluster_id, feature_name) DO UPDATE
            SET spec = excluded.spec,
                status = excluded.status,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(cluster_id as i64)
        .bind(name)
        .bind(serde_json::to_string(spec)?)
        .bind(status.as_str())
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn update_feature_status(
        &self,
        cluster_id: ClusterId,
        name: &str,
        status: FeatureStatus,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE cluster_features
            SET status = ?1, updated_at = ?2
            WHERE cluster_id = ?3 AND feature_name = ?4
            "#,
        )
        .bind(status.as_str())
        .bind(Utc::now())
        .bind(cluster_id as i64)
        .bind(name)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(FeatureError::FeatureNotFound {
                cluster_id,
                feature_name: name.to_string(),
            });
        }

        Ok(())
    }

    async fn update_feature_spec(
        &self,
        cluster_id: ClusterId,
        name: &str,
        spec: &FeatureSpec,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE cluster_features
            SET spec = ?1, updated_at = ?2
            WHERE cluster_id = ?3 AND feature_name = ?4
            "#,
        )
        .bind(serde_json::to_string(spec)?)
        .bind(Utc::now())
        .bind(cluster_id as i64)
        .bind(name)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(FeatureError::FeatureNotFound {
                cluster_id,
                feature_name: name.to_string(),
            });
        }

        Ok(())
    }

    async fn delete_feature(&self, cluster_id: ClusterId, name: &str) -> Result<()> {
        sqlx::query(
            r#"
            DELETE FROM cluster_features
            WHERE cluster_id = ? AND feature_name = ?
            "#,
        )
        .bind(cluster_id as i64)
        .bind(name)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    /// Create an in-memory SQLite pool for testing.
    async fn test_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("Failed to create in-memory SQLite pool");

        crate::migrations::run(&pool)
            .await
            .expect("Failed to run migrations");

        pool
    }

    fn spec(value: serde_json::Value) -> FeatureSpec {
        value.as_object().cloned().unwrap_or_default()
    }

    #[tokio::test]
    async fn test_save_and_get_feature() {
        let repo = SqliteFeatureRepository::new(test_pool().await);

        repo.save_feature(
            1,
            "dns",
            &spec(json!({"provider": {"name": "route53"}})),
            FeatureStatus::Pending,
        )
        .await
        .expect("Failed to save feature");

        let feature = repo.get_feature(1, "dns").await.expect("Feature should exist");
        assert_eq!(feature.cluster_id, 1);
        assert_eq!(feature.name, "dns");
        assert_eq!(feature.status, FeatureStatus::Pending);
        assert_eq!(feature.spec["provider"]["name"], "route53");
        assert!(feature.output.is_empty());
    }

    #[tokio::test]
    async fn test_get_feature_not_found() {
        let repo = SqliteFeatureRepository::new(test_pool().await);

        let err = repo.get_feature(1, "dns").await.unwrap_err();
        assert!(matches!(
            err,
            FeatureError::FeatureNotFound { cluster_id: 1, ref feature_name } if feature_name == "dns"
        ));
    }

    #[tokio::test]
    async fn test_save_is_upsert() {
        let repo = SqliteFeatureRepository::new(test_pool().await);

        repo.save_feature(1, "dns", &spec(json!({"v": 1})), FeatureStatus::Active)
            .await
            .unwrap();
        repo.save_feature(1, "dns", &spec(json!({"v": 2})), FeatureStatus::Pending)
            .await
            .unwrap();

        let features = repo.get_features(1).await.unwrap();
        assert_eq!(features.len(), 1);
        assert_eq!(features[0].spec["v"], 2);
        assert_eq!(features[0].status, FeatureStatus::Pending);
    }

    #[tokio::test]
    async fn test_update_status_and_spec() {
        let repo = SqliteFeatureRepository::new(test_pool().await);
        repo.save_feature(3, "vault", &FeatureSpec::new(), FeatureStatus::Pending)
            .await
            .unwrap();

        repo.update_feature_status(3, "vault", FeatureStatus::Active)
            .await
            .unwrap();
        repo.update_feature_spec(3, "vault", &spec(json!({"role": "admin"})))
            .await
            .unwrap();

        let feature = repo.get_feature(3, "vault").await.unwrap();
        assert_eq!(feature.status, FeatureStatus::Active);
        assert_eq!(feature.spec["role"], "admin");
    }

    #[tokio::test]
    async fn test_update_status_missing_record() {
        let repo = SqliteFeatureRepository::new(test_pool().await);

        let result = repo
            .update_feature_status(1, "dns", FeatureStatus::Error)
            .await;
        assert!(matches!(result, Err(FeatureError::FeatureNotFound { .. })));
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let repo = SqliteFeatureRepository::new(test_pool().await);
        repo.save_feature(1, "dns", &FeatureSpec::new(), FeatureStatus::Active)
            .await
            .unwrap();

        repo.delete_feature(1, "dns").await.unwrap();
        repo.delete_feature(1, "dns").await.unwrap();

        assert!(repo.get_features(1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_get_features_scoped_to_cluster() {
        let repo = SqliteFeatureRepository::new(test_pool().await);
        repo.save_feature(1, "vault", &FeatureSpec::new(), FeatureStatus::Active)
            .await
            .unwrap();
        repo.save_feature(1, "dns", &FeatureSpec::new(), FeatureStatus::Pending)
            .await
            .unwrap();
        repo.save_feature(2, "dns", &FeatureSpec::new(), FeatureStatus::Pending)
            .await
            .unwrap();

        let names: Vec<String> = repo
            .get_features(1)
            .await
            .unwrap()
            .into_iter()
            .map(|f| f.name)
            .collect();
        assert_eq!(names, vec!["dns", "vault"]);
    }

    #[tokio::test]
    async fn test_from_path_creates_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("features.db");

        let repo = SqliteFeatureRepository::from_path(&path).await.unwrap();
        repo.save_feature(1, "dns", &FeatureSpec::new(), FeatureStatus::Pending)
            .await
            .unwrap();

        assert!(path.exists());
        assert_eq!(repo.get_features(1).await.unwrap().len(), 1);
    }
}
