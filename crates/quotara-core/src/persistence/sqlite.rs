// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! SQLite-backed persistence implementation.

use std::path::Path;

use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnection, SqlitePoolOptions};

use crate::entity::EntityRef;
use crate::error::{QuotaError, Result};

use super::{Persistence, QuotaRecord};

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations/sqlite");

/// Column rewritten by a replace operation.
#[derive(Debug, Clone, Copy)]
enum Column {
    Usage,
    Limit,
}

impl Column {
    fn name(self) -> &'static str {
        match self {
            Self::Usage => "usage",
            Self::Limit => "quota_limit",
        }
    }
}

/// SQLite-backed persistence provider.
#[derive(Clone)]
pub struct SqlitePersistence {
    pool: SqlitePool,
}

impl SqlitePersistence {
    /// Create a new SQLite persistence provider from an existing pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create and initialize a new SQLite persistence from a file path.
    ///
    /// Creates parent directories and the database file if needed, then runs
    /// all migrations.
    ///
    /// ```ignore
    /// let store = SqlitePersistence::from_path(".data/quotas.db").await?;
    /// ```
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                QuotaError::database(
                    "create_dir",
                    format!("Failed to create directory {:?}: {}", parent, e),
                )
            })?;
        }

        let url = format!("sqlite:{}?mode=rwc", path.to_string_lossy());
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await
            .map_err(|e| {
                QuotaError::database(
                    "connect",
                    format!("Failed to connect to SQLite at {:?}: {}", path, e),
                )
            })?;

        MIGRATOR.run(&pool).await?;

        Ok(Self { pool })
    }

    /// Private in-memory database with migrations applied.
    ///
    /// Uses a single connection, since every connection to `sqlite::memory:`
    /// opens a separate database.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| QuotaError::database("connect", e))?;

        MIGRATOR.run(&pool).await?;

        Ok(Self { pool })
    }

    /// Underlying pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Overwrite a column and return its previous value.
    ///
    /// `BEGIN IMMEDIATE` takes the write lock up front so that a concurrent
    /// writer cannot slip between the read and the update. The transaction
    /// rolls back when dropped, so a cancelled call leaves no lock behind.
    async fn replace_column(
        &self,
        column: Column,
        scope: &EntityRef,
        name: &str,
        value: f64,
    ) -> Result<Option<f64>> {
        let mut tx = self.pool.begin_with("BEGIN IMMEDIATE").await?;
        let previous = swap_column(&mut tx, column, scope, name, value).await?;
        tx.commit().await?;
        Ok(previous)
    }
}

async fn swap_column(
    conn: &mut SqliteConnection,
    column: Column,
    scope: &EntityRef,
    name: &str,
    value: f64,
) -> Result<Option<f64>> {
    let select = format!(
        "SELECT {} FROM quotas WHERE scope_type = ? AND scope_id = ? AND name = ?",
        column.name()
    );
    let previous: Option<(f64,)> = sqlx::query_as(&select)
        .bind(&scope.kind)
        .bind(&scope.id)
        .bind(name)
        .fetch_optional(&mut *conn)
        .await?;

    let Some((previous,)) = previous else {
        return Ok(None);
    };

    let update = format!(
        "UPDATE quotas SET {} = ?, updated_at = CURRENT_TIMESTAMP \
         WHERE scope_type = ? AND scope_id = ? AND name = ?",
        column.name()
    );
    sqlx::query(&update)
        .bind(value)
        .bind(&scope.kind)
        .bind(&scope.id)
        .bind(name)
        .execute(&mut *conn)
        .await?;

    Ok(Some(previous))
}

#[async_trait::async_trait]
impl Persistence for SqlitePersistence {
    async fn ensure_quota(&self, scope: &EntityRef, name: &str, limit: f64) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO quotas (scope_type, scope_id, name, quota_limit, usage)
            VALUES (?, ?, ?, ?, 0)
            ON CONFLICT (scope_type, scope_id, name) DO NOTHING
            "#,
        )
        .bind(&scope.kind)
        .bind(&scope.id)
        .bind(name)
        .bind(limit)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn get_quota(&self, scope: &EntityRef, name: &str) -> Result<Option<QuotaRecord>> {
        let record = sqlx::query_as::<_, QuotaRecord>(
            r#"
            SELECT id, scope_type, scope_id, name, quota_limit, usage, created_at, updated_at
            FROM quotas
            WHERE scope_type = ? AND scope_id = ? AND name = ?
            "#,
        )
        .bind(&scope.kind)
        .bind(&scope.id)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn list_quotas(&self, scope: &EntityRef) -> Result<Vec<QuotaRecord>> {
        let records = sqlx::query_as::<_, QuotaRecord>(
            r#"
            SELECT id, scope_type, scope_id, name, quota_limit, usage, created_at, updated_at
            FROM quotas
            WHERE scope_type = ? AND scope_id = ?
            ORDER BY name
            "#,
        )
        .bind(&scope.kind)
        .bind(&scope.id)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    async fn list_scope_ids(&self, scope_type: &str) -> Result<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT DISTINCT scope_id
            FROM quotas
            WHERE scope_type = ?
            ORDER BY scope_id
            "#,
        )
        .bind(scope_type)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    async fn list_scope_types(&self) -> Result<Vec<String>> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT DISTINCT scope_type FROM quotas ORDER BY scope_type")
                .fetch_all(&self.pool)
                .await?;

        Ok(rows.into_iter().map(|(t,)| t).collect())
    }

    async fn set_usage(&self, scope: &EntityRef, name: &str, usage: f64) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE quotas
            SET usage = ?, updated_at = CURRENT_TIMESTAMP
            WHERE scope_type = ? AND scope_id = ? AND name = ?
            "#,
        )
        .bind(usage)
        .bind(&scope.kind)
        .bind(&scope.id)
        .bind(name)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn add_usage(&self, scope: &EntityRef, name: &str, delta: f64) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE quotas
            SET usage = usage + ?, updated_at = CURRENT_TIMESTAMP
            WHERE scope_type = ? AND scope_id = ? AND name = ?
            "#,
        )
        .bind(delta)
        .bind(&scope.kind)
        .bind(&scope.id)
        .bind(name)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn replace_usage(
        &self,
        scope: &EntityRef,
        name: &str,
        usage: f64,
    ) -> Result<Option<f64>> {
        self.replace_column(Column::Usage, scope, name, usage).await
    }

    async fn set_limit(&self, scope: &EntityRef, name: &str, limit: f64) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE quotas
            SET quota_limit = ?, updated_at = CURRENT_TIMESTAMP
            WHERE scope_type = ? AND scope_id = ? AND name = ?
            "#,
        )
        .bind(limit)
        .bind(&scope.kind)
        .bind(&scope.id)
        .bind(name)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn replace_limit(
        &self,
        scope: &EntityRef,
        name: &str,
        limit: f64,
    ) -> Result<Option<f64>> {
        self.replace_column(Column::Limit, scope, name, limit).await
    }

    async fn delete_quota(&self, scope: &EntityRef, name: &str) -> Result<bool> {
        let result = sqlx::query(
            "DELETE FROM quotas WHERE scope_type = ? AND scope_id = ? AND name = ?",
        )
        .bind(&scope.kind)
        .bind(&scope.id)
        .bind(name)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_scope_quotas(&self, scope: &EntityRef) -> Result<u64> {
        let result = sqlx::query("DELETE FROM quotas WHERE scope_type = ? AND scope_id = ?")
            .bind(&scope.kind)
            .bind(&scope.id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    async fn health_check_db(&self) -> Result<bool> {
        let result: std::result::Result<(i64,), _> =
            sqlx::query_as("SELECT 1").fetch_one(&self.pool).await;
        Ok(result.is_ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Create an in-memory SQLite pool for testing.
    async fn test_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("Failed to create in-memory SQLite pool");

        MIGRATOR.run(&pool).await.expect("Failed to run migrations");

        pool
    }

    fn tenant() -> EntityRef {
        EntityRef::new("tenant", "t-1")
    }

    #[tokio::test]
    async fn test_ensure_and_get_quota() {
        let persistence = SqlitePersistence::new(test_pool().await);

        let created = persistence
            .ensure_quota(&tenant(), "vcpu", 20.0)
            .await
            .expect("Failed to ensure quota");
        assert!(created);

        let record = persistence
            .get_quota(&tenant(), "vcpu")
            .await
            .expect("Failed to get quota")
            .expect("Quota should exist");
        assert_eq!(record.scope(), tenant());
        assert_eq!(record.name, "vcpu");
        assert_eq!(record.limit, 20.0);
        assert_eq!(record.usage, 0.0);
    }

    #[tokio::test]
    async fn test_ensure_quota_is_idempotent() {
        let persistence = SqlitePersistence::new(test_pool().await);

        persistence.ensure_quota(&tenant(), "ram", 10.0).await.unwrap();
        persistence.add_usage(&tenant(), "ram", 4.0).await.unwrap();

        let created = persistence.ensure_quota(&tenant(), "ram", 99.0).await.unwrap();
        assert!(!created);

        let record = persistence.get_quota(&tenant(), "ram").await.unwrap().unwrap();
        assert_eq!(record.limit, 10.0, "Existing limit must be kept");
        assert_eq!(record.usage, 4.0, "Existing usage must be kept");
    }

    #[tokio::test]
    async fn test_get_quota_not_found() {
        let persistence = SqlitePersistence::new(test_pool().await);

        let result = persistence
            .get_quota(&tenant(), "nonexistent")
            .await
            .expect("Query should succeed");
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_add_usage_accumulates() {
        let persistence = SqlitePersistence::new(test_pool().await);
        persistence.ensure_quota(&tenant(), "storage", -1.0).await.unwrap();

        for delta in [10.0, 2.5, -4.0] {
            assert!(persistence.add_usage(&tenant(), "storage", delta).await.unwrap());
        }

        let record = persistence.get_quota(&tenant(), "storage").await.unwrap().unwrap();
        assert_eq!(record.usage, 8.5);
    }

    #[tokio::test]
    async fn test_add_usage_missing_record() {
        let persistence = SqlitePersistence::new(test_pool().await);
        let affected = persistence.add_usage(&tenant(), "storage", 1.0).await.unwrap();
        assert!(!affected);
    }

    #[tokio::test]
    async fn test_replace_returns_previous_value() {
        let persistence = SqlitePersistence::new(test_pool().await);
        persistence.ensure_quota(&tenant(), "ram", 10.0).await.unwrap();
        persistence.set_usage(&tenant(), "ram", 3.0).await.unwrap();

        let previous = persistence.replace_usage(&tenant(), "ram", 7.0).await.unwrap();
        assert_eq!(previous, Some(3.0));

        let previous = persistence.replace_limit(&tenant(), "ram", 50.0).await.unwrap();
        assert_eq!(previous, Some(10.0));

        let record = persistence.get_quota(&tenant(), "ram").await.unwrap().unwrap();
        assert_eq!((record.usage, record.limit), (7.0, 50.0));

        let missing = persistence.replace_usage(&tenant(), "vcpu", 1.0).await.unwrap();
        assert_eq!(missing, None);

        // The connection must be usable after both commit and early return.
        assert!(persistence.health_check_db().await.unwrap());
    }

    #[tokio::test]
    async fn test_cancelled_replace_leaves_connection_usable() {
        let persistence = SqlitePersistence::in_memory().await.unwrap();
        persistence.ensure_quota(&tenant(), "ram", 10.0).await.unwrap();

        for i in 0..200u64 {
            // Drop the replace at varying points, including mid-transaction.
            let _ = tokio::time::timeout(
                std::time::Duration::from_micros(i % 60),
                persistence.replace_usage(&tenant(), "ram", i as f64),
            )
            .await;

            persistence
                .replace_usage(&tenant(), "ram", 1000.0 + i as f64)
                .await
                .unwrap_or_else(|e| panic!("replace after cancellation {} failed: {}", i, e));
            persistence
                .replace_limit(&tenant(), "ram", 20.0)
                .await
                .unwrap_or_else(|e| panic!("replace_limit after cancellation {} failed: {}", i, e));
        }

        let record = persistence.get_quota(&tenant(), "ram").await.unwrap().unwrap();
        assert_eq!(record.usage, 1199.0);
        assert_eq!(record.limit, 20.0);
    }

    #[tokio::test]
    async fn test_list_and_delete() {
        let persistence = SqlitePersistence::new(test_pool().await);
        let other = EntityRef::new("tenant", "t-2");
        for name in ["vcpu", "ram", "storage"] {
            persistence.ensure_quota(&tenant(), name, -1.0).await.unwrap();
        }
        persistence.ensure_quota(&other, "ram", -1.0).await.unwrap();
        persistence
            .ensure_quota(&EntityRef::new("project", "p-1"), "ram", -1.0)
            .await
            .unwrap();

        let names: Vec<String> = persistence
            .list_quotas(&tenant())
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.name)
            .collect();
        assert_eq!(names, ["ram", "storage", "vcpu"]);

        assert_eq!(
            persistence.list_scope_ids("tenant").await.unwrap(),
            ["t-1", "t-2"]
        );
        assert_eq!(
            persistence.list_scope_types().await.unwrap(),
            ["project", "tenant"]
        );

        assert!(persistence.delete_quota(&tenant(), "vcpu").await.unwrap());
        assert!(!persistence.delete_quota(&tenant(), "vcpu").await.unwrap());

        let deleted = persistence.delete_scope_quotas(&tenant()).await.unwrap();
        assert_eq!(deleted, 2);
        assert!(persistence.list_quotas(&tenant()).await.unwrap().is_empty());
        assert_eq!(persistence.list_quotas(&other).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_set_limit() {
        let persistence = SqlitePersistence::new(test_pool().await);
        assert!(!persistence.set_limit(&tenant(), "ram", 5.0).await.unwrap());

        persistence.ensure_quota(&tenant(), "ram", -1.0).await.unwrap();
        assert!(persistence.set_limit(&tenant(), "ram", 5.0).await.unwrap());
        let record = persistence.get_quota(&tenant(), "ram").await.unwrap().unwrap();
        assert!(!record.is_unlimited());
    }

    #[tokio::test]
    async fn test_from_path_creates_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("quotas.db");

        let persistence = SqlitePersistence::from_path(&path)
            .await
            .expect("Failed to open file database");
        persistence.ensure_quota(&tenant(), "ram", 1.0).await.unwrap();

        assert!(path.exists());
        assert!(persistence.health_check_db().await.unwrap());
    }

    #[tokio::test]
    async fn test_health_check_db() {
        let persistence = SqlitePersistence::in_memory().await.unwrap();

        let healthy = persistence
            .health_check_db()
            .await
            .expect("Health check failed");
        assert!(healthy);
    }
}
