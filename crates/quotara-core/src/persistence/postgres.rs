// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! PostgreSQL-backed persistence implementation.
//!
//! Every operation is a free function over a [`PgPool`] so that it can be
//! reused from host transactions; [`PostgresPersistence`] delegates to them.

use sqlx::PgPool;

use crate::entity::EntityRef;
use crate::error::Result;

use super::{Persistence, QuotaRecord};

/// PostgreSQL-backed persistence implementation.
#[derive(Clone)]
pub struct PostgresPersistence {
    pool: PgPool,
}

impl PostgresPersistence {
    /// Create a new Postgres-backed persistence implementation.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Underlying pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

// ============================================================================
// Record Operations
// ============================================================================

/// Insert a quota record unless it already exists.
pub async fn ensure_quota(
    pool: &PgPool,
    scope: &EntityRef,
    name: &str,
    limit: f64,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        INSERT INTO quotas (scope_type, scope_id, name, quota_limit, usage)
        VALUES ($1, $2, $3, $4, 0)
        ON CONFLICT (scope_type, scope_id, name) DO NOTHING
        "#,
    )
    .bind(&scope.kind)
    .bind(&scope.id)
    .bind(name)
    .bind(limit)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Fetch a single quota record.
pub async fn get_quota(
    pool: &PgPool,
    scope: &EntityRef,
    name: &str,
) -> Result<Option<QuotaRecord>> {
    let record = sqlx::query_as::<_, QuotaRecord>(
        r#"
        SELECT id, scope_type, scope_id, name, quota_limit, usage, created_at, updated_at
        FROM quotas
        WHERE scope_type = $1 AND scope_id = $2 AND name = $3
        "#,
    )
    .bind(&scope.kind)
    .bind(&scope.id)
    .bind(name)
    .fetch_optional(pool)
    .await?;

    Ok(record)
}

/// All records of a scope ordered by name.
pub async fn list_quotas(pool: &PgPool, scope: &EntityRef) -> Result<Vec<QuotaRecord>> {
    let records = sqlx::query_as::<_, QuotaRecord>(
        r#"
        SELECT id, scope_type, scope_id, name, quota_limit, usage, created_at, updated_at
        FROM quotas
        WHERE scope_type = $1 AND scope_id = $2
        ORDER BY name
        "#,
    )
    .bind(&scope.kind)
    .bind(&scope.id)
    .fetch_all(pool)
    .await?;

    Ok(records)
}

/// Distinct scope ids with records of `scope_type`.
pub async fn list_scope_ids(pool: &PgPool, scope_type: &str) -> Result<Vec<String>> {
    let rows: Vec<(String,)> = sqlx::query_as(
        r#"
        SELECT DISTINCT scope_id
        FROM quotas
        WHERE scope_type = $1
        ORDER BY scope_id
        "#,
    )
    .bind(scope_type)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|(id,)| id).collect())
}

/// Distinct scope types with records.
pub async fn list_scope_types(pool: &PgPool) -> Result<Vec<String>> {
    let rows: Vec<(String,)> =
        sqlx::query_as("SELECT DISTINCT scope_type FROM quotas ORDER BY scope_type")
            .fetch_all(pool)
            .await?;

    Ok(rows.into_iter().map(|(t,)| t).collect())
}

/// Delete one record.
pub async fn delete_quota(pool: &PgPool, scope: &EntityRef, name: &str) -> Result<bool> {
    let result =
        sqlx::query("DELETE FROM quotas WHERE scope_type = $1 AND scope_id = $2 AND name = $3")
            .bind(&scope.kind)
            .bind(&scope.id)
            .bind(name)
            .execute(pool)
            .await?;

    Ok(result.rows_affected() > 0)
}

/// Delete every record of a scope.
pub async fn delete_scope_quotas(pool: &PgPool, scope: &EntityRef) -> Result<u64> {
    let result = sqlx::query("DELETE FROM quotas WHERE scope_type = $1 AND scope_id = $2")
        .bind(&scope.kind)
        .bind(&scope.id)
        .execute(pool)
        .await?;

    Ok(result.rows_affected())
}

// ============================================================================
// Usage and Limit Operations
// ============================================================================

/// Overwrite usage.
pub async fn set_usage(pool: &PgPool, scope: &EntityRef, name: &str, usage: f64) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE quotas
        SET usage = $1, updated_at = NOW()
        WHERE scope_type = $2 AND scope_id = $3 AND name = $4
        "#,
    )
    .bind(usage)
    .bind(&scope.kind)
    .bind(&scope.id)
    .bind(name)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Add `delta` to usage in a single statement.
pub async fn add_usage(pool: &PgPool, scope: &EntityRef, name: &str, delta: f64) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE quotas
        SET usage = usage + $1, updated_at = NOW()
        WHERE scope_type = $2 AND scope_id = $3 AND name = $4
        "#,
    )
    .bind(delta)
    .bind(&scope.kind)
    .bind(&scope.id)
    .bind(name)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Overwrite the limit.
pub async fn set_limit(pool: &PgPool, scope: &EntityRef, name: &str, limit: f64) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE quotas
        SET quota_limit = $1, updated_at = NOW()
        WHERE scope_type = $2 AND scope_id = $3 AND name = $4
        "#,
    )
    .bind(limit)
    .bind(&scope.kind)
    .bind(&scope.id)
    .bind(name)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Overwrite usage under a row lock and return the previous value.
pub async fn replace_usage(
    pool: &PgPool,
    scope: &EntityRef,
    name: &str,
    usage: f64,
) -> Result<Option<f64>> {
    let mut tx = pool.begin().await?;

    let previous: Option<(f64,)> = sqlx::query_as(
        r#"
        SELECT usage FROM quotas
        WHERE scope_type = $1 AND scope_id = $2 AND name = $3
        FOR UPDATE
        "#,
    )
    .bind(&scope.kind)
    .bind(&scope.id)
    .bind(name)
    .fetch_optional(&mut *tx)
    .await?;

    let Some((previous,)) = previous else {
        return Ok(None);
    };

    sqlx::query(
        r#"
        UPDATE quotas
        SET usage = $1, updated_at = NOW()
        WHERE scope_type = $2 AND scope_id = $3 AND name = $4
        "#,
    )
    .bind(usage)
    .bind(&scope.kind)
    .bind(&scope.id)
    .bind(name)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(Some(previous))
}

/// Overwrite the limit under a row lock and return the previous value.
pub async fn replace_limit(
    pool: &PgPool,
    scope: &EntityRef,
    name: &str,
    limit: f64,
) -> Result<Option<f64>> {
    let mut tx = pool.begin().await?;

    let previous: Option<(f64,)> = sqlx::query_as(
        r#"
        SELECT quota_limit FROM quotas
        WHERE scope_type = $1 AND scope_id = $2 AND name = $3
        FOR UPDATE
        "#,
    )
    .bind(&scope.kind)
    .bind(&scope.id)
    .bind(name)
    .fetch_optional(&mut *tx)
    .await?;

    let Some((previous,)) = previous else {
        return Ok(None);
    };

    sqlx::query(
        r#"
        UPDATE quotas
        SET quota_limit = $1, updated_at = NOW()
        WHERE scope_type = $2 AND scope_id = $3 AND name = $4
        "#,
    )
    .bind(limit)
    .bind(&scope.kind)
    .bind(&scope.id)
    .bind(name)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(Some(previous))
}

/// Check database connectivity.
pub async fn health_check_db(pool: &PgPool) -> Result<bool> {
    let result: std::result::Result<(i32,), _> =
        sqlx::query_as("SELECT 1").fetch_one(pool).await;
    Ok(result.is_ok())
}

#[async_trait::async_trait]
impl Persistence for PostgresPersistence {
    async fn ensure_quota(&self, scope: &EntityRef, name: &str, limit: f64) -> Result<bool> {
        ensure_quota(&self.pool, scope, name, limit).await
    }

    async fn get_quota(&self, scope: &EntityRef, name: &str) -> Result<Option<QuotaRecord>> {
        get_quota(&self.pool, scope, name).await
    }

    async fn list_quotas(&self, scope: &EntityRef) -> Result<Vec<QuotaRecord>> {
        list_quotas(&self.pool, scope).await
    }

    async fn list_scope_ids(&self, scope_type: &str) -> Result<Vec<String>> {
        list_scope_ids(&self.pool, scope_type).await
    }

    async fn list_scope_types(&self) -> Result<Vec<String>> {
        list_scope_types(&self.pool).await
    }

    async fn set_usage(&self, scope: &EntityRef, name: &str, usage: f64) -> Result<bool> {
        set_usage(&self.pool, scope, name, usage).await
    }

    async fn add_usage(&self, scope: &EntityRef, name: &str, delta: f64) -> Result<bool> {
        add_usage(&self.pool, scope, name, delta).await
    }

    async fn replace_usage(
        &self,
        scope: &EntityRef,
        name: &str,
        usage: f64,
    ) -> Result<Option<f64>> {
        replace_usage(&self.pool, scope, name, usage).await
    }

    async fn set_limit(&self, scope: &EntityRef, name: &str, limit: f64) -> Result<bool> {
        set_limit(&self.pool, scope, name, limit).await
    }

    async fn replace_limit(
        &self,
        scope: &EntityRef,
        name: &str,
        limit: f64,
    ) -> Result<Option<f64>> {
        replace_limit(&self.pool, scope, name, limit).await
    }

    async fn delete_quota(&self, scope: &EntityRef, name: &str) -> Result<bool> {
        delete_quota(&self.pool, scope, name).await
    }

    async fn delete_scope_quotas(&self, scope: &EntityRef) -> Result<u64> {
        delete_scope_quotas(&self.pool, scope).await
    }

    async fn health_check_db(&self) -> Result<bool> {
        health_check_db(&self.pool).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations/postgresql");

    // Helper to get a test database pool
    async fn test_pool() -> Option<PgPool> {
        let url = std::env::var("TEST_DATABASE_URL").ok()?;
        let pool = PgPool::connect(&url).await.ok()?;
        MIGRATOR.run(&pool).await.ok()?;
        Some(pool)
    }

    fn unique_scope() -> EntityRef {
        EntityRef::new("tenant", Uuid::new_v4().to_string())
    }

    #[tokio::test]
    async fn test_ensure_add_and_replace() {
        let Some(pool) = test_pool().await else {
            eprintln!("Skipping test: TEST_DATABASE_URL not set");
            return;
        };
        let scope = unique_scope();

        assert!(ensure_quota(&pool, &scope, "ram", 10.0).await.unwrap());
        assert!(!ensure_quota(&pool, &scope, "ram", 99.0).await.unwrap());

        add_usage(&pool, &scope, "ram", 3.0).await.unwrap();
        add_usage(&pool, &scope, "ram", 1.5).await.unwrap();

        let previous = replace_usage(&pool, &scope, "ram", 2.0).await.unwrap();
        assert_eq!(previous, Some(4.5));

        let previous = replace_limit(&pool, &scope, "ram", -1.0).await.unwrap();
        assert_eq!(previous, Some(10.0));

        let record = get_quota(&pool, &scope, "ram").await.unwrap().unwrap();
        assert_eq!(record.usage, 2.0);
        assert!(record.is_unlimited());

        assert_eq!(delete_scope_quotas(&pool, &scope).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_missing_record_is_reported() {
        let Some(pool) = test_pool().await else {
            eprintln!("Skipping test: TEST_DATABASE_URL not set");
            return;
        };
        let scope = unique_scope();

        assert!(!add_usage(&pool, &scope, "ram", 1.0).await.unwrap());
        assert_eq!(replace_usage(&pool, &scope, "ram", 1.0).await.unwrap(), None);
        assert!(get_quota(&pool, &scope, "ram").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_health_check_db() {
        let Some(pool) = test_pool().await else {
            eprintln!("Skipping test: TEST_DATABASE_URL not set");
            return;
        };

        let result = health_check_db(&pool).await;
        assert!(result.is_ok());
        assert!(result.unwrap());
    }
}
