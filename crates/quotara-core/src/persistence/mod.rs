// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Persistence interfaces and backends for quotara-core.
//!
//! This module defines the quota store abstraction and backend implementations.

pub mod postgres;
pub mod sqlite;

pub use self::postgres::PostgresPersistence;
pub use self::sqlite::SqlitePersistence;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::entity::EntityRef;
use crate::error::Result;

/// Quota record from the persistence layer.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct QuotaRecord {
    /// Database primary key.
    pub id: i64,
    /// Kind of the owning scope.
    pub scope_type: String,
    /// Id of the owning scope.
    pub scope_id: String,
    /// Quota name, unique per scope.
    pub name: String,
    /// Limit; negative means unlimited.
    #[sqlx(rename = "quota_limit")]
    pub limit: f64,
    /// Current usage.
    pub usage: f64,
    /// When the record was created.
    pub created_at: DateTime<Utc>,
    /// When usage or limit last changed.
    pub updated_at: DateTime<Utc>,
}

impl QuotaRecord {
    /// Reference to the owning scope.
    pub fn scope(&self) -> EntityRef {
        EntityRef::new(&self.scope_type, &self.scope_id)
    }

    /// Whether the limit is unlimited.
    pub fn is_unlimited(&self) -> bool {
        self.limit < 0.0
    }

    /// Whether usage exceeds a finite limit.
    pub fn is_over_limit(&self) -> bool {
        !self.is_unlimited() && self.usage > self.limit
    }
}

/// Scope quota store used by the engine.
///
/// Mutations that return `bool` report whether a record was affected, so
/// callers can tell a missing record from a successful write.
#[allow(missing_docs)]
#[async_trait]
pub trait Persistence: Send + Sync {
    /// Insert a record with zero usage unless one exists. Returns whether a
    /// row was inserted.
    async fn ensure_quota(&self, scope: &EntityRef, name: &str, limit: f64) -> Result<bool>;

    async fn get_quota(&self, scope: &EntityRef, name: &str) -> Result<Option<QuotaRecord>>;

    /// Records of a scope ordered by name.
    async fn list_quotas(&self, scope: &EntityRef) -> Result<Vec<QuotaRecord>>;

    /// Distinct scope ids holding at least one record of `scope_type`.
    async fn list_scope_ids(&self, scope_type: &str) -> Result<Vec<String>>;

    /// Distinct scope types holding at least one record.
    async fn list_scope_types(&self) -> Result<Vec<String>>;

    async fn set_usage(&self, scope: &EntityRef, name: &str, usage: f64) -> Result<bool>;

    /// Atomically add `delta` to usage.
    async fn add_usage(&self, scope: &EntityRef, name: &str, delta: f64) -> Result<bool>;

    /// Overwrite usage and return the previous value.
    async fn replace_usage(&self, scope: &EntityRef, name: &str, usage: f64)
    -> Result<Option<f64>>;

    async fn set_limit(&self, scope: &EntityRef, name: &str, limit: f64) -> Result<bool>;

    /// Overwrite the limit and return the previous value.
    async fn replace_limit(&self, scope: &EntityRef, name: &str, limit: f64)
    -> Result<Option<f64>>;

    async fn delete_quota(&self, scope: &EntityRef, name: &str) -> Result<bool>;

    /// Delete every record of a scope. Returns the number of deleted rows.
    async fn delete_scope_quotas(&self, scope: &EntityRef) -> Result<u64>;

    async fn health_check_db(&self) -> Result<bool>;
}
