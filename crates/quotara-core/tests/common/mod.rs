// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for quotara-core integration tests.
//!
//! Provides a fixture registry over a grandparent / parent / child tree and a
//! TestContext that keeps the in-memory entity graph and the engine in step.

#![allow(dead_code)]

use std::sync::Arc;

use sqlx::PgPool;
use uuid::Uuid;

use quotara_core::persistence::{Persistence, PostgresPersistence, SqlitePersistence};
use quotara_core::{
    AggregatorField, ChildScopes, CounterField, Entity, EntityRef, MemoryEntityGraph, QuotaEngine,
    QuotaField, Registry, RegistryBuilder, Value,
};

/// Fixture quota names.
pub const USAGE_AGGREGATOR: &str = "usage_aggregator_quota";
pub const LIMIT_AGGREGATOR: &str = "limit_aggregator_quota";
pub const REGULAR: &str = "regular_quota";
pub const COUNTER: &str = "counter_quota";
pub const WEIGHTED_COUNTER: &str = "weighted_counter_quota";
pub const TOTAL: &str = "total_quota";
pub const CONDITIONAL: &str = "conditional_quota";
pub const BACKEND: &str = "backend_quota";
pub const ATTRIBUTE_LIMIT: &str = "attribute_limit_quota";

/// Limit of `regular_quota` on a parent.
pub const PARENT_REGULAR_LIMIT: f64 = 10.0;
/// Limit of `regular_quota` on a child.
pub const CHILD_REGULAR_LIMIT: f64 = 5.0;

/// Register the fixture fields.
///
/// | Scope | Field | Kind |
/// |-------|-------|------|
/// | grandparent | usage_aggregator_quota | sum of parents' usage_aggregator_quota |
/// | grandparent | limit_aggregator_quota | sum of parents' regular_quota limits |
/// | parent | usage_aggregator_quota | sum of children's usage_aggregator_quota |
/// | parent | limit_aggregator_quota | sum of children's regular_quota limits |
/// | parent | regular_quota | plain, limit 10 |
/// | parent | counter_quota | number of children |
/// | parent | weighted_counter_quota | second children weighted by `weight` |
/// | parent | total_quota | sum of volume `size` |
/// | parent | conditional_quota | plain, only for billable parents |
/// | parent | backend_quota | plain, backend owned |
/// | parent | attribute_limit_quota | plain, limit mirrors `max_size` |
/// | child | usage_aggregator_quota | plain |
/// | child | regular_quota | plain, limit 5 |
pub fn fixture_builder() -> RegistryBuilder {
    let mut builder = Registry::builder();
    builder
        .add(
            "grandparent",
            USAGE_AGGREGATOR,
            QuotaField::usage_aggregator(ChildScopes::new("parent", "grandparent")),
        )
        .unwrap()
        .add(
            "grandparent",
            LIMIT_AGGREGATOR,
            AggregatorField::limit(ChildScopes::new("parent", "grandparent")).child_field(REGULAR),
        )
        .unwrap()
        .add(
            "parent",
            USAGE_AGGREGATOR,
            QuotaField::usage_aggregator(ChildScopes::new("child", "parent")),
        )
        .unwrap()
        .add(
            "parent",
            LIMIT_AGGREGATOR,
            AggregatorField::limit(ChildScopes::new("child", "parent")).child_field(REGULAR),
        )
        .unwrap()
        .add(
            "parent",
            REGULAR,
            QuotaField::plain().default_limit(PARENT_REGULAR_LIMIT),
        )
        .unwrap()
        .add("parent", COUNTER, QuotaField::counter(["child"], "parent"))
        .unwrap()
        .add(
            "parent",
            WEIGHTED_COUNTER,
            CounterField::new(["second_child"], "parent")
                .with_delta(|e| e.number("weight")),
        )
        .unwrap()
        .add("parent", TOTAL, QuotaField::total(["volume"], "parent", "size"))
        .unwrap()
        .add(
            "parent",
            CONDITIONAL,
            QuotaField::plain()
                .created_when(|p| p.get("is_billable") == Some(&Value::Bool(true))),
        )
        .unwrap()
        .add("parent", BACKEND, QuotaField::plain().default_limit(100.0).backend())
        .unwrap()
        .add(
            "parent",
            ATTRIBUTE_LIMIT,
            QuotaField::plain().limit_from("max_size"),
        )
        .unwrap()
        .add("child", USAGE_AGGREGATOR, QuotaField::plain())
        .unwrap()
        .add(
            "child",
            REGULAR,
            QuotaField::plain().default_limit(CHILD_REGULAR_LIMIT),
        )
        .unwrap();
    builder
}

/// Build the fixture registry.
pub fn fixture_registry() -> Registry {
    fixture_builder().build().unwrap()
}

/// Engine plus the entity graph it reads, with helpers mirroring what a host
/// application does around each entity change.
pub struct TestContext {
    pub engine: QuotaEngine,
    pub graph: Arc<MemoryEntityGraph>,
}

impl TestContext {
    /// Fixture registry over an in-memory SQLite store.
    pub async fn new() -> Self {
        Self::with_registry(fixture_registry()).await
    }

    /// Custom registry over an in-memory SQLite store.
    pub async fn with_registry(registry: Registry) -> Self {
        let store = SqlitePersistence::in_memory()
            .await
            .expect("Failed to open in-memory SQLite");
        Self::with_store(registry, Arc::new(store))
    }

    /// Fixture registry over an arbitrary store.
    pub fn with_store(registry: Registry, store: Arc<dyn Persistence>) -> Self {
        let graph = Arc::new(MemoryEntityGraph::new());
        let engine = QuotaEngine::new(Arc::new(registry), graph.clone(), store);
        Self { engine, graph }
    }

    /// Fixture registry over PostgreSQL from TEST_DATABASE_URL.
    ///
    /// Returns None if the database is not configured or unreachable.
    pub async fn postgres() -> Option<Self> {
        let database_url = std::env::var("TEST_DATABASE_URL").ok()?;
        let pool = PgPool::connect(&database_url).await.ok()?;
        quotara_core::migrations::run_postgres(&pool).await.ok()?;
        Some(Self::with_store(
            fixture_registry(),
            Arc::new(PostgresPersistence::new(pool)),
        ))
    }

    /// Insert an entity into the graph and emit the created event.
    pub async fn create(&self, entity: Entity) -> Entity {
        self.graph.insert(entity.clone()).await;
        self.engine
            .on_created(&entity)
            .await
            .expect("on_created failed");
        entity
    }

    /// Replace an entity in the graph and emit the updated event.
    pub async fn update(&self, after: Entity) -> Entity {
        let before = self
            .graph
            .insert(after.clone())
            .await
            .expect("updated entity was not in the graph");
        self.engine
            .on_updated(&before, &after)
            .await
            .expect("on_updated failed");
        after
    }

    /// Remove an entity from the graph and emit the deleted event.
    pub async fn delete(&self, entity: &EntityRef) {
        let snapshot = self
            .graph
            .remove(entity)
            .await
            .expect("deleted entity was not in the graph");
        self.engine
            .on_deleted(&snapshot)
            .await
            .expect("on_deleted failed");
    }

    pub async fn usage(&self, scope: &Entity, name: &str) -> f64 {
        self.engine
            .get_quota_usage(&scope.reference, name)
            .await
            .unwrap_or_else(|e| panic!("usage of {}.{}: {}", scope.reference, name, e))
    }

    pub async fn limit(&self, scope: &Entity, name: &str) -> f64 {
        self.engine
            .get_quota_limit(&scope.reference, name)
            .await
            .unwrap_or_else(|e| panic!("limit of {}.{}: {}", scope.reference, name, e))
    }

    /// Create a grandparent.
    pub async fn grandparent(&self) -> Entity {
        self.create(Entity::new("grandparent", unique_id("g"))).await
    }

    /// Create a parent under `grandparent`.
    pub async fn parent(&self, grandparent: &Entity) -> Entity {
        self.create(Entity::new("parent", unique_id("p")).with("grandparent", grandparent))
            .await
    }

    /// Create a child under `parent`.
    pub async fn child(&self, parent: &Entity) -> Entity {
        self.create(Entity::new("child", unique_id("c")).with("parent", parent))
            .await
    }

    /// Create a volume of `size` under `parent`.
    pub async fn volume(&self, parent: &Entity, size: f64) -> Entity {
        self.create(
            Entity::new("volume", unique_id("v"))
                .with("parent", parent)
                .with("size", size),
        )
        .await
    }
}

/// Entity id unique across test runs sharing a database.
pub fn unique_id(prefix: &str) -> String {
    format!("{}-{}", prefix, Uuid::new_v4())
}

/// Skip test if TEST_DATABASE_URL is not set.
#[macro_export]
macro_rules! skip_if_no_db {
    () => {
        if std::env::var("TEST_DATABASE_URL").is_err() {
            eprintln!("Skipping test: TEST_DATABASE_URL not set");
            return;
        }
    };
}
