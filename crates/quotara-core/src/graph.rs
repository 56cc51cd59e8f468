// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Access to the host application's entities.
//!
//! The engine is agnostic to concrete entity types. It needs to look entities
//! up by identity, enumerate them by kind, and walk [`ScopePath`]s from a
//! target entity up to its owning scope. Host applications implement
//! [`EntityGraph`] over their own storage; [`MemoryEntityGraph`] is provided
//! for embedding and tests.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::entity::{Entity, EntityRef, ScopePath};
use crate::error::Result;

/// Outcome of walking a scope path.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution<T> {
    /// The path led to a live scope.
    Resolved(T),
    /// An intermediate entity is gone or a reference is null.
    Detached,
}

impl<T> Resolution<T> {
    /// Convert into an option, dropping the detached case.
    pub fn into_option(self) -> Option<T> {
        match self {
            Self::Resolved(v) => Some(v),
            Self::Detached => None,
        }
    }
}

/// Read access to application entities.
#[async_trait]
pub trait EntityGraph: Send + Sync {
    /// Look an entity up by identity.
    async fn get(&self, entity: &EntityRef) -> Result<Option<Entity>>;

    /// All live entities of a kind.
    async fn list(&self, kind: &str) -> Result<Vec<Entity>>;

    /// Entities of `kind` whose `path` resolves to `scope`.
    ///
    /// The default walks every entity of the kind; hosts backed by a query
    /// engine should override it with a join.
    async fn related(
        &self,
        kind: &str,
        path: &ScopePath,
        scope: &EntityRef,
    ) -> Result<Vec<Entity>> {
        let mut matching = Vec::new();
        for entity in self.list(kind).await? {
            if let Resolution::Resolved(owner) = resolve_ref(self, &entity, path).await?
                && &owner == scope
            {
                matching.push(entity);
            }
        }
        Ok(matching)
    }
}

/// Walk `path` from `start` and return the reference found at the last hop.
///
/// Intermediate entities are fetched from the graph; the final scope is not.
pub async fn resolve_ref<G: EntityGraph + ?Sized>(
    graph: &G,
    start: &Entity,
    path: &ScopePath,
) -> Result<Resolution<EntityRef>> {
    let Some((last, intermediate)) = path.segments().split_last() else {
        return Ok(Resolution::Resolved(start.reference.clone()));
    };

    let mut hop: Option<Entity> = None;
    for segment in intermediate {
        let current = hop.as_ref().unwrap_or(start);
        let next = match current.reference_at(segment)? {
            Some(r) => r.clone(),
            None => return Ok(Resolution::Detached),
        };
        hop = match graph.get(&next).await? {
            Some(entity) => Some(entity),
            None => return Ok(Resolution::Detached),
        };
    }

    let current = hop.as_ref().unwrap_or(start);
    Ok(match current.reference_at(last)? {
        Some(r) => Resolution::Resolved(r.clone()),
        None => Resolution::Detached,
    })
}

/// Walk `path` from `start` and load the scope entity it leads to.
pub async fn resolve_scope<G: EntityGraph + ?Sized>(
    graph: &G,
    start: &Entity,
    path: &ScopePath,
) -> Result<Resolution<Entity>> {
    if path.is_empty() {
        return Ok(Resolution::Resolved(start.clone()));
    }
    match resolve_ref(graph, start, path).await? {
        Resolution::Resolved(scope) => Ok(match graph.get(&scope).await? {
            Some(entity) => Resolution::Resolved(entity),
            None => Resolution::Detached,
        }),
        Resolution::Detached => Ok(Resolution::Detached),
    }
}

/// In-memory entity graph.
#[derive(Debug, Default)]
pub struct MemoryEntityGraph {
    entities: RwLock<BTreeMap<EntityRef, Entity>>,
}

impl MemoryEntityGraph {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an entity, returning the previous snapshot.
    pub async fn insert(&self, entity: Entity) -> Option<Entity> {
        self.entities
            .write()
            .await
            .insert(entity.reference.clone(), entity)
    }

    /// Remove an entity, returning its last snapshot.
    pub async fn remove(&self, entity: &EntityRef) -> Option<Entity> {
        self.entities.write().await.remove(entity)
    }

    /// Number of stored entities.
    pub async fn len(&self) -> usize {
        self.entities.read().await.len()
    }

    /// Whether the graph holds no entities.
    pub async fn is_empty(&self) -> bool {
        self.entities.read().await.is_empty()
    }
}

#[async_trait]
impl EntityGraph for MemoryEntityGraph {
    async fn get(&self, entity: &EntityRef) -> Result<Option<Entity>> {
        Ok(self.entities.read().await.get(entity).cloned())
    }

    async fn list(&self, kind: &str) -> Result<Vec<Entity>> {
        Ok(self
            .entities
            .read()
            .await
            .values()
            .filter(|e| e.kind() == kind)
            .cloned()
            .collect())
    }
}
