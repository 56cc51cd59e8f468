// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The quota engine: query and mutation API plus delta propagation.
//!
//! Every mutation of a quota's usage or limit is turned into a [`Delta`] and
//! pushed up through the aggregators that read it, one increment per
//! affected ancestor. Nothing here rescans children; that is the job of
//! [`crate::recalculation`].

use std::collections::VecDeque;
use std::sync::Arc;

use tracing::{debug, instrument};

use crate::entity::{Entity, EntityRef};
use crate::error::{QuotaError, Result};
use crate::fields::AggregateSource;
use crate::fields::aggregator::limit_contribution;
use crate::graph::{EntityGraph, Resolution, resolve_scope};
use crate::persistence::{Persistence, QuotaRecord};
use crate::registry::{FieldDefinition, Registry};

/// A change of one quota, to be pushed to the aggregators reading it.
#[derive(Debug, Clone)]
pub(crate) struct Delta {
    /// Scope owning the changed quota.
    pub scope: Entity,
    /// Name of the changed quota.
    pub field: String,
    /// Change of usage.
    pub usage: f64,
    /// Change of the limit's contribution to limit aggregators.
    pub limit: f64,
}

impl Delta {
    fn source(&self, source: AggregateSource) -> f64 {
        match source {
            AggregateSource::Usage => self.usage,
            AggregateSource::Limit => self.limit,
        }
    }
}

/// Maintains quota records for the scopes of an [`EntityGraph`].
///
/// ```ignore
/// let engine = QuotaEngine::new(Arc::new(registry), graph, store);
/// engine.on_created(&volume).await?;
/// let used = engine.get_quota_usage(&project, "storage").await?;
/// ```
#[derive(Clone)]
pub struct QuotaEngine {
    registry: Arc<Registry>,
    graph: Arc<dyn EntityGraph>,
    store: Arc<dyn Persistence>,
}

impl QuotaEngine {
    /// Create an engine over a registry, an entity graph and a quota store.
    pub fn new(
        registry: Arc<Registry>,
        graph: Arc<dyn EntityGraph>,
        store: Arc<dyn Persistence>,
    ) -> Self {
        Self {
            registry,
            graph,
            store,
        }
    }

    /// Registered fields.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Host entity graph.
    pub fn graph(&self) -> &dyn EntityGraph {
        self.graph.as_ref()
    }

    /// Quota store.
    pub fn store(&self) -> &dyn Persistence {
        self.store.as_ref()
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// All quota records of a scope, ordered by name.
    pub async fn quotas(&self, scope: &EntityRef) -> Result<Vec<QuotaRecord>> {
        self.store.list_quotas(scope).await
    }

    async fn record(&self, scope: &EntityRef, name: &str) -> Result<QuotaRecord> {
        self.store
            .get_quota(scope, name)
            .await?
            .ok_or_else(|| QuotaError::unknown_field(scope, name))
    }

    /// Current usage of a quota.
    pub async fn get_quota_usage(&self, scope: &EntityRef, name: &str) -> Result<f64> {
        Ok(self.record(scope, name).await?.usage)
    }

    /// Current limit of a quota. Negative means unlimited.
    pub async fn get_quota_limit(&self, scope: &EntityRef, name: &str) -> Result<f64> {
        Ok(self.record(scope, name).await?.limit)
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    /// Overwrite usage and propagate the difference to parent aggregators.
    #[instrument(skip(self), fields(scope = %scope))]
    pub async fn set_quota_usage(&self, scope: &EntityRef, name: &str, usage: f64) -> Result<()> {
        let previous = self
            .store
            .replace_usage(scope, name, usage)
            .await?
            .ok_or_else(|| QuotaError::unknown_field(scope, name))?;

        self.propagate_from(scope, name, usage - previous, 0.0).await
    }

    /// Atomically add `delta` to usage and propagate it.
    #[instrument(skip(self), fields(scope = %scope))]
    pub async fn add_quota_usage(&self, scope: &EntityRef, name: &str, delta: f64) -> Result<()> {
        if !self.store.add_usage(scope, name, delta).await? {
            return Err(QuotaError::unknown_field(scope, name));
        }

        self.propagate_from(scope, name, delta, 0.0).await
    }

    /// Change a limit. Backend quotas are rejected; use
    /// [`QuotaEngine::sync_backend_limit`] for them.
    #[instrument(skip(self), fields(scope = %scope))]
    pub async fn set_quota_limit(&self, scope: &EntityRef, name: &str, limit: f64) -> Result<()> {
        if let Some(field) = self.registry.field(&scope.kind, name)
            && field.field().is_backend()
        {
            return Err(QuotaError::BackendQuotaImmutable {
                scope: scope.clone(),
                name: name.to_string(),
            });
        }

        self.write_limit(scope, name, limit).await
    }

    /// Store a limit reported by the backend owning the quota.
    #[instrument(skip(self), fields(scope = %scope))]
    pub async fn sync_backend_limit(
        &self,
        scope: &EntityRef,
        name: &str,
        limit: f64,
    ) -> Result<()> {
        self.write_limit(scope, name, limit).await
    }

    async fn write_limit(&self, scope: &EntityRef, name: &str, limit: f64) -> Result<()> {
        let previous = self
            .store
            .replace_limit(scope, name, limit)
            .await?
            .ok_or_else(|| QuotaError::unknown_field(scope, name))?;

        let change = limit_contribution(limit) - limit_contribution(previous);
        self.propagate_from(scope, name, 0.0, change).await
    }

    /// Create the records of every field applicable to `scope`.
    ///
    /// Existing records are left untouched. Returns the names of the records
    /// that were created.
    #[instrument(skip(self, scope), fields(scope = %scope.reference))]
    pub async fn ensure_created(&self, scope: &Entity) -> Result<Vec<String>> {
        let mut created = Vec::new();

        for def in self.registry.fields_for(scope.kind()) {
            if !def.is_applicable(scope) {
                continue;
            }

            let limit = def.default_limit_for(scope)?;
            if !self
                .store
                .ensure_quota(&scope.reference, def.name(), limit)
                .await?
            {
                continue;
            }

            created.push(def.name().to_string());
            let contribution = limit_contribution(limit);
            if contribution != 0.0 {
                self.propagate(Delta {
                    scope: scope.clone(),
                    field: def.name().to_string(),
                    usage: 0.0,
                    limit: contribution,
                })
                .await?;
            }
        }

        if !created.is_empty() {
            debug!(created = created.len(), "Created quota records");
        }
        Ok(created)
    }

    // ========================================================================
    // Propagation
    // ========================================================================

    /// Propagate a change of a quota identified only by its scope reference.
    async fn propagate_from(
        &self,
        scope: &EntityRef,
        name: &str,
        usage: f64,
        limit: f64,
    ) -> Result<()> {
        if usage == 0.0 && limit == 0.0 {
            return Ok(());
        }
        if self.registry.aggregators_of(&scope.kind, name).is_empty() {
            return Ok(());
        }

        let Some(entity) = self.graph.get(scope).await? else {
            debug!(scope = %scope, quota = name, "Scope not in entity graph, skipping propagation");
            return Ok(());
        };

        self.propagate(Delta {
            scope: entity,
            field: name.to_string(),
            usage,
            limit,
        })
        .await
    }

    /// Push a change to every aggregator reading the changed quota, and from
    /// there further up the tree.
    pub(crate) async fn propagate(&self, delta: Delta) -> Result<()> {
        let mut pending = VecDeque::from([delta]);

        while let Some(change) = pending.pop_front() {
            for def in self
                .registry
                .aggregators_of(change.scope.kind(), &change.field)
            {
                let Some(aggregator) = def.as_aggregator() else {
                    continue;
                };
                let amount = change.source(aggregator.source());
                if amount == 0.0 {
                    continue;
                }

                let parent = match resolve_scope(
                    self.graph.as_ref(),
                    &change.scope,
                    &aggregator.children().path_to_parent,
                )
                .await?
                {
                    Resolution::Resolved(parent) => parent,
                    Resolution::Detached => {
                        debug!(
                            child = %change.scope.reference,
                            field = %def.qualified_name(),
                            "Child detached from parent, skipping aggregate update"
                        );
                        continue;
                    }
                };

                if let Some(next) = self.apply(parent, def, amount).await? {
                    pending.push_back(next);
                }
            }
        }

        Ok(())
    }

    /// Propagate a full set of changes.
    pub(crate) async fn propagate_all(&self, deltas: Vec<Delta>) -> Result<()> {
        for delta in deltas {
            self.propagate(delta).await?;
        }
        Ok(())
    }

    /// Add `amount` to the usage of `def` on `scope` and propagate it.
    pub(crate) async fn apply_delta(
        &self,
        scope: Entity,
        def: &FieldDefinition,
        amount: f64,
    ) -> Result<()> {
        match self.apply(scope, def, amount).await? {
            Some(next) => self.propagate(next).await,
            None => Ok(()),
        }
    }

    /// Add `amount` to the usage of `def` on `scope`, creating the record if
    /// it is missing. Returns the change to push further up.
    async fn apply(
        &self,
        scope: Entity,
        def: &FieldDefinition,
        amount: f64,
    ) -> Result<Option<Delta>> {
        if amount == 0.0 || !def.is_applicable(&scope) {
            return Ok(None);
        }

        let mut limit_change = 0.0;
        if !self
            .store
            .add_usage(&scope.reference, def.name(), amount)
            .await?
        {
            let limit = def.default_limit_for(&scope)?;
            if self
                .store
                .ensure_quota(&scope.reference, def.name(), limit)
                .await?
            {
                limit_change = limit_contribution(limit);
            }
            if !self
                .store
                .add_usage(&scope.reference, def.name(), amount)
                .await?
            {
                return Err(QuotaError::database(
                    "add_usage",
                    format!(
                        "quota '{}' of '{}' disappeared after creation",
                        def.name(),
                        scope.reference
                    ),
                ));
            }
        }

        debug!(
            scope = %scope.reference,
            field = def.name(),
            amount = amount,
            "Applied quota delta"
        );

        Ok(Some(Delta {
            scope,
            field: def.name().to_string(),
            usage: amount,
            limit: limit_change,
        }))
    }
}
