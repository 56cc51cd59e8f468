// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Entity lifecycle handlers.
//!
//! Host applications call these after committing an entity change:
//!
//! | Event | Call |
//! |-------|------|
//! | entity inserted | [`QuotaEngine::on_created`] |
//! | entity changed | [`QuotaEngine::on_updated`] with both snapshots |
//! | entity removed | [`QuotaEngine::on_deleted`] with the last snapshot |
//!
//! Each event costs one increment per affected field and ancestor.

use tracing::{debug, instrument};

use crate::engine::{Delta, QuotaEngine};
use crate::entity::{Entity, ScopePath};
use crate::error::Result;
use crate::fields::aggregator::limit_contribution;
use crate::graph::{Resolution, resolve_ref, resolve_scope};
use crate::registry::FieldDefinition;

impl QuotaEngine {
    /// Handle a newly created entity.
    ///
    /// Scopes get their quota records; entities counted by counter or total
    /// fields are added to their owning scope.
    #[instrument(skip(self, entity), fields(entity = %entity.reference))]
    pub async fn on_created(&self, entity: &Entity) -> Result<()> {
        if self.registry().is_scope_type(entity.kind()) {
            self.ensure_created(entity).await?;
        }

        for def in self.registry().counters_targeting(entity.kind()) {
            self.count(entity, def, 1.0).await?;
        }
        Ok(())
    }

    /// Handle a deleted entity.
    ///
    /// `snapshot` must carry the references the entity had before deletion.
    /// A deleted scope withdraws its contributions from parent aggregators
    /// and loses its quota records.
    #[instrument(skip(self, snapshot), fields(entity = %snapshot.reference))]
    pub async fn on_deleted(&self, snapshot: &Entity) -> Result<()> {
        for def in self.registry().counters_targeting(snapshot.kind()) {
            self.count(snapshot, def, -1.0).await?;
        }

        if !self.registry().is_scope_type(snapshot.kind()) {
            return Ok(());
        }

        let records = self.store().list_quotas(&snapshot.reference).await?;
        self.propagate_all(
            records
                .iter()
                .map(|record| Delta {
                    scope: snapshot.clone(),
                    field: record.name.clone(),
                    usage: -record.usage,
                    limit: -limit_contribution(record.limit),
                })
                .collect(),
        )
        .await?;

        let deleted = self
            .store()
            .delete_scope_quotas(&snapshot.reference)
            .await?;
        debug!(deleted = deleted, "Deleted quota records of scope");
        Ok(())
    }

    /// Handle a changed entity.
    ///
    /// Counted entities that moved to another scope are transferred; a
    /// changed weight is applied as a difference. Scopes get newly applicable
    /// records seeded from what already exists under them, re-synchronised
    /// attribute limits, and their aggregated contributions moved when their
    /// parent changed.
    #[instrument(skip(self, before, after), fields(entity = %after.reference))]
    pub async fn on_updated(&self, before: &Entity, after: &Entity) -> Result<()> {
        for def in self.registry().counters_targeting(after.kind()) {
            self.recount(before, after, def).await?;
        }

        if self.registry().is_scope_type(after.kind()) {
            // Move existing contributions before new records add their own.
            self.move_contributions(before, after).await?;
            let created = self.ensure_created(after).await?;
            self.seed_usage(after, &created).await?;
            self.sync_attribute_limits(before, after).await?;
        }
        Ok(())
    }

    /// Bring records that just became applicable up to the usage their
    /// existing targets or children already account for.
    async fn seed_usage(&self, scope: &Entity, created: &[String]) -> Result<()> {
        for name in created {
            let Some(def) = self.registry().field(scope.kind(), name) else {
                continue;
            };
            let Some(usage) = self.current_usage(scope, def).await? else {
                continue;
            };
            if usage != 0.0 {
                debug!(
                    field = %def.qualified_name(),
                    usage = usage,
                    "Seeded usage of newly applicable quota"
                );
                self.apply_delta(scope.clone(), def, usage).await?;
            }
        }
        Ok(())
    }

    /// Add `multiplier` times the weight of `target` to its scope.
    async fn count(&self, target: &Entity, def: &FieldDefinition, multiplier: f64) -> Result<()> {
        let Some(counter) = def.as_counter() else {
            return Ok(());
        };
        let amount = multiplier * counter.delta(target)?;
        self.add_at(target, def, counter.path_to_scope(), amount)
            .await
    }

    async fn recount(&self, before: &Entity, after: &Entity, def: &FieldDefinition) -> Result<()> {
        let Some(counter) = def.as_counter() else {
            return Ok(());
        };
        let path = counter.path_to_scope();

        let old_scope = resolve_ref(self.graph(), before, path).await?.into_option();
        let new_scope = resolve_ref(self.graph(), after, path).await?.into_option();

        if old_scope == new_scope {
            if old_scope.is_none() {
                return Ok(());
            }
            let change = counter.delta(after)? - counter.delta(before)?;
            return self.add_at(after, def, path, change).await;
        }

        debug!(
            field = %def.qualified_name(),
            from = ?old_scope,
            to = ?new_scope,
            "Counted entity moved between scopes"
        );
        self.count(before, def, -1.0).await?;
        self.count(after, def, 1.0).await
    }

    /// Resolve the scope `path` leads to from `from` and add `amount` there.
    async fn add_at(
        &self,
        from: &Entity,
        def: &FieldDefinition,
        path: &ScopePath,
        amount: f64,
    ) -> Result<()> {
        if amount == 0.0 {
            return Ok(());
        }

        match resolve_scope(self.graph(), from, path).await? {
            Resolution::Resolved(scope) => self.apply_delta(scope, def, amount).await,
            Resolution::Detached => {
                debug!(
                    entity = %from.reference,
                    field = %def.qualified_name(),
                    path = %path,
                    "Scope not resolvable, skipping quota update"
                );
                Ok(())
            }
        }
    }

    async fn sync_attribute_limits(&self, before: &Entity, after: &Entity) -> Result<()> {
        for def in self.registry().fields_for(after.kind()) {
            let Some(attribute) = def.field().limit().source_attribute() else {
                continue;
            };
            if before.get(attribute) == after.get(attribute) || !def.is_applicable(after) {
                continue;
            }

            let limit = def.default_limit_for(after)?;
            let Some(previous) = self
                .store()
                .replace_limit(&after.reference, def.name(), limit)
                .await?
            else {
                continue;
            };

            debug!(
                field = %def.qualified_name(),
                previous = previous,
                limit = limit,
                "Synchronised quota limit from scope attribute"
            );
            self.propagate(Delta {
                scope: after.clone(),
                field: def.name().to_string(),
                usage: 0.0,
                limit: limit_contribution(limit) - limit_contribution(previous),
            })
            .await?;
        }
        Ok(())
    }

    /// Move the contributions of a scope whose parent reference changed.
    async fn move_contributions(&self, before: &Entity, after: &Entity) -> Result<()> {
        for def in self.registry().aggregators_over(after.kind()) {
            let Some(aggregator) = def.as_aggregator() else {
                continue;
            };
            let path = &aggregator.children().path_to_parent;

            let old_parent = resolve_ref(self.graph(), before, path).await?.into_option();
            let new_parent = resolve_ref(self.graph(), after, path).await?.into_option();
            if old_parent == new_parent {
                continue;
            }

            let record = self
                .store()
                .get_quota(&after.reference, aggregator.child_field_name(def.name()))
                .await?;
            let contribution = aggregator.contribution(record.as_ref());
            if contribution == 0.0 {
                continue;
            }

            debug!(
                field = %def.qualified_name(),
                from = ?old_parent,
                to = ?new_parent,
                contribution = contribution,
                "Scope moved between parents"
            );
            self.add_at(before, def, path, -contribution).await?;
            self.add_at(after, def, path, contribution).await?;
        }
        Ok(())
    }
}
