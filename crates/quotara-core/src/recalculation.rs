// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Full recalculation of quota usage.
//!
//! Incremental propagation can drift when lifecycle events are missed or
//! fields are added to an existing deployment. [`QuotaEngine::recalculate_all`]
//! recomputes every quota from the entity graph in dependency order:
//! counters and totals first, then each aggregator after the child field it
//! reads. Values are overwritten without propagation, so running it twice
//! yields identical results.

use async_trait::async_trait;
use tracing::{debug, info, instrument, warn};

use crate::engine::QuotaEngine;
use crate::entity::{Entity, EntityRef};
use crate::error::{QuotaError, Result};
use crate::fields::FieldKind;
use crate::registry::FieldDefinition;

/// Custom recalculation step run after the built-in fields.
///
/// Registered with [`crate::registry::RegistryBuilder::add_recalculation_hook`].
#[async_trait]
pub trait RecalculationHook: Send + Sync {
    /// Name used in logs and failure reports.
    fn name(&self) -> &str;

    /// Recompute the quotas this hook owns.
    async fn recalculate(&self, engine: &QuotaEngine) -> Result<()>;
}

/// Options of a recalculation run.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecalculateOptions {
    /// Delete records of unregistered fields and of scopes that no longer exist.
    pub prune_stale: bool,
}

/// A recalculation unit that failed.
#[derive(Debug, Clone)]
pub struct RecalculationFailure {
    /// Scope being recalculated; `None` when the whole field failed.
    pub scope: Option<EntityRef>,
    /// Qualified field name or hook name.
    pub field: String,
    /// What went wrong.
    pub error: QuotaError,
}

/// Outcome of a recalculation run.
#[derive(Debug, Clone, Default)]
pub struct RecalculationReport {
    /// Number of (scope, field) units recomputed.
    pub recalculated: usize,
    /// Number of (scope, field) units skipped by a creation condition.
    pub skipped: usize,
    /// Number of stale records deleted.
    pub pruned: u64,
    /// Units that failed; the run continued past them.
    pub failures: Vec<RecalculationFailure>,
}

impl RecalculationReport {
    /// Whether every unit succeeded.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    fn fail(&mut self, scope: Option<EntityRef>, field: String, error: QuotaError) {
        warn!(
            scope = ?scope.as_ref().map(ToString::to_string),
            field = %field,
            error = %error,
            "Quota recalculation failed"
        );
        self.failures.push(RecalculationFailure {
            scope,
            field,
            error,
        });
    }
}

impl QuotaEngine {
    /// Recompute every registered quota of every existing scope.
    ///
    /// Failures are isolated per (scope, field) and collected in the report.
    #[instrument(skip(self))]
    pub async fn recalculate_all(&self, options: RecalculateOptions) -> RecalculationReport {
        let mut report = RecalculationReport::default();

        for def in self.registry().dependency_order() {
            let scopes = match self.graph().list(def.scope_type()).await {
                Ok(scopes) => scopes,
                Err(e) => {
                    report.fail(None, def.qualified_name(), e);
                    continue;
                }
            };

            for scope in &scopes {
                if !def.is_applicable(scope) {
                    report.skipped += 1;
                    continue;
                }
                match self.recalculate_field(scope, def).await {
                    Ok(()) => report.recalculated += 1,
                    Err(e) => report.fail(Some(scope.reference.clone()), def.qualified_name(), e),
                }
            }
        }

        for hook in self.registry().recalculation_hooks() {
            if let Err(e) = hook.recalculate(self).await {
                report.fail(None, hook.name().to_string(), e);
            }
        }

        if options.prune_stale {
            match self.prune_stale().await {
                Ok(pruned) => report.pruned = pruned,
                Err(e) => report.fail(None, "prune_stale".to_string(), e),
            }
        }

        info!(
            recalculated = report.recalculated,
            skipped = report.skipped,
            pruned = report.pruned,
            failures = report.failures.len(),
            "Quota recalculation finished"
        );
        report
    }

    /// Recompute one quota of one scope.
    ///
    /// Ensures the record exists, re-synchronises an attribute-backed limit
    /// and overwrites usage. Parents are not updated; recalculate them
    /// afterwards or use [`QuotaEngine::recalculate_all`].
    pub async fn recalculate_field(&self, scope: &Entity, def: &FieldDefinition) -> Result<()> {
        let limit = def.default_limit_for(scope)?;
        self.store()
            .ensure_quota(&scope.reference, def.name(), limit)
            .await?;

        if def.field().limit().source_attribute().is_some() {
            self.store()
                .set_limit(&scope.reference, def.name(), limit)
                .await?;
        }

        let Some(usage) = self.current_usage(scope, def).await? else {
            return Ok(());
        };

        self.store()
            .set_usage(&scope.reference, def.name(), usage)
            .await?;
        debug!(
            scope = %scope.reference,
            field = def.name(),
            usage = usage,
            "Recalculated quota usage"
        );
        Ok(())
    }

    /// Usage of `def` on `scope` computed from the entity graph and the
    /// children's records. `None` for plain fields.
    pub(crate) async fn current_usage(
        &self,
        scope: &Entity,
        def: &FieldDefinition,
    ) -> Result<Option<f64>> {
        let usage = match def.field().kind() {
            FieldKind::Plain => return Ok(None),
            FieldKind::Counter(counter) => counter.current_usage(self.graph(), scope).await?,
            FieldKind::Aggregator(aggregator) => {
                aggregator
                    .current_usage(self.graph(), self.store(), scope, def.name())
                    .await?
            }
        };
        Ok(Some(usage))
    }

    /// Delete records of unregistered fields and of scopes that are gone.
    async fn prune_stale(&self) -> Result<u64> {
        let mut pruned = 0;

        for scope_type in self.store().list_scope_types().await? {
            for scope_id in self.store().list_scope_ids(&scope_type).await? {
                let scope = EntityRef::new(&scope_type, scope_id);

                if self.graph().get(&scope).await?.is_none() {
                    pruned += self.store().delete_scope_quotas(&scope).await?;
                    continue;
                }

                for record in self.store().list_quotas(&scope).await? {
                    if self.registry().field(&scope_type, &record.name).is_none()
                        && self.store().delete_quota(&scope, &record.name).await?
                    {
                        pruned += 1;
                    }
                }
            }
        }

        if pruned > 0 {
            info!(pruned = pruned, "Pruned stale quota records");
        }
        Ok(pruned)
    }
}
