// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Counter and total quota fields.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::entity::{Entity, ScopePath};
use crate::error::Result;
use crate::graph::EntityGraph;

/// Weight of a single target entity.
pub type DeltaFn = Arc<dyn Fn(&Entity) -> Result<f64> + Send + Sync>;

/// Custom full recomputation of a counter's usage.
///
/// Used when usage cannot be derived from a per-entity delta, e.g. when two
/// target kinds are weighted against each other by an external rule.
#[async_trait]
pub trait UsageCalculator: Send + Sync {
    /// Current usage of `scope` given the counter's target kinds.
    async fn current_usage(
        &self,
        graph: &dyn EntityGraph,
        target_kinds: &[String],
        scope: &Entity,
    ) -> Result<f64>;
}

/// What a single target entity contributes.
#[derive(Clone)]
pub enum Measure {
    /// One per entity unless a delta function says otherwise.
    Count {
        /// Per-entity weight override.
        delta: Option<DeltaFn>,
    },
    /// Value of a numeric attribute.
    Sum {
        /// Attribute summed across targets.
        target_field: String,
    },
}

impl fmt::Debug for Measure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Count { delta } => f
                .debug_struct("Count")
                .field("custom_delta", &delta.is_some())
                .finish(),
            Self::Sum { target_field } => f
                .debug_struct("Sum")
                .field("target_field", target_field)
                .finish(),
        }
    }
}

/// Usage derived from target entities reachable through a scope path.
#[derive(Clone)]
pub struct CounterField {
    pub(crate) target_kinds: Vec<String>,
    pub(crate) path_to_scope: ScopePath,
    pub(crate) measure: Measure,
    pub(crate) calculator: Option<Arc<dyn UsageCalculator>>,
}

impl CounterField {
    /// Count entities of `target_kinds` whose `path_to_scope` leads to the scope.
    pub fn new<I, S>(target_kinds: I, path_to_scope: &str) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            target_kinds: target_kinds.into_iter().map(Into::into).collect(),
            path_to_scope: ScopePath::parse(path_to_scope),
            measure: Measure::Count { delta: None },
            calculator: None,
        }
    }

    /// Sum `target_field` over entities of `target_kinds` under the scope.
    pub fn total<I, S>(target_kinds: I, path_to_scope: &str, target_field: &str) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            measure: Measure::Sum {
                target_field: target_field.to_string(),
            },
            ..Self::new(target_kinds, path_to_scope)
        }
    }

    /// Weight each counted entity with `delta`. Totals ignore this.
    pub fn with_delta(
        mut self,
        delta: impl Fn(&Entity) -> Result<f64> + Send + Sync + 'static,
    ) -> Self {
        if let Measure::Count { delta: slot } = &mut self.measure {
            *slot = Some(Arc::new(delta));
        }
        self
    }

    /// Replace full recomputation with a custom calculator.
    pub fn with_calculator(mut self, calculator: Arc<dyn UsageCalculator>) -> Self {
        self.calculator = Some(calculator);
        self
    }

    /// Entity kinds contributing to this field.
    pub fn target_kinds(&self) -> &[String] {
        &self.target_kinds
    }

    /// Path from a target entity to the scope.
    pub fn path_to_scope(&self) -> &ScopePath {
        &self.path_to_scope
    }

    /// Whether entities of `kind` contribute.
    pub fn targets(&self, kind: &str) -> bool {
        self.target_kinds.iter().any(|k| k == kind)
    }

    /// Contribution of a single target entity.
    pub fn delta(&self, target: &Entity) -> Result<f64> {
        match &self.measure {
            Measure::Count { delta: None } => Ok(1.0),
            Measure::Count { delta: Some(f) } => f(target),
            Measure::Sum { target_field } => target.number(target_field),
        }
    }

    /// Recompute usage of `scope` from scratch.
    pub async fn current_usage(&self, graph: &dyn EntityGraph, scope: &Entity) -> Result<f64> {
        if let Some(calculator) = &self.calculator {
            return calculator
                .current_usage(graph, &self.target_kinds, scope)
                .await;
        }

        let mut usage = 0.0;
        for kind in &self.target_kinds {
            for target in graph
                .related(kind, &self.path_to_scope, &scope.reference)
                .await?
            {
                usage += self.delta(&target)?;
            }
        }
        Ok(usage)
    }
}

impl fmt::Debug for CounterField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CounterField")
            .field("target_kinds", &self.target_kinds)
            .field("path_to_scope", &self.path_to_scope)
            .field("measure", &self.measure)
            .field("custom_calculator", &self.calculator.is_some())
            .finish()
    }
}
