// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Aggregator quota fields: sums of a quota across child scopes.

use crate::entity::{Entity, ScopePath};
use crate::error::Result;
use crate::graph::EntityGraph;
use crate::persistence::{Persistence, QuotaRecord};

/// Which value of the child quota is summed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateSource {
    /// Child usage.
    Usage,
    /// Child limit; unlimited children contribute nothing.
    Limit,
}

/// Child scopes of an aggregator: a scope kind and the path from a child up
/// to the aggregating scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildScopes {
    /// Kind of the child scopes.
    pub kind: String,
    /// Path from a child to its parent scope.
    pub path_to_parent: ScopePath,
}

impl ChildScopes {
    /// Children of `kind` whose `path_to_parent` leads to the aggregating scope.
    pub fn new(kind: &str, path_to_parent: &str) -> Self {
        Self {
            kind: kind.to_string(),
            path_to_parent: ScopePath::parse(path_to_parent),
        }
    }
}

/// Sum of a quota across child scopes.
#[derive(Debug, Clone)]
pub struct AggregatorField {
    pub(crate) children: ChildScopes,
    pub(crate) child_field: Option<String>,
    pub(crate) source: AggregateSource,
}

impl AggregatorField {
    /// Aggregate child usage.
    pub fn usage(children: ChildScopes) -> Self {
        Self {
            children,
            child_field: None,
            source: AggregateSource::Usage,
        }
    }

    /// Aggregate child limits.
    pub fn limit(children: ChildScopes) -> Self {
        Self {
            source: AggregateSource::Limit,
            ..Self::usage(children)
        }
    }

    /// Read a differently named quota on the children.
    pub fn child_field(mut self, name: &str) -> Self {
        self.child_field = Some(name.to_string());
        self
    }

    /// Child scopes description.
    pub fn children(&self) -> &ChildScopes {
        &self.children
    }

    /// Which child value is summed.
    pub fn source(&self) -> AggregateSource {
        self.source
    }

    /// Name of the child quota, defaulting to the aggregator's own name.
    pub fn child_field_name<'a>(&'a self, own_name: &'a str) -> &'a str {
        self.child_field.as_deref().unwrap_or(own_name)
    }

    /// What a child's record adds to the aggregate. Missing records add nothing.
    pub fn contribution(&self, record: Option<&QuotaRecord>) -> f64 {
        match (record, self.source) {
            (None, _) => 0.0,
            (Some(r), AggregateSource::Usage) => r.usage,
            (Some(r), AggregateSource::Limit) => limit_contribution(r.limit),
        }
    }

    /// Recompute the aggregate of `scope` from its children's stored quotas.
    pub async fn current_usage(
        &self,
        graph: &dyn EntityGraph,
        store: &dyn Persistence,
        scope: &Entity,
        own_name: &str,
    ) -> Result<f64> {
        let child_field = self.child_field_name(own_name);
        let mut usage = 0.0;
        for child in graph
            .related(
                &self.children.kind,
                &self.children.path_to_parent,
                &scope.reference,
            )
            .await?
        {
            let record = store.get_quota(&child.reference, child_field).await?;
            usage += self.contribution(record.as_ref());
        }
        Ok(usage)
    }
}

/// Share of a limit counted by limit aggregators. Unlimited counts as zero.
pub fn limit_contribution(limit: f64) -> f64 {
    if limit < 0.0 { 0.0 } else { limit }
}
