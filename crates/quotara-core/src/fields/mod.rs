// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Quota field definitions.
//!
//! A [`QuotaField`] describes one named quota of a scope type: its default
//! limit, whether it is owned by an external backend, when it applies to a
//! scope, and how its usage is computed.
//!
//! | Kind | Usage is |
//! |------|----------|
//! | `plain` | set explicitly by callers |
//! | `counter` | number (or weighted sum) of target entities under the scope |
//! | `total` | sum of a numeric attribute of target entities under the scope |
//! | `usage_aggregator` | sum of a quota's usage across child scopes |
//! | `limit_aggregator` | sum of a quota's limit across child scopes |

pub mod aggregator;
pub mod counter;

use std::fmt;
use std::sync::Arc;

pub use aggregator::{AggregateSource, AggregatorField, ChildScopes};
pub use counter::{CounterField, Measure, UsageCalculator};

use crate::entity::{Entity, Value};
use crate::error::{QuotaError, Result};

/// Limit value meaning "no limit".
pub const UNLIMITED: f64 = -1.0;

/// Predicate deciding whether a field applies to a scope instance.
pub type CreationCondition = Arc<dyn Fn(&Entity) -> bool + Send + Sync>;

/// Default limit of a quota, evaluated when its record is created.
#[derive(Clone)]
pub enum DefaultLimit {
    /// Fixed value.
    Constant(f64),
    /// Computed from the scope entity.
    Computed(Arc<dyn Fn(&Entity) -> f64 + Send + Sync>),
    /// Mirrors a numeric attribute of the scope; re-synchronised on update.
    FromAttribute(String),
}

impl DefaultLimit {
    /// Evaluate the limit for a scope.
    ///
    /// A null or absent `FromAttribute` source means unlimited.
    pub fn evaluate(&self, scope: &Entity) -> Result<f64> {
        match self {
            Self::Constant(v) => Ok(*v),
            Self::Computed(f) => Ok(f(scope)),
            Self::FromAttribute(attribute) => match scope.get(attribute) {
                Some(Value::Number(n)) => Ok(*n),
                Some(Value::Null) | None => Ok(UNLIMITED),
                Some(_) => Err(QuotaError::InvalidAttribute {
                    entity: scope.reference.clone(),
                    attribute: attribute.clone(),
                    expected: "a number",
                }),
            },
        }
    }

    /// Attribute mirrored by this limit, if any.
    pub fn source_attribute(&self) -> Option<&str> {
        match self {
            Self::FromAttribute(attribute) => Some(attribute),
            _ => None,
        }
    }
}

impl Default for DefaultLimit {
    fn default() -> Self {
        Self::Constant(UNLIMITED)
    }
}

impl From<f64> for DefaultLimit {
    fn from(v: f64) -> Self {
        Self::Constant(v)
    }
}

impl fmt::Debug for DefaultLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Constant(v) => f.debug_tuple("Constant").field(v).finish(),
            Self::Computed(_) => f.write_str("Computed(..)"),
            Self::FromAttribute(a) => f.debug_tuple("FromAttribute").field(a).finish(),
        }
    }
}

/// How a field's usage is computed.
#[derive(Debug)]
pub enum FieldKind {
    /// Usage is only ever set by callers.
    Plain,
    /// Counter or total over target entities.
    Counter(CounterField),
    /// Sum over child scopes.
    Aggregator(AggregatorField),
}

/// Declaration of a named quota for a scope type.
///
/// ```ignore
/// let field = QuotaField::total(["volume"], "project", "size")
///     .default_limit(1024.0)
///     .created_when(|project| project.get("archived") != Some(&Value::Bool(true)));
/// ```
pub struct QuotaField {
    pub(crate) kind: FieldKind,
    pub(crate) default_limit: DefaultLimit,
    pub(crate) is_backend: bool,
    pub(crate) creation_condition: Option<CreationCondition>,
}

impl QuotaField {
    fn with_kind(kind: FieldKind) -> Self {
        Self {
            kind,
            default_limit: DefaultLimit::default(),
            is_backend: false,
            creation_condition: None,
        }
    }

    /// Field whose usage is maintained by callers.
    pub fn plain() -> Self {
        Self::with_kind(FieldKind::Plain)
    }

    /// Count of `target_kinds` entities whose `path_to_scope` leads to the scope.
    pub fn counter<I, S>(target_kinds: I, path_to_scope: &str) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        CounterField::new(target_kinds, path_to_scope).into()
    }

    /// Sum of `target_field` over `target_kinds` entities under the scope.
    pub fn total<I, S>(target_kinds: I, path_to_scope: &str, target_field: &str) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        CounterField::total(target_kinds, path_to_scope, target_field).into()
    }

    /// Sum of child scopes' usage of the same-named (or renamed) quota.
    pub fn usage_aggregator(children: ChildScopes) -> Self {
        AggregatorField::usage(children).into()
    }

    /// Sum of child scopes' limits of the same-named (or renamed) quota.
    pub fn limit_aggregator(children: ChildScopes) -> Self {
        AggregatorField::limit(children).into()
    }

    /// Set the default limit.
    pub fn default_limit(mut self, limit: impl Into<DefaultLimit>) -> Self {
        self.default_limit = limit.into();
        self
    }

    /// Compute the default limit from the scope.
    pub fn computed_limit(mut self, f: impl Fn(&Entity) -> f64 + Send + Sync + 'static) -> Self {
        self.default_limit = DefaultLimit::Computed(Arc::new(f));
        self
    }

    /// Mirror the limit from a numeric scope attribute.
    pub fn limit_from(mut self, attribute: &str) -> Self {
        self.default_limit = DefaultLimit::FromAttribute(attribute.to_string());
        self
    }

    /// Mark the quota as owned by an external backend.
    pub fn backend(mut self) -> Self {
        self.is_backend = true;
        self
    }

    /// Only create the quota for scopes matching `condition`.
    pub fn created_when(
        mut self,
        condition: impl Fn(&Entity) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.creation_condition = Some(Arc::new(condition));
        self
    }

    /// Short name of the field kind.
    pub fn kind_name(&self) -> &'static str {
        match &self.kind {
            FieldKind::Plain => "plain",
            FieldKind::Counter(c) => match c.measure {
                Measure::Count { .. } => "counter",
                Measure::Sum { .. } => "total",
            },
            FieldKind::Aggregator(a) => match a.source {
                AggregateSource::Usage => "usage_aggregator",
                AggregateSource::Limit => "limit_aggregator",
            },
        }
    }

    /// How usage is computed.
    pub fn kind(&self) -> &FieldKind {
        &self.kind
    }

    /// Whether the quota is owned by an external backend.
    pub fn is_backend(&self) -> bool {
        self.is_backend
    }

    /// Default limit declaration.
    pub fn limit(&self) -> &DefaultLimit {
        &self.default_limit
    }

    /// Whether the field applies to `scope`.
    pub fn is_connected_to(&self, scope: &Entity) -> bool {
        self.creation_condition
            .as_ref()
            .is_none_or(|condition| condition(scope))
    }
}

impl fmt::Debug for QuotaField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QuotaField")
            .field("kind", &self.kind)
            .field("default_limit", &self.default_limit)
            .field("is_backend", &self.is_backend)
            .field("has_creation_condition", &self.creation_condition.is_some())
            .finish()
    }
}

impl From<CounterField> for QuotaField {
    fn from(field: CounterField) -> Self {
        Self::with_kind(FieldKind::Counter(field))
    }
}

impl From<AggregatorField> for QuotaField {
    fn from(field: AggregatorField) -> Self {
        Self::with_kind(FieldKind::Aggregator(field))
    }
}
