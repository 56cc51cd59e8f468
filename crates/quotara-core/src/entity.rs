// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Entity snapshots as seen by the quota engine.
//!
//! The engine never owns application entities. It receives snapshots: an
//! identity plus the attribute values it needs (foreign-key references and
//! numeric fields). Deletion snapshots must be taken before the row is
//! removed so that [`ScopePath`] walks can still start from them.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{QuotaError, Result};

/// Identity of an entity: its kind (scope type) and id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityRef {
    /// Entity kind, e.g. `"project"`.
    pub kind: String,
    /// Identifier unique within the kind.
    pub id: String,
}

impl EntityRef {
    /// Create a reference from a kind and an id.
    pub fn new(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

/// Attribute value of an entity snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    /// Absent value (a null foreign key or column).
    Null,
    /// Boolean flag.
    Bool(bool),
    /// Numeric value.
    Number(f64),
    /// Text value.
    Text(String),
    /// Reference to another entity (a foreign key).
    Reference(EntityRef),
}

impl Value {
    /// Name of the variant, used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Number(_) => "number",
            Self::Text(_) => "text",
            Self::Reference(_) => "reference",
        }
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Number(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Number(v as f64)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Number(v as f64)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<EntityRef> for Value {
    fn from(v: EntityRef) -> Self {
        Value::Reference(v)
    }
}

impl From<&Entity> for Value {
    fn from(v: &Entity) -> Self {
        Value::Reference(v.reference.clone())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// Snapshot of an entity: identity plus attribute values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// Identity of the entity.
    pub reference: EntityRef,
    /// Attribute values by name.
    #[serde(default)]
    pub attributes: BTreeMap<String, Value>,
}

impl Entity {
    /// Create a snapshot without attributes.
    pub fn new(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            reference: EntityRef::new(kind, id),
            attributes: BTreeMap::new(),
        }
    }

    /// Builder-style attribute setter.
    pub fn with(mut self, attribute: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(attribute.into(), value.into());
        self
    }

    /// Set an attribute in place.
    pub fn set(&mut self, attribute: impl Into<String>, value: impl Into<Value>) {
        self.attributes.insert(attribute.into(), value.into());
    }

    /// Entity kind.
    pub fn kind(&self) -> &str {
        &self.reference.kind
    }

    /// Entity id.
    pub fn id(&self) -> &str {
        &self.reference.id
    }

    /// Raw attribute lookup.
    pub fn get(&self, attribute: &str) -> Option<&Value> {
        self.attributes.get(attribute)
    }

    /// Numeric attribute. Null counts as zero, a missing attribute or a
    /// non-numeric value is an error.
    pub fn number(&self, attribute: &str) -> Result<f64> {
        match self.attributes.get(attribute) {
            Some(Value::Number(n)) => Ok(*n),
            Some(Value::Null) => Ok(0.0),
            _ => Err(QuotaError::InvalidAttribute {
                entity: self.reference.clone(),
                attribute: attribute.to_string(),
                expected: "a number",
            }),
        }
    }

    /// Follow a reference attribute one hop.
    ///
    /// Returns `Ok(None)` for a null or absent reference.
    pub fn reference_at(&self, attribute: &str) -> Result<Option<&EntityRef>> {
        match self.attributes.get(attribute) {
            Some(Value::Reference(r)) => Ok(Some(r)),
            Some(Value::Null) | None => Ok(None),
            Some(other) => Err(QuotaError::InvalidPath {
                entity: self.reference.clone(),
                attribute: attribute.to_string(),
                reason: format!("expected a reference, found {}", other.type_name()),
            }),
        }
    }
}

/// Dotted attribute chain from an entity up to its owning scope.
///
/// An empty path designates the entity itself.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct ScopePath(Vec<String>);

impl ScopePath {
    /// Parse `"parent.parent"` into segments. Empty segments are ignored.
    pub fn parse(path: &str) -> Self {
        Self(
            path.split('.')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
        )
    }

    /// Path segments in walk order.
    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// Whether the path designates the entity itself.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for ScopePath {
    fn from(path: &str) -> Self {
        Self::parse(path)
    }
}

impl fmt::Display for ScopePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("."))
    }
}
