// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for quotara-core.
//!
//! Every failure surfaced by the engine, the registry or a persistence
//! backend is a [`QuotaError`]. Each variant carries a stable machine-readable
//! code (see [`QuotaError::error_code`]) for callers that translate errors
//! into API responses.

use thiserror::Error;

use crate::entity::EntityRef;

/// Result type using QuotaError
pub type Result<T> = std::result::Result<T, QuotaError>;

/// Errors produced by quota operations.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum QuotaError {
    /// No quota record with this name exists for the scope.
    #[error("Quota '{name}' is not defined for scope '{scope}'")]
    UnknownField {
        /// The scope that was queried.
        scope: EntityRef,
        /// The requested quota name.
        name: String,
    },

    /// Attempt to change the limit of a backend quota through the regular API.
    #[error("Quota '{name}' of scope '{scope}' is a backend quota; its limit is read-only")]
    BackendQuotaImmutable {
        /// The scope owning the quota.
        scope: EntityRef,
        /// The quota name.
        name: String,
    },

    /// A field with the same name was already registered for the scope type.
    #[error("Quota field '{name}' is already registered for scope type '{scope_type}'")]
    DuplicateField {
        /// The scope type.
        scope_type: String,
        /// The duplicated field name.
        name: String,
    },

    /// An aggregator references a child field that is not registered.
    #[error(
        "Aggregator '{scope_type}.{name}' references unknown child field '{child_type}.{child_field}'"
    )]
    UnknownChildField {
        /// Scope type owning the aggregator.
        scope_type: String,
        /// Aggregator field name.
        name: String,
        /// Child scope type.
        child_type: String,
        /// Child field name.
        child_field: String,
    },

    /// Aggregator fields depend on each other in a cycle.
    #[error("Cyclic quota aggregation between fields: {}", fields.join(" -> "))]
    CyclicAggregation {
        /// Fields participating in the cycle, as `scope_type.name`.
        fields: Vec<String>,
    },

    /// A scope path could not be walked from an entity.
    #[error("Cannot follow '{attribute}' from '{entity}': {reason}")]
    InvalidPath {
        /// The entity the walk was at.
        entity: EntityRef,
        /// The path segment that failed.
        attribute: String,
        /// Why the segment could not be followed.
        reason: String,
    },

    /// An entity attribute is missing or has the wrong type.
    #[error("Attribute '{attribute}' of '{entity}' must be {expected}")]
    InvalidAttribute {
        /// The entity holding the attribute.
        entity: EntityRef,
        /// The attribute name.
        attribute: String,
        /// Description of the expected value.
        expected: &'static str,
    },

    /// The host entity graph failed.
    #[error("Entity graph error during '{operation}': {details}")]
    Graph {
        /// The operation that failed.
        operation: String,
        /// Error details.
        details: String,
    },

    /// Database operation failed.
    #[error("Database error during '{operation}': {details}")]
    Database {
        /// The operation that failed.
        operation: String,
        /// Error details.
        details: String,
    },
}

impl QuotaError {
    /// Get the error code string for this error type.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::UnknownField { .. } => "UNKNOWN_FIELD",
            Self::BackendQuotaImmutable { .. } => "BACKEND_QUOTA_IMMUTABLE",
            Self::DuplicateField { .. } => "DUPLICATE_FIELD",
            Self::UnknownChildField { .. } => "UNKNOWN_CHILD_FIELD",
            Self::CyclicAggregation { .. } => "CYCLIC_AGGREGATION",
            Self::InvalidPath { .. } => "INVALID_PATH",
            Self::InvalidAttribute { .. } => "INVALID_ATTRIBUTE",
            Self::Graph { .. } => "GRAPH_ERROR",
            Self::Database { .. } => "DATABASE_ERROR",
        }
    }

    /// Registration errors are only raised while building the registry.
    pub fn is_registration_error(&self) -> bool {
        matches!(
            self,
            Self::DuplicateField { .. }
                | Self::UnknownChildField { .. }
                | Self::CyclicAggregation { .. }
        )
    }

    pub(crate) fn unknown_field(scope: &EntityRef, name: &str) -> Self {
        Self::UnknownField {
            scope: scope.clone(),
            name: name.to_string(),
        }
    }

    pub(crate) fn database(operation: &str, err: impl std::fmt::Display) -> Self {
        Self::Database {
            operation: operation.to_string(),
            details: err.to_string(),
        }
    }
}

impl From<sqlx::Error> for QuotaError {
    fn from(err: sqlx::Error) -> Self {
        QuotaError::Database {
            operation: "query".to_string(),
            details: err.to_string(),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for QuotaError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        QuotaError::Database {
            operation: "migrate".to_string(),
            details: err.to_string(),
        }
    }
}
