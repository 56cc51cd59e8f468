// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Quotara Core - Quota Aggregation and Propagation Engine
//!
//! This crate maintains derived quota metrics (counters, totals and
//! aggregates) for a tree of scoped entities, keeps them consistent under
//! create, update and delete events, and repairs them with bulk
//! recalculation. Quota records are persisted to SQLite or PostgreSQL.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                    Host application                          │
//! │   (owns entities, calls on_created / on_updated / on_deleted)│
//! └──────────────────────────────────────────────────────────────┘
//!          │ lifecycle events                  ▲ EntityGraph
//!          ▼                                   │ (get / list / related)
//! ┌──────────────────────────────────────────────────────────────┐
//! │                       QuotaEngine                            │
//! │  Registry ─► Counter / Total / Aggregator evaluators         │
//! │  Delta propagation (incremental)   Recalculation (repair)    │
//! └──────────────────────────────────────────────────────────────┘
//!          │
//!          ▼
//! ┌───────────────────────┐
//! │  SQLite / PostgreSQL  │
//! │   (quotas table)      │
//! └───────────────────────┘
//! ```
//!
//! # Field Kinds
//!
//! | Kind | Usage is | Maintained by |
//! |------|----------|---------------|
//! | Plain | set by callers | [`QuotaEngine::set_quota_usage`], [`QuotaEngine::add_quota_usage`] |
//! | Counter | number or weighted sum of target entities | lifecycle events |
//! | Total | sum of a numeric attribute of target entities | lifecycle events |
//! | UsageAggregator | sum of child scopes' usage | propagation from children |
//! | LimitAggregator | sum of child scopes' finite limits | propagation from children |
//!
//! Limits are `-1` ([`fields::UNLIMITED`]) when unbounded. Backend quotas
//! reject [`QuotaEngine::set_quota_limit`] and are updated through
//! [`QuotaEngine::sync_backend_limit`].
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use quotara_core::{ChildScopes, Entity, MemoryEntityGraph, QuotaEngine, QuotaField, Registry};
//! use quotara_core::persistence::SqlitePersistence;
//!
//! let mut builder = Registry::builder();
//! builder
//!     .add("project", "storage", QuotaField::total(["volume"], "project", "size"))?
//!     .add("customer", "storage", QuotaField::usage_aggregator(ChildScopes::new("project", "customer")))?;
//!
//! let graph = Arc::new(MemoryEntityGraph::new());
//! let store = Arc::new(SqlitePersistence::from_path(".data/quotas.db").await?);
//! let engine = QuotaEngine::new(Arc::new(builder.build()?), graph, store);
//!
//! engine.on_created(&volume).await?;
//! ```
//!
//! # Configuration
//!
//! The `quotara-ctl` binary and [`config::Config`] read environment variables:
//!
//! | Variable | Required | Default | Description |
//! |----------|----------|---------|-------------|
//! | `QUOTARA_DATABASE_URL` | Yes | - | PostgreSQL or SQLite connection string |
//! | `QUOTARA_MAX_CONNECTIONS` | No | `10` | Database pool size |
//! | `QUOTARA_RECALCULATE_INTERVAL_SECS` | No | `0` | Scheduled recalculation interval, 0 disables |
//! | `QUOTARA_PRUNE_STALE` | No | `false` | Delete stale records when recalculating |
//!
//! # Modules
//!
//! - [`entity`] and [`graph`]: entity snapshots and scope path walking
//! - [`fields`] and [`registry`]: quota field declarations
//! - [`engine`]: query and mutation API, delta propagation
//! - [`recalculation`]: full recalculation and hooks
//! - [`persistence`]: quota store trait with SQLite and PostgreSQL backends
//! - [`worker`]: scheduled recalculation
//! - [`error`]: error types with stable error codes

#![deny(missing_docs)]

/// Configuration loaded from environment variables.
pub mod config;

/// Quota engine API and delta propagation.
pub mod engine;

/// Entity snapshots, references and scope paths.
pub mod entity;

/// Error types with stable error codes.
pub mod error;

/// Quota field declarations.
pub mod fields;

/// Host entity graph access.
pub mod graph;

mod lifecycle;

/// Embedded database migrations.
pub mod migrations;

/// Quota store trait and backends.
pub mod persistence;

/// Full recalculation of quota usage.
pub mod recalculation;

/// Registry of quota fields per scope type.
pub mod registry;

/// Scheduled recalculation worker.
pub mod worker;

pub use engine::QuotaEngine;
pub use entity::{Entity, EntityRef, ScopePath, Value};
pub use error::{QuotaError, Result};
pub use fields::{AggregatorField, ChildScopes, CounterField, DefaultLimit, QuotaField, UNLIMITED};
pub use graph::{EntityGraph, MemoryEntityGraph, Resolution};
pub use recalculation::{RecalculateOptions, RecalculationHook, RecalculationReport};
pub use registry::{Registry, RegistryBuilder};
