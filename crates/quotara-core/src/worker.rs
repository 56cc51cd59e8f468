// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Background worker running scheduled quota recalculations.
//!
//! Incremental propagation keeps quotas current; the worker repairs drift
//! left by missed lifecycle events by periodically running
//! [`QuotaEngine::recalculate_all`].

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tracing::{info, warn};

use crate::engine::QuotaEngine;
use crate::recalculation::{RecalculateOptions, RecalculationReport};

/// Configuration for the recalculation worker.
#[derive(Debug, Clone)]
pub struct RecalculationWorkerConfig {
    /// Whether scheduled recalculation is enabled.
    pub enabled: bool,
    /// How often to recalculate.
    pub interval: Duration,
    /// Delete stale records on every run.
    pub prune_stale: bool,
}

impl Default for RecalculationWorkerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval: Duration::from_secs(24 * 3600),
            prune_stale: false,
        }
    }
}

/// Background worker that periodically recalculates all quotas.
pub struct RecalculationWorker {
    engine: QuotaEngine,
    config: RecalculationWorkerConfig,
    shutdown: Arc<Notify>,
}

impl RecalculationWorker {
    /// Create a new recalculation worker.
    pub fn new(engine: QuotaEngine, config: RecalculationWorkerConfig) -> Self {
        Self {
            engine,
            config,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Get a handle that can be used to signal shutdown.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Run the worker loop until the shutdown signal is received.
    pub async fn run(&self) {
        if !self.config.enabled {
            info!("Quota recalculation worker disabled");
            return;
        }

        info!(
            interval_secs = self.config.interval.as_secs(),
            prune_stale = self.config.prune_stale,
            "Quota recalculation worker started"
        );

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.notified() => {
                    info!("Quota recalculation worker received shutdown signal");
                    break;
                }

                _ = tokio::time::sleep(self.config.interval) => {
                    self.run_once().await;
                }
            }
        }

        info!("Quota recalculation worker stopped");
    }

    /// Run a single recalculation.
    pub async fn run_once(&self) -> RecalculationReport {
        let report = self
            .engine
            .recalculate_all(RecalculateOptions {
                prune_stale: self.config.prune_stale,
            })
            .await;

        if !report.is_clean() {
            warn!(
                failures = report.failures.len(),
                "Scheduled quota recalculation finished with failures"
            );
        }
        report
    }
}
