// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration loading from environment variables.

use std::time::Duration;

use crate::worker::RecalculationWorkerConfig;

/// Quotara configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// PostgreSQL or SQLite connection URL
    pub database_url: String,
    /// Maximum database connections in the pool
    pub max_connections: u32,
    /// Interval between scheduled recalculations; `None` disables them
    pub recalculate_interval: Option<Duration>,
    /// Delete stale quota records during scheduled recalculations
    pub prune_stale: bool,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Required:
    /// - `QUOTARA_DATABASE_URL`: PostgreSQL or SQLite connection string
    ///
    /// Optional (with defaults):
    /// - `QUOTARA_MAX_CONNECTIONS`: pool size (default: 10)
    /// - `QUOTARA_RECALCULATE_INTERVAL_SECS`: seconds between scheduled
    ///   recalculations, 0 disables them (default: 0)
    /// - `QUOTARA_PRUNE_STALE`: "true" or "1" to prune stale records (default: false)
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = std::env::var("QUOTARA_DATABASE_URL")
            .map_err(|_| ConfigError::Missing("QUOTARA_DATABASE_URL"))?;

        let max_connections: u32 = std::env::var("QUOTARA_MAX_CONNECTIONS")
            .unwrap_or_else(|_| "10".to_string())
            .parse()
            .ok()
            .filter(|n| *n > 0)
            .ok_or(ConfigError::Invalid(
                "QUOTARA_MAX_CONNECTIONS",
                "must be a positive integer",
            ))?;

        let interval_secs: u64 = std::env::var("QUOTARA_RECALCULATE_INTERVAL_SECS")
            .unwrap_or_else(|_| "0".to_string())
            .parse()
            .map_err(|_| {
                ConfigError::Invalid(
                    "QUOTARA_RECALCULATE_INTERVAL_SECS",
                    "must be a non-negative number of seconds",
                )
            })?;

        let prune_stale = match std::env::var("QUOTARA_PRUNE_STALE") {
            Err(_) => false,
            Ok(v) => match v.to_ascii_lowercase().as_str() {
                "true" | "1" => true,
                "false" | "0" | "" => false,
                _ => {
                    return Err(ConfigError::Invalid(
                        "QUOTARA_PRUNE_STALE",
                        "must be true, false, 1 or 0",
                    ));
                }
            },
        };

        Ok(Self {
            database_url,
            max_connections,
            recalculate_interval: (interval_secs > 0).then(|| Duration::from_secs(interval_secs)),
            prune_stale,
        })
    }

    /// Whether the connection URL points at SQLite.
    pub fn is_sqlite(&self) -> bool {
        self.database_url.starts_with("sqlite:")
    }

    /// Settings for the scheduled recalculation worker.
    pub fn worker(&self) -> RecalculationWorkerConfig {
        match self.recalculate_interval {
            Some(interval) => RecalculationWorkerConfig {
                enabled: true,
                interval,
                prune_stale: self.prune_stale,
            },
            None => RecalculationWorkerConfig {
                prune_stale: self.prune_stale,
                ..RecalculationWorkerConfig::default()
            },
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),

    /// An environment variable has an invalid value.
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, &'static str),
}
