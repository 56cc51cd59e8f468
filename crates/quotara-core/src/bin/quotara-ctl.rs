// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Quotara Control CLI
//!
//! Administrative tool for the quota store.
//!
//! Usage:
//!   quotara-ctl <command> [options]
//!
//! Commands:
//!   migrate                        Apply database migrations
//!   health                         Check database connectivity
//!   scope-types                    List scope types holding records
//!   scopes <scope_type>            List scope ids of a type
//!   show <scope_type> <scope_id>   Show the quotas of a scope
//!   over-limit <scope_type>        Show quotas of a type exceeding their limit
//!   purge <scope_type> <scope_id>  Delete every record of a scope

use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use sqlx::postgres::PgPoolOptions;
use sqlx::sqlite::SqlitePoolOptions;
use tracing::{error, info};

use quotara_core::config::Config;
use quotara_core::entity::EntityRef;
use quotara_core::migrations;
use quotara_core::persistence::{Persistence, PostgresPersistence, SqlitePersistence};

fn print_usage() {
    eprintln!(
        r#"Usage: quotara-ctl <command> [options]

Inspect and maintain the quotara quota store.

COMMANDS:
    migrate                         Apply database migrations
    health                          Check database connectivity
    scope-types                     List scope types holding records
    scopes <scope_type>             List scope ids of a type
    show <scope_type> <scope_id>    Show the quotas of a scope as JSON
    over-limit <scope_type>         Show quotas of a type exceeding their limit
    purge <scope_type> <scope_id>   Delete every record of a scope

ENVIRONMENT:
    QUOTARA_DATABASE_URL            PostgreSQL or SQLite connection string (required)
    QUOTARA_MAX_CONNECTIONS         Database pool size (default: 10)

EXAMPLES:
    # Prepare a fresh database
    QUOTARA_DATABASE_URL=sqlite:quotas.db?mode=rwc quotara-ctl migrate

    # Show the quotas of a project
    quotara-ctl show project 2f1c
"#
    );
}

#[derive(Debug, PartialEq)]
enum Command {
    Help,
    Migrate,
    Health,
    ScopeTypes,
    Scopes { scope_type: String },
    Show { scope: EntityRef },
    OverLimit { scope_type: String },
    Purge { scope: EntityRef },
}

fn parse_args_from_vec(args: &[String]) -> Result<Command, String> {
    let command = args.get(1).ok_or("No command specified")?;
    let rest = &args[2..];

    let exact = |n: usize, usage: &str| -> Result<(), String> {
        if rest.len() == n {
            Ok(())
        } else {
            Err(format!("Usage: quotara-ctl {} {}", command, usage).trim_end().to_string())
        }
    };

    match command.as_str() {
        "help" | "--help" | "-h" => Ok(Command::Help),
        "migrate" => exact(0, "").map(|_| Command::Migrate),
        "health" => exact(0, "").map(|_| Command::Health),
        "scope-types" => exact(0, "").map(|_| Command::ScopeTypes),
        "scopes" => exact(1, "<scope_type>").map(|_| Command::Scopes {
            scope_type: rest[0].clone(),
        }),
        "show" => exact(2, "<scope_type> <scope_id>").map(|_| Command::Show {
            scope: EntityRef::new(&rest[0], &rest[1]),
        }),
        "over-limit" => exact(1, "<scope_type>").map(|_| Command::OverLimit {
            scope_type: rest[0].clone(),
        }),
        "purge" => exact(2, "<scope_type> <scope_id>").map(|_| Command::Purge {
            scope: EntityRef::new(&rest[0], &rest[1]),
        }),
        other => Err(format!("Unknown command: {}", other)),
    }
}

/// Connect to the configured database, optionally migrating it first.
async fn open_store(config: &Config, migrate: bool) -> Result<Arc<dyn Persistence>> {
    if config.is_sqlite() {
        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.database_url)
            .await
            .context("Failed to connect to SQLite")?;
        if migrate {
            migrations::run_sqlite(&pool).await?;
        }
        Ok(Arc::new(SqlitePersistence::new(pool)))
    } else {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.database_url)
            .await
            .context("Failed to connect to PostgreSQL")?;
        if migrate {
            migrations::run_postgres(&pool).await?;
        }
        Ok(Arc::new(PostgresPersistence::new(pool)))
    }
}

async fn execute_command(store: &dyn Persistence, cmd: Command) -> Result<()> {
    match cmd {
        Command::Help => print_usage(),

        Command::Migrate => info!("Migrations completed"),

        Command::Health => {
            if !store.health_check_db().await? {
                return Err(anyhow!("Database health check failed"));
            }
            println!("ok");
        }

        Command::ScopeTypes => {
            for scope_type in store.list_scope_types().await? {
                println!("{}", scope_type);
            }
        }

        Command::Scopes { scope_type } => {
            for id in store.list_scope_ids(&scope_type).await? {
                println!("{}", id);
            }
        }

        Command::Show { scope } => {
            let records = store.list_quotas(&scope).await?;
            if records.is_empty() {
                return Err(anyhow!("No quotas recorded for {}", scope));
            }
            println!("{}", serde_json::to_string_pretty(&records)?);
        }

        Command::OverLimit { scope_type } => {
            let mut over = Vec::new();
            for id in store.list_scope_ids(&scope_type).await? {
                let scope = EntityRef::new(&scope_type, id);
                over.extend(
                    store
                        .list_quotas(&scope)
                        .await?
                        .into_iter()
                        .filter(|r| r.is_over_limit()),
                );
            }
            println!("{}", serde_json::to_string_pretty(&over)?);
        }

        Command::Purge { scope } => {
            let deleted = store.delete_scope_quotas(&scope).await?;
            info!(scope = %scope, deleted = deleted, "Purged quota records");
            println!("{}", deleted);
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file (from crate directory or parent directories)
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("quotara_core=info".parse()?),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();
    let cmd = match parse_args_from_vec(&args) {
        Ok(Command::Help) => {
            print_usage();
            return Ok(());
        }
        Ok(cmd) => cmd,
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!();
            print_usage();
            return Err(anyhow!(e));
        }
    };

    let config = Config::from_env().map_err(|e| {
        error!("Configuration error: {}", e);
        e
    })?;

    let store = open_store(&config, cmd == Command::Migrate).await?;
    execute_command(store.as_ref(), cmd).await
}

#[cfg(test)]
mod tests {
    use super::*;

    // Helper to create args vector from string slice
    fn args(a: &[&str]) -> Vec<String> {
        a.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_simple_commands() {
        assert_eq!(
            parse_args_from_vec(&args(&["quotara-ctl", "migrate"])),
            Ok(Command::Migrate)
        );
        assert_eq!(
            parse_args_from_vec(&args(&["quotara-ctl", "health"])),
            Ok(Command::Health)
        );
        assert_eq!(
            parse_args_from_vec(&args(&["quotara-ctl", "--help"])),
            Ok(Command::Help)
        );
    }

    #[test]
    fn test_parse_scope_commands() {
        assert_eq!(
            parse_args_from_vec(&args(&["quotara-ctl", "show", "project", "p-1"])),
            Ok(Command::Show {
                scope: EntityRef::new("project", "p-1")
            })
        );
        assert_eq!(
            parse_args_from_vec(&args(&["quotara-ctl", "over-limit", "tenant"])),
            Ok(Command::OverLimit {
                scope_type: "tenant".to_string()
            })
        );
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse_args_from_vec(&args(&["quotara-ctl"])).is_err());
        assert!(parse_args_from_vec(&args(&["quotara-ctl", "frobnicate"])).is_err());

        let err = parse_args_from_vec(&args(&["quotara-ctl", "show", "project"])).unwrap_err();
        assert_eq!(err, "Usage: quotara-ctl show <scope_type> <scope_id>");

        let err = parse_args_from_vec(&args(&["quotara-ctl", "health", "extra"])).unwrap_err();
        assert_eq!(err, "Usage: quotara-ctl health");
    }

    #[tokio::test]
    async fn test_execute_against_sqlite() {
        let store = SqlitePersistence::in_memory().await.unwrap();
        let scope = EntityRef::new("tenant", "t-1");
        store.ensure_quota(&scope, "vcpu", 2.0).await.unwrap();
        store.add_usage(&scope, "vcpu", 3.0).await.unwrap();

        execute_command(&store, Command::Health).await.unwrap();
        execute_command(
            &store,
            Command::OverLimit {
                scope_type: "tenant".to_string(),
            },
        )
        .await
        .unwrap();
        execute_command(&store, Command::Purge { scope: scope.clone() })
            .await
            .unwrap();

        let err = execute_command(&store, Command::Show { scope }).await.unwrap_err();
        assert!(err.to_string().contains("No quotas recorded"));
    }
}
