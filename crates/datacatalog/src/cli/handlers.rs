//! Command dispatch
//!
//! Loads configuration, opens the catalog and runs one subcommand under the
//! configured request timeout. Results are printed to stdout as JSON.

use std::{path::PathBuf, sync::Arc};

use anyhow::Result;
use clap::ArgMatches;
use datacatalog_core::{load_config, Config, Database, Error, ReservationManager, SystemClock};

use crate::commands::{self, Catalog};

pub async fn dispatch(matches: &ArgMatches) -> Result<()> {
    let config = resolve_config(matches).await?;
    let timeout = config.server.request_timeout();

    let output = tokio::time::timeout(timeout, run(matches, &config))
        .await
        .map_err(|_| {
            Error::unknown(format!(
                "request timed out after {}ms; the outcome is unknown, run `datacatalog get` to learn it",
                config.server.request_timeout_ms
            ))
        })??;

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

async fn resolve_config(matches: &ArgMatches) -> Result<Config> {
    let explicit = matches.get_one::<String>("config").map(PathBuf::from);
    let mut config = load_config(explicit.as_deref()).await?;

    if let Some(url) = matches.get_one::<String>("database-url") {
        config.database.url.clone_from(url);
    }
    Ok(config)
}

async fn run(matches: &ArgMatches, config: &Config) -> Result<serde_json::Value> {
    let db = Database::connect(&config.database).await?;
    db.init().await?;

    let catalog = Catalog {
        manager: ReservationManager::new(
            Arc::new(db.tag_store()),
            Arc::new(db.lease_store()),
            Arc::new(SystemClock),
            config.reservation.clone(),
        ),
        tags: db.tag_store(),
    };

    let output = match matches.subcommand() {
        Some(("init", _)) => Ok(serde_json::json!({ "initialized": true })),
        Some(("reserve", sub_m)) => commands::reserve::run(sub_m, &catalog).await,
        Some(("extend", sub_m)) => commands::extend::run(sub_m, &catalog).await,
        Some(("release", sub_m)) => commands::release::run(sub_m, &catalog).await,
        Some(("get", sub_m)) => commands::get::run(sub_m, &catalog).await,
        Some(("tag", sub_m)) => commands::tag::run(sub_m, &catalog).await,
        _ => anyhow::bail!("Unknown command. Run 'datacatalog --help' for usage."),
    };

    tracing::debug!(metrics = ?catalog.manager.metrics().snapshot(), "command finished");
    output
}

/// Render an error for stderr, with its stable code when it is a catalog error.
pub fn format_error(err: &anyhow::Error) -> String {
    err.downcast_ref::<Error>().map_or_else(
        || format!("Error [ERROR]: {err:#}"),
        |e| format!("Error [{}]: {e}", e.code()),
    )
}

/// Exit code for a failed command.
pub fn exit_code(err: &anyhow::Error) -> i32 {
    err.downcast_ref::<Error>().map_or(1, Error::exit_code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_errors_keep_their_code() {
        let err = anyhow::Error::from(Error::lease_conflict("held by A"));
        assert_eq!(format_error(&err), "Error [LEASE_CONFLICT]: Lease conflict: held by A");
        assert_eq!(exit_code(&err), 4);
    }

    #[test]
    fn test_other_errors_are_generic() {
        let err = anyhow::anyhow!("boom");
        assert_eq!(format_error(&err), "Error [ERROR]: boom");
        assert_eq!(exit_code(&err), 1);
    }
}
