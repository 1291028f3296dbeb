//! Configuration loading and management
//!
//! # Hierarchy
//!
//! Configuration is loaded in this order (later overrides earlier):
//! 1. Built-in defaults
//! 2. Global config: ~/.config/datacatalog/config.toml
//! 3. Project config: .datacatalog/config.toml
//! 4. Explicit config file (`--config`)
//! 5. Environment variables: `DATACATALOG_*`
//!
//! # Example Config
//!
//! ```toml
//! [reservation]
//! heartbeat_interval_secs = 5
//! grace_period_multiplier = 3
//!
//! [database]
//! url = "sqlite:datacatalog.db?mode=rwc"
//! dialect = "sqlite"
//! max_connections = 5
//!
//! [server]
//! request_timeout_ms = 10000
//! ```

use std::path::{Path, PathBuf};

use chrono::Duration;
use serde::Deserialize;

use crate::{repositories::errors::Dialect, Error, Result};

const MAX_CONFIG_FILE_SIZE: u64 = 1_048_576;

/// Upper bound on heartbeat interval × grace period multiplier (one week).
pub const MAX_LEASE_TTL_SECS: u64 = 7 * 24 * 60 * 60;

/// Lease timing. TTL = heartbeat interval × grace period multiplier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationConfig {
    pub heartbeat_interval_secs: u64,
    pub grace_period_multiplier: u32,
}

impl Default for ReservationConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: 5,
            grace_period_multiplier: 3,
        }
    }
}

impl ReservationConfig {
    /// Clamped to [`MAX_LEASE_TTL_SECS`]; `validate()` rejects anything larger.
    pub fn heartbeat_interval(&self) -> Duration {
        let secs = self.heartbeat_interval_secs.min(MAX_LEASE_TTL_SECS);
        Duration::try_seconds(i64::try_from(secs).unwrap_or_default()).unwrap_or_default()
    }

    /// How long a freshly (re)acquired lease lives.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` when the product overflows or exceeds [`MAX_LEASE_TTL_SECS`].
    pub fn lease_ttl(&self) -> Result<Duration> {
        self.heartbeat_interval_secs
            .checked_mul(u64::from(self.grace_period_multiplier))
            .filter(|secs| *secs <= MAX_LEASE_TTL_SECS)
            .and_then(|secs| i64::try_from(secs).ok())
            .and_then(Duration::try_seconds)
            .ok_or_else(|| {
                Error::invalid_config(format!(
                    "reservation lease TTL (heartbeat_interval_secs × grace_period_multiplier) must not exceed {MAX_LEASE_TTL_SECS} seconds"
                ))
            })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    pub url: String,
    pub dialect: Dialect,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite:datacatalog.db?mode=rwc".to_string(),
            dialect: Dialect::Sqlite,
            max_connections: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub request_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: 10_000,
        }
    }
}

impl ServerConfig {
    pub const fn request_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.request_timeout_ms)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Config {
    pub reservation: ReservationConfig,
    pub database: DatabaseConfig,
    pub server: ServerConfig,
}

// Partial configs: only keys present in a file override lower layers.

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PartialConfig {
    reservation: Option<PartialReservationConfig>,
    database: Option<PartialDatabaseConfig>,
    server: Option<PartialServerConfig>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct PartialReservationConfig {
    heartbeat_interval_secs: Option<u64>,
    grace_period_multiplier: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct PartialDatabaseConfig {
    url: Option<String>,
    dialect: Option<Dialect>,
    max_connections: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct PartialServerConfig {
    request_timeout_ms: Option<u64>,
}

impl Config {
    pub fn merge_partial(&mut self, partial: PartialConfig) {
        if let Some(r) = partial.reservation {
            if let Some(v) = r.heartbeat_interval_secs {
                self.reservation.heartbeat_interval_secs = v;
            }
            if let Some(v) = r.grace_period_multiplier {
                self.reservation.grace_period_multiplier = v;
            }
        }
        if let Some(d) = partial.database {
            if let Some(v) = d.url {
                self.database.url = v;
            }
            if let Some(v) = d.dialect {
                self.database.dialect = v;
            }
            if let Some(v) = d.max_connections {
                self.database.max_connections = v;
            }
        }
        if let Some(s) = partial.server {
            if let Some(v) = s.request_timeout_ms {
                self.server.request_timeout_ms = v;
            }
        }
    }

    /// Apply `DATACATALOG_*` overrides from the given lookup.
    ///
    /// Taking the lookup as a parameter keeps this testable without touching the process
    /// environment; [`load_config`] passes `std::env::var`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("DATACATALOG_HEARTBEAT_INTERVAL_SECS") {
            self.reservation.heartbeat_interval_secs = parse_env(
                "DATACATALOG_HEARTBEAT_INTERVAL_SECS",
                &value,
            )?;
        }
        if let Some(value) = lookup("DATACATALOG_GRACE_PERIOD_MULTIPLIER") {
            self.reservation.grace_period_multiplier =
                parse_env("DATACATALOG_GRACE_PERIOD_MULTIPLIER", &value)?;
        }
        if let Some(value) = lookup("DATACATALOG_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = lookup("DATACATALOG_DATABASE_DIALECT") {
            self.database.dialect = parse_env("DATACATALOG_DATABASE_DIALECT", &value)?;
        }
        if let Some(value) = lookup("DATACATALOG_MAX_CONNECTIONS") {
            self.database.max_connections = parse_env("DATACATALOG_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = lookup("DATACATALOG_REQUEST_TIMEOUT_MS") {
            self.server.request_timeout_ms = parse_env("DATACATALOG_REQUEST_TIMEOUT_MS", &value)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.reservation.heartbeat_interval_secs == 0 {
            return Err(Error::invalid_config(
                "reservation.heartbeat_interval_secs must be greater than 0",
            ));
        }
        if self.reservation.grace_period_multiplier == 0 {
            return Err(Error::invalid_config(
                "reservation.grace_period_multiplier must be at least 1",
            ));
        }
        self.reservation.lease_ttl()?;
        if self.database.url.trim().is_empty() {
            return Err(Error::invalid_config("database.url cannot be empty"));
        }
        if self.database.max_connections == 0 {
            return Err(Error::invalid_config(
                "database.max_connections must be at least 1",
            ));
        }
        if self.server.request_timeout_ms == 0 {
            return Err(Error::invalid_config(
                "server.request_timeout_ms must be greater than 0",
            ));
        }
        Ok(())
    }
}

fn parse_env<T>(name: &str, value: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| Error::invalid_config(format!("Invalid {name} value: {e}")))
}

/// Load configuration from all layers.
///
/// # Errors
///
/// Returns error if:
/// - A config file is malformed TOML or contains unknown keys
/// - An environment override cannot be parsed
/// - The merged values fail validation
pub async fn load_config(explicit: Option<&Path>) -> Result<Config> {
    let mut config = Config::default();

    let layered = [global_config_path(), project_config_path()];
    for path in layered.into_iter().flatten() {
        if let Some(partial) = load_optional(&path).await? {
            config.merge_partial(partial);
        }
    }

    // An explicitly requested file must exist.
    if let Some(path) = explicit {
        config.merge_partial(load_partial_toml_file(path).await?);
    }

    config.apply_env(|name| std::env::var(name).ok())?;
    config.validate()?;

    tracing::debug!(?config, "configuration loaded");
    Ok(config)
}

async fn load_optional(path: &Path) -> Result<Option<PartialConfig>> {
    match tokio::fs::metadata(path).await {
        Ok(_) => load_partial_toml_file(path).await.map(Some),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(Error::invalid_config(format!(
            "Failed to read config file metadata {}: {e}",
            path.display()
        ))),
    }
}

/// Load a TOML file into a [`PartialConfig`].
pub async fn load_partial_toml_file(path: &Path) -> Result<PartialConfig> {
    let metadata = tokio::fs::metadata(path).await.map_err(|e| {
        Error::invalid_config(format!(
            "Failed to read config file metadata {}: {e}",
            path.display()
        ))
    })?;

    if metadata.len() > MAX_CONFIG_FILE_SIZE {
        return Err(Error::invalid_config(format!(
            "Config file {} exceeds {MAX_CONFIG_FILE_SIZE} bytes",
            path.display()
        )));
    }

    let content = tokio::fs::read_to_string(path).await.map_err(|e| {
        Error::invalid_config(format!("Failed to read config file {}: {e}", path.display()))
    })?;

    toml::from_str(&content).map_err(|e| {
        Error::invalid_config(format!("Failed to parse config: {}: {e}", path.display()))
    })
}

fn project_config_path() -> Option<PathBuf> {
    std::env::current_dir()
        .ok()
        .map(|dir| dir.join(".datacatalog/config.toml"))
}

fn global_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "datacatalog")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}
