//! Persistence seams for the reservation core.
//!
//! The manager depends on two traits, never on a concrete backend:
//! - [`LeaseStore`]: atomic conditional reads/writes over reservation rows
//! - [`TagResolver`]: read-only lookup of a tag's bound artifact
//!
//! `SQLite` implementations live in [`reservation`] and [`tag`]. Both translate
//! backend errors through the [`errors::ErrorTransformer`] chosen by configuration.
//!
//! All reservation mutation goes through [`LeaseStore::create_or_update`] or the
//! compare-and-swap [`LeaseStore::update`]. A separate select-then-write pair is
//! never used to change a row.

pub mod errors;
pub mod reservation;
pub mod tag;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};

pub use self::{
    errors::{Dialect, ErrorTransformer},
    reservation::SqliteLeaseStore,
    tag::SqliteTagStore,
};
use crate::{
    config::DatabaseConfig,
    models::{Reservation, ReservationKey, Tag, TagKey},
    Error, Result,
};

/// Reservation table access.
///
/// # Errors
///
/// Implementations report failures using the catalog taxonomy only:
/// `NotFound` for a missing row, `LeaseConflict` for a lost conditional write,
/// `Internal`/`Unknown` for everything else.
#[async_trait]
pub trait LeaseStore: Send + Sync {
    /// Read the row for `key`. `NotFound` when absent.
    async fn get(&self, key: &ReservationKey) -> Result<Reservation>;

    /// Insert a new row. `LeaseConflict` when a row for the key already exists.
    async fn create(&self, reservation: &Reservation) -> Result<()>;

    /// Compare-and-swap: replace owner and expiry only if the stored expiry still
    /// equals `expected_prior_expiry`. Returns the number of rows changed; zero means
    /// someone else moved the row first.
    async fn update(
        &self,
        key: &ReservationKey,
        expected_prior_expiry: DateTime<Utc>,
        new_owner: &str,
        new_expiry: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<u64>;

    /// Insert, or on a key conflict overwrite the existing row only if it expired at
    /// or before `now` or is already held by the same owner.
    ///
    /// `LeaseConflict` when the existing row is live and held by someone else.
    async fn create_or_update(&self, reservation: &Reservation, now: DateTime<Utc>) -> Result<()>;

    /// Remove the row for `key`. Deleting an absent row succeeds.
    async fn delete(&self, key: &ReservationKey) -> Result<()>;
}

/// Resolves a tag to the artifact it is bound to.
#[async_trait]
pub trait TagResolver: Send + Sync {
    /// `NotFound` when no tag exists for `key`.
    async fn get_tag(&self, key: &TagKey) -> Result<Tag>;
}

/// A connected relational store plus the dialect's error transformer.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
    transformer: Arc<dyn ErrorTransformer>,
}

impl Database {
    /// Open a pool for `config.url`.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` for a dialect whose driver is not built in (only `SQLite` is).
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        if config.dialect == Dialect::Postgres {
            return Err(Error::invalid_config(
                "database.dialect \"postgres\" is not supported by this build; use \"sqlite\" or \"generic\"",
            ));
        }
        let transformer = config.dialect.error_transformer();

        // Every connection to `:memory:` is its own database.
        let max_connections = if config.url.contains(":memory:") {
            1
        } else {
            config.max_connections
        };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(&config.url)
            .await
            .map_err(|e| transformer.to_catalog_error(e))?;

        tracing::debug!(url = %config.url, dialect = %config.dialect, max_connections, "database connected");
        Ok(Self { pool, transformer })
    }

    #[must_use]
    pub fn from_pool(pool: SqlitePool, dialect: Dialect) -> Self {
        Self {
            pool,
            transformer: dialect.error_transformer(),
        }
    }

    #[must_use]
    pub const fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    #[must_use]
    pub fn lease_store(&self) -> SqliteLeaseStore {
        SqliteLeaseStore::new(self.pool.clone(), Arc::clone(&self.transformer))
    }

    #[must_use]
    pub fn tag_store(&self) -> SqliteTagStore {
        SqliteTagStore::new(self.pool.clone(), Arc::clone(&self.transformer))
    }

    /// Create all tables. Idempotent.
    pub async fn init(&self) -> Result<()> {
        self.lease_store().init().await?;
        self.tag_store().init().await
    }
}
