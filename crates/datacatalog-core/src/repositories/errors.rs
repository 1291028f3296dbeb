//! Backend error translation.
//!
//! Each relational dialect reports "unique constraint violated" differently. Stores
//! hold one [`ErrorTransformer`], picked from configuration through [`Dialect`], and
//! run every `sqlx::Error` through it so the reservation manager only ever sees the
//! catalog taxonomy.

use std::sync::Arc;

use serde::Deserialize;
use strum::{Display, EnumString};

use crate::Error;

// SQLite extended result codes
const SQLITE_CONSTRAINT_PRIMARYKEY: &str = "1555";
const SQLITE_CONSTRAINT_UNIQUE: &str = "2067";

// PostgreSQL SQLSTATE codes
const PG_UNIQUE_VIOLATION: &str = "23505";
const PG_UNDEFINED_TABLE: &str = "42P01";

const UNEXPECTED_TYPE: &str = "unexpected error type for";
const DUPLICATE_KEY: &str = "duplicate key value violates unique constraint";

/// Translates a backend-native error into the catalog taxonomy.
pub trait ErrorTransformer: Send + Sync + std::fmt::Debug {
    fn to_catalog_error(&self, err: sqlx::Error) -> Error;
}

/// Backend dialect, selected by `database.dialect`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString, Deserialize)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    #[default]
    Sqlite,
    Postgres,
    Generic,
}

impl Dialect {
    pub fn error_transformer(self) -> Arc<dyn ErrorTransformer> {
        match self {
            Self::Sqlite => Arc::new(SqliteErrorTransformer),
            Self::Postgres => Arc::new(PostgresErrorTransformer),
            Self::Generic => Arc::new(GenericErrorTransformer),
        }
    }
}

/// Dialect-agnostic fallback: only knows about missing rows.
#[derive(Debug, Clone, Copy, Default)]
pub struct GenericErrorTransformer;

impl ErrorTransformer for GenericErrorTransformer {
    fn to_catalog_error(&self, err: sqlx::Error) -> Error {
        match err {
            sqlx::Error::RowNotFound => Error::not_found("entry not found"),
            other => {
                tracing::info!(error = %other, "generic database error detected");
                Error::internal(format!("{UNEXPECTED_TYPE}: {other}"))
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteErrorTransformer;

impl ErrorTransformer for SqliteErrorTransformer {
    fn to_catalog_error(&self, err: sqlx::Error) -> Error {
        let db_err = match err {
            sqlx::Error::Database(db_err) => db_err,
            other => return GenericErrorTransformer.to_catalog_error(other),
        };

        let code = db_err.code().map(|c| c.into_owned()).unwrap_or_default();
        match code.as_str() {
            SQLITE_CONSTRAINT_PRIMARYKEY | SQLITE_CONSTRAINT_UNIQUE => {
                Error::lease_conflict(format!("{DUPLICATE_KEY} {}", db_err.message()))
            }
            _ => Error::unknown(format!(
                "failed database operation with code [{code}] and msg [{}]",
                db_err.message()
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresErrorTransformer;

impl ErrorTransformer for PostgresErrorTransformer {
    fn to_catalog_error(&self, err: sqlx::Error) -> Error {
        let db_err = match err {
            sqlx::Error::Database(db_err) => db_err,
            other => return GenericErrorTransformer.to_catalog_error(other),
        };

        let code = db_err.code().map(|c| c.into_owned()).unwrap_or_default();
        match code.as_str() {
            PG_UNIQUE_VIOLATION => {
                Error::lease_conflict(format!("{DUPLICATE_KEY} {}", db_err.message()))
            }
            PG_UNDEFINED_TABLE => Error::invalid_argument(format!(
                "cannot query with specified table attributes: {}",
                db_err.message()
            )),
            _ => Error::unknown(format!(
                "failed database operation with code [{code}] and msg [{}]",
                db_err.message()
            )),
        }
    }
}
