//! `SQLite` implementation of [`LeaseStore`].
//!
//! The composite primary key over the dataset columns and tag name is what makes a
//! duplicate `create` detectable, and what `create_or_update`'s conflict clause keys on.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{
    query::{Query, QueryAs},
    sqlite::SqliteArguments,
    Sqlite, SqlitePool,
};

use super::{errors::ErrorTransformer, LeaseStore};
use crate::{
    models::{decode_timestamp, encode_timestamp, DatasetId, Reservation, ReservationKey},
    Error, Result,
};

type SqliteQuery<'q> = Query<'q, Sqlite, SqliteArguments<'q>>;
type SqliteQueryAs<'q, O> = QueryAs<'q, Sqlite, O, SqliteArguments<'q>>;

const KEY_PREDICATE: &str = "dataset_project = ? AND dataset_domain = ? AND dataset_name = ? \
                             AND dataset_version = ? AND tag_name = ?";

/// Reservation rows backed by `SQLite`.
#[derive(Debug, Clone)]
pub struct SqliteLeaseStore {
    db: SqlitePool,
    transformer: Arc<dyn ErrorTransformer>,
}

#[derive(Debug, sqlx::FromRow)]
struct ReservationRow {
    dataset_project: String,
    dataset_domain: String,
    dataset_name: String,
    dataset_version: String,
    tag_name: String,
    owner_id: String,
    expires_at: String,
    created_at: String,
    updated_at: String,
    serialized_metadata: Option<Vec<u8>>,
}

impl TryFrom<ReservationRow> for Reservation {
    type Error = Error;

    fn try_from(row: ReservationRow) -> Result<Self> {
        Ok(Self {
            key: ReservationKey::new(
                DatasetId::new(
                    row.dataset_project,
                    row.dataset_domain,
                    row.dataset_name,
                    row.dataset_version,
                ),
                row.tag_name,
            ),
            owner_id: row.owner_id,
            expires_at: decode_timestamp("expires_at", &row.expires_at)?,
            created_at: decode_timestamp("created_at", &row.created_at)?,
            updated_at: decode_timestamp("updated_at", &row.updated_at)?,
            serialized_metadata: row.serialized_metadata,
        })
    }
}

fn bind_key<'q>(query: SqliteQuery<'q>, key: &'q ReservationKey) -> SqliteQuery<'q> {
    query
        .bind(&key.dataset.project)
        .bind(&key.dataset.domain)
        .bind(&key.dataset.name)
        .bind(&key.dataset.version)
        .bind(&key.tag_name)
}

fn bind_key_as<'q, O>(query: SqliteQueryAs<'q, O>, key: &'q ReservationKey) -> SqliteQueryAs<'q, O> {
    query
        .bind(&key.dataset.project)
        .bind(&key.dataset.domain)
        .bind(&key.dataset.name)
        .bind(&key.dataset.version)
        .bind(&key.tag_name)
}

impl SqliteLeaseStore {
    #[must_use]
    pub fn new(db: SqlitePool, transformer: Arc<dyn ErrorTransformer>) -> Self {
        Self { db, transformer }
    }

    /// Initialize the reservations table.
    pub async fn init(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS reservations (
                dataset_project TEXT NOT NULL,
                dataset_domain TEXT NOT NULL,
                dataset_name TEXT NOT NULL,
                dataset_version TEXT NOT NULL,
                tag_name TEXT NOT NULL,
                owner_id TEXT NOT NULL,
                expires_at TEXT NOT NULL,
                serialized_metadata BLOB,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (dataset_project, dataset_domain, dataset_name, dataset_version, tag_name)
            )",
        )
        .execute(&self.db)
        .await
        .map_err(|e| self.transformer.to_catalog_error(e))?;

        Ok(())
    }

    fn transform(&self, err: sqlx::Error) -> Error {
        self.transformer.to_catalog_error(err)
    }
}

#[async_trait]
impl LeaseStore for SqliteLeaseStore {
    #[tracing::instrument(level = "debug", skip_all, fields(key = %key))]
    async fn get(&self, key: &ReservationKey) -> Result<Reservation> {
        let sql = format!(
            "SELECT dataset_project, dataset_domain, dataset_name, dataset_version, tag_name,
                    owner_id, expires_at, created_at, updated_at, serialized_metadata
             FROM reservations WHERE {KEY_PREDICATE}"
        );
        let row: ReservationRow = bind_key_as(sqlx::query_as(&sql), key)
            .fetch_one(&self.db)
            .await
            .map_err(|e| self.transform(e))?;

        Reservation::try_from(row)
    }

    #[tracing::instrument(level = "debug", skip_all, fields(key = %reservation.key, owner = %reservation.owner_id))]
    async fn create(&self, reservation: &Reservation) -> Result<()> {
        bind_key(
            sqlx::query(
                "INSERT INTO reservations (
                    dataset_project, dataset_domain, dataset_name, dataset_version, tag_name,
                    owner_id, expires_at, serialized_metadata, created_at, updated_at
                 ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            ),
            &reservation.key,
        )
        .bind(&reservation.owner_id)
        .bind(encode_timestamp(reservation.expires_at)?)
        .bind(reservation.serialized_metadata.as_deref())
        .bind(encode_timestamp(reservation.created_at)?)
        .bind(encode_timestamp(reservation.updated_at)?)
        .execute(&self.db)
        .await
        .map_err(|e| self.transform(e))?;

        Ok(())
    }

    #[tracing::instrument(level = "debug", skip_all, fields(key = %key, owner = new_owner))]
    async fn update(
        &self,
        key: &ReservationKey,
        expected_prior_expiry: DateTime<Utc>,
        new_owner: &str,
        new_expiry: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<u64> {
        let sql = format!(
            "UPDATE reservations SET owner_id = ?, expires_at = ?, updated_at = ?
             WHERE {KEY_PREDICATE} AND expires_at = ?"
        );
        let query = sqlx::query(&sql)
            .bind(new_owner)
            .bind(encode_timestamp(new_expiry)?)
            .bind(encode_timestamp(now)?);
        let result = bind_key(query, key)
            .bind(encode_timestamp(expected_prior_expiry)?)
            .execute(&self.db)
            .await
            .map_err(|e| self.transform(e))?;

        Ok(result.rows_affected())
    }

    #[tracing::instrument(level = "debug", skip_all, fields(key = %reservation.key, owner = %reservation.owner_id))]
    async fn create_or_update(&self, reservation: &Reservation, now: DateTime<Utc>) -> Result<()> {
        // The WHERE on the conflict branch is the entitlement check, evaluated by the
        // store inside the same statement as the write.
        let result = bind_key(
            sqlx::query(
                "INSERT INTO reservations (
                    dataset_project, dataset_domain, dataset_name, dataset_version, tag_name,
                    owner_id, expires_at, serialized_metadata, created_at, updated_at
                 ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT (dataset_project, dataset_domain, dataset_name, dataset_version, tag_name)
                 DO UPDATE SET
                    owner_id = excluded.owner_id,
                    expires_at = excluded.expires_at,
                    serialized_metadata = excluded.serialized_metadata,
                    updated_at = excluded.updated_at
                 WHERE reservations.expires_at <= ? OR reservations.owner_id = excluded.owner_id",
            ),
            &reservation.key,
        )
        .bind(&reservation.owner_id)
        .bind(encode_timestamp(reservation.expires_at)?)
        .bind(reservation.serialized_metadata.as_deref())
        .bind(encode_timestamp(reservation.created_at)?)
        .bind(encode_timestamp(reservation.updated_at)?)
        .bind(encode_timestamp(now)?)
        .execute(&self.db)
        .await
        .map_err(|e| self.transform(e))?;

        if result.rows_affected() == 0 {
            return Err(Error::lease_conflict(format!(
                "reservation {} is held by another owner",
                reservation.key
            )));
        }
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip_all, fields(key = %key))]
    async fn delete(&self, key: &ReservationKey) -> Result<()> {
        let sql = format!("DELETE FROM reservations WHERE {KEY_PREDICATE}");
        bind_key(sqlx::query(&sql), key)
            .execute(&self.db)
            .await
            .map_err(|e| self.transform(e))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use sqlx::sqlite::SqlitePoolOptions;

    use super::*;
    use crate::repositories::Dialect;

    async fn setup() -> Result<SqliteLeaseStore> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| Error::internal(e.to_string()))?;
        let store = SqliteLeaseStore::new(pool, Dialect::Sqlite.error_transformer());
        store.init().await?;
        Ok(store)
    }

    fn key() -> ReservationKey {
        ReservationKey::new(
            DatasetId::new("testProject", "testDomain", "testDataset", "testVersion"),
            "testTag",
        )
    }

    fn t0() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap_or_default()
    }

    fn reservation(owner: &str, expires_at: DateTime<Utc>) -> Reservation {
        Reservation::new(key(), owner, expires_at, t0())
    }

    #[tokio::test]
    async fn test_get_not_found() -> Result<()> {
        let store = setup().await?;
        let err = store.get(&key()).await.err();
        assert!(matches!(err, Some(Error::NotFound(_))));
        Ok(())
    }

    #[tokio::test]
    async fn test_create_then_get() -> Result<()> {
        let store = setup().await?;
        let expected = reservation("batman", t0() + Duration::seconds(15))
            .with_metadata(Some(b"{\"retry\":1}".to_vec()));
        store.create(&expected).await?;

        let got = store.get(&key()).await?;
        assert_eq!(got, expected);
        Ok(())
    }

    #[tokio::test]
    async fn test_create_duplicate_is_conflict() -> Result<()> {
        let store = setup().await?;
        store.create(&reservation("a", t0())).await?;
        let err = store.create(&reservation("b", t0())).await.err();
        assert!(matches!(err, Some(Error::LeaseConflict(_))));
        assert_eq!(store.get(&key()).await?.owner_id, "a");
        Ok(())
    }

    #[tokio::test]
    async fn test_update_cas_matches_prior_expiry_only() -> Result<()> {
        let store = setup().await?;
        let prior = t0() + Duration::seconds(5);
        store.create(&reservation("a", prior)).await?;
        let now = t0() + Duration::seconds(6);
        let next = now + Duration::seconds(15);

        // stale observation
        let moved = store
            .update(&key(), prior - Duration::seconds(1), "b", next, now)
            .await?;
        assert_eq!(moved, 0);
        assert_eq!(store.get(&key()).await?.owner_id, "a");

        let moved = store.update(&key(), prior, "b", next, now).await?;
        assert_eq!(moved, 1);
        let got = store.get(&key()).await?;
        assert_eq!(got.owner_id, "b");
        assert_eq!(got.expires_at, next);
        assert_eq!(got.updated_at, now);
        assert_eq!(got.created_at, t0());

        // the first writer's observation is now stale too
        assert_eq!(store.update(&key(), prior, "c", next, now).await?, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_create_or_update_inserts_when_absent() -> Result<()> {
        let store = setup().await?;
        store
            .create_or_update(&reservation("a", t0() + Duration::seconds(15)), t0())
            .await?;
        assert_eq!(store.get(&key()).await?.owner_id, "a");
        Ok(())
    }

    #[tokio::test]
    async fn test_create_or_update_refuses_live_foreign_lease() -> Result<()> {
        let store = setup().await?;
        let expiry = t0() + Duration::seconds(15);
        store.create(&reservation("a", expiry)).await?;

        let err = store
            .create_or_update(&reservation("b", expiry + Duration::seconds(1)), t0())
            .await
            .err();
        assert!(matches!(err, Some(Error::LeaseConflict(_))));

        let held = store.get(&key()).await?;
        assert_eq!(held.owner_id, "a");
        assert_eq!(held.expires_at, expiry);
        Ok(())
    }

    #[tokio::test]
    async fn test_create_or_update_steals_expired_lease() -> Result<()> {
        let store = setup().await?;
        let expiry = t0() + Duration::seconds(15);
        store.create(&reservation("a", expiry)).await?;

        // boundary: expiry == now is stealable
        let mut next = reservation("b", expiry + Duration::seconds(15));
        next.updated_at = expiry;
        store.create_or_update(&next, expiry).await?;

        let held = store.get(&key()).await?;
        assert_eq!(held.owner_id, "b");
        assert_eq!(held.expires_at, expiry + Duration::seconds(15));
        assert_eq!(held.updated_at, expiry);
        Ok(())
    }

    #[tokio::test]
    async fn test_create_or_update_renews_same_owner() -> Result<()> {
        let store = setup().await?;
        store
            .create(&reservation("a", t0() + Duration::seconds(15)))
            .await?;

        let renewed = reservation("a", t0() + Duration::seconds(20))
            .with_metadata(Some(b"v2".to_vec()));
        store
            .create_or_update(&renewed, t0() + Duration::seconds(5))
            .await?;

        let held = store.get(&key()).await?;
        assert_eq!(held.expires_at, t0() + Duration::seconds(20));
        assert_eq!(held.serialized_metadata.as_deref(), Some(b"v2".as_slice()));
        Ok(())
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() -> Result<()> {
        let store = setup().await?;
        store.create(&reservation("a", t0())).await?;
        store.delete(&key()).await?;
        store.delete(&key()).await?;
        assert!(store.get(&key()).await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn test_keys_are_independent() -> Result<()> {
        let store = setup().await?;
        let other = ReservationKey::new(key().dataset, "otherTag");
        store.create(&reservation("a", t0())).await?;
        store
            .create(&Reservation::new(other.clone(), "b", t0(), t0()))
            .await?;

        store.delete(&key()).await?;
        assert_eq!(store.get(&other).await?.owner_id, "b");
        Ok(())
    }

    #[tokio::test]
    async fn test_corrupt_timestamp_is_internal() -> Result<()> {
        let store = setup().await?;
        store.create(&reservation("a", t0())).await?;
        sqlx::query("UPDATE reservations SET expires_at = 'tomorrow'")
            .execute(&store.db)
            .await
            .map_err(|e| Error::internal(e.to_string()))?;

        let err = store.get(&key()).await.err();
        assert!(matches!(err, Some(Error::Internal(msg)) if msg.contains("expires_at")));
        Ok(())
    }

    #[tokio::test]
    async fn test_unstorable_expiry_never_reaches_the_table() -> Result<()> {
        let store = setup().await?;
        let far = DateTime::from_timestamp(253_402_300_800, 0).unwrap_or_default();

        let err = store.create_or_update(&reservation("a", far), t0()).await.err();
        assert!(matches!(err, Some(Error::InvalidArgument(_))));
        let err = store.create(&reservation("a", far)).await.err();
        assert!(matches!(err, Some(Error::InvalidArgument(_))));

        // the key is still free and readable
        assert!(store.get(&key()).await.err().is_some_and(|e| e.is_not_found()));
        store
            .create_or_update(&reservation("a", t0() + Duration::seconds(15)), t0())
            .await?;
        assert_eq!(store.get(&key()).await?.owner_id, "a");
        Ok(())
    }
}
