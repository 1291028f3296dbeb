//! Artifacts and tags, backed by `SQLite`.
//!
//! The reservation manager only reads tags through [`TagResolver`]. Creating
//! artifacts and binding tags is the producer's side of the workflow: whoever holds
//! the reservation finishes its work, stores the artifact and points the tag at it.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use super::{errors::ErrorTransformer, TagResolver};
use crate::{
    models::{decode_timestamp, encode_timestamp, Artifact, DatasetId, Tag, TagKey},
    Error, Result,
};

#[derive(Debug, Clone)]
pub struct SqliteTagStore {
    db: SqlitePool,
    transformer: Arc<dyn ErrorTransformer>,
}

#[derive(Debug, sqlx::FromRow)]
struct TagRow {
    dataset_project: String,
    dataset_domain: String,
    dataset_name: String,
    dataset_version: String,
    tag_name: String,
    artifact_id: String,
    tag_created_at: String,
    artifact_metadata: Option<Vec<u8>>,
    artifact_created_at: String,
}

impl TryFrom<TagRow> for Tag {
    type Error = Error;

    fn try_from(row: TagRow) -> Result<Self> {
        let dataset = DatasetId::new(
            row.dataset_project,
            row.dataset_domain,
            row.dataset_name,
            row.dataset_version,
        );
        Ok(Self {
            artifact: Artifact {
                id: row.artifact_id,
                dataset: dataset.clone(),
                serialized_metadata: row.artifact_metadata,
                created_at: decode_timestamp("artifacts.created_at", &row.artifact_created_at)?,
            },
            key: TagKey::new(dataset, row.tag_name),
            created_at: decode_timestamp("tags.created_at", &row.tag_created_at)?,
        })
    }
}

impl SqliteTagStore {
    #[must_use]
    pub fn new(db: SqlitePool, transformer: Arc<dyn ErrorTransformer>) -> Self {
        Self { db, transformer }
    }

    /// Initialize the artifacts and tags tables.
    pub async fn init(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS artifacts (
                dataset_project TEXT NOT NULL,
                dataset_domain TEXT NOT NULL,
                dataset_name TEXT NOT NULL,
                dataset_version TEXT NOT NULL,
                artifact_id TEXT NOT NULL,
                serialized_metadata BLOB,
                created_at TEXT NOT NULL,
                PRIMARY KEY (dataset_project, dataset_domain, dataset_name, dataset_version, artifact_id)
            )",
        )
        .execute(&self.db)
        .await
        .map_err(|e| self.transformer.to_catalog_error(e))?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS tags (
                dataset_project TEXT NOT NULL,
                dataset_domain TEXT NOT NULL,
                dataset_name TEXT NOT NULL,
                dataset_version TEXT NOT NULL,
                tag_name TEXT NOT NULL,
                artifact_id TEXT NOT NULL,
                created_at TEXT NOT NULL,
                PRIMARY KEY (dataset_project, dataset_domain, dataset_name, dataset_version, tag_name)
            )",
        )
        .execute(&self.db)
        .await
        .map_err(|e| self.transformer.to_catalog_error(e))?;

        Ok(())
    }

    /// Store an artifact. Re-creating an existing artifact id keeps the original.
    #[tracing::instrument(level = "debug", skip_all, fields(dataset = %artifact.dataset, artifact = %artifact.id))]
    pub async fn create_artifact(&self, artifact: &Artifact) -> Result<()> {
        artifact.dataset.validate()?;
        if artifact.id.trim().is_empty() {
            return Err(Error::invalid_argument("artifact id cannot be empty"));
        }

        sqlx::query(
            "INSERT INTO artifacts (
                dataset_project, dataset_domain, dataset_name, dataset_version,
                artifact_id, serialized_metadata, created_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT DO NOTHING",
        )
        .bind(&artifact.dataset.project)
        .bind(&artifact.dataset.domain)
        .bind(&artifact.dataset.name)
        .bind(&artifact.dataset.version)
        .bind(&artifact.id)
        .bind(artifact.serialized_metadata.as_deref())
        .bind(encode_timestamp(artifact.created_at)?)
        .execute(&self.db)
        .await
        .map_err(|e| self.transformer.to_catalog_error(e))?;

        Ok(())
    }

    /// Point the tag at `artifact_id`, moving it if it already exists.
    ///
    /// # Errors
    ///
    /// `NotFound` if the artifact does not exist in the tag's dataset.
    #[tracing::instrument(level = "debug", skip_all, fields(key = %key, artifact = artifact_id))]
    pub async fn add_tag(&self, key: &TagKey, artifact_id: &str, now: DateTime<Utc>) -> Result<()> {
        key.validate()?;

        // The SELECT makes a dangling tag impossible: no artifact row, nothing inserted.
        let result = sqlx::query(
            "INSERT INTO tags (
                dataset_project, dataset_domain, dataset_name, dataset_version,
                tag_name, artifact_id, created_at
             )
             SELECT dataset_project, dataset_domain, dataset_name, dataset_version, ?, artifact_id, ?
             FROM artifacts
             WHERE dataset_project = ? AND dataset_domain = ? AND dataset_name = ?
               AND dataset_version = ? AND artifact_id = ?
             ON CONFLICT (dataset_project, dataset_domain, dataset_name, dataset_version, tag_name)
             DO UPDATE SET artifact_id = excluded.artifact_id, created_at = excluded.created_at",
        )
        .bind(&key.tag_name)
        .bind(encode_timestamp(now)?)
        .bind(&key.dataset.project)
        .bind(&key.dataset.domain)
        .bind(&key.dataset.name)
        .bind(&key.dataset.version)
        .bind(artifact_id)
        .execute(&self.db)
        .await
        .map_err(|e| self.transformer.to_catalog_error(e))?;

        if result.rows_affected() == 0 {
            return Err(Error::not_found(format!(
                "artifact {artifact_id} not found in dataset {}",
                key.dataset
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl TagResolver for SqliteTagStore {
    #[tracing::instrument(level = "debug", skip_all, fields(key = %key))]
    async fn get_tag(&self, key: &TagKey) -> Result<Tag> {
        let row: TagRow = sqlx::query_as(
            "SELECT t.dataset_project, t.dataset_domain, t.dataset_name, t.dataset_version,
                    t.tag_name, t.artifact_id, t.created_at AS tag_created_at,
                    a.serialized_metadata AS artifact_metadata,
                    a.created_at AS artifact_created_at
             FROM tags t
             JOIN artifacts a
               ON a.dataset_project = t.dataset_project
              AND a.dataset_domain = t.dataset_domain
              AND a.dataset_name = t.dataset_name
              AND a.dataset_version = t.dataset_version
              AND a.artifact_id = t.artifact_id
             WHERE t.dataset_project = ? AND t.dataset_domain = ? AND t.dataset_name = ?
               AND t.dataset_version = ? AND t.tag_name = ?",
        )
        .bind(&key.dataset.project)
        .bind(&key.dataset.domain)
        .bind(&key.dataset.name)
        .bind(&key.dataset.version)
        .bind(&key.tag_name)
        .fetch_one(&self.db)
        .await
        .map_err(|e| self.transformer.to_catalog_error(e))?;

        Tag::try_from(row)
    }
}
