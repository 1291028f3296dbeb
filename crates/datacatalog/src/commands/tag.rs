//! `datacatalog tag`
//!
//! Producer side: record the finished artifact and bind the tag, after which
//! `reserve` for the same key returns the artifact.

use anyhow::Result;
use clap::ArgMatches;
use datacatalog_core::{Artifact, Clock, Error, SystemClock};
use serde_json::{json, Value};

use super::{key_from, metadata_from, Catalog};

pub async fn run(matches: &ArgMatches, catalog: &Catalog) -> Result<Value> {
    let key = key_from(matches)?;
    let artifact_id = matches
        .get_one::<String>("artifact-id")
        .ok_or_else(|| Error::invalid_argument("--artifact-id is required"))?;
    let now = SystemClock.now();

    catalog
        .tags
        .create_artifact(&Artifact {
            id: artifact_id.clone(),
            dataset: key.dataset.clone(),
            serialized_metadata: metadata_from(matches)?,
            created_at: now,
        })
        .await?;
    catalog.tags.add_tag(&key, artifact_id, now).await?;

    tracing::info!(key = %key, artifact = %artifact_id, "tag bound");
    Ok(json!({ "tagged": { "key": key, "artifact_id": artifact_id } }))
}
