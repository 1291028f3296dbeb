//! Subcommand implementations.
//!
//! Each command reads its arguments, calls the reservation manager or the tag store,
//! and returns the JSON document to print.

pub mod extend;
pub mod get;
pub mod release;
pub mod reserve;
pub mod tag;

use clap::ArgMatches;
use datacatalog_core::{
    Artifact, DatasetId, Error, ReservationInfo, ReservationKey, ReservationManager,
    SqliteTagStore,
};
use serde_json::{json, Value};

/// Everything a command may touch.
#[derive(Debug)]
pub struct Catalog {
    pub manager: ReservationManager,
    pub tags: SqliteTagStore,
}

fn required<'a>(matches: &'a ArgMatches, id: &str) -> Result<&'a str, Error> {
    matches
        .get_one::<String>(id)
        .map(String::as_str)
        .ok_or_else(|| Error::invalid_argument(format!("--{id} is required")))
}

/// Build the reservation key from `--project --domain --name --version --tag`.
pub fn key_from(matches: &ArgMatches) -> Result<ReservationKey, Error> {
    let dataset = DatasetId::new(
        required(matches, "project")?,
        required(matches, "domain")?,
        required(matches, "name")?,
        required(matches, "version")?,
    );
    Ok(ReservationKey::new(dataset, required(matches, "tag")?))
}

pub fn owner_from(matches: &ArgMatches) -> Result<&str, Error> {
    required(matches, "owner")
}

/// `--metadata` must be JSON. It is stored compacted.
pub fn metadata_from(matches: &ArgMatches) -> Result<Option<Vec<u8>>, Error> {
    matches
        .get_one::<String>("metadata")
        .map(|raw| -> Result<Vec<u8>, Error> {
            let value: Value = serde_json::from_str(raw)?;
            Ok(serde_json::to_vec(&value)?)
        })
        .transpose()
}

fn metadata_json(bytes: Option<&[u8]>) -> Value {
    bytes.map_or(Value::Null, |b| {
        serde_json::from_slice(b)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(b).into_owned()))
    })
}

pub fn artifact_json(artifact: &Artifact) -> Value {
    json!({
        "id": artifact.id,
        "dataset": artifact.dataset,
        "metadata": metadata_json(artifact.serialized_metadata.as_deref()),
        "created_at": artifact.created_at.to_rfc3339(),
    })
}

pub fn reservation_json(info: &ReservationInfo) -> Value {
    json!({
        "key": info.key,
        "owner_id": info.owner_id,
        "expires_at": info.expires_at.to_rfc3339(),
        "heartbeat_interval_secs": info.heartbeat_interval.num_seconds(),
        "metadata": metadata_json(info.serialized_metadata.as_deref()),
    })
}
