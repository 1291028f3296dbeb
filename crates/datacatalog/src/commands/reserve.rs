//! `datacatalog reserve`

use anyhow::Result;
use clap::ArgMatches;
use datacatalog_core::GetOrReserveResponse;
use serde_json::{json, Value};

use super::{artifact_json, key_from, metadata_from, owner_from, Catalog};

pub async fn run(matches: &ArgMatches, catalog: &Catalog) -> Result<Value> {
    let key = key_from(matches)?;
    let owner = owner_from(matches)?;
    let metadata = metadata_from(matches)?;

    let response = catalog
        .manager
        .get_or_reserve_artifact(&key, owner, metadata)
        .await?;

    Ok(match response {
        GetOrReserveResponse::Artifact(artifact) => json!({ "artifact": artifact_json(&artifact) }),
        GetOrReserveResponse::Reservation(status) => json!({
            "reservation": {
                "state": status.state,
                "owner_id": status.owner_id,
                "expires_at": status.expires_at.to_rfc3339(),
                "heartbeat_interval_secs": status.heartbeat_interval.num_seconds(),
            }
        }),
    })
}
