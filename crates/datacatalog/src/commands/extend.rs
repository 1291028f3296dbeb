//! `datacatalog extend`

use anyhow::Result;
use clap::ArgMatches;
use serde_json::Value;

use super::{key_from, metadata_from, owner_from, reservation_json, Catalog};

pub async fn run(matches: &ArgMatches, catalog: &Catalog) -> Result<Value> {
    let key = key_from(matches)?;
    let owner = owner_from(matches)?;
    let metadata = metadata_from(matches)?;

    let info = catalog
        .manager
        .extend_reservation(&key, owner, metadata)
        .await?;
    Ok(reservation_json(&info))
}
