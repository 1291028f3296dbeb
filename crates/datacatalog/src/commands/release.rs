//! `datacatalog release`

use anyhow::Result;
use clap::ArgMatches;
use serde_json::{json, Value};

use super::{key_from, Catalog};

pub async fn run(matches: &ArgMatches, catalog: &Catalog) -> Result<Value> {
    let key = key_from(matches)?;
    catalog.manager.release_reservation(&key).await?;
    Ok(json!({ "released": true }))
}
