//! `datacatalog get`
//!
//! The way to learn the outcome of an acquire that timed out or was interrupted.

use anyhow::Result;
use clap::ArgMatches;
use serde_json::Value;

use super::{key_from, reservation_json, Catalog};

pub async fn run(matches: &ArgMatches, catalog: &Catalog) -> Result<Value> {
    let key = key_from(matches)?;
    let info = catalog.manager.get_reservation(&key).await?;
    Ok(info.as_ref().map_or(Value::Null, reservation_json))
}
