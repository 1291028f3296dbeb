//! Keys and records shared by the stores and the reservation manager.

use std::fmt;

use chrono::{DateTime, Datelike, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Maximum length of any key column or owner id.
pub const MAX_FIELD_LENGTH: usize = 100;

/// Identifies a task signature. Supplied by callers, never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DatasetId {
    pub project: String,
    pub domain: String,
    pub name: String,
    pub version: String,
}

impl DatasetId {
    pub fn new(
        project: impl Into<String>,
        domain: impl Into<String>,
        name: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            project: project.into(),
            domain: domain.into(),
            name: name.into(),
            version: version.into(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        validate_field("dataset.project", &self.project)?;
        validate_field("dataset.domain", &self.domain)?;
        validate_field("dataset.name", &self.name)?;
        validate_field("dataset.version", &self.version)
    }
}

impl fmt::Display for DatasetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}",
            self.project, self.domain, self.name, self.version
        )
    }
}

/// The unique contention point: one reservation row may exist per key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReservationKey {
    pub dataset: DatasetId,
    pub tag_name: String,
}

/// Tags share the reservation key's identity.
pub type TagKey = ReservationKey;

impl ReservationKey {
    pub fn new(dataset: DatasetId, tag_name: impl Into<String>) -> Self {
        Self {
            dataset,
            tag_name: tag_name.into(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.dataset.validate()?;
        validate_field("tag_name", &self.tag_name)
    }
}

impl fmt::Display for ReservationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.dataset, self.tag_name)
    }
}

/// A persisted reservation row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reservation {
    pub key: ReservationKey,
    pub owner_id: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub serialized_metadata: Option<Vec<u8>>,
}

impl Reservation {
    /// Build a fresh row owned by `owner_id`, stamped at `now`.
    pub fn new(
        key: ReservationKey,
        owner_id: impl Into<String>,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            key,
            owner_id: owner_id.into(),
            expires_at,
            created_at: now,
            updated_at: now,
            serialized_metadata: None,
        }
    }

    #[must_use]
    pub fn with_metadata(mut self, metadata: Option<Vec<u8>>) -> Self {
        self.serialized_metadata = metadata;
        self
    }

    /// Expired at or before `now`, and therefore stealable.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Whether `owner_id` may overwrite this row at `now`.
    #[must_use]
    pub fn is_claimable_by(&self, owner_id: &str, now: DateTime<Utc>) -> bool {
        self.is_expired_at(now) || self.owner_id == owner_id
    }
}

/// Computed result. Opaque to the reservation core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub id: String,
    pub dataset: DatasetId,
    pub serialized_metadata: Option<Vec<u8>>,
    pub created_at: DateTime<Utc>,
}

/// A tag binding a reservation-compatible key to a finished artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    pub key: TagKey,
    pub artifact: Artifact,
    pub created_at: DateTime<Utc>,
}

/// Validate an owner id.
pub fn validate_owner_id(owner_id: &str) -> Result<()> {
    validate_field("owner_id", owner_id)
}

fn validate_field(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::invalid_argument(format!("{field} cannot be empty")));
    }

    if value.chars().count() > MAX_FIELD_LENGTH {
        return Err(Error::invalid_argument(format!(
            "{field} exceeds maximum length of {MAX_FIELD_LENGTH} characters"
        )));
    }

    if value.chars().any(char::is_control) {
        return Err(Error::invalid_argument(format!(
            "{field} contains control characters"
        )));
    }

    Ok(())
}

/// Fixed-width RFC 3339 with microseconds, so text order is time order.
///
/// Only four-digit years keep the width fixed; anything outside 0000..=9999 is
/// rejected before it reaches a row.
pub(crate) fn encode_timestamp(ts: DateTime<Utc>) -> Result<String> {
    if !(0..=9999).contains(&ts.year()) {
        return Err(Error::invalid_argument(format!(
            "timestamp {ts} is outside the storable range (years 0000-9999)"
        )));
    }
    Ok(ts.to_rfc3339_opts(SecondsFormat::Micros, true))
}

pub(crate) fn decode_timestamp(column: &str, raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| Error::internal(format!("invalid timestamp in column {column}: {e}")))
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use proptest::prelude::*;

    use super::*;

    fn key() -> ReservationKey {
        ReservationKey::new(DatasetId::new("p", "d", "n", "v"), "t1")
    }

    #[test]
    fn test_valid_key_passes() {
        assert!(key().validate().is_ok());
        assert_eq!(key().to_string(), "p/d/n/v:t1");
    }

    #[test]
    fn test_empty_tag_rejected() {
        let bad = ReservationKey::new(DatasetId::new("p", "d", "n", "v"), "  ");
        let err = bad.validate().err();
        assert!(matches!(err, Some(Error::InvalidArgument(msg)) if msg.contains("tag_name")));
    }

    #[test]
    fn test_empty_dataset_field_named_in_error() {
        let bad = ReservationKey::new(DatasetId::new("p", "", "n", "v"), "t1");
        let err = bad.validate().err();
        assert!(matches!(err, Some(Error::InvalidArgument(msg)) if msg.contains("dataset.domain")));
    }

    #[test]
    fn test_owner_too_long_rejected() {
        let owner = "a".repeat(MAX_FIELD_LENGTH + 1);
        assert!(validate_owner_id(&owner).is_err());
        assert!(validate_owner_id(&"a".repeat(MAX_FIELD_LENGTH)).is_ok());
    }

    #[test]
    fn test_control_characters_rejected() {
        assert!(validate_owner_id("own\ner").is_err());
    }

    #[test]
    fn test_claimable_rules() {
        let now = DateTime::from_timestamp(1_000, 0).unwrap_or_default();
        let live = Reservation::new(key(), "A", now + Duration::seconds(5), now);

        assert!(live.is_claimable_by("A", now));
        assert!(!live.is_claimable_by("B", now));
        // expiry boundary is inclusive
        assert!(live.is_claimable_by("B", now + Duration::seconds(5)));
    }

    #[test]
    fn test_timestamp_roundtrip_and_ordering() -> Result<()> {
        let early = DateTime::from_timestamp(1_700_000_000, 0).unwrap_or_default();
        let late = early + Duration::microseconds(1);
        let (a, b) = (encode_timestamp(early)?, encode_timestamp(late)?);

        assert_eq!(a.len(), b.len());
        assert!(a < b);
        assert_eq!(decode_timestamp("expires_at", &a)?, early);
        Ok(())
    }

    #[test]
    fn test_five_digit_year_not_encodable() -> Result<()> {
        let last = DateTime::parse_from_rfc3339("9999-12-31T23:59:59.999999Z")
            .map_err(|e| Error::internal(e.to_string()))?
            .with_timezone(&Utc);
        assert_eq!(encode_timestamp(last)?, "9999-12-31T23:59:59.999999Z");

        let err = encode_timestamp(last + Duration::microseconds(1)).err();
        assert!(matches!(err, Some(Error::InvalidArgument(_))));
        Ok(())
    }

    #[test]
    fn test_decode_garbage_is_internal() {
        let err = decode_timestamp("expires_at", "yesterday").err();
        assert!(matches!(err, Some(Error::Internal(_))));
    }

    proptest! {
        #[test]
        fn prop_printable_owner_ids_within_limit_are_valid(owner in "[a-zA-Z0-9_.:-]{1,100}") {
            prop_assert!(validate_owner_id(&owner).is_ok());
        }

        #[test]
        fn prop_whitespace_only_is_invalid(ws in "[ \t]{0,20}") {
            prop_assert!(validate_owner_id(&ws).is_err());
        }

        #[test]
        fn prop_encoded_timestamps_sort_chronologically(a in 0i64..4_000_000_000, b in 0i64..4_000_000_000) {
            let ta = DateTime::from_timestamp(a, 0).unwrap_or_default();
            let tb = DateTime::from_timestamp(b, 0).unwrap_or_default();
            prop_assert_eq!(encode_timestamp(ta).ok().cmp(&encode_timestamp(tb).ok()), ta.cmp(&tb));
        }
    }
}
