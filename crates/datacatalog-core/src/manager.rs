//! Reservation coordination.
//!
//! [`ReservationManager`] arbitrates who may compute the artifact for a
//! `(dataset, tag)` key:
//!
//! 1. If the tag already resolves, the artifact is returned and no lease is touched.
//! 2. Otherwise the current reservation row is read and the caller's entitlement
//!    decided locally (no row, expired row, or a row the caller already owns).
//! 3. An entitled caller issues one conditional upsert. The store re-checks the same
//!    entitlement at write time, so a stale read can only cost a lost race, never a
//!    second owner.
//!
//! The manager holds no authoritative state. Every call is a fresh read followed by
//! at most one conditional write, and retry policy belongs to the caller.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use strum::Display;

use crate::{
    clock::Clock,
    config::ReservationConfig,
    metrics::ReservationMetrics,
    models::{validate_owner_id, Artifact, Reservation, ReservationKey},
    repositories::{LeaseStore, TagResolver},
    Error, Result,
};

/// Outcome of a lease attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReservationState {
    Acquired,
    AlreadyInProgress,
}

/// Who holds the lease after an acquire attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationStatus {
    pub state: ReservationState,
    pub owner_id: String,
    pub expires_at: DateTime<Utc>,
    pub heartbeat_interval: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GetOrReserveResponse {
    /// The computation already finished.
    Artifact(Artifact),
    Reservation(ReservationStatus),
}

/// Full view of a reservation row, as returned by extend and get.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationInfo {
    pub key: ReservationKey,
    pub owner_id: String,
    pub expires_at: DateTime<Utc>,
    pub heartbeat_interval: Duration,
    pub serialized_metadata: Option<Vec<u8>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AcquiredVia {
    Create,
    Update,
}

/// Result of one pass through the entitlement/write protocol.
#[derive(Debug)]
struct Attempt {
    acquired: Option<AcquiredVia>,
    holder: Reservation,
}

pub struct ReservationManager {
    tags: Arc<dyn TagResolver>,
    leases: Arc<dyn LeaseStore>,
    clock: Arc<dyn Clock>,
    config: ReservationConfig,
    metrics: ReservationMetrics,
}

impl std::fmt::Debug for ReservationManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReservationManager")
            .field("clock", &self.clock)
            .field("config", &self.config)
            .field("metrics", &self.metrics)
            .finish_non_exhaustive()
    }
}

impl ReservationManager {
    pub fn new(
        tags: Arc<dyn TagResolver>,
        leases: Arc<dyn LeaseStore>,
        clock: Arc<dyn Clock>,
        config: ReservationConfig,
    ) -> Self {
        Self {
            tags,
            leases,
            clock,
            config,
            metrics: ReservationMetrics::default(),
        }
    }

    #[must_use]
    pub const fn metrics(&self) -> &ReservationMetrics {
        &self.metrics
    }

    #[must_use]
    pub fn heartbeat_interval(&self) -> Duration {
        self.config.heartbeat_interval()
    }

    /// Return the tagged artifact, or contend for the right to compute it.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for a malformed key or owner. Store failures other than
    /// "not found" on reads and "conflict" on the write are propagated unchanged.
    #[tracing::instrument(skip_all, fields(key = %key, owner = owner_id))]
    pub async fn get_or_reserve_artifact(
        &self,
        key: &ReservationKey,
        owner_id: &str,
        metadata: Option<Vec<u8>>,
    ) -> Result<GetOrReserveResponse> {
        key.validate()?;
        validate_owner_id(owner_id)?;

        match self.tags.get_tag(key).await {
            Ok(tag) => {
                tracing::debug!(artifact = %tag.artifact.id, "tag resolved, skipping reservation");
                return Ok(GetOrReserveResponse::Artifact(tag.artifact));
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => {
                self.metrics.record_get_tag_failure();
                tracing::error!(error = %e, "failed to resolve tag");
                return Err(e);
            }
        }

        let attempt = self
            .try_acquire(key, owner_id, metadata)
            .await
            .inspect_err(|_| self.metrics.record_acquire_failure())?;

        let state = if attempt.acquired.is_some() {
            ReservationState::Acquired
        } else {
            ReservationState::AlreadyInProgress
        };
        Ok(GetOrReserveResponse::Reservation(ReservationStatus {
            state,
            owner_id: attempt.holder.owner_id,
            expires_at: attempt.holder.expires_at,
            heartbeat_interval: self.heartbeat_interval(),
        }))
    }

    /// Heartbeat: renew (or take over an expired) lease and report whoever holds it.
    ///
    /// Runs the same protocol as [`Self::get_or_reserve_artifact`] without the tag
    /// lookup. A caller that is not entitled gets the current holder back rather than
    /// an error.
    #[tracing::instrument(skip_all, fields(key = %key, owner = owner_id))]
    pub async fn extend_reservation(
        &self,
        key: &ReservationKey,
        owner_id: &str,
        metadata: Option<Vec<u8>>,
    ) -> Result<ReservationInfo> {
        key.validate()?;
        validate_owner_id(owner_id)?;

        let attempt = self
            .try_acquire(key, owner_id, metadata)
            .await
            .inspect_err(|_| self.metrics.record_extend_failure())?;
        Ok(self.info(attempt.holder))
    }

    /// Drop the lease for `key`, whoever holds it. Releasing a free key succeeds.
    #[tracing::instrument(skip_all, fields(key = %key))]
    pub async fn release_reservation(&self, key: &ReservationKey) -> Result<()> {
        key.validate()?;

        if let Err(e) = self.leases.delete(key).await {
            self.metrics.record_release_failure();
            tracing::error!(error = %e, "failed to release reservation");
            return Err(e);
        }
        tracing::info!("reservation released");
        Ok(())
    }

    /// Read the current reservation without writing. `None` when the key is free.
    #[tracing::instrument(skip_all, fields(key = %key))]
    pub async fn get_reservation(&self, key: &ReservationKey) -> Result<Option<ReservationInfo>> {
        key.validate()?;

        match self.leases.get(key).await {
            Ok(row) => Ok(Some(self.info(row))),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn try_acquire(
        &self,
        key: &ReservationKey,
        owner_id: &str,
        metadata: Option<Vec<u8>>,
    ) -> Result<Attempt> {
        let now = self.clock.now();

        // Advisory only: the upsert below re-checks entitlement atomically.
        let existing = match self.leases.get(key).await {
            Ok(row) => Some(row),
            Err(e) if e.is_not_found() => None,
            Err(e) => return Err(e),
        };

        if let Some(current) = existing.as_ref() {
            if !current.is_claimable_by(owner_id, now) {
                tracing::debug!(
                    holder = %current.owner_id,
                    expires_at = %current.expires_at,
                    "reservation held by another owner"
                );
                self.metrics.record_already_in_progress();
                return Ok(Attempt {
                    acquired: None,
                    holder: current.clone(),
                });
            }
        }

        let expires_at = now
            .checked_add_signed(self.config.lease_ttl()?)
            .ok_or_else(|| Error::internal(format!("lease expiry overflows from {now}")))?;
        let candidate = Reservation::new(key.clone(), owner_id, expires_at, now).with_metadata(metadata);

        match self.leases.create_or_update(&candidate, now).await {
            Ok(()) => {
                let via = match existing.as_ref() {
                    None => {
                        self.metrics.record_acquired_via_create();
                        AcquiredVia::Create
                    }
                    Some(prior) => {
                        self.metrics.record_acquired_via_update();
                        if prior.owner_id != owner_id {
                            tracing::info!(previous = %prior.owner_id, "took over expired reservation");
                        }
                        AcquiredVia::Update
                    }
                };
                tracing::info!(expires_at = %candidate.expires_at, ?via, "reservation acquired");
                Ok(Attempt {
                    acquired: Some(via),
                    holder: candidate,
                })
            }
            Err(e) if e.is_lease_conflict() => {
                tracing::warn!("lost reservation race");
                self.metrics.record_already_in_progress();
                let holder = match self.leases.get(key).await {
                    Ok(winner) => winner,
                    // Winner already released: the key is free, so "retry now".
                    Err(e) if e.is_not_found() => Reservation::new(key.clone(), "", now, now),
                    Err(e) => return Err(e),
                };
                Ok(Attempt {
                    acquired: None,
                    holder,
                })
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to write reservation");
                Err(e)
            }
        }
    }

    fn info(&self, row: Reservation) -> ReservationInfo {
        ReservationInfo {
            key: row.key,
            owner_id: row.owner_id,
            expires_at: row.expires_at,
            heartbeat_interval: self.heartbeat_interval(),
            serialized_metadata: row.serialized_metadata,
        }
    }
}

#[cfg(test)]
mod tests {
    use sqlx::sqlite::SqlitePoolOptions;

    use super::*;
    use crate::{
        clock::ManualClock,
        models::DatasetId,
        repositories::{Database, Dialect},
    };

    struct Fixture {
        manager: ReservationManager,
        clock: Arc<ManualClock>,
    }

    fn t0() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap_or_default()
    }

    fn key() -> ReservationKey {
        ReservationKey::new(DatasetId::new("p", "d", "n", "v"), "t1")
    }

    async fn setup() -> Result<Fixture> {
        setup_with(ReservationConfig::default(), t0()).await
    }

    async fn setup_with(config: ReservationConfig, start: DateTime<Utc>) -> Result<Fixture> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| Error::internal(e.to_string()))?;
        let db = Database::from_pool(pool, Dialect::Sqlite);
        db.init().await?;

        let clock = Arc::new(ManualClock::new(start));
        let manager = ReservationManager::new(
            Arc::new(db.tag_store()),
            Arc::new(db.lease_store()),
            clock.clone(),
            config,
        );
        Ok(Fixture { manager, clock })
    }

    fn status(response: GetOrReserveResponse) -> Option<ReservationStatus> {
        match response {
            GetOrReserveResponse::Reservation(s) => Some(s),
            GetOrReserveResponse::Artifact(_) => None,
        }
    }

    #[tokio::test]
    async fn test_first_caller_acquires() -> Result<()> {
        let fx = setup().await?;
        let got = status(fx.manager.get_or_reserve_artifact(&key(), "A", None).await?);

        let got = got.ok_or_else(|| Error::internal("expected a reservation"))?;
        assert_eq!(got.state, ReservationState::Acquired);
        assert_eq!(got.owner_id, "A");
        assert_eq!(got.expires_at, t0() + Duration::seconds(15));
        assert_eq!(got.heartbeat_interval, Duration::seconds(5));
        assert_eq!(fx.manager.metrics().snapshot().acquired_via_create, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_renewal_extends_own_lease() -> Result<()> {
        let fx = setup().await?;
        fx.manager.get_or_reserve_artifact(&key(), "A", None).await?;
        fx.clock.advance(Duration::seconds(4));

        let got = status(fx.manager.get_or_reserve_artifact(&key(), "A", None).await?)
            .ok_or_else(|| Error::internal("expected a reservation"))?;
        assert_eq!(got.state, ReservationState::Acquired);
        assert_eq!(got.expires_at, t0() + Duration::seconds(19));

        let snap = fx.manager.metrics().snapshot();
        assert_eq!((snap.acquired_via_create, snap.acquired_via_update), (1, 1));
        Ok(())
    }

    #[tokio::test]
    async fn test_extend_returns_holder_when_not_entitled() -> Result<()> {
        let fx = setup().await?;
        fx.manager
            .get_or_reserve_artifact(&key(), "A", Some(b"a".to_vec()))
            .await?;

        let info = fx.manager.extend_reservation(&key(), "B", None).await?;
        assert_eq!(info.owner_id, "A");
        assert_eq!(info.expires_at, t0() + Duration::seconds(15));
        assert_eq!(info.serialized_metadata, Some(b"a".to_vec()));
        assert_eq!(fx.manager.metrics().snapshot().already_in_progress, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_extend_replaces_metadata() -> Result<()> {
        let fx = setup().await?;
        fx.manager
            .get_or_reserve_artifact(&key(), "A", Some(b"v1".to_vec()))
            .await?;
        fx.clock.advance(Duration::seconds(5));

        let info = fx
            .manager
            .extend_reservation(&key(), "A", Some(b"v2".to_vec()))
            .await?;
        assert_eq!(info.owner_id, "A");
        assert_eq!(info.expires_at, t0() + Duration::seconds(20));
        assert_eq!(info.serialized_metadata, Some(b"v2".to_vec()));
        Ok(())
    }

    #[tokio::test]
    async fn test_get_reservation_free_key_is_none() -> Result<()> {
        let fx = setup().await?;
        assert!(fx.manager.get_reservation(&key()).await?.is_none());

        fx.manager.get_or_reserve_artifact(&key(), "A", None).await?;
        let info = fx.manager.get_reservation(&key()).await?;
        assert_eq!(info.map(|i| i.owner_id), Some("A".to_string()));
        Ok(())
    }

    #[tokio::test]
    async fn test_release_frees_key() -> Result<()> {
        let fx = setup().await?;
        fx.manager.get_or_reserve_artifact(&key(), "A", None).await?;
        fx.manager.release_reservation(&key()).await?;
        fx.manager.release_reservation(&key()).await?;
        assert!(fx.manager.get_reservation(&key()).await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_invalid_owner_rejected_before_store() -> Result<()> {
        let fx = setup().await?;
        let err = fx.manager.get_or_reserve_artifact(&key(), "", None).await.err();
        assert!(matches!(err, Some(Error::InvalidArgument(_))));

        let bad_key = ReservationKey::new(DatasetId::new("p", "d", "n", "v"), "");
        let err = fx.manager.release_reservation(&bad_key).await.err();
        assert!(matches!(err, Some(Error::InvalidArgument(_))));
        assert_eq!(fx.manager.metrics().snapshot(), Default::default());
        Ok(())
    }

    #[tokio::test]
    async fn test_unbounded_lease_ttl_fails_without_writing() -> Result<()> {
        let config = ReservationConfig {
            heartbeat_interval_secs: 10_000_000_000_000,
            grace_period_multiplier: 3,
        };
        let fx = setup_with(config, t0()).await?;

        let err = fx.manager.get_or_reserve_artifact(&key(), "A", None).await.err();
        assert!(matches!(err, Some(Error::InvalidConfig(_))));
        assert!(fx.manager.get_reservation(&key()).await?.is_none());
        assert_eq!(fx.manager.metrics().snapshot().acquire_failure, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_expiry_past_year_9999_is_rejected_and_key_stays_usable() -> Result<()> {
        let near_end = DateTime::parse_from_rfc3339("9999-12-31T23:59:55Z")
            .map_err(|e| Error::internal(e.to_string()))?
            .with_timezone(&Utc);
        let fx = setup_with(ReservationConfig::default(), near_end).await?;

        let err = fx.manager.get_or_reserve_artifact(&key(), "A", None).await.err();
        assert!(matches!(err, Some(Error::InvalidArgument(_))));
        // nothing unreadable was persisted
        assert!(fx.manager.get_reservation(&key()).await?.is_none());

        fx.clock.set(t0());
        let got = status(fx.manager.get_or_reserve_artifact(&key(), "A", None).await?)
            .ok_or_else(|| Error::internal("expected a reservation"))?;
        assert_eq!(got.state, ReservationState::Acquired);
        Ok(())
    }

    #[test]
    fn test_state_display() {
        assert_eq!(ReservationState::Acquired.to_string(), "ACQUIRED");
        assert_eq!(
            ReservationState::AlreadyInProgress.to_string(),
            "ALREADY_IN_PROGRESS"
        );
    }
}
