//! Reservation outcome counters.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Monotonic counters owned by a [`crate::ReservationManager`].
#[derive(Debug, Default)]
pub struct ReservationMetrics {
    acquired_via_create: AtomicU64,
    acquired_via_update: AtomicU64,
    already_in_progress: AtomicU64,
    acquire_failure: AtomicU64,
    extend_failure: AtomicU64,
    release_failure: AtomicU64,
    get_tag_failure: AtomicU64,
}

/// Point-in-time copy of [`ReservationMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub acquired_via_create: u64,
    pub acquired_via_update: u64,
    pub already_in_progress: u64,
    pub acquire_failure: u64,
    pub extend_failure: u64,
    pub release_failure: u64,
    pub get_tag_failure: u64,
}

impl ReservationMetrics {
    pub(crate) fn record_acquired_via_create(&self) {
        self.acquired_via_create.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_acquired_via_update(&self) {
        self.acquired_via_update.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_already_in_progress(&self) {
        self.already_in_progress.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_acquire_failure(&self) {
        self.acquire_failure.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_extend_failure(&self) {
        self.extend_failure.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_release_failure(&self) {
        self.release_failure.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_get_tag_failure(&self) {
        self.get_tag_failure.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            acquired_via_create: self.acquired_via_create.load(Ordering::Relaxed),
            acquired_via_update: self.acquired_via_update.load(Ordering::Relaxed),
            already_in_progress: self.already_in_progress.load(Ordering::Relaxed),
            acquire_failure: self.acquire_failure.load(Ordering::Relaxed),
            extend_failure: self.extend_failure.load(Ordering::Relaxed),
            release_failure: self.release_failure.load(Ordering::Relaxed),
            get_tag_failure: self.get_tag_failure.load(Ordering::Relaxed),
        }
    }
}

impl MetricsSnapshot {
    /// Successful acquisitions, however they happened.
    #[must_use]
    pub const fn acquired(&self) -> u64 {
        self.acquired_via_create + self.acquired_via_update
    }
}
