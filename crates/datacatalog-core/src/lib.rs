//! # Datacatalog Core
//!
//! Reservation leases for the data catalog: callers asking for the same
//! `(dataset, tag)` either get the finished artifact back, or contend for a
//! time-bounded lease on the right to compute it.
//!
//! ## Laws (Compiler Enforced)
//!
//! - No `unwrap()` - returns `Result` instead
//! - No `expect()` - returns `Result` instead
//! - No `panic!()` - returns `Result` instead
//! - No `unsafe` - safe Rust only
//!
//! ## Layout
//!
//! - [`manager`]: the [`ReservationManager`] coordinating tags and leases
//! - [`repositories`]: the [`LeaseStore`] / [`TagResolver`] seams and their `SQLite` backends
//! - [`clock`], [`config`], [`metrics`], [`models`], [`Error`]

#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::panic))]

pub mod clock;
pub mod config;
mod error;
pub mod manager;
pub mod metrics;
pub mod models;
pub mod repositories;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{load_config, Config, ReservationConfig};
pub use error::{Error, Result};
pub use manager::{
    GetOrReserveResponse, ReservationInfo, ReservationManager, ReservationState,
    ReservationStatus,
};
pub use metrics::{MetricsSnapshot, ReservationMetrics};
pub use models::{Artifact, DatasetId, Reservation, ReservationKey, Tag, TagKey};
pub use repositories::{Database, Dialect, LeaseStore, SqliteLeaseStore, SqliteTagStore, TagResolver};
