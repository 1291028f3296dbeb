//! Error taxonomy for the data catalog reservation core.
//!
//! Every backend failure is translated into one of these kinds before it reaches
//! the reservation manager (see [`crate::repositories::errors`]):
//!
//! - **`NotFound`**: no tag, no reservation row (control flow for the manager)
//! - **`LeaseConflict`**: a conditional write lost to another writer
//! - **`InvalidArgument`**: malformed key, owner, or metadata
//! - **`Internal`**: timestamp/metadata serialization, unexpected backend errors
//! - **`Unknown`**: unclassified backend error with its native code preserved
//!
//! Only `InvalidArgument`, `Internal` and `Unknown` escape the manager as errors.

use thiserror::Error;

/// Top-level error type for catalog operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Lease conflict: {0}")]
    LeaseConflict(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl Error {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn lease_conflict(msg: impl Into<String>) -> Self {
        Self::LeaseConflict(msg.into())
    }

    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn unknown(msg: impl Into<String>) -> Self {
        Self::Unknown(msg.into())
    }

    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    #[must_use]
    pub const fn is_lease_conflict(&self) -> bool {
        matches!(self, Self::LeaseConflict(_))
    }

    /// Stable machine-readable code for this error.
    pub const fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "NOT_FOUND",
            Self::LeaseConflict(_) => "LEASE_CONFLICT",
            Self::InvalidArgument(_) => "INVALID_ARGUMENT",
            Self::InvalidConfig(_) => "INVALID_CONFIG",
            Self::Internal(_) => "INTERNAL",
            Self::Unknown(_) => "UNKNOWN",
        }
    }

    /// Status class a transport should answer with.
    ///
    /// An already-in-progress reservation is not an error at the transport level; a
    /// `LeaseConflict` only surfaces here when a caller bypasses the manager.
    pub const fn status_code(&self) -> u16 {
        match self {
            Self::NotFound(_) => 404,
            Self::LeaseConflict(_) => 409,
            Self::InvalidArgument(_) | Self::InvalidConfig(_) => 400,
            Self::Internal(_) | Self::Unknown(_) => 500,
        }
    }

    /// Returns the process exit code for this error.
    ///
    /// - 1: invalid input or configuration
    /// - 2: internal or unclassified failure
    /// - 3: not found
    /// - 4: lease conflict
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::InvalidArgument(_) | Self::InvalidConfig(_) => 1,
            Self::Internal(_) | Self::Unknown(_) => 2,
            Self::NotFound(_) => 3,
            Self::LeaseConflict(_) => 4,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::invalid_argument(format!("metadata is not valid JSON: {err}"))
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Self::invalid_config(format!("Failed to parse config: {err}"))
    }
}

/// Result type alias for catalog operations.
pub type Result<T> = std::result::Result<T, Error>;
