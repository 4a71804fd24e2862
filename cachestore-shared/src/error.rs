/// Error taxonomy for cache store operations
///
/// Every failure a store operation can produce falls into one of five classes.
/// Missing keys are never errors: they surface as `Ok(None)`.
///
/// | Variant | Raised when |
/// |---------|-------------|
/// | `Configuration` | The store cannot be built from the resolved configuration |
/// | `PoolAcquisition` | No connection could be handed out (network, auth, exhausted pool) |
/// | `Validation` | A value was rejected by the cacheable-value predicate |
/// | `Codec` | Serialization, compression or decompression failed |
/// | `Command` | The remote server rejected or failed a command |
///
/// Payloads are plain strings so the error is `Clone`: the same failure can be
/// broadcast on the pool's error channel and fanned out to every caller of a
/// coalesced read.
///
/// # Example
///
/// ```
/// use cachestore_shared::error::{ErrorKind, StoreError};
///
/// let err = StoreError::Validation("value is not cacheable".to_string());
/// assert_eq!(err.kind(), ErrorKind::Validation);
/// assert!(!err.is_connectivity());
/// ```

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Cache store errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Store could not be constructed
    #[error("Store configuration error: {0}")]
    Configuration(String),

    /// No connection could be acquired from the pool
    #[error("Connection pool error: {0}")]
    PoolAcquisition(String),

    /// Value rejected before contacting the server
    #[error("Validation error: {0}")]
    Validation(String),

    /// Payload could not be encoded or decoded
    #[error("Codec error: {0}")]
    Codec(String),

    /// Server rejected or failed a command
    #[error("Remote command error: {0}")]
    Command(String),
}

/// Coarse error class, for callers that branch on the kind of failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// See [`StoreError::Configuration`]
    Configuration,

    /// See [`StoreError::PoolAcquisition`]
    PoolAcquisition,

    /// See [`StoreError::Validation`]
    Validation,

    /// See [`StoreError::Codec`]
    Codec,

    /// See [`StoreError::Command`]
    Command,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Configuration => write!(f, "configuration"),
            ErrorKind::PoolAcquisition => write!(f, "pool_acquisition"),
            ErrorKind::Validation => write!(f, "validation"),
            ErrorKind::Codec => write!(f, "codec"),
            ErrorKind::Command => write!(f, "command"),
        }
    }
}

impl StoreError {
    /// Returns the class of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::Configuration(_) => ErrorKind::Configuration,
            StoreError::PoolAcquisition(_) => ErrorKind::PoolAcquisition,
            StoreError::Validation(_) => ErrorKind::Validation,
            StoreError::Codec(_) => ErrorKind::Codec,
            StoreError::Command(_) => ErrorKind::Command,
        }
    }

    /// Returns `true` when no connection could be handed out
    ///
    /// The pool publishes the subset caused by the server being unreachable
    /// (refused connection, setup timeout) on its error channel. A closed pool
    /// or a wait for a free slot that ran out is returned to the caller only.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, StoreError::PoolAcquisition(_))
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Codec(format!("JSON error: {}", err))
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Codec(format!("Compression error: {}", err))
    }
}

/// Result type alias for store operations
pub type StoreResult<T> = Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_matches_variant() {
        assert_eq!(
            StoreError::Configuration("x".into()).kind(),
            ErrorKind::Configuration
        );
        assert_eq!(
            StoreError::PoolAcquisition("x".into()).kind(),
            ErrorKind::PoolAcquisition
        );
        assert_eq!(StoreError::Validation("x".into()).kind(), ErrorKind::Validation);
        assert_eq!(StoreError::Codec("x".into()).kind(), ErrorKind::Codec);
        assert_eq!(StoreError::Command("x".into()).kind(), ErrorKind::Command);
    }

    #[test]
    fn test_only_acquisition_is_connectivity() {
        assert!(StoreError::PoolAcquisition("refused".into()).is_connectivity());
        assert!(!StoreError::Command("WRONGTYPE".into()).is_connectivity());
        assert!(!StoreError::Codec("bad json".into()).is_connectivity());
    }

    #[test]
    fn test_json_error_maps_to_codec() {
        let err: StoreError = serde_json::from_str::<serde_json::Value>("{not json")
            .unwrap_err()
            .into();
        assert_eq!(err.kind(), ErrorKind::Codec);
        assert!(err.to_string().starts_with("Codec error: JSON error"));
    }

    #[test]
    fn test_display_distinguishes_classes() {
        let err = StoreError::PoolAcquisition("connection refused".into());
        assert_eq!(err.to_string(), "Connection pool error: connection refused");
        assert_eq!(ErrorKind::PoolAcquisition.to_string(), "pool_acquisition");
    }
}
