//! Error taxonomy for the presence registry.
//!
//! "Not found" is never an error here: point queries return `Option` and
//! `get_last_online` has its own variant for "never seen". Errors are
//! reserved for the store being unreachable, the pool being exhausted, and
//! remote name resolution failing.

use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum PresenceError {
    #[error("shared store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("connection pool exhausted after {0:?}")]
    ResourceExhausted(Duration),

    #[error("remote name resolution failed: {0}")]
    RemoteResolution(String),

    #[error("serialization failed: {0}")]
    Serialization(String),

    #[error("configuration error: {0}")]
    Configuration(String),
}

/// Severity level used when deciding how loudly to log a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    Critical,
    High,
    Low,
}

impl PresenceError {
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            PresenceError::StoreUnavailable(_) => ErrorSeverity::Critical,
            PresenceError::ResourceExhausted(_) | PresenceError::Configuration(_) => {
                ErrorSeverity::High
            }
            PresenceError::RemoteResolution(_) | PresenceError::Serialization(_) => {
                ErrorSeverity::Low
            }
        }
    }

    /// Only transport failures are worth retrying; pool exhaustion and
    /// resolution failures are surfaced to the caller immediately.
    pub fn is_retryable(&self) -> bool {
        matches!(self, PresenceError::StoreUnavailable(_))
    }
}

impl From<redis::RedisError> for PresenceError {
    fn from(err: redis::RedisError) -> Self {
        PresenceError::StoreUnavailable(err.to_string())
    }
}

impl From<serde_json::Error> for PresenceError {
    fn from(err: serde_json::Error) -> Self {
        PresenceError::Serialization(err.to_string())
    }
}
