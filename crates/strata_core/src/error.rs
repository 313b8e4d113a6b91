//! Error types for the store facade.

use strata_backend::BackendError;
use strata_codec::CodecError;
use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors surfaced by the store facade.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Invalid configuration, or a configuration change attempted after
    /// the store has become ready.
    #[error("configuration error: {message}")]
    Config {
        /// Description of the problem.
        message: String,
    },

    /// None of the requested drivers is supported in this environment.
    #[error("no available storage driver found")]
    NoAvailableDriver,

    /// A driver registration failed the compliance check.
    #[error("driver not compliant: {message}")]
    DriverCompliance {
        /// Description of the violation.
        message: String,
    },

    /// The requested driver is not registered.
    #[error("driver not found: {id}")]
    DriverNotFound {
        /// The unknown driver id.
        id: String,
    },

    /// The active backend reported a failure.
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// A value failed to encode or decode.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// JSON (de)serialization failed in the typed wrapper.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StoreError {
    /// Creates a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a driver compliance error.
    pub fn compliance(message: impl Into<String>) -> Self {
        Self::DriverCompliance {
            message: message.into(),
        }
    }
}
