//! Error types for backend operations.

use std::io;
use thiserror::Error;

/// Result type for backend operations.
pub type BackendResult<T> = Result<T, BackendError>;

/// Errors that can occur inside a storage backend.
#[derive(Debug, Error)]
pub enum BackendError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A SQLite error occurred.
    #[error("SQL error: {0}")]
    Sql(#[from] rusqlite::Error),

    /// A value failed to encode or decode.
    #[error("codec error: {0}")]
    Codec(#[from] strata_codec::CodecError),

    /// Opening or upgrading the database failed.
    #[error("connection error: {message}")]
    Connection {
        /// Description of the failure.
        message: String,
    },

    /// A write or delete was aborted.
    #[error("transaction aborted: {message}")]
    TransactionAbort {
        /// Description of the failure.
        message: String,
        /// True when the abort was caused by quota exhaustion.
        quota: bool,
    },

    /// The active backend does not implement this optional operation.
    #[error("operation {op} is not implemented by the current backend")]
    NotImplemented {
        /// Name of the missing operation.
        op: &'static str,
    },

    /// The backend's storage is present but not usable for writes.
    ///
    /// Raised by the flat backend's init probe when its file cannot accept
    /// a write (read-only file system, zero quota). Fails driver selection
    /// so negotiation can move on.
    #[error("backend unusable: {message}")]
    Unusable {
        /// Description of why the probe failed.
        message: String,
    },

    /// The cached connection handle is no longer valid.
    ///
    /// The connection manager recovers this class with one
    /// reconnect-and-retry; it should not normally reach callers.
    #[error("stale handle: {message}")]
    Stale {
        /// Description of the staleness.
        message: String,
    },

    /// Stored data is corrupt beyond the torn-tail tolerance.
    #[error("storage corrupted: {message}")]
    Corrupted {
        /// Description of the corruption.
        message: String,
    },
}

impl BackendError {
    /// Creates a connection error.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Creates a transaction abort error.
    pub fn aborted(message: impl Into<String>, quota: bool) -> Self {
        Self::TransactionAbort {
            message: message.into(),
            quota,
        }
    }

    /// Creates a not-implemented error for the named operation.
    #[must_use]
    pub const fn not_implemented(op: &'static str) -> Self {
        Self::NotImplemented { op }
    }

    /// Creates an unusable-backend error.
    pub fn unusable(message: impl Into<String>) -> Self {
        Self::Unusable {
            message: message.into(),
        }
    }

    /// Creates a stale-handle error.
    pub fn stale(message: impl Into<String>) -> Self {
        Self::Stale {
            message: message.into(),
        }
    }

    /// Creates a corruption error.
    pub fn corrupted(message: impl Into<String>) -> Self {
        Self::Corrupted {
            message: message.into(),
        }
    }

    /// True for the stale-handle class of failures.
    ///
    /// These are recovered locally by the connection manager with a single
    /// reconnect-and-retry: an explicitly stale handle, or files vanishing
    /// underneath a cached handle.
    #[must_use]
    pub fn is_stale(&self) -> bool {
        match self {
            Self::Stale { .. } => true,
            Self::Io(e) => e.kind() == io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stale_classification() {
        assert!(BackendError::stale("closed").is_stale());
        assert!(BackendError::Io(io::Error::new(io::ErrorKind::NotFound, "gone")).is_stale());
        assert!(!BackendError::connection("refused").is_stale());
        assert!(!BackendError::aborted("full", true).is_stale());
    }
}
