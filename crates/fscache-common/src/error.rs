//! Error types for fscache
//!
//! This module defines the error type shared by the storage engine and the
//! command line tools.

use thiserror::Error;

/// Common result type for fscache operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for fscache
#[derive(Debug, Error)]
pub enum Error {
    // Validation errors
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    // Item errors
    #[error("key '{key}' not found within namespace '{namespace}'")]
    NotFound { namespace: String, key: String },

    #[error("key '{key}' already exists within namespace '{namespace}'")]
    AlreadyExists { namespace: String, key: String },

    #[error("scan cursor already active")]
    AlreadyActive,

    // Integrity errors
    #[error("corrupted metadata file {path}: {reason}")]
    CorruptedMetadata { path: String, reason: String },

    #[error("integrity mismatch: stored hash {expected}, computed hash {actual}")]
    IntegrityMismatch { expected: String, actual: String },

    // I/O errors
    #[error("runtime error: {0}")]
    Runtime(String),

    #[error("file {path} is locked by another writer")]
    LockContention { path: String },

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Create an invalid argument error
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Create a runtime (I/O) error
    pub fn runtime(msg: impl Into<String>) -> Self {
        Self::Runtime(msg.into())
    }

    /// Create a not found error for a namespaced key
    pub fn not_found(namespace: impl Into<String>, key: impl Into<String>) -> Self {
        Self::NotFound {
            namespace: namespace.into(),
            key: key.into(),
        }
    }

    /// Create an already exists error for a namespaced key
    pub fn already_exists(namespace: impl Into<String>, key: impl Into<String>) -> Self {
        Self::AlreadyExists {
            namespace: namespace.into(),
            key: key.into(),
        }
    }

    /// Check if this is a not found error
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Check if a non-blocking write lost the race for the lock
    #[must_use]
    pub fn is_lock_contention(&self) -> bool {
        matches!(self, Self::LockContention { .. })
    }

    /// Check if the stored entry failed verification or could not be decoded
    #[must_use]
    pub fn is_integrity_failure(&self) -> bool {
        matches!(
            self,
            Self::IntegrityMismatch { .. } | Self::CorruptedMetadata { .. }
        )
    }
}
