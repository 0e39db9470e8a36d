//! Error types for store operations.

use std::io;
use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur in a store backend.
#[derive(Debug, Error)]
pub enum StoreError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The store could not produce a snapshot of its items.
    #[error("enumeration failed: {0}")]
    Enumerate(String),

    /// The backend could not be set up (bad root, watch registration failed).
    #[error("store setup failed: {0}")]
    Setup(String),

    /// The backend rejected a read or write.
    #[error("backend error: {0}")]
    Backend(String),

    /// A key violates the relative key rules.
    #[error("invalid key {key:?}: {reason}")]
    InvalidKey {
        /// The offending key.
        key: String,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// The event stream was already handed out.
    #[error("event stream already taken")]
    StreamTaken,

    /// The store is closed.
    #[error("store is closed")]
    Closed,
}

impl StoreError {
    /// Creates an invalid key error.
    pub fn invalid_key(key: impl Into<String>, reason: &'static str) -> Self {
        Self::InvalidKey {
            key: key.into(),
            reason,
        }
    }

    /// Returns true if the error is caused by the caller rather than the backend.
    pub fn is_usage_error(&self) -> bool {
        matches!(
            self,
            StoreError::InvalidKey { .. } | StoreError::StreamTaken | StoreError::Closed
        )
    }
}
