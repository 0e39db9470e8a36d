//! Error types for the sync engine.

use confsync_core::StoreError;
use std::fmt;
use thiserror::Error;

/// Result type for engine operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Which of the two synchronized stores an error concerns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    /// The filesystem-side store.
    Local,
    /// The key-value-side store.
    Remote,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Local => f.write_str("local"),
            Side::Remote => f.write_str("remote"),
        }
    }
}

/// Startup stage at which a fatal error occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartupStage {
    /// Connecting to the remote store.
    Connect,
    /// Opening the local store or the event streams.
    WatchSetup,
    /// Enumerating either store during reconciliation.
    Enumerate,
}

impl fmt::Display for StartupStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StartupStage::Connect => f.write_str("connect"),
            StartupStage::WatchSetup => f.write_str("watch-setup"),
            StartupStage::Enumerate => f.write_str("enumerate"),
        }
    }
}

/// Errors that can occur while reconciling or propagating.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Invalid or incomplete configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A store could not be enumerated.
    #[error("failed to enumerate {side} store: {source}")]
    Enumerate {
        /// Store that failed.
        side: Side,
        /// Underlying store error.
        #[source]
        source: StoreError,
    },

    /// A store's event stream could not be taken.
    #[error("failed to open event stream of {side} store: {source}")]
    Stream {
        /// Store that failed.
        side: Side,
        /// Underlying store error.
        #[source]
        source: StoreError,
    },

    /// A propagation thread could not be started.
    #[error("failed to start propagation thread: {0}")]
    Spawn(#[from] std::io::Error),

    /// A propagation thread panicked.
    #[error("propagation thread {0} panicked")]
    Panicked(String),

    /// A fatal error during startup.
    #[error("startup failed at {stage} stage: {source}")]
    Startup {
        /// Stage that failed.
        stage: StartupStage,
        /// What went wrong.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl SyncError {
    /// Wraps an error as a fatal startup error at `stage`.
    pub fn startup(
        stage: StartupStage,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::Startup {
            stage,
            source: source.into(),
        }
    }

    /// Returns the startup stage of a startup error.
    pub fn stage(&self) -> Option<StartupStage> {
        match self {
            SyncError::Startup { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    /// Returns true if the error must abort the process.
    ///
    /// Only a panicked propagation thread is not fatal by itself: the other
    /// direction keeps running.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, SyncError::Panicked(_))
    }
}
