//! # confsync engine
//!
//! Keeps a local configuration store and a remote one in sync.
//!
//! This crate provides:
//! - Startup reconciliation (pull from remote, then push local-only items)
//! - Bidirectional propagation of change events
//! - Process-level startup sequence over a pluggable [`StoreConnector`]
//!
//! ## Architecture
//!
//! The engine implements a **pull-then-push, then follow** model:
//! 1. Pull every remote item into the local store (remote is authoritative)
//! 2. Push local items whose key is missing remotely
//! 3. Forward every later change, one thread per direction
//!
//! Writes issued on behalf of the other side are announced with
//! [`confsync_core::ConfStore::suppress_next`] first, so the written store
//! does not send them back.
//!
//! ## Key Invariants
//!
//! - Remote wins on keys present on both sides at startup
//! - Pull completes before push, and both before propagation
//! - Within one direction, writes happen in stream order
//! - A failed write is logged and skipped; it never stops a loop
//!
//! ## Example
//!
//! ```rust
//! use confsync_core::{ConfStore, StoreOptions};
//! use confsync_engine::Reconciler;
//! use confsync_store::{MemoryStore, Namespace};
//! use std::sync::Arc;
//!
//! let options = StoreOptions::default();
//! let ns = Namespace::new();
//! ns.put("/remote/app.toml", b"port = 80").unwrap();
//!
//! let local: Arc<dyn ConfStore> = Arc::new(MemoryStore::open(&ns, "/local", &options).unwrap());
//! let remote: Arc<dyn ConfStore> = Arc::new(MemoryStore::open(&ns, "/remote", &options).unwrap());
//!
//! let report = Reconciler::new(Arc::clone(&local), Arc::clone(&remote)).reconcile().unwrap();
//! assert!(report.is_clean());
//! assert_eq!(ns.get("/local/app.toml"), Some(b"port = 80".to_vec()));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod error;
mod launch;
mod reconcile;
mod syncer;

pub use config::{RunMode, SyncConfig, DEFAULT_POLL_INTERVAL};
pub use error::{Side, StartupStage, SyncError, SyncResult};
pub use launch::{launch, start, LaunchOutcome, Session, StoreConnector};
pub use reconcile::{ItemFailure, ReconcileReport, Reconciler};
pub use syncer::{Direction, ForwardStats, PropagationStats, SyncHandle, Syncer};
