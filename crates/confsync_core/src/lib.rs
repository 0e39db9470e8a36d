//! # confsync core
//!
//! Store contract, event model and echo suppression for confsync.
//!
//! This crate provides:
//! - The [`ConfStore`] contract every backend implements
//! - The item and event model exchanged across that contract
//! - Key rules shared by all backends
//! - The per-store [`EchoSuppressor`]
//! - The bounded event feed between a backend's watch thread and its stream
//!
//! ## Echo suppression
//!
//! When the engine writes into store A because store B changed, A's watcher
//! reports that write back as a fresh change. The engine registers the write
//! with [`ConfStore::suppress_next`] before issuing it, and the backend's watch
//! thread drops the matching notification instead of forwarding it. Every
//! notification passes through [`EventSink::offer`], so the rule is the same
//! for all backends.
//!
//! ## Key Invariants
//!
//! - Keys are relative, `/`-separated and never contain `.` or `..` segments
//! - Events of one store are delivered in the order they were observed
//! - A suppression registration never outlives its window
//! - Suppression state is owned by one store instance

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod echo;
mod error;
mod feed;
mod model;
mod store;

pub use echo::{EchoSuppressor, DEFAULT_SUPPRESSION_WINDOW};
pub use error::{StoreError, StoreResult};
pub use feed::{
    event_channel, EventSink, EventStream, Offer, StreamPoll, StreamSlot,
    DEFAULT_EVENT_QUEUE_CAPACITY,
};
pub use model::{
    join_key, strip_prefix, validate_key, ConfEvent, ConfItem, ConfOp, KEY_SEPARATOR,
};
pub use store::{ConfStore, StoreOptions};
