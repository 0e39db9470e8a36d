//! Store contract.

use crate::echo::DEFAULT_SUPPRESSION_WINDOW;
use crate::error::StoreResult;
use crate::feed::{EventStream, DEFAULT_EVENT_QUEUE_CAPACITY};
use crate::model::ConfItem;
use std::time::Duration;

/// A configuration store kept in sync by the engine.
///
/// A store is a set of keyed byte blobs plus a live stream of changes to
/// them. The engine never looks past this trait.
///
/// # Invariants
///
/// - Keys returned by `enumerate` and keys carried by events follow the same
///   relative key rules (see [`crate::validate_key`])
/// - After `put` or `delete` returns, `enumerate` reflects the write
/// - `stream` yields events in the order the backend observed them
/// - A notification for a key registered with `suppress_next` is dropped
///   instead of being forwarded to the stream
/// - A write that raises no notification leaves no registration behind
/// - `close` ends the stream; later writes fail with
///   [`crate::StoreError::Closed`]
///
/// # Implementors
///
/// Backends must be `Send + Sync`: the engine writes from two propagation
/// threads while the store's own watch thread reads suppression state.
pub trait ConfStore: Send + Sync {
    /// Returns a short label for log lines, such as `dir:/etc/app`.
    fn describe(&self) -> String;

    /// Returns a point-in-time snapshot of every content entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    fn enumerate(&self) -> StoreResult<Vec<ConfItem>>;

    /// Hands out the live change stream.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StoreError::StreamTaken`] if the stream was already
    /// handed out, or [`crate::StoreError::Closed`] after `close`.
    fn stream(&self) -> StoreResult<EventStream>;

    /// Writes `content` under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is invalid, the store is closed or the
    /// backend write fails.
    fn put(&self, key: &str, content: &[u8]) -> StoreResult<()>;

    /// Removes `key`. Removing a missing key succeeds.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is invalid, the store is closed or the
    /// backend delete fails.
    fn delete(&self, key: &str) -> StoreResult<()>;

    /// Expects one self-inflicted event for `key`.
    ///
    /// Must be called before the write that triggers the event. If that
    /// write raises no notification (it fails, or deletes a missing key),
    /// the store withdraws the registration with
    /// [`crate::EchoSuppressor::withdraw`].
    fn suppress_next(&self, key: &str);

    /// Releases backend resources and ends the stream.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StoreError::Closed`] if the store was already closed.
    fn close(&self) -> StoreResult<()>;
}

/// Tuning shared by all store backends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreOptions {
    /// Events buffered between the watch thread and the stream consumer.
    pub event_queue_capacity: usize,
    /// Lifetime of an echo suppression registration.
    pub suppression_window: Duration,
}

impl StoreOptions {
    /// Creates options with default values.
    pub fn new() -> Self {
        Self {
            event_queue_capacity: DEFAULT_EVENT_QUEUE_CAPACITY,
            suppression_window: DEFAULT_SUPPRESSION_WINDOW,
        }
    }

    /// Sets the event queue capacity.
    pub fn with_event_queue_capacity(mut self, capacity: usize) -> Self {
        self.event_queue_capacity = capacity;
        self
    }

    /// Sets the suppression window.
    pub fn with_suppression_window(mut self, window: Duration) -> Self {
        self.suppression_window = window;
        self
    }
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_builder() {
        let options = StoreOptions::new()
            .with_event_queue_capacity(8)
            .with_suppression_window(Duration::from_secs(2));

        assert_eq!(options.event_queue_capacity, 8);
        assert_eq!(options.suppression_window, Duration::from_secs(2));
    }

    #[test]
    fn options_defaults() {
        let options = StoreOptions::default();
        assert_eq!(options.event_queue_capacity, DEFAULT_EVENT_QUEUE_CAPACITY);
        assert_eq!(options.suppression_window, DEFAULT_SUPPRESSION_WINDOW);
    }
}
