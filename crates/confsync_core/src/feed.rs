//! Event feed between a backend's watch thread and its outward stream.
//!
//! The feed is a bounded queue. When it is full, [`EventSink::offer`] blocks
//! the watch thread until the consumer catches up, so a slow propagation
//! loop slows change detection of its source store instead of dropping
//! events. A capacity of zero gives a rendezvous hand-off.
//!
//! ```text
//! backend watcher ──► watch thread ──offer──► [ queue ] ──► EventStream ──► engine
//!                          │
//!                   EchoSuppressor::consume
//! ```

use crate::echo::EchoSuppressor;
use crate::error::{StoreError, StoreResult};
use crate::model::{validate_key, ConfEvent};
use parking_lot::Mutex;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TryRecvError};
use std::sync::Arc;
use std::time::Duration;

/// Default number of events buffered between a watch thread and its consumer.
pub const DEFAULT_EVENT_QUEUE_CAPACITY: usize = 64;

/// Creates a connected sink/stream pair.
pub fn event_channel(capacity: usize, label: impl Into<String>) -> (EventSink, EventStream) {
    let (tx, rx) = mpsc::sync_channel(capacity);
    let sink = EventSink {
        tx,
        label: Arc::from(label.into()),
    };
    (sink, EventStream { rx })
}

/// What happened to an offered event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Offer {
    /// The event was queued for the consumer.
    Forwarded,
    /// The event was an expected echo and was dropped.
    Suppressed,
    /// The event had an invalid key and was dropped.
    Rejected,
    /// The stream side is gone.
    Closed,
}

/// Producer side of the feed, held by a store's watch thread.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: SyncSender<ConfEvent>,
    label: Arc<str>,
}

impl EventSink {
    /// Offers a watch notification to the stream.
    ///
    /// The event is checked against the key rules first, then against the
    /// store's pending suppressions. Blocks while the queue is full.
    pub fn offer(&self, event: ConfEvent, echo: &EchoSuppressor) -> Offer {
        if let Err(err) = validate_key(&event.key) {
            tracing::error!(store = %self.label, error = %err, "dropping event with invalid key");
            return Offer::Rejected;
        }

        if echo.consume(&event.key) {
            tracing::debug!(
                store = %self.label,
                key = %event.key,
                op = event.kind(),
                remaining = echo.pending(&event.key),
                "skipping echo event"
            );
            return Offer::Suppressed;
        }

        tracing::debug!(store = %self.label, key = %event.key, op = event.kind(), "forwarding event");
        match self.tx.send(event) {
            Ok(()) => Offer::Forwarded,
            Err(_) => Offer::Closed,
        }
    }

    /// Queues `event` without key or suppression checks.
    ///
    /// Meant for test doubles that model a non-conforming backend.
    pub fn send_raw(&self, event: ConfEvent) -> Offer {
        match self.tx.send(event) {
            Ok(()) => Offer::Forwarded,
            Err(_) => Offer::Closed,
        }
    }

    /// Returns the label of the owning store.
    pub fn label(&self) -> &str {
        &self.label
    }
}

/// Result of a bounded wait on an [`EventStream`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamPoll {
    /// The next event.
    Event(ConfEvent),
    /// Nothing arrived within the timeout.
    Timeout,
    /// The store closed its side; no more events will arrive.
    Ended,
}

/// Consumer side of the feed: the live change stream of one store.
///
/// Events arrive in the order the backend observed them. The stream ends
/// when the store is closed.
#[derive(Debug)]
pub struct EventStream {
    rx: Receiver<ConfEvent>,
}

impl EventStream {
    /// Blocks until the next event. Returns `None` once the stream ended.
    pub fn recv(&self) -> Option<ConfEvent> {
        self.rx.recv().ok()
    }

    /// Waits up to `timeout` for the next event.
    pub fn recv_timeout(&self, timeout: Duration) -> StreamPoll {
        match self.rx.recv_timeout(timeout) {
            Ok(event) => StreamPoll::Event(event),
            Err(RecvTimeoutError::Timeout) => StreamPoll::Timeout,
            Err(RecvTimeoutError::Disconnected) => StreamPoll::Ended,
        }
    }

    /// Returns the next queued event without blocking.
    pub fn try_recv(&self) -> Option<ConfEvent> {
        match self.rx.try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }
}

impl Iterator for EventStream {
    type Item = ConfEvent;

    fn next(&mut self) -> Option<Self::Item> {
        self.recv()
    }
}

/// Holds a store's stream until it is taken.
///
/// The stream is not restartable: it can be taken once, and closing the
/// store drops it if nobody took it.
#[derive(Debug)]
pub struct StreamSlot {
    stream: Mutex<Option<EventStream>>,
}

impl StreamSlot {
    /// Creates a slot holding `stream`.
    pub fn new(stream: EventStream) -> Self {
        Self {
            stream: Mutex::new(Some(stream)),
        }
    }

    /// Hands out the stream.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::StreamTaken`] on every call after the first.
    pub fn take(&self) -> StoreResult<EventStream> {
        self.stream.lock().take().ok_or(StoreError::StreamTaken)
    }

    /// Drops the stream if it was never taken.
    pub fn discard(&self) {
        self.stream.lock().take();
    }
}
