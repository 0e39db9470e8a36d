//! Key prefix store over a shared namespace.

use crate::namespace::{Namespace, NamespaceChange};
use confsync_core::{
    event_channel, join_key, strip_prefix, validate_key, ConfEvent, ConfItem, ConfStore,
    EchoSuppressor, EventSink, EventStream, Offer, StoreError, StoreOptions, StoreResult,
    StreamSlot,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// A store exposing the keys under one prefix of a [`Namespace`].
///
/// Keys are relative to the prefix: with prefix `/conf`, the namespace key
/// `/conf/nginx/site.conf` is the store key `nginx/site.conf`.
///
/// A watch thread receives every namespace change under the prefix, whoever
/// made it, strips the prefix and offers the event to the stream.
///
/// # Example
///
/// ```rust
/// use confsync_core::{ConfEvent, ConfStore, StoreOptions};
/// use confsync_store::{MemoryStore, Namespace};
///
/// let namespace = Namespace::new();
/// let store = MemoryStore::open(&namespace, "/conf", &StoreOptions::default()).unwrap();
/// let stream = store.stream().unwrap();
///
/// // Another client writes under the prefix.
/// namespace.put("/conf/app.toml", b"port = 80").unwrap();
/// assert_eq!(stream.recv(), Some(ConfEvent::put("app.toml", b"port = 80".to_vec())));
/// store.close().unwrap();
/// ```
pub struct MemoryStore {
    namespace: Namespace,
    prefix: String,
    watch_id: u64,
    echo: Arc<EchoSuppressor>,
    stream: StreamSlot,
    watcher: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl MemoryStore {
    /// Opens a store on `prefix` and starts watching it.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Setup`] if the watch thread cannot be started.
    pub fn open(
        namespace: &Namespace,
        prefix: impl Into<String>,
        options: &StoreOptions,
    ) -> StoreResult<Self> {
        let prefix = prefix.into();
        let echo = Arc::new(EchoSuppressor::with_window(options.suppression_window));
        let (sink, stream) = event_channel(options.event_queue_capacity, format!("kv:{prefix}"));
        let (watch_id, changes) = namespace.watch(&prefix);

        let watcher = {
            let echo = Arc::clone(&echo);
            let watch_prefix = prefix.clone();
            thread::Builder::new()
                .name("confsync-kv-watch".into())
                .spawn(move || watch_loop(&watch_prefix, &changes, &sink, &echo))
                .map_err(|err| {
                    namespace.unwatch(watch_id);
                    StoreError::Setup(format!("cannot start watch thread for {prefix}: {err}"))
                })?
        };

        tracing::debug!(prefix = %prefix, "watching key prefix");
        Ok(Self {
            namespace: namespace.clone(),
            prefix,
            watch_id,
            echo,
            stream: StreamSlot::new(stream),
            watcher: Mutex::new(Some(watcher)),
            closed: AtomicBool::new(false),
        })
    }

    /// Returns the key prefix.
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Returns the number of live suppressions for `key`.
    #[must_use]
    pub fn pending_suppressions(&self, key: &str) -> usize {
        self.echo.pending(key)
    }

    /// A write that raised no namespace change has no echo to swallow.
    fn withdraw_suppression(&self, key: &str) {
        if self.echo.withdraw(key) {
            tracing::debug!(prefix = %self.prefix, key = %key, "withdrew unused suppression");
        }
    }

    fn check_open(&self) -> StoreResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            Err(StoreError::Closed)
        } else {
            Ok(())
        }
    }
}

fn watch_loop(
    prefix: &str,
    changes: &Receiver<NamespaceChange>,
    sink: &EventSink,
    echo: &EchoSuppressor,
) {
    for change in changes {
        let Some(rel) = strip_prefix(prefix, change.key()) else {
            continue;
        };
        let event = match &change {
            NamespaceChange::Put { value, .. } => ConfEvent::put(rel, value.clone()),
            NamespaceChange::Delete { .. } => ConfEvent::delete(rel),
        };
        if sink.offer(event, echo) == Offer::Closed {
            break;
        }
    }
    tracing::debug!(prefix = %prefix, "watch thread stopped");
}

impl ConfStore for MemoryStore {
    fn describe(&self) -> String {
        format!("kv:{}", self.prefix)
    }

    fn enumerate(&self) -> StoreResult<Vec<ConfItem>> {
        self.check_open()?;
        let entries = self.namespace.scan(&self.prefix).map_err(|err| {
            StoreError::Enumerate(format!("prefix get on {} failed: {err}", self.prefix))
        })?;

        let mut items = Vec::with_capacity(entries.len());
        for (key, value) in entries {
            let Some(rel) = strip_prefix(&self.prefix, &key) else {
                continue;
            };
            if let Err(err) = validate_key(rel) {
                tracing::warn!(prefix = %self.prefix, error = %err, "skipping entry");
                continue;
            }
            items.push(ConfItem::new(rel, value));
        }
        Ok(items)
    }

    fn stream(&self) -> StoreResult<EventStream> {
        self.check_open()?;
        self.stream.take()
    }

    fn put(&self, key: &str, content: &[u8]) -> StoreResult<()> {
        validate_key(key)?;
        self.check_open()?;
        let full = join_key(&self.prefix, key);
        tracing::debug!(key = %full, "performing put");
        let result = self.namespace.put(&full, content);
        if result.is_err() {
            self.withdraw_suppression(key);
        }
        result
    }

    fn delete(&self, key: &str) -> StoreResult<()> {
        validate_key(key)?;
        self.check_open()?;
        let full = join_key(&self.prefix, key);
        tracing::debug!(key = %full, "performing delete");
        match self.namespace.delete(&full) {
            Ok(true) => Ok(()),
            Ok(false) => {
                self.withdraw_suppression(key);
                Ok(())
            }
            Err(err) => {
                self.withdraw_suppression(key);
                Err(err)
            }
        }
    }

    fn suppress_next(&self, key: &str) {
        self.echo.suppress_next(key);
    }

    fn close(&self) -> StoreResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(StoreError::Closed);
        }
        self.namespace.unwatch(self.watch_id);
        self.stream.discard();
        if let Some(handle) = self.watcher.lock().take() {
            if handle.join().is_err() {
                tracing::error!(prefix = %self.prefix, "watch thread panicked");
            }
        }
        self.echo.clear();
        tracing::debug!(prefix = %self.prefix, "store closed");
        Ok(())
    }
}

impl Drop for MemoryStore {
    fn drop(&mut self) {
        if !self.closed.load(Ordering::SeqCst) {
            self.namespace.unwatch(self.watch_id);
        }
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("prefix", &self.prefix)
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish()
    }
}
