//! Test fixtures and store helpers.
//!
//! Provides a scripted store for engine tests and convenience constructors
//! for the real backends.

use confsync_core::{
    event_channel, validate_key, ConfEvent, ConfItem, ConfOp, ConfStore, EchoSuppressor,
    EventSink, EventStream, Offer, StoreError, StoreOptions, StoreResult, StreamSlot,
};
use confsync_store::{DirStore, MemoryStore, Namespace};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Once};
use std::time::{Duration, Instant};
use tempfile::TempDir;

/// Queue capacity of scripted stores. Large enough that tests never block.
pub const SCRIPTED_QUEUE_CAPACITY: usize = 4096;

/// A call made on a [`ScriptedStore`] by the code under test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    /// `put(key, content)`.
    Put(String, Vec<u8>),
    /// `delete(key)`.
    Delete(String),
    /// `suppress_next(key)`.
    SuppressNext(String),
}

impl Call {
    /// Returns true for writes.
    pub fn is_write(&self) -> bool {
        !matches!(self, Call::SuppressNext(_))
    }
}

/// An in-memory store driven by the test.
///
/// External changes are injected with [`ScriptedStore::inject`]. Calls made
/// by the code under test are recorded in order. With echoes enabled, every
/// write that changes the store is reported back through the store's own
/// stream the way a real watcher would, so echo suppression is exercised end
/// to end. Writes that raise no echo withdraw their suppression.
pub struct ScriptedStore {
    label: String,
    items: Mutex<BTreeMap<String, Vec<u8>>>,
    calls: Mutex<Vec<Call>>,
    echo: EchoSuppressor,
    sink: Mutex<Option<EventSink>>,
    stream: StreamSlot,
    echoes: AtomicBool,
    failing_keys: Mutex<HashSet<String>>,
    fail_enumerate: AtomicBool,
    closed: AtomicBool,
}

impl ScriptedStore {
    /// Creates an empty store.
    pub fn new(label: impl Into<String>) -> Self {
        let label = label.into();
        let (sink, stream) = event_channel(SCRIPTED_QUEUE_CAPACITY, label.clone());
        Self {
            label,
            items: Mutex::new(BTreeMap::new()),
            calls: Mutex::new(Vec::new()),
            echo: EchoSuppressor::new(),
            sink: Mutex::new(Some(sink)),
            stream: StreamSlot::new(stream),
            echoes: AtomicBool::new(false),
            failing_keys: Mutex::new(HashSet::new()),
            fail_enumerate: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    /// Creates a store holding `items`.
    pub fn with_items<K, V>(label: impl Into<String>, items: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<Vec<u8>>,
    {
        let store = Self::new(label);
        store
            .items
            .lock()
            .extend(items.into_iter().map(|(k, v)| (k.into(), v.into())));
        store
    }

    /// Wraps the store for use as a `dyn ConfStore`.
    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// Reports own writes back through the stream.
    pub fn set_echo(&self, enabled: bool) {
        self.echoes.store(enabled, Ordering::SeqCst);
    }

    /// Makes every write to `key` fail.
    pub fn fail_key(&self, key: impl Into<String>) {
        self.failing_keys.lock().insert(key.into());
    }

    /// Makes `enumerate` fail.
    pub fn fail_enumerate(&self, fail: bool) {
        self.fail_enumerate.store(fail, Ordering::SeqCst);
    }

    /// Applies an external change and reports it through the stream.
    pub fn inject(&self, event: ConfEvent) -> Offer {
        let _ = self.apply(&event);
        self.emit(event)
    }

    /// Queues an event without applying it or checking it.
    pub fn inject_raw(&self, event: ConfEvent) -> Offer {
        match self.sink.lock().as_ref() {
            Some(sink) => sink.send_raw(event),
            None => Offer::Closed,
        }
    }

    /// Ends the stream without closing the store.
    pub fn end_stream(&self) {
        self.sink.lock().take();
    }

    /// Returns every recorded call.
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    /// Returns the recorded writes.
    pub fn writes(&self) -> Vec<Call> {
        self.calls.lock().iter().filter(|c| c.is_write()).cloned().collect()
    }

    /// Returns the current items.
    pub fn snapshot(&self) -> BTreeMap<String, Vec<u8>> {
        self.items.lock().clone()
    }

    /// Returns the content under `key`.
    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.items.lock().get(key).cloned()
    }

    /// Returns the number of live suppressions for `key`.
    pub fn pending_suppressions(&self, key: &str) -> usize {
        self.echo.pending(key)
    }

    /// Returns true if the store was closed.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Waits until at least `count` writes were recorded.
    pub fn wait_for_writes(&self, count: usize, timeout: Duration) -> bool {
        wait_until(timeout, || self.writes().len() >= count)
    }

    /// Applies `event`. Returns false for the delete of a missing key.
    fn apply(&self, event: &ConfEvent) -> bool {
        let mut items = self.items.lock();
        match &event.op {
            ConfOp::Put(content) => {
                items.insert(event.key.clone(), content.clone());
                true
            }
            ConfOp::Delete => items.remove(&event.key).is_some(),
        }
    }

    fn emit(&self, event: ConfEvent) -> Offer {
        let sink = self.sink.lock().clone();
        match sink {
            Some(sink) => sink.offer(event, &self.echo),
            None => Offer::Closed,
        }
    }

    fn write(&self, call: Call, event: ConfEvent) -> StoreResult<()> {
        validate_key(&event.key)?;
        if self.is_closed() {
            return Err(StoreError::Closed);
        }
        self.calls.lock().push(call);
        if self.failing_keys.lock().contains(&event.key) {
            self.echo.withdraw(&event.key);
            return Err(StoreError::Backend(format!("write to {} refused", event.key)));
        }
        let changed = self.apply(&event);
        if changed && self.echoes.load(Ordering::SeqCst) {
            self.emit(event);
        } else {
            self.echo.withdraw(&event.key);
        }
        Ok(())
    }
}

impl ConfStore for ScriptedStore {
    fn describe(&self) -> String {
        format!("scripted:{}", self.label)
    }

    fn enumerate(&self) -> StoreResult<Vec<ConfItem>> {
        if self.fail_enumerate.load(Ordering::SeqCst) {
            return Err(StoreError::Enumerate(format!("{} is unreachable", self.label)));
        }
        Ok(self
            .items
            .lock()
            .iter()
            .map(|(key, content)| ConfItem::new(key.clone(), content.clone()))
            .collect())
    }

    fn stream(&self) -> StoreResult<EventStream> {
        if self.is_closed() {
            return Err(StoreError::Closed);
        }
        self.stream.take()
    }

    fn put(&self, key: &str, content: &[u8]) -> StoreResult<()> {
        self.write(
            Call::Put(key.to_string(), content.to_vec()),
            ConfEvent::put(key, content.to_vec()),
        )
    }

    fn delete(&self, key: &str) -> StoreResult<()> {
        self.write(Call::Delete(key.to_string()), ConfEvent::delete(key))
    }

    fn suppress_next(&self, key: &str) {
        self.calls.lock().push(Call::SuppressNext(key.to_string()));
        self.echo.suppress_next(key);
    }

    fn close(&self) -> StoreResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(StoreError::Closed);
        }
        self.sink.lock().take();
        self.stream.discard();
        Ok(())
    }
}

/// A [`DirStore`] over a temporary directory.
pub struct TempDirStore {
    /// The store.
    pub store: Arc<DirStore>,
    /// Kept alive for the lifetime of the fixture.
    pub dir: TempDir,
}

impl TempDirStore {
    /// Opens a store over a fresh temporary directory.
    pub fn new() -> Self {
        Self::with_options(&StoreOptions::default())
    }

    /// Opens a store with `options`.
    pub fn with_options(options: &StoreOptions) -> Self {
        let dir = TempDir::new().expect("Failed to create temp directory");
        let store = DirStore::open(dir.path(), options).expect("Failed to open directory store");
        Self {
            store: Arc::new(store),
            dir,
        }
    }
}

impl Default for TempDirStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Opens a [`MemoryStore`] on `prefix` of a fresh namespace.
pub fn memory_store(prefix: &str) -> (Namespace, Arc<MemoryStore>) {
    let namespace = Namespace::new();
    let store = MemoryStore::open(&namespace, prefix, &StoreOptions::default())
        .expect("Failed to open memory store");
    (namespace, Arc::new(store))
}

/// Polls `condition` until it holds or `timeout` passes.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
}

/// Installs a test log subscriber once per process.
///
/// Honors `RUST_LOG`; defaults to `debug` for confsync crates.
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("confsync=debug,warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_calls_in_order() {
        let store = ScriptedStore::new("s");
        store.suppress_next("a");
        store.put("a", b"1").unwrap();
        store.delete("a").unwrap();

        assert_eq!(
            store.calls(),
            vec![
                Call::SuppressNext("a".into()),
                Call::Put("a".into(), b"1".to_vec()),
                Call::Delete("a".into()),
            ]
        );
        assert_eq!(store.writes().len(), 2);
        assert!(store.snapshot().is_empty());
    }

    #[test]
    fn echo_is_suppressed_once() {
        let store = ScriptedStore::new("s");
        store.set_echo(true);
        let stream = store.stream().unwrap();

        store.suppress_next("a");
        store.put("a", b"1").unwrap();
        store.put("a", b"2").unwrap();

        assert_eq!(stream.try_recv(), Some(ConfEvent::put("a", b"2".to_vec())));
        assert_eq!(stream.try_recv(), None);
    }

    #[test]
    fn failing_key_is_recorded_but_not_applied() {
        let store = ScriptedStore::new("s");
        store.fail_key("bad");
        assert!(store.put("bad", b"x").is_err());
        assert_eq!(store.writes(), vec![Call::Put("bad".into(), b"x".to_vec())]);
        assert_eq!(store.get("bad"), None);
    }

    #[test]
    fn close_ends_stream() {
        let store = ScriptedStore::new("s");
        let stream = store.stream().unwrap();
        store.close().unwrap();
        assert_eq!(stream.recv(), None);
        assert!(matches!(store.close(), Err(StoreError::Closed)));
        assert!(matches!(store.put("a", b""), Err(StoreError::Closed)));
    }

    #[test]
    fn inject_rejects_invalid_keys() {
        let store = ScriptedStore::new("s");
        assert_eq!(store.inject(ConfEvent::delete("../etc")), Offer::Rejected);
        assert_eq!(store.inject_raw(ConfEvent::delete("../etc")), Offer::Forwarded);
    }

    #[test]
    fn temp_dir_store_opens() {
        let fixture = TempDirStore::new();
        fixture.store.put("a", b"1").unwrap();
        assert!(fixture.dir.path().join("a").is_file());
    }
}
