//! Shared in-memory key-value namespace.

use confsync_core::{strip_prefix, StoreError, StoreResult};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;

/// A change to a namespace key, as seen by a prefix watch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NamespaceChange {
    /// The key was written.
    Put {
        /// Full namespace key.
        key: String,
        /// New value.
        value: Vec<u8>,
    },
    /// The key was removed.
    Delete {
        /// Full namespace key.
        key: String,
    },
}

impl NamespaceChange {
    /// Returns the full key the change applies to.
    pub fn key(&self) -> &str {
        match self {
            NamespaceChange::Put { key, .. } | NamespaceChange::Delete { key } => key,
        }
    }
}

struct Watch {
    id: u64,
    prefix: String,
    tx: Sender<NamespaceChange>,
}

#[derive(Default)]
struct Inner {
    entries: RwLock<BTreeMap<String, Vec<u8>>>,
    watches: Mutex<Vec<Watch>>,
    next_watch_id: AtomicU64,
    fail_writes: AtomicBool,
    fail_reads: AtomicBool,
}

/// An ordered key-value namespace shared between clients.
///
/// Every handle cloned from the same namespace sees the same keys. Each
/// mutation is delivered, in mutation order, to every watch whose prefix owns
/// the key. Removing a missing key changes nothing and notifies nobody.
///
/// # Thread Safety
///
/// Mutations hold the entry lock while notifying, so all watches observe
/// mutations in the same order. Notification never blocks.
#[derive(Clone, Default)]
pub struct Namespace {
    inner: Arc<Inner>,
}

impl Namespace {
    /// Creates an empty namespace.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes `value` under the full key `key`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] while write failures are injected.
    pub fn put(&self, key: &str, value: &[u8]) -> StoreResult<()> {
        self.check_writable()?;
        let mut entries = self.inner.entries.write();
        entries.insert(key.to_owned(), value.to_vec());
        self.notify(NamespaceChange::Put {
            key: key.to_owned(),
            value: value.to_vec(),
        });
        Ok(())
    }

    /// Removes the full key `key`. Returns whether it existed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] while write failures are injected.
    pub fn delete(&self, key: &str) -> StoreResult<bool> {
        self.check_writable()?;
        let mut entries = self.inner.entries.write();
        let existed = entries.remove(key).is_some();
        if existed {
            self.notify(NamespaceChange::Delete {
                key: key.to_owned(),
            });
        }
        Ok(existed)
    }

    /// Returns the value stored under the full key `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.inner.entries.read().get(key).cloned()
    }

    /// Returns every entry under `prefix`, keyed by full key.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] while read failures are injected.
    pub fn scan(&self, prefix: &str) -> StoreResult<Vec<(String, Vec<u8>)>> {
        if self.inner.fail_reads.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("injected read failure".into()));
        }
        Ok(self
            .inner
            .entries
            .read()
            .iter()
            .filter(|(key, _)| strip_prefix(prefix, key).is_some())
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect())
    }

    /// Returns all keys in order.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.inner.entries.read().keys().cloned().collect()
    }

    /// Returns the number of keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.entries.read().len()
    }

    /// Returns true if the namespace holds no keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.entries.read().is_empty()
    }

    /// Makes every write fail until reset.
    pub fn fail_writes(&self, fail: bool) {
        self.inner.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Makes every scan fail until reset.
    pub fn fail_reads(&self, fail: bool) {
        self.inner.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Starts watching every key under `prefix`.
    ///
    /// Returns the watch id and the change receiver. The receiver ends once
    /// [`Namespace::unwatch`] is called with that id.
    pub fn watch(&self, prefix: &str) -> (u64, Receiver<NamespaceChange>) {
        let (tx, rx) = mpsc::channel();
        let id = self.inner.next_watch_id.fetch_add(1, Ordering::SeqCst);
        self.inner.watches.lock().push(Watch {
            id,
            prefix: prefix.to_owned(),
            tx,
        });
        (id, rx)
    }

    /// Cancels a watch.
    pub fn unwatch(&self, id: u64) {
        self.inner.watches.lock().retain(|watch| watch.id != id);
    }

    /// Returns the number of active watches.
    #[must_use]
    pub fn watch_count(&self) -> usize {
        self.inner.watches.lock().len()
    }

    fn check_writable(&self) -> StoreResult<()> {
        if self.inner.fail_writes.load(Ordering::SeqCst) {
            Err(StoreError::Backend("injected write failure".into()))
        } else {
            Ok(())
        }
    }

    fn notify(&self, change: NamespaceChange) {
        let mut watches = self.inner.watches.lock();
        watches.retain(|watch| {
            if strip_prefix(&watch.prefix, change.key()).is_none() {
                return true;
            }
            watch.tx.send(change.clone()).is_ok()
        });
    }
}

impl std::fmt::Debug for Namespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Namespace")
            .field("keys", &self.len())
            .field("watches", &self.watch_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_get_delete() {
        let ns = Namespace::new();
        ns.put("/conf/a", b"1").unwrap();
        assert_eq!(ns.get("/conf/a"), Some(b"1".to_vec()));

        assert!(ns.delete("/conf/a").unwrap());
        assert!(!ns.delete("/conf/a").unwrap());
        assert!(ns.is_empty());
    }

    #[test]
    fn scan_respects_segment_boundary() {
        let ns = Namespace::new();
        ns.put("/conf/a", b"1").unwrap();
        ns.put("/config/b", b"2").unwrap();
        ns.put("/conf", b"root").unwrap();

        let entries = ns.scan("/conf").unwrap();
        assert_eq!(entries, vec![("/conf/a".to_string(), b"1".to_vec())]);
    }

    #[test]
    fn watch_sees_only_its_prefix() {
        let ns = Namespace::new();
        let (_, rx) = ns.watch("/conf");

        ns.put("/other/x", b"0").unwrap();
        ns.put("/conf/a", b"1").unwrap();
        ns.delete("/conf/a").unwrap();

        assert_eq!(
            rx.try_recv().unwrap(),
            NamespaceChange::Put {
                key: "/conf/a".into(),
                value: b"1".to_vec()
            }
        );
        assert_eq!(
            rx.try_recv().unwrap(),
            NamespaceChange::Delete {
                key: "/conf/a".into()
            }
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn deleting_missing_key_notifies_nobody() {
        let ns = Namespace::new();
        let (_, rx) = ns.watch("/conf");

        ns.delete("/conf/missing").unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn unwatch_ends_receiver() {
        let ns = Namespace::new();
        let (id, rx) = ns.watch("/conf");
        assert_eq!(ns.watch_count(), 1);

        ns.unwatch(id);
        assert_eq!(ns.watch_count(), 0);
        assert!(rx.recv().is_err());
    }

    #[test]
    fn injected_failures() {
        let ns = Namespace::new();
        ns.fail_writes(true);
        assert!(matches!(ns.put("/conf/a", b"1"), Err(StoreError::Backend(_))));
        assert!(matches!(ns.delete("/conf/a"), Err(StoreError::Backend(_))));

        ns.fail_writes(false);
        ns.put("/conf/a", b"1").unwrap();

        ns.fail_reads(true);
        assert!(ns.scan("/conf").is_err());
        ns.fail_reads(false);
        assert_eq!(ns.scan("/conf").unwrap().len(), 1);
    }

    #[test]
    fn clones_share_state() {
        let ns = Namespace::new();
        let other = ns.clone();
        other.put("/conf/a", b"1").unwrap();
        assert_eq!(ns.keys(), vec!["/conf/a".to_string()]);
    }
}
