//! Echo suppression.
//!
//! A write issued by the engine on behalf of the other store comes back as a
//! notification from the written store's own watcher. [`EchoSuppressor`] lets
//! the engine announce such a write ahead of time so the watch thread can
//! swallow exactly one matching notification.
//!
//! Registrations are counted per key and expire after the suppression window.
//! A notification that was already in flight before the registration is not
//! suppressed, and interleaved writes to one key may be mis-attributed.

use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

/// Default lifetime of a suppression registration.
pub const DEFAULT_SUPPRESSION_WINDOW: Duration = Duration::from_secs(10);

/// Pending-skip bookkeeping owned by a single store instance.
///
/// # Thread Safety
///
/// The engine registers suppressions from its propagation thread while the
/// store's watch thread consumes them. All access goes through one lock
/// scoped to this instance.
#[derive(Debug)]
pub struct EchoSuppressor {
    window: Duration,
    /// Expiry deadlines per key, oldest first.
    pending: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl EchoSuppressor {
    /// Creates a suppressor with the default window.
    #[must_use]
    pub fn new() -> Self {
        Self::with_window(DEFAULT_SUPPRESSION_WINDOW)
    }

    /// Creates a suppressor whose registrations expire after `window`.
    #[must_use]
    pub fn with_window(window: Duration) -> Self {
        Self {
            window,
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the suppression window.
    #[must_use]
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Expects one self-inflicted event for `key`.
    pub fn suppress_next(&self, key: &str) {
        let now = Instant::now();
        let mut pending = self.pending.lock();
        prune_expired(&mut pending, now);
        pending
            .entry(key.to_owned())
            .or_default()
            .push_back(now + self.window);
    }

    /// Consumes one registration for `key`.
    ///
    /// Returns true if the event for `key` must be dropped. An absent or
    /// fully expired key is left untouched and returns false.
    pub fn consume(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut pending = self.pending.lock();
        let Some(deadlines) = pending.get_mut(key) else {
            return false;
        };
        drop_expired(deadlines, now);
        let hit = deadlines.pop_front().is_some();
        if deadlines.is_empty() {
            pending.remove(key);
        }
        hit
    }

    /// Takes back the latest registration for `key`.
    ///
    /// Backends call this when a write raised no notification, such as a
    /// failed write or the delete of a missing key, so the registration
    /// cannot swallow a later genuine change. Returns false if nothing was
    /// registered.
    pub fn withdraw(&self, key: &str) -> bool {
        let mut pending = self.pending.lock();
        let Some(deadlines) = pending.get_mut(key) else {
            return false;
        };
        let hit = deadlines.pop_back().is_some();
        drop_expired(deadlines, Instant::now());
        if deadlines.is_empty() {
            pending.remove(key);
        }
        hit
    }

    /// Returns the number of live registrations for `key`.
    #[must_use]
    pub fn pending(&self, key: &str) -> usize {
        let now = Instant::now();
        self.pending
            .lock()
            .get(key)
            .map(|deadlines| deadlines.iter().filter(|d| **d > now).count())
            .unwrap_or(0)
    }

    /// Returns the number of keys with registrations, expired ones included
    /// until the next prune.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    /// Returns true if no key is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }

    /// Drops every registration.
    pub fn clear(&self) {
        self.pending.lock().clear();
    }
}

impl Default for EchoSuppressor {
    fn default() -> Self {
        Self::new()
    }
}

fn drop_expired(deadlines: &mut VecDeque<Instant>, now: Instant) {
    while deadlines.front().is_some_and(|deadline| *deadline <= now) {
        deadlines.pop_front();
    }
}

fn prune_expired(pending: &mut HashMap<String, VecDeque<Instant>>, now: Instant) {
    pending.retain(|_, deadlines| {
        drop_expired(deadlines, now);
        !deadlines.is_empty()
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn consume_absent_key_is_noop() {
        let echo = EchoSuppressor::new();
        assert!(!echo.consume("missing"));
        assert!(echo.is_empty());
    }

    #[test]
    fn one_registration_skips_one_event() {
        let echo = EchoSuppressor::new();
        echo.suppress_next("app.conf");

        assert_eq!(echo.pending("app.conf"), 1);
        assert!(echo.consume("app.conf"));
        assert!(!echo.consume("app.conf"));
        assert!(echo.is_empty());
    }

    #[test]
    fn registrations_accumulate() {
        let echo = EchoSuppressor::new();
        echo.suppress_next("k");
        echo.suppress_next("k");

        assert_eq!(echo.pending("k"), 2);
        assert!(echo.consume("k"));
        assert!(echo.consume("k"));
        assert!(!echo.consume("k"));
    }

    #[test]
    fn keys_are_independent() {
        let echo = EchoSuppressor::new();
        echo.suppress_next("a");

        assert!(!echo.consume("b"));
        assert_eq!(echo.pending("a"), 1);
        assert!(echo.consume("a"));
    }

    #[test]
    fn withdraw_cancels_one_registration() {
        let echo = EchoSuppressor::new();
        assert!(!echo.withdraw("k"));

        echo.suppress_next("k");
        echo.suppress_next("k");
        assert!(echo.withdraw("k"));
        assert_eq!(echo.pending("k"), 1);
        assert!(echo.withdraw("k"));
        assert!(!echo.consume("k"));
        assert!(echo.is_empty());
    }

    #[test]
    fn expired_registration_does_not_suppress() {
        let echo = EchoSuppressor::with_window(Duration::from_millis(20));
        echo.suppress_next("k");
        thread::sleep(Duration::from_millis(40));

        assert_eq!(echo.pending("k"), 0);
        assert!(!echo.consume("k"));
        assert!(echo.is_empty());
    }

    #[test]
    fn expired_keys_are_pruned_on_register() {
        let echo = EchoSuppressor::with_window(Duration::from_millis(10));
        echo.suppress_next("stale");
        thread::sleep(Duration::from_millis(30));

        echo.suppress_next("fresh");
        assert_eq!(echo.len(), 1);
    }

    #[test]
    fn concurrent_register_and_consume() {
        let echo = Arc::new(EchoSuppressor::new());
        let writers: Vec<_> = (0..4)
            .map(|_| {
                let echo = Arc::clone(&echo);
                thread::spawn(move || {
                    for _ in 0..250 {
                        echo.suppress_next("shared");
                    }
                })
            })
            .collect();
        for handle in writers {
            handle.join().unwrap();
        }

        let mut consumed = 0;
        while echo.consume("shared") {
            consumed += 1;
        }
        assert_eq!(consumed, 1000);
    }

    proptest! {
        #[test]
        fn matches_counter_model(ops in prop::collection::vec((any::<bool>(), 0u8..4), 0..64)) {
            let echo = EchoSuppressor::new();
            let mut model = [0usize; 4];

            for (register, slot) in ops {
                let key = format!("k{slot}");
                if register {
                    echo.suppress_next(&key);
                    model[slot as usize] += 1;
                } else {
                    let expected = model[slot as usize] > 0;
                    prop_assert_eq!(echo.consume(&key), expected);
                    if expected {
                        model[slot as usize] -= 1;
                    }
                }
            }

            for slot in 0..4u8 {
                prop_assert_eq!(echo.pending(&format!("k{slot}")), model[slot as usize]);
            }
        }
    }
}
