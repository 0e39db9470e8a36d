//! Bidirectional propagation.
//!
//! Two symmetric forwarding loops, each on its own thread:
//!
//! ```text
//! local.stream()  ──► local->remote ──► remote.suppress_next + put/delete
//! remote.stream() ──► remote->local ──► local.suppress_next + put/delete
//! ```
//!
//! A loop ends when its source stream ends or when shutdown is requested.
//! Nothing else is shared between the two directions.

use crate::config::DEFAULT_POLL_INTERVAL;
use crate::error::{Side, SyncError, SyncResult};
use confsync_core::{validate_key, ConfEvent, ConfOp, ConfStore, EventStream, StreamPoll};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Direction of a forwarding loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Local events written to the remote store.
    LocalToRemote,
    /// Remote events written to the local store.
    RemoteToLocal,
}

impl Direction {
    /// Store the loop writes to.
    pub fn target(&self) -> Side {
        match self {
            Direction::LocalToRemote => Side::Remote,
            Direction::RemoteToLocal => Side::Local,
        }
    }

    fn thread_name(&self) -> &'static str {
        match self {
            Direction::LocalToRemote => "confsync-local-to-remote",
            Direction::RemoteToLocal => "confsync-remote-to-local",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::LocalToRemote => f.write_str("local->remote"),
            Direction::RemoteToLocal => f.write_str("remote->local"),
        }
    }
}

/// Counters of one forwarding loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ForwardStats {
    /// Events written to the target store.
    pub forwarded: u64,
    /// Events whose write failed.
    pub failed: u64,
    /// Malformed events dropped without a write.
    pub anomalies: u64,
}

/// Counters of both forwarding loops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PropagationStats {
    /// Local to remote loop.
    pub local_to_remote: ForwardStats,
    /// Remote to local loop.
    pub remote_to_local: ForwardStats,
}

/// Forwards change events between a local and a remote store.
///
/// # Example
///
/// ```rust
/// use confsync_core::{ConfStore, StoreOptions};
/// use confsync_engine::Syncer;
/// use confsync_store::{MemoryStore, Namespace};
/// use std::sync::Arc;
/// use std::time::{Duration, Instant};
///
/// let options = StoreOptions::default();
/// let ns = Namespace::new();
/// let local: Arc<dyn ConfStore> = Arc::new(MemoryStore::open(&ns, "/local", &options).unwrap());
/// let remote: Arc<dyn ConfStore> = Arc::new(MemoryStore::open(&ns, "/remote", &options).unwrap());
///
/// let handle = Syncer::new(local, remote).spawn().unwrap();
/// ns.put("/remote/app.toml", b"port = 80").unwrap();
///
/// let deadline = Instant::now() + Duration::from_secs(2);
/// while ns.get("/local/app.toml").is_none() && Instant::now() < deadline {
///     std::thread::sleep(Duration::from_millis(5));
/// }
/// assert_eq!(ns.get("/local/app.toml"), Some(b"port = 80".to_vec()));
///
/// handle.shutdown();
/// handle.join().unwrap();
/// ```
pub struct Syncer {
    local: Arc<dyn ConfStore>,
    remote: Arc<dyn ConfStore>,
    poll_interval: Duration,
}

impl Syncer {
    /// Creates a syncer over the two stores.
    pub fn new(local: Arc<dyn ConfStore>, remote: Arc<dyn ConfStore>) -> Self {
        Self {
            local,
            remote,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Sets how often idle loops check for shutdown.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Takes both event streams and starts the forwarding loops.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Stream`] if either stream cannot be taken, or
    /// [`SyncError::Spawn`] if a thread cannot be started.
    pub fn spawn(&self) -> SyncResult<SyncHandle> {
        let local_events = self.local.stream().map_err(|source| SyncError::Stream {
            side: Side::Local,
            source,
        })?;
        let remote_events = self.remote.stream().map_err(|source| SyncError::Stream {
            side: Side::Remote,
            source,
        })?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let stats = Arc::new(Mutex::new(PropagationStats::default()));

        let up = self.start_loop(
            Direction::LocalToRemote,
            local_events,
            Arc::clone(&self.remote),
            &shutdown,
            &stats,
        )?;
        let down = match self.start_loop(
            Direction::RemoteToLocal,
            remote_events,
            Arc::clone(&self.local),
            &shutdown,
            &stats,
        ) {
            Ok(handle) => handle,
            Err(err) => {
                shutdown.store(true, Ordering::SeqCst);
                join_loop(Direction::LocalToRemote, up);
                return Err(err);
            }
        };

        tracing::info!(
            local = %self.local.describe(),
            remote = %self.remote.describe(),
            "keeping local and remote stores in sync"
        );
        Ok(SyncHandle {
            shutdown,
            stats,
            loops: vec![(Direction::LocalToRemote, up), (Direction::RemoteToLocal, down)],
        })
    }

    /// Runs both loops and blocks until both end.
    ///
    /// Under normal operation this never returns: loops end only when their
    /// source store is closed.
    ///
    /// # Errors
    ///
    /// Returns the errors of [`Syncer::spawn`] and [`SyncHandle::join`].
    pub fn run(&self) -> SyncResult<PropagationStats> {
        self.spawn()?.join()
    }

    fn start_loop(
        &self,
        direction: Direction,
        source: EventStream,
        target: Arc<dyn ConfStore>,
        shutdown: &Arc<AtomicBool>,
        stats: &Arc<Mutex<PropagationStats>>,
    ) -> SyncResult<JoinHandle<()>> {
        let forwarder = Forwarder {
            direction,
            source,
            target,
            shutdown: Arc::clone(shutdown),
            stats: Arc::clone(stats),
            poll_interval: self.poll_interval,
        };
        let handle = thread::Builder::new()
            .name(direction.thread_name().into())
            .spawn(move || forwarder.run())?;
        Ok(handle)
    }
}

/// Handle to running forwarding loops.
pub struct SyncHandle {
    shutdown: Arc<AtomicBool>,
    stats: Arc<Mutex<PropagationStats>>,
    loops: Vec<(Direction, JoinHandle<()>)>,
}

impl SyncHandle {
    /// Asks both loops to stop after their current event.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    /// Returns the counters so far.
    pub fn stats(&self) -> PropagationStats {
        *self.stats.lock()
    }

    /// Returns true once both loops have ended.
    pub fn is_finished(&self) -> bool {
        self.loops.iter().all(|(_, handle)| handle.is_finished())
    }

    /// Waits for both loops to end.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Panicked`] if a loop panicked. The other loop is
    /// still waited for.
    pub fn join(self) -> SyncResult<PropagationStats> {
        let mut panicked = None;
        for (direction, handle) in self.loops {
            if !join_loop(direction, handle) {
                panicked.get_or_insert(direction);
            }
        }
        match panicked {
            Some(direction) => Err(SyncError::Panicked(direction.to_string())),
            None => Ok(*self.stats.lock()),
        }
    }
}

/// Waits for one loop. Returns false, after logging, if it panicked.
fn join_loop(direction: Direction, handle: JoinHandle<()>) -> bool {
    let joined = handle.join().is_ok();
    if !joined {
        tracing::error!(%direction, "propagation loop panicked");
    }
    joined
}

struct Forwarder {
    direction: Direction,
    source: EventStream,
    target: Arc<dyn ConfStore>,
    shutdown: Arc<AtomicBool>,
    stats: Arc<Mutex<PropagationStats>>,
    poll_interval: Duration,
}

enum Outcome {
    Forwarded,
    Failed,
    Anomaly,
}

impl Forwarder {
    fn run(self) {
        let direction = self.direction;
        tracing::debug!(%direction, "propagation loop started");
        while !self.shutdown.load(Ordering::SeqCst) {
            match self.source.recv_timeout(self.poll_interval) {
                StreamPoll::Event(event) => {
                    let outcome = self.forward(&event);
                    self.record(outcome);
                }
                StreamPoll::Timeout => {}
                StreamPoll::Ended => {
                    tracing::info!(%direction, "source stream ended");
                    break;
                }
            }
        }
        tracing::debug!(%direction, "propagation loop stopped");
    }

    fn forward(&self, event: &ConfEvent) -> Outcome {
        let direction = self.direction;
        let target = direction.target();

        if let Err(err) = validate_key(&event.key) {
            tracing::error!(%direction, error = %err, "dropping unrecognized event");
            return Outcome::Anomaly;
        }

        // The echo of this write must be registered before the write can raise it.
        self.target.suppress_next(&event.key);
        let result = match &event.op {
            ConfOp::Put(content) => {
                tracing::info!(key = %event.key, "propagating put event to {} store", target);
                self.target.put(&event.key, content)
            }
            ConfOp::Delete => {
                tracing::info!(key = %event.key, "propagating delete event to {} store", target);
                self.target.delete(&event.key)
            }
        };

        match result {
            Ok(()) => Outcome::Forwarded,
            Err(err) => {
                tracing::error!(
                    key = %event.key,
                    op = event.kind(),
                    error = %err,
                    "failed to propagate event to {} store",
                    target
                );
                Outcome::Failed
            }
        }
    }

    fn record(&self, outcome: Outcome) {
        let mut stats = self.stats.lock();
        let counters = match self.direction {
            Direction::LocalToRemote => &mut stats.local_to_remote,
            Direction::RemoteToLocal => &mut stats.remote_to_local,
        };
        match outcome {
            Outcome::Forwarded => counters.forwarded += 1,
            Outcome::Failed => counters.failed += 1,
            Outcome::Anomaly => counters.anomalies += 1,
        }
    }
}
