//! Process-level startup sequence.
//!
//! ```text
//! validate ─► connect remote ─► open local ─► pull ─┬─► (PullOnly) close
//!                                                   └─► push ─► propagate ─► close
//! ```
//!
//! Every fatal error names the stage that failed. Stores opened before the
//! failure are closed before the error is returned.

use crate::config::{RunMode, SyncConfig};
use crate::error::{StartupStage, SyncError, SyncResult};
use crate::reconcile::{ReconcileReport, Reconciler};
use crate::syncer::{PropagationStats, SyncHandle, Syncer};
use confsync_core::{ConfStore, StoreOptions, StoreResult};
use std::path::Path;
use std::sync::Arc;

/// Builds the two stores of a session.
///
/// Connection and authentication details belong to the implementor; the
/// engine only passes the configured endpoint, prefix and root through.
pub trait StoreConnector {
    /// Connects to the remote store and opens a store on `prefix`.
    ///
    /// # Errors
    ///
    /// Returns an error if the endpoint cannot be reached.
    fn connect_remote(
        &self,
        endpoint: &str,
        prefix: &str,
        options: &StoreOptions,
    ) -> StoreResult<Arc<dyn ConfStore>>;

    /// Opens the local store rooted at `root` and starts watching it.
    ///
    /// # Errors
    ///
    /// Returns an error if the root cannot be watched.
    fn open_local(&self, root: &Path, options: &StoreOptions) -> StoreResult<Arc<dyn ConfStore>>;
}

/// Result of a completed session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchOutcome {
    /// Mode the session ran in.
    pub mode: RunMode,
    /// Reconciliation report.
    pub reconcile: ReconcileReport,
    /// Propagation counters, in [`RunMode::Sync`].
    pub propagation: Option<PropagationStats>,
}

/// A started session: reconciled and, in [`RunMode::Sync`], propagating.
pub struct Session {
    mode: RunMode,
    local: Arc<dyn ConfStore>,
    remote: Arc<dyn ConfStore>,
    reconcile: ReconcileReport,
    handle: Option<SyncHandle>,
}

impl Session {
    /// Returns the reconciliation report.
    pub fn reconcile_report(&self) -> &ReconcileReport {
        &self.reconcile
    }

    /// Returns the propagation counters so far.
    pub fn propagation_stats(&self) -> Option<PropagationStats> {
        self.handle.as_ref().map(SyncHandle::stats)
    }

    /// Asks the propagation loops to stop.
    pub fn shutdown(&self) {
        if let Some(handle) = &self.handle {
            handle.shutdown();
        }
    }

    /// Waits for propagation to end, then closes both stores.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Panicked`] if a propagation loop panicked.
    pub fn wait(self) -> SyncResult<LaunchOutcome> {
        let propagation = match self.handle {
            Some(handle) => Some(handle.join()),
            None => None,
        };
        close_quietly(self.remote.as_ref());
        close_quietly(self.local.as_ref());

        Ok(LaunchOutcome {
            mode: self.mode,
            reconcile: self.reconcile,
            propagation: propagation.transpose()?,
        })
    }
}

/// Connects, reconciles and, in [`RunMode::Sync`], starts propagation.
///
/// # Errors
///
/// Returns [`SyncError::Config`] for an invalid configuration and
/// [`SyncError::Startup`] naming the failed stage otherwise.
pub fn start(config: &SyncConfig, connector: &dyn StoreConnector) -> SyncResult<Session> {
    config.validate()?;

    tracing::info!(
        endpoint = %config.remote_endpoint,
        prefix = %config.key_prefix,
        "connecting to remote store"
    );
    let remote = connector
        .connect_remote(&config.remote_endpoint, &config.key_prefix, &config.store)
        .map_err(|err| SyncError::startup(StartupStage::Connect, err))?;

    tracing::info!(root = %config.local_root.display(), "opening local store");
    let local = match connector.open_local(&config.local_root, &config.store) {
        Ok(local) => local,
        Err(err) => {
            close_quietly(remote.as_ref());
            return Err(SyncError::startup(StartupStage::WatchSetup, err));
        }
    };

    match reconcile_and_follow(config, &local, &remote) {
        Ok((reconcile, handle)) => Ok(Session {
            mode: config.mode,
            local,
            remote,
            reconcile,
            handle,
        }),
        Err(err) => {
            close_quietly(remote.as_ref());
            close_quietly(local.as_ref());
            Err(err)
        }
    }
}

/// Runs a whole session: [`start`], then [`Session::wait`].
///
/// In [`RunMode::Sync`] this blocks for as long as the stores stay open.
///
/// # Errors
///
/// Returns the errors of [`start`] and [`Session::wait`].
pub fn launch(config: &SyncConfig, connector: &dyn StoreConnector) -> SyncResult<LaunchOutcome> {
    start(config, connector)?.wait()
}

fn reconcile_and_follow(
    config: &SyncConfig,
    local: &Arc<dyn ConfStore>,
    remote: &Arc<dyn ConfStore>,
) -> SyncResult<(ReconcileReport, Option<SyncHandle>)> {
    let reconciler = Reconciler::new(Arc::clone(local), Arc::clone(remote));

    let mut report = reconciler
        .pull_from_remote()
        .map_err(|err| SyncError::startup(StartupStage::Enumerate, err))?;
    tracing::info!(
        written = report.written,
        failed = report.failures.len(),
        "remote config pulled and applied"
    );

    if config.mode == RunMode::PullOnly {
        return Ok((report, None));
    }

    let pushed = reconciler
        .push_local_only()
        .map_err(|err| SyncError::startup(StartupStage::Enumerate, err))?;
    tracing::info!(
        written = pushed.written,
        skipped = pushed.skipped,
        failed = pushed.failures.len(),
        "missing local config added to remote store"
    );
    report.merge(pushed);

    let handle = Syncer::new(Arc::clone(local), Arc::clone(remote))
        .with_poll_interval(config.poll_interval)
        .spawn()
        .map_err(|err| SyncError::startup(StartupStage::WatchSetup, err))?;
    Ok((report, Some(handle)))
}

fn close_quietly(store: &dyn ConfStore) {
    if let Err(err) = store.close() {
        tracing::error!(store = %store.describe(), error = %err, "failed to close store");
    }
}
