//! Startup reconciliation.
//!
//! Runs once, before propagation starts:
//! 1. Pull: every remote item is written into the local store
//! 2. Push: every local item whose key the remote lacks is written remotely
//!
//! Keys present on both sides are settled by the pull, so the remote value
//! wins. Nothing here is a merge: content is never compared.

use crate::error::{Side, SyncError, SyncResult};
use confsync_core::ConfStore;
use std::collections::HashSet;
use std::sync::Arc;

/// A single item that could not be written during reconciliation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemFailure {
    /// Store the write was aimed at.
    pub target: Side,
    /// Key of the item.
    pub key: String,
    /// Error message.
    pub error: String,
}

/// Outcome of one or more reconciliation passes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Items written.
    pub written: u64,
    /// Local items not pushed because the remote already has the key.
    pub skipped: u64,
    /// Items whose write failed.
    pub failures: Vec<ItemFailure>,
}

impl ReconcileReport {
    /// Returns true if every write succeeded.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    /// Adds the counts and failures of `other`.
    pub fn merge(&mut self, other: ReconcileReport) {
        self.written += other.written;
        self.skipped += other.skipped;
        self.failures.extend(other.failures);
    }
}

/// One-shot startup convergence of a local and a remote store.
pub struct Reconciler {
    local: Arc<dyn ConfStore>,
    remote: Arc<dyn ConfStore>,
}

impl Reconciler {
    /// Creates a reconciler over the two stores.
    pub fn new(local: Arc<dyn ConfStore>, remote: Arc<dyn ConfStore>) -> Self {
        Self { local, remote }
    }

    /// Writes every remote item into the local store.
    ///
    /// Writes are plain puts without echo suppression. A failed write is
    /// recorded in the report and the pass goes on.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Enumerate`] if the remote store cannot be listed.
    pub fn pull_from_remote(&self) -> SyncResult<ReconcileReport> {
        let items = self.remote.enumerate().map_err(|source| SyncError::Enumerate {
            side: Side::Remote,
            source,
        })?;

        let mut report = ReconcileReport::default();
        for item in items {
            tracing::debug!(key = %item.key, "pulling item from remote store");
            match self.local.put(&item.key, &item.content) {
                Ok(()) => report.written += 1,
                Err(err) => {
                    tracing::warn!(key = %item.key, error = %err, "failed to pull item");
                    report.failures.push(ItemFailure {
                        target: Side::Local,
                        key: item.key,
                        error: err.to_string(),
                    });
                }
            }
        }
        Ok(report)
    }

    /// Writes every local item whose key is missing remotely.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Enumerate`] if either store cannot be listed.
    pub fn push_local_only(&self) -> SyncResult<ReconcileReport> {
        let remote = self.remote.enumerate().map_err(|source| SyncError::Enumerate {
            side: Side::Remote,
            source,
        })?;
        let local = self.local.enumerate().map_err(|source| SyncError::Enumerate {
            side: Side::Local,
            source,
        })?;

        let remote_keys: HashSet<String> = remote.into_iter().map(|item| item.key).collect();

        let mut report = ReconcileReport::default();
        for item in local {
            if remote_keys.contains(&item.key) {
                report.skipped += 1;
                continue;
            }
            tracing::debug!(key = %item.key, "pushing missing item to remote store");
            match self.remote.put(&item.key, &item.content) {
                Ok(()) => report.written += 1,
                Err(err) => {
                    tracing::warn!(key = %item.key, error = %err, "failed to push item");
                    report.failures.push(ItemFailure {
                        target: Side::Remote,
                        key: item.key,
                        error: err.to_string(),
                    });
                }
            }
        }
        Ok(report)
    }

    /// Pulls, then pushes local-only items.
    ///
    /// # Errors
    ///
    /// Returns the first enumeration error; the push does not run if the
    /// pull could not enumerate.
    pub fn reconcile(&self) -> SyncResult<ReconcileReport> {
        let mut report = self.pull_from_remote()?;
        tracing::info!(written = report.written, failed = report.failures.len(), "remote config pulled");

        let pushed = self.push_local_only()?;
        tracing::info!(
            written = pushed.written,
            skipped = pushed.skipped,
            failed = pushed.failures.len(),
            "local-only config pushed"
        );
        report.merge(pushed);
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_merge() {
        let mut report = ReconcileReport {
            written: 2,
            skipped: 0,
            failures: vec![],
        };
        report.merge(ReconcileReport {
            written: 1,
            skipped: 3,
            failures: vec![ItemFailure {
                target: Side::Remote,
                key: "a".into(),
                error: "denied".into(),
            }],
        });

        assert_eq!(report.written, 3);
        assert_eq!(report.skipped, 3);
        assert!(!report.is_clean());
    }

    #[test]
    fn empty_report_is_clean() {
        assert!(ReconcileReport::default().is_clean());
    }
}
