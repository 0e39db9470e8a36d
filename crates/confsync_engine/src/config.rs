//! Configuration for a sync session.

use crate::error::{SyncError, SyncResult};
use confsync_core::StoreOptions;
use std::path::PathBuf;
use std::time::Duration;

/// How often a propagation loop checks for shutdown while its stream is idle.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// What a session does after connecting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunMode {
    /// Pull the remote items into the local store, then stop.
    PullOnly,
    /// Reconcile both stores, then propagate changes until shut down.
    #[default]
    Sync,
}

/// Configuration for a sync session.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Remote store endpoint.
    pub remote_endpoint: String,
    /// Key prefix holding the synchronized items on the remote store.
    pub key_prefix: String,
    /// Root directory of the local store.
    pub local_root: PathBuf,
    /// Session mode.
    pub mode: RunMode,
    /// Options passed to both stores.
    pub store: StoreOptions,
    /// Shutdown check interval of the propagation loops.
    pub poll_interval: Duration,
}

impl SyncConfig {
    /// Creates a new configuration.
    pub fn new(
        remote_endpoint: impl Into<String>,
        key_prefix: impl Into<String>,
        local_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            remote_endpoint: remote_endpoint.into(),
            key_prefix: key_prefix.into(),
            local_root: local_root.into(),
            mode: RunMode::default(),
            store: StoreOptions::default(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Sets the session mode.
    pub fn with_mode(mut self, mode: RunMode) -> Self {
        self.mode = mode;
        self
    }

    /// Sets the store options.
    pub fn with_store_options(mut self, store: StoreOptions) -> Self {
        self.store = store;
        self
    }

    /// Sets the shutdown check interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Checks that all mandatory parameters are set.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Config`] naming the first missing parameter.
    pub fn validate(&self) -> SyncResult<()> {
        if self.remote_endpoint.trim().is_empty() {
            return Err(SyncError::Config("remote endpoint is required".into()));
        }
        if self.key_prefix.trim().is_empty() {
            return Err(SyncError::Config("remote key prefix is required".into()));
        }
        if self.local_root.as_os_str().is_empty() {
            return Err(SyncError::Config("local root path is required".into()));
        }
        if self.poll_interval.is_zero() {
            return Err(SyncError::Config("poll interval must be positive".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_builder() {
        let config = SyncConfig::new("http://127.0.0.1:2379", "/conf", "/etc/app")
            .with_mode(RunMode::PullOnly)
            .with_store_options(StoreOptions::new().with_event_queue_capacity(4))
            .with_poll_interval(Duration::from_millis(50));

        assert_eq!(config.remote_endpoint, "http://127.0.0.1:2379");
        assert_eq!(config.key_prefix, "/conf");
        assert_eq!(config.local_root, PathBuf::from("/etc/app"));
        assert_eq!(config.mode, RunMode::PullOnly);
        assert_eq!(config.store.event_queue_capacity, 4);
        assert_eq!(config.poll_interval, Duration::from_millis(50));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn default_mode_is_sync() {
        let config = SyncConfig::new("e", "p", "r");
        assert_eq!(config.mode, RunMode::Sync);
    }

    #[test]
    fn missing_parameters_are_rejected() {
        let cases = [
            (SyncConfig::new("", "/conf", "/etc/app"), "remote endpoint"),
            (SyncConfig::new("http://e", " ", "/etc/app"), "key prefix"),
            (SyncConfig::new("http://e", "/conf", ""), "local root"),
        ];
        for (config, expected) in cases {
            let err = config.validate().unwrap_err();
            assert!(matches!(err, SyncError::Config(_)));
            assert!(err.to_string().contains(expected), "{err}");
        }
    }

    #[test]
    fn zero_poll_interval_is_rejected() {
        let config = SyncConfig::new("e", "p", "r").with_poll_interval(Duration::ZERO);
        assert!(config.validate().is_err());
    }
}
