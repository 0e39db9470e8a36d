//! # confsync stores
//!
//! Store backends for confsync.
//!
//! Both backends implement [`confsync_core::ConfStore`] and route every watch
//! notification through the shared event feed, so echo suppression behaves
//! the same on either side of a sync.
//!
//! ## Available Backends
//!
//! - [`MemoryStore`] - A key prefix of a shared [`Namespace`], shaped like a
//!   distributed key-value store with prefix watches
//! - [`DirStore`] - A directory tree; change notifications are reported by an
//!   external watcher through a [`DirWatcher`] handle
//!
//! ## Example
//!
//! ```rust
//! use confsync_core::{ConfStore, StoreOptions};
//! use confsync_store::{MemoryStore, Namespace};
//!
//! let namespace = Namespace::new();
//! let store = MemoryStore::open(&namespace, "/conf", &StoreOptions::default()).unwrap();
//!
//! store.put("app/settings.toml", b"debug = true").unwrap();
//! assert_eq!(namespace.get("/conf/app/settings.toml"), Some(b"debug = true".to_vec()));
//! store.close().unwrap();
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod dir;
mod memory;
mod namespace;

pub use dir::{DirStore, DirWatcher};
pub use memory::MemoryStore;
pub use namespace::{Namespace, NamespaceChange};
