//! # confsync testkit
//!
//! Test utilities for confsync.
//!
//! This crate provides:
//! - A scripted in-memory store with call recording and failure injection
//! - Temporary directory and namespace fixtures for the real backends
//! - Property-based generators for keys, contents and item sets
//! - Test logging setup
//!
//! ## Usage
//!
//! ```rust,ignore
//! use confsync_testkit::prelude::*;
//!
//! #[test]
//! fn remote_put_reaches_local() {
//!     let local = ScriptedStore::new("local");
//!     let remote = ScriptedStore::new("remote");
//!     // ... run a Syncer over the two stores
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use fixtures::*;
pub use generators::*;
