//! Items, events and key rules.

use crate::error::{StoreError, StoreResult};

/// Separator between key segments.
pub const KEY_SEPARATOR: char = '/';

/// A configuration entry as returned by enumeration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfItem {
    /// Store-relative key.
    pub key: String,
    /// Raw content.
    pub content: Vec<u8>,
}

impl ConfItem {
    /// Creates a new item.
    pub fn new(key: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            content: content.into(),
        }
    }
}

/// The change carried by a [`ConfEvent`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfOp {
    /// The key was created or rewritten with this content.
    Put(Vec<u8>),
    /// The key was removed.
    Delete,
}

/// A single change observed on a store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfEvent {
    /// Store-relative key.
    pub key: String,
    /// What happened to the key.
    pub op: ConfOp,
}

impl ConfEvent {
    /// Creates a put event.
    pub fn put(key: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            op: ConfOp::Put(content.into()),
        }
    }

    /// Creates a delete event.
    pub fn delete(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            op: ConfOp::Delete,
        }
    }

    /// Returns the content of a put event.
    pub fn content(&self) -> Option<&[u8]> {
        match &self.op {
            ConfOp::Put(content) => Some(content),
            ConfOp::Delete => None,
        }
    }

    /// Short name of the operation, for log lines.
    pub fn kind(&self) -> &'static str {
        match self.op {
            ConfOp::Put(_) => "put",
            ConfOp::Delete => "delete",
        }
    }
}

/// Checks that `key` is a relative, normalized key.
///
/// # Errors
///
/// Returns [`StoreError::InvalidKey`] if the key:
/// - is empty
/// - starts with a separator
/// - has an empty, `.` or `..` segment
/// - contains a NUL byte or a backslash
pub fn validate_key(key: &str) -> StoreResult<()> {
    if key.is_empty() {
        return Err(StoreError::invalid_key(key, "empty key"));
    }
    if key.starts_with(KEY_SEPARATOR) {
        return Err(StoreError::invalid_key(key, "leading separator"));
    }
    if key.contains('\0') || key.contains('\\') {
        return Err(StoreError::invalid_key(key, "forbidden character"));
    }
    for segment in key.split(KEY_SEPARATOR) {
        match segment {
            "" => return Err(StoreError::invalid_key(key, "empty segment")),
            "." | ".." => return Err(StoreError::invalid_key(key, "relative segment")),
            _ => {}
        }
    }
    Ok(())
}

/// Builds the namespace key for `key` under `prefix`.
pub fn join_key(prefix: &str, key: &str) -> String {
    let base = prefix.trim_end_matches(KEY_SEPARATOR);
    format!("{base}{KEY_SEPARATOR}{key}")
}

/// Returns the part of `full` below `prefix`.
///
/// The match must end on a segment boundary, so `/conf` does not own
/// `/config/x`. The prefix key itself has no relative key and yields `None`.
pub fn strip_prefix<'a>(prefix: &str, full: &'a str) -> Option<&'a str> {
    let base = prefix.trim_end_matches(KEY_SEPARATOR);
    let rest = if base.is_empty() {
        full.trim_start_matches(KEY_SEPARATOR)
    } else {
        full.strip_prefix(base)?.strip_prefix(KEY_SEPARATOR)?
    };
    (!rest.is_empty()).then_some(rest)
}
