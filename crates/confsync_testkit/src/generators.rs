//! Property-based test generators using proptest.
//!
//! Every generated key passes [`confsync_core::validate_key`].

use confsync_core::ConfEvent;
use proptest::prelude::*;
use std::collections::BTreeMap;

/// Strategy for a single key segment.
pub fn segment_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z0-9_-][a-z0-9_.-]{0,11}")
        .expect("Invalid regex")
        .prop_filter("Segment must not be a dot segment", |s| s != "." && s != "..")
}

/// Strategy for a relative key of one to three segments.
pub fn key_strategy() -> impl Strategy<Value = String> {
    prop::collection::vec(segment_strategy(), 1..=3).prop_map(|segments| segments.join("/"))
}

/// Strategy for item content.
pub fn content_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..256)
}

/// Strategy for a set of items keyed by flat keys.
///
/// Keys are single segments so that no key is a directory of another.
pub fn item_map_strategy(max: usize) -> impl Strategy<Value = BTreeMap<String, Vec<u8>>> {
    prop::collection::btree_map(segment_strategy(), content_strategy(), 0..=max)
}

/// Strategy for a change event over a small key space.
pub fn event_strategy() -> impl Strategy<Value = ConfEvent> {
    let key = prop::sample::select(vec!["a", "b", "c/d"]);
    prop_oneof![
        (key.clone(), content_strategy()).prop_map(|(k, v)| ConfEvent::put(k, v)),
        key.prop_map(ConfEvent::delete),
    ]
}
