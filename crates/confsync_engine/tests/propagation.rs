//! Integration tests for bidirectional propagation.

use confsync_core::{ConfEvent, ConfStore, Offer, StoreOptions};
use confsync_engine::{Side, SyncError, SyncHandle, Syncer};
use confsync_store::{DirStore, MemoryStore, Namespace};
use confsync_testkit::prelude::*;
use proptest::prelude::*;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const TIMEOUT: Duration = Duration::from_secs(5);
const POLL: Duration = Duration::from_millis(20);
const SETTLE: Duration = Duration::from_millis(100);

fn spawn(local: &Arc<ScriptedStore>, remote: &Arc<ScriptedStore>) -> SyncHandle {
    Syncer::new(local.clone(), remote.clone())
        .with_poll_interval(POLL)
        .spawn()
        .unwrap()
}

fn echoing_pair() -> (Arc<ScriptedStore>, Arc<ScriptedStore>) {
    let local = ScriptedStore::new("local").shared();
    let remote = ScriptedStore::new("remote").shared();
    local.set_echo(true);
    remote.set_echo(true);
    (local, remote)
}

#[test]
fn changes_flow_both_ways_without_echo() {
    init_tracing();
    let (local, remote) = echoing_pair();
    let handle = spawn(&local, &remote);

    remote.inject(ConfEvent::put("app/main.toml", "port = 80"));
    local.inject(ConfEvent::put("local.env", "DEBUG=1"));

    assert!(local.wait_for_writes(1, TIMEOUT));
    assert!(remote.wait_for_writes(1, TIMEOUT));
    thread::sleep(SETTLE);

    assert_eq!(local.writes(), vec![Call::Put("app/main.toml".into(), b"port = 80".to_vec())]);
    assert_eq!(remote.writes(), vec![Call::Put("local.env".into(), b"DEBUG=1".to_vec())]);
    assert_eq!(local.snapshot(), remote.snapshot());

    handle.shutdown();
    let stats = handle.join().unwrap();
    assert_eq!(stats.local_to_remote.forwarded, 1);
    assert_eq!(stats.remote_to_local.forwarded, 1);
}

#[test]
fn suppression_is_registered_before_write() {
    let (local, remote) = echoing_pair();
    let handle = spawn(&local, &remote);

    remote.inject(ConfEvent::delete("gone"));
    assert!(local.wait_for_writes(1, TIMEOUT));

    assert_eq!(
        local.calls(),
        vec![Call::SuppressNext("gone".into()), Call::Delete("gone".into())]
    );
    assert_eq!(local.pending_suppressions("gone"), 0);

    handle.shutdown();
    handle.join().unwrap();
}

#[test]
fn events_are_applied_in_order() {
    let (local, remote) = echoing_pair();
    let handle = spawn(&local, &remote);

    remote.inject(ConfEvent::put("k1", "v1"));
    remote.inject(ConfEvent::delete("k1"));
    remote.inject(ConfEvent::put("k1", "v2"));

    assert!(local.wait_for_writes(3, TIMEOUT));
    assert_eq!(
        local.writes(),
        vec![
            Call::Put("k1".into(), b"v1".to_vec()),
            Call::Delete("k1".into()),
            Call::Put("k1".into(), b"v2".to_vec()),
        ]
    );
    assert_eq!(local.get("k1"), Some(b"v2".to_vec()));

    handle.shutdown();
    handle.join().unwrap();
}

#[test]
fn failed_write_does_not_stop_propagation() {
    init_tracing();
    let (local, remote) = echoing_pair();
    local.fail_key("locked");
    let handle = spawn(&local, &remote);

    remote.inject(ConfEvent::put("locked", "x"));
    remote.inject(ConfEvent::put("open", "y"));
    local.inject(ConfEvent::put("up", "z"));

    assert!(local.wait_for_writes(2, TIMEOUT));
    assert!(remote.wait_for_writes(1, TIMEOUT));
    assert_eq!(local.get("locked"), None);
    assert_eq!(local.get("open"), Some(b"y".to_vec()));
    assert_eq!(remote.get("up"), Some(b"z".to_vec()));

    handle.shutdown();
    let stats = handle.join().unwrap();
    assert_eq!(stats.remote_to_local.failed, 1);
    assert_eq!(stats.remote_to_local.forwarded, 1);
    assert_eq!(stats.local_to_remote.forwarded, 1);
}

#[test]
fn malformed_events_are_dropped() {
    init_tracing();
    let (local, remote) = echoing_pair();
    let handle = spawn(&local, &remote);

    assert_eq!(remote.inject_raw(ConfEvent::put("../escape", "x")), Offer::Forwarded);
    assert_eq!(remote.inject_raw(ConfEvent::delete("")), Offer::Forwarded);
    remote.inject(ConfEvent::put("fine", "ok"));

    assert!(local.wait_for_writes(1, TIMEOUT));
    thread::sleep(SETTLE);
    assert_eq!(local.writes(), vec![Call::Put("fine".into(), b"ok".to_vec())]);

    handle.shutdown();
    let stats = handle.join().unwrap();
    assert_eq!(stats.remote_to_local.anomalies, 2);
    assert_eq!(stats.remote_to_local.forwarded, 1);
}

#[test]
fn shutdown_stops_idle_loops() {
    let (local, remote) = echoing_pair();
    let handle = spawn(&local, &remote);

    assert!(!handle.is_finished());
    handle.shutdown();
    assert!(wait_until(TIMEOUT, || handle.is_finished()));
    assert_eq!(handle.join().unwrap(), Default::default());
}

#[test]
fn run_returns_when_streams_end() {
    let local = ScriptedStore::new("local").shared();
    let remote = ScriptedStore::new("remote").shared();
    remote.inject(ConfEvent::put("a", "1"));
    local.end_stream();
    remote.end_stream();

    let stats = Syncer::new(local.clone(), remote.clone())
        .with_poll_interval(POLL)
        .run()
        .unwrap();

    assert_eq!(stats.remote_to_local.forwarded, 1);
    assert_eq!(local.get("a"), Some(b"1".to_vec()));
}

#[test]
fn taken_stream_fails_spawn() {
    let local = ScriptedStore::new("local").shared();
    let remote = ScriptedStore::new("remote").shared();
    let _stolen = remote.stream().unwrap();

    let err = Syncer::new(local.clone(), remote.clone()).spawn().err().unwrap();
    assert!(matches!(err, SyncError::Stream { side: Side::Remote, .. }));
}

#[test]
fn closing_a_store_ends_its_direction() {
    let (local, remote) = echoing_pair();
    let handle = spawn(&local, &remote);

    local.close().unwrap();
    remote.close().unwrap();

    assert!(wait_until(TIMEOUT, || handle.is_finished()));
    handle.join().unwrap();
}

#[test]
fn namespace_and_directory_stores_do_not_echo() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let namespace = Namespace::new();
    let options = StoreOptions::default();
    let local = Arc::new(DirStore::open(dir.path(), &options).unwrap());
    let remote = Arc::new(MemoryStore::open(&namespace, "/conf", &options).unwrap());
    let watcher = local.watcher();

    let handle = Syncer::new(local.clone(), remote.clone())
        .with_poll_interval(POLL)
        .spawn()
        .unwrap();

    // Remote change lands in the directory; its watcher report is an echo.
    namespace.put("/conf/app/main.toml", b"port = 80").unwrap();
    let path = local.root().join("app").join("main.toml");
    assert!(wait_until(TIMEOUT, || std::fs::read(&path).ok().as_deref() == Some(&b"port = 80"[..])));
    assert!(watcher.changed(&path));
    assert!(wait_until(TIMEOUT, || local.pending_suppressions("app/main.toml") == 0));

    // Local change lands in the namespace; its watch notification is an echo.
    let own = local.root().join("local.env");
    std::fs::write(&own, b"DEBUG=1").unwrap();
    assert!(watcher.created(&own));
    assert!(wait_until(TIMEOUT, || namespace.get("/conf/local.env").is_some()));
    assert!(wait_until(TIMEOUT, || remote.pending_suppressions("local.env") == 0));

    // Remote delete removes the file; the removal report is an echo.
    namespace.delete("/conf/app/main.toml").unwrap();
    assert!(wait_until(TIMEOUT, || !path.exists()));
    assert!(watcher.removed(&path));
    assert!(wait_until(TIMEOUT, || local.pending_suppressions("app/main.toml") == 0));

    thread::sleep(SETTLE);
    handle.shutdown();
    let stats = handle.join().unwrap();
    assert_eq!(stats.remote_to_local.forwarded, 2);
    assert_eq!(stats.local_to_remote.forwarded, 1);
    assert_eq!(namespace.get("/conf/local.env"), Some(b"DEBUG=1".to_vec()));
    assert_eq!(namespace.get("/conf/app/main.toml"), None);

    remote.close().unwrap();
    local.close().unwrap();
}

fn kv_remote_with_scripted_local() -> (Namespace, Arc<MemoryStore>, Arc<ScriptedStore>, SyncHandle) {
    let namespace = Namespace::new();
    let remote = Arc::new(MemoryStore::open(&namespace, "/conf", &StoreOptions::default()).unwrap());
    let local = ScriptedStore::new("local").shared();
    local.set_echo(true);
    let handle = Syncer::new(local.clone(), remote.clone())
        .with_poll_interval(POLL)
        .spawn()
        .unwrap();
    (namespace, remote, local, handle)
}

#[test]
fn noop_delete_does_not_hide_next_remote_change() {
    init_tracing();
    let (namespace, remote, local, handle) = kv_remote_with_scripted_local();

    // The remote never had "k": the propagated delete raises no notification.
    local.inject(ConfEvent::delete("k"));
    assert!(wait_until(TIMEOUT, || handle.stats().local_to_remote.forwarded == 1));
    assert_eq!(remote.pending_suppressions("k"), 0);

    namespace.put("/conf/k", b"genuine").unwrap();
    assert!(wait_until(TIMEOUT, || local.get("k").as_deref() == Some(&b"genuine"[..])));

    handle.shutdown();
    handle.join().unwrap();
    remote.close().unwrap();
}

#[test]
fn failed_write_does_not_hide_next_remote_change() {
    init_tracing();
    let (namespace, remote, local, handle) = kv_remote_with_scripted_local();

    namespace.fail_writes(true);
    local.inject(ConfEvent::put("k", "v"));
    assert!(wait_until(TIMEOUT, || handle.stats().local_to_remote.failed == 1));
    namespace.fail_writes(false);
    assert_eq!(remote.pending_suppressions("k"), 0);

    namespace.put("/conf/k", b"genuine").unwrap();
    assert!(wait_until(TIMEOUT, || local.get("k").as_deref() == Some(&b"genuine"[..])));

    handle.shutdown();
    let stats = handle.join().unwrap();
    assert_eq!(stats.remote_to_local.forwarded, 1);
    remote.close().unwrap();
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn remote_event_sequence_is_replayed_locally(events in prop::collection::vec(event_strategy(), 1..20)) {
        let (local, remote) = echoing_pair();
        let handle = spawn(&local, &remote);

        for event in &events {
            remote.inject(event.clone());
        }
        prop_assert!(local.wait_for_writes(events.len(), TIMEOUT));
        thread::sleep(Duration::from_millis(30));

        handle.shutdown();
        let stats = handle.join().unwrap();
        prop_assert_eq!(local.snapshot(), remote.snapshot());
        prop_assert!(remote.writes().is_empty());
        prop_assert_eq!(stats.remote_to_local.forwarded, events.len() as u64);
    }
}
