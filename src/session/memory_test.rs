use super::*;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};

fn recorder() -> (StateCallback, Arc<Mutex<Vec<StateEvent>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let callback: StateCallback = Arc::new(move |event: StateEvent| sink.lock().expect("recorder lock").push(event));
    (callback, seen)
}

fn sample() -> Arc<MemorySession> {
    MemorySession::with_state(
        "GL",
        1001,
        json!({
            "user": {"status": {"level": 12, "name": "Doctor"}},
            "recruit": {"normal": {"slots": [{"tags": [1, 2]}, {"tags": [3]}]}}
        }),
    )
}

// =============================================================================
// READ
// =============================================================================

#[test]
fn read_resolves_object_and_array_paths() {
    let session = sample();
    assert_eq!(session.id(), "GL_1001");
    assert_eq!(session.read("user.status.level").expect("read"), json!(12));
    assert_eq!(session.read("recruit.normal.slots.1.tags").expect("read"), json!([3]));
    assert_eq!(session.read("").expect("read root")["user"]["status"]["name"], json!("Doctor"));
}

#[test]
fn read_missing_path_is_not_found() {
    let session = sample();
    let err = session.read("user.nope").expect_err("missing path");
    assert_eq!(err, SessionError::PathNotFound("user.nope".into()));
    assert_eq!(err.to_string(), "path 'user.nope' not found");
    assert!(session.read("recruit.normal.slots.9").is_err());
}

// =============================================================================
// WRITE + STATE SUBSCRIPTIONS
// =============================================================================

#[test]
fn set_creates_intermediate_objects() {
    let session = MemorySession::new("GL", 1);
    session.set("a.b.c", json!(true)).expect("set");
    assert_eq!(session.read("a").expect("read"), json!({"b": {"c": true}}));
}

#[test]
fn set_below_scalar_fails() {
    let session = sample();
    let err = session.set("user.status.level.x", json!(1)).expect_err("scalar");
    assert!(matches!(err, SessionError::Other(_)));
}

#[test]
fn state_subscriber_sees_writes_at_and_below_its_path() {
    let session = sample();
    let (callback, seen) = recorder();
    let _sub = session.subscribe_state("user.status", false, callback).expect("subscribe");

    session.set("user.status.level", json!(13)).expect("set");
    session.set("recruit.normal", json!({})).expect("unrelated set");
    session.set("user", json!({"status": {"level": 1}})).expect("ancestor set");

    let seen = seen.lock().expect("lock");
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0].path, "user.status");
    assert_eq!(seen[0].payload, Some(json!({"level": 13, "name": "Doctor"})));
    assert_eq!(seen[1].payload, Some(json!({"level": 1})));
}

#[test]
fn event_only_subscriber_gets_no_payload() {
    let session = sample();
    let (callback, seen) = recorder();
    let _sub = session.subscribe_state("user.status.level", true, callback).expect("subscribe");
    session.set("user.status.level", json!(99)).expect("set");

    let seen = seen.lock().expect("lock");
    assert_eq!(seen.as_slice(), &[StateEvent { path: "user.status.level".into(), payload: None }]);
}

#[test]
fn cancelled_subscription_stops_events_and_cancel_is_idempotent() {
    let session = sample();
    let (callback, seen) = recorder();
    let mut sub = session.subscribe_state("user", false, callback).expect("subscribe");
    assert_eq!(session.subscription_count(), 1);

    sub.cancel();
    sub.cancel();
    assert_eq!(session.subscription_count(), 0);

    session.set("user.status.level", json!(1)).expect("set");
    assert!(seen.lock().expect("lock").is_empty());
}

// =============================================================================
// PACKETS
// =============================================================================

#[test]
fn inject_packet_threads_bytes_through_matching_subscribers() {
    let session = sample();
    let hits = Arc::new(AtomicUsize::new(0));

    let counter = hits.clone();
    let _a = session
        .subscribe_packet(
            "S/gacha/refreshTags",
            Arc::new(move |dir: Direction, bytes: Vec<u8>| {
                assert_eq!(dir, Direction::ToClient);
                counter.fetch_add(1, Ordering::SeqCst);
                bytes
            }),
        )
        .expect("subscribe");
    let _b = session
        .subscribe_packet(
            "S/gacha/refreshTags",
            Arc::new(|_: Direction, mut bytes: Vec<u8>| {
                bytes.push(b'!');
                bytes
            }),
        )
        .expect("subscribe");
    let _other = session
        .subscribe_packet("S/other", Arc::new(|_: Direction, _: Vec<u8>| b"wrong".to_vec()))
        .expect("subscribe");

    let out = session.inject_packet(Direction::ToClient, "S/gacha/refreshTags", b"{}".to_vec());
    assert_eq!(out, b"{}!".to_vec());
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

// =============================================================================
// SHUTDOWN
// =============================================================================

#[test]
fn shutdown_fires_callbacks_once_and_closes_session() {
    let session = sample();
    let fired = Arc::new(AtomicUsize::new(0));
    let counter = fired.clone();
    session.on_shutdown(Box::new(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    }));
    let (callback, _) = recorder();
    let _sub = session.subscribe_state("user", false, callback).expect("subscribe");

    session.shutdown();
    session.shutdown();

    assert_eq!(fired.load(Ordering::SeqCst), 1);
    assert_eq!(session.subscription_count(), 0);
    assert_eq!(session.read("user"), Err(SessionError::Closed));
    assert!(session.subscribe_packet("x", Arc::new(|_: Direction, b: Vec<u8>| b)).is_err());
}

#[test]
fn on_shutdown_after_close_fires_immediately() {
    let session = sample();
    session.shutdown();
    let fired = Arc::new(AtomicUsize::new(0));
    let counter = fired.clone();
    session.on_shutdown(Box::new(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    }));
    assert_eq!(fired.load(Ordering::SeqCst), 1);
}

#[test]
fn affects_matches_ancestors_and_descendants() {
    assert!(affects("a.b", "a.b"));
    assert!(affects("a", "a.b.c"));
    assert!(affects("a.b.c", "a"));
    assert!(affects("", "x"));
    assert!(!affects("a.b", "a.c"));
    assert!(!affects("ab", "a"));
}
