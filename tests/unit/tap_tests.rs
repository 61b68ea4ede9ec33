//! Unit tests for the debug tap.

use acp_conduit::tap::{extract_method, Tap, TapDirection};
use bytes::Bytes;

#[test]
fn disabled_tap_records_nothing() {
    let tap = Tap::new();
    // No subscribers, no stream: recording must be a silent no-op.
    tap.record(TapDirection::Outbound, &Bytes::from_static(b"{}"));
}

#[test]
fn enabled_tap_delivers_records() {
    let tap = Tap::new();
    let mut rx = tap.enable();
    tap.record(
        TapDirection::Inbound,
        &Bytes::from_static(br#"{"jsonrpc":"2.0","method":"session/update","params":{}}"#),
    );

    let record = rx.try_recv().expect("record must be delivered");
    assert_eq!(record.direction, TapDirection::Inbound);
    assert_eq!(record.method.as_deref(), Some("session/update"));
}

#[test]
fn enable_is_idempotent_while_enabled() {
    let tap = Tap::new();
    let mut first = tap.enable();
    let mut second = tap.enable();
    tap.record(TapDirection::Outbound, &Bytes::from_static(b"{\"id\":1,\"result\":{}}"));

    assert!(first.try_recv().is_ok(), "first subscriber must see the record");
    assert!(second.try_recv().is_ok(), "second subscriber must see the record");
}

#[test]
fn disable_finishes_the_stream() {
    let tap = Tap::new();
    let mut rx = tap.enable();
    tap.disable();
    assert!(
        matches!(rx.try_recv(), Err(tokio::sync::broadcast::error::TryRecvError::Closed)),
        "stream must be finished after disable"
    );
}

#[test]
fn re_enable_creates_a_fresh_stream() {
    let tap = Tap::new();
    let _old = tap.enable();
    tap.disable();
    let mut fresh = tap.enable();
    tap.record(TapDirection::Inbound, &Bytes::from_static(b"{\"id\":2,\"result\":{}}"));
    assert!(fresh.try_recv().is_ok(), "fresh stream must carry new records");
}

// ── Method extraction ────────────────────────────────────────────────────────

#[test]
fn responses_have_no_method() {
    assert_eq!(extract_method(br#"{"jsonrpc":"2.0","id":1,"result":{}}"#), None);
}

#[test]
fn method_after_other_members_is_found() {
    let raw = br#"{"jsonrpc":"2.0","id":4,"params":{"method":"inner"},"method":"terminal/create"}"#;
    assert_eq!(extract_method(raw), Some("terminal/create".to_owned()));
}

#[test]
fn non_object_frames_have_no_method() {
    assert_eq!(extract_method(b"[1,2,3]"), None);
    assert_eq!(extract_method(b"  "), None);
}
