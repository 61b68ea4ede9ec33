//! Unit tests for envelope classification and round-trip encoding.

use acp_conduit::framing::envelope::{
    Envelope, ErrorObject, IdPolicy, RequestId, ResponseOutcome, CODE_INTERNAL_ERROR,
    CODE_METHOD_NOT_FOUND,
};
use serde_json::json;

// ── Classification table ─────────────────────────────────────────────────────

#[test]
fn method_with_string_id_is_a_request() {
    let value = json!({"jsonrpc":"2.0","id":"req-1","method":"session/prompt","params":{"x":1}});
    let envelope = Envelope::classify(&value, IdPolicy::Lenient).expect("must classify");
    match envelope {
        Envelope::Request { id, method, params } => {
            assert_eq!(id, RequestId::Str("req-1".into()));
            assert_eq!(method, "session/prompt");
            assert_eq!(params, Some(json!({"x":1})));
        }
        other => panic!("expected request, got {other:?}"),
    }
}

#[test]
fn method_without_id_is_a_notification() {
    let value = json!({"jsonrpc":"2.0","method":"session/update","params":{"a":true}});
    let envelope = Envelope::classify(&value, IdPolicy::Lenient).expect("must classify");
    assert!(matches!(envelope, Envelope::Notification { .. }));
}

#[test]
fn object_id_is_malformed_and_policy_dependent() {
    let value = json!({"jsonrpc":"2.0","id":{"nested":true},"method":"m"});
    let lenient = Envelope::classify(&value, IdPolicy::Lenient).expect("lenient must classify");
    assert!(matches!(lenient, Envelope::Notification { .. }));
    assert!(Envelope::classify(&value, IdPolicy::Strict).is_err());
}

#[test]
fn id_without_method_is_a_response() {
    let value = json!({"jsonrpc":"2.0","id":5,"result":{"ok":true}});
    let envelope = Envelope::classify(&value, IdPolicy::Lenient).expect("must classify");
    match envelope {
        Envelope::Response { id, outcome } => {
            assert_eq!(id, RequestId::Num(5));
            assert_eq!(outcome, ResponseOutcome::Result(json!({"ok":true})));
        }
        other => panic!("expected response, got {other:?}"),
    }
}

#[test]
fn error_response_carries_the_error_object() {
    let value = json!({
        "jsonrpc":"2.0","id":9,
        "error": {"code": -32000, "message": "boom", "data": {"detail": 1}}
    });
    let envelope = Envelope::classify(&value, IdPolicy::Lenient).expect("must classify");
    match envelope {
        Envelope::Response {
            outcome: ResponseOutcome::Error(error),
            ..
        } => {
            assert_eq!(error.code, -32000);
            assert_eq!(error.message, "boom");
            assert_eq!(error.data, Some(json!({"detail": 1})));
        }
        other => panic!("expected error response, got {other:?}"),
    }
}

#[test]
fn response_with_neither_result_nor_error_is_rejected() {
    let value = json!({"jsonrpc":"2.0","id":1});
    assert!(Envelope::classify(&value, IdPolicy::Lenient).is_err());
}

#[test]
fn frame_with_neither_method_nor_id_is_rejected() {
    let value = json!({"jsonrpc":"2.0","params":{}});
    assert!(Envelope::classify(&value, IdPolicy::Lenient).is_err());
}

// ── Round-trip ───────────────────────────────────────────────────────────────

fn roundtrip(envelope: &Envelope) -> Envelope {
    let value = envelope.to_value();
    Envelope::classify(&value, IdPolicy::Lenient).expect("encoded envelope must classify")
}

#[test]
fn request_roundtrips() {
    let envelope = Envelope::Request {
        id: RequestId::Num(3),
        method: "fs/read_text_file".into(),
        params: Some(json!({"path": "/a", "sessionId": "s"})),
    };
    assert_eq!(roundtrip(&envelope), envelope);
}

#[test]
fn result_response_roundtrips() {
    let envelope = Envelope::Response {
        id: RequestId::Str("abc".into()),
        outcome: ResponseOutcome::Result(json!({"content": "hi"})),
    };
    assert_eq!(roundtrip(&envelope), envelope);
}

#[test]
fn error_response_roundtrips() {
    let envelope = Envelope::Response {
        id: RequestId::Num(-2),
        outcome: ResponseOutcome::Error(ErrorObject {
            code: -32000,
            message: "nope".into(),
            data: Some(json!([1, 2])),
        }),
    };
    assert_eq!(roundtrip(&envelope), envelope);
}

#[test]
fn notification_roundtrips() {
    let envelope = Envelope::Notification {
        method: "session/cancel".into(),
        params: None,
    };
    assert_eq!(roundtrip(&envelope), envelope);
}

// ── Error constructors ───────────────────────────────────────────────────────

#[test]
fn error_constructors_use_standard_codes() {
    assert_eq!(ErrorObject::method_not_found("x").code, CODE_METHOD_NOT_FOUND);
    assert_eq!(ErrorObject::internal("x").code, CODE_INTERNAL_ERROR);
}
