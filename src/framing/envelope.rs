//! JSON-RPC 2.0 envelope classification and encoding.
//!
//! A decoded frame is classified into one of three envelope variants by the
//! presence and shape of its `id` and `method` members:
//!
//! | Shape                                    | Classification        |
//! |------------------------------------------|-----------------------|
//! | `method` + well-formed `id`              | [`Envelope::Request`] |
//! | `method` + malformed `id` (null, object) | policy-dependent      |
//! | `method`, no `id`                        | [`Envelope::Notification`] |
//! | `id`, no `method`                        | [`Envelope::Response`] |
//! | anything else                            | classification error  |
//!
//! The malformed-id row is the one place ACP peers disagree: some emit
//! `id: null` on fire-and-forget messages. [`IdPolicy::Lenient`] (the
//! default) demotes those frames to notifications so the stream keeps
//! moving; [`IdPolicy::Strict`] drops them as malformed.

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// JSON-RPC protocol version string carried by every frame.
pub const JSONRPC_VERSION: &str = "2.0";

/// JSON-RPC `method not found` error code.
pub const CODE_METHOD_NOT_FOUND: i64 = -32601;

/// JSON-RPC `invalid params` error code.
pub const CODE_INVALID_PARAMS: i64 = -32602;

/// JSON-RPC `internal error` error code.
pub const CODE_INTERNAL_ERROR: i64 = -32603;

// ── Request id ────────────────────────────────────────────────────────────────

/// JSON-RPC request id: a signed integer or a non-empty string.
///
/// Ids are hashable so the pending-request table can key on them. `null` and
/// non-scalar ids never construct a `RequestId`; how such frames classify is
/// governed by [`IdPolicy`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    /// Integer id. The issuing side allocates these monotonically from 1.
    Num(i64),
    /// String id, as issued by peers that prefer opaque tokens.
    Str(String),
}

impl Display for RequestId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Num(n) => write!(f, "{n}"),
            Self::Str(s) => write!(f, "{s}"),
        }
    }
}

impl RequestId {
    /// Parse a JSON value as a request id.
    ///
    /// Returns `None` for `null`, fractional numbers, empty strings, and any
    /// non-scalar value.
    #[must_use]
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_i64().map(Self::Num),
            Value::String(s) if !s.is_empty() => Some(Self::Str(s.clone())),
            _ => None,
        }
    }

    /// Encode this id back to a JSON value.
    #[must_use]
    pub fn to_value(&self) -> Value {
        match self {
            Self::Num(n) => json!(n),
            Self::Str(s) => json!(s),
        }
    }
}

// ── Error object ──────────────────────────────────────────────────────────────

/// JSON-RPC error object: `{code, message, data?}`.
///
/// Peer-defined codes are carried verbatim; the constants above cover the
/// codes this runtime emits itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorObject {
    /// Numeric error code.
    pub code: i64,
    /// Human-readable message.
    pub message: String,
    /// Optional structured payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ErrorObject {
    /// Build a `method not found` error for an unrouted method name.
    #[must_use]
    pub fn method_not_found(method: &str) -> Self {
        Self {
            code: CODE_METHOD_NOT_FOUND,
            message: format!("method not found: {method}"),
            data: None,
        }
    }

    /// Build an `invalid params` error from a deserialization failure.
    #[must_use]
    pub fn invalid_params(detail: impl Into<String>) -> Self {
        Self {
            code: CODE_INVALID_PARAMS,
            message: detail.into(),
            data: None,
        }
    }

    /// Build an `internal error` with the given description.
    #[must_use]
    pub fn internal(detail: impl Into<String>) -> Self {
        Self {
            code: CODE_INTERNAL_ERROR,
            message: detail.into(),
            data: None,
        }
    }
}

// ── Classification policy ─────────────────────────────────────────────────────

/// Policy for frames carrying `method` together with a malformed `id`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdPolicy {
    /// Malformed id is discarded and the frame becomes a notification.
    #[default]
    Lenient,
    /// The frame is rejected as malformed.
    Strict,
}

// ── Envelope ──────────────────────────────────────────────────────────────────

/// Either `result` or `error` on a response envelope, never both.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseOutcome {
    /// Successful result payload (possibly `null`).
    Result(Value),
    /// Error reported by the responder.
    Error(ErrorObject),
}

/// One classified JSON-RPC frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    /// `{id, method, params?}` — expects a response with the same id.
    Request {
        /// Correlation id chosen by the requesting side.
        id: RequestId,
        /// Routed method name.
        method: String,
        /// Opaque parameter tree.
        params: Option<Value>,
    },
    /// `{id, result}` xor `{id, error}`.
    Response {
        /// Correlation id copied from the originating request.
        id: RequestId,
        /// Result or error, exactly one.
        outcome: ResponseOutcome,
    },
    /// `{method, params?}` — fire-and-forget.
    Notification {
        /// Method name.
        method: String,
        /// Opaque parameter tree.
        params: Option<Value>,
    },
}

/// Why a frame failed envelope classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClassifyError {
    /// The top-level value is not a JSON object (arrays reach this point
    /// because the framer accepts them; they are rejected here).
    NotAnObject,
    /// `method` is present but not a string.
    BadMethod,
    /// `method` present with a malformed id under [`IdPolicy::Strict`].
    BadRequestId,
    /// Response carries neither `result` nor `error`, or both.
    BadResponseShape,
    /// Neither `method` nor `id` is present.
    Unclassifiable,
}

impl Display for ClassifyError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotAnObject => write!(f, "frame is not a JSON object"),
            Self::BadMethod => write!(f, "method member is not a string"),
            Self::BadRequestId => write!(f, "request id is malformed"),
            Self::BadResponseShape => {
                write!(f, "response must carry exactly one of result/error")
            }
            Self::Unclassifiable => write!(f, "frame has neither method nor id"),
        }
    }
}

impl Envelope {
    /// Classify a decoded JSON value into an envelope variant.
    ///
    /// # Errors
    ///
    /// Returns [`ClassifyError`] for frames that violate the envelope rules;
    /// the caller logs and drops these without surfacing them to the peer.
    pub fn classify(value: &Value, policy: IdPolicy) -> std::result::Result<Self, ClassifyError> {
        let obj = value.as_object().ok_or(ClassifyError::NotAnObject)?;

        let method = match obj.get("method") {
            Some(Value::String(m)) => Some(m.clone()),
            Some(_) => return Err(ClassifyError::BadMethod),
            None => None,
        };
        let params = obj.get("params").cloned();
        let id_member = obj.get("id");

        if let Some(method) = method {
            return match id_member {
                Some(raw) => match RequestId::from_value(raw) {
                    Some(id) => Ok(Self::Request { id, method, params }),
                    None => match policy {
                        // The id is unusable for correlation; carrying the
                        // frame as a notification keeps the stream moving.
                        IdPolicy::Lenient => Ok(Self::Notification { method, params }),
                        IdPolicy::Strict => Err(ClassifyError::BadRequestId),
                    },
                },
                None => Ok(Self::Notification { method, params }),
            };
        }

        let raw_id = id_member.ok_or(ClassifyError::Unclassifiable)?;
        let id = RequestId::from_value(raw_id).ok_or(ClassifyError::BadResponseShape)?;

        let outcome = match (obj.get("result"), obj.get("error")) {
            (Some(result), None) => ResponseOutcome::Result(result.clone()),
            (None, Some(error)) => {
                let error: ErrorObject = serde_json::from_value(error.clone())
                    .map_err(|_| ClassifyError::BadResponseShape)?;
                ResponseOutcome::Error(error)
            }
            _ => return Err(ClassifyError::BadResponseShape),
        };

        Ok(Self::Response { id, outcome })
    }

    /// Encode this envelope as a JSON object carrying `"jsonrpc": "2.0"`.
    #[must_use]
    pub fn to_value(&self) -> Value {
        let mut obj = Map::new();
        obj.insert("jsonrpc".into(), json!(JSONRPC_VERSION));

        match self {
            Self::Request { id, method, params } => {
                obj.insert("id".into(), id.to_value());
                obj.insert("method".into(), json!(method));
                if let Some(params) = params {
                    obj.insert("params".into(), params.clone());
                }
            }
            Self::Response { id, outcome } => {
                obj.insert("id".into(), id.to_value());
                match outcome {
                    ResponseOutcome::Result(result) => {
                        obj.insert("result".into(), result.clone());
                    }
                    ResponseOutcome::Error(error) => {
                        // ErrorObject serialization cannot fail: the only
                        // non-literal member is already a Value.
                        obj.insert(
                            "error".into(),
                            serde_json::to_value(error).unwrap_or_else(|_| {
                                json!({
                                    "code": CODE_INTERNAL_ERROR,
                                    "message": "error object serialization failed",
                                })
                            }),
                        );
                    }
                }
            }
            Self::Notification { method, params } => {
                obj.insert("method".into(), json!(method));
                if let Some(params) = params {
                    obj.insert("params".into(), params.clone());
                }
            }
        }

        Value::Object(obj)
    }

    /// Method name carried by requests and notifications.
    #[must_use]
    pub fn method(&self) -> Option<&str> {
        match self {
            Self::Request { method, .. } | Self::Notification { method, .. } => Some(method),
            Self::Response { .. } => None,
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
