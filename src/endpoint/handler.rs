//! Handler interface for inbound requests and notifications.
//!
//! The endpoint is role-agnostic: it hands every inbound request to one
//! installed [`PeerHandler`] and writes whatever that handler returns back
//! to the peer. The role-specific routers in [`crate::endpoint::router`]
//! implement this trait over the routed method sets.

use async_trait::async_trait;
use serde_json::Value;

use crate::framing::envelope::ErrorObject;

/// Outcome of one inbound request dispatch.
pub type HandlerResult = std::result::Result<Value, ErrorObject>;

/// Locally implemented entry points the remote peer may invoke.
///
/// Handler invocations run as independent tasks, concurrently with further
/// inbound frames; they may complete in any order.
#[async_trait]
pub trait PeerHandler: Send + Sync {
    /// Handle one inbound request and produce its response payload.
    ///
    /// Unrouted methods must return [`ErrorObject::method_not_found`];
    /// failures map to `-32603` responses.
    async fn handle_request(&self, method: &str, params: Option<Value>) -> HandlerResult;

    /// Handle one inbound notification. Never answered on the wire.
    ///
    /// The default implementation ignores the notification; the endpoint
    /// publishes it on the notification stream regardless.
    async fn handle_notification(&self, method: &str, params: Option<Value>) {
        let _ = (method, params);
    }
}

// ── Client-side delegates ─────────────────────────────────────────────────────

/// File-system operations the host application provides to the agent.
///
/// Payloads stay opaque JSON trees: the default reader/writer handlers live
/// outside the core, so this trait only fixes the call shape.
#[async_trait]
pub trait FsDelegate: Send + Sync {
    /// `fs/read_text_file` — return `{content}` for the requested path.
    async fn read_text_file(&self, params: Value) -> HandlerResult;

    /// `fs/write_text_file` — write content, return `{}` on success.
    async fn write_text_file(&self, params: Value) -> HandlerResult;
}

/// Permission prompts the host application answers on the agent's behalf.
#[async_trait]
pub trait PermissionDelegate: Send + Sync {
    /// `session/request_permission` — return the selected outcome.
    async fn request_permission(&self, params: Value) -> HandlerResult;
}

// ── Agent-side delegate ───────────────────────────────────────────────────────

/// Operations an agent-role peer exposes to its client.
#[async_trait]
pub trait AgentDelegate: Send + Sync {
    /// `initialize` — capability negotiation.
    async fn initialize(&self, params: Value) -> HandlerResult;

    /// `session/new` — create a session, return `{sessionId}`.
    async fn new_session(&self, params: Value) -> HandlerResult;

    /// `session/prompt` — run one prompt turn.
    async fn prompt(&self, params: Value) -> HandlerResult;

    /// `session/load` — reattach to an existing session.
    async fn load_session(&self, params: Value) -> HandlerResult;

    /// `session/cancel` notification — stop in-flight work. Best effort.
    async fn cancel(&self, params: Value);
}
