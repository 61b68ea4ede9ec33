//! Role-specific method routing over the [`PeerHandler`] seam.
//!
//! Each router matches the routed method set for its role, decodes the
//! terminal parameter shapes it owns, and forwards everything else to the
//! injected delegates as opaque JSON. Unrouted methods answer
//! `-32601` (method not found); undecodable params answer `-32602`.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::endpoint::handler::{
    AgentDelegate, FsDelegate, HandlerResult, PeerHandler, PermissionDelegate,
};
use crate::framing::envelope::ErrorObject;
use crate::terminal::{CreateTerminal, TerminalManager};
use crate::PeerError;

/// Routed method names, shared by the routers and the client facade.
pub mod methods {
    /// Client-side: read a text file on the host.
    pub const FS_READ_TEXT_FILE: &str = "fs/read_text_file";
    /// Client-side: write a text file on the host.
    pub const FS_WRITE_TEXT_FILE: &str = "fs/write_text_file";
    /// Client-side: start a terminal command.
    pub const TERMINAL_CREATE: &str = "terminal/create";
    /// Client-side: read buffered terminal output.
    pub const TERMINAL_OUTPUT: &str = "terminal/output";
    /// Client-side: await terminal exit.
    pub const TERMINAL_WAIT_FOR_EXIT: &str = "terminal/wait_for_exit";
    /// Client-side: terminate a terminal command.
    pub const TERMINAL_KILL: &str = "terminal/kill";
    /// Client-side: release a terminal handle.
    pub const TERMINAL_RELEASE: &str = "terminal/release";
    /// Client-side: ask the operator to approve an action.
    pub const SESSION_REQUEST_PERMISSION: &str = "session/request_permission";
    /// Legacy alias for [`SESSION_REQUEST_PERMISSION`].
    pub const REQUEST_PERMISSION: &str = "request_permission";

    /// Agent-side: capability negotiation.
    pub const INITIALIZE: &str = "initialize";
    /// Agent-side: create a session.
    pub const SESSION_NEW: &str = "session/new";
    /// Agent-side: run a prompt turn.
    pub const SESSION_PROMPT: &str = "session/prompt";
    /// Agent-side: reattach to an existing session.
    pub const SESSION_LOAD: &str = "session/load";
    /// Agent-side cancellation notification.
    pub const SESSION_CANCEL: &str = "session/cancel";
    /// Notification method carrying streamed session updates.
    pub const SESSION_UPDATE: &str = "session/update";

    /// Methods the client role answers.
    pub const CLIENT_ROUTED: &[&str] = &[
        FS_READ_TEXT_FILE,
        FS_WRITE_TEXT_FILE,
        TERMINAL_CREATE,
        TERMINAL_OUTPUT,
        TERMINAL_WAIT_FOR_EXIT,
        TERMINAL_KILL,
        TERMINAL_RELEASE,
        SESSION_REQUEST_PERMISSION,
        REQUEST_PERMISSION,
    ];

    /// Methods the agent role answers.
    pub const AGENT_ROUTED: &[&str] = &[
        INITIALIZE,
        SESSION_NEW,
        SESSION_PROMPT,
        SESSION_LOAD,
        SESSION_CANCEL,
    ];
}

// ── Wire parameter shapes ─────────────────────────────────────────────────────

/// One environment variable entry on the terminal-create wire shape.
#[derive(Debug, Deserialize)]
struct EnvVariable {
    name: String,
    value: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TerminalCreateParams {
    command: String,
    args: Option<Vec<String>>,
    #[serde(default)]
    env: Vec<EnvVariable>,
    cwd: Option<std::path::PathBuf>,
    output_byte_limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TerminalIdParams {
    terminal_id: String,
}

fn decode<T: serde::de::DeserializeOwned>(
    method: &str,
    params: Option<Value>,
) -> std::result::Result<T, ErrorObject> {
    serde_json::from_value(params.unwrap_or(Value::Null))
        .map_err(|err| ErrorObject::invalid_params(format!("{method}: {err}")))
}

// ── Client router ─────────────────────────────────────────────────────────────

/// Client-role handler: file I/O, terminal operations, permission prompts.
pub struct ClientRouter {
    fs: Arc<dyn FsDelegate>,
    permissions: Arc<dyn PermissionDelegate>,
    terminals: Arc<TerminalManager>,
}

impl ClientRouter {
    /// Build a client router over the given delegates and terminal manager.
    #[must_use]
    pub fn new(
        fs: Arc<dyn FsDelegate>,
        permissions: Arc<dyn PermissionDelegate>,
        terminals: Arc<TerminalManager>,
    ) -> Self {
        Self {
            fs,
            permissions,
            terminals,
        }
    }

    async fn terminal_create(&self, params: Option<Value>) -> HandlerResult {
        let params: TerminalCreateParams = decode(methods::TERMINAL_CREATE, params)?;
        let spec = CreateTerminal {
            command: params.command,
            args: params.args,
            cwd: params.cwd,
            env: params
                .env
                .into_iter()
                .map(|var| (var.name, var.value))
                .collect(),
            byte_limit: params.output_byte_limit,
        };
        let terminal_id = self
            .terminals
            .create(spec)
            .await
            .map_err(PeerError::into_error_object)?;
        Ok(json!({ "terminalId": terminal_id }))
    }

    async fn terminal_output(&self, params: Option<Value>) -> HandlerResult {
        let params: TerminalIdParams = decode(methods::TERMINAL_OUTPUT, params)?;
        let snapshot = self
            .terminals
            .output(&params.terminal_id)
            .await
            .map_err(PeerError::into_error_object)?;
        let mut body = json!({
            "output": snapshot.output,
            "truncated": snapshot.truncated,
        });
        if let Some(exit) = snapshot.exit_status {
            body["exitStatus"] = exit.to_value();
        }
        Ok(body)
    }

    async fn terminal_wait(&self, params: Option<Value>) -> HandlerResult {
        let params: TerminalIdParams = decode(methods::TERMINAL_WAIT_FOR_EXIT, params)?;
        let exit = self
            .terminals
            .wait_for_exit(&params.terminal_id)
            .await
            .map_err(PeerError::into_error_object)?;
        Ok(exit.to_value())
    }

    async fn terminal_kill(&self, params: Option<Value>) -> HandlerResult {
        let params: TerminalIdParams = decode(methods::TERMINAL_KILL, params)?;
        self.terminals
            .kill(&params.terminal_id)
            .await
            .map_err(PeerError::into_error_object)?;
        Ok(json!({}))
    }

    async fn terminal_release(&self, params: Option<Value>) -> HandlerResult {
        let params: TerminalIdParams = decode(methods::TERMINAL_RELEASE, params)?;
        self.terminals
            .release(&params.terminal_id)
            .await
            .map_err(PeerError::into_error_object)?;
        Ok(json!({}))
    }
}

#[async_trait]
impl PeerHandler for ClientRouter {
    async fn handle_request(&self, method: &str, params: Option<Value>) -> HandlerResult {
        match method {
            methods::FS_READ_TEXT_FILE => {
                self.fs.read_text_file(params.unwrap_or(Value::Null)).await
            }
            methods::FS_WRITE_TEXT_FILE => {
                self.fs.write_text_file(params.unwrap_or(Value::Null)).await
            }
            methods::TERMINAL_CREATE => self.terminal_create(params).await,
            methods::TERMINAL_OUTPUT => self.terminal_output(params).await,
            methods::TERMINAL_WAIT_FOR_EXIT => self.terminal_wait(params).await,
            methods::TERMINAL_KILL => self.terminal_kill(params).await,
            methods::TERMINAL_RELEASE => self.terminal_release(params).await,
            methods::SESSION_REQUEST_PERMISSION | methods::REQUEST_PERMISSION => {
                self.permissions
                    .request_permission(params.unwrap_or(Value::Null))
                    .await
            }
            other => Err(ErrorObject::method_not_found(other)),
        }
    }
}

// ── Agent router ──────────────────────────────────────────────────────────────

/// Agent-role handler: lifecycle and prompt operations.
pub struct AgentRouter {
    delegate: Arc<dyn AgentDelegate>,
}

impl AgentRouter {
    /// Build an agent router over the given delegate.
    #[must_use]
    pub fn new(delegate: Arc<dyn AgentDelegate>) -> Self {
        Self { delegate }
    }
}

#[async_trait]
impl PeerHandler for AgentRouter {
    async fn handle_request(&self, method: &str, params: Option<Value>) -> HandlerResult {
        let params = params.unwrap_or(Value::Null);
        match method {
            methods::INITIALIZE => self.delegate.initialize(params).await,
            methods::SESSION_NEW => self.delegate.new_session(params).await,
            methods::SESSION_PROMPT => self.delegate.prompt(params).await,
            methods::SESSION_LOAD => self.delegate.load_session(params).await,
            other => Err(ErrorObject::method_not_found(other)),
        }
    }

    async fn handle_notification(&self, method: &str, params: Option<Value>) {
        if method == methods::SESSION_CANCEL {
            self.delegate.cancel(params.unwrap_or(Value::Null)).await;
        }
    }
}
