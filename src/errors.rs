//! Error types shared across the crate.

use std::fmt::{Display, Formatter};

use crate::framing::envelope::ErrorObject;

/// Shared crate result type.
pub type Result<T> = std::result::Result<T, PeerError>;

/// Peer runtime error enumeration covering all domain failure modes.
#[derive(Debug)]
pub enum PeerError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// Operation attempted while no live peer process exists.
    NotRunning,
    /// The peer process terminated; carries the observed exit code when known.
    PeerExited(Option<i32>),
    /// Envelope-level violation on an inbound response.
    InvalidResponse(String),
    /// Per-call deadline elapsed before a response arrived.
    Timeout,
    /// Outbound payload serialization failure.
    Encode(String),
    /// Inbound payload deserialization failure.
    Decode(String),
    /// Error object reported by the remote peer, surfaced verbatim.
    Rpc(ErrorObject),
    /// Inbound request arrived before a handler was installed.
    HandlerMissing,
    /// I/O-level failure on the underlying byte stream.
    Transport(String),
    /// The inbound stream ended gracefully.
    Closed,
    /// Child process launch failure.
    Spawn(String),
    /// File-system or other I/O failure.
    Io(String),
    /// Terminal id is unknown (neither live nor in the released cache).
    TerminalNotFound(String),
    /// Operation other than `output` attempted on a released terminal.
    TerminalReleased(String),
    /// Terminal command names a program that cannot be located.
    ExecutableNotFound(String),
    /// Terminal command string could not be tokenized.
    CommandParse(String),
}

impl Display for PeerError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::NotRunning => write!(f, "peer is not running"),
            Self::PeerExited(Some(code)) => write!(f, "peer exited with code {code}"),
            Self::PeerExited(None) => write!(f, "peer terminated by signal"),
            Self::InvalidResponse(msg) => write!(f, "invalid response: {msg}"),
            Self::Timeout => write!(f, "request timed out"),
            Self::Encode(msg) => write!(f, "encode: {msg}"),
            Self::Decode(msg) => write!(f, "decode: {msg}"),
            Self::Rpc(err) => write!(f, "peer error {}: {}", err.code, err.message),
            Self::HandlerMissing => write!(f, "no handler registered"),
            Self::Transport(msg) => write!(f, "transport: {msg}"),
            Self::Closed => write!(f, "connection closed"),
            Self::Spawn(msg) => write!(f, "spawn: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
            Self::TerminalNotFound(id) => write!(f, "terminal not found: {id}"),
            Self::TerminalReleased(id) => write!(f, "terminal released: {id}"),
            Self::ExecutableNotFound(name) => write!(f, "executable not found: {name}"),
            Self::CommandParse(msg) => write!(f, "command parse failed: {msg}"),
        }
    }
}

impl std::error::Error for PeerError {}

impl From<toml::de::Error> for PeerError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<std::io::Error> for PeerError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl PeerError {
    /// Convert this error into a JSON-RPC error object for a wire response.
    ///
    /// A peer-reported error passes through with its original code and data;
    /// everything else maps to `-32603` (internal error).
    #[must_use]
    pub fn into_error_object(self) -> ErrorObject {
        match self {
            Self::Rpc(err) => err,
            other => ErrorObject::internal(other.to_string()),
        }
    }
}
