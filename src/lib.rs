#![forbid(unsafe_code)]

//! `acp-conduit` — bidirectional JSON-RPC 2.0 peer runtime for the Agent
//! Client Protocol.
//!
//! One [`endpoint::PeerEndpoint`] owns a connection: outbound requests
//! with correlation and per-call timeouts, inbound dispatch to a
//! role-specific handler, notification streaming, and an optional debug
//! tap. The [`supervisor`] launches the remote peer over stdio and keeps a
//! crash-recovery registry; the [`terminal`] manager runs shell commands
//! on the agent's behalf.

pub mod client;
pub mod config;
pub mod endpoint;
pub mod errors;
pub mod framing;
pub mod shell_env;
pub mod supervisor;
pub mod tap;
pub mod terminal;
pub mod transport;

pub use client::ClientConnection;
pub use config::RuntimeConfig;
pub use endpoint::{EndpointOptions, PeerEndpoint};
pub use errors::{PeerError, Result};
