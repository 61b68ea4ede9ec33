//! Byte-stream transport abstraction.
//!
//! A transport moves opaque bytes in both directions; framing is entirely
//! the endpoint's concern. Two variants ship with the crate:
//!
//! - [`StdioTransport`] — the standard streams of a spawned peer process.
//! - [`DuplexTransport`] — an in-memory string-frame channel standing in
//!   for network transports (and doing duty as the test harness).

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::Result;

pub mod duplex;
pub mod stdio;

pub use duplex::DuplexTransport;
pub use stdio::StdioTransport;

/// Capacity of the inbound byte-chunk channel a transport exposes.
pub(crate) const INBOUND_CHANNEL_CAPACITY: usize = 256;

/// A bidirectional byte stream.
///
/// `send` writes one already-framed chunk verbatim; chunk granularity on the
/// inbound side is irrelevant because the endpoint reassembles frames.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Write bytes to the peer.
    ///
    /// # Errors
    ///
    /// Returns `PeerError::Transport` on I/O failure.
    async fn send(&self, bytes: Bytes) -> Result<()>;

    /// Take the single-consumer inbound byte stream.
    ///
    /// The channel ends when the underlying stream reaches EOF. Returns
    /// `None` on a second call.
    fn take_incoming(&mut self) -> Option<mpsc::Receiver<Bytes>>;
}
