//! In-memory duplex transport over string frames.
//!
//! Models a network channel (WebSocket-style) whose frames are UTF-8
//! strings: outbound bytes are decoded to a string before crossing the
//! channel, inbound strings are re-encoded as bytes for the endpoint's
//! frame reader. [`DuplexTransport::pair`] wires two connected ends, which
//! is how the integration tests stand up a client/agent pair without a
//! child process.

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::{PeerError, Result};

use super::{Transport, INBOUND_CHANNEL_CAPACITY};

/// One end of a string-frame duplex channel.
pub struct DuplexTransport {
    outbound: mpsc::Sender<String>,
    incoming: Option<mpsc::Receiver<Bytes>>,
}

impl DuplexTransport {
    /// Build a transport end from a raw string-frame channel pair.
    #[must_use]
    pub fn new(outbound: mpsc::Sender<String>, inbound: mpsc::Receiver<String>) -> Self {
        let (tx, rx) = mpsc::channel(INBOUND_CHANNEL_CAPACITY);
        tokio::spawn(decode_inbound(inbound, tx));
        Self {
            outbound,
            incoming: Some(rx),
        }
    }

    /// Create two connected transport ends.
    #[must_use]
    pub fn pair() -> (Self, Self) {
        let (a_tx, a_rx) = mpsc::channel(INBOUND_CHANNEL_CAPACITY);
        let (b_tx, b_rx) = mpsc::channel(INBOUND_CHANNEL_CAPACITY);
        (Self::new(a_tx, b_rx), Self::new(b_tx, a_rx))
    }
}

#[async_trait]
impl Transport for DuplexTransport {
    async fn send(&self, bytes: Bytes) -> Result<()> {
        let text = String::from_utf8(bytes.to_vec())
            .map_err(|err| PeerError::Transport(format!("outbound frame is not UTF-8: {err}")))?;
        self.outbound
            .send(text)
            .await
            .map_err(|_| PeerError::Transport("duplex channel closed".into()))
    }

    fn take_incoming(&mut self) -> Option<mpsc::Receiver<Bytes>> {
        self.incoming.take()
    }
}

/// Re-encode inbound string frames as byte chunks.
async fn decode_inbound(mut inbound: mpsc::Receiver<String>, tx: mpsc::Sender<Bytes>) {
    while let Some(text) = inbound.recv().await {
        if tx.send(Bytes::from(text.into_bytes())).await.is_err() {
            break;
        }
    }
}
