//! Child-process stdio transport.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{ChildStdin, ChildStdout};
use tokio::sync::{mpsc, Mutex};
use tracing::debug;

use crate::{PeerError, Result};

use super::{Transport, INBOUND_CHANNEL_CAPACITY};

/// Transport over a spawned peer's stdin/stdout pipes.
///
/// A background pump task copies raw stdout chunks into the inbound channel
/// until EOF. Writes go to the child's stdin; the endpoint's writer task is
/// the only caller, so the mutex is uncontended in practice.
pub struct StdioTransport {
    stdin: Mutex<ChildStdin>,
    incoming: Option<mpsc::Receiver<Bytes>>,
}

impl StdioTransport {
    /// Wrap the pipes of a spawned peer process.
    #[must_use]
    pub fn new(stdin: ChildStdin, stdout: ChildStdout) -> Self {
        let (tx, rx) = mpsc::channel(INBOUND_CHANNEL_CAPACITY);
        tokio::spawn(pump_stdout(stdout, tx));
        Self {
            stdin: Mutex::new(stdin),
            incoming: Some(rx),
        }
    }
}

#[async_trait]
impl Transport for StdioTransport {
    async fn send(&self, bytes: Bytes) -> Result<()> {
        let mut stdin = self.stdin.lock().await;
        stdin
            .write_all(&bytes)
            .await
            .map_err(|err| PeerError::Transport(format!("stdin write failed: {err}")))?;
        stdin
            .flush()
            .await
            .map_err(|err| PeerError::Transport(format!("stdin flush failed: {err}")))
    }

    fn take_incoming(&mut self) -> Option<mpsc::Receiver<Bytes>> {
        self.incoming.take()
    }
}

/// Pump raw stdout chunks into `tx` until EOF or receiver drop.
async fn pump_stdout(mut stdout: ChildStdout, tx: mpsc::Sender<Bytes>) {
    let mut buf = BytesMut::with_capacity(8192);
    loop {
        match stdout.read_buf(&mut buf).await {
            Ok(0) => {
                debug!("peer stdout reached EOF");
                break;
            }
            Ok(_) => {
                if tx.send(buf.split().freeze()).await.is_err() {
                    debug!("inbound receiver dropped, stopping stdout pump");
                    break;
                }
            }
            Err(err) => {
                debug!(%err, "peer stdout read failed, stopping pump");
                break;
            }
        }
    }
}
