//! Shared test helpers for endpoint-level integration tests.
//!
//! Stands up a [`PeerEndpoint`] over one end of an in-memory duplex
//! channel and hands the other end to the test as a scriptable fake peer,
//! so tests can assert on the exact frames the endpoint writes and inject
//! arbitrary inbound frames.

use std::time::Duration;

use acp_conduit::endpoint::{EndpointOptions, PeerEndpoint};
use acp_conduit::transport::DuplexTransport;
use serde_json::Value;
use tokio::sync::mpsc;

/// The remote side of the duplex channel, driven directly by the test.
pub struct FakePeer {
    /// Frames written by the endpoint, one `\n`-terminated line each.
    pub outbound: mpsc::Receiver<String>,
    /// Channel for injecting inbound frames (raw bytes, framing included).
    pub inbound: mpsc::Sender<String>,
}

impl FakePeer {
    /// Receive the next frame the endpoint wrote and parse it.
    ///
    /// Panics after two seconds, which always means the endpoint failed to
    /// write the expected frame.
    pub async fn recv_frame(&mut self) -> Value {
        let line = tokio::time::timeout(Duration::from_secs(2), self.outbound.recv())
            .await
            .expect("endpoint must write a frame within 2s")
            .expect("outbound channel must stay open");
        assert!(
            line.ends_with('\n'),
            "every outbound frame must end with a single newline: {line:?}"
        );
        serde_json::from_str(line.trim_end_matches('\n')).expect("outbound frame must be JSON")
    }

    /// Inject one raw chunk into the endpoint's inbound stream.
    pub async fn inject(&self, raw: impl Into<String>) {
        self.inbound
            .send(raw.into())
            .await
            .expect("inbound channel must stay open");
    }

    /// Assert that the endpoint writes nothing for `window`.
    pub async fn expect_silence(&mut self, window: Duration) {
        let outcome = tokio::time::timeout(window, self.outbound.recv()).await;
        assert!(
            outcome.is_err(),
            "endpoint wrote an unexpected frame: {outcome:?}"
        );
    }
}

/// Build an endpoint over a duplex channel plus its scriptable remote end.
pub fn endpoint_with_fake_peer(options: EndpointOptions) -> (PeerEndpoint, FakePeer) {
    let (to_peer_tx, to_peer_rx) = mpsc::channel(64);
    let (to_endpoint_tx, to_endpoint_rx) = mpsc::channel(64);

    let transport = DuplexTransport::new(to_peer_tx, to_endpoint_rx);
    let endpoint = PeerEndpoint::start(transport, options).expect("endpoint must start");

    (
        endpoint,
        FakePeer {
            outbound: to_peer_rx,
            inbound: to_endpoint_tx,
        },
    )
}
