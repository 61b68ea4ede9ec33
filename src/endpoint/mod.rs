//! The peer endpoint — correlation, dispatch, and cancellation authority
//! for one connection.
//!
//! One endpoint owns both directions of RPC on a transport:
//!
//! - outbound requests get a monotonically allocated integer id, a pending
//!   continuation, and an optional per-call deadline;
//! - inbound requests are routed to the installed [`PeerHandler`], each in
//!   its own task, and answered on the wire;
//! - inbound notifications are published on a broadcast stream in arrival
//!   order;
//! - a writer task serializes every outbound frame so bytes never
//!   interleave, terminating each frame with exactly one `\n`.
//!
//! Ids are scoped per direction: the endpoint matches inbound response ids
//! only against its own pending table, so both sides can issue requests
//! with overlapping numeric ranges.

pub mod handler;
pub mod router;

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::RuntimeConfig;
use crate::framing::envelope::{
    Envelope, ErrorObject, IdPolicy, RequestId, ResponseOutcome,
};
use crate::framing::frame_reader::{self, FrameReader};
use crate::tap::{Tap, TapDirection, TapRecord};
use crate::transport::Transport;
use crate::{PeerError, Result};

pub use handler::PeerHandler;
pub use router::{methods, AgentRouter, ClientRouter};

/// Capacity of the outbound frame queue feeding the writer task.
const OUTBOUND_CHANNEL_CAPACITY: usize = 64;

/// Capacity of the inbound notification broadcast ring.
const NOTIFICATION_CAPACITY: usize = 256;

/// One inbound notification as published on the notification stream.
#[derive(Debug, Clone)]
pub struct NotificationFrame {
    /// Method name.
    pub method: String,
    /// Opaque parameter tree.
    pub params: Option<Value>,
}

/// Endpoint construction options.
#[derive(Debug, Clone)]
pub struct EndpointOptions {
    /// Malformed-id classification policy.
    pub id_policy: IdPolicy,
    /// Method set the local role answers; used to pick between `-32601`
    /// and the delegate-not-set `-32603` before a handler is installed.
    pub routed_methods: &'static [&'static str],
    /// Frame reader noise-prefix discard threshold.
    pub noise_prefix_limit: usize,
    /// Frame reader stall-warning threshold.
    pub frame_warn_bytes: usize,
}

impl EndpointOptions {
    /// Options for a client-role endpoint.
    #[must_use]
    pub fn client() -> Self {
        Self {
            id_policy: IdPolicy::default(),
            routed_methods: methods::CLIENT_ROUTED,
            noise_prefix_limit: frame_reader::NOISE_PREFIX_LIMIT,
            frame_warn_bytes: frame_reader::FRAME_WARN_BYTES,
        }
    }

    /// Options for an agent-role endpoint.
    #[must_use]
    pub fn agent() -> Self {
        Self {
            routed_methods: methods::AGENT_ROUTED,
            ..Self::client()
        }
    }

    /// Apply the relevant knobs from a parsed [`RuntimeConfig`].
    #[must_use]
    pub fn with_config(mut self, config: &RuntimeConfig) -> Self {
        self.id_policy = config.id_policy;
        if let Some(limit) = config.noise_prefix_limit {
            self.noise_prefix_limit = limit;
        }
        if let Some(bytes) = config.frame_warn_bytes {
            self.frame_warn_bytes = bytes;
        }
        self
    }
}

// ── Link state ────────────────────────────────────────────────────────────────

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum LinkState {
    Running,
    Closed,
    Exited(Option<i32>),
}

impl LinkState {
    fn as_error(self) -> PeerError {
        match self {
            Self::Running => PeerError::NotRunning,
            Self::Closed => PeerError::Closed,
            Self::Exited(_) => PeerError::NotRunning,
        }
    }
}

// ── Shared state ──────────────────────────────────────────────────────────────

type PendingTable = HashMap<RequestId, oneshot::Sender<Result<Value>>>;

struct Shared {
    pending: Mutex<PendingTable>,
    state: Mutex<LinkState>,
    next_id: AtomicI64,
    outbound_tx: mpsc::Sender<Bytes>,
    notifications: Mutex<Option<broadcast::Sender<NotificationFrame>>>,
    handler: Mutex<Option<Arc<dyn PeerHandler>>>,
    tap: Tap,
    cancel: CancellationToken,
    routed: &'static [&'static str],
    id_policy: IdPolicy,
}

impl Shared {
    fn lock_pending(&self) -> std::sync::MutexGuard<'_, PendingTable> {
        self.pending
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn link_state(&self) -> LinkState {
        *self
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn set_link_state(&self, next: LinkState) -> LinkState {
        let mut guard = self
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let previous = *guard;
        match (previous, next) {
            (LinkState::Running, _) => *guard = next,
            // A stream EOF often lands before the supervisor observes the
            // exit status; upgrade so later calls report peer-not-running.
            (LinkState::Closed, LinkState::Exited(_)) => *guard = next,
            _ => {}
        }
        previous
    }

    fn current_handler(&self) -> Option<Arc<dyn PeerHandler>> {
        self.handler
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// Fail every pending continuation with an error derived from `state`.
    fn drain_pending(&self, state: LinkState) {
        let drained: Vec<_> = {
            let mut pending = self.lock_pending();
            pending.drain().collect()
        };
        for (id, tx) in drained {
            let error = match state {
                LinkState::Exited(code) => PeerError::PeerExited(code),
                _ => PeerError::Closed,
            };
            debug!(%id, "failing pending request after link loss");
            let _ = tx.send(Err(error));
        }
    }

    fn notification_sender(&self) -> Option<broadcast::Sender<NotificationFrame>> {
        self.notifications
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// Transition out of `Running`, drain pending continuations, and finish
    /// every stream.
    fn shut_down(&self, next: LinkState) {
        let previous = self.set_link_state(next);
        if previous == LinkState::Running {
            self.drain_pending(next);
            // Dropping the sender ends every notification subscription.
            self.notifications
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .take();
            self.tap.disable();
            self.cancel.cancel();
        }
    }
}

/// Removes a pending-table entry when a `send_request` future is dropped
/// before completion (caller cancellation or timeout).
struct PendingGuard<'a> {
    shared: &'a Shared,
    id: RequestId,
    armed: bool,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.shared.lock_pending().remove(&self.id);
        }
    }
}

// ── Endpoint ──────────────────────────────────────────────────────────────────

/// The multiplexer owning one connection.
pub struct PeerEndpoint {
    shared: Arc<Shared>,
}

impl PeerEndpoint {
    /// Start an endpoint over `transport`.
    ///
    /// Spawns the reader and writer tasks immediately.
    ///
    /// # Errors
    ///
    /// Returns `PeerError::Transport` if the transport's inbound stream was
    /// already consumed.
    pub fn start<T>(mut transport: T, options: EndpointOptions) -> Result<Self>
    where
        T: Transport + 'static,
    {
        let incoming = transport.take_incoming().ok_or_else(|| {
            PeerError::Transport("transport inbound stream already taken".into())
        })?;

        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_CHANNEL_CAPACITY);
        let (notifications, _) = broadcast::channel(NOTIFICATION_CAPACITY);

        let shared = Arc::new(Shared {
            pending: Mutex::new(HashMap::new()),
            state: Mutex::new(LinkState::Running),
            next_id: AtomicI64::new(1),
            outbound_tx,
            notifications: Mutex::new(Some(notifications)),
            handler: Mutex::new(None),
            tap: Tap::new(),
            cancel: CancellationToken::new(),
            routed: options.routed_methods,
            id_policy: options.id_policy,
        });

        tokio::spawn(run_writer(Arc::clone(&shared), transport, outbound_rx));
        tokio::spawn(run_reader(
            Arc::clone(&shared),
            incoming,
            FrameReader::with_limits(options.noise_prefix_limit, options.frame_warn_bytes),
        ));

        Ok(Self { shared })
    }

    /// Issue a request and await its response.
    ///
    /// Allocates the next integer id, registers a continuation, writes the
    /// framed envelope, and suspends until the matching response arrives or
    /// `timeout` elapses. Dropping the returned future removes the
    /// continuation; a late response is then logged and discarded.
    ///
    /// # Errors
    ///
    /// - `PeerError::NotRunning` / `PeerError::Closed` — no live link.
    /// - `PeerError::Timeout` — `timeout` elapsed; the pending table no
    ///   longer contains the id.
    /// - `PeerError::Rpc` — the peer answered with an error object.
    /// - `PeerError::PeerExited` — the peer terminated mid-flight.
    pub async fn send_request(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Option<Duration>,
    ) -> Result<Value> {
        let shared = self.shared.as_ref();
        let state = shared.link_state();
        if state != LinkState::Running {
            return Err(state.as_error());
        }

        let id = RequestId::Num(shared.next_id.fetch_add(1, Ordering::SeqCst));
        let envelope = Envelope::Request {
            id: id.clone(),
            method: method.to_owned(),
            params,
        };
        let bytes = encode_frame(&envelope)?;

        let (tx, rx) = oneshot::channel();
        shared.lock_pending().insert(id.clone(), tx);
        let mut guard = PendingGuard {
            shared,
            id: id.clone(),
            armed: true,
        };

        if shared.outbound_tx.send(bytes).await.is_err() {
            return Err(shared.link_state().as_error());
        }

        let outcome = match timeout {
            Some(deadline) => match tokio::time::timeout(deadline, rx).await {
                Ok(received) => received,
                Err(_elapsed) => {
                    debug!(%id, method, "request deadline elapsed");
                    return Err(PeerError::Timeout);
                }
            },
            None => rx.await,
        };
        guard.armed = false;

        match outcome {
            Ok(result) => result,
            // The sender side is dropped only when the table is torn down
            // without draining, which close() never does; treat as closed.
            Err(_) => Err(PeerError::Closed),
        }
    }

    /// Send a fire-and-forget notification.
    ///
    /// # Errors
    ///
    /// Returns the link-state error when no live peer exists, or
    /// `PeerError::Encode` if the params cannot be serialized.
    pub async fn send_notification(&self, method: &str, params: Option<Value>) -> Result<()> {
        let state = self.shared.link_state();
        if state != LinkState::Running {
            return Err(state.as_error());
        }
        let envelope = Envelope::Notification {
            method: method.to_owned(),
            params,
        };
        let bytes = encode_frame(&envelope)?;
        self.shared
            .outbound_tx
            .send(bytes)
            .await
            .map_err(|_| self.shared.link_state().as_error())
    }

    /// Install (or replace) the handler for inbound requests.
    ///
    /// In-flight handler invocations keep running against the handler they
    /// started with.
    pub fn set_handler(&self, handler: Arc<dyn PeerHandler>) {
        *self
            .shared
            .handler
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(handler);
    }

    /// Subscribe to inbound notifications in arrival order.
    ///
    /// After the link goes down the returned stream is already finished.
    #[must_use]
    pub fn notifications(&self) -> broadcast::Receiver<NotificationFrame> {
        match self.shared.notification_sender() {
            Some(tx) => tx.subscribe(),
            None => broadcast::channel(1).1,
        }
    }

    /// Enable the debug tap and subscribe to it. Idempotent while enabled.
    #[must_use]
    pub fn debug_tap(&self) -> broadcast::Receiver<TapRecord> {
        self.shared.tap.enable()
    }

    /// Disable the debug tap, finishing its stream.
    pub fn debug_tap_disable(&self) {
        self.shared.tap.disable();
    }

    /// Whether the link is still up.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.shared.link_state() == LinkState::Running
    }

    /// Terminate the connection.
    ///
    /// Every pending continuation fails with *connection closed*; the
    /// reader/writer tasks stop and all streams finish.
    pub fn close(&self) {
        self.shared.shut_down(LinkState::Closed);
    }

    /// Record that the peer process exited.
    ///
    /// Pending continuations fail with *peer exited*; subsequent calls fail
    /// with *peer not running*. Invoked by the supervisor's exit monitor.
    pub fn notify_peer_exit(&self, code: Option<i32>) {
        self.shared.shut_down(LinkState::Exited(code));
    }
}

impl Drop for PeerEndpoint {
    fn drop(&mut self) {
        // Last handle gone: stop the I/O tasks. Pending requests can only
        // belong to callers that no longer exist.
        self.shared.cancel.cancel();
    }
}

fn encode_frame(envelope: &Envelope) -> Result<Bytes> {
    serde_json::to_vec(&envelope.to_value())
        .map(Bytes::from)
        .map_err(|err| PeerError::Encode(err.to_string()))
}

// ── Writer task ───────────────────────────────────────────────────────────────

/// Sole writer to the transport: frames leave whole and `\n`-terminated.
async fn run_writer<T: Transport>(
    shared: Arc<Shared>,
    transport: T,
    mut outbound_rx: mpsc::Receiver<Bytes>,
) {
    loop {
        tokio::select! {
            biased;

            () = shared.cancel.cancelled() => {
                debug!("writer: cancellation received, stopping");
                break;
            }

            frame = outbound_rx.recv() => {
                let Some(frame) = frame else {
                    debug!("writer: outbound queue closed, stopping");
                    break;
                };

                shared.tap.record(TapDirection::Outbound, &frame);

                let mut line = BytesMut::with_capacity(frame.len() + 1);
                line.extend_from_slice(&frame);
                line.extend_from_slice(b"\n");

                if let Err(err) = transport.send(line.freeze()).await {
                    warn!(%err, "writer: transport send failed, shutting link down");
                    shared.shut_down(LinkState::Closed);
                    break;
                }
            }
        }
    }
}

// ── Reader task ───────────────────────────────────────────────────────────────

async fn run_reader(shared: Arc<Shared>, mut incoming: mpsc::Receiver<Bytes>, mut reader: FrameReader) {
    loop {
        tokio::select! {
            biased;

            () = shared.cancel.cancelled() => {
                debug!("reader: cancellation received, stopping");
                break;
            }

            chunk = incoming.recv() => {
                match chunk {
                    None => {
                        debug!("reader: inbound stream ended");
                        // Keep an exit code recorded by the supervisor; a
                        // plain EOF becomes *connection closed*.
                        if shared.link_state() == LinkState::Running {
                            shared.shut_down(LinkState::Closed);
                        }
                        break;
                    }
                    Some(chunk) => {
                        reader.push(&chunk);
                        while let Some(frame) = reader.pop_frame() {
                            dispatch_frame(&shared, frame);
                        }
                    }
                }
            }
        }
    }
}

/// Route one complete frame to its destination.
fn dispatch_frame(shared: &Arc<Shared>, frame: Bytes) {
    shared.tap.record(TapDirection::Inbound, &frame);

    let value: Value = match serde_json::from_slice(&frame) {
        Ok(value) => value,
        Err(err) => {
            warn!(%err, "dropping undecodable frame");
            return;
        }
    };

    let envelope = match Envelope::classify(&value, shared.id_policy) {
        Ok(envelope) => envelope,
        Err(err) => {
            warn!(%err, "dropping malformed envelope");
            return;
        }
    };

    match envelope {
        Envelope::Response { id, outcome } => {
            let continuation = shared.lock_pending().remove(&id);
            match continuation {
                Some(tx) => {
                    let result = match outcome {
                        ResponseOutcome::Result(value) => Ok(value),
                        ResponseOutcome::Error(error) => Err(PeerError::Rpc(error)),
                    };
                    let _ = tx.send(result);
                }
                None => {
                    // Stale response: the request timed out or was cancelled.
                    debug!(%id, "dropping response with no pending request");
                }
            }
        }
        Envelope::Request { id, method, params } => {
            let shared = Arc::clone(shared);
            tokio::spawn(async move {
                let outcome = match shared.current_handler() {
                    Some(handler) => handler.handle_request(&method, params).await,
                    None if shared.routed.contains(&method.as_str()) => {
                        Err(ErrorObject::internal(PeerError::HandlerMissing.to_string()))
                    }
                    None => Err(ErrorObject::method_not_found(&method)),
                };
                let envelope = Envelope::Response {
                    id,
                    outcome: match outcome {
                        Ok(value) => ResponseOutcome::Result(value),
                        Err(error) => ResponseOutcome::Error(error),
                    },
                };
                match encode_frame(&envelope) {
                    Ok(bytes) => {
                        let _ = shared.outbound_tx.send(bytes).await;
                    }
                    Err(err) => warn!(%err, method, "failed to encode handler response"),
                }
            });
        }
        Envelope::Notification { method, params } => {
            // No receivers is fine; the stream is best-effort.
            if let Some(tx) = shared.notification_sender() {
                let _ = tx.send(NotificationFrame {
                    method: method.clone(),
                    params: params.clone(),
                });
            }
            if let Some(handler) = shared.current_handler() {
                tokio::spawn(async move {
                    handler.handle_notification(&method, params).await;
                });
            }
        }
    }
}
