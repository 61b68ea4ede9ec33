//! Terminal session state: rolling output buffer and exit bookkeeping.

use std::process::ExitStatus;
use std::sync::{Arc, Mutex};

use serde_json::{json, Value};
use tokio::process::Child;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Observed child exit, as reported on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitInfo {
    /// Process exit code, absent when the child died to a signal.
    pub exit_code: Option<i32>,
    /// Terminating signal name, when known.
    pub signal: Option<String>,
}

impl ExitInfo {
    /// Convert a process exit status into wire-facing exit info.
    #[must_use]
    pub fn from_status(status: ExitStatus) -> Self {
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(signal) = status.signal() {
                return Self {
                    exit_code: None,
                    signal: Some(signal_name(signal)),
                };
            }
        }
        Self {
            exit_code: status.code(),
            signal: None,
        }
    }

    /// Encode as `{exitCode?, signal?}` with absent members omitted.
    #[must_use]
    pub fn to_value(&self) -> Value {
        let mut body = json!({});
        if let Some(code) = self.exit_code {
            body["exitCode"] = json!(code);
        }
        if let Some(signal) = &self.signal {
            body["signal"] = json!(signal);
        }
        body
    }
}

#[cfg(unix)]
fn signal_name(signal: i32) -> String {
    match signal {
        1 => "SIGHUP".to_owned(),
        2 => "SIGINT".to_owned(),
        9 => "SIGKILL".to_owned(),
        15 => "SIGTERM".to_owned(),
        other => format!("signal {other}"),
    }
}

// ── Rolling buffer ────────────────────────────────────────────────────────────

/// Byte-capped output window. Oldest bytes are dropped once the cap is
/// reached and the truncation latch stays set from then on.
#[derive(Debug)]
pub struct RollingBuffer {
    data: Vec<u8>,
    limit: usize,
    truncated: bool,
}

impl RollingBuffer {
    /// Create a buffer capped at `limit` bytes.
    #[must_use]
    pub fn new(limit: usize) -> Self {
        Self {
            data: Vec::new(),
            limit,
            truncated: false,
        }
    }

    /// Append bytes, dropping from the front once over the cap.
    pub fn push(&mut self, bytes: &[u8]) {
        if bytes.len() >= self.limit {
            // The new chunk alone fills the window.
            if !self.data.is_empty() || bytes.len() > self.limit {
                self.truncated = true;
            }
            self.data.clear();
            self.data
                .extend_from_slice(&bytes[bytes.len() - self.limit..]);
            return;
        }
        self.data.extend_from_slice(bytes);
        if self.data.len() > self.limit {
            let overflow = self.data.len() - self.limit;
            self.data.drain(..overflow);
            self.truncated = true;
        }
    }

    /// Current window contents, lossily decoded.
    #[must_use]
    pub fn snapshot(&self) -> String {
        String::from_utf8_lossy(&self.data).into_owned()
    }

    /// Whether any bytes have ever been dropped.
    #[must_use]
    pub fn truncated(&self) -> bool {
        self.truncated
    }

    /// Bytes currently held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the window is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

// ── Session records ───────────────────────────────────────────────────────────

/// Point-in-time view returned by `terminal/output`.
#[derive(Debug, Clone)]
pub struct OutputSnapshot {
    /// Buffered output window.
    pub output: String,
    /// Whether older output was dropped to honor the byte cap.
    pub truncated: bool,
    /// Exit info, present once the child has exited.
    pub exit_status: Option<ExitInfo>,
}

/// A live terminal entry owned by the manager.
pub(crate) struct LiveTerminal {
    /// Child handle; taken during kill/release so the map lock is never
    /// held across a reap.
    pub child: Option<Child>,
    pub buffer: Arc<Mutex<RollingBuffer>>,
    pub exit: Option<ExitInfo>,
    pub waiters: Vec<oneshot::Sender<ExitInfo>>,
    /// Output pump tasks; finished once the pipes reach EOF.
    pub pumps: Vec<JoinHandle<()>>,
}

impl LiveTerminal {
    pub(crate) fn snapshot(&self) -> OutputSnapshot {
        let buffer = self
            .buffer
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        OutputSnapshot {
            output: buffer.snapshot(),
            truncated: buffer.truncated(),
            exit_status: self.exit.clone(),
        }
    }

    pub(crate) fn pumps_finished(&self) -> bool {
        self.pumps.iter().all(JoinHandle::is_finished)
    }

    /// Record the exit and resolve every pending waiter.
    pub(crate) fn record_exit(&mut self, exit: ExitInfo) {
        self.exit = Some(exit.clone());
        for waiter in self.waiters.drain(..) {
            let _ = waiter.send(exit.clone());
        }
    }
}

/// A released terminal retained in the bounded cache.
#[derive(Debug, Clone)]
pub struct ReleasedTerminal {
    /// Final output window.
    pub output: String,
    /// Truncation latch at release time.
    pub truncated: bool,
    /// Exit info when the child had exited (or was killed by release).
    pub exit_status: Option<ExitInfo>,
}

// ── Tests ─────────────────────────────────────────────────────────────────────
