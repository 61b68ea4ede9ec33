//! Frame-level debug tap.
//!
//! When enabled, every inbound and outbound frame is mirrored to a bounded
//! broadcast stream together with its direction and wall-clock timestamp.
//! The tap never blocks the data path: the broadcast ring overwrites the
//! oldest records when a consumer lags, and recording is a cheap no-op
//! while the tap is disabled.
//!
//! The `method` field is filled by a shallow top-level key scan over the
//! raw bytes rather than a full JSON parse.

use std::sync::Mutex;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

/// Ring capacity of the tap stream.
const TAP_CAPACITY: usize = 256;

/// Which way a frame travelled.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TapDirection {
    /// Received from the peer.
    Inbound,
    /// Written to the peer.
    Outbound,
}

/// One mirrored frame.
#[derive(Debug, Clone)]
pub struct TapRecord {
    /// Frame direction.
    pub direction: TapDirection,
    /// Wall-clock capture time.
    pub timestamp: DateTime<Utc>,
    /// The raw frame bytes, without the newline terminator.
    pub raw: Bytes,
    /// Top-level `method` member, when the frame carries one.
    pub method: Option<String>,
}

/// Shared tap state owned by an endpoint.
#[derive(Debug, Default)]
pub struct Tap {
    sender: Mutex<Option<broadcast::Sender<TapRecord>>>,
}

impl Tap {
    /// Create a disabled tap.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable the tap and subscribe to it.
    ///
    /// Enabling is idempotent: while already enabled this subscribes to the
    /// existing stream instead of replacing it.
    pub fn enable(&self) -> broadcast::Receiver<TapRecord> {
        let mut guard = self.sender.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        match guard.as_ref() {
            Some(tx) => tx.subscribe(),
            None => {
                let (tx, rx) = broadcast::channel(TAP_CAPACITY);
                *guard = Some(tx);
                rx
            }
        }
    }

    /// Disable the tap, finishing the current stream.
    ///
    /// A subsequent [`Tap::enable`] starts a fresh stream.
    pub fn disable(&self) {
        let mut guard = self.sender.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        *guard = None;
    }

    /// Mirror one frame. No-op while disabled.
    pub fn record(&self, direction: TapDirection, raw: &Bytes) {
        let guard = self.sender.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(tx) = guard.as_ref() {
            // A send error just means no live subscribers; the stream stays
            // enabled until an explicit disable.
            let _ = tx.send(TapRecord {
                direction,
                timestamp: Utc::now(),
                raw: raw.clone(),
                method: extract_method(raw),
            });
        }
    }
}

/// Shallow scan for a top-level `"method"` key with a string value.
///
/// Walks the bytes tracking nesting depth and string state, so keys inside
/// nested objects or string literals are never mistaken for the envelope
/// member.
#[must_use]
pub fn extract_method(raw: &[u8]) -> Option<String> {
    let mut i = skip_ws(raw, 0);
    if raw.get(i) != Some(&b'{') {
        return None;
    }
    i += 1;
    let mut depth = 1usize;

    while i < raw.len() {
        match raw[i] {
            b'"' if depth == 1 => {
                let (key, after) = read_string(raw, i)?;
                i = skip_ws(raw, after);
                if raw.get(i) != Some(&b':') {
                    continue;
                }
                i = skip_ws(raw, i + 1);
                if key == "method" {
                    return match raw.get(i) {
                        Some(&b'"') => read_string(raw, i).map(|(value, _)| value),
                        _ => None,
                    };
                }
                // Skip a string value in place; containers are handled by
                // the depth tracking below.
                if raw.get(i) == Some(&b'"') {
                    let (_, after) = read_string(raw, i)?;
                    i = after;
                }
            }
            b'"' => {
                let (_, after) = read_string(raw, i)?;
                i = after;
            }
            b'{' | b'[' => {
                depth += 1;
                i += 1;
            }
            b'}' | b']' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return None;
                }
                i += 1;
            }
            _ => i += 1,
        }
    }

    None
}

fn skip_ws(raw: &[u8], mut i: usize) -> usize {
    while raw.get(i).is_some_and(u8::is_ascii_whitespace) {
        i += 1;
    }
    i
}

/// Read the string literal starting at the opening quote `raw[start]`.
/// Returns the content (escapes left unexpanded) and the index after the
/// closing quote.
fn read_string(raw: &[u8], start: usize) -> Option<(String, usize)> {
    let mut i = start + 1;
    let content_start = i;
    while i < raw.len() {
        match raw[i] {
            b'\\' => i += 2,
            b'"' => {
                let content = String::from_utf8_lossy(&raw[content_start..i]).into_owned();
                return Some((content, i + 1));
            }
            _ => i += 1,
        }
    }
    None
}

// ── Tests ─────────────────────────────────────────────────────────────────────
