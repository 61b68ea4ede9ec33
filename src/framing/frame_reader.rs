//! Frame extraction from a noisy byte stream.
//!
//! Agent processes routinely write diagnostics to the same stream that
//! carries protocol frames. [`FrameReader`] pulls whole top-level JSON
//! values out of an append-only byte buffer, dropping interleaved non-JSON
//! lines, without ever parsing JSON semantics — it only balances braces and
//! brackets while respecting string literals.
//!
//! The scan is a pure function of the buffered bytes: `pop_frame` either
//! removes exactly one complete value from the front of the buffer or
//! leaves the buffer intact.

use bytes::{Bytes, BytesMut};
use tracing::warn;

/// Non-JSON prefix length after which the buffer is declared hopeless and
/// discarded when no newline has arrived to delimit the noise.
pub const NOISE_PREFIX_LIMIT: usize = 4096;

/// Buffer size beyond which a stall warning is emitted when no complete
/// frame has been produced.
pub const FRAME_WARN_BYTES: usize = 200_000;

/// Incremental frame scanner over an append-only byte buffer.
#[derive(Debug)]
pub struct FrameReader {
    buf: BytesMut,
    noise_limit: usize,
    warn_bytes: usize,
    stall_warned: bool,
}

impl FrameReader {
    /// Create a reader with the default noise and warning thresholds.
    #[must_use]
    pub fn new() -> Self {
        Self::with_limits(NOISE_PREFIX_LIMIT, FRAME_WARN_BYTES)
    }

    /// Create a reader with explicit thresholds.
    #[must_use]
    pub fn with_limits(noise_limit: usize, warn_bytes: usize) -> Self {
        Self {
            buf: BytesMut::new(),
            noise_limit,
            warn_bytes,
            stall_warned: false,
        }
    }

    /// Append newly received bytes to the buffer.
    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Number of bytes currently buffered.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Extract the next complete top-level JSON value, if one is buffered.
    ///
    /// Leading whitespace is skipped; non-JSON lines are dropped through
    /// their terminating newline. Returns `None` when no complete value is
    /// available yet.
    pub fn pop_frame(&mut self) -> Option<Bytes> {
        loop {
            self.skip_leading_whitespace();

            let first = *self.buf.first()?;
            if first != b'{' && first != b'[' {
                if !self.drop_noise_line() {
                    return None;
                }
                continue;
            }

            match scan_balanced(&self.buf) {
                Some(end) => {
                    let frame = self.buf.split_to(end + 1).freeze();
                    self.stall_warned = false;
                    return Some(frame);
                }
                None => {
                    if self.buf.len() > self.warn_bytes && !self.stall_warned {
                        warn!(
                            buffered = self.buf.len(),
                            "frame reader buffer growing without a complete frame"
                        );
                        self.stall_warned = true;
                    }
                    return None;
                }
            }
        }
    }

    fn skip_leading_whitespace(&mut self) {
        let skip = self
            .buf
            .iter()
            .take_while(|b| matches!(b, b' ' | b'\t' | b'\r' | b'\n'))
            .count();
        if skip > 0 {
            let _ = self.buf.split_to(skip);
        }
    }

    /// Drop one noise line. Returns `true` if bytes were removed and the
    /// scan should retry, `false` if the caller must wait for more input.
    fn drop_noise_line(&mut self) -> bool {
        match self.buf.iter().position(|&b| b == b'\n') {
            Some(nl) => {
                let _ = self.buf.split_to(nl + 1);
                true
            }
            None if self.buf.len() > self.noise_limit => {
                warn!(
                    discarded = self.buf.len(),
                    "unterminated non-JSON prefix exceeded limit, discarding buffer"
                );
                self.buf.clear();
                false
            }
            None => false,
        }
    }
}

/// Scan `buf` (which starts with `{` or `[`) for the index of the byte that
/// returns nesting depth to zero. Backslash escapes are honored only inside
/// string literals.
fn scan_balanced(buf: &[u8]) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in buf.iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }

        match b {
            b'"' => in_string = true,
            b'{' | b'[' => depth += 1,
            b'}' | b']' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }

    None
}

// ── Tests ─────────────────────────────────────────────────────────────────────
