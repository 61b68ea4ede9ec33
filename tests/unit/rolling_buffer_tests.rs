//! Unit tests for the terminal rolling buffer byte cap.

use acp_conduit::terminal::RollingBuffer;

/// The window never exceeds the cap, whatever the push pattern.
#[test]
fn length_never_exceeds_the_cap() {
    let mut buf = RollingBuffer::new(100);
    for i in 0..50usize {
        let chunk = vec![b'a' + (i % 26) as u8; 1 + (i * 7) % 40];
        buf.push(&chunk);
        assert!(buf.len() <= 100, "window exceeded cap after push {i}");
    }
    assert!(buf.truncated(), "total input far exceeds the cap");
}

/// The window holds exactly the most recent bytes.
#[test]
fn window_holds_the_tail_of_the_stream() {
    let mut buf = RollingBuffer::new(10);
    buf.push(b"0123456789");
    buf.push(b"abcde");
    assert_eq!(buf.snapshot(), "56789abcde");
}

/// The truncation latch stays set even after the buffer would fit again.
#[test]
fn truncation_latch_is_sticky() {
    let mut buf = RollingBuffer::new(4);
    buf.push(b"123456");
    assert!(buf.truncated());
    // Nothing un-truncates the window.
    buf.push(b"");
    assert!(buf.truncated());
}

/// A fresh buffer under the cap reports no truncation.
#[test]
fn no_truncation_until_cap_is_crossed() {
    let mut buf = RollingBuffer::new(1024);
    buf.push(&vec![b'x'; 1024]);
    assert!(!buf.truncated());
    buf.push(b"y");
    assert!(buf.truncated());
    assert_eq!(buf.len(), 1024);
}

#[test]
fn empty_buffer_reports_empty() {
    let buf = RollingBuffer::new(8);
    assert!(buf.is_empty());
    assert_eq!(buf.snapshot(), "");
}
