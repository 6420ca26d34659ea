//! Bounded scrollback buffer backing `capturePane`.

use std::collections::VecDeque;
use std::sync::Mutex;

use crate::cleanup::fold_carriage_returns;

/// A byte ring buffer capped at `max_bytes`, capturable by line count.
///
/// Modeled on the ring-buffered output streams the rest of the corpus uses
/// for per-session output (a bounded `VecDeque` trimmed from the front),
/// specialized here to raw bytes since capture callers choose whether to
/// ANSI-strip.
pub struct Scrollback {
    buffer: Mutex<VecDeque<u8>>,
    max_bytes: usize,
}

impl Scrollback {
    pub fn new(max_bytes: usize) -> Self {
        Self {
            buffer: Mutex::new(VecDeque::with_capacity(max_bytes.min(1 << 20))),
            max_bytes,
        }
    }

    pub fn push(&self, chunk: &[u8]) {
        let mut buf = self.buffer.lock().unwrap();
        buf.extend(chunk.iter().copied());
        let overflow = buf.len().saturating_sub(self.max_bytes);
        if overflow > 0 {
            buf.drain(..overflow);
        }
    }

    /// Returns the last `lines` lines of scrollback, CR-folded, ANSI
    /// preserved (callers strip ANSI themselves when they need to).
    pub fn capture(&self, lines: usize) -> String {
        let buf = self.buffer.lock().unwrap();
        let raw: Vec<u8> = buf.iter().copied().collect();
        drop(buf);

        let text = String::from_utf8_lossy(&raw);
        let folded = fold_carriage_returns(&text);
        let all_lines: Vec<&str> = folded.split('\n').collect();
        let start = all_lines.len().saturating_sub(lines);
        all_lines[start..].join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caps_to_max_bytes() {
        let sb = Scrollback::new(8);
        sb.push(b"0123456789");
        let captured = sb.capture(10);
        assert_eq!(captured.len(), 8);
        assert_eq!(captured, "23456789");
    }

    #[test]
    fn captures_last_n_lines() {
        let sb = Scrollback::new(1024);
        sb.push(b"one\ntwo\nthree\nfour");
        assert_eq!(sb.capture(2), "three\nfour");
    }
}
