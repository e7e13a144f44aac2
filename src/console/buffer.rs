//! Bounded ring buffer for console output.
//!
//! [`LogBuffer`] stores the most recent console lines from the game server.
//! When the buffer is full, the oldest lines are evicted first. Writers (the
//! output reader tasks) and readers (status pollers, the tunnel scanner)
//! share it behind a mutex; reads return point-in-time copies so callers
//! never hold the lock while working on the data.

use std::collections::VecDeque;

/// Ring buffer of console lines with FIFO eviction.
pub struct LogBuffer {
    lines: VecDeque<String>,
    max_lines: usize,
}

impl LogBuffer {
    /// Create a new buffer that holds at most `max_lines` lines.
    pub fn new(max_lines: usize) -> Self {
        Self {
            lines: VecDeque::with_capacity(max_lines.min(256)),
            max_lines,
        }
    }

    /// Append one line, evicting the oldest if full. Never fails.
    pub fn push(&mut self, line: String) {
        if self.lines.len() >= self.max_lines {
            self.lines.pop_front();
        }
        self.lines.push_back(line);
    }

    /// The current buffer content as a single newline-joined string.
    pub fn snapshot(&self) -> String {
        let mut out = String::new();
        for (i, line) in self.lines.iter().enumerate() {
            if i > 0 {
                out.push('\n');
            }
            out.push_str(line);
        }
        out
    }

    /// A point-in-time copy of the buffered lines, oldest first.
    pub fn lines(&self) -> Vec<String> {
        self.lines.iter().cloned().collect()
    }

    /// Drop all buffered lines (called on each server start).
    pub fn clear(&mut self) {
        self.lines.clear();
    }

    /// Number of lines currently buffered.
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_within_cap() {
        let mut buf = LogBuffer::new(3);
        buf.push("a".into());
        buf.push("b".into());
        assert_eq!(buf.len(), 2);
        assert_eq!(buf.snapshot(), "a\nb");
    }

    #[test]
    fn test_eviction_is_fifo() {
        let mut buf = LogBuffer::new(3);
        for line in ["one", "two", "three", "four", "five"] {
            buf.push(line.into());
        }
        assert_eq!(buf.len(), 3);
        assert_eq!(buf.lines(), vec!["three", "four", "five"]);
    }

    #[test]
    fn test_overfill_stays_bounded() {
        let mut buf = LogBuffer::new(10);
        for i in 0..1000 {
            buf.push(format!("line {i}"));
        }
        assert_eq!(buf.len(), 10);
        assert_eq!(buf.lines().first().unwrap(), "line 990");
        assert_eq!(buf.lines().last().unwrap(), "line 999");
    }

    #[test]
    fn test_clear() {
        let mut buf = LogBuffer::new(5);
        buf.push("x".into());
        buf.clear();
        assert!(buf.is_empty());
        assert_eq!(buf.snapshot(), "");
    }

    #[test]
    fn test_snapshot_is_a_copy() {
        let mut buf = LogBuffer::new(5);
        buf.push("before".into());
        let snap = buf.snapshot();
        buf.push("after".into());
        assert_eq!(snap, "before");
    }
}
