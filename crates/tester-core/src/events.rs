//! Event sink for protocol narration
//!
//! The link loop narrates what it does (packet dumps, handler lines, warnings)
//! through an [`EventSink`]. A log viewer only needs text lines plus the two
//! compaction signals: one for a repeated packet and one for a file write
//! that continues the previous one.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

/// Lines kept by a [`LogBuffer`] before the oldest are dropped.
pub const LOG_BUFFER_LINES: usize = 1024;

pub trait EventSink: Send + Sync {
    /// One line of narration.
    fn line(&self, text: &str);

    /// Something went wrong but the session carries on.
    fn warning(&self, text: &str) {
        self.line(&format!("Warning: {text}"));
    }

    /// The last packet was received again.
    fn repeated(&self);

    /// Another chunk was appended to the file being written.
    fn still_writing(&self);
}

/// Forwards everything to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn line(&self, text: &str) {
        info!("{}", text);
    }

    fn warning(&self, text: &str) {
        warn!("{}", text);
    }

    fn repeated(&self) {
        debug!("Last message repeated");
    }

    fn still_writing(&self) {
        debug!("Still writing file");
    }
}

/// Bounded in-memory log for a viewer, with counters for the two signals.
#[derive(Debug, Default)]
pub struct LogBuffer {
    lines: Mutex<VecDeque<String>>,
    repeats: AtomicUsize,
    writes: AtomicUsize,
}

impl LogBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the retained lines, oldest first.
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().iter().cloned().collect()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.lines.lock().iter().any(|l| l.contains(needle))
    }

    pub fn repeat_count(&self) -> usize {
        self.repeats.load(Ordering::SeqCst)
    }

    pub fn still_writing_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn clear(&self) {
        self.lines.lock().clear();
        self.repeats.store(0, Ordering::SeqCst);
        self.writes.store(0, Ordering::SeqCst);
    }
}

impl EventSink for LogBuffer {
    fn line(&self, text: &str) {
        let mut lines = self.lines.lock();
        if lines.len() == LOG_BUFFER_LINES {
            lines.pop_front();
        }
        lines.push_back(text.to_string());
    }

    fn repeated(&self) {
        self.repeats.fetch_add(1, Ordering::SeqCst);
    }

    fn still_writing(&self) {
        self.writes.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_drops_oldest_lines() {
        let log = LogBuffer::new();
        for i in 0..LOG_BUFFER_LINES + 5 {
            log.line(&format!("line {i}"));
        }
        let lines = log.lines();
        assert_eq!(lines.len(), LOG_BUFFER_LINES);
        assert_eq!(lines[0], "line 5");
    }

    #[test]
    fn warnings_are_prefixed() {
        let log = LogBuffer::new();
        log.warning("no file open");
        assert_eq!(log.lines(), vec!["Warning: no file open".to_string()]);
    }

    #[test]
    fn signals_are_counted() {
        let log = LogBuffer::new();
        log.repeated();
        log.repeated();
        log.still_writing();
        assert_eq!(log.repeat_count(), 2);
        assert_eq!(log.still_writing_count(), 1);
        log.clear();
        assert_eq!(log.repeat_count(), 0);
    }
}
