//! Progress module - Line-oriented progress delivery from the worker
//!
//! The pipeline only needs an "emit this line" capability. Implementations
//! must not block the worker: the channel sink is unbounded and the
//! presenter drains it on its own schedule.

use crossbeam_channel::Sender;
use parking_lot::Mutex;

/// Receives progress text lines, in the order operations occur
pub trait ProgressSink: Send + Sync {
    fn emit(&self, line: &str);
}

impl ProgressSink for Sender<String> {
    fn emit(&self, line: &str) {
        // The presenter may already be gone; progress is best-effort.
        let _ = self.send(line.to_string());
    }
}

impl<F> ProgressSink for F
where
    F: Fn(&str) + Send + Sync,
{
    fn emit(&self, line: &str) {
        self(line)
    }
}

impl<S: ProgressSink + ?Sized> ProgressSink for std::sync::Arc<S> {
    fn emit(&self, line: &str) {
        (**self).emit(line)
    }
}

/// Sink that keeps every line in memory
#[derive(Debug, Default)]
pub struct ProgressLog {
    lines: Mutex<Vec<String>>,
}

impl ProgressLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().clone()
    }

    /// Whether any recorded line contains `needle`
    pub fn contains(&self, needle: &str) -> bool {
        self.lines.lock().iter().any(|l| l.contains(needle))
    }

    pub fn len(&self) -> usize {
        self.lines.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.lock().is_empty()
    }
}

impl ProgressSink for ProgressLog {
    fn emit(&self, line: &str) {
        self.lines.lock().push(line.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_sink_preserves_order() {
        let (tx, rx) = crossbeam_channel::unbounded();
        tx.emit("first");
        tx.emit("second");
        assert_eq!(rx.try_iter().collect::<Vec<_>>(), vec!["first", "second"]);
    }

    #[test]
    fn test_channel_sink_survives_dropped_receiver() {
        let (tx, rx) = crossbeam_channel::unbounded::<String>();
        drop(rx);
        tx.emit("nobody listening");
    }

    #[test]
    fn test_progress_log() {
        let log = ProgressLog::new();
        assert!(log.is_empty());
        log.emit("Trying drive A...");
        log.emit("Drive A OK");
        assert_eq!(log.len(), 2);
        assert!(log.contains("A OK"));
        assert!(!log.contains("B OK"));
    }

    #[test]
    fn test_closure_sink() {
        let seen = Mutex::new(Vec::new());
        let sink = |line: &str| seen.lock().push(line.len());
        sink.emit("abc");
        assert_eq!(*seen.lock(), vec![3]);
    }
}
