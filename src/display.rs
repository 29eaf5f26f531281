//! Display - Terminal presentation of progress lines
//!
//! Provides:
//! - Color tagging of progress lines by their wording
//! - A presenter that drains the worker's channel on a fixed interval

use std::time::Duration;

use colored::Colorize;
use crossbeam_channel::Receiver;
use tokio::task::{JoinError, JoinHandle};

/// How often the presenter drains pending lines
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Status indicators
pub struct StatusIcons;

impl StatusIcons {
    pub const SUCCESS: &'static str = "✓";
    pub const ERROR: &'static str = "✗";
    pub const WARNING: &'static str = "⚠";
    pub const DISK: &'static str = "💾";
}

/// Visual category of a progress line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineTag {
    Ok,
    Error,
    Accent,
    Plain,
}

/// Tag a line from its text
pub fn classify(line: &str) -> LineTag {
    let lower = line.to_lowercase();
    if line.contains("OK") {
        LineTag::Ok
    } else if line.contains('❌') || lower.contains("not") || lower.contains("failed") {
        LineTag::Error
    } else if line.contains("[3/4]") || line.contains("Trying") {
        LineTag::Accent
    } else {
        LineTag::Plain
    }
}

/// Colorize a line according to its tag
pub fn render(line: &str) -> String {
    match classify(line) {
        LineTag::Ok => line.green().to_string(),
        LineTag::Error => line.red().to_string(),
        LineTag::Accent => line.cyan().to_string(),
        LineTag::Plain => line.to_string(),
    }
}

/// Prints progress lines produced by a background run
pub struct Presenter {
    rx: Receiver<String>,
    to_stderr: bool,
}

impl Presenter {
    pub fn new(rx: Receiver<String>) -> Self {
        Self {
            rx,
            to_stderr: false,
        }
    }

    /// Send lines to stderr, keeping stdout for machine-readable output
    pub fn to_stderr(mut self, to_stderr: bool) -> Self {
        self.to_stderr = to_stderr;
        self
    }

    /// Print everything currently queued; returns how many lines
    pub fn drain(&self) -> usize {
        let mut count = 0;
        for line in self.rx.try_iter() {
            let line = render(&line);
            if self.to_stderr {
                eprintln!("{}", line);
            } else {
                println!("{}", line);
            }
            count += 1;
        }
        count
    }

    /// Keep draining until the worker finishes, then return its result
    pub async fn follow<T>(&self, handle: JoinHandle<T>) -> Result<T, JoinError> {
        let mut tick = tokio::time::interval(POLL_INTERVAL);
        loop {
            tick.tick().await;
            self.drain();
            if handle.is_finished() {
                let result = handle.await;
                self.drain();
                return result;
            }
        }
    }
}
