//! Tool module - Invocation of the external flux-capture/conversion tool
//!
//! The tool is a black box driven through its command line:
//! - `read <target> --drive=<id> --revs=<n>` probes a drive or captures flux
//! - `convert <flux> <image> --format=<fmt>` decodes flux against a format
//!
//! Two invocation modes are provided. [`FluxTool::stream`] yields combined
//! stdout/stderr lines as they arrive; [`FluxTool::run`] collects the same
//! stream into one text blob. Either way no output is dropped or reordered.

mod cancel;
mod process;

pub use cancel::CancelToken;
pub use process::ProcessTool;

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

// ============================================================================
// Command Contract
// ============================================================================

/// Subcommands of the external tool this crate relies on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subcommand {
    /// Read from a drive (probe or flux capture)
    Read,
    /// Convert a flux file into an image
    Convert,
}

impl Subcommand {
    pub fn as_str(&self) -> &'static str {
        match self {
            Subcommand::Read => "read",
            Subcommand::Convert => "convert",
        }
    }
}

impl fmt::Display for Subcommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single invocation of the external tool: subcommand plus arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub subcommand: Subcommand,
    pub args: Vec<String>,
}

impl Invocation {
    pub fn new(subcommand: Subcommand, args: Vec<String>) -> Self {
        Self { subcommand, args }
    }

    /// Zero-revolution read used to check whether a drive responds
    pub fn probe(drive: &str, discard_target: &Path) -> Self {
        Self::read(discard_target, drive, 0)
    }

    /// Multi-revolution flux read into `target`
    pub fn read(target: &Path, drive: &str, revolutions: u32) -> Self {
        Self::new(
            Subcommand::Read,
            vec![
                target.to_string_lossy().into_owned(),
                format!("--drive={}", drive),
                format!("--revs={}", revolutions),
            ],
        )
    }

    /// Conversion of a flux file into an image using a format profile
    pub fn convert(flux: &Path, image: &Path, format: &str) -> Self {
        Self::new(
            Subcommand::Convert,
            vec![
                flux.to_string_lossy().into_owned(),
                image.to_string_lossy().into_owned(),
                format!("--format={}", format),
            ],
        )
    }

    /// Full argument vector as passed to the tool binary
    pub fn argv(&self) -> Vec<String> {
        let mut argv = Vec::with_capacity(self.args.len() + 1);
        argv.push(self.subcommand.as_str().to_string());
        argv.extend(self.args.iter().cloned());
        argv
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.argv().join(" "))
    }
}

// ============================================================================
// Results
// ============================================================================

/// How the tool process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToolExit {
    /// Exit code, if the process exited normally
    pub code: Option<i32>,
    /// Whether the process reported success
    pub success: bool,
}

impl ToolExit {
    pub fn ok() -> Self {
        Self {
            code: Some(0),
            success: true,
        }
    }

    pub fn failed(code: i32) -> Self {
        Self {
            code: Some(code),
            success: false,
        }
    }
}

impl From<std::process::ExitStatus> for ToolExit {
    fn from(status: std::process::ExitStatus) -> Self {
        Self {
            code: status.code(),
            success: status.success(),
        }
    }
}

impl fmt::Display for ToolExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "exit code {}", code),
            None => write!(f, "terminated by signal"),
        }
    }
}

/// Captured output of a blocking invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutput {
    /// Combined stdout+stderr, in arrival order, one line per `\n`
    pub text: String,
    pub exit: ToolExit,
}

/// Execution-level failures (the tool never ran, or was interrupted)
///
/// A tool that ran and printed "No Index" is not an error; that is
/// interpreted by the caller from [`ToolOutput::text`].
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error while talking to the tool: {0}")]
    Io(#[from] std::io::Error),

    #[error("invocation cancelled")]
    Cancelled,

    #[error("invocation timed out after {0:?}")]
    TimedOut(Duration),
}

impl ToolError {
    /// Whether the whole run should stop rather than move to the next candidate
    pub fn is_cancellation(&self) -> bool {
        matches!(self, ToolError::Cancelled)
    }
}

// ============================================================================
// Streaming
// ============================================================================

type Waiter = Box<dyn FnOnce() -> Result<ToolExit, ToolError> + Send>;

/// Lazy sequence of output lines from a running invocation
///
/// Iterate it to receive lines as the tool prints them, then call
/// [`ToolStream::wait`] to collect the process outcome. `wait` drains
/// anything left unread first.
pub struct ToolStream {
    lines: Box<dyn Iterator<Item = String> + Send>,
    waiter: Waiter,
}

impl ToolStream {
    pub fn new<I, W>(lines: I, waiter: W) -> Self
    where
        I: Iterator<Item = String> + Send + 'static,
        W: FnOnce() -> Result<ToolExit, ToolError> + Send + 'static,
    {
        Self {
            lines: Box::new(lines),
            waiter: Box::new(waiter),
        }
    }

    /// A stream over already-known lines that ends with `exit`
    pub fn from_lines(lines: Vec<String>, exit: ToolExit) -> Self {
        Self::new(lines.into_iter(), move || Ok(exit))
    }

    /// Wait for the process to finish
    pub fn wait(mut self) -> Result<ToolExit, ToolError> {
        for _ in self.lines.by_ref() {}
        (self.waiter)()
    }
}

impl Iterator for ToolStream {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        self.lines.next()
    }
}

/// The external tool, seen through its command line
pub trait FluxTool: Send + Sync {
    /// Start an invocation and stream its combined output line by line
    fn stream(&self, invocation: &Invocation) -> Result<ToolStream, ToolError>;

    /// Run an invocation to completion and return its combined output
    fn run(&self, invocation: &Invocation) -> Result<ToolOutput, ToolError> {
        let mut stream = self.stream(invocation)?;
        let mut text = String::new();
        for line in stream.by_ref() {
            text.push_str(&line);
            text.push('\n');
        }
        let exit = stream.wait()?;
        Ok(ToolOutput { text, exit })
    }
}

impl<T: FluxTool + ?Sized> FluxTool for std::sync::Arc<T> {
    fn stream(&self, invocation: &Invocation) -> Result<ToolStream, ToolError> {
        (**self).stream(invocation)
    }

    fn run(&self, invocation: &Invocation) -> Result<ToolOutput, ToolError> {
        (**self).run(invocation)
    }
}

/// Platform null device used as the discard target for probes
pub fn null_device() -> PathBuf {
    if cfg!(windows) {
        PathBuf::from("NUL")
    } else {
        PathBuf::from("/dev/null")
    }
}
