//! Subprocess-backed tool invocations
//!
//! stdout and stderr are read on two threads that feed a single channel, so
//! lines from both pipes are interleaved in the order they arrive.

use std::io::{BufRead, BufReader, Read};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use tracing::{debug, warn};

use super::{CancelToken, FluxTool, Invocation, ToolError, ToolExit, ToolStream};

/// How often a quiet invocation re-checks cancellation and its deadline
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Runs the external tool as a child process
#[derive(Debug, Clone)]
pub struct ProcessTool {
    program: PathBuf,
    timeout: Option<Duration>,
    cancel: CancelToken,
}

impl ProcessTool {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            timeout: None,
            cancel: CancelToken::new(),
        }
    }

    /// Kill any single invocation that runs longer than `timeout`
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }
}

impl FluxTool for ProcessTool {
    fn stream(&self, invocation: &Invocation) -> Result<ToolStream, ToolError> {
        if self.cancel.is_cancelled() {
            return Err(ToolError::Cancelled);
        }

        debug!(program = %self.program.display(), "Invoking: {}", invocation);

        let mut child = Command::new(&self.program)
            .args(invocation.argv())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| ToolError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        let (tx, rx) = crossbeam_channel::unbounded::<String>();
        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(spawn_reader(stdout, tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(spawn_reader(stderr, tx.clone()));
        }
        drop(tx);

        let child = Arc::new(Mutex::new(child));
        let interrupted = Arc::new(Mutex::new(None));
        let watch = Watch {
            cancel: self.cancel.clone(),
            deadline: self.timeout.map(|t| (Instant::now() + t, t)),
        };

        let lines = ProcessLines {
            rx,
            child: Arc::clone(&child),
            watch: watch.clone(),
            interrupted: Arc::clone(&interrupted),
            finished: false,
        };

        let waiter = move || {
            let mut interrupt = interrupted.lock().take();
            // A killed tool may leave children holding the pipes open, so
            // readers are only joined after a normal exit.
            if interrupt.is_none() {
                for reader in readers {
                    let _ = reader.join();
                }
            }

            // The tool may close its pipes and keep running
            loop {
                if let Some(status) = child.lock().try_wait()? {
                    return match interrupt {
                        Some(Interrupt::Cancelled) => Err(ToolError::Cancelled),
                        Some(Interrupt::TimedOut(after)) => Err(ToolError::TimedOut(after)),
                        None => Ok(ToolExit::from(status)),
                    };
                }
                if interrupt.is_none() {
                    if let Some(reason) = watch.tripped() {
                        kill(&child, reason);
                        interrupt = Some(reason);
                        continue;
                    }
                }
                thread::sleep(POLL_INTERVAL);
            }
        };

        Ok(ToolStream::new(lines, waiter))
    }
}

#[derive(Debug, Clone, Copy)]
enum Interrupt {
    Cancelled,
    TimedOut(Duration),
}

/// Cancellation and deadline of one invocation
#[derive(Clone)]
struct Watch {
    cancel: CancelToken,
    deadline: Option<(Instant, Duration)>,
}

impl Watch {
    fn tripped(&self) -> Option<Interrupt> {
        if self.cancel.is_cancelled() {
            return Some(Interrupt::Cancelled);
        }
        match self.deadline {
            Some((at, after)) if Instant::now() >= at => Some(Interrupt::TimedOut(after)),
            _ => None,
        }
    }
}

fn kill(child: &Mutex<Child>, reason: Interrupt) {
    warn!("Stopping tool process: {:?}", reason);
    if let Err(e) = child.lock().kill() {
        debug!("kill failed (process may have exited): {}", e);
    }
}

struct ProcessLines {
    rx: Receiver<String>,
    child: Arc<Mutex<Child>>,
    watch: Watch,
    interrupted: Arc<Mutex<Option<Interrupt>>>,
    finished: bool,
}

impl ProcessLines {
    fn interrupt(&mut self, reason: Interrupt) {
        kill(&self.child, reason);
        *self.interrupted.lock() = Some(reason);
        self.finished = true;
    }
}

impl Iterator for ProcessLines {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        while !self.finished {
            if let Some(reason) = self.watch.tripped() {
                self.interrupt(reason);
                break;
            }

            match self.rx.recv_timeout(POLL_INTERVAL) {
                Ok(line) => return Some(line),
                Err(RecvTimeoutError::Disconnected) => self.finished = true,
                Err(RecvTimeoutError::Timeout) => {}
            }
        }
        None
    }
}

fn spawn_reader<R: Read + Send + 'static>(pipe: R, tx: Sender<String>) -> JoinHandle<()> {
    thread::spawn(move || {
        let mut reader = BufReader::new(pipe);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf);
                    let line = line.trim_end_matches(['\n', '\r']).to_string();
                    if tx.send(line).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    debug!("pipe read failed: {}", e);
                    break;
                }
            }
        }
    })
}
