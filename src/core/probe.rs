use std::path::PathBuf;

use tracing::{debug, warn};

use super::DriveId;
use crate::progress::ProgressSink;
use crate::tool::{null_device, FluxTool, Invocation, ToolError};

/// Tool output markers meaning "nothing answered on this drive select"
const NO_RESPONSE_MARKERS: &[&str] = &["No Index", "Track 0 not found"];

/// Finds the first drive that responds to a zero-revolution read
pub struct DriveProber<'a> {
    tool: &'a dyn FluxTool,
    drives: &'a [DriveId],
    discard_target: PathBuf,
}

impl<'a> DriveProber<'a> {
    pub fn new(tool: &'a dyn FluxTool, drives: &'a [DriveId]) -> Self {
        Self {
            tool,
            drives,
            discard_target: null_device(),
        }
    }

    pub fn with_discard_target(mut self, target: impl Into<PathBuf>) -> Self {
        self.discard_target = target.into();
        self
    }

    /// Probe candidates in order; the first responding drive wins
    ///
    /// An invocation that cannot run counts as "no response". Only
    /// cancellation aborts the scan.
    pub fn find_drive(&self, progress: &dyn ProgressSink) -> Result<Option<DriveId>, ToolError> {
        progress.emit("[1/4] Searching for drive...");

        for drive in self.drives {
            progress.emit(&format!("Trying drive {}...", drive));

            let invocation = Invocation::probe(drive.as_str(), &self.discard_target);
            let responded = match self.tool.run(&invocation) {
                Ok(output) => drive_responded(&output.text),
                Err(e) if e.is_cancellation() => return Err(e),
                Err(e) => {
                    warn!("Probe of drive {} did not run: {}", drive, e);
                    false
                }
            };

            if responded {
                progress.emit(&format!("Drive {} OK", drive));
                return Ok(Some(drive.clone()));
            }

            debug!("Drive {} gave no response", drive);
            progress.emit("No drive response.");
        }

        progress.emit("No drive found.");
        Ok(None)
    }
}

/// Whether probe output shows a drive is present
pub fn drive_responded(output: &str) -> bool {
    !NO_RESPONSE_MARKERS.iter().any(|m| output.contains(m))
}
