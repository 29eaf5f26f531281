//! Pipeline - One automatic disk read, start to finish
//!
//! `Idle -> ProbingDrive -> CapturingFlux -> ScoringFormats -> WritingImage -> Done`
//!
//! Any stage may end the run in `Failed`. Transitions only move forward and
//! nothing is retried; a new read needs a new [`Pipeline`].

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use super::{
    candidates, DriveId, DriveProber, FluxCapturer, FormatId, FormatScorer,
    DEFAULT_CONFIDENCE_THRESHOLD, DEFAULT_CRC_PENALTY, DEFAULT_DRIVES, DEFAULT_FORMATS,
    DEFAULT_REVOLUTIONS,
};
use crate::progress::ProgressSink;
use crate::report::{ImageArtifact, RunReport};
use crate::tool::{null_device, CancelToken, FluxTool, Invocation, ToolError};

/// Stage of a pipeline run
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Idle,
    ProbingDrive,
    CapturingFlux,
    ScoringFormats,
    WritingImage,
    Done,
    Failed,
}

impl PipelineState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineState::Done | PipelineState::Failed)
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineState::Idle => "Idle",
            PipelineState::ProbingDrive => "Probing drive",
            PipelineState::CapturingFlux => "Capturing flux",
            PipelineState::ScoringFormats => "Scoring formats",
            PipelineState::WritingImage => "Writing image",
            PipelineState::Done => "Done",
            PipelineState::Failed => "Failed",
        };
        f.write_str(name)
    }
}

/// Why a run ended in `Failed`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    InvalidOutputName,
    DriveNotFound,
    CaptureFailed,
    FormatNotDetected,
    WriteFailed,
    Cancelled,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            FailureKind::InvalidOutputName => "invalid output file name",
            FailureKind::DriveNotFound => "no drive found",
            FailureKind::CaptureFailed => "flux capture failed",
            FailureKind::FormatNotDetected => "format not detected",
            FailureKind::WriteFailed => "writing the image failed",
            FailureKind::Cancelled => "cancelled",
        };
        f.write_str(text)
    }
}

/// Rejected output file names
#[derive(Debug, Error, PartialEq, Eq)]
pub enum OutputNameError {
    #[error("file name is empty")]
    Empty,
    #[error("'{0}' must be a plain file name, not a path")]
    NotPlain(String),
    #[error("'{0}' is used for the run's working files")]
    Reserved(String),
}

/// Everything a run needs besides the tool itself
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Drive candidates, probed in order
    pub drives: Vec<DriveId>,
    /// Format candidates, scored in order
    pub formats: Vec<FormatId>,
    /// Directory holding the flux capture, temp image and final image
    pub dump_dir: PathBuf,
    pub flux_file: String,
    pub temp_image: String,
    pub discard_target: PathBuf,
    pub revolutions: u32,
    pub require_clean_capture: bool,
    pub crc_penalty: f64,
    pub confidence_threshold: f64,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            drives: candidates(DEFAULT_DRIVES),
            formats: candidates(DEFAULT_FORMATS),
            dump_dir: PathBuf::from("dumps"),
            flux_file: "auto.scp".to_string(),
            temp_image: "temp.img".to_string(),
            discard_target: null_device(),
            revolutions: DEFAULT_REVOLUTIONS,
            require_clean_capture: true,
            crc_penalty: DEFAULT_CRC_PENALTY,
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
        }
    }
}

impl PipelineSettings {
    pub fn flux_path(&self) -> PathBuf {
        self.dump_dir.join(&self.flux_file)
    }

    pub fn temp_image_path(&self) -> PathBuf {
        self.dump_dir.join(&self.temp_image)
    }

    /// Final image path for a user-supplied file name
    pub fn output_path(&self, name: &str) -> Result<PathBuf, OutputNameError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(OutputNameError::Empty);
        }

        let plain = Path::new(name)
            .file_name()
            .is_some_and(|f| f == name && name != "." && name != "..");
        if !plain || name.contains(['/', '\\']) {
            return Err(OutputNameError::NotPlain(name.to_string()));
        }
        // The final write must not clobber its own flux input
        if name == self.flux_file || name == self.temp_image {
            return Err(OutputNameError::Reserved(name.to_string()));
        }

        Ok(self.dump_dir.join(name))
    }

    pub fn prober<'a>(&'a self, tool: &'a dyn FluxTool) -> DriveProber<'a> {
        DriveProber::new(tool, &self.drives).with_discard_target(&self.discard_target)
    }

    pub fn capturer<'a>(&'a self, tool: &'a dyn FluxTool) -> FluxCapturer<'a> {
        FluxCapturer::new(tool, self.flux_path())
            .revolutions(self.revolutions)
            .require_clean(self.require_clean_capture)
    }

    pub fn scorer<'a>(&'a self, tool: &'a dyn FluxTool) -> FormatScorer<'a> {
        FormatScorer::new(tool, &self.formats, self.temp_image_path())
            .crc_penalty(self.crc_penalty)
            .confidence_threshold(self.confidence_threshold)
    }
}

/// A single automatic read: probe, capture, score, write
pub struct Pipeline<'a> {
    tool: &'a dyn FluxTool,
    settings: &'a PipelineSettings,
    cancel: CancelToken,
    state: PipelineState,
}

impl<'a> Pipeline<'a> {
    pub fn new(tool: &'a dyn FluxTool, settings: &'a PipelineSettings) -> Self {
        Self {
            tool,
            settings,
            cancel: CancelToken::new(),
            state: PipelineState::Idle,
        }
    }

    /// Token checked between stages; share it with the tool to also stop
    /// a running invocation
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Run every stage, reporting progress as it happens
    ///
    /// Never returns an error: the report's `state` is `Done` or `Failed`,
    /// with `failure` saying why.
    pub fn run(mut self, output_name: &str, progress: &dyn ProgressSink) -> RunReport {
        let mut report = RunReport::begin(output_name);

        let failure = self.execute(output_name, progress, &mut report).err();
        if let Some(kind) = failure {
            warn!("Run failed in {}: {}", self.state, kind);
            self.advance(PipelineState::Failed);
        }

        report.finish(self.state, failure);
        report
    }

    fn execute(
        &mut self,
        output_name: &str,
        progress: &dyn ProgressSink,
        report: &mut RunReport,
    ) -> Result<(), FailureKind> {
        progress.emit("=== AUTOMATIC DISK READ STARTED ===");

        let output_path = self.settings.output_path(output_name).map_err(|e| {
            progress.emit(&format!("Invalid output name: {}", e));
            FailureKind::InvalidOutputName
        })?;

        self.enter(PipelineState::ProbingDrive, progress)?;
        let drive = self
            .settings
            .prober(self.tool)
            .find_drive(progress)
            .map_err(|e| cancelled(e, progress))?
            .ok_or(FailureKind::DriveNotFound)?;
        report.drive = Some(drive.clone());

        self.enter(PipelineState::CapturingFlux, progress)?;
        let flux = self
            .settings
            .capturer(self.tool)
            .capture_flux(&drive, progress)
            .map_err(|e| {
                if e.is_cancellation() {
                    progress.emit("Run cancelled.");
                    FailureKind::Cancelled
                } else {
                    progress.emit(&format!("Flux capture failed: {}", e));
                    FailureKind::CaptureFailed
                }
            })?;
        report.flux = Some(flux.clone());

        self.enter(PipelineState::ScoringFormats, progress)?;
        let detection = self
            .settings
            .scorer(self.tool)
            .detect_format(&flux, progress)
            .map_err(|e| cancelled(e, progress))?;
        let Some(detection) = detection else {
            progress.emit("Format not detected.");
            return Err(FailureKind::FormatNotDetected);
        };
        progress.emit(&format!("[4/4] Best format: {}", detection.format()));
        report.detection = Some(detection.clone());

        self.enter(PipelineState::WritingImage, progress)?;
        progress.emit("Writing final image...");
        self.write_image(&flux.path, &output_path, detection.format(), progress)?;

        match ImageArtifact::fingerprint(&output_path) {
            Ok(image) => report.image = Some(image),
            Err(e) => warn!("Could not fingerprint {}: {:#}", output_path.display(), e),
        }

        self.advance(PipelineState::Done);
        progress.emit("=== DONE ===");
        Ok(())
    }

    fn write_image(
        &self,
        flux: &Path,
        output: &Path,
        format: &FormatId,
        progress: &dyn ProgressSink,
    ) -> Result<(), FailureKind> {
        let invocation = Invocation::convert(flux, output, format.as_str());
        let result = self.tool.stream(&invocation).and_then(|mut stream| {
            for line in stream.by_ref() {
                progress.emit(&line);
            }
            stream.wait()
        });

        match result {
            Ok(exit) if exit.success => Ok(()),
            Ok(exit) => {
                progress.emit(&format!("Writing image failed: tool ended with {}", exit));
                Err(FailureKind::WriteFailed)
            }
            Err(e) if e.is_cancellation() => Err(cancelled(e, progress)),
            Err(e) => {
                progress.emit(&format!("Writing image failed: {}", e));
                Err(FailureKind::WriteFailed)
            }
        }
    }

    /// Move into `next` unless the run has been cancelled
    fn enter(&mut self, next: PipelineState, progress: &dyn ProgressSink) -> Result<(), FailureKind> {
        if self.cancel.is_cancelled() {
            progress.emit("Run cancelled.");
            return Err(FailureKind::Cancelled);
        }
        self.advance(next);
        Ok(())
    }

    fn advance(&mut self, next: PipelineState) {
        debug_assert!(
            next > self.state && !self.state.is_terminal(),
            "illegal transition {} -> {}",
            self.state,
            next
        );
        info!("Pipeline: {} -> {}", self.state, next);
        self.state = next;
    }
}

fn cancelled(error: ToolError, progress: &dyn ProgressSink) -> FailureKind {
    warn!("Stage interrupted: {}", error);
    progress.emit("Run cancelled.");
    FailureKind::Cancelled
}
