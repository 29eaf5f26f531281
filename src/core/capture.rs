use std::path::PathBuf;

use thiserror::Error;
use tracing::{info, warn};

use super::{DriveId, FluxCapture, DEFAULT_REVOLUTIONS};
use crate::progress::ProgressSink;
use crate::tool::{FluxTool, Invocation, ToolError, ToolExit};

/// Why a flux capture is unusable
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error(transparent)]
    Tool(#[from] ToolError),

    #[error("flux read ended with {0}")]
    Exit(ToolExit),

    #[error("flux file {} was not written", .0.display())]
    Missing(PathBuf),
}

impl CaptureError {
    pub fn is_cancellation(&self) -> bool {
        matches!(self, CaptureError::Tool(e) if e.is_cancellation())
    }
}

/// Reads flux from a drive into the run's single capture artifact
pub struct FluxCapturer<'a> {
    tool: &'a dyn FluxTool,
    path: PathBuf,
    revolutions: u32,
    require_clean: bool,
}

impl<'a> FluxCapturer<'a> {
    pub fn new(tool: &'a dyn FluxTool, path: impl Into<PathBuf>) -> Self {
        Self {
            tool,
            path: path.into(),
            revolutions: DEFAULT_REVOLUTIONS,
            require_clean: true,
        }
    }

    pub fn revolutions(mut self, revolutions: u32) -> Self {
        self.revolutions = revolutions;
        self
    }

    /// When false, a failed read is reported but the capture is still
    /// handed on, leaving format scoring to judge the flux.
    pub fn require_clean(mut self, require_clean: bool) -> Self {
        self.require_clean = require_clean;
        self
    }

    /// Capture flux from `drive`, forwarding every output line as it arrives
    pub fn capture_flux(
        &self,
        drive: &DriveId,
        progress: &dyn ProgressSink,
    ) -> Result<FluxCapture, CaptureError> {
        progress.emit("[2/4] Reading flux...");
        info!(
            "Capturing {} revolutions from drive {} into {}",
            self.revolutions,
            drive,
            self.path.display()
        );

        let capture = FluxCapture {
            path: self.path.clone(),
            revolutions: self.revolutions,
            drive: Some(drive.clone()),
        };

        match self.read(drive, progress) {
            Ok(()) => Ok(capture),
            Err(e) if e.is_cancellation() || self.require_clean => Err(e),
            Err(e) => {
                warn!("Continuing with questionable flux: {}", e);
                progress.emit(&format!("Flux read problem ({}), scoring anyway.", e));
                Ok(capture)
            }
        }
    }

    fn read(&self, drive: &DriveId, progress: &dyn ProgressSink) -> Result<(), CaptureError> {
        let invocation = Invocation::read(&self.path, drive.as_str(), self.revolutions);
        let mut stream = self.tool.stream(&invocation)?;
        for line in stream.by_ref() {
            progress.emit(&line);
        }

        let exit = stream.wait()?;
        if !exit.success {
            return Err(CaptureError::Exit(exit));
        }
        if !self.path.exists() {
            return Err(CaptureError::Missing(self.path.clone()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::ProgressLog;
    use crate::tool::ToolStream;
    use tempfile::tempdir;

    /// Streams fixed lines, optionally writing the target file like a real read
    struct FakeReader {
        lines: Vec<&'static str>,
        exit: ToolExit,
        write_target: bool,
    }

    impl FluxTool for FakeReader {
        fn stream(&self, inv: &Invocation) -> Result<ToolStream, ToolError> {
            if self.write_target {
                std::fs::write(&inv.args[0], b"SCP")?;
            }
            Ok(ToolStream::from_lines(
                self.lines.iter().map(|l| l.to_string()).collect(),
                self.exit,
            ))
        }
    }

    #[test]
    fn test_capture_forwards_lines_in_order() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("auto.scp");
        let tool = FakeReader {
            lines: vec!["Reading c=0-79 s=0-1 revs=5", "T0.0: 5 revs", "T0.1: 5 revs"],
            exit: ToolExit::ok(),
            write_target: true,
        };
        let log = ProgressLog::new();

        let flux = FluxCapturer::new(&tool, &path)
            .capture_flux(&DriveId::from("A"), &log)
            .unwrap();

        assert_eq!(flux.path, path);
        assert_eq!(flux.revolutions, 5);
        assert_eq!(flux.drive, Some(DriveId::from("A")));
        assert_eq!(
            log.lines(),
            vec![
                "[2/4] Reading flux...",
                "Reading c=0-79 s=0-1 revs=5",
                "T0.0: 5 revs",
                "T0.1: 5 revs"
            ]
        );
    }

    #[test]
    fn test_failed_exit_is_an_error_when_strict() {
        let dir = tempdir().unwrap();
        let tool = FakeReader {
            lines: vec!["Command Failed"],
            exit: ToolExit::failed(1),
            write_target: true,
        };
        let err = FluxCapturer::new(&tool, dir.path().join("auto.scp"))
            .capture_flux(&DriveId::from("A"), &ProgressLog::new())
            .unwrap_err();
        assert!(matches!(err, CaptureError::Exit(_)));
    }

    #[test]
    fn test_missing_file_is_an_error_when_strict() {
        let dir = tempdir().unwrap();
        let tool = FakeReader {
            lines: vec![],
            exit: ToolExit::ok(),
            write_target: false,
        };
        let err = FluxCapturer::new(&tool, dir.path().join("auto.scp"))
            .capture_flux(&DriveId::from("A"), &ProgressLog::new())
            .unwrap_err();
        assert!(matches!(err, CaptureError::Missing(_)));
    }

    #[test]
    fn test_lenient_capture_hands_on_flux() {
        let dir = tempdir().unwrap();
        let tool = FakeReader {
            lines: vec![],
            exit: ToolExit::failed(2),
            write_target: false,
        };
        let log = ProgressLog::new();
        let flux = FluxCapturer::new(&tool, dir.path().join("auto.scp"))
            .revolutions(3)
            .require_clean(false)
            .capture_flux(&DriveId::from("1"), &log)
            .unwrap();
        assert_eq!(flux.revolutions, 3);
        assert!(log.contains("scoring anyway"));
    }
}
