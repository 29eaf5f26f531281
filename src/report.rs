//! Report module - What a run did and what it produced
//!
//! Every run yields a [`RunReport`], successful or not. The final image is
//! fingerprinted with Blake3 so a later copy can be checked against it.

use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::{Detection, DriveId, FailureKind, FluxCapture, PipelineState};

/// Current report format version
pub const REPORT_VERSION: u32 = 1;

/// Tool identification string
pub const TOOL_NAME: &str = "Flux Drill";

/// Summary of one pipeline run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub version: u32,
    pub tool: String,
    pub tool_version: String,
    pub run_id: Uuid,
    /// user@host that ran the read
    pub operator: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// File name the user asked for
    pub output_name: String,
    pub state: PipelineState,
    pub failure: Option<FailureKind>,
    pub drive: Option<DriveId>,
    pub flux: Option<FluxCapture>,
    pub detection: Option<Detection>,
    pub image: Option<ImageArtifact>,
}

impl RunReport {
    /// Start a report for a run that is about to begin
    pub fn begin(output_name: &str) -> Self {
        Self {
            version: REPORT_VERSION,
            tool: TOOL_NAME.to_string(),
            tool_version: env!("CARGO_PKG_VERSION").to_string(),
            run_id: Uuid::new_v4(),
            operator: operator(),
            started_at: Utc::now(),
            finished_at: None,
            output_name: output_name.to_string(),
            state: PipelineState::Idle,
            failure: None,
            drive: None,
            flux: None,
            detection: None,
            image: None,
        }
    }

    pub fn finish(&mut self, state: PipelineState, failure: Option<FailureKind>) {
        self.state = state;
        self.failure = failure;
        self.finished_at = Some(Utc::now());
    }

    pub fn succeeded(&self) -> bool {
        self.state == PipelineState::Done
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("Failed to serialize report")?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write report: {}", path.display()))?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read report: {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse report: {}", path.display()))
    }
}

/// The final image written by a successful run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageArtifact {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub blake3: String,
}

impl ImageArtifact {
    pub fn fingerprint(path: &Path) -> Result<Self> {
        let mut file = std::fs::File::open(path)
            .with_context(|| format!("Failed to open {}", path.display()))?;

        let mut hasher = blake3::Hasher::new();
        let mut buffer = vec![0u8; 64 * 1024];
        let mut size_bytes = 0u64;

        loop {
            let bytes_read = file.read(&mut buffer)?;
            if bytes_read == 0 {
                break;
            }
            size_bytes += bytes_read as u64;
            hasher.update(&buffer[..bytes_read]);
        }

        Ok(Self {
            path: path.to_path_buf(),
            size_bytes,
            blake3: hasher.finalize().to_hex().to_string(),
        })
    }
}

fn operator() -> String {
    let hostname = hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown".to_string());
    format!("{}@{}", whoami::username(), hostname)
}

/// Format a report for human display
pub fn format_report(report: &RunReport) -> String {
    let mut out = String::new();

    out.push_str(&format!("\n  {} Run Report\n", TOOL_NAME));
    out.push_str("  ==========================================\n\n");

    match report.failure {
        None if report.succeeded() => out.push_str("  READ SUCCEEDED\n\n"),
        None => out.push_str(&format!("  STOPPED IN {}\n\n", report.state)),
        Some(kind) => out.push_str(&format!("  READ FAILED: {}\n\n", kind)),
    }

    out.push_str(&format!("  Run:            {}\n", report.run_id));
    out.push_str(&format!("  Operator:       {}\n", report.operator));
    if let Some(drive) = &report.drive {
        out.push_str(&format!("  Drive:          {}\n", drive));
    }
    if let Some(flux) = &report.flux {
        out.push_str(&format!(
            "  Flux:           {} ({} revs)\n",
            flux.path.display(),
            flux.revolutions
        ));
    }
    if let Some(detection) = &report.detection {
        out.push_str(&format!(
            "  Format:         {} (score {:.3}{})\n",
            detection.format(),
            detection.adjusted_score(),
            if detection.is_confident() {
                ", confident"
            } else {
                ""
            }
        ));
    }
    if let Some(image) = &report.image {
        out.push_str(&format!("  Image:          {}\n", image.path.display()));
        out.push_str(&format!(
            "  Size:           {}\n",
            humansize::format_size(image.size_bytes, humansize::BINARY)
        ));
        out.push_str(&format!("  Blake3:         {}\n", image.blake3));
    }
    if let Some(finished) = report.finished_at {
        let took = finished - report.started_at;
        out.push_str(&format!(
            "  Duration:       {:.1}s\n",
            took.num_milliseconds() as f64 / 1000.0
        ));
    }

    out
}
