//! Flux Drill Library
//!
//! Automatic extraction of disk images from unknown floppy media through an
//! external flux-capture/conversion tool. The library drives the tool and
//! interprets its text output; it never decodes flux itself.
//!
//! # Features
//!
//! - **Drive Probing**: Tries each drive selector until one answers
//! - **Single Capture**: Flux is read once and scored against many formats
//! - **Confidence Scoring**: Sector ratio minus a CRC penalty, early exit on a clean match
//! - **Cancellable**: Every tool invocation honours a cancel token and timeout
//! - **Run Reports**: JSON reports with a Blake3 fingerprint of the image
//!
//! # Example
//!
//! ```no_run
//! use flux_drill::core::{Pipeline, PipelineSettings};
//! use flux_drill::progress::ProgressLog;
//! use flux_drill::tool::ProcessTool;
//!
//! let tool = ProcessTool::new("gw");
//! let settings = PipelineSettings::default();
//! let log = ProgressLog::new();
//!
//! let report = Pipeline::new(&tool, &settings).run("disk.img", &log);
//! println!("{} -> {:?}", report.output_name, report.state);
//! ```

pub mod cli;
pub mod config;
pub mod core;
pub mod display;
pub mod progress;
pub mod report;
pub mod tool;
pub mod worker;

// Re-export commonly used types
pub use config::Config;
pub use crate::core::{
    parse_score, Detection, DriveId, FailureKind, FluxCapture, FormatId, Pipeline,
    PipelineSettings, PipelineState, ScoreResult,
};
pub use progress::{ProgressLog, ProgressSink};
pub use report::{format_report, ImageArtifact, RunReport};
pub use tool::{CancelToken, FluxTool, Invocation, ProcessTool, ToolError, ToolOutput};
pub use worker::{spawn_run, RunRequest, RunSlot};
