//! Core module - Drive detection, flux capture and format scoring
//!
//! Leaf-first: [`DriveProber`] finds a responding drive, [`FluxCapturer`]
//! reads its flux once, [`FormatScorer`] converts that flux against every
//! candidate format, and [`Pipeline`] sequences the stages into a run.

mod capture;
mod detect;
mod pipeline;
mod probe;
mod scoring;

pub use capture::{CaptureError, FluxCapturer};
pub use detect::{Detection, FormatScorer};
pub use pipeline::{FailureKind, Pipeline, PipelineSettings, PipelineState};
pub use probe::DriveProber;
pub use scoring::{parse_score, select_best, BestCandidate, ScoreResult};

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Drive selector passed verbatim to the tool's `--drive=` option
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DriveId(String);

impl DriveId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DriveId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DriveId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Disk format profile name passed to the tool's `--format=` option
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FormatId(String);

impl FormatId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FormatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FormatId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Drive candidates, in probing order
pub const DEFAULT_DRIVES: &[&str] = &["A", "B", "0", "1", "2"];

/// Format candidates, in scoring order (earlier wins ties)
pub const DEFAULT_FORMATS: &[&str] = &[
    "ibm.1440",
    "ibm.720",
    "ibm.1200",
    "ibm.360",
    "atarist.720",
    "amiga.amigados",
];

/// Revolutions per track requested when capturing flux
pub const DEFAULT_REVOLUTIONS: u32 = 5;

/// Score deduction per CRC error reported by a conversion
pub const DEFAULT_CRC_PENALTY: f64 = 0.01;

/// Raw score at or above which a format is accepted without looking further
pub const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.98;

/// The flux capture artifact of a run
///
/// Produced once by [`FluxCapturer`] and reused, unchanged, for every format
/// candidate and for the final conversion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FluxCapture {
    pub path: PathBuf,
    pub revolutions: u32,
    /// Drive the flux was read from (`None` for an existing file)
    pub drive: Option<DriveId>,
}

impl FluxCapture {
    /// Wrap a flux file captured earlier, outside this run
    pub fn existing(path: impl Into<PathBuf>, revolutions: u32) -> Self {
        Self {
            path: path.into(),
            revolutions,
            drive: None,
        }
    }

    /// Size of the artifact on disk, if it exists
    pub fn size_on_disk(&self) -> Option<u64> {
        std::fs::metadata(&self.path).ok().map(|m| m.len())
    }
}

/// Turn a configured list of strings into typed candidates
pub fn candidates<T: From<&'static str>>(list: &[&'static str]) -> Vec<T> {
    list.iter().copied().map(T::from).collect()
}
