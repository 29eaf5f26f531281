use std::ops::ControlFlow;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::scoring::{parse_score, BestCandidate, ScoreResult};
use super::{FluxCapture, FormatId, DEFAULT_CONFIDENCE_THRESHOLD, DEFAULT_CRC_PENALTY};
use crate::progress::ProgressSink;
use crate::tool::{FluxTool, Invocation, ToolError};

/// Outcome of a successful format scan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Detection {
    /// A candidate reached the confidence threshold and ended the scan
    Confident { format: FormatId, score: ScoreResult },
    /// Every candidate was tried; this one scored highest
    Best(BestCandidate),
}

impl Detection {
    pub fn format(&self) -> &FormatId {
        match self {
            Detection::Confident { format, .. } => format,
            Detection::Best(best) => &best.format,
        }
    }

    pub fn adjusted_score(&self) -> f64 {
        match self {
            Detection::Confident { score, .. } => score.adjusted_score,
            Detection::Best(best) => best.adjusted_score,
        }
    }

    pub fn is_confident(&self) -> bool {
        matches!(self, Detection::Confident { .. })
    }
}

enum Halt {
    Confident(FormatId, ScoreResult),
    Interrupted(ToolError),
}

/// Converts one flux capture against each candidate format and picks the best
pub struct FormatScorer<'a> {
    tool: &'a dyn FluxTool,
    formats: &'a [FormatId],
    temp_image: PathBuf,
    crc_penalty: f64,
    threshold: f64,
}

impl<'a> FormatScorer<'a> {
    pub fn new(tool: &'a dyn FluxTool, formats: &'a [FormatId], temp_image: impl Into<PathBuf>) -> Self {
        Self {
            tool,
            formats,
            temp_image: temp_image.into(),
            crc_penalty: DEFAULT_CRC_PENALTY,
            threshold: DEFAULT_CONFIDENCE_THRESHOLD,
        }
    }

    pub fn crc_penalty(mut self, penalty: f64) -> Self {
        self.crc_penalty = penalty;
        self
    }

    pub fn confidence_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    /// Scan candidates in order
    ///
    /// Stops at the first candidate whose raw score reaches the threshold.
    /// Otherwise returns the strictly-highest adjusted score, earliest
    /// candidate on ties, or `None` if nothing scored above zero. Candidates
    /// whose conversion could not run are skipped; cancellation aborts.
    pub fn detect_format(
        &self,
        flux: &FluxCapture,
        progress: &dyn ProgressSink,
    ) -> Result<Option<Detection>, ToolError> {
        progress.emit("[3/4] Testing formats...");

        let flow = self.formats.iter().try_fold(None, |best, format| {
            match self.score_candidate(flux, format, progress) {
                Ok(Some(score)) => {
                    let best = BestCandidate::offer(best, format, &score);
                    if score.is_confident(self.threshold) {
                        ControlFlow::Break(Halt::Confident(format.clone(), score))
                    } else {
                        ControlFlow::Continue(best)
                    }
                }
                Ok(None) => ControlFlow::Continue(best),
                Err(e) if e.is_cancellation() => ControlFlow::Break(Halt::Interrupted(e)),
                Err(e) => {
                    warn!("Conversion with {} did not run: {}", format, e);
                    progress.emit(&format!("Format {} skipped: {}", format, e));
                    ControlFlow::Continue(best)
                }
            }
        });

        match flow {
            ControlFlow::Continue(best) => Ok(best.map(Detection::Best)),
            ControlFlow::Break(Halt::Confident(format, score)) => {
                progress.emit("Very confident match, stopping search.");
                Ok(Some(Detection::Confident { format, score }))
            }
            ControlFlow::Break(Halt::Interrupted(e)) => Err(e),
        }
    }

    fn score_candidate(
        &self,
        flux: &FluxCapture,
        format: &FormatId,
        progress: &dyn ProgressSink,
    ) -> Result<Option<ScoreResult>, ToolError> {
        progress.emit(&format!("Trying format: {}", format));

        let invocation = Invocation::convert(&flux.path, &self.temp_image, format.as_str());
        let output = self.tool.run(&invocation)?;
        for line in output.text.lines() {
            progress.emit(line);
        }

        let score = parse_score(&output.text, self.crc_penalty);
        match &score {
            Some(s) => progress.emit(&format!("Score: {:.3}", s.adjusted_score)),
            None => debug!("No sector count for {}", format),
        }
        Ok(score)
    }
}
