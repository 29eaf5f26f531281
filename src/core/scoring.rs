//! Scoring - Interpretation of conversion output
//!
//! The tool reports decode statistics as free text. Everything that depends
//! on the exact wording lives here, behind [`parse_score`].

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::FormatId;

static SECTORS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Found (\d+) sectors of (\d+)").expect("static pattern"));

static CRC: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+) CRC").expect("static pattern"));

/// Decode statistics of one format candidate
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreResult {
    pub found_sectors: u32,
    pub total_sectors: u32,
    pub crc_errors: u32,
    /// `found / total`, in [0, 1]
    pub raw_score: f64,
    /// `raw_score` minus the CRC penalty, clamped to [0, raw_score]
    pub adjusted_score: f64,
}

impl ScoreResult {
    /// Score from counts. `None` when `total` is zero.
    pub fn from_counts(found: u32, total: u32, crc_errors: u32, crc_penalty: f64) -> Option<Self> {
        if total == 0 {
            return None;
        }

        let raw_score = (f64::from(found) / f64::from(total)).min(1.0);
        let adjusted_score = (raw_score - f64::from(crc_errors) * crc_penalty)
            .max(0.0)
            .min(raw_score);

        Some(Self {
            found_sectors: found,
            total_sectors: total,
            crc_errors,
            raw_score,
            adjusted_score,
        })
    }

    /// Whether this candidate is good enough to stop searching
    pub fn is_confident(&self, threshold: f64) -> bool {
        self.raw_score >= threshold
    }
}

/// Extract a score from the combined output of a conversion
///
/// Returns `None` when the output has no "Found N sectors of M" line (the
/// format did not match), or reports zero total sectors. A missing CRC count
/// means zero CRC errors.
pub fn parse_score(text: &str, crc_penalty: f64) -> Option<ScoreResult> {
    let caps = SECTORS.captures(text)?;
    let found: u32 = caps[1].parse().ok()?;
    let total: u32 = caps[2].parse().ok()?;

    let crc_errors = CRC
        .captures(text)
        .and_then(|c| c[1].parse::<u32>().ok())
        .unwrap_or(0);

    if total == 0 {
        tracing::debug!("Tool reported 0 total sectors; treating as no match");
    }

    ScoreResult::from_counts(found, total, crc_errors, crc_penalty)
}

/// Running best format during a scan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BestCandidate {
    pub format: FormatId,
    pub adjusted_score: f64,
}

impl BestCandidate {
    /// Fold step: replace `best` only if `score` is strictly higher
    ///
    /// The starting bar is 0.0, so a candidate scoring exactly zero never
    /// becomes the best. Equal scores keep the earlier candidate.
    pub fn offer(best: Option<Self>, format: &FormatId, score: &ScoreResult) -> Option<Self> {
        let bar = best.as_ref().map_or(0.0, |b| b.adjusted_score);
        if score.adjusted_score > bar {
            Some(Self {
                format: format.clone(),
                adjusted_score: score.adjusted_score,
            })
        } else {
            best
        }
    }
}

/// Best candidate of an already-scored, ordered list
pub fn select_best<I>(scored: I) -> Option<BestCandidate>
where
    I: IntoIterator<Item = (FormatId, ScoreResult)>,
{
    scored
        .into_iter()
        .fold(None, |best, (format, score)| BestCandidate::offer(best, &format, &score))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const PENALTY: f64 = 0.01;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-4
    }

    #[test]
    fn test_perfect_read() {
        let score = parse_score("Found 18 sectors of 18\n", PENALTY).unwrap();
        assert_eq!(score.found_sectors, 18);
        assert_eq!(score.crc_errors, 0);
        assert_eq!(score.raw_score, 1.0);
        assert_eq!(score.adjusted_score, 1.0);
        assert!(score.is_confident(0.98));
    }

    #[test]
    fn test_partial_read_with_crc_errors() {
        let text = "T0.0: IBM MFM (18/18 sectors)\nFound 17 sectors of 18\n3 CRC errors\n";
        let score = parse_score(text, PENALTY).unwrap();
        assert!(approx(score.raw_score, 0.9444));
        assert!(approx(score.adjusted_score, 0.9144));
        assert_eq!(score.crc_errors, 3);
        assert!(!score.is_confident(0.98));
    }

    #[test]
    fn test_no_sector_line_is_no_match() {
        assert!(parse_score("Unknown format\n12 CRC\n", PENALTY).is_none());
        assert!(parse_score("", PENALTY).is_none());
    }

    #[test]
    fn test_zero_total_is_no_match() {
        assert!(parse_score("Found 0 sectors of 0", PENALTY).is_none());
    }

    #[test]
    fn test_found_above_total_is_capped() {
        let score = parse_score("Found 20 sectors of 18", PENALTY).unwrap();
        assert_eq!(score.raw_score, 1.0);
    }

    #[test]
    fn test_penalty_cannot_go_negative() {
        let score = parse_score("Found 2 sectors of 18\n500 CRC", PENALTY).unwrap();
        assert_eq!(score.adjusted_score, 0.0);
    }

    #[test]
    fn test_first_occurrence_wins() {
        let text = "Found 9 sectors of 18\nFound 18 sectors of 18\n";
        assert_eq!(parse_score(text, PENALTY).unwrap().found_sectors, 9);
    }

    #[test]
    fn test_tie_keeps_earlier_candidate() {
        let same = ScoreResult::from_counts(9, 18, 0, PENALTY).unwrap();
        let best = select_best(vec![
            (FormatId::from("ibm.720"), same),
            (FormatId::from("atarist.720"), same),
        ])
        .unwrap();
        assert_eq!(best.format.as_str(), "ibm.720");
    }

    #[test]
    fn test_higher_later_candidate_wins() {
        let low = ScoreResult::from_counts(5, 18, 0, PENALTY).unwrap();
        let high = ScoreResult::from_counts(15, 18, 0, PENALTY).unwrap();
        let best = select_best(vec![
            (FormatId::from("ibm.1440"), low),
            (FormatId::from("ibm.720"), high),
        ])
        .unwrap();
        assert_eq!(best.format.as_str(), "ibm.720");
    }

    #[test]
    fn test_zero_scores_select_nothing() {
        let zero = ScoreResult::from_counts(0, 18, 0, PENALTY).unwrap();
        assert!(select_best(vec![(FormatId::from("ibm.1440"), zero)]).is_none());
        assert!(select_best(Vec::new()).is_none());
    }

    proptest! {
        #[test]
        fn prop_raw_score_in_unit_interval(total in 1u32..10_000, frac in 0.0f64..=1.0) {
            let found = (f64::from(total) * frac) as u32;
            let s = ScoreResult::from_counts(found, total, 0, PENALTY).unwrap();
            prop_assert!((0.0..=1.0).contains(&s.raw_score));
        }

        #[test]
        fn prop_adjusted_within_raw(total in 1u32..10_000, found in 0u32..10_000, crc in 0u32..1_000) {
            let found = found.min(total);
            let s = ScoreResult::from_counts(found, total, crc, PENALTY).unwrap();
            prop_assert!(s.adjusted_score >= 0.0);
            prop_assert!(s.adjusted_score <= s.raw_score);
        }

        #[test]
        fn prop_parsing_is_idempotent(found in 0u32..100, total in 1u32..100, crc in 0u32..50) {
            let text = format!("Found {} sectors of {}\n{} CRC\n", found, total, crc);
            prop_assert_eq!(parse_score(&text, PENALTY), parse_score(&text, PENALTY));
        }
    }
}
