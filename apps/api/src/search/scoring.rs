//! Score enhancement for code search results.
//!
//! Raw cosine similarities from the embedding index sit in a narrow band
//! (roughly 0.3–0.9 for real queries), which makes a relevant and an
//! irrelevant hit look nearly identical to API consumers. This module
//! recalibrates them:
//!
//! 1. Normalize the raw score against `[raw_low, raw_high]` and clamp to [0, 1].
//! 2. Apply a power-law exponent (< 1 spreads the high end apart).
//! 3. Add a bounded boost when the query matches the candidate's code or
//!    description exactly, as a substring, or by word overlap (Jaccard).
//!
//! Everything here is pure and deterministic.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ScoringError {
    #[error("invalid score calibration: {0}")]
    InvalidCalibration(String),
}

/// Calibration parameters for `enhance`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreCalibration {
    /// Raw similarity mapped to 0.0.
    pub raw_low: f64,
    /// Raw similarity mapped to 1.0.
    pub raw_high: f64,
    pub exponent: f64,
    /// Boost for an exact code or description match.
    pub exact_match_boost: f64,
    /// Boost when the query is a substring of a description.
    pub partial_match_boost: f64,
    /// Multiplier on the Jaccard overlap.
    pub keyword_boost_weight: f64,
    /// Cap on the combined boost.
    pub max_total_boost: f64,
}

impl Default for ScoreCalibration {
    fn default() -> Self {
        Self {
            raw_low: 0.30,
            raw_high: 0.90,
            exponent: 0.5,
            exact_match_boost: 0.15,
            partial_match_boost: 0.075,
            keyword_boost_weight: 0.10,
            max_total_boost: 0.25,
        }
    }
}

impl ScoreCalibration {
    /// Calibration used for keyword-mode results, whose raw score is already a
    /// [0, 1] overlap ratio.
    pub fn lexical(&self) -> Self {
        Self {
            raw_low: 0.0,
            raw_high: 1.0,
            exponent: 1.0,
            ..*self
        }
    }

    pub fn validate(&self) -> Result<(), ScoringError> {
        let fields = [
            ("raw_low", self.raw_low),
            ("raw_high", self.raw_high),
            ("exponent", self.exponent),
            ("exact_match_boost", self.exact_match_boost),
            ("partial_match_boost", self.partial_match_boost),
            ("keyword_boost_weight", self.keyword_boost_weight),
            ("max_total_boost", self.max_total_boost),
        ];
        for (name, value) in fields {
            if !value.is_finite() {
                return Err(ScoringError::InvalidCalibration(format!(
                    "{name} must be finite"
                )));
            }
        }
        if self.raw_low >= self.raw_high {
            return Err(ScoringError::InvalidCalibration(format!(
                "raw_low ({}) must be below raw_high ({})",
                self.raw_low, self.raw_high
            )));
        }
        if self.exponent <= 0.0 {
            return Err(ScoringError::InvalidCalibration(
                "exponent must be positive".to_string(),
            ));
        }
        for (name, value) in &fields[3..] {
            if !(0.0..=1.0).contains(value) {
                return Err(ScoringError::InvalidCalibration(format!(
                    "{name} must be within [0, 1]"
                )));
            }
        }
        Ok(())
    }
}

/// The fields of a code row that scoring looks at.
#[derive(Debug, Clone, Copy)]
pub struct ScoringCandidate<'a> {
    pub code: &'a str,
    pub short_description: &'a str,
    pub long_description: &'a str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    ExactCode,
    ExactDescription,
    DescriptionContainsQuery,
    None,
}

/// Per-result explanation, returned to callers when `explain=true`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub raw: f64,
    pub calibrated: f64,
    pub exact_boost: f64,
    pub keyword_boost: f64,
    pub keyword_overlap: f64,
    pub match_kind: MatchKind,
    pub final_score: f64,
}

const STOPWORDS: &[&str] = &[
    "an", "and", "are", "as", "at", "be", "by", "for", "from", "in", "into", "is", "it", "of",
    "on", "or", "the", "to", "with",
];

/// Maps a raw similarity into [0, 1]. Monotonic non-decreasing in `raw`.
/// Non-finite input scores 0.0.
pub fn calibrate(raw: f64, cal: &ScoreCalibration) -> f64 {
    if !raw.is_finite() {
        return 0.0;
    }
    let normalized = ((raw - cal.raw_low) / (cal.raw_high - cal.raw_low)).clamp(0.0, 1.0);
    normalized.powf(cal.exponent).clamp(0.0, 1.0)
}

/// Lowercased word set. Dots inside a token are kept so `E11.9` survives intact.
pub fn tokenize(text: &str) -> BTreeSet<String> {
    text.to_lowercase()
        .split(|c: char| !(c.is_alphanumeric() || c == '.'))
        .map(|t| t.trim_matches('.'))
        .filter(|t| t.chars().count() >= 2 && !STOPWORDS.contains(t))
        .map(str::to_string)
        .collect()
}

/// Jaccard similarity of the two word sets. 0.0 when either side is empty.
pub fn keyword_overlap(query: &str, candidate_text: &str) -> f64 {
    let q = tokenize(query);
    let c = tokenize(candidate_text);
    if q.is_empty() || c.is_empty() {
        return 0.0;
    }
    let intersection = q.intersection(&c).count();
    let union = q.union(&c).count();
    intersection as f64 / union as f64
}

/// Canonical code form: `e11.9` / `E11 9` / `E11-9` → `E119`.
pub fn normalize_code(s: &str) -> String {
    s.chars()
        .filter(|c| !(c.is_whitespace() || *c == '.' || *c == '-'))
        .flat_map(char::to_uppercase)
        .collect()
}

pub fn detect_match(query: &str, candidate: &ScoringCandidate<'_>) -> MatchKind {
    let normalized_query = normalize_code(query);
    if !normalized_query.is_empty() && normalized_query == normalize_code(candidate.code) {
        return MatchKind::ExactCode;
    }

    let q = query.trim().to_lowercase();
    if q.is_empty() {
        return MatchKind::None;
    }
    let descriptions = [
        candidate.short_description.trim().to_lowercase(),
        candidate.long_description.trim().to_lowercase(),
    ];
    if descriptions.iter().any(|d| *d == q) {
        return MatchKind::ExactDescription;
    }
    if q.chars().count() >= 3 && descriptions.iter().any(|d| d.contains(&q)) {
        return MatchKind::DescriptionContainsQuery;
    }
    MatchKind::None
}

fn best_overlap(query: &str, candidate: &ScoringCandidate<'_>) -> f64 {
    keyword_overlap(query, candidate.short_description)
        .max(keyword_overlap(query, candidate.long_description))
}

/// Recalibrates one semantic hit and applies the match boosts.
pub fn enhance(
    raw: f64,
    query: &str,
    candidate: &ScoringCandidate<'_>,
    cal: &ScoreCalibration,
) -> ScoreBreakdown {
    let calibrated = calibrate(raw, cal);
    let match_kind = detect_match(query, candidate);
    let exact_boost = match match_kind {
        MatchKind::ExactCode | MatchKind::ExactDescription => cal.exact_match_boost,
        MatchKind::DescriptionContainsQuery => cal.partial_match_boost,
        MatchKind::None => 0.0,
    };
    let keyword_overlap = best_overlap(query, candidate);
    let keyword_boost = cal.keyword_boost_weight * keyword_overlap;
    let boost = (exact_boost + keyword_boost).min(cal.max_total_boost);

    ScoreBreakdown {
        raw: if raw.is_finite() { raw } else { 0.0 },
        calibrated,
        exact_boost,
        keyword_boost,
        keyword_overlap,
        match_kind,
        final_score: (calibrated + boost).clamp(0.0, 1.0),
    }
}

/// Scores a keyword-mode hit, which has no embedding similarity to start from.
/// The raw score is 1.0 for an exact code match, else the best description overlap.
pub fn lexical_score(
    query: &str,
    candidate: &ScoringCandidate<'_>,
    cal: &ScoreCalibration,
) -> ScoreBreakdown {
    let raw = if detect_match(query, candidate) == MatchKind::ExactCode {
        1.0
    } else {
        best_overlap(query, candidate)
    };
    enhance(raw, query, candidate, &cal.lexical())
}

/// Orders results by final score desc, then raw desc, then code asc.
pub fn rank<T, F>(items: &mut [T], key: F)
where
    F: Fn(&T) -> (&ScoreBreakdown, &str),
{
    items.sort_by(|a, b| {
        let (sa, ca) = key(a);
        let (sb, cb) = key(b);
        sb.final_score
            .total_cmp(&sa.final_score)
            .then_with(|| sb.raw.total_cmp(&sa.raw))
            .then_with(|| ca.cmp(cb))
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    const DIABETES: ScoringCandidate<'static> = ScoringCandidate {
        code: "E11.9",
        short_description: "Type 2 diabetes mellitus without complications",
        long_description: "Type 2 diabetes mellitus without complications",
    };

    const HYPERTENSION: ScoringCandidate<'static> = ScoringCandidate {
        code: "I10",
        short_description: "Essential hypertension",
        long_description: "Essential (primary) hypertension",
    };

    #[test]
    fn test_calibrate_bounds() {
        let cal = ScoreCalibration::default();
        assert_eq!(calibrate(0.30, &cal), 0.0);
        assert_eq!(calibrate(0.90, &cal), 1.0);
        assert_eq!(calibrate(0.10, &cal), 0.0);
        assert_eq!(calibrate(0.99, &cal), 1.0);
    }

    #[test]
    fn test_calibrate_power_law_spreads_high_end() {
        let cal = ScoreCalibration::default();
        // (0.75 - 0.3) / 0.6 = 0.75, sqrt → 0.866
        let score = calibrate(0.75, &cal);
        assert!((score - 0.75_f64.sqrt()).abs() < 1e-9, "Score was {score}");
        assert!(score > 0.75);
    }

    #[test]
    fn test_calibrate_non_finite_is_zero() {
        let cal = ScoreCalibration::default();
        assert_eq!(calibrate(f64::NAN, &cal), 0.0);
        assert_eq!(calibrate(f64::INFINITY, &cal), 0.0);
    }

    #[test]
    fn test_calibrate_monotonic() {
        let cal = ScoreCalibration::default();
        let mut previous = -1.0;
        for i in 0..=100 {
            let raw = i as f64 / 100.0;
            let score = calibrate(raw, &cal);
            assert!(score >= previous, "calibrate not monotonic at {raw}");
            previous = score;
        }
    }

    #[test]
    fn test_enhance_monotonic_for_fixed_query() {
        let cal = ScoreCalibration::default();
        let mut previous = -1.0;
        for i in 0..=100 {
            let raw = i as f64 / 100.0;
            let score = enhance(raw, "diabetes", &DIABETES, &cal).final_score;
            assert!(score >= previous, "enhance not monotonic at {raw}");
            previous = score;
        }
    }

    #[test]
    fn test_final_score_bounded() {
        let cal = ScoreCalibration {
            max_total_boost: 1.0,
            exact_match_boost: 1.0,
            ..Default::default()
        };
        for raw in [-5.0, 0.0, 0.5, 0.95, 3.0] {
            let b = enhance(raw, "E11.9", &DIABETES, &cal);
            assert!((0.0..=1.0).contains(&b.final_score), "{b:?}");
        }
    }

    #[test]
    fn test_tokenize_keeps_code_dots_and_drops_stopwords() {
        let tokens = tokenize("Type 2 diabetes of the E11.9, (primary)");
        assert!(tokens.contains("e11.9"));
        assert!(tokens.contains("diabetes"));
        assert!(tokens.contains("primary"));
        assert!(!tokens.contains("of"));
        assert!(!tokens.contains("the"));
        assert!(!tokens.contains("2"));
    }

    #[test]
    fn test_keyword_overlap_jaccard() {
        // {type, diabetes} vs {type, diabetes, mellitus, without, complications}
        let overlap = keyword_overlap("type 2 diabetes", DIABETES.short_description);
        assert!((overlap - 0.4).abs() < 1e-9, "Overlap was {overlap}");
    }

    #[test]
    fn test_keyword_overlap_empty_sides() {
        assert_eq!(keyword_overlap("", "essential hypertension"), 0.0);
        assert_eq!(keyword_overlap("the of", "essential hypertension"), 0.0);
        assert_eq!(keyword_overlap("hypertension", ""), 0.0);
    }

    #[test]
    fn test_normalize_code() {
        assert_eq!(normalize_code("e11.9"), "E119");
        assert_eq!(normalize_code(" E11 9 "), "E119");
        assert_eq!(normalize_code("99213"), "99213");
    }

    #[test]
    fn test_detect_match_kinds() {
        assert_eq!(detect_match("e119", &DIABETES), MatchKind::ExactCode);
        assert_eq!(
            detect_match("essential hypertension", &HYPERTENSION),
            MatchKind::ExactDescription
        );
        assert_eq!(
            detect_match("diabetes mellitus", &DIABETES),
            MatchKind::DescriptionContainsQuery
        );
        assert_eq!(detect_match("asthma", &DIABETES), MatchKind::None);
        // Two-character queries do not count as substring matches
        assert_eq!(detect_match("ty", &DIABETES), MatchKind::None);
        assert_eq!(detect_match("   ", &DIABETES), MatchKind::None);
    }

    #[test]
    fn test_exact_code_match_outranks_same_raw_score() {
        let cal = ScoreCalibration::default();
        let matched = enhance(0.6, "E11.9", &DIABETES, &cal);
        let unmatched = enhance(0.6, "E11.9", &HYPERTENSION, &cal);
        assert_eq!(matched.match_kind, MatchKind::ExactCode);
        assert!(matched.final_score > unmatched.final_score);
        assert!((matched.exact_boost - cal.exact_match_boost).abs() < f64::EPSILON);
    }

    #[test]
    fn test_boost_is_capped() {
        let cal = ScoreCalibration {
            exact_match_boost: 0.5,
            keyword_boost_weight: 0.5,
            max_total_boost: 0.2,
            ..Default::default()
        };
        let b = enhance(0.3, "essential hypertension", &HYPERTENSION, &cal);
        assert_eq!(b.calibrated, 0.0);
        assert!((b.final_score - 0.2).abs() < 1e-9, "{b:?}");
    }

    #[test]
    fn test_partial_and_keyword_boost_combined() {
        let cal = ScoreCalibration::default();
        let b = enhance(0.3, "type 2 diabetes", &DIABETES, &cal);
        assert_eq!(b.match_kind, MatchKind::DescriptionContainsQuery);
        // 0.075 partial + 0.1 * 0.4 overlap
        assert!((b.final_score - 0.115).abs() < 1e-9, "{b:?}");
    }

    #[test]
    fn test_lexical_score_exact_code_is_top() {
        let cal = ScoreCalibration::default();
        let exact = lexical_score("I10", &HYPERTENSION, &cal);
        let fuzzy = lexical_score("hypertension", &HYPERTENSION, &cal);
        assert_eq!(exact.raw, 1.0);
        assert_eq!(exact.final_score, 1.0);
        assert!(fuzzy.raw < 1.0);
        assert!(fuzzy.final_score < exact.final_score);
        assert!(fuzzy.final_score > 0.0);
    }

    #[test]
    fn test_rank_orders_by_final_then_raw_then_code() {
        let cal = ScoreCalibration::default();
        let mut items = vec![
            ("B", enhance(0.5, "x", &HYPERTENSION, &cal)),
            ("A", enhance(0.5, "x", &HYPERTENSION, &cal)),
            ("C", enhance(0.8, "x", &HYPERTENSION, &cal)),
        ];
        rank(&mut items, |(code, b)| (b, *code));
        let codes: Vec<_> = items.iter().map(|(c, _)| *c).collect();
        assert_eq!(codes, vec!["C", "A", "B"]);
    }

    #[test]
    fn test_validate_rejects_bad_configs() {
        assert!(ScoreCalibration::default().validate().is_ok());
        let inverted = ScoreCalibration {
            raw_low: 0.9,
            raw_high: 0.3,
            ..Default::default()
        };
        assert!(inverted.validate().is_err());
        let zero_exp = ScoreCalibration {
            exponent: 0.0,
            ..Default::default()
        };
        assert!(zero_exp.validate().is_err());
        let big_boost = ScoreCalibration {
            exact_match_boost: 1.5,
            ..Default::default()
        };
        assert!(big_boost.validate().is_err());
        let nan = ScoreCalibration {
            raw_low: f64::NAN,
            ..Default::default()
        };
        assert!(nan.validate().is_err());
    }
}
