//! Risk Adjustment Factor from HCC-mapped diagnosis codes.
//!
//! Within a hierarchy only the most severe category counts: when a dominant
//! HCC is present, the HCCs it outranks are dropped before summing.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::cdi::analyzer::VerifiedCode;

/// `(dominant, dropped)` pairs.
const HCC_HIERARCHIES: &[(u32, &[u32])] = &[
    // Diabetes
    (17, &[18, 19]),
    (18, &[19]),
    // Metastatic and other cancers
    (8, &[9, 10, 11, 12]),
    (9, &[10, 11, 12]),
    (10, &[11, 12]),
    (11, &[12]),
    // Chronic kidney disease
    (134, &[135, 136, 137, 138]),
    (135, &[136, 137, 138]),
    (136, &[137, 138]),
    (137, &[138]),
];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HccContribution {
    pub hcc: String,
    pub weight: f64,
    pub codes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RafResult {
    pub score: f64,
    pub hccs: Vec<HccContribution>,
    /// HCCs suppressed by a more severe category in the same hierarchy.
    pub dropped_hccs: Vec<String>,
}

/// Accepts `HCC18`, `hcc 18` or `18`.
pub fn parse_hcc(label: &str) -> Option<u32> {
    let trimmed = label.trim();
    let digits = match trimmed.get(..3) {
        Some(prefix) if prefix.eq_ignore_ascii_case("hcc") => trimmed[3..].trim_start(),
        _ => trimmed,
    };
    digits.parse().ok()
}

pub fn hcc_label(hcc: u32) -> String {
    format!("HCC{hcc}")
}

/// Sums the max weight per unique HCC over verified codes, after hierarchies.
pub fn compute_raf(codes: &[VerifiedCode]) -> RafResult {
    let mut by_hcc: BTreeMap<u32, (f64, Vec<String>)> = BTreeMap::new();
    for code in codes.iter().filter(|c| c.verified) {
        let (Some(hcc), Some(weight)) = (
            code.hcc_category.as_deref().and_then(parse_hcc),
            code.hcc_weight,
        ) else {
            continue;
        };
        let entry = by_hcc.entry(hcc).or_insert((0.0, Vec::new()));
        entry.0 = entry.0.max(weight);
        entry.1.push(code.code.clone());
    }

    let present: BTreeSet<u32> = by_hcc.keys().copied().collect();
    let dropped: BTreeSet<u32> = HCC_HIERARCHIES
        .iter()
        .filter(|(dominant, _)| present.contains(dominant))
        .flat_map(|(_, outranked)| outranked.iter().copied())
        .filter(|hcc| present.contains(hcc))
        .collect();

    let hccs: Vec<HccContribution> = by_hcc
        .into_iter()
        .filter(|(hcc, _)| !dropped.contains(hcc))
        .map(|(hcc, (weight, codes))| HccContribution {
            hcc: hcc_label(hcc),
            weight,
            codes,
        })
        .collect();

    let total: f64 = hccs.iter().map(|h| h.weight).sum();
    RafResult {
        score: (total * 1_000.0).round() / 1_000.0,
        hccs,
        dropped_hccs: dropped.into_iter().map(hcc_label).collect(),
    }
}
