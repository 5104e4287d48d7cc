//! CDI note analysis: LLM review, code verification and RAF scoring.
//!
//! Flow: build prompt → LLM call_json → dedupe suggestions → verify each
//! against `medical_codes` → compute_raf.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tracing::{debug, info};

use crate::cdi::prompts::{build_cdi_prompt, CDI_SYSTEM};
use crate::cdi::raf::{compute_raf, RafResult};
use crate::errors::AppError;
use crate::llm_client::LlmClient;
use crate::models::code::{CodeSystem, MedicalCodeRow};
use crate::search::keyword::find_code;
use crate::search::scoring::normalize_code;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[serde(alias = "Low", alias = "LOW")]
    Low,
    #[default]
    #[serde(alias = "Medium", alias = "MEDIUM")]
    Medium,
    #[serde(alias = "High", alias = "HIGH")]
    High,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentationGap {
    pub category: String,
    pub description: String,
    pub provider_query: String,
    #[serde(default)]
    pub severity: Severity,
}

/// A code as proposed by the model, before verification.
#[derive(Debug, Clone, Deserialize)]
pub struct SuggestedCode {
    pub code: String,
    pub code_system: String,
    #[serde(default)]
    pub rationale: String,
    #[serde(default)]
    pub confidence: f64,
}

/// Raw model output.
#[derive(Debug, Clone, Deserialize)]
pub struct LlmCdiOutput {
    #[serde(default)]
    pub documentation_gaps: Vec<DocumentationGap>,
    #[serde(default)]
    pub suggested_codes: Vec<SuggestedCode>,
    #[serde(default)]
    pub summary: String,
}

/// A suggestion after lookup. Unverified codes never contribute to RAF.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerifiedCode {
    pub code: String,
    pub code_system: String,
    pub rationale: String,
    pub confidence: f64,
    pub verified: bool,
    pub description: Option<String>,
    pub hcc_category: Option<String>,
    pub hcc_weight: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CdiAnalysis {
    pub summary: String,
    pub documentation_gaps: Vec<DocumentationGap>,
    pub suggested_codes: Vec<VerifiedCode>,
    pub raf: RafResult,
}

impl CdiAnalysis {
    pub fn gap_count(&self) -> i32 {
        i32::try_from(self.documentation_gaps.len()).unwrap_or(i32::MAX)
    }
}

pub async fn analyze_note(
    pool: &PgPool,
    llm: &LlmClient,
    note_text: &str,
    encounter_type: Option<&str>,
) -> Result<CdiAnalysis, AppError> {
    let prompt = build_cdi_prompt(note_text, encounter_type);
    let output: LlmCdiOutput = llm
        .call_json(&prompt, CDI_SYSTEM)
        .await
        .map_err(|e| AppError::Llm(format!("CDI analysis failed: {e}")))?;
    debug!(
        "CDI model returned {} gaps and {} codes",
        output.documentation_gaps.len(),
        output.suggested_codes.len()
    );

    let mut suggested_codes = Vec::new();
    for suggestion in dedupe_suggestions(output.suggested_codes) {
        let row = match CodeSystem::parse(&suggestion.code_system) {
            Some(system) => find_code(pool, system, &suggestion.code).await?,
            None => None,
        };
        suggested_codes.push(verify_suggestion(suggestion, row));
    }

    let raf = compute_raf(&suggested_codes);
    info!(
        "CDI analysis: {} gaps, {}/{} codes verified, RAF {}",
        output.documentation_gaps.len(),
        suggested_codes.iter().filter(|c| c.verified).count(),
        suggested_codes.len(),
        raf.score
    );

    Ok(CdiAnalysis {
        summary: output.summary.trim().to_string(),
        documentation_gaps: output.documentation_gaps,
        suggested_codes,
        raf,
    })
}

/// Keeps the first suggestion per (system, normalized code).
fn dedupe_suggestions(suggestions: Vec<SuggestedCode>) -> Vec<SuggestedCode> {
    let mut seen = HashSet::new();
    suggestions
        .into_iter()
        .filter(|s| !s.code.trim().is_empty())
        .filter(|s| {
            seen.insert((
                s.code_system.trim().to_ascii_lowercase(),
                normalize_code(&s.code),
            ))
        })
        .collect()
}

fn verify_suggestion(suggestion: SuggestedCode, row: Option<MedicalCodeRow>) -> VerifiedCode {
    let confidence = if suggestion.confidence.is_finite() {
        suggestion.confidence.clamp(0.0, 1.0)
    } else {
        0.0
    };
    match row {
        Some(row) => VerifiedCode {
            code: row.code,
            code_system: row.code_system,
            rationale: suggestion.rationale,
            confidence,
            verified: true,
            description: Some(row.long_description),
            hcc_category: row.hcc_category,
            hcc_weight: row.hcc_weight,
        },
        None => VerifiedCode {
            code: suggestion.code.trim().to_string(),
            code_system: suggestion.code_system.trim().to_ascii_lowercase(),
            rationale: suggestion.rationale,
            confidence,
            verified: false,
            description: None,
            hcc_category: None,
            hcc_weight: None,
        },
    }
}
