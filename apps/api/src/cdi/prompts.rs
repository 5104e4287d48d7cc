// LLM prompt constants for clinical documentation review.

/// System prompt for note analysis. Enforces JSON-only output.
pub const CDI_SYSTEM: &str = "You are a certified clinical documentation integrity specialist \
    and medical coder (CCDS, CPC). You review clinical notes for documentation gaps that \
    affect ICD-10-CM and CPT code assignment and HCC risk adjustment. \
    You MUST respond with valid JSON only. \
    Do NOT include any text outside the JSON object. \
    Do NOT use markdown code fences. \
    Do NOT include explanations or apologies.";

/// Note analysis prompt. Replace `{encounter_type}` then `{note_text}` before sending.
pub const CDI_PROMPT_TEMPLATE: &str = r#"Review the clinical note below and return a JSON object with this EXACT schema (no extra fields):
{
  "documentation_gaps": [
    {
      "category": "specificity",
      "description": "Diabetes documented without type or complication status",
      "provider_query": "Please clarify the type of diabetes and any associated complications.",
      "severity": "high"
    }
  ],
  "suggested_codes": [
    {
      "code": "E11.9",
      "code_system": "icd10",
      "rationale": "Type 2 diabetes documented in assessment",
      "confidence": 0.85
    }
  ],
  "summary": "One or two sentences summarizing documentation quality."
}

Rules:

GAP CATEGORIES (pick one per gap): "specificity", "acuity", "laterality", "causality",
"severity", "present_on_admission", "clinical_validation", "missing_diagnosis".

SEVERITY: "high" when the gap changes HCC capture or DRG assignment, "medium" when it changes
code specificity, "low" otherwise.

PROVIDER QUERIES must be non-leading: never suggest a specific diagnosis, ask the provider
to clarify what the clinical evidence supports.

SUGGESTED CODES: only codes supported by documentation already present in the note.
code_system is "icd10" or "cpt". confidence is between 0.0 and 1.0.
Do NOT suggest codes for conditions that are only implied.

ENCOUNTER TYPE: {encounter_type}

CLINICAL NOTE:
{note_text}"#;

pub fn build_cdi_prompt(note_text: &str, encounter_type: Option<&str>) -> String {
    CDI_PROMPT_TEMPLATE
        .replace("{encounter_type}", encounter_type.unwrap_or("unspecified"))
        .replace("{note_text}", note_text)
}
