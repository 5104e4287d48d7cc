use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodeSystem {
    Icd10,
    Cpt,
}

impl CodeSystem {
    pub fn as_str(&self) -> &'static str {
        match self {
            CodeSystem::Icd10 => "icd10",
            CodeSystem::Cpt => "cpt",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "icd10" | "icd-10" | "icd10cm" | "icd-10-cm" => Some(CodeSystem::Icd10),
            "cpt" => Some(CodeSystem::Cpt),
            _ => None,
        }
    }
}

/// A code row as exposed by the API (embedding omitted).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct MedicalCodeRow {
    pub id: Uuid,
    pub code: String,
    pub code_system: String,
    pub short_description: String,
    pub long_description: String,
    pub category: Option<String>,
    pub hcc_category: Option<String>,
    pub hcc_weight: Option<f64>,
}

pub const MEDICAL_CODE_COLUMNS: &str =
    "id, code, code_system, short_description, long_description, category, hcc_category, hcc_weight";

/// A code row with its embedding, used to build the in-memory index.
#[derive(Debug, Clone, FromRow)]
pub struct EmbeddedCodeRow {
    pub code: String,
    pub code_system: String,
    pub short_description: String,
    pub long_description: String,
    pub embedding: Vec<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_system_parse_aliases() {
        assert_eq!(CodeSystem::parse("ICD-10"), Some(CodeSystem::Icd10));
        assert_eq!(CodeSystem::parse("icd10cm"), Some(CodeSystem::Icd10));
        assert_eq!(CodeSystem::parse(" cpt "), Some(CodeSystem::Cpt));
        assert_eq!(CodeSystem::parse("snomed"), None);
    }

    #[test]
    fn test_code_system_serde() {
        assert_eq!(serde_json::to_string(&CodeSystem::Icd10).unwrap(), "\"icd10\"");
        let parsed: CodeSystem = serde_json::from_str("\"cpt\"").unwrap();
        assert_eq!(parsed, CodeSystem::Cpt);
    }
}
