use sqlx::PgPool;

use crate::errors::AppError;
use crate::models::code::{CodeSystem, MedicalCodeRow, MEDICAL_CODE_COLUMNS};
use crate::search::scoring::{lexical_score, normalize_code, ScoreCalibration, ScoringCandidate};
use crate::search::CodeHit;

/// Lexical lookup: normalized code prefix or description substring.
///
/// Over-fetches `limit * 3` rows so the lexical scorer has something to rank.
pub async fn keyword_search(
    pool: &PgPool,
    query: &str,
    system: Option<CodeSystem>,
    limit: usize,
    calibration: &ScoreCalibration,
) -> Result<Vec<CodeHit>, AppError> {
    let normalized = normalize_code(query);
    let pattern = format!("%{}%", escape_like(query.trim()));
    let code_prefix = code_prefix_pattern(&normalized);

    let sql = format!(
        r#"
        SELECT {MEDICAL_CODE_COLUMNS}
        FROM medical_codes
        WHERE ($1::text IS NULL OR code_system = $1)
          AND (
                ($2::text IS NOT NULL AND UPPER(REPLACE(code, '.', '')) LIKE $2)
             OR short_description ILIKE $3
             OR long_description ILIKE $3
          )
        ORDER BY (UPPER(REPLACE(code, '.', '')) = $4) DESC, LENGTH(code), code
        LIMIT $5
        "#
    );

    let rows = sqlx::query_as::<_, MedicalCodeRow>(&sql)
        .bind(system.map(|s| s.as_str()))
        .bind(code_prefix)
        .bind(pattern)
        .bind(&normalized)
        .bind((limit * 3) as i64)
        .fetch_all(pool)
        .await?;

    let mut hits: Vec<CodeHit> = rows
        .into_iter()
        .map(|row| {
            let breakdown = lexical_score(
                query,
                &ScoringCandidate {
                    code: &row.code,
                    short_description: &row.short_description,
                    long_description: &row.long_description,
                },
                calibration,
            );
            CodeHit::new(
                row.code,
                row.code_system,
                row.short_description,
                row.long_description,
                breakdown,
            )
        })
        .collect();

    crate::search::scoring::rank(&mut hits, |h| (&h.breakdown, h.code.as_str()));
    hits.truncate(limit);
    Ok(hits)
}

/// LIKE pattern for the code-prefix clause. A query with no code characters
/// left after normalizing (`.` or `-`) has no prefix clause at all.
fn code_prefix_pattern(normalized: &str) -> Option<String> {
    (!normalized.is_empty()).then(|| format!("{}%", escape_like(normalized)))
}

/// Fetches one code by system and code, ignoring dots and case.
pub async fn find_code(
    pool: &PgPool,
    system: CodeSystem,
    code: &str,
) -> Result<Option<MedicalCodeRow>, AppError> {
    let sql = format!(
        "SELECT {MEDICAL_CODE_COLUMNS} FROM medical_codes \
         WHERE code_system = $1 AND UPPER(REPLACE(code, '.', '')) = $2 LIMIT 1"
    );
    Ok(sqlx::query_as::<_, MedicalCodeRow>(&sql)
        .bind(system.as_str())
        .bind(normalize_code(code))
        .fetch_optional(pool)
        .await?)
}

/// Escapes `%`, `_` and `\` for use inside a LIKE pattern.
pub fn escape_like(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_like() {
        assert_eq!(escape_like("50%_off\\"), "50\\%\\_off\\\\");
        assert_eq!(escape_like("diabetes"), "diabetes");
    }

    #[test]
    fn test_code_prefix_pattern() {
        assert_eq!(code_prefix_pattern(&normalize_code("e11.9")), Some("E119%".to_string()));
        assert_eq!(code_prefix_pattern(&normalize_code(".")), None);
        assert_eq!(code_prefix_pattern(&normalize_code(" - ")), None);
    }
}
