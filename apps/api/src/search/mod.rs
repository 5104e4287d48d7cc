pub mod embedding;
pub mod handlers;
pub mod index;
pub mod keyword;
pub mod scoring;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::errors::AppError;
use crate::models::code::CodeSystem;
use crate::search::embedding::Embedder;
use crate::search::index::CodeIndex;
use crate::search::scoring::{enhance, rank, ScoreBreakdown, ScoreCalibration, ScoringCandidate};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    #[default]
    Semantic,
    Keyword,
}

/// One ranked search result.
#[derive(Debug, Clone, Serialize)]
pub struct CodeHit {
    pub code: String,
    pub code_system: String,
    pub short_description: String,
    pub long_description: String,
    pub score: f64,
    #[serde(skip)]
    pub breakdown: ScoreBreakdown,
}

impl CodeHit {
    pub fn new(
        code: String,
        code_system: String,
        short_description: String,
        long_description: String,
        breakdown: ScoreBreakdown,
    ) -> Self {
        Self {
            code,
            code_system,
            short_description,
            long_description,
            score: round_score(breakdown.final_score),
            breakdown,
        }
    }
}

fn round_score(score: f64) -> f64 {
    (score * 10_000.0).round() / 10_000.0
}

/// Embedding search over the in-memory index with score enhancement applied.
///
/// Pulls `limit * 3` nearest neighbours so boosts can reorder them, then truncates.
/// A query vector whose length differs from the index is an embedding error.
pub async fn semantic_search(
    embedder: &dyn Embedder,
    index: &CodeIndex,
    query: &str,
    system: Option<CodeSystem>,
    limit: usize,
    calibration: &ScoreCalibration,
) -> Result<Vec<CodeHit>, AppError> {
    let vector = embedder.embed(query).await?;
    if let Some(dimension) = index.dimension() {
        if vector.len() != dimension {
            warn!(
                "Embedding has {} dimensions but the code index has {dimension}; check EMBEDDING_MODEL",
                vector.len()
            );
            return Err(AppError::Embedding(format!(
                "embedding dimension {} does not match index dimension {dimension}",
                vector.len()
            )));
        }
    }
    Ok(rank_neighbours(index, &vector, query, system, limit, calibration))
}

fn rank_neighbours(
    index: &CodeIndex,
    vector: &[f32],
    query: &str,
    system: Option<CodeSystem>,
    limit: usize,
    calibration: &ScoreCalibration,
) -> Vec<CodeHit> {
    let mut hits: Vec<CodeHit> = index
        .nearest(vector, system, limit * 3)
        .into_iter()
        .map(|(entry, similarity)| {
            let breakdown = enhance(
                f64::from(similarity),
                query,
                &ScoringCandidate {
                    code: &entry.code,
                    short_description: &entry.short_description,
                    long_description: &entry.long_description,
                },
                calibration,
            );
            CodeHit::new(
                entry.code.clone(),
                entry.system.as_str().to_string(),
                entry.short_description.clone(),
                entry.long_description.clone(),
                breakdown,
            )
        })
        .collect();

    rank(&mut hits, |h| (&h.breakdown, h.code.as_str()));
    hits.truncate(limit);
    hits
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::index::IndexedCode;
    use async_trait::async_trait;

    struct FixedEmbedder(Vec<f32>);

    #[async_trait]
    impl Embedder for FixedEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, AppError> {
            Ok(self.0.clone())
        }
    }

    struct FailingEmbedder;

    #[async_trait]
    impl Embedder for FailingEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, AppError> {
            Err(AppError::Embedding("offline".to_string()))
        }
    }

    fn index() -> CodeIndex {
        let code = |c: &str, s: &str, v: Vec<f32>| {
            IndexedCode::new(c.to_string(), CodeSystem::Icd10, s.to_string(), s.to_string(), v)
        };
        CodeIndex::from_entries(vec![
            code("E11.9", "Type 2 diabetes mellitus without complications", vec![0.8, 0.6]),
            code("E10.9", "Type 1 diabetes mellitus without complications", vec![0.9, 0.44]),
            code("I10", "Essential hypertension", vec![0.1, 0.99]),
        ])
    }

    #[tokio::test]
    async fn test_semantic_search_boost_reorders_neighbours() {
        let cal = ScoreCalibration::default();
        let embedder = FixedEmbedder(vec![1.0, 0.0]);
        // E10.9 is the closer neighbour, but the exact code query wins after boosting.
        let hits = semantic_search(&embedder, &index(), "E11.9", None, 2, &cal)
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].code, "E11.9");
        assert!(hits[0].score >= hits[1].score);
    }

    #[tokio::test]
    async fn test_semantic_search_scores_within_unit_range() {
        let cal = ScoreCalibration::default();
        let embedder = FixedEmbedder(vec![0.5, 0.5]);
        let hits = semantic_search(&embedder, &index(), "diabetes", None, 10, &cal)
            .await
            .unwrap();
        assert_eq!(hits.len(), 3);
        assert!(hits.iter().all(|h| (0.0..=1.0).contains(&h.score)));
    }

    #[tokio::test]
    async fn test_semantic_search_propagates_embedder_error() {
        let cal = ScoreCalibration::default();
        let result = semantic_search(&FailingEmbedder, &index(), "diabetes", None, 5, &cal).await;
        assert!(matches!(result, Err(AppError::Embedding(_))));
    }

    #[tokio::test]
    async fn test_semantic_search_rejects_wrong_dimension() {
        let cal = ScoreCalibration::default();
        let embedder = FixedEmbedder(vec![1.0, 0.0, 0.0]);
        let result = semantic_search(&embedder, &index(), "diabetes", None, 5, &cal).await;
        assert!(matches!(result, Err(AppError::Embedding(_))));
    }

    #[test]
    fn test_round_score() {
        assert_eq!(round_score(0.123456), 0.1235);
    }
}
