//! In-memory vector index over the embedded code table.
//!
//! Built once at startup and shared read-only through `Arc<CodeIndex>`.

use anyhow::Result;
use sqlx::PgPool;
use tracing::{info, warn};

use crate::models::code::{CodeSystem, EmbeddedCodeRow};

#[derive(Debug, Clone)]
pub struct IndexedCode {
    pub code: String,
    pub system: CodeSystem,
    pub short_description: String,
    pub long_description: String,
    pub embedding: Vec<f32>,
}

impl IndexedCode {
    pub fn new(
        code: String,
        system: CodeSystem,
        short_description: String,
        long_description: String,
        embedding: Vec<f32>,
    ) -> Self {
        Self {
            code,
            system,
            short_description,
            long_description,
            embedding,
        }
    }
}

#[derive(Debug, Default)]
pub struct CodeIndex {
    entries: Vec<IndexedCode>,
    dimension: Option<usize>,
}

impl CodeIndex {
    pub fn from_entries(entries: Vec<IndexedCode>) -> Self {
        let dimension = entries.first().map(|e| e.embedding.len());
        Self { entries, dimension }
    }

    /// Loads every code row that has an embedding.
    pub async fn load(pool: &PgPool) -> Result<Self> {
        let rows = sqlx::query_as::<_, EmbeddedCodeRow>(
            r#"
            SELECT code, code_system, short_description, long_description, embedding
            FROM medical_codes
            WHERE embedding IS NOT NULL
            "#,
        )
        .fetch_all(pool)
        .await?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            let Some(system) = CodeSystem::parse(&row.code_system) else {
                warn!("Skipping code {} with unknown system {}", row.code, row.code_system);
                continue;
            };
            entries.push(IndexedCode::new(
                row.code,
                system,
                row.short_description,
                row.long_description,
                row.embedding,
            ));
        }

        let index = Self::from_entries(entries);
        info!(
            "Code index loaded: {} entries, dimension {:?}",
            index.len(),
            index.dimension
        );
        Ok(index)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Vector length of the loaded embeddings, `None` when empty.
    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    /// Top-k entries by cosine similarity, highest first. Entries whose
    /// dimension differs from the query are skipped.
    pub fn nearest(
        &self,
        query: &[f32],
        system: Option<CodeSystem>,
        k: usize,
    ) -> Vec<(&IndexedCode, f32)> {
        if k == 0 || l2_norm(query) == 0.0 {
            return Vec::new();
        }

        let mut hits: Vec<(&IndexedCode, f32)> = self
            .entries
            .iter()
            .filter(|e| system.map_or(true, |s| e.system == s))
            .filter_map(|e| cosine_similarity(query, &e.embedding).map(|score| (e, score)))
            .collect();

        hits.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.code.cmp(&b.0.code)));
        hits.truncate(k);
        hits
    }
}

/// Cosine similarity, or `None` for mismatched lengths or a zero vector.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f32> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }
    let denom = l2_norm(a) * l2_norm(b);
    if denom == 0.0 {
        return None;
    }
    Some(dot(a, b) / denom)
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn l2_norm(v: &[f32]) -> f32 {
    dot(v, v).sqrt()
}
