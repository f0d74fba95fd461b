//! Similarity recall.

use std::cmp::Ordering;

use rusqlite::params;
use tracing::debug;

use crate::db;
use crate::error::Result;
use crate::validation::ValidationError;

use super::record_ops::RECORD_COLUMNS;
use super::similarity::{content_words, word_set_similarity};
use super::{MemoryStore, ScoredRecord};

/// Weight of lexical similarity in the blended recall score.
const SIMILARITY_WEIGHT: f32 = 0.6;
/// Weight of stored confidence in the blended recall score.
const CONFIDENCE_WEIGHT: f32 = 0.4;

impl MemoryStore {
    /// Recall up to `limit` records related to `query`.
    ///
    /// Only records with confidence ≥ `min_confidence` and similarity of at
    /// least the configured minimum are considered. Ranking uses
    /// `similarity * 0.6 + confidence * 0.4`, ties going to the most recently
    /// accessed record. Each returned record has its `access_count`
    /// incremented and `last_accessed` refreshed.
    pub fn retrieve_similar(
        &self,
        query: &str,
        limit: usize,
        min_confidence: f32,
    ) -> Result<Vec<ScoredRecord>> {
        if !min_confidence.is_finite() {
            return Err(ValidationError::InvalidConfidence(min_confidence).into());
        }
        let query_words = content_words(query);
        if limit == 0 || query_words.is_empty() {
            return Ok(Vec::new());
        }

        let mut conn = self.conn.write();

        let mut candidates = Vec::new();
        {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM memory_records WHERE confidence_score >= ?1",
                RECORD_COLUMNS
            ))?;
            let mut rows = stmt.query(params![min_confidence as f64])?;
            while let Some(row) = rows.next()? {
                let record = Self::row_to_record(row)?;
                let similarity = word_set_similarity(&query_words, &content_words(&record.query));
                if similarity <= 0.0 || similarity < self.config().min_similarity {
                    continue;
                }
                let score =
                    similarity * SIMILARITY_WEIGHT + record.confidence_score * CONFIDENCE_WEIGHT;
                candidates.push(ScoredRecord {
                    record,
                    similarity,
                    score,
                });
            }
        }

        candidates.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| b.record.last_accessed.cmp(&a.record.last_accessed))
                .then_with(|| b.record.id.cmp(&a.record.id))
        });
        candidates.truncate(limit);

        if !candidates.is_empty() {
            let now = db::now();
            let accessed_at = db::parse_timestamp(&now)?;
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare(
                    r#"
                    UPDATE memory_records
                    SET access_count = access_count + 1, last_accessed = ?2
                    WHERE id = ?1
                    "#,
                )?;
                for candidate in &mut candidates {
                    stmt.execute(params![candidate.record.id.0, now])?;
                    candidate.record.access_count += 1;
                    candidate.record.last_accessed = accessed_at;
                }
            }
            tx.commit()?;
        }

        debug!(
            "Recalled {} memories for query ({} words)",
            candidates.len(),
            query_words.len()
        );
        Ok(candidates)
    }
}
