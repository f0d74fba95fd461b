//! Memory store data types.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque identifier of a stored [`MemoryRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(pub i64);

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A remembered question/answer exchange with the context that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub id: RecordId,
    pub query: String,
    pub context: String,
    pub response: String,
    pub tags: BTreeSet<String>,
    /// Always within `[0.0, 1.0]`.
    pub confidence_score: f32,
    pub model_id: String,
    /// Free-form JSON (e.g. `source`, `retrieved_docs`).
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    /// Always at least 1.
    pub access_count: u32,
}

/// Input for [`MemoryStore::store`](super::MemoryStore::store).
#[derive(Debug, Clone, PartialEq)]
pub struct NewMemory {
    pub query: String,
    pub context: String,
    pub response: String,
    pub tags: BTreeSet<String>,
    pub confidence_score: f32,
    pub model_id: String,
    pub metadata: serde_json::Value,
}

impl NewMemory {
    /// A memory with no tags, confidence 0.5 and empty metadata.
    pub fn new(
        query: impl Into<String>,
        context: impl Into<String>,
        response: impl Into<String>,
        model_id: impl Into<String>,
    ) -> Self {
        Self {
            query: query.into(),
            context: context.into(),
            response: response.into(),
            tags: BTreeSet::new(),
            confidence_score: 0.5,
            model_id: model_id.into(),
            metadata: serde_json::Value::Object(Default::default()),
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    pub fn with_confidence(mut self, confidence_score: f32) -> Self {
        self.confidence_score = confidence_score;
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// A record returned by similarity recall.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredRecord {
    pub record: MemoryRecord,
    /// Lexical similarity of the query to the record, in `[0.0, 1.0]`.
    pub similarity: f32,
    /// Blended ranking score.
    pub score: f32,
}

/// An explicitly created, ordered group of records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationThread {
    pub thread_id: String,
    pub title: String,
    /// Records in the order they were added.
    pub record_ids: Vec<RecordId>,
    pub summary: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A labeled edge between two records. Neither end owns the other.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relation {
    pub source_id: RecordId,
    pub related_id: RecordId,
    pub relation_type: String,
    pub similarity_score: f32,
}

impl Relation {
    pub fn new(
        source_id: RecordId,
        related_id: RecordId,
        relation_type: impl Into<String>,
        similarity_score: f32,
    ) -> Self {
        Self {
            source_id,
            related_id,
            relation_type: relation_type.into(),
            similarity_score,
        }
    }
}

/// Retention and recall tuning.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MemoryStoreConfig {
    /// Records at or above this confidence survive every cleanup.
    pub retention_threshold: f32,
    /// Records less similar than this are never recalled.
    pub min_similarity: f32,
}

impl Default for MemoryStoreConfig {
    fn default() -> Self {
        Self {
            retention_threshold: 0.7,
            min_similarity: 0.1,
        }
    }
}

/// Memory store statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryStats {
    pub total_records: usize,
    /// 0 when the store is empty.
    pub average_confidence: f32,
    pub total_accesses: u64,
    pub thread_count: usize,
    pub relation_count: usize,
    pub records_created_last_24h: usize,
    pub location: String,
}
