//! Storage tiers for mnemos.
//!
//! Three independent SQLite-backed stores, each an explicit object with its
//! own location and lock:
//!
//! - [`VectorCache`]: chunk embeddings keyed by document fingerprint and
//!   embedding model, rebuilt only when either changes.
//! - [`ResponseCache`]: exact-match answers keyed by normalized query and
//!   model, plus a deduplicated pool of context chunks.
//! - [`MemoryStore`]: past exchanges with confidence scores, tags, threads and
//!   relations, recalled by lexical similarity.
//!
//! Writes to a store are serialized by that store's lock; stores never share
//! a connection.

mod db;
pub mod documents;
pub mod error;
pub mod fingerprint;
pub mod memory;
pub mod response;
pub mod validation;
pub mod vector;

pub use documents::{KnowledgeOptions, SourceDocument, chunk_text, load_documents};
pub use error::{CacheError, Result};
pub use fingerprint::{CacheKey, content_hash, fingerprint, normalize_query};
pub use memory::similarity::lexical_similarity;
pub use memory::{
    ConversationThread, MemoryRecord, MemoryStats, MemoryStore, MemoryStoreConfig, NewMemory,
    RecordId, Relation, ScoredRecord,
};
pub use response::{CachedResponse, ContextChunk, ExactCacheStats, ResponseCache};
pub use validation::ValidationError;
pub use vector::{BuildReport, VectorCache, VectorCacheStats, VectorEntry, VectorHit};
