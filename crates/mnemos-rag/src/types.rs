//! Orchestrator request, response and configuration types.

use std::fmt;

use mnemos_cache::{ExactCacheStats, MemoryStats, RecordId, VectorCacheStats};
use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Fixed settings supplied once when the orchestrator is built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Instruction text sent with every generation request.
    pub system_prompt: Option<String>,
    pub temperature: f32,
    pub top_p: f32,
    pub max_tokens: u32,
    /// Default merged-context budget in estimated tokens.
    pub token_budget: usize,
    /// Vector hits requested per query.
    pub vector_top_k: usize,
    /// Memories recalled per query.
    pub memory_limit: usize,
    /// Minimum stored confidence for a memory to be recalled.
    pub min_memory_confidence: f32,
    /// Cached chunks added when vector search comes up short.
    pub supplemental_chunks: usize,
    /// Fewer vector hits than this triggers the chunk supplement.
    pub min_vector_hits: usize,
    /// Latest thread exchanges sent as conversation history.
    pub history_exchanges: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            system_prompt: None,
            temperature: 0.7,
            top_p: 0.9,
            max_tokens: 1000,
            token_budget: 3000,
            vector_top_k: 3,
            memory_limit: 3,
            min_memory_confidence: 0.0,
            supplemental_chunks: 2,
            min_vector_hits: 1,
            history_exchanges: 5,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Options
// ─────────────────────────────────────────────────────────────────────────────

/// Per-query switches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerOptions {
    /// Consult and populate the exact-match cache.
    pub use_cache: bool,
    /// Record the exchange in the memory store.
    pub store_memory: bool,
    /// Recall related memories as extra context.
    pub retrieve_past_contexts: bool,
    /// Override the configured token budget.
    pub token_budget: Option<usize>,
    /// Append the stored memory to this thread.
    pub thread_id: Option<String>,
    /// Extra tags for the stored memory.
    pub tags: Vec<String>,
}

impl Default for AnswerOptions {
    fn default() -> Self {
        Self {
            use_cache: true,
            store_memory: true,
            retrieve_past_contexts: true,
            token_budget: None,
            thread_id: None,
            tags: Vec::new(),
        }
    }
}

impl AnswerOptions {
    pub fn with_cache(mut self, use_cache: bool) -> Self {
        self.use_cache = use_cache;
        self
    }

    pub fn with_memory(mut self, store_memory: bool) -> Self {
        self.store_memory = store_memory;
        self
    }

    pub fn with_recall(mut self, retrieve_past_contexts: bool) -> Self {
        self.retrieve_past_contexts = retrieve_past_contexts;
        self
    }

    pub fn with_token_budget(mut self, budget: usize) -> Self {
        self.token_budget = Some(budget);
        self
    }

    pub fn with_thread(mut self, thread_id: impl Into<String>) -> Self {
        self.thread_id = Some(thread_id.into());
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Results
// ─────────────────────────────────────────────────────────────────────────────

/// Which tier contributed to, or was fed by, an answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizationSource {
    /// Served from the exact-match cache.
    PromptCache,
    /// Recalled memories were merged into the context.
    ContextMemory,
    /// Cached chunks supplemented a thin vector search.
    ChunkCache,
    /// The answer was written to the exact-match cache.
    NewlyCached,
    /// The exchange was written to the memory store.
    MemoryStored,
}

impl OptimizationSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PromptCache => "prompt_cache",
            Self::ContextMemory => "context_memory",
            Self::ChunkCache => "chunk_cache",
            Self::NewlyCached => "newly_cached",
            Self::MemoryStored => "memory_stored",
        }
    }
}

impl fmt::Display for OptimizationSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How an answer was produced.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnswerStats {
    pub cache_hit: bool,
    pub memory_reused: bool,
    /// Document chunks retrieved for the context.
    pub contexts_retrieved: usize,
    /// Stored estimate on a hit; the new entry's estimate on a miss.
    pub tokens_saved: u64,
    pub optimization_source: Vec<OptimizationSource>,
}

/// A completed answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Answer {
    pub response: String,
    pub stats: AnswerStats,
    /// The merged context the response was generated from.
    pub context: String,
    /// Id of the memory stored for this exchange.
    pub memory_id: Option<RecordId>,
    /// Memories recalled into the context, in rank order.
    pub retrieved_memories: Vec<RecordId>,
}

/// One item of a streamed answer.
#[derive(Debug, Clone, PartialEq)]
pub enum AnswerEvent {
    /// A partial response token.
    Token(String),
    /// The full answer, after persistence.
    Done(Answer),
}

/// Combined statistics of all three tiers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorStats {
    pub vector: VectorCacheStats,
    pub responses: ExactCacheStats,
    pub memory: MemoryStats,
}
