//! Query orchestration for mnemos.
//!
//! The [`Orchestrator`] answers questions by short-circuiting through the
//! exact-match cache when it can, otherwise merging vector-search chunks and
//! recalled memories under a token budget, calling the generator, and
//! persisting the result back into the tiers.
//!
//! ```ignore
//! let orchestrator = Orchestrator::new(vectors, responses, memory, embedder, generator, config);
//! orchestrator.init_knowledge_base("./docs", "text-embedding-3-small").await?;
//! let answer = orchestrator.answer("What is RAG?", "gpt-4o-mini", &AnswerOptions::default()).await?;
//! println!("{} (cache hit: {})", answer.response, answer.stats.cache_hit);
//! ```

pub mod confidence;
pub mod context;
pub mod error;
pub mod orchestrator;
pub mod stream;
pub mod tags;
pub mod types;

pub use confidence::{ConfidenceScorer, SaturatingScorer, SharedScorer};
pub use context::{ContextSection, MergedContext, estimate_tokens, merge_context};
pub use error::{RagError, Result, Stage};
pub use orchestrator::{DERIVED_FROM, Orchestrator};
pub use stream::AnswerStream;
pub use tags::extract_tags;
pub use types::{
    Answer, AnswerEvent, AnswerOptions, AnswerStats, OptimizationSource, OrchestratorConfig,
    OrchestratorStats,
};

// Re-export the cancellation token so callers need not depend on tokio-util
pub use tokio_util::sync::CancellationToken;
