//! The per-query pipeline.
//!
//! ```text
//! START ─► exact cache ──hit──► RETURN
//!              │ miss
//!              ▼
//!         recall memory ─► vector search ─► merge context ─► generate ─► persist ─► RETURN
//!                                                               │
//!                                                               └─ failure ─► ERROR
//! ```
//!
//! With a thread id, the thread's latest exchanges go to the generator as
//! conversation history.
//!
//! Cache and memory failures are logged and the tier is skipped for this
//! query. Embedding or generation failures end the query with an error and
//! nothing is persisted.

use std::path::Path;
use std::sync::Arc;

use mnemos_cache::validation::validate_content;
use mnemos_cache::{
    BuildReport, MemoryStore, NewMemory, RecordId, Relation, ResponseCache, ScoredRecord,
    VectorCache, VectorHit,
};
use mnemos_llm::{ChatTurn, GenerationRequest, SharedEmbedder, SharedGenerator};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::confidence::{SaturatingScorer, SharedScorer};
use crate::context::{ContextSection, MergedContext, estimate_tokens, merge_context};
use crate::error::{RagError, Result};
use crate::tags::extract_tags;
use crate::types::{
    Answer, AnswerOptions, AnswerStats, OptimizationSource, OrchestratorConfig,
    OrchestratorStats,
};

/// Relation label linking a new memory to the memories it was built from.
pub const DERIVED_FROM: &str = "derived_from";

// ─────────────────────────────────────────────────────────────────────────────
// Orchestrator
// ─────────────────────────────────────────────────────────────────────────────

/// Coordinates the three tiers and the two collaborators.
///
/// Cheap to clone; clones share the same stores and collaborators.
#[derive(Clone)]
pub struct Orchestrator {
    vectors: Arc<VectorCache>,
    responses: Arc<ResponseCache>,
    memory: Arc<MemoryStore>,
    pub(crate) embedder: SharedEmbedder,
    pub(crate) generator: SharedGenerator,
    scorer: SharedScorer,
    config: Arc<OrchestratorConfig>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("embedder", &self.embedder.name())
            .field("generator", &self.generator.name())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Outcome of the pre-generation stages.
pub(crate) enum Lookup {
    Hit(Answer),
    Miss(Box<Prepared>),
}

/// Everything needed to generate and then persist one answer.
pub(crate) struct Prepared {
    query: String,
    model_id: String,
    options: AnswerOptions,
    merged: MergedContext,
    hits: Vec<VectorHit>,
    memories: Vec<ScoredRecord>,
    stats: AnswerStats,
    pub(crate) request: GenerationRequest,
}

impl Orchestrator {
    /// Build an orchestrator over explicit store handles.
    pub fn new(
        vectors: Arc<VectorCache>,
        responses: Arc<ResponseCache>,
        memory: Arc<MemoryStore>,
        embedder: SharedEmbedder,
        generator: SharedGenerator,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            vectors,
            responses,
            memory,
            embedder,
            generator,
            scorer: Arc::new(SaturatingScorer::default()),
            config: Arc::new(config),
        }
    }

    /// Replace the confidence scorer used for stored memories.
    pub fn with_scorer(mut self, scorer: SharedScorer) -> Self {
        self.scorer = scorer;
        self
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn vectors(&self) -> &Arc<VectorCache> {
        &self.vectors
    }

    pub fn responses(&self) -> &Arc<ResponseCache> {
        &self.responses
    }

    pub fn memory(&self) -> &Arc<MemoryStore> {
        &self.memory
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Knowledge base and maintenance
    // ─────────────────────────────────────────────────────────────────────────

    /// Index `folder` into the vector cache.
    pub async fn init_knowledge_base(
        &self,
        folder: impl AsRef<Path>,
        embedding_model_id: &str,
    ) -> Result<BuildReport> {
        let report = self
            .vectors
            .build(folder, embedding_model_id, self.embedder.as_ref())
            .await?;
        Ok(report)
    }

    /// Statistics from every tier.
    pub fn stats(&self) -> Result<OrchestratorStats> {
        Ok(OrchestratorStats {
            vector: self.vectors.stats()?,
            responses: self.responses.stats()?,
            memory: self.memory.stats()?,
        })
    }

    /// Clear the vector and exact-match caches. The memory store is untouched.
    ///
    /// A knowledge build in progress finishes before the vectors are cleared.
    pub async fn clear_caches(&self) -> Result<()> {
        self.vectors.clear().await?;
        self.responses.clear()?;
        info!("Vector and response caches cleared");
        Ok(())
    }

    /// Clear the memory store.
    pub fn clear_memory(&self) -> Result<()> {
        self.memory.clear()?;
        Ok(())
    }

    /// Run the memory retention sweep.
    pub fn cleanup_memory(&self, days: u32) -> Result<usize> {
        Ok(self.memory.cleanup(days)?)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Answering
    // ─────────────────────────────────────────────────────────────────────────

    /// Answer `query` with `model_id`.
    pub async fn answer(
        &self,
        query: &str,
        model_id: &str,
        options: &AnswerOptions,
    ) -> Result<Answer> {
        match self.prepare(query, model_id, options).await? {
            Lookup::Hit(answer) => Ok(answer),
            Lookup::Miss(prepared) => {
                let response = self
                    .generator
                    .generate(&prepared.request)
                    .await
                    .map_err(RagError::generation)?;
                Ok(self.persist(*prepared, response))
            }
        }
    }

    /// Run every stage up to generation.
    pub(crate) async fn prepare(
        &self,
        query: &str,
        model_id: &str,
        options: &AnswerOptions,
    ) -> Result<Lookup> {
        validate_content(query)?;
        let mut stats = AnswerStats::default();

        if options.use_cache {
            match self.responses.lookup(query, model_id) {
                Ok(Some(cached)) => {
                    info!(model_id, tokens_saved = cached.tokens_saved, "Exact cache hit");
                    return Ok(Lookup::Hit(Answer {
                        response: cached.response,
                        stats: AnswerStats {
                            cache_hit: true,
                            tokens_saved: cached.tokens_saved,
                            optimization_source: vec![OptimizationSource::PromptCache],
                            ..Default::default()
                        },
                        context: cached.context,
                        memory_id: None,
                        retrieved_memories: Vec::new(),
                    }));
                }
                Ok(None) => debug!(model_id, "Exact cache miss"),
                Err(e) => warn!(error = %e, tier = "response_cache", "Lookup failed, continuing without exact cache"),
            }
        }

        let memories = if options.retrieve_past_contexts {
            self.recall(query)
        } else {
            Vec::new()
        };
        if !memories.is_empty() {
            stats.memory_reused = true;
            stats.optimization_source.push(OptimizationSource::ContextMemory);
        }

        let hits = self.search_documents(query).await?;
        for hit in &hits {
            let metadata = json!({ "source": hit.source, "score": hit.score });
            if let Err(e) = self.responses.store_chunk(&hit.content, &metadata) {
                warn!(error = %e, tier = "response_cache", "Failed to record context chunk");
            }
        }

        let mut sections: Vec<ContextSection> = hits
            .iter()
            .map(|hit| ContextSection::document(&hit.source, &hit.content))
            .collect();
        let supplemental = self.supplemental_sections(&hits);
        if !supplemental.is_empty() {
            stats.optimization_source.push(OptimizationSource::ChunkCache);
        }
        stats.contexts_retrieved = hits.len() + supplemental.len();
        sections.extend(supplemental);
        sections.extend(
            memories
                .iter()
                .map(|m| ContextSection::memory(m.record.confidence_score, &m.record.response)),
        );

        let budget = options.token_budget.unwrap_or(self.config.token_budget);
        let merged = merge_context(sections, budget);
        debug!(
            budget,
            estimated_tokens = merged.estimated_tokens(),
            documents = merged.documents_used,
            memories = merged.memories_used,
            truncated = merged.truncated,
            "Context merged"
        );

        let history = match options.thread_id.as_deref() {
            Some(thread_id) => self.thread_history(thread_id),
            None => Vec::new(),
        };

        let request = GenerationRequest::new(model_id, merged.text.clone(), query)
            .with_system_prompt(self.config.system_prompt.clone())
            .with_history(history)
            .with_sampling(self.config.temperature, self.config.top_p)
            .with_max_tokens(self.config.max_tokens);

        Ok(Lookup::Miss(Box::new(Prepared {
            query: query.to_string(),
            model_id: model_id.to_string(),
            options: options.clone(),
            merged,
            hits,
            memories,
            stats,
            request,
        })))
    }

    fn recall(&self, query: &str) -> Vec<ScoredRecord> {
        match self.memory.retrieve_similar(
            query,
            self.config.memory_limit,
            self.config.min_memory_confidence,
        ) {
            Ok(memories) => {
                debug!(count = memories.len(), "Recalled memories");
                memories
            }
            Err(e) => {
                warn!(error = %e, tier = "memory", "Recall failed, continuing without memory");
                Vec::new()
            }
        }
    }

    fn thread_history(&self, thread_id: &str) -> Vec<ChatTurn> {
        if self.config.history_exchanges == 0 {
            return Vec::new();
        }
        match self.load_history(thread_id) {
            Ok(history) => {
                debug!(thread_id, turns = history.len(), "Loaded thread history");
                history
            }
            Err(e) => {
                warn!(error = %e, tier = "memory", thread_id, "Failed to load thread history");
                Vec::new()
            }
        }
    }

    fn load_history(&self, thread_id: &str) -> mnemos_cache::Result<Vec<ChatTurn>> {
        let Some(thread) = self.memory.thread(thread_id)? else {
            return Ok(Vec::new());
        };
        let skip = thread
            .record_ids
            .len()
            .saturating_sub(self.config.history_exchanges);

        let mut history = Vec::new();
        for id in &thread.record_ids[skip..] {
            if let Some(record) = self.memory.get(*id)? {
                history.push(ChatTurn::user(record.query));
                history.push(ChatTurn::assistant(record.response));
            }
        }
        Ok(history)
    }

    async fn search_documents(&self, query: &str) -> Result<Vec<VectorHit>> {
        if self.config.vector_top_k == 0 || self.vectors.is_empty() {
            return Ok(Vec::new());
        }

        let query_vector = self
            .embedder
            .embed(query)
            .await
            .map_err(RagError::embedding)?;

        match self.vectors.search(&query_vector, self.config.vector_top_k) {
            Ok(hits) => Ok(hits),
            Err(e) => {
                warn!(error = %e, tier = "vector", "Vector search failed, continuing without documents");
                Ok(Vec::new())
            }
        }
    }

    /// Cached chunks to add when vector search returned too little.
    fn supplemental_sections(&self, hits: &[VectorHit]) -> Vec<ContextSection> {
        if hits.len() >= self.config.min_vector_hits || self.config.supplemental_chunks == 0 {
            return Vec::new();
        }

        let chunks = match self.responses.top_chunks(self.config.supplemental_chunks) {
            Ok(chunks) => chunks,
            Err(e) => {
                warn!(error = %e, tier = "response_cache", "Failed to load cached chunks");
                return Vec::new();
            }
        };

        chunks
            .into_iter()
            .filter(|chunk| !hits.iter().any(|hit| hit.content == chunk.content))
            .map(|chunk| {
                let source = chunk
                    .metadata
                    .get("source")
                    .and_then(|s| s.as_str())
                    .unwrap_or("chunk cache")
                    .to_string();
                ContextSection::document(&source, &chunk.content)
            })
            .collect()
    }

    /// Write the finished answer to the enabled tiers.
    ///
    /// Only ever called with a complete response.
    pub(crate) fn persist(&self, prepared: Prepared, response: String) -> Answer {
        let Prepared {
            query,
            model_id,
            options,
            merged,
            hits,
            memories,
            mut stats,
            ..
        } = prepared;

        if options.use_cache {
            let tokens_saved = estimate_tokens(&merged.text) as u64;
            match self
                .responses
                .store(&query, &merged.text, &response, &model_id, tokens_saved)
            {
                Ok(_) => {
                    stats.tokens_saved = tokens_saved;
                    stats.optimization_source.push(OptimizationSource::NewlyCached);
                }
                Err(e) => warn!(error = %e, tier = "response_cache", "Failed to cache response"),
            }
        }

        let mut memory_id = None;
        if options.store_memory {
            let similarities: Vec<f32> = hits
                .iter()
                .map(|h| h.score)
                .chain(memories.iter().map(|m| m.similarity))
                .collect();
            let context_count = merged.documents_used + merged.memories_used;
            let confidence = self.scorer.score(&similarities, context_count);

            let mut tags = extract_tags(&query);
            tags.extend(options.tags.iter().cloned());

            let record = NewMemory::new(&query, &merged.text, &response, &model_id)
                .with_tags(tags)
                .with_confidence(confidence)
                .with_metadata(json!({
                    "source": "generated",
                    "retrieved_docs": hits.len(),
                    "past_contexts_used": memories.len(),
                }));

            match self.memory.store(record) {
                Ok(id) => {
                    memory_id = Some(id);
                    stats.optimization_source.push(OptimizationSource::MemoryStored);
                    self.link_memory(id, &memories, options.thread_id.as_deref());
                }
                Err(e) => warn!(error = %e, tier = "memory", "Failed to store memory"),
            }
        }

        info!(
            model_id = %model_id,
            cache_hit = stats.cache_hit,
            memory_reused = stats.memory_reused,
            contexts = stats.contexts_retrieved,
            "Answer generated"
        );

        Answer {
            response,
            stats,
            context: merged.text,
            memory_id,
            retrieved_memories: memories.iter().map(|m| m.record.id).collect(),
        }
    }

    fn link_memory(&self, id: RecordId, memories: &[ScoredRecord], thread_id: Option<&str>) {
        for recalled in memories {
            let relation = Relation::new(id, recalled.record.id, DERIVED_FROM, recalled.similarity);
            if let Err(e) = self.memory.add_relation(&relation) {
                warn!(error = %e, tier = "memory", "Failed to relate memories");
            }
        }

        if let Some(thread_id) = thread_id
            && let Err(e) = self.memory.add_to_thread(thread_id, id)
        {
            warn!(error = %e, thread_id, "Failed to add memory to thread");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mnemos_cache::ValidationError;
    use mnemos_llm::{MockEmbedder, MockGenerator};

    fn orchestrator(generator: MockGenerator) -> (Orchestrator, Arc<MockGenerator>) {
        let generator = Arc::new(generator);
        let orchestrator = Orchestrator::new(
            Arc::new(VectorCache::open_in_memory().unwrap()),
            Arc::new(ResponseCache::open_in_memory().unwrap()),
            Arc::new(MemoryStore::open_in_memory().unwrap()),
            Arc::new(MockEmbedder::new(64)),
            generator.clone(),
            OrchestratorConfig::default(),
        );
        (orchestrator, generator)
    }

    #[tokio::test]
    async fn test_empty_query_rejected() {
        let (orchestrator, generator) = orchestrator(MockGenerator::with_text("x"));
        let err = orchestrator
            .answer("   ", "m1", &AnswerOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::Validation(ValidationError::EmptyContent)));
        assert_eq!(generator.request_count(), 0);
    }

    #[tokio::test]
    async fn test_answer_without_knowledge_base() {
        let (orchestrator, generator) = orchestrator(MockGenerator::with_text("plain answer"));
        let answer = orchestrator
            .answer("What is RAG?", "m1", &AnswerOptions::default())
            .await
            .unwrap();

        assert_eq!(answer.response, "plain answer");
        assert!(!answer.stats.cache_hit);
        assert_eq!(answer.stats.contexts_retrieved, 0);
        assert!(answer.context.is_empty());
        assert_eq!(generator.requests()[0].user_prompt(), "Question:\nWhat is RAG?");

        // No context: floor confidence
        let record = orchestrator
            .memory()
            .get(answer.memory_id.unwrap())
            .unwrap()
            .unwrap();
        assert_eq!(record.confidence_score, 0.5);
        assert!(record.tags.contains("explanation"));
        assert_eq!(record.metadata["source"], "generated");
    }

    #[tokio::test]
    async fn test_sampling_and_system_prompt_forwarded() {
        let generator = Arc::new(MockGenerator::with_text("ok"));
        let orchestrator = Orchestrator::new(
            Arc::new(VectorCache::open_in_memory().unwrap()),
            Arc::new(ResponseCache::open_in_memory().unwrap()),
            Arc::new(MemoryStore::open_in_memory().unwrap()),
            Arc::new(MockEmbedder::new(16)),
            generator.clone(),
            OrchestratorConfig {
                system_prompt: Some("Be brief.".to_string()),
                temperature: 0.2,
                top_p: 0.5,
                max_tokens: 64,
                ..Default::default()
            },
        );
        orchestrator
            .answer("q", "m1", &AnswerOptions::default())
            .await
            .unwrap();

        let request = &generator.requests()[0];
        assert_eq!(request.system_prompt.as_deref(), Some("Be brief."));
        assert_eq!(request.temperature, 0.2);
        assert_eq!(request.top_p, 0.5);
        assert_eq!(request.max_tokens, 64);
        assert_eq!(request.model_id, "m1");
    }

    #[tokio::test]
    async fn test_options_disable_tiers() {
        let (orchestrator, _) = orchestrator(MockGenerator::with_text("answer"));
        let options = AnswerOptions::default().with_cache(false).with_memory(false);
        let answer = orchestrator.answer("q", "m1", &options).await.unwrap();

        assert!(answer.memory_id.is_none());
        assert!(answer.stats.optimization_source.is_empty());
        let stats = orchestrator.stats().unwrap();
        assert_eq!(stats.responses.cached_count, 0);
        assert_eq!(stats.responses.lookups, 0);
        assert_eq!(stats.memory.total_records, 0);
    }

    #[tokio::test]
    async fn test_custom_scorer() {
        let (orchestrator, _) = orchestrator(MockGenerator::with_text("answer"));
        let orchestrator = orchestrator.with_scorer(Arc::new(|_: &[f32], _: usize| -> f32 { 0.42 }));
        let answer = orchestrator
            .answer("q", "m1", &AnswerOptions::default())
            .await
            .unwrap();
        let record = orchestrator
            .memory()
            .get(answer.memory_id.unwrap())
            .unwrap()
            .unwrap();
        assert!((record.confidence_score - 0.42).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_caller_tags_and_thread() {
        let (orchestrator, _) = orchestrator(MockGenerator::with_text("answer"));
        orchestrator.memory().create_thread("t1", "Session").unwrap();
        let options = AnswerOptions::default().with_tag("Project-X").with_thread("t1");

        let answer = orchestrator.answer("fix the bug", "m1", &options).await.unwrap();
        let id = answer.memory_id.unwrap();
        let record = orchestrator.memory().get(id).unwrap().unwrap();
        assert!(record.tags.contains("project-x"));
        assert!(record.tags.contains("troubleshooting"));
        assert_eq!(
            orchestrator.memory().thread("t1").unwrap().unwrap().record_ids,
            vec![id]
        );
    }

    #[tokio::test]
    async fn test_thread_exchanges_become_history() {
        let (orchestrator, generator) = orchestrator(MockGenerator::with_text("answer"));
        orchestrator.memory().create_thread("t1", "Session").unwrap();
        let options = AnswerOptions::default().with_thread("t1");

        orchestrator.answer("first question", "m1", &options).await.unwrap();
        orchestrator.answer("second question", "m1", &options).await.unwrap();
        orchestrator
            .answer("unrelated", "m1", &AnswerOptions::default())
            .await
            .unwrap();

        let requests = generator.requests();
        assert!(requests[0].history.is_empty());
        assert_eq!(
            requests[1].history,
            vec![ChatTurn::user("first question"), ChatTurn::assistant("answer")]
        );
        assert!(requests[2].history.is_empty());
    }

    #[tokio::test]
    async fn test_history_keeps_latest_exchanges() {
        let generator = Arc::new(MockGenerator::with_text("answer"));
        let orchestrator = Orchestrator::new(
            Arc::new(VectorCache::open_in_memory().unwrap()),
            Arc::new(ResponseCache::open_in_memory().unwrap()),
            Arc::new(MemoryStore::open_in_memory().unwrap()),
            Arc::new(MockEmbedder::new(16)),
            generator.clone(),
            OrchestratorConfig {
                history_exchanges: 1,
                ..Default::default()
            },
        );
        orchestrator.memory().create_thread("t1", "Session").unwrap();
        let options = AnswerOptions::default().with_thread("t1");
        for query in ["one", "two", "three"] {
            orchestrator.answer(query, "m1", &options).await.unwrap();
        }

        let last = generator.requests().pop().unwrap();
        assert_eq!(
            last.history,
            vec![ChatTurn::user("two"), ChatTurn::assistant("answer")]
        );
    }

    #[tokio::test]
    async fn test_missing_thread_is_not_fatal() {
        let (orchestrator, _) = orchestrator(MockGenerator::with_text("answer"));
        let options = AnswerOptions::default().with_thread("nope");
        let answer = orchestrator.answer("q", "m1", &options).await.unwrap();
        assert!(answer.memory_id.is_some());
    }

    #[tokio::test]
    async fn test_clear_caches_keeps_memory() {
        let (orchestrator, _) = orchestrator(MockGenerator::with_text("answer"));
        orchestrator
            .answer("q", "m1", &AnswerOptions::default())
            .await
            .unwrap();

        orchestrator.clear_caches().await.unwrap();
        let stats = orchestrator.stats().unwrap();
        assert_eq!(stats.responses.cached_count, 0);
        assert_eq!(stats.memory.total_records, 1);

        orchestrator.clear_memory().unwrap();
        assert_eq!(orchestrator.stats().unwrap().memory.total_records, 0);
    }
}
