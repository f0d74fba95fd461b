//! CLI command handlers.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use mnemos_cache::{KnowledgeOptions, MemoryStore, MemoryStoreConfig, ResponseCache, VectorCache};
use mnemos_config::{MnemosConfig, StoragePaths};
use mnemos_llm::{
    EmbedderSpec, GeneratorSpec, MockEmbedder, MockGenerator, SharedEmbedder, SharedGenerator,
    build_embedder, build_generator,
};
use mnemos_rag::{Orchestrator, OrchestratorConfig};

pub mod ask;
pub mod clear;
pub mod init;
pub mod memory;
pub mod stats;
pub mod thread;

/// Shared context for all commands.
#[derive(Debug, Clone)]
pub struct Context {
    /// Output as JSON for scripting.
    pub json_output: bool,
    /// Verbose output enabled.
    pub verbose: bool,
    /// Merged configuration.
    pub config: MnemosConfig,
    /// Directory relative config paths resolve against.
    pub config_base: Option<PathBuf>,
    /// Store and log locations.
    pub paths: StoragePaths,
}

impl Context {
    /// Orchestrator wired to the configured embedding and generation providers.
    pub fn orchestrator(&self) -> Result<Orchestrator> {
        let embedder = build_embedder(&self.embedder_spec())?;
        let generator = build_generator(&self.generator_spec())?;
        self.assemble(embedder, generator)
    }

    /// Orchestrator for commands that only touch the stores.
    ///
    /// Its collaborators are inert placeholders, so no provider credentials
    /// are needed.
    pub fn offline_orchestrator(&self) -> Result<Orchestrator> {
        self.assemble(
            Arc::new(MockEmbedder::new(1)),
            Arc::new(MockGenerator::new(Vec::new())),
        )
    }

    /// Open only the memory store.
    pub fn memory_store(&self) -> Result<MemoryStore> {
        Ok(MemoryStore::open(&self.paths.memory)?.with_config(self.memory_config()))
    }

    /// Embedding model id recorded with vector entries.
    pub fn embedding_model_id(&self) -> String {
        self.config.embedding().model_id()
    }

    /// Generation model id used for requests and cache keys.
    pub fn model_id(&self) -> String {
        self.config.llm().model
    }

    fn assemble(&self, embedder: SharedEmbedder, generator: SharedGenerator) -> Result<Orchestrator> {
        let vectors = VectorCache::open(&self.paths.vectors)?.with_options(self.knowledge_options());
        let responses = ResponseCache::open(&self.paths.responses)?;
        let memory = self.memory_store()?;

        Ok(Orchestrator::new(
            Arc::new(vectors),
            Arc::new(responses),
            Arc::new(memory),
            embedder,
            generator,
            self.orchestrator_config()?,
        ))
    }

    fn orchestrator_config(&self) -> Result<OrchestratorConfig> {
        let llm = self.config.llm();
        let rag = self.config.rag();
        let system_prompt = rag.load_system_prompt(self.config_base.as_deref())?;

        Ok(OrchestratorConfig {
            system_prompt,
            temperature: llm.temperature,
            top_p: llm.top_p,
            max_tokens: llm.max_tokens,
            token_budget: rag.token_budget,
            vector_top_k: rag.vector_top_k,
            memory_limit: rag.memory_limit,
            min_memory_confidence: rag.min_memory_confidence,
            supplemental_chunks: rag.supplemental_chunks,
            min_vector_hits: rag.min_vector_hits,
            history_exchanges: rag.history_exchanges,
        })
    }

    fn knowledge_options(&self) -> KnowledgeOptions {
        let knowledge = self.config.knowledge();
        KnowledgeOptions {
            extensions: knowledge
                .extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_lowercase())
                .collect(),
            chunk_size: knowledge.chunk_size,
            chunk_overlap: knowledge.chunk_overlap,
        }
    }

    fn memory_config(&self) -> MemoryStoreConfig {
        let memory = self.config.memory();
        MemoryStoreConfig {
            retention_threshold: memory.retention_threshold,
            min_similarity: memory.min_similarity,
        }
    }

    fn embedder_spec(&self) -> EmbedderSpec {
        let embedding = self.config.embedding();
        EmbedderSpec {
            api_key: embedding.api_key(),
            provider: embedding.provider,
            model: embedding.model,
            base_url: embedding.base_url,
            dimensions: embedding.dimensions,
        }
    }

    fn generator_spec(&self) -> GeneratorSpec {
        let llm = self.config.llm();
        GeneratorSpec {
            api_key: llm.api_key(),
            provider: llm.provider,
            base_url: llm.base_url,
            mock_reply: llm.mock_reply,
        }
    }
}

/// Truncate `s` to at most `max` characters, marking the cut.
pub fn truncate(s: &str, max: usize) -> String {
    let single_line = s.replace('\n', " ");
    if single_line.chars().count() <= max {
        return single_line;
    }
    let cut: String = single_line.chars().take(max.saturating_sub(3)).collect();
    format!("{}...", cut)
}
