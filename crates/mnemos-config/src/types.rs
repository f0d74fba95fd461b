//! Configuration types mapping to the TOML schema.
//!
//! Top-level config:
//! ```toml
//! [storage]     # where the three stores live
//! [llm]         # answer generation
//! [embedding]   # document and query embeddings
//! [rag]         # retrieval, context budget, prompts
//! [memory]      # memory store retention and recall
//! [knowledge]   # document discovery and chunking
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};

/// Application name for platform directory resolution.
pub(crate) const APP_NAME: &str = "mnemos";

/// Environment variable holding the OpenAI API key unless overridden.
pub const DEFAULT_API_KEY_ENV: &str = "OPENAI_API_KEY";

// ─────────────────────────────────────────────────────────────────────────────
// Top-level Config
// ─────────────────────────────────────────────────────────────────────────────

/// Root configuration structure.
///
/// All sections are optional so that partial configs (e.g., project-local
/// overrides) can be loaded and merged. Accessors fall back to defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MnemosConfig {
    pub storage: Option<StorageConfig>,
    pub llm: Option<LlmConfig>,
    pub embedding: Option<EmbeddingConfig>,
    pub rag: Option<RagConfig>,
    pub memory: Option<MemoryConfig>,
    pub knowledge: Option<KnowledgeConfig>,
}

impl MnemosConfig {
    /// Create an empty config.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        Ok(toml::from_str(toml_str)?)
    }

    /// Serialize to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Merge another config on top of this one (other takes priority).
    ///
    /// Sections are replaced whole, not field by field.
    pub fn merge(&mut self, other: MnemosConfig) {
        if other.storage.is_some() {
            self.storage = other.storage;
        }
        if other.llm.is_some() {
            self.llm = other.llm;
        }
        if other.embedding.is_some() {
            self.embedding = other.embedding;
        }
        if other.rag.is_some() {
            self.rag = other.rag;
        }
        if other.memory.is_some() {
            self.memory = other.memory;
        }
        if other.knowledge.is_some() {
            self.knowledge = other.knowledge;
        }
    }

    pub fn storage(&self) -> StorageConfig {
        self.storage.clone().unwrap_or_default()
    }

    pub fn llm(&self) -> LlmConfig {
        self.llm.clone().unwrap_or_default()
    }

    pub fn embedding(&self) -> EmbeddingConfig {
        self.embedding.clone().unwrap_or_default()
    }

    pub fn rag(&self) -> RagConfig {
        self.rag.clone().unwrap_or_default()
    }

    pub fn memory(&self) -> MemoryConfig {
        self.memory.clone().unwrap_or_default()
    }

    pub fn knowledge(&self) -> KnowledgeConfig {
        self.knowledge.clone().unwrap_or_default()
    }

    /// Check value ranges, returning human-readable warnings for values that
    /// are accepted but suspicious.
    pub fn validate(&self) -> Result<Vec<String>> {
        let mut warnings = Vec::new();

        let llm = self.llm();
        if !(0.0..=2.0).contains(&llm.temperature) {
            return Err(ConfigError::InvalidValue {
                field: "llm.temperature".to_string(),
                reason: format!("{} is outside 0..=2", llm.temperature),
            });
        }
        if !(0.0..=1.0).contains(&llm.top_p) {
            return Err(ConfigError::InvalidValue {
                field: "llm.top_p".to_string(),
                reason: format!("{} is outside 0..=1", llm.top_p),
            });
        }

        let memory = self.memory();
        for (field, value) in [
            ("memory.retention_threshold", memory.retention_threshold),
            ("memory.min_similarity", memory.min_similarity),
            ("rag.min_memory_confidence", self.rag().min_memory_confidence),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    reason: format!("{} is outside 0..=1", value),
                });
            }
        }

        let knowledge = self.knowledge();
        if knowledge.chunk_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "knowledge.chunk_size".to_string(),
                reason: "must be positive".to_string(),
            });
        }
        if knowledge.chunk_overlap * 2 > knowledge.chunk_size {
            warnings.push(format!(
                "knowledge.chunk_overlap ({}) exceeds half of chunk_size ({}); it will be capped",
                knowledge.chunk_overlap, knowledge.chunk_size
            ));
        }

        if self.rag().token_budget == 0 {
            warnings.push("rag.token_budget is 0; answers will be generated without context".to_string());
        }

        Ok(warnings)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Storage
// ─────────────────────────────────────────────────────────────────────────────

/// Storage configuration (`[storage]`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding the stores and logs.
    /// Default: `<platform data dir>/mnemos`
    pub data_dir: Option<PathBuf>,
}

impl StorageConfig {
    /// Resolve the data directory, falling back to the platform default.
    pub fn resolve_data_dir(&self) -> Result<PathBuf> {
        match self.data_dir {
            Some(ref dir) => Ok(dir.clone()),
            None => dirs::data_dir()
                .map(|d| d.join(APP_NAME))
                .ok_or(ConfigError::NoDataDir),
        }
    }
}

/// File locations derived from a data directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoragePaths {
    pub data_dir: PathBuf,
    pub vectors: PathBuf,
    pub responses: PathBuf,
    pub memory: PathBuf,
    pub logs: PathBuf,
}

impl StoragePaths {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        Self {
            vectors: data_dir.join("vectors.db"),
            responses: data_dir.join("responses.db"),
            memory: data_dir.join("memory.db"),
            logs: data_dir.join("logs"),
            data_dir,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// LLM
// ─────────────────────────────────────────────────────────────────────────────

/// Generation configuration (`[llm]`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// "openai", "ollama" or "mock".
    pub provider: String,
    /// Model identifier sent with each request; also part of the cache key.
    pub model: String,
    pub base_url: Option<String>,
    /// Name of the environment variable holding the API key.
    pub api_key_env: String,
    pub temperature: f32,
    pub top_p: f32,
    pub max_tokens: u32,
    /// Fixed reply for the mock provider.
    pub mock_reply: Option<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-4o-mini".to_string(),
            base_url: None,
            api_key_env: DEFAULT_API_KEY_ENV.to_string(),
            temperature: 0.7,
            top_p: 0.9,
            max_tokens: 1000,
            mock_reply: None,
        }
    }
}

impl LlmConfig {
    /// Read the API key from the configured environment variable.
    pub fn api_key(&self) -> Option<String> {
        read_env(&self.api_key_env)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Embedding
// ─────────────────────────────────────────────────────────────────────────────

/// Embedding provider configuration (`[embedding]`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// "openai" or "mock".
    pub provider: String,
    pub model: Option<String>,
    pub base_url: Option<String>,
    pub api_key_env: String,
    pub dimensions: Option<usize>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: None,
            base_url: None,
            api_key_env: DEFAULT_API_KEY_ENV.to_string(),
            dimensions: None,
        }
    }
}

impl EmbeddingConfig {
    pub fn api_key(&self) -> Option<String> {
        read_env(&self.api_key_env)
    }

    /// Identifier recorded with every vector entry.
    ///
    /// Changing it invalidates the whole vector cache on the next build.
    pub fn model_id(&self) -> String {
        if let Some(ref model) = self.model {
            return model.clone();
        }
        match self.provider.as_str() {
            "openai" => "text-embedding-3-small".to_string(),
            other => format!("{}-{}", other, self.dimensions.unwrap_or(256)),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Retrieval
// ─────────────────────────────────────────────────────────────────────────────

/// Retrieval and context-assembly configuration (`[rag]`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RagConfig {
    /// Merged-context budget in estimated tokens.
    pub token_budget: usize,
    pub vector_top_k: usize,
    pub memory_limit: usize,
    pub min_memory_confidence: f32,
    pub supplemental_chunks: usize,
    pub min_vector_hits: usize,
    /// Earlier thread exchanges sent with `ask --thread`.
    pub history_exchanges: usize,
    /// Inline system prompt. Ignored when `system_prompt_file` is set.
    pub system_prompt: Option<String>,
    pub system_prompt_file: Option<PathBuf>,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            token_budget: 3000,
            vector_top_k: 3,
            memory_limit: 3,
            min_memory_confidence: 0.0,
            supplemental_chunks: 2,
            min_vector_hits: 1,
            history_exchanges: 5,
            system_prompt: None,
            system_prompt_file: None,
        }
    }
}

impl RagConfig {
    /// Resolve the system prompt, reading `system_prompt_file` if set.
    ///
    /// Relative prompt paths are resolved against `base_dir`.
    pub fn load_system_prompt(&self, base_dir: Option<&Path>) -> Result<Option<String>> {
        let Some(ref file) = self.system_prompt_file else {
            return Ok(self.system_prompt.clone());
        };
        let path = match base_dir {
            Some(base) if file.is_relative() => base.join(file),
            _ => file.clone(),
        };
        let text = std::fs::read_to_string(&path).map_err(|e| ConfigError::ReadPrompt {
            path: path.display().to_string(),
            source: e,
        })?;
        let text = text.trim().to_string();
        Ok((!text.is_empty()).then_some(text))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Memory
// ─────────────────────────────────────────────────────────────────────────────

/// Memory store configuration (`[memory]`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Records at or above this confidence survive cleanup.
    pub retention_threshold: f32,
    /// Minimum lexical similarity for recall.
    pub min_similarity: f32,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            retention_threshold: 0.7,
            min_similarity: 0.1,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Knowledge
// ─────────────────────────────────────────────────────────────────────────────

/// Document discovery and chunking (`[knowledge]`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KnowledgeConfig {
    pub extensions: Vec<String>,
    /// Maximum chunk length in characters.
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        Self {
            extensions: ["txt", "md", "markdown", "rst", "text"]
                .iter()
                .map(|e| e.to_string())
                .collect(),
            chunk_size: 1500,
            chunk_overlap: 200,
        }
    }
}

fn read_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = MnemosConfig::from_toml("").unwrap();
        assert!(config.llm.is_none());
        assert_eq!(config.llm().temperature, 0.7);
        assert_eq!(config.llm().max_tokens, 1000);
        assert_eq!(config.rag().token_budget, 3000);
        assert_eq!(config.rag().vector_top_k, 3);
        assert_eq!(config.memory().retention_threshold, 0.7);
        assert_eq!(config.knowledge().chunk_size, 1500);
        assert_eq!(config.knowledge().extensions.len(), 5);
    }

    #[test]
    fn test_partial_section_fills_defaults() {
        let config = MnemosConfig::from_toml(
            r#"
[rag]
token_budget = 500

[llm]
provider = "mock"
mock_reply = "hello"
"#,
        )
        .unwrap();
        let rag = config.rag();
        assert_eq!(rag.token_budget, 500);
        assert_eq!(rag.memory_limit, 3);
        assert_eq!(rag.history_exchanges, 5);
        let llm = config.llm();
        assert_eq!(llm.provider, "mock");
        assert_eq!(llm.mock_reply.as_deref(), Some("hello"));
        assert_eq!(llm.top_p, 0.9);
    }

    #[test]
    fn test_merge_replaces_whole_sections() {
        let mut base = MnemosConfig::from_toml(
            r#"
[llm]
model = "base-model"
temperature = 0.2

[memory]
retention_threshold = 0.8
"#,
        )
        .unwrap();
        let overlay = MnemosConfig::from_toml(
            r#"
[llm]
model = "project-model"
"#,
        )
        .unwrap();
        base.merge(overlay);

        assert_eq!(base.llm().model, "project-model");
        assert_eq!(base.llm().temperature, 0.7);
        assert_eq!(base.memory().retention_threshold, 0.8);
    }

    #[test]
    fn test_toml_roundtrip_preserves_sections() {
        let mut config = MnemosConfig::new();
        config.rag = Some(RagConfig {
            token_budget: 42,
            ..Default::default()
        });
        let text = config.to_toml().unwrap();
        assert_eq!(MnemosConfig::from_toml(&text).unwrap(), config);
    }

    #[test]
    fn test_validate_rejects_out_of_range() {
        let config = MnemosConfig::from_toml("[llm]\ntop_p = 1.5\n").unwrap();
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref field, .. } if field == "llm.top_p"));

        let config = MnemosConfig::from_toml("[memory]\nmin_similarity = -0.1\n").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_warns_on_large_overlap() {
        let config =
            MnemosConfig::from_toml("[knowledge]\nchunk_size = 100\nchunk_overlap = 80\n").unwrap();
        let warnings = config.validate().unwrap();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("chunk_overlap"));
    }

    #[test]
    fn test_storage_paths() {
        let paths = StoragePaths::new("/var/lib/mnemos");
        assert_eq!(paths.vectors, PathBuf::from("/var/lib/mnemos/vectors.db"));
        assert_eq!(paths.responses, PathBuf::from("/var/lib/mnemos/responses.db"));
        assert_eq!(paths.memory, PathBuf::from("/var/lib/mnemos/memory.db"));
        assert_eq!(paths.logs, PathBuf::from("/var/lib/mnemos/logs"));
    }

    #[test]
    fn test_explicit_data_dir_wins() {
        let storage = StorageConfig {
            data_dir: Some(PathBuf::from("/tmp/x")),
        };
        assert_eq!(storage.resolve_data_dir().unwrap(), PathBuf::from("/tmp/x"));
    }

    #[test]
    fn test_embedding_model_id() {
        assert_eq!(EmbeddingConfig::default().model_id(), "text-embedding-3-small");
        let mock = EmbeddingConfig {
            provider: "mock".to_string(),
            dimensions: Some(64),
            ..Default::default()
        };
        assert_eq!(mock.model_id(), "mock-64");
        let named = EmbeddingConfig {
            model: Some("custom".to_string()),
            ..Default::default()
        };
        assert_eq!(named.model_id(), "custom");
    }

    #[test]
    fn test_system_prompt_inline() {
        let rag = RagConfig {
            system_prompt: Some("Be brief.".to_string()),
            ..Default::default()
        };
        assert_eq!(rag.load_system_prompt(None).unwrap().as_deref(), Some("Be brief."));
    }

    #[test]
    fn test_system_prompt_file_relative_to_base() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("prompt.txt"), "  Answer from context.\n").unwrap();
        let rag = RagConfig {
            system_prompt: Some("ignored".to_string()),
            system_prompt_file: Some(PathBuf::from("prompt.txt")),
            ..Default::default()
        };
        let prompt = rag.load_system_prompt(Some(dir.path())).unwrap();
        assert_eq!(prompt.as_deref(), Some("Answer from context."));
    }

    #[test]
    fn test_system_prompt_file_missing() {
        let rag = RagConfig {
            system_prompt_file: Some(PathBuf::from("/nonexistent/prompt.txt")),
            ..Default::default()
        };
        assert!(matches!(
            rag.load_system_prompt(None),
            Err(ConfigError::ReadPrompt { .. })
        ));
    }
}
