//! Embedding collaborators.
//!
//! The [`Embedder`] trait maps text to dense vectors. The vector cache only
//! ever talks to this trait, so the provider behind it can be swapped freely.
//!
//! # Implementations
//!
//! - [`MockEmbedder`]: deterministic bag-of-words hashing, for tests and offline use
//! - [`OpenAiEmbedder`]: OpenAI-compatible `/embeddings` endpoint

use async_trait::async_trait;
use reqwest::Client;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use crate::error::{LlmError, Result};

// ─────────────────────────────────────────────────────────────────────────────
// Embedder Trait
// ─────────────────────────────────────────────────────────────────────────────

/// Trait for generating text embeddings.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Generate an embedding for a single text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Generate embeddings for multiple texts in a batch.
    ///
    /// Default implementation calls `embed` for each text sequentially.
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            results.push(self.embed(text).await?);
        }
        Ok(results)
    }

    /// Get the dimensionality of embeddings produced by this embedder.
    fn dimensions(&self) -> usize;

    /// Get the name of this embedder.
    fn name(&self) -> &str;
}

/// A shared embedder that can be used across threads.
pub type SharedEmbedder = Arc<dyn Embedder>;

// ─────────────────────────────────────────────────────────────────────────────
// Mock Embedder
// ─────────────────────────────────────────────────────────────────────────────

/// A deterministic embedder for tests and offline runs.
///
/// Each lowercase word is hashed into one dimension, so texts that share
/// vocabulary produce vectors with positive cosine similarity. Clones share
/// their call counters, which lets tests assert how often the collaborator
/// was invoked.
#[derive(Debug, Clone)]
pub struct MockEmbedder {
    dimensions: usize,
    calls: Arc<AtomicUsize>,
    texts_embedded: Arc<AtomicUsize>,
    failing: Arc<AtomicBool>,
    fail_from: Arc<AtomicUsize>,
}

impl MockEmbedder {
    /// Create a new mock embedder with the specified dimensions.
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
            calls: Arc::new(AtomicUsize::new(0)),
            texts_embedded: Arc::new(AtomicUsize::new(0)),
            failing: Arc::new(AtomicBool::new(false)),
            fail_from: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Number of `embed`/`embed_batch` invocations so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Number of individual texts embedded so far.
    pub fn texts_embedded(&self) -> usize {
        self.texts_embedded.load(Ordering::SeqCst)
    }

    /// Reset both counters.
    pub fn reset_counts(&self) {
        self.calls.store(0, Ordering::SeqCst);
        self.texts_embedded.store(0, Ordering::SeqCst);
    }

    /// Make every subsequent call fail with an injected error.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Fail the `call`-th invocation (counting from 1) and every one after it.
    /// Zero disables this.
    pub fn fail_from_call(&self, call: usize) {
        self.fail_from.store(call, Ordering::SeqCst);
    }

    fn vectorize(&self, text: &str) -> Vec<f32> {
        let mut embedding = vec![0.0f32; self.dimensions];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let slot = (simple_hash(&word.to_lowercase()) % self.dimensions as u64) as usize;
            embedding[slot] += 1.0;
        }

        // Normalize to unit length
        let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut embedding {
                *x /= norm;
            }
        }
        embedding
    }

    fn check_failing(&self) -> Result<()> {
        let fail_from = self.fail_from.load(Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst)
            || (fail_from > 0 && self.calls.load(Ordering::SeqCst) >= fail_from)
        {
            return Err(LlmError::Injected("MockEmbedder".to_string()));
        }
        Ok(())
    }
}

impl Default for MockEmbedder {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl Embedder for MockEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.check_failing()?;
        self.texts_embedded.fetch_add(1, Ordering::SeqCst);
        Ok(self.vectorize(text))
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.check_failing()?;
        self.texts_embedded.fetch_add(texts.len(), Ordering::SeqCst);
        Ok(texts.iter().map(|t| self.vectorize(t)).collect())
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn name(&self) -> &str {
        "mock"
    }
}

/// Simple hash function for deterministic embedding generation.
fn simple_hash(s: &str) -> u64 {
    let mut hash: u64 = 5381;
    for byte in s.bytes() {
        hash = hash.wrapping_mul(33).wrapping_add(byte as u64);
    }
    hash
}

// ─────────────────────────────────────────────────────────────────────────────
// OpenAI Embedder
// ─────────────────────────────────────────────────────────────────────────────

/// Configuration for OpenAI-compatible embeddings.
#[derive(Debug, Clone)]
pub struct OpenAiEmbedderConfig {
    /// API key for authentication.
    pub api_key: String,
    /// Base URL for the API.
    pub base_url: String,
    /// Model to use for embeddings.
    pub model: String,
    /// Request timeout.
    pub timeout: Duration,
}

impl OpenAiEmbedderConfig {
    /// Create a new config with the given API key.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: "https://api.openai.com/v1".to_string(),
            model: "text-embedding-3-small".to_string(),
            timeout: Duration::from_secs(60),
        }
    }

    /// Set a custom base URL.
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Set the model to use.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }
}

/// OpenAI embeddings API client.
pub struct OpenAiEmbedder {
    client: Client,
    config: OpenAiEmbedderConfig,
    dimensions: usize,
}

impl OpenAiEmbedder {
    /// Create a new OpenAI embedder.
    pub fn new(config: OpenAiEmbedderConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| LlmError::Client(e.to_string()))?;

        let dimensions = match config.model.as_str() {
            "text-embedding-3-large" => 3072,
            _ => 1536,
        };

        Ok(Self {
            client,
            config,
            dimensions,
        })
    }

    fn embeddings_url(&self) -> String {
        format!("{}/embeddings", self.config.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let results = self.embed_batch(&[text]).await?;
        results
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::EmptyResponse {
                provider: "openai",
                detail: "no embedding returned".to_string(),
            })
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let request = EmbeddingRequest {
            model: self.config.model.clone(),
            input: texts.iter().map(|s| s.to_string()).collect(),
        };

        tracing::debug!(
            model = %self.config.model,
            inputs = texts.len(),
            "Requesting embeddings"
        );

        let response = self
            .client
            .post(self.embeddings_url())
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(match status.as_u16() {
                401 => LlmError::Auth(body),
                429 => LlmError::rate_limit(body),
                _ => LlmError::Backend(format!(
                    "Embedding request failed: HTTP {} - {}",
                    status, body
                )),
            });
        }

        let result: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Serialization(format!("Failed to parse response: {}", e)))?;

        // Sort by index to ensure correct order
        let mut embeddings = result.data;
        embeddings.sort_by_key(|e| e.index);

        if embeddings.len() != texts.len() {
            return Err(LlmError::Backend(format!(
                "Expected {} embeddings, got {}",
                texts.len(),
                embeddings.len()
            )));
        }

        Ok(embeddings.into_iter().map(|e| e.embedding).collect())
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn name(&self) -> &str {
        "openai"
    }
}

#[derive(Debug, serde::Serialize)]
struct EmbeddingRequest {
    model: String,
    input: Vec<String>,
}

#[derive(Debug, serde::Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, serde::Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Factory
// ─────────────────────────────────────────────────────────────────────────────

/// Provider-agnostic description of an embedder, populated from config.
#[derive(Debug, Clone)]
pub struct EmbedderSpec {
    /// Provider name: "openai" or "mock".
    pub provider: String,
    /// API key (required for "openai").
    pub api_key: Option<String>,
    /// Model name override.
    pub model: Option<String>,
    /// Base URL override.
    pub base_url: Option<String>,
    /// Requested dimensions (mock only).
    pub dimensions: Option<usize>,
}

/// Build a `SharedEmbedder` from a spec.
pub fn build_embedder(spec: &EmbedderSpec) -> Result<SharedEmbedder> {
    match spec.provider.as_str() {
        "openai" => {
            let api_key = spec.api_key.as_deref().ok_or_else(|| {
                LlmError::Config(
                    "OpenAI embedding provider requires an API key. \
                     Set the variable named by [embedding] api_key_env."
                        .to_string(),
                )
            })?;
            let mut config = OpenAiEmbedderConfig::new(api_key);
            if let Some(ref model) = spec.model {
                config = config.with_model(model);
            }
            if let Some(ref base_url) = spec.base_url {
                config = config.with_base_url(base_url);
            }
            Ok(Arc::new(OpenAiEmbedder::new(config)?))
        }
        "mock" => Ok(Arc::new(MockEmbedder::new(
            spec.dimensions.unwrap_or(256),
        ))),
        other => Err(LlmError::Config(format!(
            "Unknown embedding provider '{}'. Valid: openai, mock",
            other
        ))),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Utility Functions
// ─────────────────────────────────────────────────────────────────────────────

/// Calculate cosine similarity between two embeddings.
///
/// Vectors of different length, or with zero norm, score 0.0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a > 0.0 && norm_b > 0.0 {
        dot / (norm_a * norm_b)
    } else {
        0.0
    }
}
