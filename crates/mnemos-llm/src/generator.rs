//! Generation collaborator trait and implementations.
//!
//! The orchestrator hands a [`GenerationRequest`] (instructions, earlier
//! turns, merged context, question, sampling parameters) to a [`Generator`]
//! and receives either the full reply or an ordered stream of text tokens.

use async_trait::async_trait;
use futures::Stream;
use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{LlmError, Result};

// ─────────────────────────────────────────────────────────────────────────────
// Shared Retry Logic
// ─────────────────────────────────────────────────────────────────────────────

/// Execute an async operation with exponential backoff retry.
///
/// Retries only on transient errors (network failures, rate limits).
/// Non-retryable errors are returned immediately.
pub async fn with_retry<F, Fut, T>(
    max_retries: u32,
    initial_backoff: Duration,
    backend_name: &str,
    mut f: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut backoff = initial_backoff;
    let mut attempt = 0;

    loop {
        match f().await {
            Ok(result) => return Ok(result),
            Err(e) if !e.is_retryable() || attempt >= max_retries => return Err(e),
            Err(e) => {
                let wait = e.retry_after().unwrap_or(backoff);
                attempt += 1;
                tracing::warn!(
                    backend = backend_name,
                    attempt = attempt,
                    max_retries = max_retries,
                    backoff_ms = wait.as_millis() as u64,
                    error = %e,
                    "Request failed, retrying"
                );
                tokio::time::sleep(wait).await;
                backoff *= 2;
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Request / Stream Types
// ─────────────────────────────────────────────────────────────────────────────

/// A stream of text tokens from a generator, in emission order.
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String>> + Send + 'static>>;

/// Who spoke an earlier conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    /// Chat-completions role name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One earlier turn of a conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatTurn {
    pub role: Role,
    pub text: String,
}

impl ChatTurn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            text: text.into(),
        }
    }
}

/// Everything a generator needs to answer one question.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    /// Model identifier passed through to the provider.
    pub model_id: String,
    /// Instruction text, supplied once when the orchestrator is built.
    pub system_prompt: Option<String>,
    /// Earlier turns of the conversation, oldest first.
    pub history: Vec<ChatTurn>,
    /// Merged retrieval context.
    pub context: String,
    /// The user's question.
    pub query: String,
    /// Sampling temperature.
    pub temperature: f32,
    /// Nucleus sampling parameter.
    pub top_p: f32,
    /// Maximum tokens to generate.
    pub max_tokens: u32,
}

impl GenerationRequest {
    /// Create a request with default sampling parameters.
    pub fn new(
        model_id: impl Into<String>,
        context: impl Into<String>,
        query: impl Into<String>,
    ) -> Self {
        Self {
            model_id: model_id.into(),
            system_prompt: None,
            history: Vec::new(),
            context: context.into(),
            query: query.into(),
            temperature: 0.7,
            top_p: 0.9,
            max_tokens: 1000,
        }
    }

    /// Set the instruction text.
    pub fn with_system_prompt(mut self, prompt: Option<String>) -> Self {
        self.system_prompt = prompt;
        self
    }

    /// Set the earlier turns sent ahead of the question.
    pub fn with_history(mut self, history: Vec<ChatTurn>) -> Self {
        self.history = history;
        self
    }

    /// Set the sampling parameters.
    pub fn with_sampling(mut self, temperature: f32, top_p: f32) -> Self {
        self.temperature = temperature;
        self.top_p = top_p;
        self
    }

    /// Set the generation length limit.
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Render the user turn: context block followed by the question.
    pub fn user_prompt(&self) -> String {
        if self.context.trim().is_empty() {
            format!("Question:\n{}", self.query)
        } else {
            format!("Context:\n{}\n\nQuestion:\n{}", self.context, self.query)
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Generator Trait
// ─────────────────────────────────────────────────────────────────────────────

/// Trait for answer-generation providers.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Generate the full reply for a request.
    async fn generate(&self, request: &GenerationRequest) -> Result<String>;

    /// Generate the reply as an ordered stream of tokens.
    ///
    /// The default implementation emits the full reply as a single token.
    async fn generate_stream(&self, request: &GenerationRequest) -> Result<TokenStream> {
        let text = self.generate(request).await?;
        Ok(Box::pin(futures::stream::iter(vec![Ok(text)])))
    }

    /// Get the name of this generator.
    fn name(&self) -> &str;
}

/// A generator that can be shared across threads.
pub type SharedGenerator = Arc<dyn Generator>;

// ─────────────────────────────────────────────────────────────────────────────
// Mock Generator
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug)]
enum MockReply {
    Text(String),
    Fail(String),
}

/// A scripted generator for tests.
///
/// Replies are returned in order; once the script is exhausted the fallback
/// reply (if any) is echoed, otherwise an error is returned. Streaming splits
/// each reply into whitespace-delimited tokens.
#[derive(Debug, Default)]
pub struct MockGenerator {
    replies: parking_lot::Mutex<VecDeque<MockReply>>,
    fallback: Option<String>,
    request_log: parking_lot::Mutex<Vec<GenerationRequest>>,
}

impl MockGenerator {
    /// Create a generator that returns the given replies in order.
    pub fn new(replies: Vec<String>) -> Self {
        Self {
            replies: parking_lot::Mutex::new(replies.into_iter().map(MockReply::Text).collect()),
            fallback: None,
            request_log: parking_lot::Mutex::new(Vec::new()),
        }
    }

    /// Create a generator that always returns the same reply.
    pub fn with_text(text: impl Into<String>) -> Self {
        Self {
            fallback: Some(text.into()),
            ..Self::default()
        }
    }

    /// Create a generator whose next call fails.
    pub fn failing(message: impl Into<String>) -> Self {
        let generator = Self::default();
        generator.push_failure(message);
        generator
    }

    /// Queue another successful reply.
    pub fn push_reply(&self, text: impl Into<String>) {
        self.replies.lock().push_back(MockReply::Text(text.into()));
    }

    /// Queue a failure.
    pub fn push_failure(&self, message: impl Into<String>) {
        self.replies.lock().push_back(MockReply::Fail(message.into()));
    }

    /// Get all requests that were made to this generator.
    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.request_log.lock().clone()
    }

    /// Get the number of requests made.
    pub fn request_count(&self) -> usize {
        self.request_log.lock().len()
    }

    fn next_reply(&self, request: &GenerationRequest) -> Result<String> {
        self.request_log.lock().push(request.clone());

        match self.replies.lock().pop_front() {
            Some(MockReply::Text(text)) => Ok(text),
            Some(MockReply::Fail(message)) => Err(LlmError::Injected(message)),
            None => self.fallback.clone().ok_or_else(|| {
                LlmError::Backend("MockGenerator: no more replies available".to_string())
            }),
        }
    }
}

#[async_trait]
impl Generator for MockGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        self.next_reply(request)
    }

    async fn generate_stream(&self, request: &GenerationRequest) -> Result<TokenStream> {
        let text = self.next_reply(request)?;
        let tokens: Vec<Result<String>> = split_tokens(&text).into_iter().map(Ok).collect();
        Ok(Box::pin(futures::stream::iter(tokens)))
    }

    fn name(&self) -> &str {
        "mock"
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Factory
// ─────────────────────────────────────────────────────────────────────────────

/// Provider-agnostic description of a generator, populated from config.
#[derive(Debug, Clone)]
pub struct GeneratorSpec {
    /// Provider name: "openai", "ollama" or "mock".
    pub provider: String,
    /// API key (required for "openai").
    pub api_key: Option<String>,
    /// Base URL override.
    pub base_url: Option<String>,
    /// Fixed reply for the "mock" provider.
    pub mock_reply: Option<String>,
}

/// Build a `SharedGenerator` from a spec.
pub fn build_generator(spec: &GeneratorSpec) -> Result<SharedGenerator> {
    use crate::openai::{OpenAiConfig, OpenAiGenerator};

    let config = match spec.provider.as_str() {
        "openai" => {
            let api_key = spec.api_key.as_deref().ok_or_else(|| {
                LlmError::Config(
                    "OpenAI generation provider requires an API key. \
                     Set the variable named by [llm] api_key_env."
                        .to_string(),
                )
            })?;
            OpenAiConfig::openai(api_key)
        }
        "ollama" => OpenAiConfig::ollama(),
        "mock" => {
            let reply = spec
                .mock_reply
                .clone()
                .unwrap_or_else(|| "This is a mock answer.".to_string());
            return Ok(Arc::new(MockGenerator::with_text(reply)));
        }
        other => {
            return Err(LlmError::Config(format!(
                "Unknown generation provider '{}'. Valid: openai, ollama, mock",
                other
            )));
        }
    };

    let config = match spec.base_url {
        Some(ref url) => config.with_base_url(url),
        None => config,
    };
    Ok(Arc::new(OpenAiGenerator::new(config)?))
}

/// Split text into tokens that concatenate back to the original.
fn split_tokens(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    for c in text.chars() {
        current.push(c);
        if c.is_whitespace() {
            tokens.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    fn request() -> GenerationRequest {
        GenerationRequest::new("model-1", "some context", "What is RAG?")
    }

    #[tokio::test]
    async fn test_mock_generator_in_order() {
        let generator = MockGenerator::new(vec!["First".to_string(), "Second".to_string()]);

        assert_eq!(generator.generate(&request()).await.unwrap(), "First");
        assert_eq!(generator.generate(&request()).await.unwrap(), "Second");
        assert!(generator.generate(&request()).await.is_err());
        assert_eq!(generator.request_count(), 3);
    }

    #[tokio::test]
    async fn test_mock_generator_fallback() {
        let generator = MockGenerator::with_text("always");
        assert_eq!(generator.generate(&request()).await.unwrap(), "always");
        assert_eq!(generator.generate(&request()).await.unwrap(), "always");
    }

    #[tokio::test]
    async fn test_mock_generator_failure() {
        let generator = MockGenerator::failing("boom");
        let err = generator.generate(&request()).await.unwrap_err();
        assert!(err.to_string().contains("boom"));
    }

    #[tokio::test]
    async fn test_mock_generator_stream_reassembles() {
        let generator = MockGenerator::with_text("Retrieval augmented generation combines search.");
        let mut stream = generator.generate_stream(&request()).await.unwrap();

        let mut tokens = Vec::new();
        while let Some(token) = stream.next().await {
            tokens.push(token.unwrap());
        }

        assert_eq!(tokens.len(), 5);
        assert_eq!(
            tokens.concat(),
            "Retrieval augmented generation combines search."
        );
    }

    #[tokio::test]
    async fn test_mock_generator_logs_history() {
        let generator = MockGenerator::with_text("ok");
        let history = vec![ChatTurn::user("Hi"), ChatTurn::assistant("Hello")];
        generator
            .generate(&request().with_history(history.clone()))
            .await
            .unwrap();
        assert_eq!(generator.requests()[0].history, history);
        assert_eq!(Role::Assistant.as_str(), "assistant");
    }

    #[test]
    fn test_user_prompt() {
        assert_eq!(
            request().user_prompt(),
            "Context:\nsome context\n\nQuestion:\nWhat is RAG?"
        );
        let bare = GenerationRequest::new("m", "  ", "Q?");
        assert_eq!(bare.user_prompt(), "Question:\nQ?");
    }

    #[tokio::test]
    async fn test_with_retry_gives_up_on_permanent_error() {
        let mut calls = 0;
        let result: Result<()> = with_retry(3, Duration::from_millis(1), "test", || {
            calls += 1;
            async { Err(LlmError::Auth("nope".to_string())) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn test_with_retry_retries_transient_error() {
        let mut calls = 0;
        let result = with_retry(2, Duration::from_millis(1), "test", || {
            calls += 1;
            let attempt = calls;
            async move {
                if attempt < 3 {
                    Err(LlmError::Network("flaky".to_string()))
                } else {
                    Ok(attempt)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 3);
    }
}
