//! OpenAI-compatible chat completions generator.
//!
//! Works with OpenAI itself or any compatible service (Groq, Ollama, local
//! servers). Streaming replies are parsed from server-sent events.

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use reqwest::{Client, Response, header};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{LlmError, Result, parse_retry_after_header};
use crate::generator::{GenerationRequest, Generator, SharedGenerator, TokenStream, with_retry};

/// Default OpenAI API base URL.
const DEFAULT_OPENAI_BASE: &str = "https://api.openai.com/v1";

/// Default timeout for requests.
const DEFAULT_TIMEOUT_SECS: u64 = 300;

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Configuration for the OpenAI-compatible generator.
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    /// API key for authentication (optional for local services like Ollama).
    pub api_key: Option<String>,

    /// Base URL for the API.
    pub base_url: String,

    /// Request timeout.
    pub timeout: Duration,

    /// Maximum retries for transient errors.
    pub max_retries: u32,

    /// Initial backoff duration for retries.
    pub retry_backoff: Duration,

    /// Name for this generator instance.
    pub name: String,
}

impl OpenAiConfig {
    /// Create a new config for OpenAI.
    pub fn openai(api_key: impl Into<String>) -> Self {
        Self {
            api_key: Some(api_key.into()),
            base_url: DEFAULT_OPENAI_BASE.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            max_retries: 3,
            retry_backoff: Duration::from_millis(500),
            name: "openai".to_string(),
        }
    }

    /// Create a new config for Ollama (local).
    pub fn ollama() -> Self {
        Self {
            api_key: None,
            base_url: "http://localhost:11434/v1".to_string(),
            timeout: Duration::from_secs(600),
            max_retries: 3,
            retry_backoff: Duration::from_millis(500),
            name: "ollama".to_string(),
        }
    }

    /// Set a custom base URL.
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Set the generator name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set max retries.
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Generator
// ─────────────────────────────────────────────────────────────────────────────

/// OpenAI-compatible chat completions generator.
pub struct OpenAiGenerator {
    client: Client,
    config: OpenAiConfig,
}

impl OpenAiGenerator {
    /// Create a new generator with the given configuration.
    pub fn new(config: OpenAiConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| LlmError::Client(e.to_string()))?;

        Ok(Self { client, config })
    }

    fn completions_url(&self) -> String {
        format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        )
    }

    fn add_headers(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let builder = builder.header(header::CONTENT_TYPE, "application/json");

        if let Some(ref api_key) = self.config.api_key {
            builder.header(header::AUTHORIZATION, format!("Bearer {}", api_key))
        } else {
            builder
        }
    }

    fn to_chat_request(request: &GenerationRequest, stream: bool) -> ChatRequest {
        let mut messages = Vec::with_capacity(request.history.len() + 2);
        if let Some(ref system) = request.system_prompt {
            messages.push(ChatMessage {
                role: "system".to_string(),
                content: system.clone(),
            });
        }
        messages.extend(request.history.iter().map(|turn| ChatMessage {
            role: turn.role.as_str().to_string(),
            content: turn.text.clone(),
        }));
        messages.push(ChatMessage {
            role: "user".to_string(),
            content: request.user_prompt(),
        });

        ChatRequest {
            model: request.model_id.clone(),
            messages,
            max_tokens: Some(request.max_tokens),
            temperature: Some(request.temperature),
            top_p: Some(request.top_p),
            stream,
        }
    }

    async fn send(&self, body: &ChatRequest) -> Result<Response> {
        let response = self
            .add_headers(self.client.post(self.completions_url()))
            .json(body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::handle_error_response(response).await);
        }
        Ok(response)
    }

    async fn handle_error_response(response: Response) -> LlmError {
        let status = response.status();
        let retry_after = response
            .headers()
            .get(header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_retry_after_header);
        let body = response.text().await.unwrap_or_default();

        let message = serde_json::from_str::<ErrorResponse>(&body)
            .map(|e| e.error.message)
            .unwrap_or_else(|_| format!("HTTP {}: {}", status, body));

        match status.as_u16() {
            401 | 403 => LlmError::Auth(message),
            429 => LlmError::RateLimit {
                message,
                retry_after,
            },
            500..=599 => LlmError::Backend(format!("Server error: {}", message)),
            _ => LlmError::Backend(message),
        }
    }
}

#[async_trait]
impl Generator for OpenAiGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        let body = Self::to_chat_request(request, false);

        tracing::debug!(
            backend = %self.config.name,
            model = %body.model,
            context_chars = request.context.len(),
            "Sending chat completion request"
        );

        with_retry(
            self.config.max_retries,
            self.config.retry_backoff,
            &self.config.name,
            || async {
                let response = self.send(&body).await?;
                let text = response.text().await?;
                let parsed: ChatResponse = serde_json::from_str(&text)?;
                parsed
                    .choices
                    .into_iter()
                    .next()
                    .and_then(|c| c.message.content)
                    .ok_or_else(|| LlmError::EmptyResponse {
                        provider: "openai",
                        detail: "no choices".to_string(),
                    })
            },
        )
        .await
    }

    async fn generate_stream(&self, request: &GenerationRequest) -> Result<TokenStream> {
        let body = Self::to_chat_request(request, true);
        let response = with_retry(
            self.config.max_retries,
            self.config.retry_backoff,
            &self.config.name,
            || self.send(&body),
        )
        .await?;

        Ok(parse_sse_stream(response.bytes_stream()))
    }

    fn name(&self) -> &str {
        &self.config.name
    }
}

/// Create a shared OpenAI-compatible generator.
pub fn create_shared_generator(config: OpenAiConfig) -> Result<SharedGenerator> {
    Ok(Arc::new(OpenAiGenerator::new(config)?))
}

// ─────────────────────────────────────────────────────────────────────────────
// Wire Types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, serde::Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    stream: bool,
}

#[derive(Debug, serde::Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, serde::Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, serde::Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, serde::Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

#[derive(Debug, serde::Deserialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Debug, serde::Deserialize)]
struct ErrorBody {
    message: String,
}

#[derive(Debug, serde::Deserialize)]
struct StreamChunk {
    choices: Vec<StreamChoice>,
}

#[derive(Debug, serde::Deserialize)]
struct StreamChoice {
    delta: Option<StreamDelta>,
}

#[derive(Debug, serde::Deserialize)]
struct StreamDelta {
    content: Option<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// SSE Streaming
// ─────────────────────────────────────────────────────────────────────────────

struct SseState {
    byte_stream: Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>>,
    buffer: String,
    done: bool,
}

/// Extract the text delta from one SSE line, if it carries one.
///
/// Returns `Err(())` for the `[DONE]` sentinel.
fn parse_sse_line(line: &str) -> std::result::Result<Option<String>, ()> {
    let Some(data) = line.strip_prefix("data:") else {
        return Ok(None);
    };
    let data = data.trim();
    if data == "[DONE]" {
        return Err(());
    }

    Ok(serde_json::from_str::<StreamChunk>(data)
        .ok()
        .and_then(|chunk| chunk.choices.into_iter().next())
        .and_then(|choice| choice.delta)
        .and_then(|delta| delta.content)
        .filter(|content| !content.is_empty()))
}

fn parse_sse_stream(
    byte_stream: impl Stream<Item = reqwest::Result<Bytes>> + Send + 'static,
) -> TokenStream {
    Box::pin(futures::stream::unfold(
        SseState {
            byte_stream: Box::pin(byte_stream),
            buffer: String::new(),
            done: false,
        },
        |mut state| async move {
            if state.done {
                return None;
            }

            loop {
                while let Some(line_end) = state.buffer.find('\n') {
                    let line = state.buffer[..line_end].trim().to_string();
                    state.buffer.drain(..=line_end);

                    match parse_sse_line(&line) {
                        Ok(Some(token)) => return Some((Ok(token), state)),
                        Ok(None) => continue,
                        Err(()) => {
                            state.done = true;
                            return None;
                        }
                    }
                }

                match state.byte_stream.next().await {
                    Some(Ok(bytes)) => {
                        state.buffer.push_str(&String::from_utf8_lossy(&bytes));
                    }
                    Some(Err(e)) => {
                        state.done = true;
                        return Some((Err(LlmError::Network(e.to_string())), state));
                    }
                    None => return None,
                }
            }
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::ChatTurn;

    #[test]
    fn test_parse_sse_line() {
        let line = r#"data: {"choices":[{"delta":{"content":"Hello"}}]}"#;
        assert_eq!(parse_sse_line(line), Ok(Some("Hello".to_string())));

        let empty = r#"data: {"choices":[{"delta":{}}]}"#;
        assert_eq!(parse_sse_line(empty), Ok(None));

        assert_eq!(parse_sse_line(": keep-alive"), Ok(None));
        assert_eq!(parse_sse_line("data: [DONE]"), Err(()));
    }

    #[test]
    fn test_chat_request_shape() {
        let request = GenerationRequest::new("gpt-4o-mini", "ctx", "q?")
            .with_system_prompt(Some("Be brief.".to_string()))
            .with_sampling(0.2, 0.8);
        let body = OpenAiGenerator::to_chat_request(&request, true);

        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["model"], "gpt-4o-mini");
        assert_eq!(json["stream"], true);
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["content"], "Context:\nctx\n\nQuestion:\nq?");
    }

    #[test]
    fn test_chat_request_places_history_before_question() {
        let request = GenerationRequest::new("m", "ctx", "and then?")
            .with_system_prompt(Some("Be brief.".to_string()))
            .with_history(vec![
                ChatTurn::user("What is RAG?"),
                ChatTurn::assistant("Retrieval plus generation."),
            ]);
        let json = serde_json::to_value(OpenAiGenerator::to_chat_request(&request, false)).unwrap();

        let roles: Vec<&str> = json["messages"]
            .as_array()
            .unwrap()
            .iter()
            .map(|m| m["role"].as_str().unwrap())
            .collect();
        assert_eq!(roles, ["system", "user", "assistant", "user"]);
        assert_eq!(json["messages"][2]["content"], "Retrieval plus generation.");
        assert_eq!(json["messages"][3]["content"], "Context:\nctx\n\nQuestion:\nand then?");
    }

    #[test]
    fn test_config_builders() {
        let config = OpenAiConfig::ollama()
            .with_base_url("http://gpu-box:11434/v1")
            .with_name("lab")
            .with_max_retries(1);
        assert!(config.api_key.is_none());
        assert_eq!(config.name, "lab");
        assert_eq!(config.max_retries, 1);
    }

    #[tokio::test]
    async fn test_parse_sse_stream() {
        let payload = concat!(
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n",
            "data: [DONE]\n"
        );
        // Split mid-line to exercise buffering
        let (a, b) = payload.split_at(20);
        let chunks: Vec<reqwest::Result<Bytes>> = vec![
            Ok(Bytes::from(a.to_string())),
            Ok(Bytes::from(b.to_string())),
        ];

        let tokens: Vec<String> = parse_sse_stream(futures::stream::iter(chunks))
            .map(|t| t.unwrap())
            .collect()
            .await;
        assert_eq!(tokens, vec!["Hel".to_string(), "lo".to_string()]);
    }
}
