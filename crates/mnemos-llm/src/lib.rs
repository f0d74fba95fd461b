//! Collaborator seams for mnemos.
//!
//! The caching core never talks to a provider directly. It consumes two
//! traits defined here:
//!
//! ```text
//! ┌──────────────────────────────┐   ┌──────────────────────────────────┐
//! │  Embedder                    │   │  Generator                       │
//! │  - embed() / embed_batch()   │   │  - generate() -> String          │
//! │                              │   │  - generate_stream() -> tokens   │
//! └──────────────────────────────┘   └──────────────────────────────────┘
//!          │           │                      │            │
//!          ▼           ▼                      ▼            ▼
//!     MockEmbedder  OpenAiEmbedder      MockGenerator  OpenAiGenerator
//! ```
//!
//! Failures surface as [`LlmError`]. Transient errors are retried inside the
//! OpenAI-compatible clients via [`with_retry`]; callers never retry.

pub mod embeddings;
pub mod error;
pub mod generator;
pub mod openai;

pub use embeddings::{
    Embedder, EmbedderSpec, MockEmbedder, OpenAiEmbedder, OpenAiEmbedderConfig, SharedEmbedder,
    build_embedder, cosine_similarity,
};
pub use error::{LlmError, Result};
pub use generator::{
    ChatTurn, GenerationRequest, Generator, GeneratorSpec, MockGenerator, Role, SharedGenerator,
    TokenStream, build_generator, with_retry,
};
pub use openai::{OpenAiConfig, OpenAiGenerator, create_shared_generator};
