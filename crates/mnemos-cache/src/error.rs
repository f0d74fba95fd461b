//! Error types for the cache crate.

use mnemos_llm::LlmError;
use thiserror::Error;

use crate::validation::ValidationError;

/// Errors that can occur in any of the three cache tiers.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Database connection or operation failed.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Reading the knowledge folder failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Requested resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Stored data could not be decoded.
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// Caller supplied malformed input.
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// The embedding collaborator failed during a build.
    #[error("Embedding failed: {0}")]
    Embedding(#[from] LlmError),
}

impl CacheError {
    /// Returns true if this error was caused by caller input rather than storage.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}

/// Result type alias for cache operations.
pub type Result<T> = std::result::Result<T, CacheError>;
