//! Error types for the orchestrator.

use std::fmt;

use mnemos_cache::{CacheError, ValidationError};
use mnemos_llm::LlmError;
use thiserror::Error;

/// Which collaborator call failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Embedding the query for vector search.
    Embedding,
    /// Generating the answer.
    Generation,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Embedding => write!(f, "embedding"),
            Self::Generation => write!(f, "generation"),
        }
    }
}

/// Errors surfaced by [`Orchestrator`](crate::Orchestrator) operations.
///
/// Storage-tier failures during a query are logged and absorbed, so they
/// never appear here.
#[derive(Debug, Error)]
pub enum RagError {
    /// A collaborator call failed; fatal for the request.
    #[error("{stage} failed: {source}")]
    Collaborator {
        stage: Stage,
        #[source]
        source: LlmError,
    },

    /// Caller input was malformed.
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Building or maintaining a store failed.
    #[error("Knowledge base error: {0}")]
    KnowledgeBase(CacheError),

    /// The caller cancelled a streaming answer.
    #[error("Cancelled")]
    Cancelled,
}

impl RagError {
    pub(crate) fn generation(source: LlmError) -> Self {
        Self::Collaborator {
            stage: Stage::Generation,
            source,
        }
    }

    pub(crate) fn embedding(source: LlmError) -> Self {
        Self::Collaborator {
            stage: Stage::Embedding,
            source,
        }
    }

    /// The failing collaborator stage, if this is a collaborator error.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Self::Collaborator { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}

impl From<CacheError> for RagError {
    fn from(err: CacheError) -> Self {
        match err {
            CacheError::Validation(v) => Self::Validation(v),
            CacheError::Embedding(e) => Self::embedding(e),
            other => Self::KnowledgeBase(other),
        }
    }
}

/// Result type alias for orchestrator operations.
pub type Result<T> = std::result::Result<T, RagError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collaborator_message_names_stage() {
        let err = RagError::generation(LlmError::Backend("boom".to_string()));
        assert_eq!(err.to_string(), "generation failed: Backend error: boom");
        assert_eq!(err.stage(), Some(Stage::Generation));
    }

    #[test]
    fn test_cache_error_mapping() {
        let err: RagError = CacheError::Validation(ValidationError::EmptyContent).into();
        assert!(matches!(err, RagError::Validation(_)));

        let err: RagError = CacheError::Embedding(LlmError::Network("down".to_string())).into();
        assert_eq!(err.stage(), Some(Stage::Embedding));

        let err: RagError = CacheError::NotFound("x".to_string()).into();
        assert!(matches!(err, RagError::KnowledgeBase(_)));
        assert_eq!(err.stage(), None);
    }
}
