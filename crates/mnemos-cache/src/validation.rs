//! Validation for data entering the stores.
//!
//! Confidence scores are clamped into `[0.0, 1.0]` when finite and rejected
//! otherwise. Identifiers and content must be non-empty.

use std::path::PathBuf;

// ─────────────────────────────────────────────────────────────────────────────
// Validation Error
// ─────────────────────────────────────────────────────────────────────────────

/// Specific validation error types for cache data.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    /// Content to store is empty or whitespace.
    #[error("content is empty")]
    EmptyContent,

    /// Confidence score is NaN or infinite.
    #[error("confidence score {0} is not a finite number")]
    InvalidConfidence(f32),

    /// A thread with this ID already exists.
    #[error("thread '{0}' already exists")]
    DuplicateThread(String),

    /// No thread with this ID exists.
    #[error("thread '{0}' not found")]
    ThreadNotFound(String),

    /// Thread ID is empty.
    #[error("thread ID is empty")]
    EmptyThreadId,

    /// Knowledge folder does not exist or is not a directory.
    #[error("knowledge folder {0:?} does not exist")]
    MissingFolder(PathBuf),

    /// Embedding dimension mismatch.
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Expected dimension.
        expected: usize,
        /// Actual dimension.
        actual: usize,
    },

    /// The embedder returned a different number of vectors than inputs.
    #[error("embedder returned {actual} vectors for {expected} inputs")]
    EmbeddingCountMismatch {
        /// Number of inputs.
        expected: usize,
        /// Number of vectors returned.
        actual: usize,
    },
}

// ─────────────────────────────────────────────────────────────────────────────
// Validators
// ─────────────────────────────────────────────────────────────────────────────

/// Clamp a confidence score into `[0.0, 1.0]`.
///
/// Returns an error for NaN and infinities.
pub fn validate_confidence(score: f32) -> Result<f32, ValidationError> {
    if !score.is_finite() {
        return Err(ValidationError::InvalidConfidence(score));
    }
    Ok(score.clamp(0.0, 1.0))
}

/// Reject empty or whitespace-only content.
pub fn validate_content(content: &str) -> Result<(), ValidationError> {
    if content.trim().is_empty() {
        return Err(ValidationError::EmptyContent);
    }
    Ok(())
}

/// Reject empty thread identifiers.
pub fn validate_thread_id(thread_id: &str) -> Result<(), ValidationError> {
    if thread_id.trim().is_empty() {
        return Err(ValidationError::EmptyThreadId);
    }
    Ok(())
}

/// Check that every embedding has the same dimension as the first.
pub fn validate_dimensions(embeddings: &[Vec<f32>]) -> Result<(), ValidationError> {
    let Some(expected) = embeddings.first().map(Vec::len) else {
        return Ok(());
    };
    for embedding in embeddings {
        if embedding.len() != expected {
            return Err(ValidationError::DimensionMismatch {
                expected,
                actual: embedding.len(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confidence_is_clamped() {
        assert_eq!(validate_confidence(0.4), Ok(0.4));
        assert_eq!(validate_confidence(1.7), Ok(1.0));
        assert_eq!(validate_confidence(-0.2), Ok(0.0));
    }

    #[test]
    fn test_non_finite_confidence_rejected() {
        assert!(matches!(
            validate_confidence(f32::NAN),
            Err(ValidationError::InvalidConfidence(_))
        ));
        assert!(validate_confidence(f32::INFINITY).is_err());
        assert!(validate_confidence(f32::NEG_INFINITY).is_err());
    }

    #[test]
    fn test_empty_content() {
        assert_eq!(validate_content("   \n"), Err(ValidationError::EmptyContent));
        assert!(validate_content("hello").is_ok());
    }

    #[test]
    fn test_thread_id() {
        assert_eq!(validate_thread_id(""), Err(ValidationError::EmptyThreadId));
        assert!(validate_thread_id("t-1").is_ok());
    }

    #[test]
    fn test_dimensions() {
        assert!(validate_dimensions(&[]).is_ok());
        assert!(validate_dimensions(&[vec![0.0; 3], vec![1.0; 3]]).is_ok());
        assert_eq!(
            validate_dimensions(&[vec![0.0; 3], vec![1.0; 2]]),
            Err(ValidationError::DimensionMismatch {
                expected: 3,
                actual: 2
            })
        );
    }
}
