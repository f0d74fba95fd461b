//! Confidence scoring for newly stored memories.
//!
//! The orchestrator asks a [`ConfidenceScorer`] how much to trust an answer
//! given the similarity scores of the contexts it was generated from. Any
//! `Fn(&[f32], usize) -> f32` closure is a scorer.

use std::sync::Arc;

/// Scores an answer from the contexts that produced it.
pub trait ConfidenceScorer: Send + Sync {
    /// `similarities` holds one score per retrieved context (vector hits and
    /// recalled memories); `context_count` is how many contexts were used.
    /// The result is clamped to `[0.0, 1.0]` by the memory store.
    fn score(&self, similarities: &[f32], context_count: usize) -> f32;
}

impl<F> ConfidenceScorer for F
where
    F: Fn(&[f32], usize) -> f32 + Send + Sync,
{
    fn score(&self, similarities: &[f32], context_count: usize) -> f32 {
        self(similarities, context_count)
    }
}

/// A scorer shared across orchestrator clones.
pub type SharedScorer = Arc<dyn ConfidenceScorer>;

/// Rises from `floor` toward `ceiling` with both mean similarity and the
/// number of contexts, saturating at `saturation` contexts.
///
/// With no context the score is `floor`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SaturatingScorer {
    pub floor: f32,
    pub ceiling: f32,
    pub saturation: usize,
}

impl Default for SaturatingScorer {
    fn default() -> Self {
        Self {
            floor: 0.5,
            ceiling: 0.95,
            saturation: 3,
        }
    }
}

impl ConfidenceScorer for SaturatingScorer {
    fn score(&self, similarities: &[f32], context_count: usize) -> f32 {
        if context_count == 0 || similarities.is_empty() {
            return self.floor;
        }
        let mean = similarities
            .iter()
            .map(|s| if s.is_finite() { s.clamp(0.0, 1.0) } else { 0.0 })
            .sum::<f32>()
            / similarities.len() as f32;
        let saturation = self.saturation.max(1);
        let coverage = context_count.min(saturation) as f32 / saturation as f32;
        self.floor + (self.ceiling - self.floor) * mean * coverage
    }
}
