//! Lexical similarity used for memory recall.
//!
//! Records are compared to a query by the Jaccard overlap of their content
//! words. Stopwords and single-character tokens are ignored so that
//! "What is RAG?" and "How does RAG work?" still overlap on `rag`.

use std::collections::HashSet;

const STOPWORDS: &[&str] = &[
    "a", "about", "an", "and", "are", "as", "at", "be", "by", "can", "could", "did", "do", "does",
    "for", "from", "has", "have", "how", "i", "if", "in", "is", "it", "its", "me", "my", "of",
    "on", "or", "should", "so", "that", "the", "their", "then", "there", "these", "this", "to",
    "us", "was", "we", "were", "what", "when", "where", "which", "who", "why", "will", "with",
    "would", "you", "your",
];

/// Lowercase content words of `text`.
pub fn content_words(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .map(str::to_lowercase)
        .filter(|w| w.chars().count() > 1 && !STOPWORDS.contains(&w.as_str()))
        .collect()
}

/// Jaccard similarity of the content words of `a` and `b`, in `[0.0, 1.0]`.
pub fn lexical_similarity(a: &str, b: &str) -> f32 {
    let a = content_words(a);
    let b = content_words(b);
    word_set_similarity(&a, &b)
}

/// Jaccard similarity of two prepared word sets.
pub fn word_set_similarity(a: &HashSet<String>, b: &HashSet<String>) -> f32 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let shared = a.intersection(b).count();
    let union = a.len() + b.len() - shared;
    shared as f32 / union as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_text() {
        assert_eq!(lexical_similarity("Rust ownership", "rust OWNERSHIP"), 1.0);
    }

    #[test]
    fn test_stopwords_ignored() {
        let words = content_words("What is the RAG pipeline?");
        assert_eq!(words.len(), 2);
        assert!(words.contains("rag"));
        assert!(words.contains("pipeline"));
    }

    #[test]
    fn test_related_questions_overlap() {
        let sim = lexical_similarity("What is RAG?", "How does RAG work?");
        assert!((sim - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_disjoint_and_empty() {
        assert_eq!(lexical_similarity("tokio runtime", "sqlite pragma"), 0.0);
        assert_eq!(lexical_similarity("what is", "rag"), 0.0);
    }
}
