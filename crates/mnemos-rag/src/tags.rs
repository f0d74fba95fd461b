//! Keyword tagging of queries.

use std::collections::BTreeSet;

/// Maximum number of derived tags per query.
pub const MAX_DERIVED_TAGS: usize = 3;

const CATEGORIES: &[(&str, &[&str])] = &[
    ("implementation", &["how", "build", "create", "develop"]),
    ("explanation", &["what", "explain", "describe", "why"]),
    ("troubleshooting", &["error", "bug", "fix", "issue", "problem"]),
    ("design", &["architecture", "design", "pattern", "structure"]),
];

/// Categorize a query by its keywords, returning at most three tags.
pub fn extract_tags(query: &str) -> BTreeSet<String> {
    let words: Vec<String> = query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect();

    CATEGORIES
        .iter()
        .filter(|(_, keywords)| words.iter().any(|w| keywords.contains(&w.as_str())))
        .map(|(tag, _)| tag.to_string())
        .take(MAX_DERIVED_TAGS)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(query: &str) -> Vec<String> {
        extract_tags(query).into_iter().collect()
    }

    #[test]
    fn test_single_category() {
        assert_eq!(tags("What is RAG?"), vec!["explanation"]);
        assert_eq!(tags("fix this bug"), vec!["troubleshooting"]);
    }

    #[test]
    fn test_whole_words_only() {
        // "however" contains "how" but is not the keyword
        assert!(tags("however, nothing").is_empty());
    }

    #[test]
    fn test_capped_at_three() {
        let all = tags("how and why does this design error happen");
        assert_eq!(all.len(), 3);
        assert_eq!(all, vec!["explanation", "implementation", "troubleshooting"]);
    }
}
