//! Content fingerprints and query cache keys.

use sha2::{Digest, Sha256};

/// Separator between the normalized query and the model id in a cache key.
const KEY_SEPARATOR: char = '\u{1f}';

/// SHA-256 hex digest of raw bytes.
pub fn fingerprint(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// SHA-256 hex digest of a string's UTF-8 bytes.
pub fn content_hash(text: &str) -> String {
    fingerprint(text.as_bytes())
}

/// Lowercase and collapse whitespace runs to single spaces.
pub fn normalize_query(query: &str) -> String {
    query
        .split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Deterministic key for an exact-match response lookup.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// Derive the key for a (query, model) pair.
    pub fn new(query: &str, model_id: &str) -> Self {
        let mut input = normalize_query(query);
        input.push(KEY_SEPARATOR);
        input.push_str(model_id);
        Self(content_hash(&input))
    }

    /// The hex digest.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
