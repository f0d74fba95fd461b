//! Knowledge folder discovery and chunking.
//!
//! Documents are discovered recursively under a root folder, filtered by
//! extension, and split into chunks on paragraph boundaries. Paragraphs longer
//! than the chunk size are cut into overlapping windows.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::Result;
use crate::fingerprint::fingerprint;

/// Default file extensions treated as knowledge documents.
pub const DEFAULT_EXTENSIONS: &[&str] = &["txt", "md", "markdown", "rst", "text"];

/// How a knowledge folder is read and chunked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnowledgeOptions {
    /// Lowercase extensions (without the dot) to include.
    pub extensions: Vec<String>,
    /// Maximum chunk length in characters.
    pub chunk_size: usize,
    /// Characters shared between consecutive windows of a long paragraph.
    pub chunk_overlap: usize,
}

impl Default for KnowledgeOptions {
    fn default() -> Self {
        Self {
            extensions: DEFAULT_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
            chunk_size: 1500,
            chunk_overlap: 200,
        }
    }
}

/// A document read from the knowledge folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDocument {
    /// Path relative to the folder root, with `/` separators.
    pub path: String,
    /// UTF-8 text content.
    pub content: String,
    /// SHA-256 of the raw file bytes.
    pub fingerprint: String,
}

/// Load every matching document under `folder`, sorted by relative path.
///
/// Files that are not valid UTF-8 are skipped with a warning.
pub fn load_documents(folder: &Path, options: &KnowledgeOptions) -> Result<Vec<SourceDocument>> {
    let mut documents = Vec::new();

    for entry in WalkDir::new(folder).sort_by_file_name() {
        let entry = entry.map_err(|e| {
            std::io::Error::other(format!("walking {}: {}", folder.display(), e))
        })?;
        if !entry.file_type().is_file() || !has_extension(entry.path(), &options.extensions) {
            continue;
        }

        let bytes = std::fs::read(entry.path())?;
        let fingerprint = fingerprint(&bytes);
        let content = match String::from_utf8(bytes) {
            Ok(content) => content,
            Err(_) => {
                warn!("Skipping non-UTF-8 document {}", entry.path().display());
                continue;
            }
        };

        let relative = entry.path().strip_prefix(folder).unwrap_or(entry.path());
        let path = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/");

        documents.push(SourceDocument {
            path,
            content,
            fingerprint,
        });
    }

    debug!(
        "Discovered {} documents under {}",
        documents.len(),
        folder.display()
    );
    Ok(documents)
}

fn has_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| {
            let e = e.to_lowercase();
            extensions.iter().any(|allowed| allowed.eq_ignore_ascii_case(&e))
        })
        .unwrap_or(false)
}

/// Split text into chunks of at most `chunk_size` characters.
///
/// Paragraphs (separated by blank lines) are packed greedily. A paragraph
/// longer than `chunk_size` becomes windows sharing `overlap` characters.
pub fn chunk_text(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    let chunk_size = chunk_size.max(1);
    let overlap = overlap.min(chunk_size / 2);
    let normalized = text.replace("\r\n", "\n");

    let mut pieces: Vec<String> = Vec::new();
    for paragraph in normalized
        .split("\n\n")
        .map(str::trim)
        .filter(|p| !p.is_empty())
    {
        let chars: Vec<char> = paragraph.chars().collect();
        if chars.len() <= chunk_size {
            pieces.push(paragraph.to_string());
            continue;
        }
        let step = chunk_size - overlap;
        let mut start = 0;
        loop {
            let end = (start + chunk_size).min(chars.len());
            pieces.push(chars[start..end].iter().collect());
            if end == chars.len() {
                break;
            }
            start += step;
        }
    }

    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;
    for piece in pieces {
        let piece_len = piece.chars().count();
        if !current.is_empty() && current_len + 2 + piece_len > chunk_size {
            chunks.push(std::mem::take(&mut current));
            current_len = 0;
        }
        if !current.is_empty() {
            current.push_str("\n\n");
            current_len += 2;
        }
        current.push_str(&piece);
        current_len += piece_len;
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}
