//! Content-addressed vector cache.
//!
//! Chunk embeddings are persisted in SQLite alongside a `documents` sidecar
//! that records, per source file, the content fingerprint, the embedding
//! model that produced its vectors and the chunking it was split with. A
//! rebuild only re-embeds documents where any of those changed.
//!
//! Searches run against an in-memory snapshot of all entries guarded by a
//! reader/writer lock, so concurrent queries never contend on the database
//! connection. Builds are serialized by a separate async lock.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use mnemos_llm::{Embedder, cosine_similarity};
use parking_lot::{Mutex, RwLock};
use rusqlite::{Connection, params};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use zerocopy::IntoBytes;

use crate::db;
use crate::documents::{KnowledgeOptions, SourceDocument, chunk_text, load_documents};
use crate::error::{CacheError, Result};
use crate::validation::{ValidationError, validate_dimensions};

const SCHEMA_VERSION: i32 = 2;

const SCHEMA: &str = r#"
    -- Sidecar index: one row per source document
    CREATE TABLE IF NOT EXISTS documents (
        path TEXT PRIMARY KEY,
        fingerprint TEXT NOT NULL,
        embedding_model_id TEXT NOT NULL,
        chunking TEXT NOT NULL DEFAULT '',
        chunk_count INTEGER NOT NULL,
        indexed_at TEXT NOT NULL
    );

    -- Chunk embeddings, insertion order preserved by seq
    CREATE TABLE IF NOT EXISTS vector_entries (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        chunk_id TEXT NOT NULL UNIQUE,
        path TEXT NOT NULL REFERENCES documents(path) ON DELETE CASCADE,
        chunk_index INTEGER NOT NULL,
        content TEXT NOT NULL,
        metadata TEXT NOT NULL DEFAULT '{}',
        fingerprint TEXT NOT NULL,
        embedding_model_id TEXT NOT NULL,
        embedding BLOB NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_vector_entries_path
        ON vector_entries(path);
"#;

// ─────────────────────────────────────────────────────────────────────────────
// Types
// ─────────────────────────────────────────────────────────────────────────────

/// One embedded chunk of a source document.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorEntry {
    /// `<relative path>#<chunk index>`.
    pub chunk_id: String,
    /// Relative path of the source document.
    pub source: String,
    /// Position of this chunk within its document.
    pub chunk_index: usize,
    /// Chunk text.
    pub content: String,
    /// Source metadata (`source`, `chunk_index`, `chunk_count`).
    pub metadata: serde_json::Value,
    /// Fingerprint of the source document when this entry was embedded.
    pub fingerprint: String,
    /// Model that produced `embedding`.
    pub embedding_model_id: String,
    /// The embedding vector.
    pub embedding: Vec<f32>,
}

/// A ranked search result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorHit {
    pub chunk_id: String,
    pub source: String,
    pub content: String,
    pub metadata: serde_json::Value,
    pub fingerprint: String,
    /// Cosine similarity to the query vector.
    pub score: f32,
}

/// Outcome of a [`VectorCache::build`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildReport {
    /// Total entries after the build.
    pub count: usize,
    /// Documents currently indexed.
    pub document_count: usize,
    /// Documents that were (re)embedded.
    pub rebuilt_count: usize,
    /// Documents dropped because they left the folder.
    pub removed_count: usize,
    /// Where the cache is persisted.
    pub cache_location: String,
}

/// Vector cache statistics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VectorCacheStats {
    pub document_count: usize,
    pub entry_count: usize,
    /// Model of the current entries, if any.
    pub embedding_model_id: Option<String>,
    pub location: String,
}

#[derive(Debug, Clone)]
struct IndexedDocument {
    fingerprint: String,
    embedding_model_id: String,
    chunking: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// Vector Cache
// ─────────────────────────────────────────────────────────────────────────────

/// Persistent store of document chunk embeddings.
pub struct VectorCache {
    conn: Mutex<Connection>,
    entries: RwLock<Vec<VectorEntry>>,
    build_lock: tokio::sync::Mutex<()>,
    options: KnowledgeOptions,
    location: Option<PathBuf>,
}

impl std::fmt::Debug for VectorCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorCache")
            .field("location", &self.location)
            .field("entries", &self.entries.read().len())
            .finish_non_exhaustive()
    }
}

impl VectorCache {
    /// Open or create a vector cache at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let conn = db::open_file(path)?;
        let cache = Self::from_connection(conn, Some(path.to_path_buf()))?;
        info!(
            "Vector cache opened at {:?} ({} entries)",
            path,
            cache.entries.read().len()
        );
        Ok(cache)
    }

    /// Create an in-memory cache (useful for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = db::open_memory()?;
        let cache = Self::from_connection(conn, None)?;
        info!("In-memory vector cache created");
        Ok(cache)
    }

    fn from_connection(conn: Connection, location: Option<PathBuf>) -> Result<Self> {
        migrate_v2(&conn)?;
        db::migrate(&conn, "vector cache", SCHEMA_VERSION, SCHEMA)?;
        let entries = load_entries(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            entries: RwLock::new(entries),
            build_lock: tokio::sync::Mutex::new(()),
            options: KnowledgeOptions::default(),
            location,
        })
    }

    /// Set how knowledge folders are read and chunked.
    pub fn with_options(mut self, options: KnowledgeOptions) -> Self {
        self.options = options;
        self
    }

    /// Where this cache is persisted.
    pub fn location(&self) -> String {
        db::describe_location(self.location.as_ref())
    }

    /// Number of entries currently searchable.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Close the underlying database.
    pub fn close(self) -> Result<()> {
        self.conn
            .into_inner()
            .close()
            .map_err(|(_, e)| CacheError::Database(e))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Build
    // ─────────────────────────────────────────────────────────────────────────

    /// Index every document under `folder`.
    ///
    /// Documents whose fingerprint, embedding model and chunking match the
    /// sidecar index are reused without calling `embedder`. Each changed
    /// document costs one `embed_batch` call. Documents that disappeared from
    /// the folder are removed.
    ///
    /// Each document is committed on its own. If one fails, the documents
    /// already committed stay, and the searchable snapshot is reloaded
    /// before the error is returned.
    pub async fn build(
        &self,
        folder: impl AsRef<Path>,
        embedding_model_id: &str,
        embedder: &dyn Embedder,
    ) -> Result<BuildReport> {
        let folder = folder.as_ref();
        if !folder.is_dir() {
            return Err(ValidationError::MissingFolder(folder.to_path_buf()).into());
        }

        let _guard = self.build_lock.lock().await;

        let documents = load_documents(folder, &self.options)?;
        let index = self.load_index()?;

        let applied = self
            .apply_changes(&documents, &index, embedding_model_id, embedder)
            .await;
        let count = self.reload_entries()?;
        let (rebuilt_count, removed_count) = applied?;

        let report = BuildReport {
            count,
            document_count: documents.len(),
            rebuilt_count,
            removed_count,
            cache_location: self.location(),
        };
        info!(
            "Knowledge base built: {} entries from {} documents ({} rebuilt, {} removed)",
            report.count, report.document_count, report.rebuilt_count, report.removed_count
        );
        Ok(report)
    }

    async fn apply_changes(
        &self,
        documents: &[SourceDocument],
        index: &HashMap<String, IndexedDocument>,
        embedding_model_id: &str,
        embedder: &dyn Embedder,
    ) -> Result<(usize, usize)> {
        let chunking = self.chunking();

        let mut rebuilt_count = 0;
        for document in documents {
            let fresh = index.get(&document.path).is_some_and(|indexed| {
                indexed.fingerprint == document.fingerprint
                    && indexed.embedding_model_id == embedding_model_id
                    && indexed.chunking == chunking
            });
            if fresh {
                debug!("Reusing embeddings for {}", document.path);
                continue;
            }

            self.rebuild_document(document, embedding_model_id, embedder)
                .await?;
            rebuilt_count += 1;
        }

        let mut removed_count = 0;
        for path in index.keys() {
            if !documents.iter().any(|d| &d.path == path) {
                self.remove_document(path)?;
                removed_count += 1;
            }
        }
        Ok((rebuilt_count, removed_count))
    }

    /// Replace the search snapshot with what is committed. Returns its size.
    fn reload_entries(&self) -> Result<usize> {
        let entries = {
            let conn = self.conn.lock();
            load_entries(&conn)?
        };
        let count = entries.len();
        *self.entries.write() = entries;
        Ok(count)
    }

    /// Chunking parameters as stored in the sidecar, e.g. `1500/200`.
    fn chunking(&self) -> String {
        format!("{}/{}", self.options.chunk_size, self.options.chunk_overlap)
    }

    async fn rebuild_document(
        &self,
        document: &SourceDocument,
        embedding_model_id: &str,
        embedder: &dyn Embedder,
    ) -> Result<()> {
        let chunks = chunk_text(
            &document.content,
            self.options.chunk_size,
            self.options.chunk_overlap,
        );

        let embeddings = if chunks.is_empty() {
            warn!("Document {} has no text to embed", document.path);
            Vec::new()
        } else {
            let texts: Vec<&str> = chunks.iter().map(String::as_str).collect();
            embedder.embed_batch(&texts).await?
        };

        if embeddings.len() != chunks.len() {
            return Err(ValidationError::EmbeddingCountMismatch {
                expected: chunks.len(),
                actual: embeddings.len(),
            }
            .into());
        }
        validate_dimensions(&embeddings)?;

        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM documents WHERE path = ?1",
            params![document.path],
        )?;
        tx.execute(
            r#"
            INSERT INTO documents (path, fingerprint, embedding_model_id, chunking,
                                   chunk_count, indexed_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                document.path,
                document.fingerprint,
                embedding_model_id,
                self.chunking(),
                chunks.len() as i64,
                db::now(),
            ],
        )?;
        {
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO vector_entries (chunk_id, path, chunk_index, content, metadata,
                                            fingerprint, embedding_model_id, embedding)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                "#,
            )?;
            for (index, (chunk, embedding)) in chunks.iter().zip(&embeddings).enumerate() {
                let metadata = serde_json::json!({
                    "source": document.path,
                    "chunk_index": index,
                    "chunk_count": chunks.len(),
                });
                stmt.execute(params![
                    format!("{}#{}", document.path, index),
                    document.path,
                    index as i64,
                    chunk,
                    serde_json::to_string(&metadata)?,
                    document.fingerprint,
                    embedding_model_id,
                    embedding.as_bytes(),
                ])?;
            }
        }
        tx.commit()?;

        debug!(
            "Embedded {} chunks for {} with {}",
            chunks.len(),
            document.path,
            embedding_model_id
        );
        Ok(())
    }

    fn remove_document(&self, path: &str) -> Result<()> {
        let conn = self.conn.lock();
        // Entries cascade
        conn.execute("DELETE FROM documents WHERE path = ?1", params![path])?;
        debug!("Removed vanished document {}", path);
        Ok(())
    }

    fn load_index(&self) -> Result<HashMap<String, IndexedDocument>> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare("SELECT path, fingerprint, embedding_model_id, chunking FROM documents")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                IndexedDocument {
                    fingerprint: row.get(1)?,
                    embedding_model_id: row.get(2)?,
                    chunking: row.get(3)?,
                },
            ))
        })?;
        Ok(rows.collect::<std::result::Result<HashMap<_, _>, _>>()?)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Search
    // ─────────────────────────────────────────────────────────────────────────

    /// Return the `k` entries most similar to `query_vector`.
    ///
    /// Ranked by cosine similarity descending; ties go to the lower
    /// fingerprint, then to the earlier-inserted entry.
    pub fn search(&self, query_vector: &[f32], k: usize) -> Result<Vec<VectorHit>> {
        if k == 0 {
            return Ok(Vec::new());
        }

        let entries = self.entries.read();
        if let Some(first) = entries.first()
            && first.embedding.len() != query_vector.len()
        {
            return Err(ValidationError::DimensionMismatch {
                expected: first.embedding.len(),
                actual: query_vector.len(),
            }
            .into());
        }

        let mut scored: Vec<(f32, &VectorEntry)> = entries
            .iter()
            .map(|entry| (cosine_similarity(query_vector, &entry.embedding), entry))
            .collect();

        // Stable sort keeps insertion order for full ties
        scored.sort_by(|(sa, a), (sb, b)| {
            sb.partial_cmp(sa)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.fingerprint.cmp(&b.fingerprint))
        });

        Ok(scored
            .into_iter()
            .take(k)
            .map(|(score, entry)| VectorHit {
                chunk_id: entry.chunk_id.clone(),
                source: entry.source.clone(),
                content: entry.content.clone(),
                metadata: entry.metadata.clone(),
                fingerprint: entry.fingerprint.clone(),
                score,
            })
            .collect())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Maintenance
    // ─────────────────────────────────────────────────────────────────────────

    /// Delete all entries and the sidecar index.
    ///
    /// Waits for any running build to finish first.
    pub async fn clear(&self) -> Result<()> {
        let _guard = self.build_lock.lock().await;
        {
            let conn = self.conn.lock();
            conn.execute_batch("DELETE FROM vector_entries; DELETE FROM documents;")?;
        }
        self.entries.write().clear();
        info!("Vector cache cleared");
        Ok(())
    }

    /// Current statistics.
    pub fn stats(&self) -> Result<VectorCacheStats> {
        let document_count: i64 = {
            let conn = self.conn.lock();
            conn.query_row("SELECT COUNT(*) FROM documents", [], |row| row.get(0))?
        };
        let entries = self.entries.read();
        Ok(VectorCacheStats {
            document_count: document_count as usize,
            entry_count: entries.len(),
            embedding_model_id: entries.first().map(|e| e.embedding_model_id.clone()),
            location: self.location(),
        })
    }
}

/// Version 1 sidecars predate the `chunking` column. Rows get an empty value,
/// which never matches, so those documents are re-embedded on the next build.
fn migrate_v2(conn: &Connection) -> Result<()> {
    let current: i32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    if current != 1 {
        return Ok(());
    }
    conn.execute_batch(
        "ALTER TABLE documents ADD COLUMN chunking TEXT NOT NULL DEFAULT '';
         PRAGMA user_version = 2;",
    )?;
    info!("Vector cache schema migrated to version 2");
    Ok(())
}

fn load_entries(conn: &Connection) -> Result<Vec<VectorEntry>> {
    let mut stmt = conn.prepare(
        r#"
        SELECT chunk_id, path, chunk_index, content, metadata, fingerprint,
               embedding_model_id, embedding
        FROM vector_entries
        ORDER BY seq
        "#,
    )?;
    let mut rows = stmt.query([])?;

    let mut entries = Vec::new();
    while let Some(row) = rows.next()? {
        entries.push(row_to_entry(row)?);
    }
    Ok(entries)
}

fn row_to_entry(row: &rusqlite::Row) -> Result<VectorEntry> {
    let chunk_index: i64 = row.get(2)?;
    let metadata_json: String = row.get(4)?;
    let blob: Vec<u8> = row.get(7)?;

    if blob.len() % 4 != 0 {
        return Err(CacheError::InvalidData(format!(
            "embedding blob of {} bytes is not a whole number of f32s",
            blob.len()
        )));
    }
    let embedding = blob
        .chunks_exact(4)
        .map(|b| f32::from_ne_bytes([b[0], b[1], b[2], b[3]]))
        .collect();

    Ok(VectorEntry {
        chunk_id: row.get(0)?,
        source: row.get(1)?,
        chunk_index: chunk_index as usize,
        content: row.get(3)?,
        metadata: serde_json::from_str(&metadata_json)?,
        fingerprint: row.get(5)?,
        embedding_model_id: row.get(6)?,
        embedding,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use mnemos_llm::MockEmbedder;
    use tempfile::TempDir;

    fn knowledge_dir() -> TempDir {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("rag.txt"),
            "RAG combines retrieval with generation to ground answers in documents.",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("rust.md"),
            "Rust is a systems programming language focused on safety.",
        )
        .unwrap();
        dir
    }

    #[tokio::test]
    async fn test_build_embeds_every_document() {
        let dir = knowledge_dir();
        let cache = VectorCache::open_in_memory().unwrap();
        let embedder = MockEmbedder::new(64);

        let report = cache.build(dir.path(), "embed-1", &embedder).await.unwrap();
        assert_eq!(report.count, 2);
        assert_eq!(report.document_count, 2);
        assert_eq!(report.rebuilt_count, 2);
        assert_eq!(report.removed_count, 0);
        assert_eq!(report.cache_location, ":memory:");
        assert_eq!(embedder.calls(), 2);
    }

    #[tokio::test]
    async fn test_unchanged_rebuild_skips_embedder() {
        let dir = knowledge_dir();
        let cache = VectorCache::open_in_memory().unwrap();
        let embedder = MockEmbedder::new(64);

        cache.build(dir.path(), "embed-1", &embedder).await.unwrap();
        embedder.reset_counts();

        let report = cache.build(dir.path(), "embed-1", &embedder).await.unwrap();
        assert_eq!(report.rebuilt_count, 0);
        assert_eq!(report.count, 2);
        assert_eq!(embedder.calls(), 0);
    }

    #[tokio::test]
    async fn test_changed_document_is_rebuilt_alone() {
        let dir = knowledge_dir();
        let cache = VectorCache::open_in_memory().unwrap();
        let embedder = MockEmbedder::new(64);
        cache.build(dir.path(), "embed-1", &embedder).await.unwrap();
        embedder.reset_counts();

        std::fs::write(dir.path().join("rust.md"), "Rust has ownership and borrowing.").unwrap();
        let report = cache.build(dir.path(), "embed-1", &embedder).await.unwrap();

        assert_eq!(report.rebuilt_count, 1);
        assert_eq!(embedder.calls(), 1);
        let hits = cache
            .search(&embedder.embed("ownership borrowing").await.unwrap(), 1)
            .unwrap();
        assert_eq!(hits[0].source, "rust.md");
        assert!(hits[0].content.contains("ownership"));
    }

    #[tokio::test]
    async fn test_model_change_forces_full_rebuild() {
        let dir = knowledge_dir();
        let cache = VectorCache::open_in_memory().unwrap();
        let embedder = MockEmbedder::new(64);
        cache.build(dir.path(), "embed-1", &embedder).await.unwrap();
        embedder.reset_counts();

        let report = cache.build(dir.path(), "embed-2", &embedder).await.unwrap();
        assert_eq!(report.rebuilt_count, 2);
        assert_eq!(embedder.calls(), 2);
        assert_eq!(
            cache.stats().unwrap().embedding_model_id.as_deref(),
            Some("embed-2")
        );
    }

    #[tokio::test]
    async fn test_removed_document_is_dropped() {
        let dir = knowledge_dir();
        let cache = VectorCache::open_in_memory().unwrap();
        let embedder = MockEmbedder::new(64);
        cache.build(dir.path(), "embed-1", &embedder).await.unwrap();

        std::fs::remove_file(dir.path().join("rag.txt")).unwrap();
        let report = cache.build(dir.path(), "embed-1", &embedder).await.unwrap();

        assert_eq!(report.removed_count, 1);
        assert_eq!(report.count, 1);
        assert_eq!(cache.stats().unwrap().document_count, 1);
    }

    #[tokio::test]
    async fn test_missing_folder_is_validation_error() {
        let cache = VectorCache::open_in_memory().unwrap();
        let embedder = MockEmbedder::new(64);
        let err = cache
            .build("/definitely/not/here", "embed-1", &embedder)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CacheError::Validation(ValidationError::MissingFolder(_))
        ));
    }

    #[tokio::test]
    async fn test_embedder_failure_surfaces() {
        let dir = knowledge_dir();
        let cache = VectorCache::open_in_memory().unwrap();
        let embedder = MockEmbedder::new(64);
        embedder.set_failing(true);

        let err = cache.build(dir.path(), "embed-1", &embedder).await.unwrap_err();
        assert!(matches!(err, CacheError::Embedding(_)));
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_search_ranks_by_similarity() {
        let dir = knowledge_dir();
        let cache = VectorCache::open_in_memory().unwrap();
        let embedder = MockEmbedder::new(64);
        cache.build(dir.path(), "embed-1", &embedder).await.unwrap();

        let query = embedder.embed("retrieval generation documents").await.unwrap();
        let hits = cache.search(&query, 2).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].source, "rag.txt");
        assert!(hits[0].score >= hits[1].score);
        assert_eq!(hits[0].metadata["chunk_index"], 0);
    }

    #[tokio::test]
    async fn test_search_ties_break_by_fingerprint() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.txt"), "same words").unwrap();
        std::fs::write(dir.path().join("b.txt"), "same  words").unwrap();
        let cache = VectorCache::open_in_memory().unwrap();
        let embedder = MockEmbedder::new(32);
        cache.build(dir.path(), "embed-1", &embedder).await.unwrap();

        let query = embedder.embed("same words").await.unwrap();
        let hits = cache.search(&query, 2).unwrap();
        assert!(hits[0].fingerprint < hits[1].fingerprint);
    }

    #[tokio::test]
    async fn test_search_dimension_mismatch() {
        let dir = knowledge_dir();
        let cache = VectorCache::open_in_memory().unwrap();
        cache
            .build(dir.path(), "embed-1", &MockEmbedder::new(64))
            .await
            .unwrap();
        assert!(cache.search(&[1.0, 0.0], 3).is_err());
        assert!(cache.search(&[1.0, 0.0], 0).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_clear_and_reopen_persists() {
        let dir = knowledge_dir();
        let db_dir = TempDir::new().unwrap();
        let db_path = db_dir.path().join("vectors.db");
        let embedder = MockEmbedder::new(64);

        {
            let cache = VectorCache::open(&db_path).unwrap();
            cache.build(dir.path(), "embed-1", &embedder).await.unwrap();
            cache.close().unwrap();
        }

        let cache = VectorCache::open(&db_path).unwrap();
        assert_eq!(cache.len(), 2);
        embedder.reset_counts();
        let report = cache.build(dir.path(), "embed-1", &embedder).await.unwrap();
        assert_eq!(report.rebuilt_count, 0);
        assert_eq!(embedder.calls(), 0);

        cache.clear().await.unwrap();
        assert!(cache.is_empty());
        assert_eq!(cache.stats().unwrap().document_count, 0);
    }

    #[tokio::test]
    async fn test_failed_rebuild_reloads_committed_documents() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.txt"), "alpha original").unwrap();
        std::fs::write(dir.path().join("b.txt"), "beta original").unwrap();
        let cache = VectorCache::open_in_memory().unwrap();
        let embedder = MockEmbedder::new(64);
        cache.build(dir.path(), "embed-1", &embedder).await.unwrap();

        std::fs::write(dir.path().join("a.txt"), "alpha edited").unwrap();
        std::fs::write(dir.path().join("b.txt"), "beta edited").unwrap();
        embedder.reset_counts();
        // a.txt commits, then b.txt fails
        embedder.fail_from_call(2);

        let err = cache.build(dir.path(), "embed-1", &embedder).await.unwrap_err();
        assert!(matches!(err, CacheError::Embedding(_)));

        let committed = load_entries(&cache.conn.lock()).unwrap();
        let snapshot = cache.entries.read().clone();
        assert_eq!(snapshot, committed);
        assert!(snapshot.iter().any(|e| e.content == "alpha edited"));
        assert!(snapshot.iter().any(|e| e.content == "beta original"));

        // The next build picks up where the failed one stopped
        embedder.fail_from_call(0);
        embedder.reset_counts();
        let report = cache.build(dir.path(), "embed-1", &embedder).await.unwrap();
        assert_eq!(report.rebuilt_count, 1);
        assert_eq!(embedder.calls(), 1);
    }

    #[tokio::test]
    async fn test_clear_waits_for_running_build() {
        let dir = knowledge_dir();
        let cache = VectorCache::open_in_memory().unwrap();
        let embedder = MockEmbedder::new(64);
        cache.build(dir.path(), "embed-1", &embedder).await.unwrap();

        let build_guard = cache.build_lock.lock().await;
        let clear = cache.clear();
        tokio::pin!(clear);
        let waited = tokio::time::timeout(std::time::Duration::from_millis(50), &mut clear).await;
        assert!(waited.is_err());
        assert_eq!(cache.len(), 2);

        drop(build_guard);
        clear.await.unwrap();
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_chunking_change_forces_rebuild() {
        let dir = knowledge_dir();
        let db_dir = TempDir::new().unwrap();
        let db_path = db_dir.path().join("vectors.db");
        let embedder = MockEmbedder::new(64);

        {
            let cache = VectorCache::open(&db_path).unwrap();
            cache.build(dir.path(), "embed-1", &embedder).await.unwrap();
            cache.close().unwrap();
        }

        let options = KnowledgeOptions {
            chunk_size: 20,
            chunk_overlap: 5,
            ..KnowledgeOptions::default()
        };
        let cache = VectorCache::open(&db_path).unwrap().with_options(options);
        embedder.reset_counts();
        let report = cache.build(dir.path(), "embed-1", &embedder).await.unwrap();
        assert_eq!(report.rebuilt_count, 2);
        assert_eq!(embedder.calls(), 2);
        assert!(report.count > 2);

        embedder.reset_counts();
        let report = cache.build(dir.path(), "embed-1", &embedder).await.unwrap();
        assert_eq!(report.rebuilt_count, 0);
        assert_eq!(embedder.calls(), 0);
    }

    #[tokio::test]
    async fn test_version_one_sidecar_is_upgraded() {
        let dir = knowledge_dir();
        let db_dir = TempDir::new().unwrap();
        let db_path = db_dir.path().join("vectors.db");
        {
            let conn = Connection::open(&db_path).unwrap();
            conn.execute_batch(
                "CREATE TABLE documents (
                     path TEXT PRIMARY KEY,
                     fingerprint TEXT NOT NULL,
                     embedding_model_id TEXT NOT NULL,
                     chunk_count INTEGER NOT NULL,
                     indexed_at TEXT NOT NULL
                 );
                 CREATE TABLE vector_entries (
                     seq INTEGER PRIMARY KEY AUTOINCREMENT,
                     chunk_id TEXT NOT NULL UNIQUE,
                     path TEXT NOT NULL REFERENCES documents(path) ON DELETE CASCADE,
                     chunk_index INTEGER NOT NULL,
                     content TEXT NOT NULL,
                     metadata TEXT NOT NULL DEFAULT '{}',
                     fingerprint TEXT NOT NULL,
                     embedding_model_id TEXT NOT NULL,
                     embedding BLOB NOT NULL
                 );
                 INSERT INTO documents VALUES ('rag.txt', 'f', 'embed-1', 1, 'then');
                 PRAGMA user_version = 1;",
            )
            .unwrap();
        }

        let cache = VectorCache::open(&db_path).unwrap();
        assert_eq!(cache.load_index().unwrap()["rag.txt"].chunking, "");

        let embedder = MockEmbedder::new(64);
        let report = cache.build(dir.path(), "embed-1", &embedder).await.unwrap();
        assert_eq!(report.rebuilt_count, 2);
        assert_eq!(report.count, 2);
    }
}
