//! Exact-match response cache.
//!
//! Full answers are keyed by a hash of the normalized query and the model id,
//! so a lookup under one model never sees another model's answer. A second
//! table deduplicates context chunks by content hash and counts how often
//! each one was reused.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::db;
use crate::error::Result;
use crate::fingerprint::{CacheKey, content_hash};
use crate::validation::validate_content;

const SCHEMA_VERSION: i32 = 1;

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS cached_responses (
        query_hash TEXT NOT NULL,
        model_id TEXT NOT NULL,
        query TEXT NOT NULL,
        context_hash TEXT NOT NULL,
        context TEXT NOT NULL,
        response TEXT NOT NULL,
        tokens_saved INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL,
        last_accessed TEXT NOT NULL,
        access_count INTEGER NOT NULL DEFAULT 1,
        PRIMARY KEY (query_hash, model_id)
    );

    CREATE INDEX IF NOT EXISTS idx_cached_responses_last_accessed
        ON cached_responses(last_accessed);

    CREATE TABLE IF NOT EXISTS context_chunks (
        content_hash TEXT PRIMARY KEY,
        content TEXT NOT NULL,
        metadata TEXT NOT NULL DEFAULT '{}',
        created_at TEXT NOT NULL,
        reuse_count INTEGER NOT NULL DEFAULT 1
    );

    -- Cumulative lookup/hit counters
    CREATE TABLE IF NOT EXISTS counters (
        name TEXT PRIMARY KEY,
        value INTEGER NOT NULL DEFAULT 0
    );

    INSERT OR IGNORE INTO counters (name, value) VALUES ('lookups', 0), ('hits', 0);
"#;

// ─────────────────────────────────────────────────────────────────────────────
// Types
// ─────────────────────────────────────────────────────────────────────────────

/// A memoized answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedResponse {
    pub query: String,
    pub response: String,
    pub context_hash: String,
    pub context: String,
    pub model_id: String,
    /// Estimated tokens a hit avoids regenerating.
    pub tokens_saved: u64,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    /// Always at least 1.
    pub access_count: u32,
}

/// A deduplicated context fragment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextChunk {
    pub content_hash: String,
    pub content: String,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    /// Always at least 1.
    pub reuse_count: u32,
}

/// Exact-match cache statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExactCacheStats {
    pub cached_count: usize,
    /// Sum of `tokens_saved` over all cached responses.
    pub total_tokens_saved: u64,
    pub lookups: u64,
    pub hits: u64,
    /// `hits / lookups`, or 0 before the first lookup.
    pub hit_rate: f64,
    pub chunk_count: usize,
    /// Sum of `reuse_count` over all chunks.
    pub chunk_reuse_total: u64,
    pub location: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// Response Cache
// ─────────────────────────────────────────────────────────────────────────────

/// Persistent (query, model) → answer cache.
pub struct ResponseCache {
    conn: db::Connections,
    location: Option<PathBuf>,
}

impl std::fmt::Debug for ResponseCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseCache")
            .field("location", &self.location)
            .finish_non_exhaustive()
    }
}

impl ResponseCache {
    /// Open or create a response cache at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let conn = db::Connections::open_file(path, |conn| {
            db::migrate(conn, "response cache", SCHEMA_VERSION, SCHEMA)
        })?;
        info!("Response cache opened at {:?}", path);
        Ok(Self {
            conn,
            location: Some(path.to_path_buf()),
        })
    }

    /// Create an in-memory cache (useful for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = db::Connections::open_memory(|conn| {
            db::migrate(conn, "response cache", SCHEMA_VERSION, SCHEMA)
        })?;
        info!("In-memory response cache created");
        Ok(Self {
            conn,
            location: None,
        })
    }

    /// Where this cache is persisted.
    pub fn location(&self) -> String {
        db::describe_location(self.location.as_ref())
    }

    /// Close the underlying database.
    pub fn close(self) -> Result<()> {
        self.conn.close()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Responses
    // ─────────────────────────────────────────────────────────────────────────

    /// Look up a cached answer for `query` under `model_id`.
    ///
    /// A hit increments `access_count` and refreshes `last_accessed`; the
    /// returned record reflects the update. Every call counts as a lookup.
    pub fn lookup(&self, query: &str, model_id: &str) -> Result<Option<CachedResponse>> {
        let key = CacheKey::new(query, model_id);
        let now = db::now();

        let mut conn = self.conn.write();
        let tx = conn.transaction()?;
        tx.execute(
            "UPDATE counters SET value = value + 1 WHERE name = 'lookups'",
            [],
        )?;

        let updated = tx.execute(
            r#"
            UPDATE cached_responses
            SET access_count = access_count + 1, last_accessed = ?3
            WHERE query_hash = ?1 AND model_id = ?2
            "#,
            params![key.as_str(), model_id, now],
        )?;

        let found = if updated > 0 {
            tx.execute("UPDATE counters SET value = value + 1 WHERE name = 'hits'", [])?;
            let mut stmt = tx.prepare(
                r#"
                SELECT query, response, context_hash, context, model_id, tokens_saved,
                       created_at, last_accessed, access_count
                FROM cached_responses
                WHERE query_hash = ?1 AND model_id = ?2
                "#,
            )?;
            let mut rows = stmt.query(params![key.as_str(), model_id])?;
            match rows.next()? {
                Some(row) => Some(row_to_response(row)?),
                None => None,
            }
        } else {
            None
        };
        tx.commit()?;

        debug!(
            "Response cache {} for model {} (key {})",
            if found.is_some() { "hit" } else { "miss" },
            model_id,
            &key.as_str()[..12]
        );
        Ok(found)
    }

    /// Insert or replace the cached answer for (`query`, `model_id`).
    ///
    /// A re-cache keeps `created_at` and `access_count` and replaces the
    /// answer, context and savings estimate.
    pub fn store(
        &self,
        query: &str,
        context: &str,
        response: &str,
        model_id: &str,
        tokens_saved: u64,
    ) -> Result<CacheKey> {
        validate_content(query)?;
        let key = CacheKey::new(query, model_id);
        let now = db::now();

        let conn = self.conn.write();
        conn.execute(
            r#"
            INSERT INTO cached_responses (query_hash, model_id, query, context_hash, context, response,
                                          tokens_saved, created_at, last_accessed, access_count)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8, 1)
            ON CONFLICT(query_hash, model_id) DO UPDATE SET
                query = excluded.query,
                context_hash = excluded.context_hash,
                context = excluded.context,
                response = excluded.response,
                tokens_saved = excluded.tokens_saved,
                last_accessed = excluded.last_accessed
            "#,
            params![
                key.as_str(),
                model_id,
                query,
                content_hash(context),
                context,
                response,
                tokens_saved as i64,
                now,
            ],
        )?;

        debug!("Cached response for model {} ({} tokens saved)", model_id, tokens_saved);
        Ok(key)
    }

    /// Remove the cached answer for (`query`, `model_id`). Returns whether one existed.
    pub fn invalidate(&self, query: &str, model_id: &str) -> Result<bool> {
        let key = CacheKey::new(query, model_id);
        let conn = self.conn.write();
        let rows = conn.execute(
            "DELETE FROM cached_responses WHERE query_hash = ?1 AND model_id = ?2",
            params![key.as_str(), model_id],
        )?;
        Ok(rows > 0)
    }

    /// Delete answers not accessed within `max_age_days`, and chunks created
    /// before that window.
    ///
    /// Returns the number of answers deleted.
    pub fn prune(&self, max_age_days: u32) -> Result<usize> {
        let cutoff = db::timestamp(Utc::now() - Duration::days(i64::from(max_age_days)));
        let conn = self.conn.write();
        let responses = conn.execute(
            "DELETE FROM cached_responses WHERE last_accessed < ?1",
            params![cutoff],
        )?;
        let chunks = conn.execute(
            "DELETE FROM context_chunks WHERE created_at < ?1",
            params![cutoff],
        )?;
        info!(
            "Pruned {} cached responses and {} chunks idle for over {} days",
            responses, chunks, max_age_days
        );
        Ok(responses)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Context Chunks
    // ─────────────────────────────────────────────────────────────────────────

    /// Record a context fragment, deduplicated by content hash.
    ///
    /// Returns the chunk as stored, with `reuse_count` incremented when it
    /// already existed.
    pub fn store_chunk(&self, content: &str, metadata: &serde_json::Value) -> Result<ContextChunk> {
        validate_content(content)?;
        let hash = content_hash(content);
        let metadata_json = serde_json::to_string(metadata)?;

        let conn = self.conn.write();
        conn.execute(
            r#"
            INSERT INTO context_chunks (content_hash, content, metadata, created_at, reuse_count)
            VALUES (?1, ?2, ?3, ?4, 1)
            ON CONFLICT(content_hash) DO UPDATE SET reuse_count = reuse_count + 1
            "#,
            params![hash, content, metadata_json, db::now()],
        )?;

        let chunk = conn.query_row(
            r#"
            SELECT content_hash, content, metadata, created_at, reuse_count
            FROM context_chunks WHERE content_hash = ?1
            "#,
            params![hash],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, u32>(4)?,
                ))
            },
        )?;
        chunk_from_parts(chunk)
    }

    /// Most-reused chunks first; ties go to the oldest.
    pub fn top_chunks(&self, limit: usize) -> Result<Vec<ContextChunk>> {
        let conn = self.conn.read();
        let mut stmt = conn.prepare(
            r#"
            SELECT content_hash, content, metadata, created_at, reuse_count
            FROM context_chunks
            ORDER BY reuse_count DESC, created_at ASC, content_hash ASC
            LIMIT ?1
            "#,
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, u32>(4)?,
            ))
        })?;

        let mut chunks = Vec::new();
        for row in rows {
            chunks.push(chunk_from_parts(row?)?);
        }
        Ok(chunks)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Maintenance
    // ─────────────────────────────────────────────────────────────────────────

    /// Current statistics.
    pub fn stats(&self) -> Result<ExactCacheStats> {
        let conn = self.conn.read();

        let (cached_count, total_tokens_saved): (i64, i64) = conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(tokens_saved), 0) FROM cached_responses",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        let (chunk_count, chunk_reuse_total): (i64, i64) = conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(reuse_count), 0) FROM context_chunks",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        let lookups = counter(&conn, "lookups")?;
        let hits = counter(&conn, "hits")?;

        Ok(ExactCacheStats {
            cached_count: cached_count as usize,
            total_tokens_saved: total_tokens_saved as u64,
            lookups,
            hits,
            hit_rate: if lookups == 0 {
                0.0
            } else {
                hits as f64 / lookups as f64
            },
            chunk_count: chunk_count as usize,
            chunk_reuse_total: chunk_reuse_total as u64,
            location: self.location(),
        })
    }

    /// Delete every answer, chunk and counter.
    pub fn clear(&self) -> Result<()> {
        let conn = self.conn.write();
        conn.execute_batch(
            r#"
            DELETE FROM cached_responses;
            DELETE FROM context_chunks;
            UPDATE counters SET value = 0;
            "#,
        )?;
        info!("Response cache cleared");
        Ok(())
    }
}

fn counter(conn: &Connection, name: &str) -> Result<u64> {
    let value: Option<i64> = conn
        .query_row(
            "SELECT value FROM counters WHERE name = ?1",
            params![name],
            |row| row.get(0),
        )
        .optional()?;
    Ok(value.unwrap_or(0) as u64)
}

fn row_to_response(row: &rusqlite::Row) -> Result<CachedResponse> {
    let tokens_saved: i64 = row.get(5)?;
    let created_at: String = row.get(6)?;
    let last_accessed: String = row.get(7)?;

    Ok(CachedResponse {
        query: row.get(0)?,
        response: row.get(1)?,
        context_hash: row.get(2)?,
        context: row.get(3)?,
        model_id: row.get(4)?,
        tokens_saved: tokens_saved.max(0) as u64,
        created_at: db::parse_timestamp(&created_at)?,
        last_accessed: db::parse_timestamp(&last_accessed)?,
        access_count: row.get(8)?,
    })
}

fn chunk_from_parts(
    (content_hash, content, metadata, created_at, reuse_count): (String, String, String, String, u32),
) -> Result<ContextChunk> {
    Ok(ContextChunk {
        content_hash,
        content,
        metadata: serde_json::from_str(&metadata)?,
        created_at: db::parse_timestamp(&created_at)?,
        reuse_count,
    })
}
