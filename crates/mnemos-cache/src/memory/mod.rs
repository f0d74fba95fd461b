//! Context memory store.
//!
//! Records past exchanges (query, context, response) with a confidence score
//! and tags, and recalls them for related future queries. Records live in an
//! arena addressed by integer [`RecordId`]s; threads and relations reference
//! records by id and never own them.
//!
//! Deletion only happens through [`MemoryStore::cleanup`], which removes old
//! low-confidence records, or an explicit [`MemoryStore::clear`]. Thread
//! membership and relations of a deleted record cascade away with it.

mod recall;
mod record_ops;
pub mod similarity;
mod thread_ops;
mod types;

use std::path::{Path, PathBuf};

use chrono::{Duration, Utc};
use rusqlite::params;
use tracing::info;

use crate::db;
use crate::error::Result;

pub use types::{
    ConversationThread, MemoryRecord, MemoryStats, MemoryStoreConfig, NewMemory, RecordId,
    Relation, ScoredRecord,
};

// ─────────────────────────────────────────────────────────────────────────────
// Schema
// ─────────────────────────────────────────────────────────────────────────────

const SCHEMA_VERSION: i32 = 1;

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS memory_records (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        query TEXT NOT NULL,
        context TEXT NOT NULL,
        response TEXT NOT NULL,
        tags TEXT NOT NULL DEFAULT '[]',
        confidence_score REAL NOT NULL CHECK (confidence_score BETWEEN 0.0 AND 1.0),
        model_id TEXT NOT NULL,
        metadata TEXT NOT NULL DEFAULT '{}',
        created_at TEXT NOT NULL,
        last_accessed TEXT NOT NULL,
        access_count INTEGER NOT NULL DEFAULT 1
    );

    CREATE INDEX IF NOT EXISTS idx_memory_records_created_at
        ON memory_records(created_at);

    -- Tag index for by_tags lookups
    CREATE TABLE IF NOT EXISTS record_tags (
        record_id INTEGER NOT NULL REFERENCES memory_records(id) ON DELETE CASCADE,
        tag TEXT NOT NULL,
        PRIMARY KEY (record_id, tag)
    );

    CREATE INDEX IF NOT EXISTS idx_record_tags_tag ON record_tags(tag);

    CREATE TABLE IF NOT EXISTS threads (
        thread_id TEXT PRIMARY KEY,
        title TEXT NOT NULL,
        summary TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS thread_records (
        thread_id TEXT NOT NULL REFERENCES threads(thread_id) ON DELETE CASCADE,
        record_id INTEGER NOT NULL REFERENCES memory_records(id) ON DELETE CASCADE,
        position INTEGER NOT NULL,
        PRIMARY KEY (thread_id, position)
    );

    CREATE TABLE IF NOT EXISTS relations (
        source_id INTEGER NOT NULL REFERENCES memory_records(id) ON DELETE CASCADE,
        related_id INTEGER NOT NULL REFERENCES memory_records(id) ON DELETE CASCADE,
        relation_type TEXT NOT NULL,
        similarity_score REAL NOT NULL,
        PRIMARY KEY (source_id, related_id, relation_type)
    );
"#;

// ─────────────────────────────────────────────────────────────────────────────
// Memory Store
// ─────────────────────────────────────────────────────────────────────────────

/// Persistent store of past exchanges.
pub struct MemoryStore {
    pub(crate) conn: db::Connections,
    config: MemoryStoreConfig,
    location: Option<PathBuf>,
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("location", &self.location)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl MemoryStore {
    /// Open or create a memory store at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let conn = db::Connections::open_file(path, |conn| {
            db::migrate(conn, "memory store", SCHEMA_VERSION, SCHEMA)
        })?;
        info!("Memory store opened at {:?}", path);
        Ok(Self {
            conn,
            config: MemoryStoreConfig::default(),
            location: Some(path.to_path_buf()),
        })
    }

    /// Create an in-memory store (useful for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = db::Connections::open_memory(|conn| {
            db::migrate(conn, "memory store", SCHEMA_VERSION, SCHEMA)
        })?;
        info!("In-memory memory store created");
        Ok(Self {
            conn,
            config: MemoryStoreConfig::default(),
            location: None,
        })
    }

    /// Replace the retention/recall configuration.
    pub fn with_config(mut self, config: MemoryStoreConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &MemoryStoreConfig {
        &self.config
    }

    /// Where this store is persisted.
    pub fn location(&self) -> String {
        db::describe_location(self.location.as_ref())
    }

    /// Close the underlying database.
    pub fn close(self) -> Result<()> {
        self.conn.close()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Maintenance
    // ─────────────────────────────────────────────────────────────────────────

    /// Delete records older than `days` whose confidence is below the
    /// retention threshold. Returns the number deleted.
    ///
    /// Records at or above the threshold are kept regardless of age.
    pub fn cleanup(&self, days: u32) -> Result<usize> {
        let cutoff = db::timestamp(Utc::now() - Duration::days(i64::from(days)));
        let conn = self.conn.write();
        let deleted = conn.execute(
            "DELETE FROM memory_records WHERE created_at < ?1 AND confidence_score < ?2",
            params![cutoff, self.config.retention_threshold as f64],
        )?;
        info!(
            "Memory cleanup removed {} records older than {} days below confidence {}",
            deleted, days, self.config.retention_threshold
        );
        Ok(deleted)
    }

    /// Delete every record, thread and relation.
    pub fn clear(&self) -> Result<()> {
        let conn = self.conn.write();
        conn.execute_batch(
            r#"
            DELETE FROM relations;
            DELETE FROM thread_records;
            DELETE FROM threads;
            DELETE FROM record_tags;
            DELETE FROM memory_records;
            "#,
        )?;
        info!("Memory store cleared");
        Ok(())
    }

    /// Current statistics.
    pub fn stats(&self) -> Result<MemoryStats> {
        let since = db::timestamp(Utc::now() - Duration::hours(24));
        let conn = self.conn.read();

        let (total_records, average_confidence, total_accesses): (i64, f64, i64) = conn
            .query_row(
                r#"
                SELECT COUNT(*), COALESCE(AVG(confidence_score), 0.0), COALESCE(SUM(access_count), 0)
                FROM memory_records
                "#,
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )?;
        let thread_count: i64 =
            conn.query_row("SELECT COUNT(*) FROM threads", [], |row| row.get(0))?;
        let relation_count: i64 =
            conn.query_row("SELECT COUNT(*) FROM relations", [], |row| row.get(0))?;
        let recent: i64 = conn.query_row(
            "SELECT COUNT(*) FROM memory_records WHERE created_at >= ?1",
            params![since],
            |row| row.get(0),
        )?;

        Ok(MemoryStats {
            total_records: total_records as usize,
            average_confidence: average_confidence as f32,
            total_accesses: total_accesses as u64,
            thread_count: thread_count as usize,
            relation_count: relation_count as usize,
            records_created_last_24h: recent as usize,
            location: self.location(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Move a record's creation time into the past.
    fn backdate(store: &MemoryStore, id: RecordId, days: i64) {
        let at = db::timestamp(Utc::now() - Duration::days(days));
        let conn = store.conn.write();
        conn.execute(
            "UPDATE memory_records SET created_at = ?1 WHERE id = ?2",
            params![at, id.0],
        )
        .unwrap();
    }

    fn record(store: &MemoryStore, query: &str, confidence: f32) -> RecordId {
        store
            .store(NewMemory::new(query, "ctx", "resp", "m1").with_confidence(confidence))
            .unwrap()
    }

    #[test]
    fn test_cleanup_respects_retention_threshold() {
        let store = MemoryStore::open_in_memory().unwrap();
        let keep = record(&store, "high confidence", 0.9);
        let drop = record(&store, "low confidence", 0.3);
        backdate(&store, keep, 10);
        backdate(&store, drop, 10);

        assert_eq!(store.cleanup(7).unwrap(), 1);
        assert!(store.get(keep).unwrap().is_some());
        assert!(store.get(drop).unwrap().is_none());
    }

    #[test]
    fn test_cleanup_keeps_recent_low_confidence() {
        let store = MemoryStore::open_in_memory().unwrap();
        let id = record(&store, "fresh", 0.1);
        assert_eq!(store.cleanup(7).unwrap(), 0);
        assert!(store.get(id).unwrap().is_some());
    }

    #[test]
    fn test_cleanup_threshold_is_inclusive() {
        let store = MemoryStore::open_in_memory().unwrap();
        let id = record(&store, "exactly at threshold", 0.7);
        backdate(&store, id, 30);
        assert_eq!(store.cleanup(1).unwrap(), 0);
    }

    #[test]
    fn test_custom_retention_threshold() {
        let store = MemoryStore::open_in_memory().unwrap().with_config(MemoryStoreConfig {
            retention_threshold: 0.95,
            ..Default::default()
        });
        let id = record(&store, "q", 0.9);
        backdate(&store, id, 10);
        assert_eq!(store.cleanup(7).unwrap(), 1);
    }

    #[test]
    fn test_cleanup_cascades_to_threads_and_relations() {
        let store = MemoryStore::open_in_memory().unwrap();
        let old = record(&store, "old", 0.2);
        let other = record(&store, "other", 0.9);
        store.create_thread("t1", "Thread").unwrap();
        store.add_to_thread("t1", old).unwrap();
        store.add_to_thread("t1", other).unwrap();
        store
            .add_relation(&Relation::new(other, old, "derived_from", 0.5))
            .unwrap();
        backdate(&store, old, 10);

        assert_eq!(store.cleanup(7).unwrap(), 1);
        let thread = store.thread("t1").unwrap().unwrap();
        assert_eq!(thread.record_ids, vec![other]);
        assert!(store.relations(other).unwrap().is_empty());
    }

    #[test]
    fn test_stats() {
        let store = MemoryStore::open_in_memory().unwrap();
        let empty = store.stats().unwrap();
        assert_eq!(empty.total_records, 0);
        assert_eq!(empty.average_confidence, 0.0);

        let a = record(&store, "a", 0.4);
        record(&store, "b", 0.8);
        backdate(&store, a, 3);
        store.create_thread("t", "T").unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats.total_records, 2);
        assert!((stats.average_confidence - 0.6).abs() < 1e-6);
        assert_eq!(stats.total_accesses, 2);
        assert_eq!(stats.thread_count, 1);
        assert_eq!(stats.records_created_last_24h, 1);
        assert_eq!(stats.location, ":memory:");
    }

    #[test]
    fn test_clear() {
        let store = MemoryStore::open_in_memory().unwrap();
        record(&store, "a", 0.4);
        store.create_thread("t", "T").unwrap();
        store.clear().unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats.total_records, 0);
        assert_eq!(stats.thread_count, 0);
    }

    #[test]
    fn test_file_store_reads_alongside_writer() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = MemoryStore::open(dir.path().join("memory.db")).unwrap();
        let id = record(&store, "tagged question", 0.7);
        store.create_thread("t", "T").unwrap();
        store.add_to_thread("t", id).unwrap();

        let _writer = store.conn.write();
        assert!(store.get(id).unwrap().is_some());
        assert_eq!(store.thread("t").unwrap().unwrap().record_ids, vec![id]);
        assert_eq!(store.stats().unwrap().total_records, 1);
    }
}
