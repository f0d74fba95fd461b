//! Conversation threads and record relations.

use rusqlite::{Connection, OptionalExtension, params};
use tracing::debug;

use crate::db;
use crate::error::{CacheError, Result};
use crate::validation::{ValidationError, validate_confidence, validate_thread_id};

use super::{ConversationThread, MemoryStore, RecordId, Relation};

impl MemoryStore {
    // ─────────────────────────────────────────────────────────────────────────
    // Threads
    // ─────────────────────────────────────────────────────────────────────────

    /// Create an empty thread. Fails if `thread_id` is taken.
    pub fn create_thread(&self, thread_id: &str, title: &str) -> Result<ConversationThread> {
        validate_thread_id(thread_id)?;
        let now = db::now();

        let conn = self.conn.write();
        let inserted = conn.execute(
            r#"
            INSERT OR IGNORE INTO threads (thread_id, title, summary, created_at, updated_at)
            VALUES (?1, ?2, NULL, ?3, ?3)
            "#,
            params![thread_id, title, now],
        )?;
        if inserted == 0 {
            return Err(ValidationError::DuplicateThread(thread_id.to_string()).into());
        }

        debug!("Created thread {}", thread_id);
        Self::thread_with(&conn, thread_id)?
            .ok_or_else(|| CacheError::NotFound(format!("thread {}", thread_id)))
    }

    /// Append a record to a thread.
    pub fn add_to_thread(&self, thread_id: &str, record_id: RecordId) -> Result<()> {
        let mut conn = self.conn.write();
        let tx = conn.transaction()?;

        let exists: Option<i64> = tx
            .query_row(
                "SELECT 1 FROM threads WHERE thread_id = ?1",
                params![thread_id],
                |row| row.get(0),
            )
            .optional()?;
        if exists.is_none() {
            return Err(ValidationError::ThreadNotFound(thread_id.to_string()).into());
        }
        if Self::get_with(&tx, record_id)?.is_none() {
            return Err(CacheError::NotFound(format!("memory record {}", record_id)));
        }

        tx.execute(
            r#"
            INSERT INTO thread_records (thread_id, record_id, position)
            VALUES (?1, ?2, (SELECT COALESCE(MAX(position), -1) + 1
                             FROM thread_records WHERE thread_id = ?1))
            "#,
            params![thread_id, record_id.0],
        )?;
        tx.execute(
            "UPDATE threads SET updated_at = ?2 WHERE thread_id = ?1",
            params![thread_id, db::now()],
        )?;
        tx.commit()?;

        debug!("Added memory {} to thread {}", record_id, thread_id);
        Ok(())
    }

    /// Fetch a thread with its records in insertion order.
    pub fn thread(&self, thread_id: &str) -> Result<Option<ConversationThread>> {
        let conn = self.conn.read();
        Self::thread_with(&conn, thread_id)
    }

    /// All threads, most recently updated first.
    pub fn threads(&self) -> Result<Vec<ConversationThread>> {
        let conn = self.conn.read();
        let ids: Vec<String> = {
            let mut stmt =
                conn.prepare("SELECT thread_id FROM threads ORDER BY updated_at DESC, thread_id")?;
            let rows = stmt.query_map([], |row| row.get(0))?;
            rows.collect::<std::result::Result<_, _>>()?
        };

        let mut threads = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(thread) = Self::thread_with(&conn, &id)? {
                threads.push(thread);
            }
        }
        Ok(threads)
    }

    /// Replace a thread's summary.
    pub fn set_thread_summary(&self, thread_id: &str, summary: &str) -> Result<()> {
        let conn = self.conn.write();
        let rows = conn.execute(
            "UPDATE threads SET summary = ?2, updated_at = ?3 WHERE thread_id = ?1",
            params![thread_id, summary, db::now()],
        )?;
        if rows == 0 {
            return Err(ValidationError::ThreadNotFound(thread_id.to_string()).into());
        }
        Ok(())
    }

    fn thread_with(conn: &Connection, thread_id: &str) -> Result<Option<ConversationThread>> {
        let row = conn
            .query_row(
                r#"
                SELECT thread_id, title, summary, created_at, updated_at
                FROM threads WHERE thread_id = ?1
                "#,
                params![thread_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                },
            )
            .optional()?;
        let Some((thread_id, title, summary, created_at, updated_at)) = row else {
            return Ok(None);
        };

        let mut stmt = conn.prepare(
            "SELECT record_id FROM thread_records WHERE thread_id = ?1 ORDER BY position",
        )?;
        let record_ids = stmt
            .query_map(params![thread_id], |row| row.get(0).map(RecordId))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(Some(ConversationThread {
            thread_id,
            title,
            record_ids,
            summary,
            created_at: db::parse_timestamp(&created_at)?,
            updated_at: db::parse_timestamp(&updated_at)?,
        }))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Relations
    // ─────────────────────────────────────────────────────────────────────────

    /// Record a labeled edge between two existing records.
    ///
    /// Re-adding the same (source, related, type) replaces its score.
    pub fn add_relation(&self, relation: &Relation) -> Result<()> {
        let similarity = validate_confidence(relation.similarity_score)?;
        let conn = self.conn.write();
        for id in [relation.source_id, relation.related_id] {
            if Self::get_with(&conn, id)?.is_none() {
                return Err(CacheError::NotFound(format!("memory record {}", id)));
            }
        }

        conn.execute(
            r#"
            INSERT INTO relations (source_id, related_id, relation_type, similarity_score)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(source_id, related_id, relation_type)
            DO UPDATE SET similarity_score = excluded.similarity_score
            "#,
            params![
                relation.source_id.0,
                relation.related_id.0,
                relation.relation_type,
                similarity as f64,
            ],
        )?;
        debug!(
            "Related memory {} -> {} ({})",
            relation.source_id, relation.related_id, relation.relation_type
        );
        Ok(())
    }

    /// Every edge touching `record_id`, in either direction.
    pub fn relations(&self, record_id: RecordId) -> Result<Vec<Relation>> {
        let conn = self.conn.read();
        let mut stmt = conn.prepare(
            r#"
            SELECT source_id, related_id, relation_type, similarity_score
            FROM relations
            WHERE source_id = ?1 OR related_id = ?1
            ORDER BY similarity_score DESC, source_id, related_id
            "#,
        )?;
        let rows = stmt.query_map(params![record_id.0], |row| {
            Ok(Relation {
                source_id: RecordId(row.get(0)?),
                related_id: RecordId(row.get(1)?),
                relation_type: row.get(2)?,
                similarity_score: row.get::<_, f64>(3)? as f32,
            })
        })?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::NewMemory;

    fn store_record(store: &MemoryStore, query: &str) -> RecordId {
        store
            .store(NewMemory::new(query, "ctx", "resp", "m1"))
            .unwrap()
    }

    #[test]
    fn test_create_thread() {
        let store = MemoryStore::open_in_memory().unwrap();
        let thread = store.create_thread("t1", "Caching questions").unwrap();
        assert_eq!(thread.thread_id, "t1");
        assert_eq!(thread.title, "Caching questions");
        assert!(thread.record_ids.is_empty());
        assert!(thread.summary.is_none());
    }

    #[test]
    fn test_duplicate_thread_rejected() {
        let store = MemoryStore::open_in_memory().unwrap();
        store.create_thread("t1", "first").unwrap();
        let err = store.create_thread("t1", "second").unwrap_err();
        assert!(matches!(
            err,
            CacheError::Validation(ValidationError::DuplicateThread(ref id)) if id == "t1"
        ));
        assert_eq!(store.thread("t1").unwrap().unwrap().title, "first");
    }

    #[test]
    fn test_add_to_thread_keeps_order() {
        let store = MemoryStore::open_in_memory().unwrap();
        let a = store_record(&store, "a");
        let b = store_record(&store, "b");
        store.create_thread("t1", "T").unwrap();
        store.add_to_thread("t1", b).unwrap();
        store.add_to_thread("t1", a).unwrap();

        let thread = store.thread("t1").unwrap().unwrap();
        assert_eq!(thread.record_ids, vec![b, a]);
    }

    #[test]
    fn test_add_to_missing_thread() {
        let store = MemoryStore::open_in_memory().unwrap();
        let a = store_record(&store, "a");
        let err = store.add_to_thread("nope", a).unwrap_err();
        assert!(matches!(
            err,
            CacheError::Validation(ValidationError::ThreadNotFound(_))
        ));
    }

    #[test]
    fn test_add_missing_record_to_thread() {
        let store = MemoryStore::open_in_memory().unwrap();
        store.create_thread("t1", "T").unwrap();
        let err = store.add_to_thread("t1", RecordId(99)).unwrap_err();
        assert!(matches!(err, CacheError::NotFound(_)));
    }

    #[test]
    fn test_thread_summary_and_listing() {
        let store = MemoryStore::open_in_memory().unwrap();
        store.create_thread("t1", "One").unwrap();
        store.create_thread("t2", "Two").unwrap();
        store.set_thread_summary("t1", "All about caching").unwrap();

        assert_eq!(
            store.thread("t1").unwrap().unwrap().summary.as_deref(),
            Some("All about caching")
        );
        // t1 was updated last
        assert_eq!(store.threads().unwrap()[0].thread_id, "t1");
        assert!(store.set_thread_summary("missing", "x").is_err());
    }

    #[test]
    fn test_relations_in_both_directions() {
        let store = MemoryStore::open_in_memory().unwrap();
        let a = store_record(&store, "a");
        let b = store_record(&store, "b");
        let c = store_record(&store, "c");
        store
            .add_relation(&Relation::new(b, a, "derived_from", 0.4))
            .unwrap();
        store
            .add_relation(&Relation::new(c, a, "derived_from", 0.8))
            .unwrap();

        let edges = store.relations(a).unwrap();
        assert_eq!(edges.len(), 2);
        assert_eq!(edges[0].source_id, c);
        assert_eq!(store.relations(b).unwrap().len(), 1);
        assert_eq!(store.stats().unwrap().relation_count, 2);
    }

    #[test]
    fn test_relation_requires_existing_records() {
        let store = MemoryStore::open_in_memory().unwrap();
        let a = store_record(&store, "a");
        let err = store
            .add_relation(&Relation::new(a, RecordId(7), "derived_from", 0.5))
            .unwrap_err();
        assert!(matches!(err, CacheError::NotFound(_)));
    }
}
