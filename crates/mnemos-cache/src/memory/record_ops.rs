//! Record CRUD operations.

use std::collections::BTreeSet;

use rusqlite::{Connection, params, params_from_iter};
use tracing::debug;

use crate::db;
use crate::error::Result;
use crate::validation::{validate_confidence, validate_content};

use super::{MemoryRecord, MemoryStore, NewMemory, RecordId};

/// Column list matching [`MemoryStore::row_to_record`].
pub(super) const RECORD_COLUMNS: &str = "id, query, context, response, tags, confidence_score, \
     model_id, metadata, created_at, last_accessed, access_count";

/// Trim, lowercase and drop empty tags.
pub(crate) fn normalize_tags<'a>(tags: impl IntoIterator<Item = &'a String>) -> BTreeSet<String> {
    tags.into_iter()
        .map(|t| t.trim().to_lowercase())
        .filter(|t| !t.is_empty())
        .collect()
}

impl MemoryStore {
    /// Store a new record and return its id.
    ///
    /// Finite confidence scores are clamped into `[0.0, 1.0]`; NaN and
    /// infinities are rejected.
    pub fn store(&self, memory: NewMemory) -> Result<RecordId> {
        validate_content(&memory.query)?;
        let confidence = validate_confidence(memory.confidence_score)?;
        let tags = normalize_tags(&memory.tags);
        let tags_json = serde_json::to_string(&tags)?;
        let metadata_json = serde_json::to_string(&memory.metadata)?;
        let now = db::now();

        let mut conn = self.conn.write();
        let tx = conn.transaction()?;
        tx.execute(
            r#"
            INSERT INTO memory_records (query, context, response, tags, confidence_score, model_id,
                                        metadata, created_at, last_accessed, access_count)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8, 1)
            "#,
            params![
                memory.query,
                memory.context,
                memory.response,
                tags_json,
                confidence as f64,
                memory.model_id,
                metadata_json,
                now,
            ],
        )?;
        let id = RecordId(tx.last_insert_rowid());
        {
            let mut stmt =
                tx.prepare("INSERT INTO record_tags (record_id, tag) VALUES (?1, ?2)")?;
            for tag in &tags {
                stmt.execute(params![id.0, tag])?;
            }
        }
        tx.commit()?;

        debug!(
            "Stored memory {} (confidence {:.2}, {} tags)",
            id,
            confidence,
            tags.len()
        );
        Ok(id)
    }

    /// Fetch a record without touching its access bookkeeping.
    pub fn get(&self, id: RecordId) -> Result<Option<MemoryRecord>> {
        let conn = self.conn.read();
        Self::get_with(&conn, id)
    }

    pub(super) fn get_with(conn: &Connection, id: RecordId) -> Result<Option<MemoryRecord>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM memory_records WHERE id = ?1",
            RECORD_COLUMNS
        ))?;
        let mut rows = stmt.query(params![id.0])?;
        match rows.next()? {
            Some(row) => Ok(Some(Self::row_to_record(row)?)),
            None => Ok(None),
        }
    }

    /// Records sharing at least one tag with `tags`, most recent first.
    pub fn by_tags(&self, tags: &[String], limit: usize) -> Result<Vec<MemoryRecord>> {
        let tags = normalize_tags(tags);
        if tags.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; tags.len()].join(", ");
        let sql = format!(
            r#"
            SELECT {columns} FROM memory_records
            WHERE id IN (SELECT record_id FROM record_tags WHERE tag IN ({placeholders}))
            ORDER BY created_at DESC, id DESC
            LIMIT {limit}
            "#,
            columns = RECORD_COLUMNS,
            placeholders = placeholders,
            limit = limit,
        );

        let conn = self.conn.read();
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(tags.iter()))?;

        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            records.push(Self::row_to_record(row)?);
        }
        Ok(records)
    }

    /// Every distinct tag with the number of records carrying it.
    pub fn tag_counts(&self) -> Result<Vec<(String, usize)>> {
        let conn = self.conn.read();
        let mut stmt = conn.prepare(
            "SELECT tag, COUNT(*) FROM record_tags GROUP BY tag ORDER BY COUNT(*) DESC, tag ASC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as usize))
        })?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    /// Convert a database row to a record.
    ///
    /// Expected column order is [`RECORD_COLUMNS`].
    pub(super) fn row_to_record(row: &rusqlite::Row) -> Result<MemoryRecord> {
        let tags_json: String = row.get(4)?;
        let confidence: f64 = row.get(5)?;
        let metadata_json: String = row.get(7)?;
        let created_at: String = row.get(8)?;
        let last_accessed: String = row.get(9)?;

        Ok(MemoryRecord {
            id: RecordId(row.get(0)?),
            query: row.get(1)?,
            context: row.get(2)?,
            response: row.get(3)?,
            tags: serde_json::from_str(&tags_json)?,
            confidence_score: confidence as f32,
            model_id: row.get(6)?,
            metadata: serde_json::from_str(&metadata_json)?,
            created_at: db::parse_timestamp(&created_at)?,
            last_accessed: db::parse_timestamp(&last_accessed)?,
            access_count: row.get(10)?,
        })
    }
}
