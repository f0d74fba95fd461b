//! Shared SQLite plumbing for the three stores.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::{Mutex, MutexGuard};
use rusqlite::{Connection, OpenFlags};
use tracing::{debug, info};

use crate::error::{CacheError, Result};

/// Open (creating if needed) a database file with the standard pragmas.
pub(crate) fn open_file(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
        && !parent.exists()
    {
        std::fs::create_dir_all(parent)?;
    }

    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_FULL_MUTEX,
    )?;
    configure(&conn)?;
    Ok(conn)
}

/// Read-only connections opened next to each file-backed writer.
const READER_COUNT: usize = 4;

/// One writer connection plus, for file-backed stores, a pool of read-only
/// connections. In WAL mode readers see every committed write and never
/// block on the writer or on each other.
///
/// In-memory databases cannot be shared between connections, so there every
/// read goes through the writer.
pub(crate) struct Connections {
    writer: Mutex<Connection>,
    readers: Vec<Mutex<Connection>>,
    next_reader: AtomicUsize,
}

impl Connections {
    /// Open `path`, run `setup` on the writer, then open the readers.
    pub(crate) fn open_file(
        path: &Path,
        setup: impl FnOnce(&Connection) -> Result<()>,
    ) -> Result<Self> {
        let writer = open_file(path)?;
        setup(&writer)?;

        let readers = (0..READER_COUNT)
            .map(|_| open_reader(path).map(Mutex::new))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            writer: Mutex::new(writer),
            readers,
            next_reader: AtomicUsize::new(0),
        })
    }

    /// Open an in-memory database and run `setup` on it.
    pub(crate) fn open_memory(setup: impl FnOnce(&Connection) -> Result<()>) -> Result<Self> {
        let writer = open_memory()?;
        setup(&writer)?;
        Ok(Self {
            writer: Mutex::new(writer),
            readers: Vec::new(),
            next_reader: AtomicUsize::new(0),
        })
    }

    /// Exclusive access for statements that modify the database.
    pub(crate) fn write(&self) -> MutexGuard<'_, Connection> {
        self.writer.lock()
    }

    /// A connection for queries that only read.
    pub(crate) fn read(&self) -> MutexGuard<'_, Connection> {
        if self.readers.is_empty() {
            return self.writer.lock();
        }
        if let Some(guard) = self.readers.iter().find_map(|reader| reader.try_lock()) {
            return guard;
        }
        let slot = self.next_reader.fetch_add(1, Ordering::Relaxed) % self.readers.len();
        self.readers[slot].lock()
    }

    /// Close every connection, reporting the first failure.
    pub(crate) fn close(self) -> Result<()> {
        for reader in self.readers {
            reader
                .into_inner()
                .close()
                .map_err(|(_, e)| CacheError::Database(e))?;
        }
        self.writer
            .into_inner()
            .close()
            .map_err(|(_, e)| CacheError::Database(e))
    }
}

fn open_reader(path: &Path) -> Result<Connection> {
    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_FULL_MUTEX,
    )?;
    conn.pragma_update(None, "query_only", true)?;
    Ok(conn)
}

/// Open an in-memory database with the standard pragmas.
pub(crate) fn open_memory() -> Result<Connection> {
    let conn = Connection::open_in_memory()?;
    configure(&conn)?;
    Ok(conn)
}

fn configure(conn: &Connection) -> Result<()> {
    // WAL for concurrent readers on file-backed stores
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    Ok(())
}

/// Run `schema` unless the database is already at `version`.
pub(crate) fn migrate(conn: &Connection, name: &str, version: i32, schema: &str) -> Result<()> {
    let current: i32 = conn
        .pragma_query_value(None, "user_version", |row| row.get(0))
        .unwrap_or(0);

    if current >= version {
        debug!("{} schema up to date (version {})", name, current);
        return Ok(());
    }

    conn.execute_batch(schema)?;
    conn.pragma_update(None, "user_version", version)?;
    info!("{} schema created (version {})", name, version);
    Ok(())
}

/// Fixed-width UTC timestamp so stored values sort lexicographically.
pub(crate) fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn now() -> String {
    timestamp(Utc::now())
}

pub(crate) fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| CacheError::InvalidData(format!("bad timestamp '{}': {}", value, e)))
}

/// Human-readable location for stats output.
pub(crate) fn describe_location(location: Option<&PathBuf>) -> String {
    location
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| ":memory:".to_string())
}
