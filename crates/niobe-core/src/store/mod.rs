//! Store: durable SQLite log index, ingestion cursors, service registry, and
//! snapshot records.
//!
//! The store is the only resource shared between concurrent actors. Writes go
//! through a single connection behind a mutex, and every write is one
//! transaction, so readers (served from a pool of read-only connections in WAL
//! mode) never observe a half-committed batch and never wait on the writer.
//!
//! # Layout
//!
//! | Module | Tables |
//! |--------|--------|
//! | [`logs`] | `log_records`, `log_fts` |
//! | [`cursors`] | `ingest_cursors` |
//! | [`services`] | `services` |
//! | [`snapshots`] | `snapshots`, `snapshot_services` |

pub mod cursors;
pub mod logs;
pub mod pool;
pub mod schema;
pub mod services;
pub mod snapshots;

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::Connection;

use crate::error::{StoreError, StoreResult};
use pool::ReadPool;

pub use logs::{SearchFilters, TimeRange};

/// Handle to the niobe database. Cheap to share behind an `Arc`.
pub struct Store {
    writer: Mutex<Connection>,
    /// `None` for in-memory stores, whose reads go through the writer because
    /// separate in-memory connections are separate databases.
    readers: Option<ReadPool>,
    path: Option<PathBuf>,
}

impl Store {
    /// Open (creating if needed) the database at `path`.
    pub fn open(path: &Path) -> StoreResult<Self> {
        let unavailable = |reason: String| StoreError::Unavailable {
            path: path.to_path_buf(),
            reason,
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| unavailable(e.to_string()))?;
        }
        let writer = Connection::open(path).map_err(|e| unavailable(e.to_string()))?;
        pool::apply_write_pragmas(&writer).map_err(|e| unavailable(e.to_string()))?;
        schema::initialize(&writer)?;

        let readers = ReadPool::open(path, pool::READ_POOL_SIZE)?;
        tracing::debug!(path = %path.display(), "store opened");

        Ok(Self {
            writer: Mutex::new(writer),
            readers: Some(readers),
            path: Some(path.to_path_buf()),
        })
    }

    /// Open a private in-memory database (for tests and benches).
    pub fn open_in_memory() -> StoreResult<Self> {
        let writer = Connection::open_in_memory()?;
        writer.execute_batch("PRAGMA foreign_keys = ON;")?;
        schema::initialize(&writer)?;
        Ok(Self {
            writer: Mutex::new(writer),
            readers: None,
            path: None,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Run `f` inside one write transaction. The transaction commits only if
    /// `f` returns `Ok`; any error rolls everything back.
    pub(crate) fn write<F, T>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&rusqlite::Transaction<'_>) -> StoreResult<T>,
    {
        let mut conn = self.writer.lock().map_err(|_| StoreError::Poisoned)?;
        let tx = conn.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }

    pub(crate) fn read<F, T>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&Connection) -> StoreResult<T>,
    {
        match &self.readers {
            Some(readers) => readers.with_conn(f),
            None => {
                let conn = self.writer.lock().map_err(|_| StoreError::Poisoned)?;
                f(&conn)
            }
        }
    }

    pub fn schema_version(&self) -> StoreResult<Option<i64>> {
        self.read(schema::schema_version)
    }

    /// Whether the writer runs in WAL mode (always false for in-memory stores).
    pub fn is_wal(&self) -> StoreResult<bool> {
        let conn = self.writer.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(pool::is_wal(&conn)?)
    }
}

// ---------------------------------------------------------------------------
// Column conversions
// ---------------------------------------------------------------------------

pub(crate) fn to_millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

pub(crate) fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

pub(crate) fn parse_rfc3339(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_default()
}

pub(crate) fn path_text(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
