//! Store-level errors.

use std::path::PathBuf;

/// Failures of the log index / snapshot store. Every variant leaves the
/// database unchanged: writes run inside a transaction that is rolled back
/// when any statement fails.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The database file could not be opened or prepared.
    #[error("store unavailable at {path}: {reason}")]
    Unavailable { path: PathBuf, reason: String },

    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("corrupt stored record: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Another ingestor advanced the cursor for this file since it was read.
    #[error("ingestion cursor for {path} moved concurrently")]
    CursorConflict { path: PathBuf },

    /// Snapshots are immutable; an id can only be written once.
    #[error("snapshot {0} already exists")]
    SnapshotExists(String),

    #[error("store lock poisoned")]
    Poisoned,
}

pub type StoreResult<T> = Result<T, StoreError>;
