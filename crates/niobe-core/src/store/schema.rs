//! Schema creation and versioning.

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::StoreResult;

pub const SCHEMA_VERSION: i64 = 1;

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS meta (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS services (
    name          TEXT PRIMARY KEY,
    pid           INTEGER,
    port          INTEGER,
    log_paths     TEXT NOT NULL DEFAULT '[]',
    registered_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS log_records (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    service     TEXT NOT NULL,
    source_file TEXT NOT NULL,
    generation  INTEGER NOT NULL DEFAULT 0,
    byte_offset INTEGER NOT NULL,
    ts_ms       INTEGER NOT NULL,
    ingested_ms INTEGER NOT NULL,
    level       TEXT NOT NULL,
    message     TEXT NOT NULL,
    raw         TEXT NOT NULL,
    format      TEXT NOT NULL,
    truncated   INTEGER NOT NULL DEFAULT 0,
    signature   TEXT NOT NULL,
    UNIQUE (source_file, generation, byte_offset)
);
CREATE INDEX IF NOT EXISTS idx_records_service_ingested
    ON log_records(service, ingested_ms);
CREATE INDEX IF NOT EXISTS idx_records_service_ts
    ON log_records(service, ts_ms);
CREATE INDEX IF NOT EXISTS idx_records_service_level
    ON log_records(service, level, ingested_ms);

CREATE VIRTUAL TABLE IF NOT EXISTS log_fts USING fts5(
    message,
    content='log_records',
    content_rowid='id',
    tokenize='porter unicode61'
);

CREATE TRIGGER IF NOT EXISTS log_fts_ai AFTER INSERT ON log_records BEGIN
    INSERT INTO log_fts(rowid, message) VALUES (new.id, new.message);
END;
CREATE TRIGGER IF NOT EXISTS log_fts_ad AFTER DELETE ON log_records BEGIN
    INSERT INTO log_fts(log_fts, rowid, message) VALUES ('delete', old.id, old.message);
END;
CREATE TRIGGER IF NOT EXISTS log_records_immutable BEFORE UPDATE ON log_records BEGIN
    SELECT RAISE(ABORT, 'log records are immutable');
END;

CREATE TABLE IF NOT EXISTS ingest_cursors (
    service     TEXT NOT NULL,
    source_file TEXT NOT NULL,
    byte_offset INTEGER NOT NULL,
    file_size   INTEGER NOT NULL,
    inode       INTEGER,
    device      INTEGER,
    head_hash   INTEGER NOT NULL,
    head_len    INTEGER NOT NULL,
    generation  INTEGER NOT NULL,
    updated_at  TEXT NOT NULL,
    PRIMARY KEY (service, source_file)
);

CREATE TABLE IF NOT EXISTS snapshots (
    id       TEXT PRIMARY KEY,
    taken_at TEXT NOT NULL,
    taken_ms INTEGER NOT NULL,
    scope    TEXT NOT NULL,
    body     TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_snapshots_time ON snapshots(taken_ms);

CREATE TABLE IF NOT EXISTS snapshot_services (
    snapshot_id TEXT NOT NULL REFERENCES snapshots(id),
    service     TEXT NOT NULL,
    PRIMARY KEY (snapshot_id, service)
);
CREATE INDEX IF NOT EXISTS idx_snapshot_services_service
    ON snapshot_services(service);

CREATE TRIGGER IF NOT EXISTS snapshots_immutable BEFORE UPDATE ON snapshots BEGIN
    SELECT RAISE(ABORT, 'snapshots are immutable');
END;
";

/// Create all tables and record the schema version on first run.
pub fn initialize(conn: &Connection) -> StoreResult<()> {
    conn.execute_batch(SCHEMA_SQL)?;
    let current: Option<String> = conn
        .query_row("SELECT value FROM meta WHERE key = 'schema_version'", [], |row| {
            row.get(0)
        })
        .optional()?;
    if current.is_none() {
        conn.execute(
            "INSERT INTO meta(key, value) VALUES ('schema_version', ?1)",
            params![SCHEMA_VERSION.to_string()],
        )?;
        tracing::debug!(version = SCHEMA_VERSION, "store schema created");
    }
    Ok(())
}

pub fn schema_version(conn: &Connection) -> StoreResult<Option<i64>> {
    let value: Option<String> = conn
        .query_row("SELECT value FROM meta WHERE key = 'schema_version'", [], |row| {
            row.get(0)
        })
        .optional()?;
    Ok(value.and_then(|v| v.parse().ok()))
}
