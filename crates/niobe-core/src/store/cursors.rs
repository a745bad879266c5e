//! Ingestion cursors and the combined batch + cursor commit.

use std::path::Path;

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::logs::insert_records;
use super::{parse_rfc3339, path_text, Store};
use crate::error::{StoreError, StoreResult};
use crate::types::{FileFingerprint, IngestionCursor, LogRecord};

const CURSOR_COLUMNS: &str = "service, source_file, byte_offset, file_size, inode, device, \
     head_hash, head_len, generation, updated_at";

impl Store {
    pub fn get_cursor(&self, service: &str, source_file: &Path) -> StoreResult<Option<IngestionCursor>> {
        self.read(|conn| load_cursor(conn, service, source_file))
    }

    pub fn list_cursors(&self, service: &str) -> StoreResult<Vec<IngestionCursor>> {
        self.read(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {CURSOR_COLUMNS} FROM ingest_cursors WHERE service = ?1 ORDER BY source_file"
            ))?;
            let rows = stmt.query_map(params![service], cursor_from_row)?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
    }

    /// Insert `records` and move the cursor to `next` in one transaction.
    ///
    /// `expected` is the cursor the caller started reading from (`None` for a
    /// file seen for the first time). If the stored cursor no longer matches
    /// it, another ingestor got there first and nothing is written.
    pub fn commit_ingest(
        &self,
        records: &[LogRecord],
        expected: Option<&IngestionCursor>,
        next: &IngestionCursor,
    ) -> StoreResult<usize> {
        self.write(|tx| {
            let current = load_cursor(tx, &next.service, &next.source_file)?;
            let unchanged = match (current.as_ref(), expected) {
                (None, None) => true,
                (Some(cur), Some(exp)) => {
                    cur.offset == exp.offset
                        && cur.generation == exp.generation
                        && cur.fingerprint == exp.fingerprint
                }
                _ => false,
            };
            if !unchanged {
                return Err(StoreError::CursorConflict {
                    path: next.source_file.clone(),
                });
            }

            let inserted = insert_records(tx, records)?;
            save_cursor(tx, next)?;
            Ok(inserted)
        })
    }
}

fn load_cursor(
    conn: &Connection,
    service: &str,
    source_file: &Path,
) -> StoreResult<Option<IngestionCursor>> {
    Ok(conn
        .query_row(
            &format!(
                "SELECT {CURSOR_COLUMNS} FROM ingest_cursors WHERE service = ?1 AND source_file = ?2"
            ),
            params![service, path_text(source_file)],
            cursor_from_row,
        )
        .optional()?)
}

fn save_cursor(conn: &Connection, cursor: &IngestionCursor) -> StoreResult<()> {
    conn.execute(
        "INSERT INTO ingest_cursors
            (service, source_file, byte_offset, file_size, inode, device,
             head_hash, head_len, generation, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
         ON CONFLICT(service, source_file) DO UPDATE SET
            byte_offset = excluded.byte_offset,
            file_size   = excluded.file_size,
            inode       = excluded.inode,
            device      = excluded.device,
            head_hash   = excluded.head_hash,
            head_len    = excluded.head_len,
            generation  = excluded.generation,
            updated_at  = excluded.updated_at",
        params![
            cursor.service,
            path_text(&cursor.source_file),
            cursor.offset as i64,
            cursor.file_size as i64,
            cursor.fingerprint.inode.map(|v| v as i64),
            cursor.fingerprint.device.map(|v| v as i64),
            cursor.fingerprint.head_hash as i64,
            cursor.fingerprint.head_len,
            cursor.generation,
            cursor.updated_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

fn cursor_from_row(row: &Row<'_>) -> rusqlite::Result<IngestionCursor> {
    Ok(IngestionCursor {
        service: row.get(0)?,
        source_file: row.get::<_, String>(1)?.into(),
        offset: row.get::<_, i64>(2)? as u64,
        file_size: row.get::<_, i64>(3)? as u64,
        fingerprint: FileFingerprint {
            inode: row.get::<_, Option<i64>>(4)?.map(|v| v as u64),
            device: row.get::<_, Option<i64>>(5)?.map(|v| v as u64),
            head_hash: row.get::<_, i64>(6)? as u64,
            head_len: row.get(7)?,
        },
        generation: row.get(8)?,
        updated_at: parse_rfc3339(&row.get::<_, String>(9)?),
    })
}
