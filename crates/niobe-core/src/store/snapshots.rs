//! Snapshot persistence. Snapshots are written once and never updated.

use rusqlite::{params, Connection, ErrorCode, OptionalExtension};

use super::{to_millis, Store};
use crate::error::{StoreError, StoreResult};
use crate::types::Snapshot;

/// Shortest id prefix accepted by [`Store::get_snapshot`].
pub const MIN_ID_PREFIX: usize = 8;

impl Store {
    /// Persist `snapshot` in one transaction. Fails with
    /// [`StoreError::SnapshotExists`] if the id is already taken.
    pub fn save_snapshot(&self, snapshot: &Snapshot) -> StoreResult<()> {
        let body = serde_json::to_string(snapshot)?;
        let scope = snapshot.scope.to_string();
        let result = self.write(|tx| {
            tx.execute(
                "INSERT INTO snapshots(id, taken_at, taken_ms, scope, body)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    snapshot.id,
                    snapshot.taken_at.to_rfc3339(),
                    to_millis(snapshot.taken_at),
                    scope,
                    body
                ],
            )?;
            let mut stmt = tx.prepare_cached(
                "INSERT INTO snapshot_services(snapshot_id, service) VALUES (?1, ?2)",
            )?;
            for name in snapshot.service_names() {
                stmt.execute(params![snapshot.id, name])?;
            }
            Ok(())
        });

        match result {
            Err(StoreError::Sqlite(rusqlite::Error::SqliteFailure(e, _)))
                if e.code == ErrorCode::ConstraintViolation =>
            {
                Err(StoreError::SnapshotExists(snapshot.id.clone()))
            }
            other => other,
        }
    }

    /// Load a snapshot by full id, or by a unique prefix of at least
    /// [`MIN_ID_PREFIX`] characters.
    pub fn get_snapshot(&self, id: &str) -> StoreResult<Option<Snapshot>> {
        self.read(|conn| {
            if let Some(body) = body_by_id(conn, id)? {
                return Ok(Some(serde_json::from_str(&body)?));
            }
            if id.len() < MIN_ID_PREFIX || !id.chars().all(|c| c.is_ascii_alphanumeric()) {
                return Ok(None);
            }
            let mut stmt = conn.prepare("SELECT body FROM snapshots WHERE id LIKE ?1 LIMIT 2")?;
            let bodies = stmt
                .query_map(params![format!("{id}%")], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            match bodies.as_slice() {
                [only] => Ok(Some(serde_json::from_str(only)?)),
                _ => Ok(None),
            }
        })
    }

    /// Most recent snapshots first, optionally only those covering `service`.
    pub fn list_snapshots(&self, service: Option<&str>, limit: usize) -> StoreResult<Vec<Snapshot>> {
        self.read(|conn| {
            let bodies: Vec<String> = match service {
                Some(service) => {
                    let mut stmt = conn.prepare(
                        "SELECT s.body FROM snapshots s
                         JOIN snapshot_services ss ON ss.snapshot_id = s.id
                         WHERE ss.service = ?1
                         ORDER BY s.taken_ms DESC, s.id LIMIT ?2",
                    )?;
                    let rows = stmt.query_map(params![service, limit as i64], |row| row.get(0))?;
                    rows.collect::<Result<_, _>>()?
                }
                None => {
                    let mut stmt = conn.prepare(
                        "SELECT body FROM snapshots ORDER BY taken_ms DESC, id LIMIT ?1",
                    )?;
                    let rows = stmt.query_map(params![limit as i64], |row| row.get(0))?;
                    rows.collect::<Result<_, _>>()?
                }
            };
            bodies
                .iter()
                .map(|b| serde_json::from_str(b).map_err(StoreError::from))
                .collect()
        })
    }
}

fn body_by_id(conn: &Connection, id: &str) -> StoreResult<Option<String>> {
    Ok(conn
        .query_row("SELECT body FROM snapshots WHERE id = ?1", params![id], |row| row.get(0))
        .optional()?)
}
