//! Log index queries: batch insert, full-text search, level counts, and
//! error signatures.
//!
//! Two clocks are involved. Search filters (`since` / `until`) apply to the
//! event timestamp of a record. Summary windows ([`Store::count_by_level`],
//! [`Store::top_error_signatures`], [`Store::recent_errors`]) apply to the
//! ingestion time, i.e. when niobe observed the line, so that old or skewed
//! event clocks cannot hide fresh errors from a snapshot.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, Row};

use super::{from_millis, path_text, to_millis, Store};
use crate::error::StoreResult;
use crate::signature;
use crate::types::{LogFormat, LogLevel, LogRecord, SignatureCount};

/// Inclusive time interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// The `window` ending at `end`.
    pub fn trailing(end: DateTime<Utc>, window: chrono::Duration) -> Self {
        Self {
            start: end - window,
            end,
        }
    }

    /// Range between two instants given in either order.
    pub fn between(a: DateTime<Utc>, b: DateTime<Utc>) -> Self {
        Self {
            start: a.min(b),
            end: a.max(b),
        }
    }
}

/// Exact-field filters for [`Store::search`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchFilters {
    pub service: Option<String>,
    pub level: Option<LogLevel>,
    /// Earliest event timestamp.
    pub since: Option<DateTime<Utc>>,
    /// Latest event timestamp.
    pub until: Option<DateTime<Utc>>,
    /// Maximum number of records; callers fill in their default.
    pub limit: usize,
}

impl SearchFilters {
    pub fn with_limit(limit: usize) -> Self {
        Self {
            limit,
            ..Self::default()
        }
    }

    pub fn service(mut self, service: impl Into<String>) -> Self {
        self.service = Some(service.into());
        self
    }

    pub fn level(mut self, level: LogLevel) -> Self {
        self.level = Some(level);
        self
    }

    pub fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    pub fn until(mut self, until: DateTime<Utc>) -> Self {
        self.until = Some(until);
        self
    }
}

const RECORD_COLUMNS: &str = "r.service, r.source_file, r.generation, r.byte_offset, r.ts_ms, \
     r.ingested_ms, r.level, r.message, r.raw, r.format, r.truncated";

const ERROR_LEVELS_SQL: &str = "('error', 'fatal')";

impl Store {
    /// Insert a batch atomically. Records whose
    /// `(source_file, generation, byte_offset)` already exists are skipped.
    /// Returns the number of records actually inserted.
    pub fn insert_batch(&self, records: &[LogRecord]) -> StoreResult<usize> {
        if records.is_empty() {
            return Ok(0);
        }
        self.write(|tx| insert_records(tx, records))
    }

    /// Relevance-ranked full-text search over messages, narrowed by exact
    /// filters. An empty (or all-punctuation) query skips the full-text part
    /// and returns the newest matching records.
    pub fn search(&self, query: &str, filters: &SearchFilters) -> StoreResult<Vec<LogRecord>> {
        let fts = fts_query(query);
        let mut sql = String::new();
        let mut args: Vec<Value> = Vec::new();

        match &fts {
            Some(expr) => {
                sql.push_str(&format!(
                    "SELECT {RECORD_COLUMNS} FROM log_fts \
                     JOIN log_records r ON r.id = log_fts.rowid \
                     WHERE log_fts MATCH ?"
                ));
                args.push(Value::Text(expr.clone()));
            }
            None => {
                sql.push_str(&format!("SELECT {RECORD_COLUMNS} FROM log_records r WHERE 1 = 1"));
            }
        }
        if let Some(service) = &filters.service {
            sql.push_str(" AND r.service = ?");
            args.push(Value::Text(service.clone()));
        }
        if let Some(level) = filters.level {
            sql.push_str(" AND r.level = ?");
            args.push(Value::Text(level.as_str().to_string()));
        }
        if let Some(since) = filters.since {
            sql.push_str(" AND r.ts_ms >= ?");
            args.push(Value::Integer(to_millis(since)));
        }
        if let Some(until) = filters.until {
            sql.push_str(" AND r.ts_ms <= ?");
            args.push(Value::Integer(to_millis(until)));
        }
        if fts.is_some() {
            sql.push_str(" ORDER BY log_fts.rank, r.ts_ms DESC, r.id DESC");
        } else {
            sql.push_str(" ORDER BY r.ts_ms DESC, r.id DESC");
        }
        sql.push_str(" LIMIT ?");
        args.push(Value::Integer(filters.limit as i64));

        self.read(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(args), record_from_row)?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
    }

    /// Record counts per level for `service`, by ingestion time. Levels with
    /// no records are present with a count of zero.
    pub fn count_by_level(
        &self,
        service: &str,
        range: TimeRange,
    ) -> StoreResult<BTreeMap<LogLevel, u64>> {
        self.read(|conn| {
            let mut counts: BTreeMap<LogLevel, u64> =
                LogLevel::ALL.iter().map(|l| (*l, 0)).collect();
            let mut stmt = conn.prepare(
                "SELECT level, COUNT(*) FROM log_records
                 WHERE service = ?1 AND ingested_ms BETWEEN ?2 AND ?3
                 GROUP BY level",
            )?;
            let rows = stmt.query_map(
                params![service, to_millis(range.start), to_millis(range.end)],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)),
            )?;
            for row in rows {
                let (level, count) = row?;
                *counts.entry(LogLevel::from_name(&level)).or_insert(0) += count as u64;
            }
            Ok(counts)
        })
    }

    /// The `n` most frequent error signatures for `service`, by ingestion
    /// time. Ordered by count (descending), then first-seen event time, then
    /// signature text.
    pub fn top_error_signatures(
        &self,
        service: &str,
        range: TimeRange,
        n: usize,
    ) -> StoreResult<Vec<SignatureCount>> {
        self.read(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT signature, COUNT(*) AS hits, MIN(ts_ms) AS first_seen
                 FROM log_records
                 WHERE service = ?1 AND level IN {ERROR_LEVELS_SQL}
                   AND ingested_ms BETWEEN ?2 AND ?3
                 GROUP BY signature
                 ORDER BY hits DESC, first_seen ASC, signature ASC
                 LIMIT ?4"
            ))?;
            let rows = stmt.query_map(
                params![service, to_millis(range.start), to_millis(range.end), n as i64],
                |row| {
                    Ok(SignatureCount {
                        signature: row.get(0)?,
                        count: row.get::<_, i64>(1)? as u64,
                        first_seen: from_millis(row.get(2)?),
                    })
                },
            )?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
    }

    /// Error and fatal records ingested since `since`, newest first.
    pub fn recent_errors(
        &self,
        service: Option<&str>,
        since: DateTime<Utc>,
        limit: usize,
    ) -> StoreResult<Vec<LogRecord>> {
        self.read(|conn| {
            let mut sql = format!(
                "SELECT {RECORD_COLUMNS} FROM log_records r
                 WHERE r.level IN {ERROR_LEVELS_SQL} AND r.ingested_ms >= ?"
            );
            let mut args = vec![Value::Integer(to_millis(since))];
            if let Some(service) = service {
                sql.push_str(" AND r.service = ?");
                args.push(Value::Text(service.to_string()));
            }
            sql.push_str(" ORDER BY r.ingested_ms DESC, r.id DESC LIMIT ?");
            args.push(Value::Integer(limit as i64));

            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(args), record_from_row)?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
    }

    /// Error and fatal records for `service` ingested within `range`.
    pub fn count_errors_between(&self, service: &str, range: TimeRange) -> StoreResult<u64> {
        self.read(|conn| {
            let n: i64 = conn.query_row(
                &format!(
                    "SELECT COUNT(*) FROM log_records
                     WHERE service = ?1 AND level IN {ERROR_LEVELS_SQL}
                       AND ingested_ms BETWEEN ?2 AND ?3"
                ),
                params![service, to_millis(range.start), to_millis(range.end)],
                |row| row.get(0),
            )?;
            Ok(n as u64)
        })
    }

    /// Total records stored for `service` (all time).
    pub fn count_records(&self, service: &str) -> StoreResult<u64> {
        self.read(|conn| {
            let n: i64 = conn.query_row(
                "SELECT COUNT(*) FROM log_records WHERE service = ?1",
                params![service],
                |row| row.get(0),
            )?;
            Ok(n as u64)
        })
    }

    /// All records read from one file generation, in file order.
    pub fn records_for_file(
        &self,
        source_file: &std::path::Path,
        generation: u32,
    ) -> StoreResult<Vec<LogRecord>> {
        self.read(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {RECORD_COLUMNS} FROM log_records r
                 WHERE r.source_file = ?1 AND r.generation = ?2
                 ORDER BY r.byte_offset"
            ))?;
            let rows = stmt.query_map(
                params![path_text(source_file), generation],
                record_from_row,
            )?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
    }
}

pub(crate) fn insert_records(conn: &Connection, records: &[LogRecord]) -> StoreResult<usize> {
    let mut stmt = conn.prepare_cached(
        "INSERT OR IGNORE INTO log_records
            (service, source_file, generation, byte_offset, ts_ms, ingested_ms,
             level, message, raw, format, truncated, signature)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
    )?;
    let mut inserted = 0;
    for record in records {
        inserted += stmt.execute(params![
            record.service,
            path_text(&record.source_file),
            record.generation,
            record.byte_offset as i64,
            to_millis(record.timestamp),
            to_millis(record.ingested_at),
            record.level.as_str(),
            record.message,
            record.raw,
            record.format.as_str(),
            record.truncated,
            signature::normalize(&record.message),
        ])?;
    }
    Ok(inserted)
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<LogRecord> {
    Ok(LogRecord {
        service: row.get(0)?,
        source_file: row.get::<_, String>(1)?.into(),
        generation: row.get(2)?,
        byte_offset: row.get::<_, i64>(3)? as u64,
        timestamp: from_millis(row.get(4)?),
        ingested_at: from_millis(row.get(5)?),
        level: LogLevel::from_name(&row.get::<_, String>(6)?),
        message: row.get(7)?,
        raw: row.get(8)?,
        format: LogFormat::from_name(&row.get::<_, String>(9)?),
        truncated: row.get(10)?,
    })
}

/// Turn free text into a safe FTS5 expression: every word becomes a quoted
/// term and terms are ANDed. Returns `None` when there are no words.
fn fts_query(query: &str) -> Option<String> {
    let terms: Vec<String> = query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| format!("\"{t}\""))
        .collect();
    if terms.is_empty() {
        None
    } else {
        Some(terms.join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fts_query_quotes_terms() {
        assert_eq!(fts_query("connection refused"), Some("\"connection\" \"refused\"".into()));
        assert_eq!(fts_query("db:5432 (timeout)"), Some("\"db\" \"5432\" \"timeout\"".into()));
        assert_eq!(fts_query("  -- ** "), None);
    }

    #[test]
    fn trailing_range_ends_at_reference() {
        let end = Utc::now();
        let range = TimeRange::trailing(end, chrono::Duration::minutes(5));
        assert_eq!(range.end, end);
        assert_eq!(range.end - range.start, chrono::Duration::minutes(5));
    }
}
