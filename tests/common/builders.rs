//! Test builders: ergonomic constructors for records, samples, snapshots, and
//! stores.
//!
//! These builders are designed for readability in test assertions, not for
//! production use. They panic on invalid input rather than returning `Result`.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use niobe_core::{
    LogFormat, LogLevel, LogRecord, LogSummary, MetricSample, ProcessStatus, ServiceRegistration,
    ServiceSnapshot, SignatureCount, Snapshot, SnapshotScope, Store,
};

// ---------------------------------------------------------------------------
// Stores
// ---------------------------------------------------------------------------

/// A fresh in-memory store.
pub fn memory_store() -> Arc<Store> {
    Arc::new(Store::open_in_memory().expect("in-memory store"))
}

/// A fresh on-disk (WAL) store inside `dir`.
pub fn disk_store(dir: &tempfile::TempDir) -> Arc<Store> {
    Arc::new(Store::open(&dir.path().join("niobe.db")).expect("on-disk store"))
}

/// Fixed instant used wherever a test needs a stable clock reading.
pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 0).unwrap()
}

// ---------------------------------------------------------------------------
// LogRecordBuilder
// ---------------------------------------------------------------------------

/// Fluent builder for [`LogRecord`] fixtures.
///
/// # Example
///
/// ```rust
/// let record = LogRecordBuilder::new("api", "timeout connecting to db")
///     .level(LogLevel::Error)
///     .offset(128)
///     .build();
/// ```
pub struct LogRecordBuilder {
    record: LogRecord,
}

impl LogRecordBuilder {
    pub fn new(service: &str, message: impl Into<String>) -> Self {
        let message = message.into();
        let now = Utc::now();
        Self {
            record: LogRecord {
                service: service.to_string(),
                source_file: PathBuf::from(format!("/var/log/{service}.log")),
                generation: 0,
                byte_offset: 0,
                timestamp: now,
                ingested_at: now,
                level: LogLevel::Info,
                raw: message.clone(),
                message,
                format: LogFormat::Raw,
                truncated: false,
            },
        }
    }

    pub fn level(mut self, level: LogLevel) -> Self {
        self.record.level = level;
        self
    }

    pub fn file(mut self, path: impl Into<PathBuf>) -> Self {
        self.record.source_file = path.into();
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.record.byte_offset = offset;
        self
    }

    pub fn generation(mut self, generation: u32) -> Self {
        self.record.generation = generation;
        self
    }

    pub fn at(mut self, ts: DateTime<Utc>) -> Self {
        self.record.timestamp = ts;
        self
    }

    pub fn ingested(mut self, ts: DateTime<Utc>) -> Self {
        self.record.ingested_at = ts;
        self
    }

    pub fn build(self) -> LogRecord {
        self.record
    }
}

/// `n` records for `service`, one per line offset, cycling INFO/WARN/ERROR.
pub fn record_batch(service: &str, n: usize) -> Vec<LogRecord> {
    (0..n)
        .map(|i| {
            let level = match i % 10 {
                0 => LogLevel::Error,
                1 | 2 => LogLevel::Warn,
                _ => LogLevel::Info,
            };
            LogRecordBuilder::new(service, format!("request {i} handled"))
                .level(level)
                .offset(i as u64 * 64)
                .build()
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Metrics and snapshots
// ---------------------------------------------------------------------------

pub fn metric(pid: u32, cpu_percent: f64) -> MetricSample {
    MetricSample {
        pid,
        status: ProcessStatus::Running,
        cpu_percent,
        memory_bytes: 64 * 1024 * 1024,
        thread_count: Some(8),
        connection_count: Some(3),
        captured_at: Utc::now(),
    }
}

/// A service sub-record with the given metrics and error signatures.
pub fn service_snapshot(
    name: &str,
    metrics: Option<MetricSample>,
    top_errors: &[(&str, u64)],
) -> ServiceSnapshot {
    let error_count: u64 = top_errors.iter().map(|(_, n)| n).sum();
    let mut counts: BTreeMap<LogLevel, u64> = LogLevel::ALL.iter().map(|l| (*l, 0)).collect();
    counts.insert(LogLevel::Error, error_count);
    let mut registration = ServiceRegistration::new(name);
    registration.pid = metrics.as_ref().map(|m| m.pid);
    ServiceSnapshot {
        registration,
        metrics,
        log_summary: LogSummary {
            window_start: t0() - Duration::minutes(5),
            window_end: t0(),
            counts,
            total: error_count,
            error_count,
            log_rate: error_count as f64 / 300.0,
            top_errors: top_errors
                .iter()
                .enumerate()
                .map(|(i, (sig, count))| SignatureCount {
                    signature: sig.to_string(),
                    count: *count,
                    first_seen: t0() - Duration::seconds(60 - i as i64),
                })
                .collect(),
        },
        ingested: 0,
        warnings: Vec::new(),
        degraded: false,
    }
}

pub fn snapshot(id: &str, taken_at: DateTime<Utc>, services: Vec<ServiceSnapshot>) -> Snapshot {
    let scope = match services.as_slice() {
        [only] => SnapshotScope::Service(only.registration.name.clone()),
        _ => SnapshotScope::All,
    };
    Snapshot {
        id: id.to_string(),
        taken_at,
        scope,
        services,
    }
}
