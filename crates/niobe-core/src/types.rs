//! Core types for niobe-core.
//!
//! This module defines the value types shared across all layers: the
//! normalised [`LogRecord`] with its [`LogLevel`] and [`LogFormat`], the
//! per-file [`IngestionCursor`], process [`MetricSample`]s, and the immutable
//! [`Snapshot`] record. None of these types carry setters; once built they are
//! only ever inserted or read back.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Log records
// ---------------------------------------------------------------------------

/// One normalised log line.
///
/// `(source_file, generation, byte_offset)` identifies a record uniquely; the
/// store silently ignores a second insert of the same key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    /// Registered service the file belongs to.
    pub service: String,
    /// Path of the file the line was read from.
    pub source_file: PathBuf,
    /// Rotation generation of `source_file` at the time the line was read.
    /// Starts at zero and increments every time the ingestor detects rotation.
    pub generation: u32,
    /// Byte position of the first byte of the line within the file.
    pub byte_offset: u64,
    /// Event time parsed from the line, or the ingestion time when the line
    /// carries no parseable timestamp.
    pub timestamp: DateTime<Utc>,
    /// When the ingestor read the line.
    pub ingested_at: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    /// The original line (minus its line terminator), kept for audit.
    pub raw: String,
    pub format: LogFormat,
    /// Set when the line exceeded the configured maximum length and was cut.
    pub truncated: bool,
}

/// Log severity, normalised across all formats.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
    Unknown,
}

/// Aliases accepted when parsing a level name. Keys are lowercase.
static LEVEL_ALIASES: phf::Map<&'static str, LogLevel> = phf::phf_map! {
    "trace" => LogLevel::Trace,
    "debug" => LogLevel::Debug,
    "info" => LogLevel::Info,
    "information" => LogLevel::Info,
    "notice" => LogLevel::Info,
    "warn" => LogLevel::Warn,
    "warning" => LogLevel::Warn,
    "error" => LogLevel::Error,
    "err" => LogLevel::Error,
    "fatal" => LogLevel::Fatal,
    "critical" => LogLevel::Fatal,
    "crit" => LogLevel::Fatal,
    "panic" => LogLevel::Fatal,
    "unknown" => LogLevel::Unknown,
};

impl LogLevel {
    pub const ALL: [LogLevel; 7] = [
        LogLevel::Trace,
        LogLevel::Debug,
        LogLevel::Info,
        LogLevel::Warn,
        LogLevel::Error,
        LogLevel::Fatal,
        LogLevel::Unknown,
    ];

    /// Levels that count towards error totals and signatures.
    pub const ERRORS: [LogLevel; 2] = [LogLevel::Error, LogLevel::Fatal];

    /// Lowercase level name, as stored and serialised.
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
            LogLevel::Fatal => "fatal",
            LogLevel::Unknown => "unknown",
        }
    }

    /// Map any recognised level spelling (case-insensitive) to a level.
    /// Unrecognised names map to [`LogLevel::Unknown`].
    pub fn from_name(name: &str) -> LogLevel {
        let lower = name.trim().to_ascii_lowercase();
        LEVEL_ALIASES
            .get(lower.as_str())
            .copied()
            .unwrap_or(LogLevel::Unknown)
    }

    pub fn is_error(self) -> bool {
        matches!(self, LogLevel::Error | LogLevel::Fatal)
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(LogLevel::from_name(s))
    }
}

/// Shape a log line was recognised as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Clf,
    Pythonic,
    Raw,
}

impl LogFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            LogFormat::Json => "json",
            LogFormat::Clf => "clf",
            LogFormat::Pythonic => "pythonic",
            LogFormat::Raw => "raw",
        }
    }

    pub fn from_name(name: &str) -> LogFormat {
        match name {
            "json" => LogFormat::Json,
            "clf" => LogFormat::Clf,
            "pythonic" => LogFormat::Pythonic,
            _ => LogFormat::Raw,
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Ingestion bookkeeping
// ---------------------------------------------------------------------------

/// Identity of a file's content stream, used to detect rotation and
/// truncation between ingestion runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FileFingerprint {
    /// Inode number (unix only).
    pub inode: Option<u64>,
    /// Device id (unix only).
    pub device: Option<u64>,
    /// xxh3 hash of the first `head_len` bytes of the file.
    pub head_hash: u64,
    pub head_len: u32,
}

/// Per `(service, source_file)` bookmark of the last committed byte offset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestionCursor {
    pub service: String,
    pub source_file: PathBuf,
    /// Offset just past the last committed line.
    pub offset: u64,
    /// File size observed when `offset` was committed.
    pub file_size: u64,
    pub fingerprint: FileFingerprint,
    /// Number of rotations observed for this file.
    pub generation: u32,
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Services and metrics
// ---------------------------------------------------------------------------

/// A service under observation. Owned by the registry collaborator; the core
/// only reads it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRegistration {
    pub name: String,
    pub pid: Option<u32>,
    pub port: Option<u16>,
    /// Ordered, de-duplicated list of log files.
    pub log_paths: Vec<PathBuf>,
}

impl ServiceRegistration {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            pid: None,
            port: None,
            log_paths: Vec::new(),
        }
    }

    pub fn with_pid(mut self, pid: u32) -> Self {
        self.pid = Some(pid);
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_log_path(mut self, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        if !self.log_paths.contains(&path) {
            self.log_paths.push(path);
        }
        self
    }
}

/// Process state as reported by the operating system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessStatus {
    Running,
    Sleeping,
    Stopped,
    Zombie,
    Dead,
    Unknown,
}

/// Point-in-time process metrics for one pid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub pid: u32,
    pub status: ProcessStatus,
    /// Utilisation over the sampling interval, in percent of one core.
    /// Zero when only a single reading was taken.
    pub cpu_percent: f64,
    pub memory_bytes: u64,
    /// `None` where the platform does not expose per-process threads.
    #[serde(default)]
    pub thread_count: Option<u32>,
    /// Open TCP and UDP sockets. `None` where they could not be read.
    #[serde(default)]
    pub connection_count: Option<u32>,
    pub captured_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Snapshots
// ---------------------------------------------------------------------------

/// Which services a snapshot covers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "kind", content = "name")]
pub enum SnapshotScope {
    Service(String),
    All,
}

impl fmt::Display for SnapshotScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SnapshotScope::Service(name) => f.write_str(name),
            SnapshotScope::All => f.write_str("all"),
        }
    }
}

impl From<&str> for SnapshotScope {
    fn from(s: &str) -> Self {
        if s.eq_ignore_ascii_case("all") {
            SnapshotScope::All
        } else {
            SnapshotScope::Service(s.to_string())
        }
    }
}

/// A normalised error message and how often it occurred.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureCount {
    pub signature: String,
    pub count: u64,
    /// Earliest event time of any line with this signature in the window.
    pub first_seen: DateTime<Utc>,
}

/// Log statistics over the trailing error window of a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogSummary {
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub counts: BTreeMap<LogLevel, u64>,
    pub total: u64,
    /// Error plus fatal lines.
    pub error_count: u64,
    /// Lines per second over the window.
    pub log_rate: f64,
    pub top_errors: Vec<SignatureCount>,
}

/// Per-service part of a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceSnapshot {
    pub registration: ServiceRegistration,
    /// `None` when the service has no pid or the process could not be read.
    pub metrics: Option<MetricSample>,
    pub log_summary: LogSummary,
    /// Lines ingested while building this snapshot.
    pub ingested: u64,
    /// Recovered per-file and per-process failures.
    pub warnings: Vec<String>,
    /// Set when neither metrics nor any log file could be read.
    pub degraded: bool,
}

/// Immutable point-in-time health record for one or more services.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: String,
    pub taken_at: DateTime<Utc>,
    pub scope: SnapshotScope,
    /// Sorted by service name.
    pub services: Vec<ServiceSnapshot>,
}

impl Snapshot {
    pub fn service(&self, name: &str) -> Option<&ServiceSnapshot> {
        self.services.iter().find(|s| s.registration.name == name)
    }

    pub fn service_names(&self) -> impl Iterator<Item = &str> {
        self.services.iter().map(|s| s.registration.name.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_aliases_are_case_insensitive() {
        assert_eq!(LogLevel::from_name("ERROR"), LogLevel::Error);
        assert_eq!(LogLevel::from_name("Warning"), LogLevel::Warn);
        assert_eq!(LogLevel::from_name("CRITICAL"), LogLevel::Fatal);
        assert_eq!(LogLevel::from_name(" info "), LogLevel::Info);
        assert_eq!(LogLevel::from_name("verbose"), LogLevel::Unknown);
    }

    #[test]
    fn level_serialises_lowercase() {
        let json = serde_json::to_string(&LogLevel::Fatal).unwrap();
        assert_eq!(json, "\"fatal\"");
    }

    #[test]
    fn scope_from_str() {
        assert_eq!(SnapshotScope::from("ALL"), SnapshotScope::All);
        assert_eq!(
            SnapshotScope::from("api"),
            SnapshotScope::Service("api".to_string())
        );
    }

    #[test]
    fn registration_dedups_log_paths() {
        let reg = ServiceRegistration::new("api")
            .with_log_path("/var/log/api.log")
            .with_log_path("/var/log/api.log");
        assert_eq!(reg.log_paths.len(), 1);
    }
}
