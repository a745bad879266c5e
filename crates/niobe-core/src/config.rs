//! Configuration types for niobe.
//!
//! [`Config::load`] layers `<project>/.niobe/config.toml` and `NIOBE_*`
//! environment variables on top of the embedded defaults.
//! [`Config::defaults`] returns the same defaults without touching the
//! filesystem or the environment (useful in tests).
//!
//! Environment overrides use a double underscore between section and key,
//! e.g. `NIOBE_SNAPSHOT__ERROR_WINDOW_MINUTES=15`.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

// ---------------------------------------------------------------------------
// Embedded defaults
// ---------------------------------------------------------------------------

const DEFAULT_CONFIG: &str = r#"
[store]
db_name = "niobe.db"

[ingestion]
tail_chunk_bytes   = 1048576
max_line_length    = 8192
max_reingest_bytes = 8388608
batch_lines        = 1000
follow_interval_ms = 1000

[snapshot]
error_window_minutes   = 5
cpu_sample_interval_ms = 500
top_signatures         = 10

[search]
default_limit               = 50
default_error_since_minutes = 5

[diff]
cpu_percent = 2.0
memory_mb   = 10.0
threads     = 0.0
connections = 0.0
error_count = 0.0
log_rate    = 0.1
"#;

/// Name of the per-project state directory.
pub const STATE_DIR: &str = ".niobe";

// ---------------------------------------------------------------------------
// Public config types
// ---------------------------------------------------------------------------

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub ingestion: IngestionConfig,
    #[serde(default)]
    pub snapshot: SnapshotConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub diff: DiffThresholds,
}

/// `[store]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_db_name")]
    pub db_name: String,
}

fn default_db_name() -> String { "niobe.db".to_string() }

impl Default for StoreConfig {
    fn default() -> Self {
        Self { db_name: default_db_name() }
    }
}

/// `[ingestion]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct IngestionConfig {
    /// The most that is backfilled from the end of a file the ingestor has
    /// never seen before. Also sizes the read buffer, see
    /// [`IngestionConfig::read_buffer_bytes`].
    #[serde(default = "default_tail_chunk_bytes")]
    pub tail_chunk_bytes: u64,
    /// Lines longer than this many bytes are cut and flagged as truncated.
    #[serde(default = "default_max_line_length")]
    pub max_line_length: usize,
    /// Upper bound on bytes re-read after a rotation.
    #[serde(default = "default_max_reingest_bytes")]
    pub max_reingest_bytes: u64,
    /// Lines per committed batch.
    #[serde(default = "default_batch_lines")]
    pub batch_lines: usize,
    #[serde(default = "default_follow_interval_ms")]
    pub follow_interval_ms: u64,
}

fn default_tail_chunk_bytes() -> u64 { 1024 * 1024 }
fn default_max_line_length() -> usize { 8192 }
fn default_max_reingest_bytes() -> u64 { 8 * 1024 * 1024 }
fn default_batch_lines() -> usize { 1000 }
fn default_follow_interval_ms() -> u64 { 1000 }

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            tail_chunk_bytes: default_tail_chunk_bytes(),
            max_line_length: default_max_line_length(),
            max_reingest_bytes: default_max_reingest_bytes(),
            batch_lines: default_batch_lines(),
            follow_interval_ms: default_follow_interval_ms(),
        }
    }
}

/// Bounds on the ingestor's read buffer.
const READ_BUFFER_BYTES: std::ops::RangeInclusive<usize> = 512..=1024 * 1024;

impl IngestionConfig {
    pub fn follow_interval(&self) -> Duration {
        Duration::from_millis(self.follow_interval_ms)
    }

    /// `tail_chunk_bytes` clamped to a sane buffer capacity.
    pub fn read_buffer_bytes(&self) -> usize {
        usize::try_from(self.tail_chunk_bytes)
            .unwrap_or(usize::MAX)
            .clamp(*READ_BUFFER_BYTES.start(), *READ_BUFFER_BYTES.end())
    }
}

/// `[snapshot]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct SnapshotConfig {
    #[serde(default = "default_error_window_minutes")]
    pub error_window_minutes: u32,
    #[serde(default = "default_cpu_sample_interval_ms")]
    pub cpu_sample_interval_ms: u64,
    #[serde(default = "default_top_signatures")]
    pub top_signatures: usize,
}

fn default_error_window_minutes() -> u32 { 5 }
fn default_cpu_sample_interval_ms() -> u64 { 500 }
fn default_top_signatures() -> usize { 10 }

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            error_window_minutes: default_error_window_minutes(),
            cpu_sample_interval_ms: default_cpu_sample_interval_ms(),
            top_signatures: default_top_signatures(),
        }
    }
}

impl SnapshotConfig {
    pub fn error_window(&self) -> chrono::Duration {
        chrono::Duration::minutes(i64::from(self.error_window_minutes))
    }

    pub fn cpu_sample_interval(&self) -> Duration {
        Duration::from_millis(self.cpu_sample_interval_ms)
    }
}

/// `[search]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct SearchConfig {
    #[serde(default = "default_limit")]
    pub default_limit: usize,
    #[serde(default = "default_error_since_minutes")]
    pub default_error_since_minutes: u32,
}

fn default_limit() -> usize { 50 }
fn default_error_since_minutes() -> u32 { 5 }

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_limit: default_limit(),
            default_error_since_minutes: default_error_since_minutes(),
        }
    }
}

/// `[diff]` section: per-metric noise thresholds. A change whose magnitude is
/// at most the threshold is reported as unchanged.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DiffThresholds {
    /// Percentage points.
    #[serde(default = "default_cpu_threshold")]
    pub cpu_percent: f64,
    /// Megabytes of resident memory.
    #[serde(default = "default_memory_threshold")]
    pub memory_mb: f64,
    #[serde(default)]
    pub threads: f64,
    #[serde(default)]
    pub connections: f64,
    #[serde(default)]
    pub error_count: f64,
    /// Lines per second.
    #[serde(default = "default_log_rate_threshold")]
    pub log_rate: f64,
}

fn default_cpu_threshold() -> f64 { 2.0 }
fn default_memory_threshold() -> f64 { 10.0 }
fn default_log_rate_threshold() -> f64 { 0.1 }

impl Default for DiffThresholds {
    fn default() -> Self {
        Self {
            cpu_percent: default_cpu_threshold(),
            memory_mb: default_memory_threshold(),
            threads: 0.0,
            connections: 0.0,
            error_count: 0.0,
            log_rate: default_log_rate_threshold(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::defaults()
    }
}

impl Config {
    /// Load for the project rooted at `project`, layered on top of the
    /// built-in defaults: `.niobe/config.toml`, then `NIOBE_*` variables.
    pub fn load(project: &Path) -> anyhow::Result<Self> {
        let path = config_path(project);

        config::Config::builder()
            .add_source(config::File::from_str(DEFAULT_CONFIG, config::FileFormat::Toml))
            .add_source(config::File::from(path.as_path()).required(false))
            .add_source(
                config::Environment::with_prefix("NIOBE")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
            .map_err(Into::into)
    }

    /// Return the built-in defaults without touching the filesystem.
    pub fn defaults() -> Self {
        config::Config::builder()
            .add_source(config::File::from_str(DEFAULT_CONFIG, config::FileFormat::Toml))
            .build()
            .expect("built-in default config must be valid TOML")
            .try_deserialize()
            .expect("built-in default config must deserialize correctly")
    }

    /// Location of the database for the project rooted at `project`.
    pub fn db_path(&self, project: &Path) -> PathBuf {
        project.join(STATE_DIR).join(&self.store.db_name)
    }
}

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

fn config_path(project: &Path) -> PathBuf {
    project.join(STATE_DIR).join("config.toml")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
