//! niobe-core: shared types, format detection, and the durable log index.
//!
//! # Architecture
//!
//! ```text
//! Ingestor ──► Detector ──► Store (log index) ◄── Snapshot builder ◄── Diff engine
//!                              ▲                       │
//!                              └──── snapshots ────────┘
//! ```
//!
//! This crate holds the leaf layers: the [`detector`] that classifies lines,
//! the [`signature`] normaliser, and the SQLite [`store`]. The ingestor lives
//! in `niobe-feeds`; the sampler, snapshot builder, and diff engine live in
//! `niobe-snapshot`.

pub mod config;
pub mod detector;
pub mod error;
pub mod registry;
pub mod signature;
pub mod store;
pub mod types;

pub use config::Config;
pub use error::{StoreError, StoreResult};
pub use registry::{ServiceRegistry, StaticRegistry};
pub use store::{SearchFilters, Store, TimeRange};
pub use types::{
    FileFingerprint, IngestionCursor, LogFormat, LogLevel, LogRecord, LogSummary, MetricSample,
    ProcessStatus, ServiceRegistration, ServiceSnapshot, SignatureCount, Snapshot, SnapshotScope,
};
