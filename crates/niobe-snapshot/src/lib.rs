//! niobe-snapshot: process sampling, health snapshots, and snapshot diffs.
//!
//! ```text
//! SnapshotBuilder ──► FileIngestor ──► Store
//!        │                               ▲
//!        └──► Sampler        DiffEngine ─┘
//! ```

pub mod builder;
pub mod diff;
pub mod error;
mod procnet;
pub mod sampler;

pub use builder::SnapshotBuilder;
pub use diff::{DiffEngine, Direction, MetricDelta, ServiceDiff, SignatureChange, SignatureDiff, SnapshotDiff};
pub use error::{DiffError, SnapshotError};
pub use sampler::{FixedSampler, SampleError, Sampler, SystemSampler};
