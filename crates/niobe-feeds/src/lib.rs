//! niobe-feeds: incremental log file ingestion for niobe.
//!
//! The [`file::FileIngestor`] reads every complete line written since the
//! last run, using an explicit per-file cursor rather than filesystem events,
//! and commits normalised [`niobe_core::LogRecord`] batches to the store.

pub mod file;
pub mod reader;

pub use file::{FileFailure, FileIngestor, IngestError, IngestOutcome};
