//! File tail ingestor.
//!
//! Each `(service, path)` pair has an [`IngestionCursor`] in the store. A run
//! reads every complete line past the cursor, classifies it with the
//! detector, and commits batches of records together with the advanced
//! cursor. Rotation (the file shrank, was replaced, or its head changed) bumps
//! the cursor's generation and re-reads a bounded tail of the new file.

use std::fs::{File, Metadata};
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use niobe_core::config::IngestionConfig;
use niobe_core::detector;
use niobe_core::{FileFingerprint, IngestionCursor, LogRecord, Store, StoreError};
use tokio_util::sync::CancellationToken;
use xxhash_rust::xxh3::xxh3_64;

use crate::reader::{read_line_bounded, ReadLine};

/// Bytes from the start of a file hashed into its fingerprint.
pub const HEAD_BYTES: u64 = 1024;

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("cannot read {}: {source}", path.display())]
    FileUnreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// A file that could not be ingested during a multi-file run.
#[derive(Debug)]
pub struct FileFailure {
    pub path: PathBuf,
    pub error: IngestError,
}

/// Result of ingesting a set of files. Failures on one file never stop the
/// others.
#[derive(Debug, Default)]
pub struct IngestOutcome {
    pub new_records: u64,
    pub failures: Vec<FileFailure>,
}

impl IngestOutcome {
    /// True when every file failed, or there were no files at all.
    pub fn all_failed(&self, attempted: usize) -> bool {
        attempted == 0 || self.failures.len() == attempted
    }
}

#[derive(Clone)]
pub struct FileIngestor {
    store: Arc<Store>,
    config: IngestionConfig,
}

impl FileIngestor {
    pub fn new(store: Arc<Store>, config: IngestionConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// Ingest every new complete line of `path` for `service`.
    ///
    /// Returns the number of records that were newly stored. Running it twice
    /// over an unchanged file stores nothing the second time.
    pub fn ingest(&self, service: &str, path: &Path) -> Result<usize, IngestError> {
        let unreadable = |source| IngestError::FileUnreadable {
            path: path.to_path_buf(),
            source,
        };

        let mut file = File::open(path).map_err(unreadable)?;
        let meta = file.metadata().map_err(unreadable)?;
        if !meta.is_file() {
            return Err(unreadable(io::Error::new(
                io::ErrorKind::InvalidInput,
                "not a regular file",
            )));
        }
        let size = meta.len();
        let prior = self.store.get_cursor(service, path)?;

        let (start, generation) = match &prior {
            None => {
                let start = tail_start(&mut file, size, self.config.tail_chunk_bytes)
                    .map_err(unreadable)?;
                tracing::debug!(service, path = %path.display(), start, size, "first contact");
                (start, 0)
            }
            Some(cursor) if rotated(cursor, &mut file, &meta).map_err(unreadable)? => {
                let start = tail_start(&mut file, size, self.config.max_reingest_bytes)
                    .map_err(unreadable)?;
                tracing::info!(
                    service,
                    path = %path.display(),
                    previous_offset = cursor.offset,
                    size,
                    generation = cursor.generation + 1,
                    "rotation detected"
                );
                (start, cursor.generation + 1)
            }
            Some(cursor) => (cursor.offset, cursor.generation),
        };

        let fingerprint = fingerprint(&mut file, &meta, HEAD_BYTES.min(size)).map_err(unreadable)?;
        let now = Utc::now();
        let mut expected = prior.clone();
        let mut next = IngestionCursor {
            service: service.to_string(),
            source_file: path.to_path_buf(),
            offset: start,
            file_size: size,
            fingerprint,
            generation,
            updated_at: now,
        };

        file.seek(SeekFrom::Start(start)).map_err(unreadable)?;
        let mut reader = BufReader::with_capacity(self.config.read_buffer_bytes(), file);
        let mut line = Vec::with_capacity(256);
        let mut batch = Vec::with_capacity(self.config.batch_lines.min(4096));
        let mut inserted = 0usize;

        loop {
            let read = read_line_bounded(&mut reader, self.config.max_line_length, &mut line)
                .map_err(unreadable)?;
            let ReadLine::Complete { consumed, truncated } = read else {
                break;
            };
            let offset = next.offset;
            next.offset += consumed;

            let text = String::from_utf8_lossy(&line);
            if text.trim().is_empty() {
                continue;
            }
            batch.push(build_record(service, path, generation, offset, &text, truncated, now));

            if batch.len() >= self.config.batch_lines {
                next.file_size = next.file_size.max(next.offset);
                match self.commit(&batch, expected.as_ref(), &next)? {
                    Some(n) => inserted += n,
                    None => return Ok(inserted),
                }
                expected = Some(next.clone());
                batch.clear();
            }
        }

        next.file_size = next.file_size.max(next.offset);
        let moved = expected.as_ref().map_or(true, |prev| !same_position(prev, &next));
        if !batch.is_empty() || moved {
            if let Some(n) = self.commit(&batch, expected.as_ref(), &next)? {
                inserted += n;
            }
        }

        if inserted > 0 {
            tracing::debug!(service, path = %path.display(), inserted, offset = next.offset, "ingested");
        }
        Ok(inserted)
    }

    /// Commit one batch. `None` means another ingestor moved the cursor first
    /// and this run should stop without writing.
    fn commit(
        &self,
        batch: &[LogRecord],
        expected: Option<&IngestionCursor>,
        next: &IngestionCursor,
    ) -> Result<Option<usize>, IngestError> {
        match self.store.commit_ingest(batch, expected, next) {
            Ok(n) => Ok(Some(n)),
            Err(StoreError::CursorConflict { path }) => {
                tracing::debug!(path = %path.display(), "cursor moved concurrently; yielding");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Ingest each of `paths`, collecting per-file failures.
    pub fn ingest_all(&self, service: &str, paths: &[PathBuf]) -> IngestOutcome {
        let mut outcome = IngestOutcome::default();
        for path in paths {
            match self.ingest(service, path) {
                Ok(n) => outcome.new_records += n as u64,
                Err(error) => {
                    tracing::warn!(service, path = %path.display(), %error, "ingestion failed");
                    outcome.failures.push(FileFailure {
                        path: path.clone(),
                        error,
                    });
                }
            }
        }
        outcome
    }

    /// Re-run [`ingest_all`](Self::ingest_all) every `interval` until `cancel`
    /// fires. A cycle in progress always completes, so cancellation never
    /// splits a batch from its cursor update. `on_cycle` sees each cycle's
    /// outcome. Returns the total number of new records.
    pub async fn follow<F>(
        &self,
        service: &str,
        paths: &[PathBuf],
        interval: Duration,
        cancel: CancellationToken,
        mut on_cycle: F,
    ) -> u64
    where
        F: FnMut(&IngestOutcome),
    {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut total = 0u64;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let ingestor = self.clone();
            let service_owned = service.to_string();
            let paths_owned = paths.to_vec();
            let cycle = tokio::task::spawn_blocking(move || {
                ingestor.ingest_all(&service_owned, &paths_owned)
            })
            .await;

            match cycle {
                Ok(outcome) => {
                    total += outcome.new_records;
                    on_cycle(&outcome);
                }
                Err(e) => tracing::error!(service, error = %e, "follow cycle panicked"),
            }
        }

        tracing::info!(service, total, "follow stopped");
        total
    }
}

fn same_position(a: &IngestionCursor, b: &IngestionCursor) -> bool {
    a.offset == b.offset
        && a.generation == b.generation
        && a.file_size == b.file_size
        && a.fingerprint == b.fingerprint
}

fn build_record(
    service: &str,
    path: &Path,
    generation: u32,
    byte_offset: u64,
    text: &str,
    truncated: bool,
    now: DateTime<Utc>,
) -> LogRecord {
    let detected = detector::detect(text);
    LogRecord {
        service: service.to_string(),
        source_file: path.to_path_buf(),
        generation,
        byte_offset,
        timestamp: detected.timestamp.unwrap_or(now),
        ingested_at: now,
        level: detected.level,
        message: detected.message,
        raw: text.to_string(),
        format: detected.format,
        truncated,
    }
}

// ---------------------------------------------------------------------------
// Fingerprints and rotation
// ---------------------------------------------------------------------------

/// Fingerprint `file` using its first `head_len` bytes.
pub fn fingerprint(file: &mut File, meta: &Metadata, head_len: u64) -> io::Result<FileFingerprint> {
    let (inode, device) = file_identity(meta);
    file.seek(SeekFrom::Start(0))?;
    let mut head = Vec::with_capacity(head_len as usize);
    file.by_ref().take(head_len).read_to_end(&mut head)?;
    Ok(FileFingerprint {
        inode,
        device,
        head_hash: xxh3_64(&head),
        head_len: head.len() as u32,
    })
}

#[cfg(unix)]
fn file_identity(meta: &Metadata) -> (Option<u64>, Option<u64>) {
    use std::os::unix::fs::MetadataExt;
    (Some(meta.ino()), Some(meta.dev()))
}

#[cfg(not(unix))]
fn file_identity(_meta: &Metadata) -> (Option<u64>, Option<u64>) {
    (None, None)
}

/// Whether the file behind `cursor` has been rotated, truncated, or
/// rewritten since the cursor was committed.
fn rotated(cursor: &IngestionCursor, file: &mut File, meta: &Metadata) -> io::Result<bool> {
    let size = meta.len();
    if size < cursor.offset {
        return Ok(true);
    }

    let recorded = cursor.fingerprint;
    let (inode, device) = file_identity(meta);
    if let (Some(old), Some(new)) = (recorded.inode, inode) {
        if old != new || recorded.device != device {
            return Ok(true);
        }
    }

    let head_len = u64::from(recorded.head_len);
    if size < head_len {
        return Ok(true);
    }
    let current = fingerprint(file, meta, head_len)?;
    Ok(current.head_hash != recorded.head_hash)
}

/// Offset at which to start reading so that at most `budget` bytes are read,
/// aligned to the start of a line.
fn tail_start(file: &mut File, size: u64, budget: u64) -> io::Result<u64> {
    if size <= budget {
        return Ok(0);
    }
    let scan_from = size - budget - 1;
    file.seek(SeekFrom::Start(scan_from))?;
    let mut reader = BufReader::new(file.by_ref());
    let mut skipped = Vec::new();
    // Only the byte count matters here; keep a tiny buffer.
    match read_line_bounded(&mut reader, 1, &mut skipped)? {
        ReadLine::Complete { consumed, .. } => Ok(scan_from + consumed),
        ReadLine::Partial { .. } | ReadLine::Eof => Ok(size),
    }
}
