//! Static log corpora and on-disk log file helpers used across harnesses.
//!
//! Each corpus is a `&'static [&'static str]` of representative log lines, one
//! per recognised format.

use std::io::Write;
use std::path::{Path, PathBuf};

/// JSON lines with the key spellings the detector recognises.
pub const CORPUS_JSON: &[&str] = &[
    r#"{"ts":"2024-01-15T10:00:00Z","level":"INFO","message":"Server started","port":8080}"#,
    r#"{"timestamp":"2024-01-15T10:00:01Z","severity":"ERROR","msg":"Connection refused","host":"db.internal","port":5432}"#,
    r#"{"time":"2024-01-15T10:00:02.123Z","level":"WARN","message":"Slow query","duration_ms":4200}"#,
    r#"{"@timestamp":"2024-01-15T10:00:03Z","log.level":"debug","message":"Cache miss","key":"user:42"}"#,
    r#"{"ts":"2024-01-15T10:00:04Z","lvl":"fatal","msg":"Out of memory","rss_mb":16384}"#,
    r#"{"time":1705312805000,"level":50,"msg":"pino style error"}"#,
];

/// Common Log Format access-log lines.
pub const CORPUS_CLF: &[&str] = &[
    r#"127.0.0.1 - frank [10/Oct/2000:13:55:36 -0700] "GET /apache_pb.gif HTTP/1.0" 200 2326"#,
    r#"10.0.0.7 - - [15/Jan/2024:10:00:01 +0000] "POST /api/v1/payments HTTP/1.1" 201 512"#,
    r#"10.0.0.8 - - [15/Jan/2024:10:00:02 +0000] "GET /missing HTTP/1.1" 404 0"#,
    r#"10.0.0.9 - - [15/Jan/2024:10:00:03 +0000] "GET /api/v1/users HTTP/1.1" 502 -"#,
];

/// `TIMESTAMP - LOGGER - LEVEL - MESSAGE` lines.
pub const CORPUS_PYTHONIC: &[&str] = &[
    "2024-01-15 10:30:45,123 - myapp - ERROR - connection refused to 10.0.0.3:5432",
    "2024-01-15 10:30:46,001 - myapp.db - WARNING - pool exhausted, waiting",
    "2024-01-15 10:30:47,500 - myapp - INFO - request handled in 12ms",
    "2024-01-15 10:30:48,999 - worker - CRITICAL - out of disk space",
];

/// Lines that match none of the structured shapes.
pub const CORPUS_RAW: &[&str] = &[
    "Jan 15 10:00:02 myhost sshd[12345]: Failed password for invalid user admin",
    "ERROR: NullPointerException at com.example.App.handle(App.java:42)",
    r#"{"level":"error","message":"unterminated""#,
    "GET /api/v1/users 200 47ms",
    "   at java.base/java.lang.Thread.run(Thread.java:833)",
];

/// One line of each format, in file order.
pub const CORPUS_MIXED: &[&str] = &[
    r#"{"ts":"2024-01-15T10:00:00Z","level":"INFO","message":"api-gateway started"}"#,
    r#"10.0.0.1 - - [15/Jan/2024:10:00:01 +0000] "GET /healthz HTTP/1.1" 200 2"#,
    "2024-01-15 10:00:02,000 - worker - ERROR - task queue overflow",
    "plain text with no structure",
];

/// `n` synthetic JSON lines cycling INFO/WARN/ERROR.
pub fn corpus_high_volume(n: usize) -> Vec<String> {
    (0..n)
        .map(|i| {
            let level = match i % 10 {
                0 => "ERROR",
                1 | 2 => "WARN",
                _ => "INFO",
            };
            format!(
                r#"{{"ts":"2024-01-15T{:02}:{:02}:{:02}Z","level":"{}","message":"log line {} from 10.0.0.{}","seq":{}}}"#,
                i / 3600 % 24,
                i / 60 % 60,
                i % 60,
                level,
                i,
                i % 255,
                i,
            )
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Log files on disk
// ---------------------------------------------------------------------------

/// A log file inside its own temporary directory.
pub struct LogFile {
    pub dir: tempfile::TempDir,
    pub path: PathBuf,
}

impl LogFile {
    pub fn new(name: &str) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(name);
        std::fs::File::create(&path).expect("create log file");
        Self { dir, path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append each line followed by `\n`.
    pub fn append_lines<S: AsRef<str>>(&self, lines: &[S]) {
        let mut f = std::fs::OpenOptions::new()
            .append(true)
            .open(&self.path)
            .expect("open for append");
        for line in lines {
            writeln!(f, "{}", line.as_ref()).expect("append line");
        }
    }

    /// Append raw bytes with no terminator handling.
    pub fn append_raw(&self, bytes: &[u8]) {
        let mut f = std::fs::OpenOptions::new()
            .append(true)
            .open(&self.path)
            .expect("open for append");
        f.write_all(bytes).expect("append bytes");
    }

    /// Truncate in place, keeping the inode.
    pub fn truncate(&self) {
        std::fs::OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(&self.path)
            .expect("truncate");
    }

    /// Move the current file aside and create an empty one at the same path.
    pub fn rotate(&self) -> PathBuf {
        let rotated = self.path.with_extension("log.1");
        std::fs::rename(&self.path, &rotated).expect("rename for rotation");
        std::fs::File::create(&self.path).expect("recreate log file");
        rotated
    }

    pub fn len(&self) -> u64 {
        std::fs::metadata(&self.path).expect("metadata").len()
    }
}
