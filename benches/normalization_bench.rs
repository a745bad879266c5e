//! Format detection and signature normalisation benchmarks.
//!
//! Detection runs once per ingested line and normalisation once per stored
//! record, so both sit on the ingestion hot path.
//!
//! # Groups
//!
//! | Group | What it measures |
//! |-------|-----------------|
//! | `detect` | Per-format detection cost, including the raw fallback |
//! | `detect/mixed_corpus` | Throughput over a realistic mix of all formats |
//! | `normalize` | Signature normalisation for short and placeholder-heavy messages |
//!
//! # Viewing results
//!
//! ```sh
//! cargo bench --bench normalization_bench
//! open target/criterion/report/index.html
//! ```

use std::hint::black_box;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use niobe_core::detector::detect;
use niobe_core::signature::normalize;

const SAMPLES: &[(&str, &str)] = &[
    (
        "json",
        r#"{"ts":"2024-01-15T10:00:01Z","severity":"ERROR","msg":"Connection refused","host":"db.internal","port":5432}"#,
    ),
    (
        "clf",
        r#"10.0.0.9 - - [15/Jan/2024:10:00:03 +0000] "GET /api/v1/users HTTP/1.1" 502 -"#,
    ),
    (
        "pythonic",
        "2024-01-15 10:30:45,123 - myapp - ERROR - connection refused to 10.0.0.3:5432",
    ),
    (
        "raw",
        "Jan 15 10:00:02 myhost sshd[12345]: Failed password for invalid user admin",
    ),
    // Looks like JSON until the last byte, so it pays for a failed parse.
    ("json_malformed", r#"{"level":"error","message":"unterminated""#),
];

fn mixed_corpus(n: usize) -> Vec<String> {
    (0..n)
        .map(|i| match i % 4 {
            0 => format!(r#"{{"ts":"2024-01-15T10:00:00Z","level":"INFO","message":"request {i} ok"}}"#),
            1 => format!(r#"10.0.0.{} - - [15/Jan/2024:10:00:01 +0000] "GET /item/{i} HTTP/1.1" 200 {i}"#, i % 255),
            2 => format!("2024-01-15 10:00:02,000 - worker - WARNING - queue depth {i}"),
            _ => format!("plain text line number {i}"),
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Detection
// ---------------------------------------------------------------------------

fn detect_bench(c: &mut Criterion) {
    let mut group = c.benchmark_group("detect");
    for (name, line) in SAMPLES {
        group.throughput(Throughput::Bytes(line.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(name), line, |b, line| {
            b.iter(|| black_box(detect(black_box(line))))
        });
    }
    group.finish();

    let corpus = mixed_corpus(10_000);
    let mut group = c.benchmark_group("detect/mixed_corpus");
    group.throughput(Throughput::Elements(corpus.len() as u64));
    group.bench_function("10k_lines", |b| {
        b.iter(|| {
            for line in &corpus {
                black_box(detect(line));
            }
        })
    });
    group.finish();
}

// ---------------------------------------------------------------------------
// Signatures
// ---------------------------------------------------------------------------

fn normalize_bench(c: &mut Criterion) {
    let mut group = c.benchmark_group("normalize");
    let cases = [
        ("plain", "worker pool exhausted"),
        ("ip_port", "connection refused to 10.0.0.3:5432"),
        (
            "placeholder_heavy",
            "request 8f14e45f-ceea-467f-a9e5-0b6c1a2f3d4e from 10.1.2.3:443 failed after 3 retries in 250ms at 0xdeadbeef",
        ),
    ];
    for (name, message) in cases {
        group.bench_with_input(BenchmarkId::from_parameter(name), message, |b, m| {
            b.iter(|| black_box(normalize(black_box(m))))
        });
    }
    group.finish();
}

criterion_group!(benches, detect_bench, normalize_bench);
criterion_main!(benches);
