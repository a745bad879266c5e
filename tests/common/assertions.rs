//! Domain-specific assertion macros for niobe harnesses.
//!
//! These wrap `pretty_assertions` and add context-rich failure messages that
//! make it clear which invariant was violated and on which record.

use niobe_core::LogRecord;
use niobe_snapshot::{Direction, SnapshotDiff};

// ---------------------------------------------------------------------------
// Detection assertions
// ---------------------------------------------------------------------------

/// Assert the format and level a line was detected as.
///
/// ```rust
/// assert_detected!(line, LogFormat::Clf, LogLevel::Error);
/// ```
#[macro_export]
macro_rules! assert_detected {
    ($line:expr, $format:expr, $level:expr) => {{
        let line: &str = $line;
        let detected = niobe_core::detector::detect(line);
        if detected.format != $format || detected.level != $level {
            panic!(
                "assert_detected! failed:\n  line:     {:?}\n  expected: {:?}/{:?}\n  actual:   {:?}/{:?}",
                line, $format, $level, detected.format, detected.level
            );
        }
    }};
}

/// Assert that every record in a result set satisfies a predicate.
///
/// ```rust
/// assert_records_all!(results, |r| r.level == LogLevel::Error);
/// ```
#[macro_export]
macro_rules! assert_records_all {
    ($records:expr, $pred:expr) => {{
        let records: &[niobe_core::LogRecord] = &$records;
        let pred = $pred;
        let failing: Vec<_> = records.iter().filter(|r| !pred(r)).collect();
        if !failing.is_empty() {
            panic!(
                "assert_records_all! failed: {} of {} records did not satisfy predicate.\n  first: {:?}",
                failing.len(),
                records.len(),
                failing[0].raw
            );
        }
    }};
}

// ---------------------------------------------------------------------------
// Ingestion invariants
// ---------------------------------------------------------------------------

/// Records from one file generation must have strictly increasing offsets.
pub fn assert_offsets_increasing(records: &[LogRecord]) {
    for pair in records.windows(2) {
        assert!(
            pair[0].byte_offset < pair[1].byte_offset,
            "offsets not strictly increasing: {} then {} ({:?} / {:?})",
            pair[0].byte_offset,
            pair[1].byte_offset,
            pair[0].raw,
            pair[1].raw
        );
    }
}

// ---------------------------------------------------------------------------
// Diff assertions
// ---------------------------------------------------------------------------

/// Assert the direction of one metric for one service.
pub fn assert_direction(diff: &SnapshotDiff, service: &str, metric: &str, expected: Direction) {
    let svc = diff
        .service(service)
        .unwrap_or_else(|| panic!("service {service:?} missing from diff"));
    let delta = svc
        .metric(metric)
        .unwrap_or_else(|| panic!("metric {metric:?} missing for {service:?}"));
    assert_eq!(
        delta.direction, expected,
        "{service}/{metric}: before={} after={} delta={}",
        delta.before, delta.after, delta.delta
    );
}

/// Assert that nothing moved between the two snapshots.
pub fn assert_all_unchanged(diff: &SnapshotDiff) {
    for svc in &diff.services {
        for m in &svc.metrics {
            assert_eq!(
                m.direction,
                Direction::Unchanged,
                "{}/{} changed: {} -> {}",
                svc.service,
                m.metric,
                m.before,
                m.after
            );
        }
        assert!(svc.signatures.new.is_empty(), "{}: new signatures", svc.service);
        assert!(svc.signatures.resolved.is_empty(), "{}: resolved signatures", svc.service);
        assert!(!svc.status_changed, "{}: status changed", svc.service);
    }
}
