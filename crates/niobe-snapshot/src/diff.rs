//! Structured comparison of two persisted snapshots.
//!
//! Every metric is treated as higher-is-worse: a rise beyond the metric's
//! noise threshold is [`Direction::Degraded`], a fall beyond it is
//! [`Direction::Improved`]. Output order is fully determined by the inputs.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use niobe_core::config::DiffThresholds;
use niobe_core::{ProcessStatus, ServiceSnapshot, SignatureCount, Snapshot, Store, TimeRange};
use serde::Serialize;

use crate::error::DiffError;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Improved,
    Degraded,
    Unchanged,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricDelta {
    pub metric: &'static str,
    pub before: f64,
    pub after: f64,
    pub delta: f64,
    /// `None` when `before` is zero.
    pub percent_change: Option<f64>,
    pub direction: Direction,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SignatureChange {
    pub signature: String,
    pub count_before: u64,
    pub count_after: u64,
    pub first_seen: DateTime<Utc>,
}

/// Error signatures split by which side of the diff they appear on.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SignatureDiff {
    /// Only in the later snapshot.
    pub new: Vec<SignatureChange>,
    /// Only in the earlier snapshot.
    pub resolved: Vec<SignatureChange>,
    pub persisting: Vec<SignatureChange>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceDiff {
    pub service: String,
    /// Sorted by metric name.
    pub metrics: Vec<MetricDelta>,
    pub error_delta: i64,
    /// Error lines ingested between the two snapshot times.
    pub intervening_errors: u64,
    pub status_before: Option<ProcessStatus>,
    pub status_after: Option<ProcessStatus>,
    pub status_changed: bool,
    pub signatures: SignatureDiff,
}

impl ServiceDiff {
    pub fn metric(&self, name: &str) -> Option<&MetricDelta> {
        self.metrics.iter().find(|m| m.metric == name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SnapshotRef {
    pub id: String,
    pub taken_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SnapshotDiff {
    pub before: SnapshotRef,
    pub after: SnapshotRef,
    /// Services present in both snapshots, by name.
    pub services: Vec<ServiceDiff>,
    pub only_before: Vec<String>,
    pub only_after: Vec<String>,
}

impl SnapshotDiff {
    pub fn service(&self, name: &str) -> Option<&ServiceDiff> {
        self.services.iter().find(|s| s.service == name)
    }
}

pub struct DiffEngine {
    store: Arc<Store>,
    thresholds: DiffThresholds,
}

impl DiffEngine {
    pub fn new(store: Arc<Store>, thresholds: DiffThresholds) -> Self {
        Self { store, thresholds }
    }

    /// Compare snapshot `id_a` (before) with `id_b` (after). Both ids are
    /// resolved before anything is computed.
    pub fn diff(&self, id_a: &str, id_b: &str) -> Result<SnapshotDiff, DiffError> {
        let a = self.load(id_a)?;
        let b = self.load(id_b)?;

        let names_a: BTreeSet<&str> = a.service_names().collect();
        let names_b: BTreeSet<&str> = b.service_names().collect();
        let common: Vec<&str> = names_a.intersection(&names_b).copied().collect();
        if common.is_empty() {
            return Err(DiffError::ScopeMismatch {
                a: a.id.clone(),
                b: b.id.clone(),
            });
        }

        let between = TimeRange::between(a.taken_at, b.taken_at);
        let mut services = Vec::with_capacity(common.len());
        for name in &common {
            let (Some(before), Some(after)) = (a.service(name), b.service(name)) else {
                continue;
            };
            let intervening_errors = self.store.count_errors_between(name, between)?;
            services.push(self.service_diff(before, after, intervening_errors));
        }

        let diff = SnapshotDiff {
            before: SnapshotRef {
                id: a.id.clone(),
                taken_at: a.taken_at,
            },
            after: SnapshotRef {
                id: b.id.clone(),
                taken_at: b.taken_at,
            },
            services,
            only_before: names_a.difference(&names_b).map(|s| s.to_string()).collect(),
            only_after: names_b.difference(&names_a).map(|s| s.to_string()).collect(),
        };
        tracing::debug!(before = %a.id, after = %b.id, services = diff.services.len(), "diff computed");
        Ok(diff)
    }

    fn load(&self, id: &str) -> Result<Snapshot, DiffError> {
        self.store
            .get_snapshot(id)?
            .ok_or_else(|| DiffError::SnapshotNotFound(id.to_string()))
    }

    fn service_diff(&self, a: &ServiceSnapshot, b: &ServiceSnapshot, intervening_errors: u64) -> ServiceDiff {
        let t = &self.thresholds;
        let mut metrics = Vec::new();

        if let (Some(ma), Some(mb)) = (&a.metrics, &b.metrics) {
            metrics.push(delta("cpu_percent", ma.cpu_percent, mb.cpu_percent, t.cpu_percent));
            metrics.push(delta(
                "memory_bytes",
                ma.memory_bytes as f64,
                mb.memory_bytes as f64,
                t.memory_mb * BYTES_PER_MB,
            ));
            // Counts missing on either side are left out rather than zeroed.
            if let (Some(x), Some(y)) = (ma.thread_count, mb.thread_count) {
                metrics.push(delta("threads", f64::from(x), f64::from(y), t.threads));
            }
            if let (Some(x), Some(y)) = (ma.connection_count, mb.connection_count) {
                metrics.push(delta("connections", f64::from(x), f64::from(y), t.connections));
            }
        }
        let (sa, sb) = (&a.log_summary, &b.log_summary);
        metrics.push(delta(
            "error_count",
            sa.error_count as f64,
            sb.error_count as f64,
            t.error_count,
        ));
        metrics.push(delta("log_rate", sa.log_rate, sb.log_rate, t.log_rate));
        metrics.sort_by(|x, y| x.metric.cmp(y.metric));

        let status_before = a.metrics.as_ref().map(|m| m.status);
        let status_after = b.metrics.as_ref().map(|m| m.status);

        ServiceDiff {
            service: a.registration.name.clone(),
            metrics,
            error_delta: sb.error_count as i64 - sa.error_count as i64,
            intervening_errors,
            status_before,
            status_after,
            status_changed: status_before != status_after,
            signatures: signature_diff(&sa.top_errors, &sb.top_errors),
        }
    }
}

fn delta(metric: &'static str, before: f64, after: f64, threshold: f64) -> MetricDelta {
    let delta = after - before;
    let direction = if delta.abs() <= threshold {
        Direction::Unchanged
    } else if delta > 0.0 {
        Direction::Degraded
    } else {
        Direction::Improved
    };
    MetricDelta {
        metric,
        before,
        after,
        delta,
        percent_change: (before != 0.0).then(|| delta / before * 100.0),
        direction,
    }
}

fn signature_diff(before: &[SignatureCount], after: &[SignatureCount]) -> SignatureDiff {
    let a: BTreeMap<&str, &SignatureCount> = before.iter().map(|s| (s.signature.as_str(), s)).collect();
    let b: BTreeMap<&str, &SignatureCount> = after.iter().map(|s| (s.signature.as_str(), s)).collect();
    let mut out = SignatureDiff::default();

    for (sig, sa) in &a {
        match b.get(sig) {
            Some(sb) => out.persisting.push(SignatureChange {
                signature: sig.to_string(),
                count_before: sa.count,
                count_after: sb.count,
                first_seen: sa.first_seen.min(sb.first_seen),
            }),
            None => out.resolved.push(SignatureChange {
                signature: sig.to_string(),
                count_before: sa.count,
                count_after: 0,
                first_seen: sa.first_seen,
            }),
        }
    }
    for (sig, sb) in &b {
        if !a.contains_key(sig) {
            out.new.push(SignatureChange {
                signature: sig.to_string(),
                count_before: 0,
                count_after: sb.count,
                first_seen: sb.first_seen,
            });
        }
    }

    for group in [&mut out.new, &mut out.resolved, &mut out.persisting] {
        group.sort_by(|x, y| x.first_seen.cmp(&y.first_seen).then_with(|| x.signature.cmp(&y.signature)));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sig(text: &str, count: u64, minute: u32) -> SignatureCount {
        SignatureCount {
            signature: text.to_string(),
            count,
            first_seen: DateTime::parse_from_rfc3339(&format!("2024-01-15T10:{minute:02}:00Z"))
                .unwrap()
                .with_timezone(&Utc),
        }
    }

    #[test]
    fn jitter_within_threshold_is_unchanged() {
        assert_eq!(delta("cpu_percent", 10.0, 11.5, 2.0).direction, Direction::Unchanged);
        assert_eq!(delta("cpu_percent", 10.0, 45.0, 2.0).direction, Direction::Degraded);
        assert_eq!(delta("cpu_percent", 45.0, 10.0, 2.0).direction, Direction::Improved);
    }

    #[test]
    fn percent_change_needs_a_nonzero_baseline() {
        assert_eq!(delta("threads", 0.0, 4.0, 0.0).percent_change, None);
        assert_eq!(delta("threads", 4.0, 6.0, 0.0).percent_change, Some(50.0));
    }

    #[test]
    fn signatures_split_three_ways_in_first_seen_order() {
        let before = vec![sig("timeout <num>", 3, 5), sig("disk full", 1, 1)];
        let after = vec![sig("timeout <num>", 7, 2), sig("oom", 2, 9), sig("auth failed", 1, 9)];
        let diff = signature_diff(&before, &after);

        let names = |v: &[SignatureChange]| v.iter().map(|s| s.signature.clone()).collect::<Vec<_>>();
        assert_eq!(names(&diff.new), vec!["auth failed", "oom"]);
        assert_eq!(names(&diff.resolved), vec!["disk full"]);
        assert_eq!(names(&diff.persisting), vec!["timeout <num>"]);
        assert_eq!(diff.persisting[0].count_after, 7);
        assert_eq!(diff.persisting[0].first_seen, sig("", 0, 2).first_seen);
    }
}
