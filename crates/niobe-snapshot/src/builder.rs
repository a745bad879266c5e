//! Snapshot assembly.
//!
//! For every target service the builder ingests its log files, samples its
//! process (resolving it from its port when no pid is registered), then
//! summarises the error window ending at the snapshot time. Per-file and
//! per-process failures become warnings on the service's sub-record; only
//! store failures and unknown scopes abort the build.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use niobe_core::config::{IngestionConfig, SnapshotConfig};
use niobe_core::{
    LogLevel, LogSummary, MetricSample, ServiceRegistration, ServiceRegistry, ServiceSnapshot,
    Snapshot, SnapshotScope, Store, TimeRange,
};
use niobe_feeds::{FileIngestor, IngestError, IngestOutcome};
use uuid::Uuid;

use crate::error::SnapshotError;
use crate::sampler::{SampleError, Sampler, SystemSampler};

/// What was seen of one service before the snapshot time is fixed.
struct Observation {
    registration: ServiceRegistration,
    metrics: Option<MetricSample>,
    ingested: u64,
    logs_readable: bool,
    warnings: Vec<String>,
}

pub struct SnapshotBuilder<S = SystemSampler> {
    store: Arc<Store>,
    registry: Arc<dyn ServiceRegistry>,
    sampler: S,
    ingestor: FileIngestor,
    config: SnapshotConfig,
}

impl SnapshotBuilder<SystemSampler> {
    /// Builder sampling live processes.
    pub fn system(
        store: Arc<Store>,
        registry: Arc<dyn ServiceRegistry>,
        ingestion: IngestionConfig,
        config: SnapshotConfig,
    ) -> Self {
        let sampler = SystemSampler::new(config.cpu_sample_interval());
        Self::new(store, registry, sampler, ingestion, config)
    }
}

impl<S: Sampler> SnapshotBuilder<S> {
    pub fn new(
        store: Arc<Store>,
        registry: Arc<dyn ServiceRegistry>,
        sampler: S,
        ingestion: IngestionConfig,
        config: SnapshotConfig,
    ) -> Self {
        let ingestor = FileIngestor::new(Arc::clone(&store), ingestion);
        Self {
            store,
            registry,
            sampler,
            ingestor,
            config,
        }
    }

    /// Observe every service in `scope` and persist the result.
    pub async fn build(&self, scope: SnapshotScope) -> Result<Snapshot, SnapshotError> {
        let targets = match &scope {
            SnapshotScope::Service(name) => vec![self
                .registry
                .lookup(name)?
                .ok_or_else(|| SnapshotError::ServiceNotFound(name.clone()))?],
            SnapshotScope::All => {
                let all = self.registry.all()?;
                if all.is_empty() {
                    return Err(SnapshotError::NoServices);
                }
                all
            }
        };

        let observed = join_all(targets.into_iter().map(|reg| self.observe(reg))).await;
        let observed = observed.into_iter().collect::<Result<Vec<_>, _>>()?;

        // Every window ends at the snapshot's own timestamp.
        let taken_at = Utc::now();
        let mut services = observed
            .into_iter()
            .map(|o| self.finish(o, taken_at))
            .collect::<Result<Vec<_>, _>>()?;
        services.sort_by(|a, b| a.registration.name.cmp(&b.registration.name));

        let snapshot = Snapshot {
            id: Uuid::new_v4().simple().to_string(),
            taken_at,
            scope,
            services,
        };
        self.store.save_snapshot(&snapshot)?;

        tracing::info!(
            id = %snapshot.id,
            scope = %snapshot.scope,
            services = snapshot.services.len(),
            degraded = snapshot.services.iter().filter(|s| s.degraded).count(),
            "snapshot taken"
        );
        Ok(snapshot)
    }

    async fn observe(&self, registration: ServiceRegistration) -> Result<Observation, SnapshotError> {
        let mut warnings = Vec::new();

        let ingest = {
            let ingestor = self.ingestor.clone();
            let service = registration.name.clone();
            let paths = registration.log_paths.clone();
            tokio::task::spawn_blocking(move || ingestor.ingest_all(&service, &paths))
        };
        let sample = self.sample(&registration);
        let (ingested, metrics) = tokio::join!(ingest, sample);

        let (outcome, ingest_ran) = match ingested {
            Ok(outcome) => (outcome, true),
            Err(e) => {
                warnings.push(format!("log ingestion aborted: {e}"));
                (IngestOutcome::default(), false)
            }
        };
        let new_records = outcome.new_records;
        let logs_readable = ingest_ran && !outcome.all_failed(registration.log_paths.len());
        for failure in outcome.failures {
            match failure.error {
                IngestError::Store(e) => return Err(e.into()),
                error @ IngestError::FileUnreadable { .. } => warnings.push(error.to_string()),
            }
        }

        let metrics = match metrics {
            Ok(sample) => Some(sample),
            Err(note) => {
                warnings.push(note);
                None
            }
        };
        if let Some(m) = &metrics {
            if m.thread_count.is_none() {
                warnings.push(format!("thread count unavailable for pid {}", m.pid));
            }
            if m.connection_count.is_none() {
                warnings.push(format!("connection count unavailable for pid {}", m.pid));
            }
        }

        Ok(Observation {
            registration,
            metrics,
            ingested: new_records,
            logs_readable,
            warnings,
        })
    }

    fn finish(&self, o: Observation, taken_at: DateTime<Utc>) -> Result<ServiceSnapshot, SnapshotError> {
        let log_summary = self.summarise(&o.registration.name, taken_at)?;
        let degraded = o.metrics.is_none() && !o.logs_readable;
        if degraded {
            tracing::warn!(service = %o.registration.name, warnings = ?o.warnings, "service degraded");
        }
        Ok(ServiceSnapshot {
            registration: o.registration,
            metrics: o.metrics,
            log_summary,
            ingested: o.ingested,
            warnings: o.warnings,
            degraded,
        })
    }

    /// A registered pid wins over the port. `Err` carries the warning text.
    async fn sample(&self, registration: &ServiceRegistration) -> Result<MetricSample, String> {
        let pid = match (registration.pid, registration.port) {
            (Some(pid), _) => pid,
            (None, Some(port)) => match self.sampler.resolve_port(port).await {
                Some(pid) => pid,
                None => {
                    tracing::warn!(service = %registration.name, port, "no process on port");
                    return Err(format!("no process listening on port {port}; metrics omitted"));
                }
            },
            (None, None) => return Err("no pid registered; metrics omitted".to_string()),
        };
        self.sampler.sample(pid).await.map_err(|e| match e {
            SampleError::ProcessNotFound(_) => {
                tracing::warn!(service = %registration.name, pid, "process not found");
                format!("{e}; metrics omitted")
            }
        })
    }

    fn summarise(&self, service: &str, end: DateTime<Utc>) -> Result<LogSummary, SnapshotError> {
        let window = self.config.error_window();
        let range = TimeRange::trailing(end, window);
        let counts = self.store.count_by_level(service, range)?;
        let top_errors =
            self.store
                .top_error_signatures(service, range, self.config.top_signatures)?;

        let total: u64 = counts.values().sum();
        let error_count = LogLevel::ERRORS
            .iter()
            .map(|level| counts.get(level).copied().unwrap_or(0))
            .sum();
        let seconds = window.num_milliseconds() as f64 / 1000.0;
        let log_rate = if seconds > 0.0 { total as f64 / seconds } else { 0.0 };

        Ok(LogSummary {
            window_start: range.start,
            window_end: range.end,
            counts,
            total,
            error_count,
            log_rate,
            top_errors,
        })
    }
}
