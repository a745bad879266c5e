//! niobe: on-demand health snapshots and snapshot diffs for local services.
//!
//! This crate is the entry point external callers (the `niobe` CLI, an MCP
//! adapter) use. It wires the layers together behind [`Niobe`]:
//!
//! ```text
//! Niobe ──► SnapshotBuilder ──► FileIngestor ──► Store
//!   │              └──► Sampler                    ▲
//!   ├──► DiffEngine ───────────────────────────────┤
//!   └──► search / recent errors ───────────────────┘
//! ```
//!
//! Every operation runs to completion when called; nothing happens in the
//! background except an explicitly started follow loop.

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;

pub use niobe_core::{
    Config, LogLevel, LogRecord, SearchFilters, ServiceRegistration, ServiceRegistry, Snapshot,
    SnapshotScope, Store, StoreError, StoreResult,
};
pub use niobe_feeds::{FileIngestor, IngestError, IngestOutcome};
pub use niobe_snapshot::{DiffError, SnapshotDiff, SnapshotError};

use niobe_snapshot::{DiffEngine, SnapshotBuilder};

pub struct Niobe {
    store: Arc<Store>,
    registry: Arc<dyn ServiceRegistry>,
    config: Config,
}

impl Niobe {
    /// Open the store for the project rooted at `project`, loading its
    /// layered configuration.
    pub fn open(project: &Path) -> anyhow::Result<Self> {
        let config = Config::load(project)?;
        Self::with_config(project, config)
    }

    pub fn with_config(project: &Path, config: Config) -> anyhow::Result<Self> {
        let path = config.db_path(project);
        let store = Arc::new(Store::open(&path)?);
        tracing::debug!(db = %path.display(), "store opened");
        Ok(Self::from_store(store, config))
    }

    /// Wrap an already open store. Services are looked up in the store's own
    /// registry unless [`with_registry`](Self::with_registry) replaces it.
    pub fn from_store(store: Arc<Store>, config: Config) -> Self {
        let registry: Arc<dyn ServiceRegistry> = store.clone();
        Self {
            store,
            registry,
            config,
        }
    }

    pub fn with_registry(mut self, registry: Arc<dyn ServiceRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &Arc<dyn ServiceRegistry> {
        &self.registry
    }

    pub fn ingestor(&self) -> FileIngestor {
        FileIngestor::new(Arc::clone(&self.store), self.config.ingestion.clone())
    }

    pub async fn build_snapshot(&self, scope: SnapshotScope) -> Result<Snapshot, SnapshotError> {
        SnapshotBuilder::system(
            Arc::clone(&self.store),
            Arc::clone(&self.registry),
            self.config.ingestion.clone(),
            self.config.snapshot.clone(),
        )
        .build(scope)
        .await
    }

    pub fn diff_snapshots(&self, id_a: &str, id_b: &str) -> Result<SnapshotDiff, DiffError> {
        DiffEngine::new(Arc::clone(&self.store), self.config.diff.clone()).diff(id_a, id_b)
    }

    /// Full-text search. A zero `limit` in `filters` means the configured
    /// default.
    pub fn search_logs(&self, query: &str, mut filters: SearchFilters) -> StoreResult<Vec<LogRecord>> {
        if filters.limit == 0 {
            filters.limit = self.config.search.default_limit;
        }
        self.store.search(query, &filters)
    }

    /// Error and fatal records ingested within the last `since_minutes`
    /// (configured default when `None`), newest first.
    pub fn recent_errors(
        &self,
        service: Option<&str>,
        since_minutes: Option<u32>,
    ) -> StoreResult<Vec<LogRecord>> {
        let minutes = since_minutes.unwrap_or(self.config.search.default_error_since_minutes);
        let since = Utc::now() - chrono::Duration::minutes(i64::from(minutes));
        self.store
            .recent_errors(service, since, self.config.search.default_limit)
    }
}
