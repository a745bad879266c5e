use niobe_core::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("service not registered: {0}")]
    ServiceNotFound(String),

    #[error("no services registered")]
    NoServices,

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, thiserror::Error)]
pub enum DiffError {
    #[error("snapshot not found: {0}")]
    SnapshotNotFound(String),

    #[error("snapshots {a} and {b} share no service")]
    ScopeMismatch { a: String, b: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}
