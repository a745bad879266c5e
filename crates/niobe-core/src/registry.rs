//! Service lookup seam.
//!
//! Registration bookkeeping belongs to the caller (CLI, MCP adapter). The core
//! only needs to resolve a service name to its pid, port, and log paths, and
//! to enumerate every service for an `all` snapshot.

use crate::error::StoreResult;
use crate::types::ServiceRegistration;

pub trait ServiceRegistry: Send + Sync {
    fn lookup(&self, name: &str) -> StoreResult<Option<ServiceRegistration>>;

    /// Every registered service, sorted by name.
    fn all(&self) -> StoreResult<Vec<ServiceRegistration>>;
}

/// A fixed in-memory registry.
#[derive(Debug, Clone, Default)]
pub struct StaticRegistry {
    services: Vec<ServiceRegistration>,
}

impl StaticRegistry {
    pub fn new(mut services: Vec<ServiceRegistration>) -> Self {
        services.sort_by(|a, b| a.name.cmp(&b.name));
        services.dedup_by(|a, b| a.name == b.name);
        Self { services }
    }
}

impl ServiceRegistry for StaticRegistry {
    fn lookup(&self, name: &str) -> StoreResult<Option<ServiceRegistration>> {
        Ok(self.services.iter().find(|s| s.name == name).cloned())
    }

    fn all(&self) -> StoreResult<Vec<ServiceRegistration>> {
        Ok(self.services.clone())
    }
}
