//! Persisted service registry, used by the CLI shell.

use std::path::PathBuf;

use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};

use super::Store;
use crate::error::StoreResult;
use crate::registry::ServiceRegistry;
use crate::types::ServiceRegistration;

impl Store {
    /// Insert or replace a registration.
    pub fn register_service(&self, service: &ServiceRegistration) -> StoreResult<()> {
        let log_paths = serde_json::to_string(&service.log_paths)?;
        self.write(|tx| {
            tx.execute(
                "INSERT OR REPLACE INTO services(name, pid, port, log_paths, registered_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    service.name,
                    service.pid,
                    service.port,
                    log_paths,
                    Utc::now().to_rfc3339()
                ],
            )?;
            Ok(())
        })?;
        tracing::info!(service = %service.name, pid = ?service.pid, "service registered");
        Ok(())
    }

    /// Remove a registration. Returns whether it existed. Ingested records and
    /// snapshots are kept.
    pub fn unregister_service(&self, name: &str) -> StoreResult<bool> {
        self.write(|tx| Ok(tx.execute("DELETE FROM services WHERE name = ?1", params![name])? > 0))
    }

    pub fn get_service(&self, name: &str) -> StoreResult<Option<ServiceRegistration>> {
        self.read(|conn| {
            let row = conn
                .query_row(
                    "SELECT name, pid, port, log_paths FROM services WHERE name = ?1",
                    params![name],
                    service_columns,
                )
                .optional()?;
            row.map(into_registration).transpose()
        })
    }

    pub fn list_services(&self) -> StoreResult<Vec<ServiceRegistration>> {
        self.read(|conn| {
            let mut stmt =
                conn.prepare("SELECT name, pid, port, log_paths FROM services ORDER BY name")?;
            let rows = stmt.query_map([], service_columns)?;
            let mut services = Vec::new();
            for row in rows {
                services.push(into_registration(row?)?);
            }
            Ok(services)
        })
    }
}

type ServiceColumns = (String, Option<u32>, Option<u16>, String);

fn service_columns(row: &Row<'_>) -> rusqlite::Result<ServiceColumns> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
}

fn into_registration((name, pid, port, log_paths): ServiceColumns) -> StoreResult<ServiceRegistration> {
    let log_paths: Vec<PathBuf> = serde_json::from_str(&log_paths)?;
    Ok(ServiceRegistration {
        name,
        pid,
        port,
        log_paths,
    })
}

impl ServiceRegistry for Store {
    fn lookup(&self, name: &str) -> StoreResult<Option<ServiceRegistration>> {
        self.get_service(name)
    }

    fn all(&self) -> StoreResult<Vec<ServiceRegistration>> {
        self.list_services()
    }
}
