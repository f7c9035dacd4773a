use std::path::Path;
use std::time::Instant;

use serde::Serialize;
use tracing::info;

use crate::admin::util::open_store;
use crate::admin::{AdminError, Result};
use crate::storage::StoreOptions;

/// Outcome of an offline backup or flush.
#[derive(Debug, Clone, Serialize)]
pub struct MaintenanceReport {
    /// Database directory.
    pub path: String,
    /// Backup target, when one was written.
    pub target: Option<String>,
    /// Live vertices at the time of the operation.
    pub vertices: u64,
    /// Live edges at the time of the operation.
    pub edges: u64,
    /// Wall-clock duration in milliseconds.
    pub duration_ms: u128,
}

/// Opens the database in `dir`, copies it into `target` and closes it again.
pub fn backup(
    dir: impl AsRef<Path>,
    target: impl AsRef<Path>,
    opts: StoreOptions,
) -> Result<MaintenanceReport> {
    let started = Instant::now();
    if same_directory(dir.as_ref(), target.as_ref()) {
        return Err(AdminError::BackupIntoSource(target.as_ref().to_path_buf()));
    }
    let store = open_store(dir.as_ref(), opts)?;
    store.backup(target.as_ref())?;
    let stats = store.stats();
    store.shutdown()?;
    info!(
        dir = %dir.as_ref().display(),
        target = %target.as_ref().display(),
        "admin.backup"
    );
    Ok(MaintenanceReport {
        path: dir.as_ref().display().to_string(),
        target: Some(target.as_ref().display().to_string()),
        vertices: stats.vertices,
        edges: stats.edges,
        duration_ms: started.elapsed().as_millis(),
    })
}

/// Opens the database in `dir`, copies pending Tx logs into the V/E files
/// and closes it again.
pub fn flush(dir: impl AsRef<Path>, opts: StoreOptions) -> Result<MaintenanceReport> {
    let started = Instant::now();
    let store = open_store(dir.as_ref(), opts)?;
    store.flush_tx_log()?;
    let stats = store.stats();
    store.shutdown()?;
    Ok(MaintenanceReport {
        path: dir.as_ref().display().to_string(),
        target: None,
        vertices: stats.vertices,
        edges: stats.edges,
        duration_ms: started.elapsed().as_millis(),
    })
}

fn same_directory(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}
