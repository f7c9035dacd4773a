use std::fs;
use std::path::Path;

use serde::Serialize;

use crate::admin::util::open_store;
use crate::admin::Result;
use crate::primitives::buffer::Slot;
use crate::storage::durable::files::{file_name, FileKind};
use crate::storage::{ElementKind, RecoveryReport, StoreOptions, StoreStats};

/// Size of one database file.
#[derive(Debug, Clone, Serialize)]
pub struct FileSize {
    /// File name inside the database directory.
    pub name: String,
    /// Size in bytes, zero when missing.
    pub size_bytes: u64,
}

/// Summary of an opened database.
#[derive(Debug, Clone, Serialize)]
pub struct StatsReport {
    /// Database directory.
    pub path: String,
    /// Element counts and sequences after recovery.
    pub store: StoreStats,
    /// What recovery did while opening.
    pub recovery: RecoveryReport,
    /// Indexed vertex keys.
    pub vertex_indexes: Vec<String>,
    /// Indexed edge keys.
    pub edge_indexes: Vec<String>,
    /// Per-file sizes.
    pub files: Vec<FileSize>,
}

/// Opens the database in `dir` (running recovery) and reports its contents.
pub fn stats(dir: impl AsRef<Path>, opts: StoreOptions) -> Result<StatsReport> {
    let dir = dir.as_ref();
    let store = open_store(dir, opts)?;
    let files = FileKind::ALL
        .into_iter()
        .flat_map(|kind| [Slot::A, Slot::B].map(|slot| file_name(kind, slot)))
        .map(|name| {
            let size_bytes = fs::metadata(dir.join(&name)).map(|m| m.len()).unwrap_or(0);
            FileSize { name, size_bytes }
        })
        .collect();
    let report = StatsReport {
        path: dir.display().to_string(),
        store: store.stats(),
        recovery: store.recovery_report().clone(),
        vertex_indexes: store.indexed_keys(ElementKind::Vertex),
        edge_indexes: store.indexed_keys(ElementKind::Edge),
        files,
    };
    store.shutdown()?;
    Ok(report)
}
