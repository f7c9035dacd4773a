use std::path::Path;

use crate::admin::{AdminError, Result};
use crate::storage::durable::files::DirLayout;
use crate::storage::{GraphStore, StoreOptions};

/// Fails unless `dir` holds at least one database file.
pub(crate) fn require_database(dir: &Path) -> Result<DirLayout> {
    let layout = DirLayout::new(dir);
    if layout.is_uninitialized() {
        return Err(AdminError::missing_database(dir));
    }
    Ok(layout)
}

/// Opens an existing database; never bootstraps an empty directory.
pub fn open_store(dir: impl AsRef<Path>, opts: StoreOptions) -> Result<GraphStore> {
    let dir = dir.as_ref();
    require_database(dir)?;
    Ok(GraphStore::open(dir, opts)?)
}
