use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::types::BitsyError;

/// Why an offline `stats`, `verify`, `backup`, `flush` or `seed` run failed.
///
/// Findings of a verify run are not errors; they are reported in
/// [`VerifyReport`](crate::admin::VerifyReport).
#[derive(Debug, Error)]
pub enum AdminError {
    /// The directory holds none of the `tx`, `v`, `e` or `meta` files, so
    /// there is nothing to open. Admin commands never bootstrap a new store.
    #[error("no bitsy database in {0}")]
    MissingDatabase(PathBuf),
    /// A backup was asked to write into the directory it reads from.
    #[error("backup target {0} is the database directory itself")]
    BackupIntoSource(PathBuf),
    /// Opening, recovering or flushing the store failed.
    #[error(transparent)]
    Store(#[from] BitsyError),
    /// Reading the directory failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Result type alias for administrative operations.
pub type Result<T> = std::result::Result<T, AdminError>;

impl AdminError {
    pub(crate) fn missing_database(path: impl AsRef<Path>) -> Self {
        AdminError::MissingDatabase(path.as_ref().to_path_buf())
    }
}
