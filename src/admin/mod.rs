#![forbid(unsafe_code)]

//! Offline maintenance of database directories.
//!
//! These helpers back the `bitsy` command-line tool. [`verify`] never
//! modifies the directory; the others open the store, which runs recovery.

mod backup;
mod error;
mod seed;
mod stats;
mod util;
mod verify;

/// Backup and flush of a closed database.
pub use backup::{backup, flush, MaintenanceReport};

/// Error types for administrative operations.
pub use error::{AdminError, Result};

/// Random graph generation.
pub use seed::{seed, SeedOptions, SeedReport};

/// Opening a database and summarizing it.
pub use stats::{stats, FileSize, StatsReport};

/// Opens an existing database without bootstrapping.
pub use util::open_store;

/// Line-level integrity verification.
pub use verify::{verify, FileSummary, VerifyFinding, VerifyLevel, VerifyReport, VerifySeverity};
