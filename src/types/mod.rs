//! Shared identifiers, the crate error type, and checksum helpers.

use std::fmt;
use std::io;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Line checksum helpers.
pub mod checksum;

pub use checksum::{line_checksum, Checksum, Crc32Fast};

/// Identifier of a vertex.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VertexId(pub Uuid);

/// Identifier of an edge.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EdgeId(pub Uuid);

impl VertexId {
    /// Allocates a fresh random identifier.
    pub fn random() -> Self {
        VertexId(Uuid::new_v4())
    }
}

impl EdgeId {
    /// Allocates a fresh random identifier.
    pub fn random() -> Self {
        EdgeId(Uuid::new_v4())
    }
}

impl fmt::Display for VertexId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl fmt::Display for EdgeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, BitsyError>;

/// Errors surfaced by the store, its transactions and the durability pipeline.
#[derive(Debug, Error)]
pub enum BitsyError {
    /// Underlying disk read or write failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// Optimistic version check failed; the whole transaction must be retried.
    #[error("concurrent modification: {0}")]
    Conflict(String),
    /// Structural corruption not tied to a single line.
    #[error("corruption detected: {0}")]
    Corruption(String),
    /// A specific line of a log file failed validation.
    #[error("corruption in {} at line {line}: {reason}", file.display())]
    CorruptLine {
        /// File containing the bad line.
        file: PathBuf,
        /// 1-based line number (the header is line 1).
        line: usize,
        /// What failed.
        reason: &'static str,
    },
    /// Invalid argument or usage.
    #[error("invalid usage: {0}")]
    Invalid(&'static str),
    /// Invalid argument or usage with a formatted message.
    #[error("invalid usage: {0}")]
    InvalidOwned(String),
    /// An edge was added whose in-vertex was removed in the same transaction.
    #[error("in-vertex {0} was deleted in this transaction")]
    DeletedInVertex(VertexId),
    /// An edge was added whose out-vertex was removed in the same transaction.
    #[error("out-vertex {0} was deleted in this transaction")]
    DeletedOutVertex(VertexId),
    /// The transaction has already been committed or rolled back.
    #[error("access outside transaction scope")]
    AccessOutsideScope,
    /// The vertex does not exist (or is deleted) in the current view.
    #[error("vertex {0} not found")]
    VertexNotFound(VertexId),
    /// The edge does not exist (or is deleted) in the current view.
    #[error("edge {0} not found")]
    EdgeNotFound(EdgeId),
    /// A lookup needed an index on the key and full scans are disabled.
    #[error("no index on key {0:?} and full graph scans are disabled")]
    MissingIndex(String),
    /// An internal invariant was violated.
    #[error("internal error: {0}")]
    Internal(String),
}

impl BitsyError {
    /// Returns `true` when the caller should open a new transaction and retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, BitsyError::Conflict(_))
    }

    /// Returns `true` for any of the invalid-usage variants.
    pub fn is_invalid_usage(&self) -> bool {
        matches!(
            self,
            BitsyError::Invalid(_)
                | BitsyError::InvalidOwned(_)
                | BitsyError::DeletedInVertex(_)
                | BitsyError::DeletedOutVertex(_)
                | BitsyError::AccessOutsideScope
                | BitsyError::VertexNotFound(_)
                | BitsyError::EdgeNotFound(_)
                | BitsyError::MissingIndex(_)
        )
    }

    /// Returns `true` for corruption variants.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            BitsyError::Corruption(_) | BitsyError::CorruptLine { .. }
        )
    }

    /// Produces an equivalent error value so one failure can be handed to
    /// every waiter.
    pub fn duplicate(&self) -> BitsyError {
        match self {
            BitsyError::Io(err) => BitsyError::Io(io::Error::new(err.kind(), err.to_string())),
            BitsyError::Conflict(msg) => BitsyError::Conflict(msg.clone()),
            BitsyError::Corruption(msg) => BitsyError::Corruption(msg.clone()),
            BitsyError::CorruptLine { file, line, reason } => BitsyError::CorruptLine {
                file: file.clone(),
                line: *line,
                reason,
            },
            BitsyError::Invalid(msg) => BitsyError::Invalid(msg),
            BitsyError::InvalidOwned(msg) => BitsyError::InvalidOwned(msg.clone()),
            BitsyError::DeletedInVertex(id) => BitsyError::DeletedInVertex(*id),
            BitsyError::DeletedOutVertex(id) => BitsyError::DeletedOutVertex(*id),
            BitsyError::AccessOutsideScope => BitsyError::AccessOutsideScope,
            BitsyError::VertexNotFound(id) => BitsyError::VertexNotFound(*id),
            BitsyError::EdgeNotFound(id) => BitsyError::EdgeNotFound(*id),
            BitsyError::MissingIndex(key) => BitsyError::MissingIndex(key.clone()),
            BitsyError::Internal(msg) => BitsyError::Internal(msg.clone()),
        }
    }
}

impl From<serde_json::Error> for BitsyError {
    fn from(err: serde_json::Error) -> Self {
        BitsyError::Corruption(format!("malformed record payload: {err}"))
    }
}
