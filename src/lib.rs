//! Bitsy: an embedded transactional graph database.
//!
//! The whole graph lives in memory behind a seqlock. Transactions buffer
//! their changes and commit them with an optimistic version check; every
//! acknowledged commit has been synced to a checksummed, line-oriented Tx
//! log. Background workers copy filled Tx logs into the vertex and edge
//! files and periodically rewrite those files to drop obsolete lines.
//!
//! ```no_run
//! use bitsy::{GraphStore, StoreOptions};
//!
//! # fn main() -> bitsy::Result<()> {
//! let store = GraphStore::open("./graph", StoreOptions::default())?;
//! let mut tx = store.new_transaction();
//! let ada = tx.add_vertex(Some("person"))?;
//! let bob = tx.add_vertex(Some("person"))?;
//! tx.add_edge(ada, bob, "knows")?;
//! tx.commit()?;
//! store.shutdown()?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod admin;
pub mod primitives;
pub mod storage;
pub mod types;

pub use storage::{
    ChangeSet, Dir, EdgeRecord, ElementKind, GraphStore, IsolationLevel, Properties,
    PropertyValue, RecoveryReport, StoreOptions, StoreStats, Transaction, VertexRecord,
};
pub use types::{BitsyError, EdgeId, Result, VertexId};
