//! Graph storage engine.
//!
//! The in-memory graph lives behind a seqlock inside [`GraphStore`];
//! committed change sets flow through the durability pipeline into a Tx log
//! and from there into the vertex and edge files, which are compacted in
//! the background.

/// Per-vertex adjacency index.
pub mod adjacency;

/// Typed payloads of vertex, edge, index and version records.
pub mod codec;

/// Key index collaborator.
pub mod index;

pub(crate) mod durable;
mod graph;
mod metrics;
mod options;
mod tx;
mod types;

/// Graph store and its change sets.
pub use graph::{ChangeSet, GraphStore, StoreStats};

/// Boot-time recovery outcome.
pub use durable::recovery::{RecoveryReport, Truncation};

/// Edge direction.
pub use adjacency::Dir;

/// Index definitions as persisted in the metadata file.
pub use codec::IndexDef;

/// Key index trait and the default in-memory implementation.
pub use index::{IndexSet, KeyIndex, MemoryKeyIndex};

/// Metrics and counters.
pub use metrics::{default_metrics, CounterMetrics, NoopMetrics, StoreMetrics};

/// Store configuration.
pub use options::{
    StoreOptions, DEFAULT_MIN_LINES_PER_REORG, DEFAULT_REORG_FACTOR, DEFAULT_TX_LOG_THRESHOLD,
};

/// Transactions.
pub use tx::{IsolationLevel, Transaction, TxState};

/// Element values and validation.
pub use types::{
    validate_edge_label, validate_property_key, validate_property_value, EdgeRecord,
    ElementKind, ElementState, Properties, PropertyValue, VertexRecord,
};
