use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Trait for tracking commits, compaction and backups of a store.
///
/// Implementations are called from committing threads and from the pipeline
/// workers, so every method must be cheap and thread-safe.
pub trait StoreMetrics: Send + Sync {
    /// Records a committed vertex creation or update.
    fn vertex_committed(&self);

    /// Records a committed vertex removal.
    fn vertex_removed(&self);

    /// Records a committed edge creation or update.
    fn edge_committed(&self);

    /// Records a committed edge removal, including cascaded ones.
    fn edge_removed(&self);

    /// Records a commit rejected by the version check.
    fn conflict(&self);

    /// Records a Tx log copied into the V/E files.
    ///
    /// # Parameters
    /// * `kept` - Lines appended to the V/E files.
    /// * `dropped` - Lines found obsolete and skipped.
    fn tx_log_flushed(&self, kept: u64, dropped: u64);

    /// Records a V/E reorganization.
    fn reorg(&self, kept: u64, dropped: u64);

    /// Records a completed backup.
    fn backup(&self);
}

/// A no-op implementation of [`StoreMetrics`].
#[derive(Default)]
pub struct NoopMetrics;

impl StoreMetrics for NoopMetrics {
    fn vertex_committed(&self) {}
    fn vertex_removed(&self) {}
    fn edge_committed(&self) {}
    fn edge_removed(&self) {}
    fn conflict(&self) {}
    fn tx_log_flushed(&self, _kept: u64, _dropped: u64) {}
    fn reorg(&self, _kept: u64, _dropped: u64) {}
    fn backup(&self) {}
}

/// A thread-safe counter-based implementation of [`StoreMetrics`].
#[derive(Default)]
pub struct CounterMetrics {
    /// Vertices created or updated.
    pub vertices_committed: AtomicU64,

    /// Vertices removed.
    pub vertices_removed: AtomicU64,

    /// Edges created or updated.
    pub edges_committed: AtomicU64,

    /// Edges removed.
    pub edges_removed: AtomicU64,

    /// Commits rejected with a conflict.
    pub conflicts: AtomicU64,

    /// Tx logs copied into the V/E files.
    pub tx_log_flushes: AtomicU64,

    /// Lines kept by Tx log copies.
    pub tx_lines_kept: AtomicU64,

    /// Lines dropped as obsolete by Tx log copies.
    pub tx_lines_dropped: AtomicU64,

    /// Completed reorganizations.
    pub reorgs: AtomicU64,

    /// Lines kept by reorganizations.
    pub reorg_lines_kept: AtomicU64,

    /// Lines dropped by reorganizations.
    pub reorg_lines_dropped: AtomicU64,

    /// Completed backups.
    pub backups: AtomicU64,
}

impl StoreMetrics for CounterMetrics {
    fn vertex_committed(&self) {
        self.vertices_committed.fetch_add(1, Ordering::Relaxed);
    }

    fn vertex_removed(&self) {
        self.vertices_removed.fetch_add(1, Ordering::Relaxed);
    }

    fn edge_committed(&self) {
        self.edges_committed.fetch_add(1, Ordering::Relaxed);
    }

    fn edge_removed(&self) {
        self.edges_removed.fetch_add(1, Ordering::Relaxed);
    }

    fn conflict(&self) {
        self.conflicts.fetch_add(1, Ordering::Relaxed);
    }

    fn tx_log_flushed(&self, kept: u64, dropped: u64) {
        self.tx_log_flushes.fetch_add(1, Ordering::Relaxed);
        self.tx_lines_kept.fetch_add(kept, Ordering::Relaxed);
        self.tx_lines_dropped.fetch_add(dropped, Ordering::Relaxed);
    }

    fn reorg(&self, kept: u64, dropped: u64) {
        self.reorgs.fetch_add(1, Ordering::Relaxed);
        self.reorg_lines_kept.fetch_add(kept, Ordering::Relaxed);
        self.reorg_lines_dropped.fetch_add(dropped, Ordering::Relaxed);
    }

    fn backup(&self) {
        self.backups.fetch_add(1, Ordering::Relaxed);
    }
}

/// Returns the default metrics implementation wrapped in an [`Arc`].
///
/// The default implementation is [`NoopMetrics`], which discards everything.
pub fn default_metrics() -> Arc<dyn StoreMetrics> {
    Arc::new(NoopMetrics)
}
