use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::primitives::concurrency::SeqLock;
use crate::storage::codec::ElementStamp;
use crate::storage::durable::compaction::Liveness;
use crate::storage::durable::recovery::{self, Recovered, RecoveryReport};
use crate::storage::durable::{Pipeline, PipelineParts, Tunables, Watermark};
use crate::storage::metrics::{default_metrics, StoreMetrics};
use crate::storage::options::StoreOptions;
use crate::storage::tx::{IsolationLevel, Transaction};
use crate::types::{BitsyError, Result};

mod index_ops;
mod read_ops;
pub(crate) mod state;

pub use state::ChangeSet;

use state::GraphState;

/// Graph state shared between committing threads and pipeline workers.
pub(crate) struct StoreCore {
    pub(crate) state: SeqLock<GraphState>,
    durable_seq: AtomicU64,
}

impl StoreCore {
    fn new(state: GraphState, durable_seq: u64, spin_limit: u32) -> Self {
        Self {
            state: SeqLock::new(state, spin_limit),
            durable_seq: AtomicU64::new(durable_seq),
        }
    }

    pub(crate) fn durable_seq(&self) -> u64 {
        self.durable_seq.load(Ordering::Acquire)
    }
}

impl Watermark for StoreCore {
    fn mark_durable(&self, seq: u64) {
        self.durable_seq.fetch_max(seq, Ordering::AcqRel);
    }
}

impl Liveness for StoreCore {
    fn obsolete(&self, stamps: &[ElementStamp], reorg: bool) -> Vec<bool> {
        let durable = self.durable_seq();
        self.state.read(|state| {
            stamps
                .iter()
                .map(|stamp| state.is_obsolete(stamp, reorg, durable))
                .collect()
        })
    }
}

struct WriterState {
    next_seq: u64,
    closed: bool,
}

/// Point-in-time counters of a store.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    /// Live vertices.
    pub vertices: u64,
    /// Live edges.
    pub edges: u64,
    /// Tx logs copied into the V/E files since open.
    pub tx_log_flushes: u64,
    /// Reorganizations since open.
    pub reorgs: u64,
    /// Sequence of the last commit applied in memory.
    pub seq: u64,
    /// Sequence of the last commit synced to a Tx log.
    pub durable_seq: u64,
}

/// An embedded transactional graph store.
///
/// Commits are validated against stored versions and applied to the
/// in-memory graph under one writer lock. A durable store then blocks the
/// committing thread until the change set is synced to a Tx log; an
/// in-memory store returns as soon as the change is applied.
pub struct GraphStore {
    core: Arc<StoreCore>,
    writer: Mutex<WriterState>,
    pipeline: Option<Pipeline>,
    dir: Option<PathBuf>,
    opts: StoreOptions,
    tunables: Arc<Tunables>,
    metrics: Arc<dyn StoreMetrics>,
    report: RecoveryReport,
}

impl GraphStore {
    /// Opens the database in `dir`, creating it when the directory holds no
    /// database files.
    pub fn open(dir: impl AsRef<Path>, opts: StoreOptions) -> Result<Self> {
        opts.validate()?;
        let dir = dir.as_ref().to_path_buf();
        let Recovered {
            state,
            last_seq,
            files,
            tx_logs,
            initial_slot,
            report,
        } = recovery::recover(&dir)?;
        if report.has_warnings() {
            warn!(dir = %dir.display(), truncations = report.truncations.len(), "graph.open.recovered_with_warnings");
        }
        let core = Arc::new(StoreCore::new(state, last_seq, opts.read_spin_limit));
        let tunables = Arc::new(Tunables::from_options(&opts));
        let metrics = opts.metrics.clone().unwrap_or_else(default_metrics);
        let pipeline = Pipeline::start(
            PipelineParts {
                files,
                tx_logs,
                initial_slot,
            },
            Arc::clone(&core),
            Arc::clone(&tunables),
            Arc::clone(&metrics),
            opts.shutdown_timeout,
        )?;
        info!(dir = %dir.display(), last_seq, "graph.open");
        Ok(Self {
            core,
            writer: Mutex::new(WriterState {
                next_seq: last_seq + 1,
                closed: false,
            }),
            pipeline: Some(pipeline),
            dir: Some(dir),
            opts,
            tunables,
            metrics,
            report,
        })
    }

    /// Creates a store that keeps everything in memory.
    pub fn in_memory(opts: StoreOptions) -> Result<Self> {
        opts.validate()?;
        let core = Arc::new(StoreCore::new(
            GraphState::default(),
            0,
            opts.read_spin_limit,
        ));
        let tunables = Arc::new(Tunables::from_options(&opts));
        let metrics = opts.metrics.clone().unwrap_or_else(default_metrics);
        Ok(Self {
            core,
            writer: Mutex::new(WriterState {
                next_seq: 1,
                closed: false,
            }),
            pipeline: None,
            dir: None,
            opts,
            tunables,
            metrics,
            report: RecoveryReport::default(),
        })
    }

    /// Starts a transaction with the configured isolation level.
    pub fn new_transaction(&self) -> Transaction<'_> {
        Transaction::new(self, self.opts.isolation)
    }

    /// Starts a transaction with an explicit isolation level.
    pub fn new_transaction_with(&self, isolation: IsolationLevel) -> Transaction<'_> {
        Transaction::new(self, isolation)
    }

    /// Validates and applies a change set, then waits for it to be durable.
    ///
    /// Every changed element must carry the stored version plus one;
    /// otherwise [`BitsyError::Conflict`] is returned and nothing is applied.
    pub fn commit(&self, changes: &ChangeSet) -> Result<()> {
        if changes.is_empty() {
            return Ok(());
        }
        let mut writer = self.writer.lock();
        self.check_open(&writer)?;
        if let Some(err) = self.pipeline.as_ref().and_then(Pipeline::failure) {
            return Err(err);
        }
        if let Err(err) = self.core.state.read(|state| state.validate(changes)) {
            if err.is_retryable() {
                self.metrics.conflict();
                warn!(error = %err, "graph.commit.conflict");
            }
            return Err(err);
        }

        let seq = writer.next_seq;
        let applied = {
            let mut state = self.core.state.write();
            let applied = state.apply(changes, seq)?;
            state.prune_erased(self.core.durable_seq());
            applied
        };
        writer.next_seq += 1;
        for _ in 0..applied.vertices_written {
            self.metrics.vertex_committed();
        }
        for _ in 0..applied.vertices_removed {
            self.metrics.vertex_removed();
        }
        for _ in 0..applied.edges_written {
            self.metrics.edge_committed();
        }
        for _ in 0..applied.edges_removed {
            self.metrics.edge_removed();
        }
        debug!(
            seq,
            vertices = applied.vertices_written + applied.vertices_removed,
            edges = applied.edges_written + applied.edges_removed,
            bytes = applied.lines.len(),
            "graph.commit.applied"
        );

        let Some(pipeline) = self.pipeline.as_ref() else {
            self.core.mark_durable(seq);
            return Ok(());
        };
        let latch = pipeline.submit(seq, applied.lines)?;
        drop(writer);
        latch.wait()
    }

    /// Copies the filling Tx log into the V/E files and waits for the
    /// pipeline to settle. A no-op for in-memory stores.
    pub fn flush_tx_log(&self) -> Result<()> {
        self.check_open(&self.writer.lock())?;
        match self.pipeline.as_ref() {
            Some(pipeline) => pipeline.flush(),
            None => Ok(()),
        }
    }

    /// Writes a loadable copy of the database into `target`, which must be
    /// missing or empty.
    pub fn backup(&self, target: impl AsRef<Path>) -> Result<()> {
        self.check_open(&self.writer.lock())?;
        let pipeline = self
            .pipeline
            .as_ref()
            .ok_or(BitsyError::Invalid("backup requires a durable store"))?;
        pipeline.backup(target.as_ref())
    }

    /// Stops the pipeline workers. Later commits fail; reads keep working.
    pub fn shutdown(&self) -> Result<()> {
        let mut writer = self.writer.lock();
        if writer.closed {
            return Ok(());
        }
        writer.closed = true;
        if let Some(pipeline) = self.pipeline.as_ref() {
            if !pipeline.shutdown() {
                warn!("graph.shutdown.workers_detached");
            }
        }
        info!(
            dir = ?self.dir,
            seq = writer.next_seq - 1,
            "graph.shutdown"
        );
        Ok(())
    }

    /// Current counters.
    pub fn stats(&self) -> StoreStats {
        let seq = self.writer.lock().next_seq - 1;
        let (vertices, edges) = self
            .core
            .state
            .read(|state| (state.vertices.len() as u64, state.edges.len() as u64));
        let pipeline = self
            .pipeline
            .as_ref()
            .map(Pipeline::stats)
            .unwrap_or_default();
        StoreStats {
            vertices,
            edges,
            tx_log_flushes: pipeline.tx_log_flushes,
            reorgs: pipeline.reorgs,
            seq,
            durable_seq: self.core.durable_seq(),
        }
    }

    /// What happened while loading the directory at open.
    pub fn recovery_report(&self) -> &RecoveryReport {
        &self.report
    }

    /// Options the store was opened with.
    pub fn options(&self) -> &StoreOptions {
        &self.opts
    }

    /// Database directory, `None` for in-memory stores.
    pub fn path(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    /// Changes the Tx log copy threshold of the running store.
    pub fn set_tx_log_threshold(&self, bytes: u64) {
        self.tunables.set_tx_log_threshold(bytes);
    }

    /// Changes the reorg factor of the running store.
    pub fn set_reorg_factor(&self, factor: f64) -> Result<()> {
        if !factor.is_finite() || factor < 0.0 {
            return Err(BitsyError::Invalid(
                "reorg_factor must be a non-negative number",
            ));
        }
        self.tunables.set_reorg_factor(factor);
        Ok(())
    }

    /// Changes the minimum number of new lines per reorg.
    pub fn set_min_lines_per_reorg(&self, lines: u64) {
        self.tunables.set_min_lines_per_reorg(lines);
    }

    fn check_open(&self, writer: &WriterState) -> Result<()> {
        if writer.closed {
            Err(BitsyError::Invalid("store is shut down"))
        } else {
            Ok(())
        }
    }
}

impl Drop for GraphStore {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}
