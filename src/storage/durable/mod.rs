//! The three-stage durability pipeline.
//!
//! Stage 1 takes one unit per commit and hands it to stage 2, whose queuer
//! appends the unit to the filling Tx log and syncs it before the commit is
//! acknowledged. Stage 2 flushes a full Tx log by copying its live lines into
//! the V/E files; stage 3 counts the lines that copy added and reorganizes
//! the V/E files once enough have accumulated.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::primitives::buffer::{AlwaysFlush, DoubleBuffer, Potential, Slot};
use crate::primitives::concurrency::Latch;
use crate::primitives::log::DurableLog;
use crate::storage::codec::{self, IndexDef};
use crate::storage::metrics::StoreMetrics;
use crate::storage::options::StoreOptions;
use crate::types::{BitsyError, Result};

pub(crate) mod compaction;
pub(crate) mod files;
pub mod recovery;

use compaction::Liveness;
use files::{CounterSeq, DirLayout, FileKind};

static BACKUP_LOCK: Mutex<()> = parking_lot::const_mutex(());

/// Open handles and bookkeeping for the V/E pair of a directory.
pub(crate) struct DataFiles {
    pub(crate) layout: DirLayout,
    pub(crate) counters: Arc<CounterSeq>,
    pub(crate) v_slot: Slot,
    pub(crate) e_slot: Slot,
    pub(crate) meta_slot: Slot,
    pub(crate) v: DurableLog,
    pub(crate) e: DurableLog,
    /// Value of the last log marker written to both V and E.
    pub(crate) last_marker: u64,
    /// Lines in the active V and E files, headers excluded.
    pub(crate) lines: u64,
}

/// Thresholds read by the potential functions on every unit.
#[derive(Debug)]
pub(crate) struct Tunables {
    tx_log_threshold: AtomicU64,
    reorg_factor_bits: AtomicU64,
    min_lines_per_reorg: AtomicU64,
}

impl Tunables {
    pub(crate) fn from_options(opts: &StoreOptions) -> Self {
        Self {
            tx_log_threshold: AtomicU64::new(opts.tx_log_threshold),
            reorg_factor_bits: AtomicU64::new(opts.reorg_factor.to_bits()),
            min_lines_per_reorg: AtomicU64::new(opts.min_lines_per_reorg),
        }
    }

    pub(crate) fn tx_log_threshold(&self) -> u64 {
        self.tx_log_threshold.load(Ordering::Relaxed)
    }

    pub(crate) fn set_tx_log_threshold(&self, bytes: u64) {
        self.tx_log_threshold.store(bytes.max(1), Ordering::Relaxed);
    }

    pub(crate) fn reorg_factor(&self) -> f64 {
        f64::from_bits(self.reorg_factor_bits.load(Ordering::Relaxed))
    }

    pub(crate) fn set_reorg_factor(&self, factor: f64) {
        self.reorg_factor_bits
            .store(factor.to_bits(), Ordering::Relaxed);
    }

    pub(crate) fn min_lines_per_reorg(&self) -> u64 {
        self.min_lines_per_reorg.load(Ordering::Relaxed)
    }

    pub(crate) fn set_min_lines_per_reorg(&self, lines: u64) {
        self.min_lines_per_reorg.store(lines, Ordering::Relaxed);
    }
}

/// Receives the commit sequence of every unit whose Tx-log write is synced.
pub(crate) trait Watermark {
    fn mark_durable(&self, seq: u64);
}

/// One commit travelling through stage 1.
pub(crate) struct CommitUnit {
    seq: u64,
    lines: String,
    latch: Arc<Latch>,
}

/// Encoded lines of one commit, written to a Tx log by stage 2's queuer.
pub(crate) struct TxChunk {
    seq: u64,
    lines: String,
}

struct BytePotential {
    bytes: u64,
    tunables: Arc<Tunables>,
}

impl Potential<TxChunk> for BytePotential {
    fn add(&mut self, unit: &TxChunk) -> bool {
        self.bytes += unit.lines.len() as u64;
        self.bytes >= self.tunables.tx_log_threshold()
    }

    fn reset(&mut self) {
        self.bytes = 0;
    }
}

struct ReorgPotential {
    added: u64,
    tunables: Arc<Tunables>,
    /// Lines present after the last reorg.
    orig: Arc<AtomicU64>,
}

impl Potential<u64> for ReorgPotential {
    fn add(&mut self, lines: &u64) -> bool {
        self.added += *lines;
        let orig = self.orig.load(Ordering::Relaxed) as f64;
        let limit = (self.tunables.reorg_factor() * orig)
            .max(self.tunables.min_lines_per_reorg() as f64);
        self.added as f64 > limit
    }

    fn reset(&mut self) {
        self.added = 0;
    }
}

/// Progress counters of the pipeline.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct PipelineStats {
    pub(crate) commits: u64,
    pub(crate) tx_log_flushes: u64,
    pub(crate) reorgs: u64,
}

/// Everything the pipeline takes over from recovery.
pub(crate) struct PipelineParts {
    pub(crate) files: DataFiles,
    pub(crate) tx_logs: [DurableLog; 2],
    pub(crate) initial_slot: Slot,
}

/// The running durability pipeline of one store.
pub(crate) struct Pipeline {
    stage1: DoubleBuffer<CommitUnit>,
    stage2: Arc<DoubleBuffer<TxChunk>>,
    stage3: Arc<DoubleBuffer<u64>>,
    files: Arc<Mutex<DataFiles>>,
    metrics: Arc<dyn StoreMetrics>,
    shutdown_timeout: Duration,
}

impl Pipeline {
    /// Spawns the three stage workers.
    pub(crate) fn start<H>(
        parts: PipelineParts,
        host: Arc<H>,
        tunables: Arc<Tunables>,
        metrics: Arc<dyn StoreMetrics>,
        shutdown_timeout: Duration,
    ) -> Result<Self>
    where
        H: Liveness + Watermark + Send + Sync + 'static,
    {
        let PipelineParts {
            files,
            tx_logs,
            initial_slot,
        } = parts;
        let orig = Arc::new(AtomicU64::new(files.lines));
        let files = Arc::new(Mutex::new(files));
        let [tx_a, tx_b] = tx_logs;
        let tx_logs = Arc::new([Mutex::new(tx_a), Mutex::new(tx_b)]);

        let stage3 = {
            let files = Arc::clone(&files);
            let host = Arc::clone(&host);
            let metrics = Arc::clone(&metrics);
            let orig = Arc::clone(&orig);
            DoubleBuffer::builder(
                "reorg",
                Box::new(ReorgPotential {
                    added: 0,
                    tunables: Arc::clone(&tunables),
                    orig: Arc::clone(&orig),
                }),
                Box::new(move |_slot, _units: Vec<u64>| {
                    let mut files = files.lock();
                    let outcome = compaction::reorg(&mut files, host.as_ref())?;
                    orig.store(files.lines, Ordering::Relaxed);
                    metrics.reorg(outcome.kept, outcome.dropped);
                    Ok(())
                }),
            )
            .spawn()?
        };
        let stage3 = Arc::new(stage3);

        let stage2 = {
            let files = Arc::clone(&files);
            let host = Arc::clone(&host);
            let metrics = Arc::clone(&metrics);
            let flush_logs = Arc::clone(&tx_logs);
            let next = Arc::clone(&stage3);
            DoubleBuffer::builder(
                "txlog",
                Box::new(BytePotential {
                    bytes: 0,
                    tunables: Arc::clone(&tunables),
                }),
                Box::new(move |slot, chunks: Vec<TxChunk>| {
                    let outcome = {
                        let mut files = files.lock();
                        let mut log = flush_logs[slot.index()].lock();
                        compaction::copy_tx_log(&mut files, &mut log, host.as_ref())?
                    };
                    metrics.tx_log_flushed(outcome.kept, outcome.dropped);
                    info!(
                        slot = %slot,
                        commits = chunks.len(),
                        last_seq = chunks.last().map(|c| c.seq).unwrap_or(0),
                        kept = outcome.kept,
                        dropped = outcome.dropped,
                        "pipeline.tx_log.flushed"
                    );
                    next.enqueue(outcome.written)
                }),
            )
            .queuer(Box::new(move |slot, chunk: &TxChunk| {
                let mut log = tx_logs[slot.index()].lock();
                log.append_encoded(&chunk.lines)?;
                log.commit()?;
                debug!(slot = %slot, seq = chunk.seq, bytes = chunk.lines.len(), "pipeline.tx_log.append");
                Ok(())
            }))
            .initial_slot(initial_slot)
            .spawn()?
        };
        let stage2 = Arc::new(stage2);

        let stage1 = {
            let next = Arc::clone(&stage2);
            DoubleBuffer::builder(
                "commit",
                Box::new(AlwaysFlush),
                Box::new(move |_slot, units: Vec<CommitUnit>| {
                    let mut units = units.into_iter();
                    while let Some(unit) = units.next() {
                        let chunk = TxChunk {
                            seq: unit.seq,
                            lines: unit.lines,
                        };
                        if let Err(err) = next.enqueue(chunk) {
                            unit.latch.finish(Err(err.duplicate()));
                            for rest in units {
                                rest.latch.finish(Err(err.duplicate()));
                            }
                            return Err(err);
                        }
                        host.mark_durable(unit.seq);
                        unit.latch.finish(Ok(()));
                    }
                    Ok(())
                }),
            )
            .on_abandon(Box::new(|units: Vec<CommitUnit>, err: &BitsyError| {
                for unit in units {
                    unit.latch.finish(Err(err.duplicate()));
                }
            }))
            .spawn()?
        };

        Ok(Self {
            stage1,
            stage2,
            stage3,
            files,
            metrics,
            shutdown_timeout,
        })
    }

    /// Hands a commit's lines to stage 1. The returned latch finishes once
    /// the lines are synced to a Tx log.
    pub(crate) fn submit(&self, seq: u64, lines: String) -> Result<Arc<Latch>> {
        let latch = Arc::new(Latch::new());
        self.stage1.enqueue(CommitUnit {
            seq,
            lines,
            latch: Arc::clone(&latch),
        })?;
        Ok(latch)
    }

    /// The first fatal failure recorded by any stage.
    pub(crate) fn failure(&self) -> Option<BitsyError> {
        self.stage1
            .failure()
            .or_else(|| self.stage2.failure())
            .or_else(|| self.stage3.failure())
    }

    /// Copies the filling Tx log into the V/E files and waits until every
    /// stage is idle.
    pub(crate) fn flush(&self) -> Result<()> {
        self.stage1.drain()?;
        self.stage2.flush_now()?;
        self.stage3.drain()
    }

    /// Rewrites the metadata file with the given index definitions.
    pub(crate) fn rewrite_meta(&self, defs: &[IndexDef]) -> Result<()> {
        let mut files = self.files.lock();
        let target = files.meta_slot.other();
        let body = meta_body(defs)?;
        files::rewrite_pair(&files.layout, &files.counters, FileKind::Meta, target, &body)?;
        files.meta_slot = target;
        debug!(slot = %target, indexes = defs.len(), "pipeline.meta.rewritten");
        Ok(())
    }

    /// Writes a loadable copy of the database into `target`, which must be
    /// missing or empty. Contains every commit acknowledged before the call.
    pub(crate) fn backup(&self, target: &Path) -> Result<()> {
        let _serial = BACKUP_LOCK.lock();
        self.flush()?;
        prepare_backup_dir(target)?;

        let mut files = self.files.lock();
        files.v.commit()?;
        files.e.commit()?;
        let bodies = [
            (FileKind::Vertex, files.v_slot),
            (FileKind::Edge, files.e_slot),
            (FileKind::Meta, files.meta_slot),
        ]
        .into_iter()
        .map(|(kind, slot)| Ok((kind, files::read_body(&files.layout.path(kind, slot))?)))
        .collect::<Result<Vec<_>>>()?;
        let base = files.last_marker.max(1);
        drop(files);

        let out = DirLayout::new(target);
        files::write_file(&out.path(FileKind::Tx, Slot::A), base, &[])?;
        files::write_file(&out.path(FileKind::Tx, Slot::B), base + 1, &[])?;
        for (kind, body) in &bodies {
            files::write_file(&out.path(*kind, Slot::A), base + 2, body)?;
            files::write_file(&out.path(*kind, Slot::B), base + 3, &[])?;
        }
        self.metrics.backup();
        info!(target = %target.display(), "pipeline.backup.complete");
        Ok(())
    }

    pub(crate) fn stats(&self) -> PipelineStats {
        PipelineStats {
            commits: self.stage1.stats().flushes,
            tx_log_flushes: self.stage2.stats().flushes,
            reorgs: self.stage3.stats().flushes,
        }
    }

    /// Drains pending commits, then stops every stage after its in-flight
    /// flush. Returns `false` if a worker had to be detached.
    pub(crate) fn shutdown(&self) -> bool {
        if let Err(err) = self.stage1.drain() {
            warn!(error = %err, "pipeline.shutdown.drain_failed");
        }
        let first = self.stage1.shutdown(self.shutdown_timeout);
        let second = self.stage2.shutdown(self.shutdown_timeout);
        let third = self.stage3.shutdown(self.shutdown_timeout);
        first && second && third
    }
}

pub(crate) fn meta_body(defs: &[IndexDef]) -> Result<Vec<String>> {
    let mut body = Vec::with_capacity(defs.len() + 1);
    body.push(codec::encode_major_version());
    for def in defs {
        body.push(codec::encode_index(def)?);
    }
    Ok(body)
}

fn prepare_backup_dir(target: &Path) -> Result<()> {
    if target.exists() {
        if !target.is_dir() {
            return Err(BitsyError::InvalidOwned(format!(
                "backup target {} is not a directory",
                target.display()
            )));
        }
        if std::fs::read_dir(target)?.next().is_some() {
            return Err(BitsyError::InvalidOwned(format!(
                "backup target {} is not empty",
                target.display()
            )));
        }
    }
    std::fs::create_dir_all(target)?;
    Ok(())
}
