//! Copying Tx logs into the V/E files and reorganizing those files.
//!
//! Both passes decide line by line whether a record is still needed by
//! asking a [`Liveness`] view of the store. A Tx-log copy keeps tombstones
//! and transaction boundaries so every deletion reaches the V/E files at
//! least once; a reorg drops both.

use std::path::Path;

use tracing::{debug, info};

use crate::primitives::buffer::Slot;
use crate::primitives::log::{DurableLog, LogRecord, RecordType};
use crate::storage::codec::{self, ElementStamp};
use crate::storage::durable::files::{self, FileKind};
use crate::storage::durable::DataFiles;
use crate::storage::graph::state::GraphState;
use crate::types::{BitsyError, Result};

/// Answers whether logged element lines are obsolete.
pub(crate) trait Liveness {
    /// One flag per stamp, `true` when the line can be dropped.
    fn obsolete(&self, stamps: &[ElementStamp], reorg: bool) -> Vec<bool>;
}

/// Liveness over a state whose every commit is already durable.
pub(crate) struct Settled<'a> {
    pub(crate) state: &'a GraphState,
}

impl Liveness for Settled<'_> {
    fn obsolete(&self, stamps: &[ElementStamp], reorg: bool) -> Vec<bool> {
        stamps
            .iter()
            .map(|stamp| self.state.is_obsolete(stamp, reorg, u64::MAX))
            .collect()
    }
}

/// Line counts of one compaction pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct PassOutcome {
    /// Element lines carried over.
    pub(crate) kept: u64,
    /// Lines found obsolete.
    pub(crate) dropped: u64,
    /// Lines appended to the V/E files, markers included.
    pub(crate) written: u64,
}

fn read_records(path: &Path) -> Result<Vec<LogRecord>> {
    let mut log = DurableLog::open_read(path)?;
    let mut records = Vec::new();
    while let Some(record) = log.read_record()? {
        records.push(record);
    }
    Ok(records)
}

fn element_stamps(path: &Path, records: &[LogRecord]) -> Result<Vec<ElementStamp>> {
    records
        .iter()
        .enumerate()
        .filter(|(_, r)| matches!(r.kind, RecordType::Vertex | RecordType::Edge))
        .map(|(idx, record)| {
            codec::stamp(record).map_err(|reason| BitsyError::CorruptLine {
                file: path.to_path_buf(),
                line: idx + 2,
                reason,
            })
        })
        .collect()
}

/// Appends the live part of `tx` to the V/E files followed by a log marker
/// naming the next Tx counter to replay, then resets `tx` with a fresh counter.
pub(crate) fn copy_tx_log(
    files: &mut DataFiles,
    tx: &mut DurableLog,
    live: &dyn Liveness,
) -> Result<PassOutcome> {
    tx.commit()?;
    let path = tx.path().to_path_buf();
    let counter = tx.counter();
    let records = read_records(&path)?;
    let stamps = element_stamps(&path, &records)?;
    let mut flags = live.obsolete(&stamps, false).into_iter();
    let mut outcome = PassOutcome::default();

    for (idx, record) in records.iter().enumerate() {
        match record.kind {
            RecordType::TxBoundary => {
                let line = record.encode();
                files.v.append_encoded(&line)?;
                files.e.append_encoded(&line)?;
                outcome.written += 2;
            }
            RecordType::Vertex | RecordType::Edge => {
                if flags.next().unwrap_or(false) {
                    outcome.dropped += 1;
                    continue;
                }
                let target = if record.kind == RecordType::Vertex {
                    &mut files.v
                } else {
                    &mut files.e
                };
                target.append(record)?;
                outcome.kept += 1;
                outcome.written += 1;
            }
            _ => {
                return Err(BitsyError::CorruptLine {
                    file: path,
                    line: idx + 2,
                    reason: "unexpected record type in tx log",
                })
            }
        }
    }

    let marker = LogRecord::log_marker(counter + 1);
    files.v.append(&marker)?;
    files.v.commit()?;
    files.e.append(&marker)?;
    files.e.commit()?;
    outcome.written += 2;
    files.last_marker = counter + 1;
    files.lines += outcome.written;

    *tx = DurableLog::create(&path, files.counters.next())?;
    debug!(
        tx_log = %path.display(),
        counter,
        kept = outcome.kept,
        dropped = outcome.dropped,
        "compaction.copy_tx_log"
    );
    Ok(outcome)
}

fn reorg_one(
    files: &DataFiles,
    kind: FileKind,
    slot: Slot,
    live: &dyn Liveness,
) -> Result<(DurableLog, PassOutcome)> {
    let path = files.layout.path(kind, slot);
    let records = read_records(&path)?;
    let stamps = element_stamps(&path, &records)?;
    let mut flags = live.obsolete(&stamps, true).into_iter();
    let mut outcome = PassOutcome::default();
    let mut body = Vec::with_capacity(records.len() + 1);

    for (idx, record) in records.iter().enumerate() {
        match record.kind {
            RecordType::Vertex | RecordType::Edge => {
                if flags.next().unwrap_or(false) {
                    outcome.dropped += 1;
                } else {
                    body.push(record.encode());
                    outcome.kept += 1;
                }
            }
            RecordType::TxBoundary | RecordType::LogMarker => outcome.dropped += 1,
            _ => {
                return Err(BitsyError::CorruptLine {
                    file: path,
                    line: idx + 2,
                    reason: "unexpected record type in data file",
                })
            }
        }
    }
    body.push(LogRecord::log_marker(files.last_marker).encode());
    outcome.written = body.len() as u64;
    let log = files::rewrite_pair(&files.layout, &files.counters, kind, slot.other(), &body)?;
    Ok((log, outcome))
}

/// Rewrites the V and E files into their alternate slots keeping only live
/// lines, then makes the alternates active.
pub(crate) fn reorg(files: &mut DataFiles, live: &dyn Liveness) -> Result<PassOutcome> {
    files.v.commit()?;
    files.e.commit()?;

    let (v_log, v_out) = reorg_one(files, FileKind::Vertex, files.v_slot, live)?;
    files.v = v_log;
    files.v_slot = files.v_slot.other();

    let (e_log, e_out) = reorg_one(files, FileKind::Edge, files.e_slot, live)?;
    files.e = e_log;
    files.e_slot = files.e_slot.other();

    let total = PassOutcome {
        kept: v_out.kept + e_out.kept,
        dropped: v_out.dropped + e_out.dropped,
        written: v_out.written + e_out.written,
    };
    files.lines = total.written;
    info!(
        dir = %files.layout.root().display(),
        kept = total.kept,
        dropped = total.dropped,
        slot = %files.v_slot,
        "compaction.reorg"
    );
    Ok(total)
}

/// Copies the active E file into the slot the V file uses. Runs at boot when
/// a crash interrupted a reorg between the two rewrites.
pub(crate) fn repair_slots(files: &mut DataFiles) -> Result<()> {
    if files.v_slot == files.e_slot {
        return Ok(());
    }
    files.e.commit()?;
    let body = files::read_body(&files.layout.path(FileKind::Edge, files.e_slot))?;
    files.e = files::rewrite_pair(
        &files.layout,
        &files.counters,
        FileKind::Edge,
        files.v_slot,
        &body,
    )?;
    files.e_slot = files.v_slot;
    info!(slot = %files.v_slot, lines = body.len(), "compaction.repair_slots");
    Ok(())
}
