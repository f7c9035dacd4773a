//! Loading a database directory at boot.
//!
//! The active V, E and meta files are the lower-counter member of each pair.
//! V/E content is applied only up to the last log marker and Tx-log content
//! only up to the last transaction boundary; anything after is an incomplete
//! write and is truncated. A bad line is tolerated only as the final line of
//! a file, anywhere else it is corruption.

use std::collections::HashMap;
use std::hash::Hash;
use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::primitives::buffer::Slot;
use crate::primitives::log::{DurableLog, LineRead, LogRecord, RecordType};
use crate::storage::codec::{self, Decoded, IndexDef, MAJOR_VERSION};
use crate::storage::durable::compaction::{self, Settled};
use crate::storage::durable::files::{self, file_name, CounterSeq, DirLayout, FileKind};
use crate::storage::durable::DataFiles;
use crate::storage::graph::state::{GraphState, Stored};
use crate::storage::types::{EdgeRecord, ElementState, VertexRecord};
use crate::types::{BitsyError, EdgeId, Result, VertexId};

/// A truncation performed while loading.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Truncation {
    /// File name inside the database directory.
    pub file: String,
    /// Byte length the file was cut to.
    pub offset: u64,
    /// Why the tail was discarded.
    pub reason: String,
}

/// Outcome of opening a database directory.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RecoveryReport {
    /// The directory was empty and fresh files were created.
    pub bootstrapped: bool,
    /// Files whose records were loaded, in load order.
    pub files_loaded: Vec<String>,
    /// Element records applied.
    pub records_applied: u64,
    /// Complete transactions replayed from Tx logs.
    pub transactions_replayed: u64,
    /// Tx logs skipped because the V/E files already contained them.
    pub tx_logs_skipped: u64,
    /// Incomplete tails that were cut off.
    pub truncations: Vec<Truncation>,
    /// Edges dropped because an endpoint was missing.
    pub dangling_edges: u64,
    /// Whether an interrupted V/E swap was repaired.
    pub slots_repaired: bool,
    /// Files whose header was unreadable and that were recreated empty.
    pub recreated_files: Vec<String>,
}

impl RecoveryReport {
    /// True when the store opened but had to discard or repair something.
    pub fn has_warnings(&self) -> bool {
        !self.truncations.is_empty()
            || self.slots_repaired
            || self.dangling_edges > 0
            || !self.recreated_files.is_empty()
    }
}

/// Everything the store needs after a successful load.
pub(crate) struct Recovered {
    pub(crate) state: GraphState,
    pub(crate) last_seq: u64,
    pub(crate) files: DataFiles,
    pub(crate) tx_logs: [DurableLog; 2],
    pub(crate) initial_slot: Slot,
    pub(crate) report: RecoveryReport,
}

#[derive(Default)]
struct Loader {
    vertices: HashMap<VertexId, VertexRecord>,
    edges: HashMap<EdgeId, EdgeRecord>,
    tombstones: HashMap<Uuid, u64>,
    last_seq: u64,
    applied: u64,
}

trait Logged {
    fn uuid(&self) -> Uuid;
    fn version(&self) -> u64;
    fn state_mut(&mut self) -> &mut ElementState;
}

impl Logged for VertexRecord {
    fn uuid(&self) -> Uuid {
        self.id.0
    }
    fn version(&self) -> u64 {
        self.version
    }
    fn state_mut(&mut self) -> &mut ElementState {
        &mut self.state
    }
}

impl Logged for EdgeRecord {
    fn uuid(&self) -> Uuid {
        self.id.0
    }
    fn version(&self) -> u64 {
        self.version
    }
    fn state_mut(&mut self) -> &mut ElementState {
        &mut self.state
    }
}

/// Higher or equal version wins; a tombstone hides every version up to its own.
fn put<K: Hash + Eq + Copy, R: Logged>(
    map: &mut HashMap<K, R>,
    tombstones: &mut HashMap<Uuid, u64>,
    key: K,
    mut record: R,
) {
    let version = record.version();
    let uuid = record.uuid();
    let deleted = record.state_mut().is_deleted();
    *record.state_mut() = ElementState::Unmodified;
    if deleted {
        if map.get(&key).map_or(true, |cur| cur.version() <= version) {
            map.remove(&key);
        }
        let tomb = tombstones.entry(uuid).or_insert(0);
        *tomb = (*tomb).max(version);
        return;
    }
    if tombstones.get(&uuid).is_some_and(|tomb| *tomb >= version) {
        return;
    }
    if map.get(&key).is_some_and(|cur| cur.version() > version) {
        return;
    }
    map.insert(key, record);
}

impl Loader {
    fn apply(&mut self, decoded: Decoded) {
        match decoded {
            Decoded::Vertex(vertex) => {
                self.applied += 1;
                put(&mut self.vertices, &mut self.tombstones, vertex.id, vertex);
            }
            Decoded::Edge(edge) => {
                self.applied += 1;
                put(&mut self.edges, &mut self.tombstones, edge.id, edge);
            }
            Decoded::TxBoundary(seq) => self.last_seq = self.last_seq.max(seq),
            _ => {}
        }
    }

    fn into_state(self, defs: &[IndexDef], report: &mut RecoveryReport) -> GraphState {
        let mut state = GraphState::default();
        for (id, record) in self.vertices {
            state.vertices.insert(id, Stored { record, seq: 0 });
        }
        for (id, record) in self.edges {
            if !state.vertices.contains_key(&record.out_vertex)
                || !state.vertices.contains_key(&record.in_vertex)
            {
                warn!(edge = %id, "recovery.dangling_edge");
                report.dangling_edges += 1;
                continue;
            }
            state.edges.insert(id, Stored { record, seq: 0 });
        }
        state.rebuild_derived(defs);
        state
    }
}

fn corrupt(path: &Path, line: usize, reason: &'static str) -> BitsyError {
    BitsyError::CorruptLine {
        file: path.to_path_buf(),
        line,
        reason,
    }
}

fn marker_value(path: &Path, line: usize, record: &LogRecord) -> Result<u64> {
    record
        .counter()
        .ok_or_else(|| corrupt(path, line, "marker payload is not a number"))
}

/// How a replayed file is committed: V/E files commit at log markers, Tx
/// logs at transaction boundaries.
#[derive(Copy, Clone, PartialEq, Eq)]
enum Unit {
    Data(FileKind),
    Tx,
}

struct FileLoad {
    /// Last committing record's value (log marker or commit seq).
    last_commit: Option<u64>,
    /// Committed units (markers or transactions).
    units: u64,
    /// Lines up to and including the last commit point.
    lines: u64,
}

fn load_file(
    loader: &mut Loader,
    path: &Path,
    unit: Unit,
    report: &mut RecoveryReport,
) -> Result<FileLoad> {
    let mut log = DurableLog::open_read(path)?;
    let mut pending: Vec<Decoded> = Vec::new();
    let mut pending_lines = 0u64;
    let mut load = FileLoad {
        last_commit: None,
        units: 0,
        lines: 0,
    };
    let torn = loop {
        let record = match log.read_line_lenient()? {
            LineRead::Record(record) => record,
            LineRead::Torn { reason, .. } => break Some(reason),
            LineRead::Eof => break None,
        };
        let line = log.line_no();
        let commits = match (unit, record.kind) {
            (Unit::Data(_), RecordType::LogMarker) | (Unit::Tx, RecordType::TxBoundary) => true,
            (Unit::Data(_), RecordType::TxBoundary) => {
                pending.push(Decoded::TxBoundary(marker_value(path, line, &record)?));
                false
            }
            (Unit::Data(FileKind::Vertex), RecordType::Vertex)
            | (Unit::Data(FileKind::Edge), RecordType::Edge)
            | (Unit::Tx, RecordType::Vertex | RecordType::Edge) => {
                let decoded = codec::decode(&record).map_err(|reason| corrupt(path, line, reason))?;
                pending.push(decoded);
                false
            }
            _ => return Err(corrupt(path, line, "unexpected record type")),
        };
        pending_lines += 1;
        if commits {
            let value = marker_value(path, line, &record)?;
            if unit == Unit::Tx {
                pending.push(Decoded::TxBoundary(value));
            }
            for decoded in pending.drain(..) {
                loader.apply(decoded);
            }
            load.last_commit = Some(value);
            load.units += 1;
            load.lines += pending_lines;
            pending_lines = 0;
            log.mark();
        }
    };

    if log.has_unmarked_tail() {
        let offset = log.truncate_at_mark()?;
        let reason = match (torn, unit) {
            (Some(reason), _) => reason.to_owned(),
            (None, Unit::Tx) => "incomplete transaction after last boundary".to_owned(),
            (None, Unit::Data(_)) => "incomplete copy after last log marker".to_owned(),
        };
        warn!(path = %path.display(), offset, reason = %reason, "recovery.truncate");
        report.truncations.push(Truncation {
            file: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            offset,
            reason,
        });
    }
    Ok(load)
}

fn load_meta(path: &Path) -> Result<Vec<IndexDef>> {
    let mut log = DurableLog::open_read(path)?;
    let mut defs = Vec::new();
    let mut major = None;
    while let Some(record) = log.read_record()? {
        let line = log.line_no();
        match codec::decode(&record).map_err(|reason| corrupt(path, line, reason))? {
            Decoded::MajorVersion(version) => major = Some(version),
            Decoded::Index(def) => defs.push(def),
            _ => return Err(corrupt(path, line, "unexpected record type in metadata")),
        }
    }
    match major {
        Some(MAJOR_VERSION) => Ok(defs),
        Some(other) => Err(BitsyError::Corruption(format!(
            "unsupported major version {other} in {}",
            path.display()
        ))),
        None => Err(BitsyError::Corruption(format!(
            "metadata file {} has no major version",
            path.display()
        ))),
    }
}

/// Opens (bootstrapping if needed) and loads the database in `dir`, then
/// copies any pending Tx logs into the V/E files.
pub(crate) fn recover(dir: &Path) -> Result<Recovered> {
    let layout = DirLayout::new(dir);
    let mut report = RecoveryReport::default();
    if layout.is_uninitialized() {
        files::bootstrap(&layout)?;
        report.bootstrapped = true;
    }

    let mut headers = HashMap::new();
    let mut max_seen = 0;
    for (kind, slot, path) in layout.all() {
        let counter = files::header_counter(&path)?;
        if let Some(counter) = counter {
            max_seen = max_seen.max(counter);
        }
        headers.insert((kind, slot), counter);
    }
    let head = |kind: FileKind, slot: Slot| headers.get(&(kind, slot)).copied().flatten();
    let counters = Arc::new(CounterSeq::starting_after(max_seen));

    let mut active = HashMap::new();
    for kind in [FileKind::Vertex, FileKind::Edge, FileKind::Meta] {
        let slot = files::active_slot(&layout, kind, head(kind, Slot::A), head(kind, Slot::B))?;
        active.insert(kind, slot);
    }
    let v_slot = active[&FileKind::Vertex];
    let e_slot = active[&FileKind::Edge];
    let meta_slot = active[&FileKind::Meta];

    let defs = load_meta(&layout.path(FileKind::Meta, meta_slot))?;
    report.files_loaded.push(file_name(FileKind::Meta, meta_slot));

    let mut loader = Loader::default();
    let v_load = load_file(
        &mut loader,
        &layout.path(FileKind::Vertex, v_slot),
        Unit::Data(FileKind::Vertex),
        &mut report,
    )?;
    report.files_loaded.push(file_name(FileKind::Vertex, v_slot));
    let e_load = load_file(
        &mut loader,
        &layout.path(FileKind::Edge, e_slot),
        Unit::Data(FileKind::Edge),
        &mut report,
    )?;
    report.files_loaded.push(file_name(FileKind::Edge, e_slot));
    let threshold = v_load
        .last_commit
        .unwrap_or(0)
        .min(e_load.last_commit.unwrap_or(0));

    let mut tx_order = [
        (Slot::A, head(FileKind::Tx, Slot::A)),
        (Slot::B, head(FileKind::Tx, Slot::B)),
    ];
    tx_order.sort_by_key(|(_, counter)| counter.unwrap_or(u64::MAX));
    let mut to_copy = Vec::new();
    for (slot, counter) in tx_order {
        match counter {
            None => report.recreated_files.push(file_name(FileKind::Tx, slot)),
            Some(counter) if counter < threshold => report.tx_logs_skipped += 1,
            Some(_) => {
                let load = load_file(
                    &mut loader,
                    &layout.path(FileKind::Tx, slot),
                    Unit::Tx,
                    &mut report,
                )?;
                report.files_loaded.push(file_name(FileKind::Tx, slot));
                report.transactions_replayed += load.units;
                if load.units > 0 {
                    to_copy.push(slot);
                }
            }
        }
    }

    report.records_applied = loader.applied;
    let last_seq = loader.last_seq;
    let state = loader.into_state(&defs, &mut report);

    for kind in [FileKind::Vertex, FileKind::Edge, FileKind::Meta] {
        let slot = active[&kind].other();
        if head(kind, slot).is_none() {
            DurableLog::create(layout.path(kind, slot), counters.next())?;
            report.recreated_files.push(file_name(kind, slot));
        }
    }

    let mut files = DataFiles {
        v: DurableLog::open_append(layout.path(FileKind::Vertex, v_slot))?,
        e: DurableLog::open_append(layout.path(FileKind::Edge, e_slot))?,
        layout,
        counters,
        v_slot,
        e_slot,
        meta_slot,
        last_marker: v_load.last_commit.max(e_load.last_commit).unwrap_or(0),
        lines: v_load.lines + e_load.lines,
    };
    if files.v_slot != files.e_slot {
        compaction::repair_slots(&mut files)?;
        report.slots_repaired = true;
    }

    let live = Settled { state: &state };
    let mut logs: [Option<DurableLog>; 2] = [None, None];
    for (slot, _) in tx_order {
        let path = files.layout.path(FileKind::Tx, slot);
        let log = if to_copy.contains(&slot) {
            let mut log = DurableLog::open_append(&path)?;
            compaction::copy_tx_log(&mut files, &mut log, &live)?;
            log
        } else {
            DurableLog::create(&path, files.counters.next())?
        };
        logs[slot.index()] = Some(log);
    }
    let [a, b] = logs;
    let missing = || BitsyError::Internal("tx log was not reopened".into());
    let tx_logs = [a.ok_or_else(missing)?, b.ok_or_else(missing)?];

    info!(
        dir = %files.layout.root().display(),
        vertices = state.vertices.len(),
        edges = state.edges.len(),
        replayed = report.transactions_replayed,
        warnings = report.has_warnings(),
        "recovery.loaded"
    );
    Ok(Recovered {
        state,
        last_seq,
        files,
        tx_logs,
        initial_slot: tx_order[0].0,
        report,
    })
}
