use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{debug, info, warn};

use crate::primitives::buffer::Slot;
use crate::primitives::log::{read_counter, DurableLog};
use crate::storage::codec;
use crate::types::{BitsyError, Result};

/// Role of a file pair in a database directory.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub(crate) enum FileKind {
    Tx,
    Vertex,
    Edge,
    Meta,
}

impl FileKind {
    pub(crate) const ALL: [FileKind; 4] =
        [FileKind::Tx, FileKind::Vertex, FileKind::Edge, FileKind::Meta];

    fn prefix(self) -> &'static str {
        match self {
            FileKind::Tx => "tx",
            FileKind::Vertex => "v",
            FileKind::Edge => "e",
            FileKind::Meta => "meta",
        }
    }
}

impl fmt::Display for FileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

/// File name of `kind` in `slot`, e.g. `vA.txt`.
pub(crate) fn file_name(kind: FileKind, slot: Slot) -> String {
    format!("{}{}.txt", kind.prefix(), slot)
}

/// Paths of the eight files in one database directory.
#[derive(Clone, Debug)]
pub(crate) struct DirLayout {
    root: PathBuf,
}

impl DirLayout {
    pub(crate) fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub(crate) fn root(&self) -> &Path {
        &self.root
    }

    pub(crate) fn path(&self, kind: FileKind, slot: Slot) -> PathBuf {
        self.root.join(file_name(kind, slot))
    }

    pub(crate) fn all(&self) -> impl Iterator<Item = (FileKind, Slot, PathBuf)> + '_ {
        FileKind::ALL.into_iter().flat_map(move |kind| {
            [Slot::A, Slot::B]
                .into_iter()
                .map(move |slot| (kind, slot, self.path(kind, slot)))
        })
    }

    /// True when none of the database files exist yet.
    pub(crate) fn is_uninitialized(&self) -> bool {
        self.all().all(|(_, _, path)| !path.exists())
    }
}

/// Monotonic source of header counters for one directory.
#[derive(Debug)]
pub(crate) struct CounterSeq {
    next: AtomicU64,
}

impl CounterSeq {
    /// Starts handing out counters above `max_seen`.
    pub(crate) fn starting_after(max_seen: u64) -> Self {
        Self {
            next: AtomicU64::new(max_seen + 1),
        }
    }

    pub(crate) fn next(&self) -> u64 {
        self.next.fetch_add(1, Ordering::AcqRel)
    }
}

/// Header counter of `path`, or `None` when the file is missing or its
/// header is unreadable.
pub(crate) fn header_counter(path: &Path) -> Result<Option<u64>> {
    if !path.exists() {
        return Ok(None);
    }
    match read_counter(path) {
        Ok(counter) => Ok(Some(counter)),
        Err(err) if err.is_corruption() => {
            warn!(path = %path.display(), error = %err, "files.header.unreadable");
            Ok(None)
        }
        Err(err) => Err(err),
    }
}

/// The active member of a V, E or meta pair: the readable one with the lower counter.
pub(crate) fn active_slot(
    layout: &DirLayout,
    kind: FileKind,
    a: Option<u64>,
    b: Option<u64>,
) -> Result<Slot> {
    match (a, b) {
        (Some(a), Some(b)) => Ok(if a <= b { Slot::A } else { Slot::B }),
        (Some(_), None) => Ok(Slot::A),
        (None, Some(_)) => Ok(Slot::B),
        (None, None) => Err(BitsyError::Corruption(format!(
            "no readable {kind} file in {}",
            layout.root().display()
        ))),
    }
}

/// Writes a complete file: header with `counter`, then `body`, then sync.
pub(crate) fn write_file(path: &Path, counter: u64, body: &[String]) -> Result<DurableLog> {
    let mut log = DurableLog::create(path, counter)?;
    for line in body {
        log.append_encoded(line)?;
    }
    log.commit()?;
    Ok(log)
}

/// Replaces the content of a pair by writing `body` into `target` with a
/// fresh counter and then resetting the other slot to a bare header with a
/// higher counter. Until the reset lands the old slot stays the lower one.
pub(crate) fn rewrite_pair(
    layout: &DirLayout,
    counters: &CounterSeq,
    kind: FileKind,
    target: Slot,
    body: &[String],
) -> Result<DurableLog> {
    let counter = counters.next();
    let log = write_file(&layout.path(kind, target), counter, body)?;
    let reset = counters.next();
    DurableLog::create(layout.path(kind, target.other()), reset)?;
    debug!(
        kind = %kind,
        slot = %target,
        counter,
        lines = body.len(),
        "files.rewrite_pair"
    );
    Ok(log)
}

/// Every record after the header, re-encoded. Fails on any bad line.
pub(crate) fn read_body(path: &Path) -> Result<Vec<String>> {
    let mut log = DurableLog::open_read(path)?;
    let mut body = Vec::new();
    while let Some(record) = log.read_record()? {
        body.push(record.encode());
    }
    Ok(body)
}

/// Creates the eight files of a fresh database directory.
pub(crate) fn bootstrap(layout: &DirLayout) -> Result<()> {
    std::fs::create_dir_all(layout.root())?;
    for kind in [FileKind::Tx, FileKind::Vertex, FileKind::Edge] {
        write_file(&layout.path(kind, Slot::A), 1, &[])?;
        write_file(&layout.path(kind, Slot::B), 2, &[])?;
    }
    write_file(
        &layout.path(FileKind::Meta, Slot::A),
        1,
        &[codec::encode_major_version()],
    )?;
    write_file(&layout.path(FileKind::Meta, Slot::B), 2, &[])?;
    info!(dir = %layout.root().display(), "files.bootstrap");
    Ok(())
}
