#![allow(missing_docs)]

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use bitsy::primitives::log::{encode_line, RecordType};
use bitsy::storage::codec::encode_vertex;
use bitsy::{GraphStore, Result, StoreOptions, VertexId, VertexRecord};
use tempfile::{tempdir, TempDir};

const ALL_FILES: [&str; 8] = [
    "txA.txt", "txB.txt", "vA.txt", "vB.txt", "eA.txt", "eB.txt", "metaA.txt", "metaB.txt",
];

fn header_counter(path: &Path) -> Option<u64> {
    let text = fs::read_to_string(path).ok()?;
    let first = text.lines().next()?;
    first.strip_prefix("H=")?.split('#').next()?.parse().ok()
}

fn lower_of(dir: &Path, a: &str, b: &str) -> PathBuf {
    let (pa, pb) = (dir.join(a), dir.join(b));
    match (header_counter(&pa), header_counter(&pb)) {
        (Some(x), Some(y)) if y < x => pb,
        (None, Some(_)) => pb,
        _ => pa,
    }
}

fn line_count(path: &Path) -> usize {
    fs::read_to_string(path)
        .map(|text| text.lines().count())
        .unwrap_or(0)
}

fn filled_tx_log(dir: &Path) -> PathBuf {
    let (a, b) = (dir.join("txA.txt"), dir.join("txB.txt"));
    if line_count(&a) >= line_count(&b) {
        a
    } else {
        b
    }
}

fn append(path: &Path, text: &str) -> Result<()> {
    let mut file = OpenOptions::new().append(true).open(path)?;
    file.write_all(text.as_bytes())?;
    file.sync_all()?;
    Ok(())
}

fn stray_vertex_line() -> (VertexId, String) {
    let vertex = VertexRecord::new(VertexId::random(), Some("ghost".into()));
    (vertex.id, encode_vertex(&vertex).expect("encode vertex"))
}

/// A store with one flushed commit and one commit still in its Tx log.
fn two_commit_db() -> Result<(TempDir, VertexId, VertexId)> {
    let dir = tempdir()?;
    let store = GraphStore::open(dir.path(), StoreOptions::default())?;
    let mut tx = store.new_transaction();
    let flushed = tx.add_vertex(Some("flushed"))?;
    tx.commit()?;
    store.flush_tx_log()?;
    let mut tx = store.new_transaction();
    let logged = tx.add_vertex(Some("logged"))?;
    tx.commit()?;
    store.shutdown()?;
    Ok((dir, flushed, logged))
}

#[test]
fn transaction_without_boundary_is_discarded() -> Result<()> {
    let (dir, flushed, logged) = two_commit_db()?;
    let (ghost, line) = stray_vertex_line();
    let tx_log = filled_tx_log(dir.path());
    append(&tx_log, &line)?;

    let store = GraphStore::open(dir.path(), StoreOptions::default())?;
    let report = store.recovery_report().clone();
    assert_eq!(report.truncations.len(), 1);
    assert!(report.truncations[0].reason.contains("incomplete transaction"));
    assert_eq!(
        Some(report.truncations[0].file.as_str()),
        tx_log.file_name().and_then(|n| n.to_str())
    );
    assert!(store.get_vertex(flushed).is_some());
    assert!(store.get_vertex(logged).is_some());
    assert!(store.get_vertex(ghost).is_none());
    store.shutdown()?;

    // The cut is permanent; the next open has nothing left to repair.
    let store = GraphStore::open(dir.path(), StoreOptions::default())?;
    assert!(!store.recovery_report().has_warnings());
    assert_eq!(store.stats().vertices, 2);
    Ok(())
}

#[test]
fn torn_final_tx_line_keeps_earlier_transactions() -> Result<()> {
    let (dir, flushed, logged) = two_commit_db()?;
    let (_, line) = stray_vertex_line();
    let tx_log = filled_tx_log(dir.path());
    let torn = &line[..line.len() / 2];
    append(&tx_log, torn)?;

    let store = GraphStore::open(dir.path(), StoreOptions::default())?;
    let report = store.recovery_report();
    assert_eq!(report.truncations.len(), 1);
    assert_eq!(report.transactions_replayed, 1);
    assert!(store.get_vertex(flushed).is_some());
    assert!(store.get_vertex(logged).is_some());
    Ok(())
}

#[test]
fn incomplete_copy_into_vertex_file_is_cut_at_last_marker() -> Result<()> {
    let (dir, flushed, logged) = two_commit_db()?;
    let (ghost, line) = stray_vertex_line();
    let v_file = lower_of(dir.path(), "vA.txt", "vB.txt");
    let before = fs::metadata(&v_file)?.len();
    append(&v_file, &line)?;
    append(&v_file, &encode_line(RecordType::TxBoundary, "99"))?;

    let store = GraphStore::open(dir.path(), StoreOptions::default())?;
    let report = store.recovery_report();
    assert_eq!(report.truncations.len(), 1);
    assert_eq!(report.truncations[0].offset, before);
    assert!(report.truncations[0].reason.contains("incomplete copy"));
    assert!(store.get_vertex(ghost).is_none());
    assert!(store.get_vertex(flushed).is_some());
    assert!(store.get_vertex(logged).is_some());
    Ok(())
}

#[test]
fn interrupted_reorg_is_repaired() -> Result<()> {
    let dir = tempdir()?;
    let ids = {
        let store = GraphStore::open(dir.path(), StoreOptions::default())?;
        let mut tx = store.new_transaction();
        let a = tx.add_vertex(None)?;
        let b = tx.add_vertex(None)?;
        let e = tx.add_edge(a, b, "knows")?;
        tx.commit()?;
        store.flush_tx_log()?;
        store.shutdown()?;
        (a, b, e)
    };

    // Move the vertex file to its other slot the way a reorg does, and stop
    // before the edge file follows.
    let active = lower_of(dir.path(), "vA.txt", "vB.txt");
    let other = if active.ends_with("vA.txt") {
        dir.path().join("vB.txt")
    } else {
        dir.path().join("vA.txt")
    };
    let next = ALL_FILES
        .iter()
        .filter_map(|name| header_counter(&dir.path().join(name)))
        .max()
        .unwrap_or(0)
        + 1;
    let text = fs::read_to_string(&active)?;
    let body: String = text.lines().skip(1).map(|l| format!("{l}\n")).collect();
    fs::write(&other, encode_line(RecordType::Header, &next.to_string()) + &body)?;
    fs::write(&active, encode_line(RecordType::Header, &(next + 1).to_string()))?;

    let store = GraphStore::open(dir.path(), StoreOptions::default())?;
    assert!(store.recovery_report().slots_repaired);
    assert!(store.get_vertex(ids.0).is_some());
    assert!(store.get_vertex(ids.1).is_some());
    assert!(store.get_edge(ids.2).is_some());
    store.shutdown()?;

    let store = GraphStore::open(dir.path(), StoreOptions::default())?;
    assert!(!store.recovery_report().slots_repaired);
    assert_eq!(store.stats().edges, 1);
    Ok(())
}

#[test]
fn unreadable_inactive_file_is_recreated() -> Result<()> {
    let (dir, flushed, _) = two_commit_db()?;
    let active = lower_of(dir.path(), "metaA.txt", "metaB.txt");
    let inactive_name = if active.ends_with("metaA.txt") {
        "metaB.txt"
    } else {
        "metaA.txt"
    };
    fs::write(dir.path().join(inactive_name), "not a header\n")?;

    let store = GraphStore::open(dir.path(), StoreOptions::default())?;
    assert_eq!(
        store.recovery_report().recreated_files,
        vec![inactive_name.to_string()]
    );
    assert!(store.get_vertex(flushed).is_some());
    Ok(())
}

#[test]
fn both_vertex_files_unreadable_is_fatal() -> Result<()> {
    let (dir, _, _) = two_commit_db()?;
    fs::write(dir.path().join("vA.txt"), "junk\n")?;
    fs::write(dir.path().join("vB.txt"), "junk\n")?;
    let err = GraphStore::open(dir.path(), StoreOptions::default())
        .err()
        .expect("open must fail");
    assert!(err.is_corruption(), "{err}");
    Ok(())
}
