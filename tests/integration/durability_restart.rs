#![allow(missing_docs)]

use std::fs;
use std::path::PathBuf;
use std::process::{abort, Command};

use bitsy::{BitsyError, Dir, GraphStore, PropertyValue, Result, StoreOptions, VertexId};
use tempfile::tempdir;

const DB_ENV: &str = "BITSY_CRASH_DB_PATH";

fn large_threshold() -> StoreOptions {
    StoreOptions::default().tx_log_threshold(64 * 1024 * 1024)
}

#[test]
fn acknowledged_commit_survives_process_abort() -> Result<()> {
    let dir = tempdir()?;
    let db_path = dir.path().join("graph");

    // The child commits version 1, copies it into the V file, commits
    // version 2 and aborts without shutting the store down.
    let child_status = Command::new(std::env::current_exe()?)
        .env(DB_ENV, &db_path)
        .arg("--nocapture")
        .arg("--ignored")
        .arg("--exact")
        .arg("crash_child_abort_after_commit")
        .status()?;
    assert!(!child_status.success(), "child should abort");

    let id_text = fs::read_to_string(db_path.join("vertex-id"))?;
    let id = VertexId(id_text.trim().parse().map_err(|_| BitsyError::Internal("bad id".into()))?);

    let store = GraphStore::open(&db_path, large_threshold())?;
    let vertex = store.get_vertex(id).expect("vertex recovered");
    assert_eq!(vertex.version, 2);
    assert_eq!(vertex.property("name"), Some(&PropertyValue::from("ada lovelace")));
    assert_eq!(store.recovery_report().transactions_replayed, 1);
    store.shutdown()?;

    let store = GraphStore::open(&db_path, large_threshold())?;
    assert_eq!(store.get_vertex(id).map(|v| v.version), Some(2));
    assert_eq!(store.recovery_report().transactions_replayed, 0);
    Ok(())
}

#[test]
#[ignore]
fn crash_child_abort_after_commit() -> Result<()> {
    let Ok(path) = std::env::var(DB_ENV) else {
        return Ok(());
    };
    let db_path = PathBuf::from(path);
    let store = GraphStore::open(&db_path, large_threshold())?;

    let mut tx = store.new_transaction();
    let id = tx.add_vertex(Some("person"))?;
    tx.set_vertex_property(id, "name", "ada")?;
    tx.commit()?;
    store.flush_tx_log()?;

    let mut tx = store.new_transaction();
    tx.set_vertex_property(id, "name", "ada lovelace")?;
    tx.commit()?;

    fs::write(db_path.join("vertex-id"), id.to_string())?;
    abort();
}

#[test]
fn unflushed_commits_are_replayed_once() -> Result<()> {
    let dir = tempdir()?;
    let (a, b) = {
        let store = GraphStore::open(dir.path(), large_threshold())?;
        let mut tx = store.new_transaction();
        let a = tx.add_vertex(Some("person"))?;
        let b = tx.add_vertex(Some("person"))?;
        tx.add_edge(a, b, "knows")?;
        tx.commit()?;

        let mut tx = store.new_transaction();
        tx.set_vertex_property(b, "age", 36)?;
        tx.commit()?;
        store.shutdown()?;
        (a, b)
    };

    let store = GraphStore::open(dir.path(), large_threshold())?;
    assert_eq!(store.recovery_report().transactions_replayed, 2);
    assert_eq!(store.get_edges(a, Dir::Out, &["knows"]).len(), 1);
    assert_eq!(
        store.get_vertex(b).and_then(|v| v.property("age").cloned()),
        Some(PropertyValue::Int(36))
    );
    store.shutdown()?;

    let store = GraphStore::open(dir.path(), large_threshold())?;
    let report = store.recovery_report();
    assert_eq!(report.transactions_replayed, 0);
    assert!(!report.has_warnings());
    assert_eq!(store.stats().vertices, 2);
    assert_eq!(store.stats().edges, 1);
    Ok(())
}

#[test]
fn removals_persist_across_flushes_and_restarts() -> Result<()> {
    let dir = tempdir()?;
    let (kept, removed) = {
        let store = GraphStore::open(dir.path(), StoreOptions::default())?;
        let mut tx = store.new_transaction();
        let kept = tx.add_vertex(None)?;
        let removed = tx.add_vertex(None)?;
        tx.add_edge(kept, removed, "x")?;
        tx.commit()?;
        store.flush_tx_log()?;

        let mut tx = store.new_transaction();
        tx.remove_vertex(removed)?;
        tx.commit()?;
        store.flush_tx_log()?;
        store.shutdown()?;
        (kept, removed)
    };

    let store = GraphStore::open(dir.path(), StoreOptions::default())?;
    assert!(store.get_vertex(kept).is_some());
    assert!(store.get_vertex(removed).is_none());
    assert!(store.get_edges(kept, Dir::Both, &[]).is_empty());
    assert!(store.all_edges().is_empty());
    Ok(())
}

#[test]
fn sequence_numbers_continue_after_restart() -> Result<()> {
    let dir = tempdir()?;
    let id = {
        let store = GraphStore::open(dir.path(), StoreOptions::default())?;
        let mut tx = store.new_transaction();
        let id = tx.add_vertex(None)?;
        tx.commit()?;
        let mut tx = store.new_transaction();
        tx.set_vertex_property(id, "n", 1)?;
        tx.commit()?;
        assert_eq!(store.stats().seq, 2);
        id
    };

    let store = GraphStore::open(dir.path(), StoreOptions::default())?;
    assert!(store.stats().seq >= 2);
    let mut tx = store.new_transaction();
    tx.set_vertex_property(id, "n", 2)?;
    tx.commit()?;
    assert_eq!(store.get_vertex(id).map(|v| v.version), Some(3));
    Ok(())
}
