#![allow(missing_docs)]

use std::fs;
use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use bitsy::storage::CounterMetrics;
use bitsy::{
    Dir, EdgeRecord, GraphStore, PropertyValue, Result, StoreOptions, VertexId, VertexRecord,
};
use tempfile::tempdir;

fn eager_options() -> StoreOptions {
    StoreOptions::default()
        .tx_log_threshold(1)
        .reorg_factor(0.5)
        .min_lines_per_reorg(8)
}

fn snapshot(store: &GraphStore) -> (Vec<VertexRecord>, Vec<EdgeRecord>) {
    let mut vertices = store.all_vertices();
    vertices.sort_by_key(|v| v.id);
    let mut edges = store.all_edges();
    edges.sort_by_key(|e| e.id);
    (vertices, edges)
}

fn data_lines(dir: &Path) -> usize {
    ["vA.txt", "vB.txt", "eA.txt", "eB.txt"]
        .iter()
        .map(|name| {
            fs::read_to_string(dir.join(name))
                .map(|text| text.lines().count())
                .unwrap_or(0)
        })
        .sum()
}

fn ring(store: &GraphStore, size: usize) -> Result<Vec<VertexId>> {
    let mut tx = store.new_transaction();
    let mut ids = Vec::with_capacity(size);
    for n in 0..size {
        let id = tx.add_vertex(Some("node"))?;
        tx.set_vertex_property(id, "n", n as i64)?;
        ids.push(id);
    }
    for n in 0..size {
        let edge = tx.add_edge(ids[n], ids[(n + 1) % size], "next")?;
        tx.set_edge_property(edge, "hop", n as i64)?;
    }
    tx.commit()?;
    Ok(ids)
}

#[test]
fn repeated_updates_are_compacted_and_reload_identically() -> Result<()> {
    let dir = tempdir()?;
    let metrics = Arc::new(CounterMetrics::default());
    let store = GraphStore::open(dir.path(), eager_options().metrics(metrics.clone()))?;
    let ids = ring(&store, 6)?;

    let rounds = 40;
    for round in 0..rounds {
        let mut tx = store.new_transaction();
        for id in &ids {
            tx.set_vertex_property(*id, "round", round)?;
        }
        tx.commit()?;
    }
    store.flush_tx_log()?;

    let stats = store.stats();
    assert!(stats.tx_log_flushes >= rounds as u64, "{stats:?}");
    assert!(stats.reorgs >= 1, "{stats:?}");
    assert!(metrics.reorgs.load(Ordering::Relaxed) >= 1);
    assert!(metrics.reorg_lines_dropped.load(Ordering::Relaxed) > 0);
    // Every vertex line was rewritten 40 times; compaction keeps far fewer.
    assert!(data_lines(dir.path()) < ids.len() * rounds as usize);

    let before = snapshot(&store);
    store.shutdown()?;

    let store = GraphStore::open(dir.path(), eager_options())?;
    assert!(!store.recovery_report().has_warnings());
    assert_eq!(snapshot(&store), before);
    for id in &ids {
        let vertex = store.get_vertex(*id).expect("vertex survives compaction");
        assert_eq!(vertex.property("round"), Some(&PropertyValue::Int(rounds - 1)));
        assert_eq!(vertex.version, rounds as u64 + 1);
        assert_eq!(store.get_edges(*id, Dir::Out, &["next"]).len(), 1);
        assert_eq!(store.get_edges(*id, Dir::In, &["next"]).len(), 1);
    }
    Ok(())
}

#[test]
fn deleted_elements_stay_deleted_after_compaction() -> Result<()> {
    let dir = tempdir()?;
    let store = GraphStore::open(dir.path(), eager_options())?;
    let ids = ring(&store, 4)?;

    let mut tx = store.new_transaction();
    tx.remove_vertex(ids[0])?;
    tx.commit()?;
    for round in 0..20 {
        let mut tx = store.new_transaction();
        tx.set_vertex_property(ids[1], "round", round)?;
        tx.commit()?;
    }
    store.flush_tx_log()?;
    assert!(store.stats().reorgs >= 1);
    let before = snapshot(&store);
    assert_eq!(before.0.len(), 3);
    assert_eq!(before.1.len(), 2);
    store.shutdown()?;

    let store = GraphStore::open(dir.path(), eager_options())?;
    assert!(store.get_vertex(ids[0]).is_none());
    assert_eq!(snapshot(&store), before);
    Ok(())
}

#[test]
fn runtime_tuning_triggers_copies() -> Result<()> {
    let dir = tempdir()?;
    let store = GraphStore::open(dir.path(), StoreOptions::default())?;
    ring(&store, 3)?;
    store.flush_tx_log()?;
    let baseline = store.stats().tx_log_flushes;

    store.set_tx_log_threshold(1);
    store.set_min_lines_per_reorg(1);
    store.set_reorg_factor(0.0)?;
    assert!(store.set_reorg_factor(f64::NAN).is_err());
    ring(&store, 3)?;
    store.flush_tx_log()?;
    let stats = store.stats();
    assert!(stats.tx_log_flushes > baseline);
    assert!(stats.reorgs >= 1);
    Ok(())
}
