#![allow(missing_docs)]

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;

use bitsy::{GraphStore, PropertyValue, Result, StoreOptions, VertexId};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tempfile::tempdir;

const WRITERS: u64 = 4;
const OPS_PER_WRITER: u64 = 60;
const COUNTERS: usize = 5;

fn count_of(store: &GraphStore, id: VertexId) -> i64 {
    match store.get_vertex(id).and_then(|v| v.property("count").cloned()) {
        Some(PropertyValue::Int(n)) => n,
        _ => 0,
    }
}

fn increment(store: &GraphStore, id: VertexId, conflicts: &AtomicU64) -> Result<()> {
    loop {
        let mut tx = store.new_transaction();
        let current = match tx.get_vertex(id)?.and_then(|v| v.property("count").cloned()) {
            Some(PropertyValue::Int(n)) => n,
            _ => 0,
        };
        tx.set_vertex_property(id, "count", current + 1)?;
        match tx.commit() {
            Ok(()) => return Ok(()),
            Err(err) if err.is_retryable() => {
                conflicts.fetch_add(1, Ordering::Relaxed);
            }
            Err(err) => return Err(err),
        }
    }
}

#[test]
fn concurrent_writers_never_lose_increments() -> Result<()> {
    let dir = tempdir()?;
    let opts = StoreOptions::default()
        .tx_log_threshold(2048)
        .min_lines_per_reorg(64);
    let store = GraphStore::open(dir.path(), opts.clone())?;

    let mut tx = store.new_transaction();
    let counters: Vec<VertexId> = (0..COUNTERS)
        .map(|_| tx.add_vertex(Some("counter")))
        .collect::<Result<_>>()?;
    tx.commit()?;

    let conflicts = AtomicU64::new(0);
    let increments = AtomicU64::new(0);
    let done = AtomicBool::new(false);

    thread::scope(|scope| -> Result<()> {
        let reader = scope.spawn(|| -> Result<u64> {
            let mut checks = 0u64;
            while !done.load(Ordering::Acquire) {
                for edge in store.all_edges() {
                    assert!(store.get_vertex(edge.out_vertex).is_some());
                    assert!(store.get_vertex(edge.in_vertex).is_some());
                }
                checks += 1;
                thread::yield_now();
            }
            Ok(checks)
        });

        let writers: Vec<_> = (0..WRITERS)
            .map(|w| {
                let store = &store;
                let counters = &counters;
                let conflicts = &conflicts;
                let increments = &increments;
                scope.spawn(move || -> Result<()> {
                    let mut rng = StdRng::seed_from_u64(0xb175 + w);
                    for _ in 0..OPS_PER_WRITER {
                        let target = counters[rng.gen_range(0..counters.len())];
                        if rng.gen_bool(0.75) {
                            increment(store, target, conflicts)?;
                            increments.fetch_add(1, Ordering::Relaxed);
                        } else {
                            let other = counters[rng.gen_range(0..counters.len())];
                            let mut tx = store.new_transaction();
                            tx.add_edge(target, other, "touched")?;
                            tx.commit()?;
                        }
                    }
                    Ok(())
                })
            })
            .collect();

        for writer in writers {
            writer.join().expect("writer panicked")?;
        }
        done.store(true, Ordering::Release);
        let checks = reader.join().expect("reader panicked")?;
        assert!(checks > 0);
        Ok(())
    })?;

    let total: i64 = counters.iter().map(|id| count_of(&store, *id)).sum();
    assert_eq!(total as u64, increments.load(Ordering::Relaxed));
    let edges = store.all_edges().len() as u64;
    assert_eq!(
        edges + increments.load(Ordering::Relaxed),
        WRITERS * OPS_PER_WRITER
    );

    let mut before = store.all_vertices();
    before.sort_by_key(|v| v.id);
    store.shutdown()?;

    let store = GraphStore::open(dir.path(), opts)?;
    let mut after = store.all_vertices();
    after.sort_by_key(|v| v.id);
    assert_eq!(after, before);
    assert_eq!(store.all_edges().len() as u64, edges);
    Ok(())
}

#[test]
fn readers_see_whole_commits() -> Result<()> {
    let store = GraphStore::in_memory(StoreOptions::default().read_spin_limit(4))?;
    let mut tx = store.new_transaction();
    let a = tx.add_vertex(None)?;
    let b = tx.add_vertex(None)?;
    tx.set_vertex_property(a, "n", 0)?;
    tx.set_vertex_property(b, "n", 0)?;
    tx.commit()?;

    let done = AtomicBool::new(false);
    thread::scope(|scope| -> Result<()> {
        let reader = scope.spawn(|| {
            while !done.load(Ordering::Acquire) {
                // Both properties change in one commit, so a consistent view
                // always sees them equal.
                let all = store.all_vertices();
                let values: Vec<_> = all.iter().map(|v| v.property("n").cloned()).collect();
                assert_eq!(values.len(), 2);
                assert_eq!(values[0], values[1]);
            }
        });
        for n in 1..=200 {
            let mut tx = store.new_transaction();
            tx.set_vertex_property(a, "n", n)?;
            tx.set_vertex_property(b, "n", n)?;
            tx.commit()?;
        }
        done.store(true, Ordering::Release);
        reader.join().expect("reader panicked");
        Ok(())
    })?;
    assert_eq!(count_n(&store, a), 200);
    Ok(())
}

fn count_n(store: &GraphStore, id: VertexId) -> i64 {
    match store.get_vertex(id).and_then(|v| v.property("n").cloned()) {
        Some(PropertyValue::Int(n)) => n,
        _ => -1,
    }
}
