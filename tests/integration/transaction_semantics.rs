#![allow(missing_docs)]

use bitsy::storage::TxState;
use bitsy::{BitsyError, Dir, GraphStore, IsolationLevel, PropertyValue, Result, StoreOptions};
use tempfile::tempdir;

fn durable_store() -> Result<(tempfile::TempDir, GraphStore)> {
    let dir = tempdir()?;
    let store = GraphStore::open(dir.path(), StoreOptions::default())?;
    Ok((dir, store))
}

#[test]
fn update_of_concurrently_removed_vertex_conflicts() -> Result<()> {
    let (_dir, store) = durable_store()?;
    let mut tx = store.new_transaction();
    let a = tx.add_vertex(Some("person"))?;
    tx.commit()?;

    let mut remover = store.new_transaction();
    let mut updater = store.new_transaction();
    remover.remove_vertex(a)?;
    updater.set_vertex_property(a, "name", "ada")?;
    remover.commit()?;

    let err = updater.commit().unwrap_err();
    assert!(err.is_retryable(), "{err}");
    assert_eq!(updater.state(), TxState::Closed);
    assert!(store.get_vertex(a).is_none());
    Ok(())
}

#[test]
fn edge_to_concurrently_removed_vertex_conflicts() -> Result<()> {
    let (_dir, store) = durable_store()?;
    let mut tx = store.new_transaction();
    let a = tx.add_vertex(None)?;
    let b = tx.add_vertex(None)?;
    tx.commit()?;

    let mut linker = store.new_transaction();
    linker.add_edge(a, b, "knows")?;
    let mut remover = store.new_transaction();
    remover.remove_vertex(b)?;
    remover.commit()?;

    assert!(matches!(linker.commit(), Err(BitsyError::Conflict(_))));
    assert!(store.all_edges().is_empty());
    assert!(store.get_edges(a, Dir::Out, &[]).is_empty());
    Ok(())
}

#[test]
fn failed_commit_applies_nothing() -> Result<()> {
    let (_dir, store) = durable_store()?;
    let mut tx = store.new_transaction();
    let a = tx.add_vertex(None)?;
    tx.commit()?;

    let mut stale = store.new_transaction();
    stale.set_vertex_property(a, "n", 1)?;
    let fresh_vertex = stale.add_vertex(Some("new"))?;

    let mut winner = store.new_transaction();
    winner.set_vertex_property(a, "n", 2)?;
    winner.commit()?;

    assert!(stale.commit().is_err());
    assert!(store.get_vertex(fresh_vertex).is_none());
    assert_eq!(
        store.get_vertex(a).and_then(|v| v.property("n").cloned()),
        Some(PropertyValue::Int(2))
    );
    assert_eq!(store.stats().vertices, 1);
    Ok(())
}

#[test]
fn retry_after_conflict_succeeds() -> Result<()> {
    let (_dir, store) = durable_store()?;
    let mut tx = store.new_transaction();
    let a = tx.add_vertex(None)?;
    tx.set_vertex_property(a, "count", 0)?;
    tx.commit()?;

    let mut slow = store.new_transaction();
    slow.set_vertex_property(a, "count", 1)?;
    let mut fast = store.new_transaction();
    fast.set_vertex_property(a, "count", 1)?;
    fast.commit()?;

    let mut attempts = 0;
    loop {
        attempts += 1;
        let outcome = if attempts == 1 {
            slow.commit()
        } else {
            let mut retry = store.new_transaction();
            let current = match retry.get_vertex(a)?.and_then(|v| v.property("count").cloned()) {
                Some(PropertyValue::Int(n)) => n,
                _ => 0,
            };
            retry.set_vertex_property(a, "count", current + 1)?;
            retry.commit()
        };
        match outcome {
            Ok(()) => break,
            Err(err) if err.is_retryable() => continue,
            Err(err) => return Err(err),
        }
    }
    assert_eq!(attempts, 2);
    assert_eq!(
        store.get_vertex(a).and_then(|v| v.property("count").cloned()),
        Some(PropertyValue::Int(2))
    );
    Ok(())
}

#[test]
fn remove_vertex_cascades_to_committed_and_pending_edges() -> Result<()> {
    let (_dir, store) = durable_store()?;
    let mut tx = store.new_transaction();
    let hub = tx.add_vertex(Some("hub"))?;
    let left = tx.add_vertex(None)?;
    let right = tx.add_vertex(None)?;
    tx.add_edge(hub, left, "out")?;
    tx.add_edge(right, hub, "in")?;
    tx.commit()?;

    let mut tx = store.new_transaction();
    tx.add_edge(hub, right, "late")?;
    tx.remove_vertex(hub)?;
    assert!(tx.get_edges(left, Dir::In, &[])?.is_empty());
    assert!(tx.get_edges(right, Dir::Both, &[])?.is_empty());
    tx.commit()?;

    assert!(store.get_vertex(hub).is_none());
    assert!(store.all_edges().is_empty());
    assert_eq!(store.stats().vertices, 2);
    Ok(())
}

#[test]
fn read_committed_sees_new_edges_and_repeatable_read_keeps_vertex_snapshot() -> Result<()> {
    let (_dir, store) = durable_store()?;
    let mut tx = store.new_transaction();
    let a = tx.add_vertex(None)?;
    let b = tx.add_vertex(None)?;
    tx.set_vertex_property(a, "name", "a")?;
    tx.commit()?;

    let mut rc = store.new_transaction_with(IsolationLevel::ReadCommitted);
    let mut rr = store.new_transaction_with(IsolationLevel::RepeatableRead);
    assert!(rc.get_edges(a, Dir::Out, &[])?.is_empty());
    let pinned = rr.get_vertex(a)?.expect("vertex visible");

    let mut writer = store.new_transaction();
    writer.add_edge(a, b, "knows")?;
    writer.set_vertex_property(a, "name", "renamed")?;
    writer.commit()?;

    assert_eq!(rc.get_edges(a, Dir::Out, &["knows"])?.len(), 1);
    assert_eq!(rr.get_vertex(a)?, Some(pinned));
    assert_eq!(
        rc.get_vertex(a)?.and_then(|v| v.property("name").cloned()),
        Some(PropertyValue::from("renamed"))
    );
    Ok(())
}

#[test]
fn records_read_inside_a_transaction_outlive_it() -> Result<()> {
    let (_dir, store) = durable_store()?;
    let mut tx = store.new_transaction();
    let a = tx.add_vertex(Some("person"))?;
    tx.commit()?;

    let mut reader = store.new_transaction();
    let record = reader.get_vertex(a)?.expect("visible");
    reader.rollback()?;
    assert!(matches!(reader.get_vertex(a), Err(BitsyError::AccessOutsideScope)));
    assert_eq!(record.id, a);
    assert_eq!(record.label.as_deref(), Some("person"));
    Ok(())
}

#[test]
fn invalid_labels_and_keys_are_rejected_before_commit() -> Result<()> {
    let (_dir, store) = durable_store()?;
    let mut tx = store.new_transaction();
    let a = tx.add_vertex(None)?;
    let b = tx.add_vertex(None)?;
    assert!(tx.add_edge(a, b, "").unwrap_err().is_invalid_usage());
    assert!(tx.set_vertex_property(a, "", 1).unwrap_err().is_invalid_usage());
    tx.add_edge(a, b, "ok")?;
    tx.commit()?;
    assert_eq!(store.stats().edges, 1);
    Ok(())
}
