#![allow(missing_docs)]

use std::error::Error;
use std::fs;

use bitsy::admin::{self, AdminError, VerifyLevel};
use bitsy::{Dir, ElementKind, GraphStore, PropertyValue, Result, StoreOptions};
use tempfile::tempdir;

type TestResult = std::result::Result<(), Box<dyn Error>>;

#[test]
fn backup_opens_with_data_and_indexes_committed_before_it() -> TestResult {
    let dir = tempdir()?;
    let target_root = tempdir()?;
    let target = target_root.path().join("copy");

    let store = GraphStore::open(dir.path(), StoreOptions::default())?;
    store.create_key_index(ElementKind::Vertex, "name")?;
    let mut tx = store.new_transaction();
    let ada = tx.add_vertex(Some("person"))?;
    let bob = tx.add_vertex(Some("person"))?;
    tx.set_vertex_property(ada, "name", "ada")?;
    tx.set_vertex_property(bob, "name", "bob")?;
    let knows = tx.add_edge(ada, bob, "knows")?;
    tx.commit()?;

    // Still in the Tx log; backup must flush it first.
    let mut tx = store.new_transaction();
    tx.set_edge_property(knows, "since", 1843)?;
    tx.commit()?;

    store.backup(&target)?;

    let mut tx = store.new_transaction();
    let late = tx.add_vertex(Some("person"))?;
    tx.commit()?;
    store.shutdown()?;

    let report = admin::verify(&target, VerifyLevel::Full)?;
    assert!(report.success, "{:?}", report.findings);

    let copy = GraphStore::open(&target, StoreOptions::default().allow_full_graph_scans(false))?;
    assert!(copy.get_vertex(late).is_none());
    assert_eq!(copy.stats().vertices, 2);
    let edges = copy.get_edges(ada, Dir::Out, &["knows"]);
    assert_eq!(edges.len(), 1);
    assert_eq!(edges[0].property("since"), Some(&PropertyValue::Int(1843)));
    assert_eq!(edges[0].version, 2);
    assert_eq!(copy.indexed_keys(ElementKind::Vertex), vec!["name".to_string()]);
    let hits = copy.lookup_vertices("name", &PropertyValue::from("bob"))?;
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].id, bob);
    assert!(!copy.recovery_report().has_warnings());
    Ok(())
}

#[test]
fn backup_requires_an_empty_target() -> Result<()> {
    let dir = tempdir()?;
    let target = tempdir()?;
    fs::write(target.path().join("notes.txt"), "keep me")?;
    let store = GraphStore::open(dir.path(), StoreOptions::default())?;
    let err = store.backup(target.path()).unwrap_err();
    assert!(err.is_invalid_usage(), "{err}");
    assert_eq!(fs::read_to_string(target.path().join("notes.txt"))?, "keep me");
    Ok(())
}

#[test]
fn admin_backup_of_a_closed_database() -> TestResult {
    let dir = tempdir()?;
    let target_root = tempdir()?;
    let target = target_root.path().join("offline");
    {
        let store = GraphStore::open(dir.path(), StoreOptions::default())?;
        let mut tx = store.new_transaction();
        tx.add_vertex(None)?;
        tx.add_vertex(None)?;
        tx.commit()?;
    }

    let report = admin::backup(dir.path(), &target, StoreOptions::default())?;
    assert_eq!(report.vertices, 2);
    assert_eq!(report.target.as_deref(), Some(target.display().to_string().as_str()));

    let copy = GraphStore::open(&target, StoreOptions::default())?;
    assert_eq!(copy.stats().vertices, 2);

    assert!(matches!(
        admin::backup(dir.path(), dir.path(), StoreOptions::default()),
        Err(AdminError::BackupIntoSource(_))
    ));
    let missing = target_root.path().join("nothing-here");
    assert!(matches!(
        admin::backup(&missing, target_root.path().join("x"), StoreOptions::default()),
        Err(AdminError::MissingDatabase(_))
    ));
    Ok(())
}
