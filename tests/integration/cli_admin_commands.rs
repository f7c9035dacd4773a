#![allow(missing_docs)]

use std::fs;
use std::path::PathBuf;

use assert_cmd::cargo::cargo_bin_cmd;
use bitsy::{ElementKind, GraphStore, StoreOptions};
use serde_json::Value;
use tempfile::TempDir;

fn setup_db(name: &str) -> (TempDir, PathBuf) {
    let dir = tempfile::tempdir().expect("tempdir");
    let db_path = dir.path().join(name);
    let store = GraphStore::open(&db_path, StoreOptions::default()).expect("open");
    store
        .create_key_index(ElementKind::Vertex, "name")
        .expect("index");
    let mut tx = store.new_transaction();
    let ada = tx.add_vertex(Some("person")).expect("vertex");
    let grace = tx.add_vertex(Some("person")).expect("vertex");
    tx.set_vertex_property(ada, "name", "Ada").expect("prop");
    tx.set_vertex_property(grace, "name", "Grace").expect("prop");
    tx.add_edge(ada, grace, "follows").expect("edge");
    tx.commit().expect("commit");
    store.shutdown().expect("shutdown");
    (dir, db_path)
}

#[test]
fn stats_json_reports_counts_and_indexes() {
    let (_dir, db_path) = setup_db("stats");
    let output = cargo_bin_cmd!("bitsy")
        .args(["--format", "json", "stats"])
        .arg(&db_path)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let json: Value = serde_json::from_slice(&output).expect("valid json");
    assert_eq!(json["store"]["vertices"], 2);
    assert_eq!(json["store"]["edges"], 1);
    assert_eq!(json["vertex_indexes"][0], "name");
    assert_eq!(json["recovery"]["transactions_replayed"], 1);
    assert_eq!(json["files"].as_array().map(Vec::len), Some(8));
}

#[test]
fn verify_full_succeeds_on_clean_database() {
    let (_dir, db_path) = setup_db("verify");
    let output = cargo_bin_cmd!("bitsy")
        .args(["--format", "json", "verify", "--level", "full"])
        .arg(&db_path)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let json: Value = serde_json::from_slice(&output).expect("valid json");
    assert_eq!(json["success"], true);
    assert_eq!(json["level"], "full");
}

#[test]
fn verify_exits_with_two_on_corruption() {
    let (_dir, db_path) = setup_db("corrupt");
    fs::write(db_path.join("vA.txt"), "junk\n").expect("write");
    fs::write(db_path.join("vB.txt"), "junk\n").expect("write");
    cargo_bin_cmd!("bitsy")
        .args(["verify"])
        .arg(&db_path)
        .assert()
        .code(2);
}

#[test]
fn flush_then_backup_produces_an_openable_copy() {
    let (dir, db_path) = setup_db("source");
    cargo_bin_cmd!("bitsy")
        .args(["flush"])
        .arg(&db_path)
        .assert()
        .success();

    let target = dir.path().join("copy");
    cargo_bin_cmd!("bitsy")
        .args(["backup"])
        .arg(&db_path)
        .arg(&target)
        .assert()
        .success();

    let copy = GraphStore::open(&target, StoreOptions::default()).expect("open copy");
    assert_eq!(copy.stats().vertices, 2);
    assert_eq!(copy.stats().edges, 1);
    assert_eq!(copy.indexed_keys(ElementKind::Vertex), vec!["name".to_string()]);
}

#[test]
fn seed_populates_a_new_database() {
    let dir = tempfile::tempdir().expect("tempdir");
    let db_path = dir.path().join("seeded");
    let output = cargo_bin_cmd!("bitsy")
        .args(["--format", "json", "seed", "--users", "25", "--batch", "10"])
        .arg(&db_path)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let json: Value = serde_json::from_slice(&output).expect("valid json");
    assert_eq!(json["vertices"], 25);

    let store = GraphStore::open(&db_path, StoreOptions::default()).expect("open");
    assert_eq!(store.stats().vertices, 25);
}

#[test]
fn missing_database_is_an_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    cargo_bin_cmd!("bitsy")
        .args(["stats"])
        .arg(dir.path().join("absent"))
        .assert()
        .failure();
}

#[test]
fn config_file_overrides_are_validated() {
    let (dir, db_path) = setup_db("config");
    let config = dir.path().join("bitsy.toml");
    fs::write(&config, "tx_log_threshold = 0\n").expect("write config");
    cargo_bin_cmd!("bitsy")
        .args(["--config"])
        .arg(&config)
        .args(["stats"])
        .arg(&db_path)
        .assert()
        .failure();

    fs::write(&config, "tx_log_threshold = 4096\nreorg_factor = 2.0\n").expect("write config");
    cargo_bin_cmd!("bitsy")
        .args(["--config"])
        .arg(&config)
        .args(["stats"])
        .arg(&db_path)
        .assert()
        .success();
}
