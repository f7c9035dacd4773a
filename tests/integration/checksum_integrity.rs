#![allow(missing_docs)]

use std::fs;
use std::path::{Path, PathBuf};

use bitsy::admin::{verify, VerifyLevel};
use bitsy::{BitsyError, GraphStore, Result, StoreOptions};
use proptest::prelude::*;
use proptest::sample::Index;
use tempfile::{tempdir, TempDir};

fn populated_db() -> Result<TempDir> {
    let dir = tempdir()?;
    let store = GraphStore::open(dir.path(), StoreOptions::default())?;
    for batch in 0..3 {
        let mut tx = store.new_transaction();
        for n in 0..4 {
            let id = tx.add_vertex(Some("person"))?;
            tx.set_vertex_property(id, "name", format!("user-{batch}-{n}"))?;
        }
        tx.commit()?;
        store.flush_tx_log()?;
    }
    store.shutdown()?;
    Ok(dir)
}

fn header_counter(path: &Path) -> u64 {
    fs::read_to_string(path)
        .ok()
        .and_then(|text| {
            let first = text.lines().next()?.to_string();
            let body = first.strip_prefix("H=")?;
            body.split('#').next()?.parse().ok()
        })
        .unwrap_or(u64::MAX)
}

fn active_vertex_file(dir: &Path) -> PathBuf {
    let a = dir.join("vA.txt");
    let b = dir.join("vB.txt");
    if header_counter(&a) <= header_counter(&b) {
        a
    } else {
        b
    }
}

/// Replaces one payload character of a line that is neither the header nor
/// the final line. Returns the 1-based line number that was damaged.
fn damage_line(path: &Path, line_pick: Index, char_pick: Index) -> usize {
    let text = fs::read_to_string(path).unwrap();
    let mut lines: Vec<String> = text.lines().map(str::to_owned).collect();
    assert!(lines.len() >= 3, "need a middle line to damage");
    let target = 1 + line_pick.index(lines.len() - 2);
    let line = &mut lines[target];
    let hash = line.rfind('#').unwrap();
    let pos = 2 + char_pick.index(hash - 2);
    let original = line.as_bytes()[pos];
    let replacement = if original == b'Q' { 'R' } else { 'Q' };
    line.replace_range(pos..pos + 1, &replacement.to_string());
    let mut out = lines.join("\n");
    out.push('\n');
    fs::write(path, out).unwrap();
    target + 1
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn damaged_middle_line_is_reported_with_its_line_number(
        line_pick in any::<Index>(),
        char_pick in any::<Index>(),
    ) {
        let dir = populated_db().unwrap();
        let path = active_vertex_file(dir.path());
        let damaged = damage_line(&path, line_pick, char_pick);

        let report = verify(dir.path(), VerifyLevel::Full).unwrap();
        prop_assert!(!report.success);
        let expected = format!("line {damaged}:");
        prop_assert!(
            report.findings.iter().any(|f| f.message.contains(&expected)),
            "{:?}",
            report.findings
        );

        match GraphStore::open(dir.path(), StoreOptions::default()) {
            Err(BitsyError::CorruptLine { file, line, .. }) => {
                prop_assert_eq!(line, damaged);
                prop_assert_eq!(file.file_name(), path.file_name());
            }
            Err(other) => prop_assert!(false, "unexpected error {other}"),
            Ok(_) => prop_assert!(false, "damaged database opened"),
        }
    }
}

#[test]
fn damaged_final_line_is_truncated_not_fatal() -> Result<()> {
    let dir = populated_db()?;
    let path = active_vertex_file(dir.path());
    let text = fs::read_to_string(&path)?;
    let cut = text.trim_end_matches('\n');
    let torn = &cut[..cut.len() - 3];
    fs::write(&path, torn)?;

    let store = GraphStore::open(dir.path(), StoreOptions::default())?;
    let report = store.recovery_report();
    assert!(report.has_warnings());
    assert_eq!(report.truncations.len(), 1);
    assert!(report.truncations[0].file.starts_with('v'));
    // The last copy lost its log marker, so only the first two batches remain.
    assert_eq!(store.stats().vertices, 8);
    Ok(())
}
