//! Store connection and row bookkeeping tests.

mod common;

use common::*;
use feesim_core::store::FeeStore;
use std::path::PathBuf;

fn temp_db(tag: &str) -> PathBuf {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    std::env::temp_dir().join(format!("feesim_{tag}_{}_{nanos}.db", std::process::id()))
}

fn remove_db(path: &PathBuf) {
    for suffix in ["", "-wal", "-shm"] {
        let _ = std::fs::remove_file(format!("{}{suffix}", path.display()));
    }
}

#[test]
fn reopened_file_store_sees_the_same_rows() {
    let path = temp_db("reopen");
    {
        let store = FeeStore::open(path.to_str().unwrap()).unwrap();
        store.migrate().unwrap();
        store
            .insert_rows(&[row(1, "P1", "X", 2.0, &[(0, 100.0)]), row(2, "P2", "Y", 1.0, &[])])
            .unwrap();

        let second = store.reopen().unwrap();
        assert_eq!(second.path(), store.path());
        assert_eq!(second.row_count().unwrap(), 2);
        let rows = second.rows_by_ids(&[1]).unwrap();
        assert_eq!(rows[0].fees[0], 100.0);
    }
    remove_db(&path);
}

#[test]
fn reopened_memory_store_is_isolated() {
    let calc = three_row_calculator();
    let other = calc.store.reopen().unwrap();
    assert!(other.path().is_none());
    other.migrate().unwrap();
    assert_eq!(other.row_count().unwrap(), 0);
}

#[test]
fn max_row_id_follows_gaps() {
    let calc = calculator();
    assert_eq!(calc.store.max_row_id().unwrap(), 0);
    calc.store
        .insert_rows(&[row(3, "P1", "X", 1.0, &[]), row(10, "P1", "X", 1.0, &[])])
        .unwrap();

    assert_eq!(calc.store.row_count().unwrap(), 2);
    assert_eq!(calc.store.max_row_id().unwrap(), 10);
    // Appending after the highest id never collides, whatever the count.
    let next = calc.store.max_row_id().unwrap() + 1;
    calc.store.insert_row(&row(next, "P2", "Y", 1.0, &[])).unwrap();
    assert_eq!(calc.store.row_count().unwrap(), 3);
}
