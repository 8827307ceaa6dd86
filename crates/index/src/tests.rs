use std::sync::Arc;

use common::{DbError, Iid, Rid};
use pretty_assertions::assert_eq;
use storage::{BufferPool, DiskManager};
use tempfile::TempDir;
use types::{ColType, Value};

use crate::{make_key, IndexHandle, IndexManager, IndexScan};

struct Fixture {
    _dir: TempDir,
    mgr: IndexManager,
    table_path: std::path::PathBuf,
    cols: Vec<String>,
}

/// Index over a single column; `str_len` > 0 builds a CHAR key of that
/// width (a small node order, deep trees), otherwise an INT key.
fn fixture(str_len: usize) -> (Fixture, Arc<IndexHandle>) {
    let dir = tempfile::tempdir().unwrap();
    let disk = Arc::new(DiskManager::new());
    let pool = BufferPool::new(Arc::clone(&disk), 256);
    let mgr = IndexManager::new(disk, pool);
    let table_path = dir.path().join("t");
    let cols = vec!["k".to_string()];
    let (types, lens): (Vec<ColType>, Vec<usize>) = if str_len > 0 {
        (vec![ColType::Str], vec![str_len])
    } else {
        (vec![ColType::Int], vec![4])
    };
    mgr.create_index(&table_path, &cols, &types, &lens).unwrap();
    let handle = Arc::new(mgr.open_index(&table_path, &cols).unwrap());
    (Fixture { _dir: dir, mgr, table_path, cols }, handle)
}

fn int_key(v: i32) -> Vec<u8> {
    let mut buf = vec![0u8; 4];
    Value::Int(v).encode_into(ColType::Int, &mut buf).unwrap();
    buf
}

fn str_key(len: usize, i: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    Value::Str(format!("{i:06}")).encode_into(ColType::Str, &mut buf).unwrap();
    buf
}

fn collect_rids(index: &Arc<IndexHandle>, lower: Iid, upper: Iid) -> Vec<Rid> {
    let mut scan = IndexScan::new(Arc::clone(index), lower, upper);
    let mut rids = Vec::new();
    while !scan.is_end() {
        rids.push(scan.rid().unwrap());
        scan.next().unwrap();
    }
    rids
}

#[test]
fn index_name_concatenates_columns() {
    let path = IndexManager::index_path(
        std::path::Path::new("/db/orders"),
        &["id".into(), "ts".into()],
    );
    assert_eq!(path, std::path::PathBuf::from("/db/orders_id_ts.idx"));
}

#[test]
fn empty_index_has_empty_range() {
    let (_fx, index) = fixture(0);
    assert_eq!(index.get(&int_key(1)).unwrap(), None);
    let lower = index.lower_bound(&int_key(0)).unwrap();
    let upper = index.upper_bound(&int_key(100)).unwrap();
    assert_eq!(collect_rids(&index, lower, upper), vec![]);
}

#[test]
fn insert_then_get_round_trips() {
    let (_fx, index) = fixture(0);
    for i in 0..100 {
        index.insert_entry(&int_key(i), Rid::new(1, i as u32)).unwrap();
    }
    for i in 0..100 {
        assert_eq!(index.get(&int_key(i)).unwrap(), Some(Rid::new(1, i as u32)));
    }
    assert_eq!(index.get(&int_key(100)).unwrap(), None);
    index.validate();
}

#[test]
fn duplicate_key_is_rejected_and_tree_untouched() {
    let (_fx, index) = fixture(0);
    index.insert_entry(&int_key(7), Rid::new(1, 0)).unwrap();
    match index.insert_entry(&int_key(7), Rid::new(1, 1)) {
        Err(DbError::DuplicateKey) => {}
        other => panic!("expected DuplicateKey, got {other:?}"),
    }
    assert_eq!(index.get(&int_key(7)).unwrap(), Some(Rid::new(1, 0)));
    index.validate();
}

#[test]
fn splits_keep_order_and_balance() {
    // CHAR(400) keys give an order-8 tree, so 200 inserts split deep.
    let (_fx, index) = fixture(400);
    let mut expected = Vec::new();
    for i in 0..200 {
        // Shuffled-ish insertion order.
        let v = (i * 37) % 200;
        index.insert_entry(&str_key(400, v), Rid::new(2, v as u32)).unwrap();
        expected.push(v);
    }
    index.validate();

    expected.sort_unstable();
    let lower = index.leaf_begin().unwrap();
    let upper = index.leaf_end().unwrap();
    let rids = collect_rids(&index, lower, upper);
    assert_eq!(
        rids,
        expected.iter().map(|&v| Rid::new(2, v as u32)).collect::<Vec<_>>()
    );
}

#[test]
fn range_scan_is_complete_and_exact() {
    let (_fx, index) = fixture(0);
    for i in 0..500 {
        index.insert_entry(&int_key(i * 2), Rid::new(1, i as u32)).unwrap();
    }

    // [k1, k2) over even keys 100..=299 -> 50..150 exclusive.
    let lower = index.lower_bound(&int_key(100)).unwrap();
    let upper = index.upper_bound(&int_key(298)).unwrap();
    let rids = collect_rids(&index, lower, upper);
    assert_eq!(rids, (50..150).map(|i| Rid::new(1, i)).collect::<Vec<_>>());

    // Bounds between stored keys behave the same.
    let lower = index.lower_bound(&int_key(101)).unwrap();
    let upper = index.upper_bound(&int_key(297)).unwrap();
    let rids = collect_rids(&index, lower, upper);
    assert_eq!(rids, (51..149).map(|i| Rid::new(1, i)).collect::<Vec<_>>());
}

#[test]
fn point_range_yields_exactly_one_rid() {
    let (_fx, index) = fixture(400);
    for i in 0..60 {
        index.insert_entry(&str_key(400, i), Rid::new(3, i as u32)).unwrap();
    }
    for i in [0usize, 7, 31, 59] {
        let key = str_key(400, i);
        let lower = index.lower_bound(&key).unwrap();
        let upper = index.upper_bound(&key).unwrap();
        assert_eq!(collect_rids(&index, lower, upper), vec![Rid::new(3, i as u32)]);
    }
}

#[test]
fn delete_merges_back_down_to_empty() {
    let (_fx, index) = fixture(400);
    for i in 0..120 {
        index.insert_entry(&str_key(400, i), Rid::new(1, i as u32)).unwrap();
    }
    index.validate();

    // Delete everything, validating along the way.
    for i in 0..120 {
        assert!(index.delete_entry(&str_key(400, i)).unwrap());
        if i % 10 == 9 {
            index.validate();
        }
    }
    assert!(!index.delete_entry(&str_key(400, 0)).unwrap());
    for i in 0..120 {
        assert_eq!(index.get(&str_key(400, i)).unwrap(), None);
    }

    // The emptied tree accepts fresh inserts.
    index.insert_entry(&str_key(400, 7), Rid::new(9, 9)).unwrap();
    assert_eq!(index.get(&str_key(400, 7)).unwrap(), Some(Rid::new(9, 9)));
    index.validate();
}

#[test]
fn interleaved_insert_delete_stays_consistent() {
    let (_fx, index) = fixture(400);
    for i in 0..100 {
        index.insert_entry(&str_key(400, i), Rid::new(1, i as u32)).unwrap();
    }
    for i in (0..100).step_by(2) {
        assert!(index.delete_entry(&str_key(400, i)).unwrap());
    }
    index.validate();

    let lower = index.leaf_begin().unwrap();
    let upper = index.leaf_end().unwrap();
    let rids = collect_rids(&index, lower, upper);
    assert_eq!(
        rids,
        (1..100).step_by(2).map(|i| Rid::new(1, i as u32)).collect::<Vec<_>>()
    );
}

#[test]
fn bulk_append_matches_ordered_inserts() {
    let (_fx_a, by_insert) = fixture(400);
    let (_fx_b, by_load) = fixture(400);

    for i in 0..150 {
        by_insert.insert_entry(&str_key(400, i), Rid::new(1, i as u32)).unwrap();
        by_load.append_from_load(&str_key(400, i), Rid::new(1, i as u32)).unwrap();
    }
    by_load.validate();

    let a = collect_rids(&by_insert, by_insert.leaf_begin().unwrap(), by_insert.leaf_end().unwrap());
    let b = collect_rids(&by_load, by_load.leaf_begin().unwrap(), by_load.leaf_end().unwrap());
    assert_eq!(a, b);
    for i in [0usize, 70, 149] {
        assert_eq!(by_load.get(&str_key(400, i)).unwrap(), Some(Rid::new(1, i as u32)));
    }
}

#[test]
fn header_survives_close_and_reopen() {
    let (fx, index) = fixture(400);
    for i in 0..50 {
        index.insert_entry(&str_key(400, i), Rid::new(1, i as u32)).unwrap();
    }
    fx.mgr.close_index(&index).unwrap();

    let index = fx.mgr.open_index(&fx.table_path, &fx.cols).unwrap();
    for i in 0..50 {
        assert_eq!(index.get(&str_key(400, i)).unwrap(), Some(Rid::new(1, i as u32)));
    }
    index.validate();
    fx.mgr.close_index(&index).unwrap();
}

#[test]
fn composite_keys_concatenate_record_bytes() {
    let mut record = vec![0u8; 12];
    Value::Int(5).encode_into(ColType::Int, &mut record[0..4]).unwrap();
    Value::Str("ab".into()).encode_into(ColType::Str, &mut record[4..8]).unwrap();
    Value::Int(-1).encode_into(ColType::Int, &mut record[8..12]).unwrap();

    // Index over (third column, first column).
    let key = make_key(&record, &[(8, 4), (0, 4)]);
    assert_eq!(key.len(), 8);
    assert_eq!(&key[0..4], &(-1i32).to_le_bytes());
    assert_eq!(&key[4..8], &5i32.to_le_bytes());
}
