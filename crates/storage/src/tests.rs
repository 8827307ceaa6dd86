use std::sync::Arc;

use common::{DbError, FileId, PageId, PAGE_SIZE};
use tempfile::tempdir;

use crate::{BufferPool, DiskManager};

fn open_new(disk: &DiskManager, dir: &std::path::Path, name: &str) -> FileId {
    let path = dir.join(name);
    disk.create_file(&path).unwrap();
    disk.open_file(&path).unwrap()
}

#[test]
fn create_open_close_destroy_lifecycle() {
    let dir = tempdir().unwrap();
    let disk = DiskManager::new();
    let path = dir.path().join("table");

    disk.create_file(&path).unwrap();
    assert!(matches!(disk.create_file(&path), Err(DbError::FileExists(_))));

    let fd = disk.open_file(&path).unwrap();
    assert!(matches!(disk.open_file(&path), Err(DbError::FileBusy(_))));
    assert!(matches!(disk.destroy_file(&path), Err(DbError::FileBusy(_))));

    disk.close_file(fd).unwrap();
    assert!(matches!(disk.close_file(fd), Err(DbError::FileNotOpen(_))));
    disk.destroy_file(&path).unwrap();
    assert!(matches!(disk.destroy_file(&path), Err(DbError::FileNotFound(_))));
}

#[test]
fn page_write_read_round_trip() {
    let dir = tempdir().unwrap();
    let disk = DiskManager::new();
    let fd = open_new(&disk, dir.path(), "t");

    let mut page = vec![0u8; PAGE_SIZE];
    page[0] = 0x42;
    page[PAGE_SIZE - 1] = 0x24;
    disk.write_page(fd, 3, &page).unwrap();

    let mut back = vec![0u8; PAGE_SIZE];
    disk.read_page(fd, 3, &mut back).unwrap();
    assert_eq!(page, back);
}

#[test]
fn short_read_is_an_error() {
    let dir = tempdir().unwrap();
    let disk = DiskManager::new();
    let fd = open_new(&disk, dir.path(), "t");

    let mut buf = vec![0u8; PAGE_SIZE];
    match disk.read_page(fd, 7, &mut buf) {
        Err(DbError::ShortIo { op: "read", .. }) => {}
        other => panic!("expected short read error, got {other:?}"),
    }
}

#[test]
fn page_allocation_is_monotonic_and_resumes_from_file_size() {
    let dir = tempdir().unwrap();
    let disk = DiskManager::new();
    let path = dir.path().join("t");
    disk.create_file(&path).unwrap();
    let fd = disk.open_file(&path).unwrap();

    assert_eq!(disk.allocate_page(fd).unwrap(), 0);
    assert_eq!(disk.allocate_page(fd).unwrap(), 1);
    disk.write_page(fd, 1, &vec![0u8; PAGE_SIZE]).unwrap();
    disk.close_file(fd).unwrap();

    // Two pages on disk now, so a fresh open continues at 2.
    let fd = disk.open_file(&path).unwrap();
    assert_eq!(disk.allocate_page(fd).unwrap(), 2);
}

#[test]
fn bulk_writes_land_page_aligned() {
    let dir = tempdir().unwrap();
    let disk = DiskManager::new();
    let fd = open_new(&disk, dir.path(), "t");

    let mut burst = vec![0u8; 3 * PAGE_SIZE];
    burst[0] = 1;
    burst[PAGE_SIZE] = 2;
    burst[2 * PAGE_SIZE] = 3;
    disk.write_pages_bulk(fd, 1, &burst).unwrap();

    let mut page = vec![0u8; PAGE_SIZE];
    disk.read_page(fd, 2, &mut page).unwrap();
    assert_eq!(page[0], 2);
    disk.read_page(fd, 3, &mut page).unwrap();
    assert_eq!(page[0], 3);
}

#[test]
fn log_channel_appends_and_reads_back() {
    let dir = tempdir().unwrap();
    let disk = DiskManager::new();
    disk.open_log(&dir.path().join("db.log")).unwrap();

    disk.write_log(b"alpha").unwrap();
    disk.write_log(b"beta").unwrap();

    let mut buf = [0u8; 16];
    let n = disk.read_log(&mut buf, 0).unwrap();
    assert_eq!(&buf[..n], b"alphabeta");
    assert_eq!(disk.read_log(&mut buf, 100).unwrap(), 0);
}

#[test]
fn fetch_shares_a_cached_page_between_guards() {
    let dir = tempdir().unwrap();
    let disk = Arc::new(DiskManager::new());
    let fd = open_new(&disk, dir.path(), "t");
    let pool = BufferPool::new(Arc::clone(&disk), 4);

    let page = pool.new_page(fd).unwrap();
    let id = page.page_id();
    page.write()[10] = 99;
    drop(page);

    let a = pool.fetch_page(id).unwrap();
    let b = pool.fetch_page(id).unwrap();
    assert_eq!(a.read()[10], 99);
    assert_eq!(b.read()[10], 99);
}

#[test]
fn flush_page_persists_without_eviction() {
    let dir = tempdir().unwrap();
    let disk = Arc::new(DiskManager::new());
    let fd = open_new(&disk, dir.path(), "t");
    let pool = BufferPool::new(Arc::clone(&disk), 4);

    let page = pool.new_page(fd).unwrap();
    let id = page.page_id();
    page.write()[0] = 7;
    drop(page);

    assert!(pool.flush_page(id).unwrap());
    let mut raw = vec![0u8; PAGE_SIZE];
    disk.read_page(fd, id.page_no, &mut raw).unwrap();
    assert_eq!(raw[0], 7);

    assert!(!pool.flush_page(PageId::new(fd, 999)).unwrap());
}

#[test]
fn flush_all_then_close_round_trips_a_file() {
    let dir = tempdir().unwrap();
    let disk = Arc::new(DiskManager::new());
    let path = dir.path().join("t");
    disk.create_file(&path).unwrap();
    let fd = disk.open_file(&path).unwrap();
    let pool = BufferPool::new(Arc::clone(&disk), 8);

    for i in 0..4u8 {
        let page = pool.new_page(fd).unwrap();
        page.write()[0] = i;
    }
    pool.flush_all(fd).unwrap();
    pool.delete_all(fd);
    disk.close_file(fd).unwrap();

    let fd = disk.open_file(&path).unwrap();
    for i in 0..4u8 {
        let page = pool.fetch_page(PageId::new(fd, i as u32)).unwrap();
        assert_eq!(page.read()[0], i);
    }
}
