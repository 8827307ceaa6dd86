use std::path::Path;
use std::sync::{Arc, RwLock};

use bincode::config::{self, Config};
use bincode::serde::{decode_from_slice, encode_into_slice};
use common::{DbError, DbResult, FileId, PageId, Rid, NO_PAGE, PAGE_SIZE};
use serde::{Deserialize, Serialize};
use storage::{BufferPool, DiskManager, PageGuard};
use txn::Context;

use crate::bitmap;

/// Widest record a heap file accepts, in bytes.
pub const MAX_RECORD_SIZE: usize = 512;

/// Bytes of the per-page header: record count plus a crc32 of the
/// payload region.
pub const HEAP_PAGE_HDR_LEN: usize = 8;

/// Page number of the file header; data pages start at 1.
pub const FILE_HDR_PAGE: u32 = 0;
pub const FIRST_RECORD_PAGE: u32 = 1;

fn bincode_config() -> impl Config {
    config::legacy()
}

/// Header page contents of a heap file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeapFileHeader {
    pub record_size: u32,
    pub num_pages: u32,
    pub records_per_page: u32,
    pub first_free_page_no: u32,
    pub bitmap_size: u32,
}

impl HeapFileHeader {
    /// Derive the densest layout for `record_size`:
    /// `hdr + ceil(n/8) + n * record_size <= PAGE_SIZE`.
    pub fn for_record_size(record_size: usize) -> Self {
        let avail = PAGE_SIZE - HEAP_PAGE_HDR_LEN;
        let mut n = avail * 8 / (1 + record_size * 8);
        while HEAP_PAGE_HDR_LEN + n.div_ceil(8) + n * record_size > PAGE_SIZE {
            n -= 1;
        }
        Self {
            record_size: record_size as u32,
            num_pages: 1,
            records_per_page: n as u32,
            first_free_page_no: NO_PAGE,
            bitmap_size: n.div_ceil(8) as u32,
        }
    }

    pub fn layout(&self) -> PageLayout {
        PageLayout {
            record_size: self.record_size as usize,
            records_per_page: self.records_per_page as usize,
            bitmap_size: self.bitmap_size as usize,
        }
    }
}

/// Byte layout of one heap data page.
#[derive(Clone, Copy, Debug)]
pub struct PageLayout {
    pub record_size: usize,
    pub records_per_page: usize,
    pub bitmap_size: usize,
}

impl PageLayout {
    pub fn bitmap_range(&self) -> std::ops::Range<usize> {
        HEAP_PAGE_HDR_LEN..HEAP_PAGE_HDR_LEN + self.bitmap_size
    }

    pub fn slot_range(&self, slot_no: usize) -> std::ops::Range<usize> {
        let start = HEAP_PAGE_HDR_LEN + self.bitmap_size + slot_no * self.record_size;
        start..start + self.record_size
    }

    pub fn num_records(page: &[u8]) -> u32 {
        u32::from_le_bytes(page[0..4].try_into().unwrap())
    }

    pub fn set_num_records(page: &mut [u8], n: u32) {
        page[0..4].copy_from_slice(&n.to_le_bytes());
    }

    /// Recompute the payload checksum after a mutation.
    pub fn refresh_checksum(page: &mut [u8]) {
        let crc = crc32fast::hash(&page[HEAP_PAGE_HDR_LEN..]);
        page[4..8].copy_from_slice(&crc.to_le_bytes());
    }
}

/// Handle to an open heap file: fixed-size records addressed by `Rid`,
/// slots tracked through per-page bitmaps, spare capacity through a
/// single first-free-page pointer.
///
/// Every operation that takes a [`Context`] acquires the matching record
/// lock through it before touching the slot.
pub struct HeapFile {
    fd: FileId,
    pool: Arc<BufferPool>,
    hdr: RwLock<HeapFileHeader>,
}

impl HeapFile {
    pub fn fd(&self) -> FileId {
        self.fd
    }

    pub fn header(&self) -> HeapFileHeader {
        self.hdr.read().unwrap().clone()
    }

    pub fn record_size(&self) -> usize {
        self.hdr.read().unwrap().record_size as usize
    }

    pub fn num_pages(&self) -> u32 {
        self.hdr.read().unwrap().num_pages
    }

    /// Mutate the in-memory header; the bulk-load path uses this to
    /// account for pages it wrote past the buffer pool.
    pub fn update_header(&self, f: impl FnOnce(&mut HeapFileHeader)) {
        let mut hdr = self.hdr.write().unwrap();
        f(&mut hdr);
    }

    pub(crate) fn fetch_data_page(&self, page_no: u32) -> DbResult<PageGuard> {
        let num_pages = self.hdr.read().unwrap().num_pages;
        if page_no == FILE_HDR_PAGE || page_no >= num_pages {
            return Err(DbError::PageOutOfRange { file: format!("fd {}", self.fd.0), page_no });
        }
        self.pool.fetch_page(PageId::new(self.fd, page_no))
    }

    /// Insert a record into the first page with a spare slot, allocating
    /// a new page when none has one.
    ///
    /// The slot is re-checked under the page write latch after the
    /// record lock is granted: a concurrent insert that won the same
    /// slot while this one waited forces another pick.
    pub fn insert(&self, buf: &[u8], ctx: Option<&Context>) -> DbResult<Rid> {
        let layout = self.hdr.read().unwrap().layout();
        if buf.len() != layout.record_size {
            return Err(DbError::InvalidRecordSize(buf.len()));
        }

        loop {
            let (guard, page_no) = self.spare_page()?;
            let slot_no = {
                let page = guard.read();
                bitmap::first_bit(false, &page[layout.bitmap_range()], layout.records_per_page)
            }
            .ok_or(DbError::InvalidSlotNo {
                slot_no: layout.records_per_page as u32,
                per_page: layout.records_per_page as u32,
            })?;

            let rid = Rid::new(page_no, slot_no as u32);
            if let Some(ctx) = ctx {
                ctx.locks.lock_exclusive_on_record(&ctx.txn, rid, self.fd)?;
            }

            let now_full = {
                let mut page = guard.write();
                if bitmap::is_set(&page[layout.bitmap_range()], slot_no) {
                    continue;
                }
                page[layout.slot_range(slot_no)].copy_from_slice(buf);
                bitmap::set(&mut page[layout.bitmap_range()], slot_no);
                let n = PageLayout::num_records(&page) + 1;
                PageLayout::set_num_records(&mut page, n);
                PageLayout::refresh_checksum(&mut page);
                n == layout.records_per_page as u32
            };
            if now_full {
                self.hdr.write().unwrap().first_free_page_no = NO_PAGE;
            }
            return Ok(rid);
        }
    }

    /// Copy out the record at `rid`.
    pub fn get(&self, rid: Rid, ctx: Option<&Context>) -> DbResult<Vec<u8>> {
        if let Some(ctx) = ctx {
            ctx.locks.lock_shared_on_record(&ctx.txn, rid, self.fd)?;
        }
        let layout = self.hdr.read().unwrap().layout();
        let guard = self.fetch_data_page(rid.page_no)?;
        let page = guard.read();
        if !bitmap::is_set(&page[layout.bitmap_range()], rid.slot_no as usize) {
            return Err(DbError::RecordNotFound { page_no: rid.page_no, slot_no: rid.slot_no });
        }
        Ok(page[layout.slot_range(rid.slot_no as usize)].to_vec())
    }

    /// Overwrite the record at `rid` in place.
    pub fn update(&self, rid: Rid, buf: &[u8], ctx: Option<&Context>) -> DbResult<()> {
        if let Some(ctx) = ctx {
            ctx.locks.lock_exclusive_on_record(&ctx.txn, rid, self.fd)?;
        }
        let layout = self.hdr.read().unwrap().layout();
        if buf.len() != layout.record_size {
            return Err(DbError::InvalidRecordSize(buf.len()));
        }
        let guard = self.fetch_data_page(rid.page_no)?;
        let mut page = guard.write();
        if !bitmap::is_set(&page[layout.bitmap_range()], rid.slot_no as usize) {
            return Err(DbError::RecordNotFound { page_no: rid.page_no, slot_no: rid.slot_no });
        }
        page[layout.slot_range(rid.slot_no as usize)].copy_from_slice(buf);
        PageLayout::refresh_checksum(&mut page);
        Ok(())
    }

    /// Free the slot at `rid`. Index entries pointing at the record are
    /// the caller's responsibility.
    pub fn delete(&self, rid: Rid, ctx: Option<&Context>) -> DbResult<()> {
        if let Some(ctx) = ctx {
            ctx.locks.lock_exclusive_on_record(&ctx.txn, rid, self.fd)?;
        }
        let layout = self.hdr.read().unwrap().layout();
        let guard = self.fetch_data_page(rid.page_no)?;
        let was_full = {
            let mut page = guard.write();
            if !bitmap::is_set(&page[layout.bitmap_range()], rid.slot_no as usize) {
                return Err(DbError::RecordNotFound { page_no: rid.page_no, slot_no: rid.slot_no });
            }
            bitmap::reset(&mut page[layout.bitmap_range()], rid.slot_no as usize);
            let n = PageLayout::num_records(&page);
            PageLayout::set_num_records(&mut page, n - 1);
            PageLayout::refresh_checksum(&mut page);
            n == layout.records_per_page as u32
        };
        if was_full {
            // The page has spare room again; re-head the free chain.
            self.hdr.write().unwrap().first_free_page_no = rid.page_no;
        }
        Ok(())
    }

    /// Record count of one data page, read off its header.
    pub fn page_record_count(&self, page_no: u32) -> DbResult<u32> {
        let guard = self.fetch_data_page(page_no)?;
        let page = guard.read();
        Ok(PageLayout::num_records(&page))
    }

    /// First live rid in (page, slot) order, if any.
    pub fn first_live_rid(&self) -> DbResult<Option<Rid>> {
        self.live_rid_from(FIRST_RECORD_PAGE, None)
    }

    /// First live rid strictly after `rid`.
    pub fn next_live_rid(&self, rid: Rid) -> DbResult<Option<Rid>> {
        self.live_rid_from(rid.page_no, Some(rid.slot_no as usize))
    }

    fn live_rid_from(&self, mut page_no: u32, mut prev_slot: Option<usize>) -> DbResult<Option<Rid>> {
        let hdr = self.hdr.read().unwrap();
        let layout = hdr.layout();
        let num_pages = hdr.num_pages;
        drop(hdr);
        while page_no < num_pages {
            let found = {
                let guard = self.fetch_data_page(page_no)?;
                let page = guard.read();
                crate::bitmap::next_bit(
                    true,
                    &page[layout.bitmap_range()],
                    layout.records_per_page,
                    prev_slot,
                )
            };
            if let Some(slot) = found {
                return Ok(Some(Rid::new(page_no, slot as u32)));
            }
            page_no += 1;
            prev_slot = None;
        }
        Ok(None)
    }

    /// Fetch the first page with a spare slot, creating one if needed.
    fn spare_page(&self) -> DbResult<(PageGuard, u32)> {
        let first_free = self.hdr.read().unwrap().first_free_page_no;
        if first_free != NO_PAGE {
            let guard = self.fetch_data_page(first_free)?;
            return Ok((guard, first_free));
        }

        let guard = self.pool.new_page(self.fd)?;
        let page_no = guard.page_no();
        {
            let mut page = guard.write();
            PageLayout::set_num_records(&mut page, 0);
            PageLayout::refresh_checksum(&mut page);
        }
        let mut hdr = self.hdr.write().unwrap();
        hdr.num_pages += 1;
        hdr.first_free_page_no = page_no;
        Ok((guard, page_no))
    }
}

/// Creates, opens, closes, and destroys heap files.
pub struct HeapFileManager {
    disk: Arc<DiskManager>,
    pool: Arc<BufferPool>,
}

impl HeapFileManager {
    pub fn new(disk: Arc<DiskManager>, pool: Arc<BufferPool>) -> Self {
        Self { disk, pool }
    }

    pub fn create_file(&self, path: &Path, record_size: usize) -> DbResult<()> {
        if record_size < 1 || record_size > MAX_RECORD_SIZE {
            return Err(DbError::InvalidRecordSize(record_size));
        }
        self.disk.create_file(path)?;
        let fd = self.disk.open_file(path)?;
        let hdr = HeapFileHeader::for_record_size(record_size);
        let mut page = vec![0u8; PAGE_SIZE];
        encode_into_slice(&hdr, &mut page, bincode_config())
            .map_err(|e| DbError::Internal(format!("encode heap header: {e}")))?;
        self.disk.write_page(fd, FILE_HDR_PAGE, &page)?;
        self.disk.close_file(fd)?;
        Ok(())
    }

    pub fn open_file(&self, path: &Path) -> DbResult<HeapFile> {
        let fd = self.disk.open_file(path)?;
        let mut page = vec![0u8; PAGE_SIZE];
        self.disk.read_page(fd, FILE_HDR_PAGE, &mut page)?;
        let (hdr, _): (HeapFileHeader, usize) = decode_from_slice(&page, bincode_config())
            .map_err(|e| DbError::Internal(format!("decode heap header: {e}")))?;
        Ok(HeapFile { fd, pool: Arc::clone(&self.pool), hdr: RwLock::new(hdr) })
    }

    /// Persist the header, flush the file's cached pages, and release
    /// the handle.
    pub fn close_file(&self, file: &HeapFile) -> DbResult<()> {
        let hdr = file.header();
        let mut page = vec![0u8; PAGE_SIZE];
        encode_into_slice(&hdr, &mut page, bincode_config())
            .map_err(|e| DbError::Internal(format!("encode heap header: {e}")))?;
        self.disk.write_page(file.fd, FILE_HDR_PAGE, &page)?;
        self.pool.flush_all(file.fd)?;
        self.pool.delete_all(file.fd);
        self.disk.close_file(file.fd)?;
        Ok(())
    }

    pub fn destroy_file(&self, path: &Path) -> DbResult<()> {
        self.disk.destroy_file(path)
    }
}
