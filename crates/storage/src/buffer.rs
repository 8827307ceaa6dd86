use std::num::NonZeroUsize;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use ahash::RandomState;
use common::{DbError, DbResult, FileId, PageId, NO_PAGE, PAGE_SIZE};
use hashbrown::HashMap;
use lru::LruCache;

use crate::disk::DiskManager;

type Map<K, V> = HashMap<K, V, RandomState>;

const UNBOUND: PageId = PageId { fd: FileId(u32::MAX), page_no: NO_PAGE };

struct FrameBuf {
    page_id: PageId,
    bytes: Box<[u8]>,
}

struct FrameCell {
    buf: RwLock<FrameBuf>,
    dirty: AtomicBool,
}

/// Eviction policy over unpinned frames. Backed by an LRU list; `pin`
/// removes a frame from consideration, `unpin` re-admits it as most
/// recently used.
struct LruReplacer {
    cache: LruCache<usize, ()>,
}

impl LruReplacer {
    fn new(capacity: usize) -> Self {
        Self { cache: LruCache::new(NonZeroUsize::new(capacity).unwrap()) }
    }

    fn pin(&mut self, frame_id: usize) {
        self.cache.pop(&frame_id);
    }

    fn unpin(&mut self, frame_id: usize) {
        self.cache.push(frame_id, ());
    }

    fn victim(&mut self) -> Option<usize> {
        self.cache.pop_lru().map(|(frame_id, ())| frame_id)
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.cache.len()
    }
}

struct PoolInner {
    page_table: Map<PageId, usize>,
    free_list: Vec<usize>,
    replacer: LruReplacer,
    pin_counts: Box<[u32]>,
}

impl PoolInner {
    /// Pick a frame to rebind: free list first, then LRU victim.
    fn find_victim(&mut self) -> Option<usize> {
        self.free_list.pop().or_else(|| self.replacer.victim())
    }
}

/// Fixed-size frame cache shared by every file.
///
/// A single mutex guards the page table, free list, replacer, and pin
/// counts; frame payloads sit behind per-frame RwLocks so readers of
/// distinct pages do not contend. A page with pin count > 0 is never
/// evicted; dirty frames are written back before their frame is reused.
pub struct BufferPool {
    disk: Arc<DiskManager>,
    frames: Box<[FrameCell]>,
    inner: Mutex<PoolInner>,
}

impl BufferPool {
    pub fn new(disk: Arc<DiskManager>, pool_pages: usize) -> Arc<Self> {
        assert!(pool_pages > 0, "pool must hold at least one frame");
        let frames = (0..pool_pages)
            .map(|_| FrameCell {
                buf: RwLock::new(FrameBuf {
                    page_id: UNBOUND,
                    bytes: vec![0u8; PAGE_SIZE].into_boxed_slice(),
                }),
                dirty: AtomicBool::new(false),
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Arc::new(Self {
            disk,
            frames,
            inner: Mutex::new(PoolInner {
                page_table: Map::default(),
                free_list: (0..pool_pages).rev().collect(),
                replacer: LruReplacer::new(pool_pages),
                pin_counts: vec![0u32; pool_pages].into_boxed_slice(),
            }),
        })
    }

    pub fn disk(&self) -> &Arc<DiskManager> {
        &self.disk
    }

    /// Fetch a page, reading it from disk on a cache miss, and pin it.
    pub fn fetch_page(self: &Arc<Self>, page_id: PageId) -> DbResult<PageGuard> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(&frame_id) = inner.page_table.get(&page_id) {
            inner.pin_counts[frame_id] += 1;
            if inner.pin_counts[frame_id] == 1 {
                inner.replacer.pin(frame_id);
            }
            return Ok(PageGuard { pool: Arc::clone(self), page_id, frame_id });
        }

        let frame_id = inner.find_victim().ok_or(DbError::PoolExhausted)?;
        if let Err(err) = self.rebind_frame(&mut inner, frame_id, page_id, true) {
            inner.free_list.push(frame_id);
            return Err(err);
        }
        inner.page_table.insert(page_id, frame_id);
        inner.pin_counts[frame_id] = 1;
        Ok(PageGuard { pool: Arc::clone(self), page_id, frame_id })
    }

    /// Allocate a fresh page number in `fd`, bind a zeroed frame to it,
    /// and pin it. The frame starts dirty so the page reaches disk even
    /// if never touched again.
    pub fn new_page(self: &Arc<Self>, fd: FileId) -> DbResult<PageGuard> {
        let mut inner = self.inner.lock().unwrap();
        let page_no = self.disk.allocate_page(fd)?;
        let frame_id = inner.find_victim().ok_or(DbError::PoolExhausted)?;
        let page_id = PageId::new(fd, page_no);
        if let Err(err) = self.rebind_frame(&mut inner, frame_id, page_id, false) {
            inner.free_list.push(frame_id);
            return Err(err);
        }
        self.frames[frame_id].dirty.store(true, Ordering::Release);
        inner.page_table.insert(page_id, frame_id);
        inner.pin_counts[frame_id] = 1;
        Ok(PageGuard { pool: Arc::clone(self), page_id, frame_id })
    }

    /// Write back a victim frame if needed and point it at `page_id`,
    /// optionally filling it from disk.
    fn rebind_frame(
        &self,
        inner: &mut MutexGuard<'_, PoolInner>,
        frame_id: usize,
        page_id: PageId,
        load: bool,
    ) -> DbResult<()> {
        let cell = &self.frames[frame_id];
        let mut frame = cell.buf.write().unwrap();
        if cell.dirty.swap(false, Ordering::AcqRel) {
            self.disk.write_page(frame.page_id.fd, frame.page_id.page_no, &frame.bytes)?;
        }
        if frame.page_id != UNBOUND {
            inner.page_table.remove(&frame.page_id);
        }
        if load {
            if let Err(err) = self.disk.read_page(page_id.fd, page_id.page_no, &mut frame.bytes) {
                frame.page_id = UNBOUND;
                return Err(err);
            }
        } else {
            frame.bytes.fill(0);
        }
        frame.page_id = page_id;
        Ok(())
    }

    /// Drop one pin. At pin count zero the frame re-enters the replacer.
    /// `dirty` OR-merges into the frame's dirty bit.
    pub fn unpin_page(&self, page_id: PageId, dirty: bool) -> bool {
        let mut inner = self.inner.lock().unwrap();
        let Some(&frame_id) = inner.page_table.get(&page_id) else {
            return false;
        };
        if inner.pin_counts[frame_id] == 0 {
            debug_assert!(false, "unpin of unpinned page {page_id:?}");
            return false;
        }
        inner.pin_counts[frame_id] -= 1;
        if inner.pin_counts[frame_id] == 0 {
            inner.replacer.unpin(frame_id);
        }
        if dirty {
            self.frames[frame_id].dirty.store(true, Ordering::Release);
        }
        true
    }

    /// Write the page back if cached, whether dirty or not, and clear
    /// its dirty bit.
    pub fn flush_page(&self, page_id: PageId) -> DbResult<bool> {
        let inner = self.inner.lock().unwrap();
        let Some(&frame_id) = inner.page_table.get(&page_id) else {
            return Ok(false);
        };
        let cell = &self.frames[frame_id];
        let frame = cell.buf.read().unwrap();
        self.disk.write_page(page_id.fd, page_id.page_no, &frame.bytes)?;
        cell.dirty.store(false, Ordering::Release);
        Ok(true)
    }

    /// Drop an unpinned page from the cache, writing it back first when
    /// dirty. Returns false when the page is still pinned.
    pub fn delete_page(&self, page_id: PageId) -> DbResult<bool> {
        let mut inner = self.inner.lock().unwrap();
        let Some(&frame_id) = inner.page_table.get(&page_id) else {
            return Ok(true);
        };
        if inner.pin_counts[frame_id] != 0 {
            return Ok(false);
        }
        let cell = &self.frames[frame_id];
        {
            let mut frame = cell.buf.write().unwrap();
            if cell.dirty.swap(false, Ordering::AcqRel) {
                self.disk.write_page(page_id.fd, page_id.page_no, &frame.bytes)?;
            }
            frame.page_id = UNBOUND;
            frame.bytes.fill(0);
        }
        inner.page_table.remove(&page_id);
        inner.replacer.pin(frame_id);
        inner.free_list.push(frame_id);
        Ok(true)
    }

    /// Write back every cached page of `fd`; used before a file close.
    pub fn flush_all(&self, fd: FileId) -> DbResult<()> {
        let inner = self.inner.lock().unwrap();
        for (&page_id, &frame_id) in inner.page_table.iter() {
            if page_id.fd != fd {
                continue;
            }
            let cell = &self.frames[frame_id];
            let frame = cell.buf.read().unwrap();
            self.disk.write_page(page_id.fd, page_id.page_no, &frame.bytes)?;
            cell.dirty.store(false, Ordering::Release);
        }
        Ok(())
    }

    /// Forget every cached page of `fd` without writing anything back;
    /// pin counts are reset. Used when a file is dropped.
    pub fn delete_all(&self, fd: FileId) {
        let mut inner = self.inner.lock().unwrap();
        let doomed: Vec<(PageId, usize)> = inner
            .page_table
            .iter()
            .filter(|(page_id, _)| page_id.fd == fd)
            .map(|(&page_id, &frame_id)| (page_id, frame_id))
            .collect();
        for (page_id, frame_id) in doomed {
            let cell = &self.frames[frame_id];
            {
                let mut frame = cell.buf.write().unwrap();
                frame.page_id = UNBOUND;
                frame.bytes.fill(0);
            }
            cell.dirty.store(false, Ordering::Release);
            inner.pin_counts[frame_id] = 0;
            inner.replacer.pin(frame_id);
            inner.page_table.remove(&page_id);
            inner.free_list.push(frame_id);
        }
    }

    #[cfg(test)]
    fn accounting(&self) -> (usize, usize, usize) {
        let inner = self.inner.lock().unwrap();
        let pinned = inner.pin_counts.iter().filter(|&&c| c > 0).count();
        (inner.free_list.len(), inner.replacer.len(), pinned)
    }
}

/// Pinned handle to a cached page; dropping it unpins the page.
///
/// `read`/`write` lock the frame payload; a writable access marks the
/// frame dirty. No reference into the page may outlive the guard.
pub struct PageGuard {
    pool: Arc<BufferPool>,
    page_id: PageId,
    frame_id: usize,
}

impl std::fmt::Debug for PageGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageGuard")
            .field("page_id", &self.page_id)
            .field("frame_id", &self.frame_id)
            .finish()
    }
}

impl PageGuard {
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn page_no(&self) -> u32 {
        self.page_id.page_no
    }

    pub fn read(&self) -> PageRead<'_> {
        PageRead(self.pool.frames[self.frame_id].buf.read().unwrap())
    }

    pub fn write(&self) -> PageWrite<'_> {
        let cell = &self.pool.frames[self.frame_id];
        cell.dirty.store(true, Ordering::Release);
        PageWrite(cell.buf.write().unwrap())
    }
}

impl Drop for PageGuard {
    fn drop(&mut self) {
        self.pool.unpin_page(self.page_id, false);
    }
}

/// Shared view of a pinned page's bytes.
pub struct PageRead<'a>(RwLockReadGuard<'a, FrameBuf>);

impl Deref for PageRead<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.0.bytes
    }
}

/// Exclusive view of a pinned page's bytes; taking it marks the frame
/// dirty.
pub struct PageWrite<'a>(RwLockWriteGuard<'a, FrameBuf>);

impl Deref for PageWrite<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.0.bytes
    }
}

impl DerefMut for PageWrite<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.0.bytes
    }
}
