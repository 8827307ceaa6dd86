use std::fs::{File, OpenOptions};
use std::io::{self, ErrorKind};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use ahash::RandomState;
use common::{DbError, DbResult, FileId, PAGE_SIZE};
use hashbrown::HashMap;

type Map<K, V> = HashMap<K, V, RandomState>;

struct OpenFile {
    file: Arc<File>,
    path: PathBuf,
    /// Next page number this file will hand out.
    next_page_no: u32,
}

#[derive(Default)]
struct Registry {
    files: Map<u32, OpenFile>,
    path_to_fd: Map<PathBuf, u32>,
    next_fd: u32,
    log_file: Option<Arc<File>>,
}

/// Raw page/file I/O and per-file page-number allocation.
///
/// Files are addressed through [`FileId`] handles; a path may be open at
/// most once, and destroying an open file fails with `FileBusy`. All
/// page I/O is positional against shared file handles, so concurrent
/// reads and writes of distinct pages do not serialize on a seek cursor.
pub struct DiskManager {
    inner: Mutex<Registry>,
}

impl DiskManager {
    pub fn new() -> Self {
        Self { inner: Mutex::new(Registry::default()) }
    }

    pub fn is_file(path: &Path) -> bool {
        path.is_file()
    }

    /// Create an empty file. Fails with `FileExists` when the path is
    /// already taken.
    pub fn create_file(&self, path: &Path) -> DbResult<()> {
        if path.exists() {
            return Err(DbError::FileExists(path.display().to_string()));
        }
        File::create(path)?;
        Ok(())
    }

    /// Remove a closed file from disk.
    pub fn destroy_file(&self, path: &Path) -> DbResult<()> {
        if !path.is_file() {
            return Err(DbError::FileNotFound(path.display().to_string()));
        }
        let inner = self.inner.lock().unwrap();
        if inner.path_to_fd.contains_key(path) {
            return Err(DbError::FileBusy(path.display().to_string()));
        }
        drop(inner);
        std::fs::remove_file(path)?;
        Ok(())
    }

    /// Open an existing file and register it. The per-file page counter
    /// starts at the number of pages already on disk.
    pub fn open_file(&self, path: &Path) -> DbResult<FileId> {
        if !path.is_file() {
            return Err(DbError::FileNotFound(path.display().to_string()));
        }
        let mut inner = self.inner.lock().unwrap();
        if inner.path_to_fd.contains_key(path) {
            return Err(DbError::FileBusy(path.display().to_string()));
        }
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let pages = (file.metadata()?.len() / PAGE_SIZE as u64) as u32;
        let fd = inner.next_fd;
        inner.next_fd += 1;
        inner.files.insert(
            fd,
            OpenFile { file: Arc::new(file), path: path.to_path_buf(), next_page_no: pages },
        );
        inner.path_to_fd.insert(path.to_path_buf(), fd);
        log::debug!("opened {} as fd {} ({} pages)", path.display(), fd, pages);
        Ok(FileId(fd))
    }

    pub fn close_file(&self, fd: FileId) -> DbResult<()> {
        let mut inner = self.inner.lock().unwrap();
        let open = inner.files.remove(&fd.0).ok_or(DbError::FileNotOpen(fd.0))?;
        inner.path_to_fd.remove(&open.path);
        Ok(())
    }

    pub fn file_path(&self, fd: FileId) -> DbResult<PathBuf> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.files.get(&fd.0).ok_or(DbError::FileNotOpen(fd.0))?.path.clone())
    }

    fn handle(&self, fd: FileId) -> DbResult<Arc<File>> {
        let inner = self.inner.lock().unwrap();
        Ok(Arc::clone(&inner.files.get(&fd.0).ok_or(DbError::FileNotOpen(fd.0))?.file))
    }

    /// Read exactly one page at `page_no * PAGE_SIZE`. A short read is an
    /// error, not a truncated result.
    pub fn read_page(&self, fd: FileId, page_no: u32, buf: &mut [u8]) -> DbResult<()> {
        debug_assert!(buf.len() <= PAGE_SIZE);
        let file = self.handle(fd)?;
        let offset = page_no as u64 * PAGE_SIZE as u64;
        file.read_exact_at(buf, offset).map_err(|e| short_io(e, "read", page_no, buf.len()))
    }

    /// Write exactly one page at `page_no * PAGE_SIZE`.
    pub fn write_page(&self, fd: FileId, page_no: u32, buf: &[u8]) -> DbResult<()> {
        debug_assert!(buf.len() <= PAGE_SIZE);
        let file = self.handle(fd)?;
        let offset = page_no as u64 * PAGE_SIZE as u64;
        file.write_all_at(buf, offset).map_err(|e| short_io(e, "write", page_no, buf.len()))
    }

    /// Write `k` contiguous pages starting at `start_page_no` in one
    /// call; the bulk-load path uses this to bypass the frame cache.
    pub fn write_pages_bulk(&self, fd: FileId, start_page_no: u32, buf: &[u8]) -> DbResult<()> {
        debug_assert_eq!(buf.len() % PAGE_SIZE, 0);
        let file = self.handle(fd)?;
        let offset = start_page_no as u64 * PAGE_SIZE as u64;
        file.write_all_at(buf, offset)
            .map_err(|e| short_io(e, "bulk write", start_page_no, buf.len()))
    }

    /// Hand out the next page number for `fd`.
    pub fn allocate_page(&self, fd: FileId) -> DbResult<u32> {
        let mut inner = self.inner.lock().unwrap();
        let open = inner.files.get_mut(&fd.0).ok_or(DbError::FileNotOpen(fd.0))?;
        let page_no = open.next_page_no;
        open.next_page_no += 1;
        Ok(page_no)
    }

    /// Rebind the allocation counter, e.g. after bulk writes extended
    /// the file behind the allocator's back.
    pub fn set_next_page_no(&self, fd: FileId, page_no: u32) -> DbResult<()> {
        let mut inner = self.inner.lock().unwrap();
        let open = inner.files.get_mut(&fd.0).ok_or(DbError::FileNotOpen(fd.0))?;
        open.next_page_no = page_no;
        Ok(())
    }

    // Append-only log channel for external collaborators (recovery is
    // out of the core's scope; the fd is part of the C1 interface).

    pub fn open_log(&self, path: &Path) -> DbResult<()> {
        let file = OpenOptions::new().read(true).append(true).create(true).open(path)?;
        self.inner.lock().unwrap().log_file = Some(Arc::new(file));
        Ok(())
    }

    pub fn write_log(&self, data: &[u8]) -> DbResult<()> {
        let inner = self.inner.lock().unwrap();
        let file = inner.log_file.as_ref().ok_or(DbError::FileNotOpen(u32::MAX))?;
        let len = file.metadata()?.len();
        file.write_all_at(data, len)?;
        Ok(())
    }

    pub fn read_log(&self, buf: &mut [u8], offset: u64) -> DbResult<usize> {
        let inner = self.inner.lock().unwrap();
        let file = inner.log_file.as_ref().ok_or(DbError::FileNotOpen(u32::MAX))?;
        let len = file.metadata()?.len();
        if offset >= len {
            return Ok(0);
        }
        let take = buf.len().min((len - offset) as usize);
        file.read_exact_at(&mut buf[..take], offset)?;
        Ok(take)
    }
}

impl Default for DiskManager {
    fn default() -> Self {
        Self::new()
    }
}

fn short_io(err: io::Error, op: &'static str, page_no: u32, expected: usize) -> DbError {
    if err.kind() == ErrorKind::UnexpectedEof || err.kind() == ErrorKind::WriteZero {
        DbError::ShortIo { op, page_no, expected, actual: 0 }
    } else {
        DbError::Io(err)
    }
}
