use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Arc, Condvar, Mutex};

use ahash::RandomState;
use catalog::{ColMeta, IndexMeta, SystemManager, TableMeta};
use common::{DbError, DbResult, Rid, NO_PAGE, PAGE_SIZE};
use hashbrown::HashSet;
use index::{make_key, IndexHandle};
use record::{bitmap, PageLayout};
use types::{ColType, DateTime};

use crate::ExecCtx;

type Set<T> = HashSet<T, RandomState>;

/// Pages buffered before a burst write to disk.
const PAGE_BURST: usize = 1024;

/// Process-wide registry of tables with a bulk load in flight. Scans
/// wait on a table's absence before starting.
pub struct LoadPool {
    active: Mutex<Set<String>>,
    cv: Condvar,
}

impl LoadPool {
    pub fn new() -> Self {
        Self { active: Mutex::new(Set::default()), cv: Condvar::new() }
    }

    pub fn register(&self, tab_name: &str) {
        self.active.lock().unwrap().insert(tab_name.to_string());
    }

    pub fn finish(&self, tab_name: &str) {
        let mut active = self.active.lock().unwrap();
        active.remove(tab_name);
        self.cv.notify_all();
    }

    /// Block until no load is running against `tab_name`.
    pub fn wait_until_free(&self, tab_name: &str) {
        let mut active = self.active.lock().unwrap();
        while active.contains(tab_name) {
            active = self.cv.wait(active).unwrap();
        }
    }

    pub fn is_loading(&self, tab_name: &str) -> bool {
        self.active.lock().unwrap().contains(tab_name)
    }
}

impl Default for LoadPool {
    fn default() -> Self {
        Self::new()
    }
}

/// LOAD '<path>' INTO <table>: builds heap pages in big bursts off the
/// request thread, bypassing the buffer pool, and feeds each index via
/// the ordered append path after an external sort of the CSV.
pub struct LoadExec {
    ctx: ExecCtx,
    tab_name: String,
    file_path: PathBuf,
}

impl LoadExec {
    pub fn new(ctx: ExecCtx, tab_name: &str, file_path: &str) -> DbResult<Self> {
        ctx.sm.table_meta(tab_name)?;
        Ok(Self {
            ctx,
            tab_name: tab_name.to_string(),
            file_path: PathBuf::from(file_path),
        })
    }

    /// Register the load and hand it to a worker thread. The statement
    /// returns immediately; readers gate on the load pool.
    pub fn execute(&self) -> DbResult<()> {
        if !self.file_path.is_file() {
            return Err(DbError::FileNotFound(self.file_path.display().to_string()));
        }
        self.ctx.loads.register(&self.tab_name);
        let sm = Arc::clone(&self.ctx.sm);
        let loads = Arc::clone(&self.ctx.loads);
        let tab_name = self.tab_name.clone();
        let file_path = self.file_path.clone();
        std::thread::spawn(move || {
            if let Err(err) = load_task(&sm, &tab_name, &file_path) {
                log::error!("load of {tab_name} failed: {err}");
            }
            loads.finish(&tab_name);
        });
        Ok(())
    }
}

fn load_task(sm: &SystemManager, tab_name: &str, file_path: &Path) -> DbResult<()> {
    let tab = sm.table_meta(tab_name)?;
    log::info!("loading table {tab_name} from {}", file_path.display());

    if tab.indexes.is_empty() {
        let body = strip_header(sm, tab_name, file_path)?;
        stream_into_heap(sm, &tab, &body, None)?;
        std::fs::remove_file(&body)?;
    } else {
        let body = strip_header(sm, tab_name, file_path)?;
        for ix_meta in &tab.indexes {
            let sorted = sort_by_index(sm, tab_name, &body, &tab, ix_meta)?;
            let handle = sm.index_handle(tab_name, &ix_meta.col_names())?;
            stream_into_heap(sm, &tab, &sorted, Some((ix_meta, &handle)))?;
            std::fs::remove_file(&sorted)?;
        }
        std::fs::remove_file(&body)?;
    }
    log::info!("table {tab_name} loaded");
    Ok(())
}

/// Copy the CSV body (everything after the header line) next to the
/// table file.
fn strip_header(sm: &SystemManager, tab_name: &str, file_path: &Path) -> DbResult<PathBuf> {
    let body_path = sm.table_path(tab_name)?.with_extension("body.csv");
    let reader = BufReader::new(File::open(file_path)?);
    let mut writer = std::io::BufWriter::new(File::create(&body_path)?);
    for line in reader.lines().skip(1) {
        let line = line?;
        if line.is_empty() {
            continue;
        }
        writer.write_all(line.as_bytes())?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;
    Ok(body_path)
}

/// Order the CSV body by the index columns with the OS sort.
fn sort_by_index(
    sm: &SystemManager,
    tab_name: &str,
    body: &Path,
    tab: &TableMeta,
    ix_meta: &IndexMeta,
) -> DbResult<PathBuf> {
    let sorted = sm.table_path(tab_name)?.with_extension("sorted.csv");
    let mut cmd = Command::new("sort");
    cmd.env("LC_ALL", "C");
    let numeric = ix_meta
        .cols
        .iter()
        .all(|c| matches!(c.ty, ColType::Int | ColType::Float));
    if numeric {
        cmd.arg("-n");
    }
    cmd.arg("-t").arg(",").arg("--parallel=8");
    for col in &ix_meta.cols {
        let pos = tab
            .cols
            .iter()
            .position(|c| c.name == col.name)
            .ok_or_else(|| DbError::ColumnNotFound(col.name.clone()))?;
        cmd.arg("-k").arg(format!("{}", pos + 1));
    }
    cmd.arg("-o").arg(&sorted).arg(body);
    let status = cmd.status()?;
    if !status.success() {
        return Err(DbError::Internal(format!("sort exited with {status}")));
    }
    Ok(sorted)
}

/// Parse one CSV line into a record image.
fn record_from_line(line: &str, cols: &[ColMeta], record: &mut [u8]) -> DbResult<()> {
    let mut fields = line.split(',');
    for col in cols {
        let field = fields
            .next()
            .ok_or_else(|| DbError::Internal(format!("missing CSV field for {}", col.name)))?;
        let slot = &mut record[col.offset..col.offset + col.len];
        match col.ty {
            ColType::Int => {
                let v: i32 = field.trim().parse().map_err(|_| DbError::InvalidType)?;
                slot.copy_from_slice(&v.to_le_bytes());
            }
            ColType::Float => {
                let v: f32 = field.trim().parse().map_err(|_| DbError::InvalidType)?;
                slot.copy_from_slice(&v.to_le_bytes());
            }
            ColType::Str => {
                if field.len() > col.len {
                    return Err(DbError::StringOverflow);
                }
                slot[..field.len()].copy_from_slice(field.as_bytes());
                slot[field.len()..].fill(0);
            }
            ColType::Datetime => {
                let dt = DateTime::parse(field.trim()).ok_or_else(|| DbError::TypeOverflow {
                    ty: "DATETIME".into(),
                    val: field.to_string(),
                })?;
                slot.copy_from_slice(&dt.encode().to_le_bytes());
            }
        }
    }
    Ok(())
}

/// Convert the (ordered) CSV into heap pages written in `PAGE_BURST`
/// chunks, building the index alongside when one is given. Rids are
/// assigned positionally from page 1, slot 0; the table is expected to
/// be empty.
fn stream_into_heap(
    sm: &SystemManager,
    tab: &TableMeta,
    csv: &Path,
    index: Option<(&IndexMeta, &IndexHandle)>,
) -> DbResult<()> {
    let heap = sm.heap(&tab.name)?;
    let disk = sm.disk();
    let fd = heap.fd();
    let layout = heap.header().layout();
    let key_cols = index.map(|(meta, _)| meta.key_cols());

    let mut page_buf = vec![0u8; PAGE_BURST * PAGE_SIZE];
    // Page number of the first page currently buffered.
    let mut flush_base: u32 = 1;
    let mut buf_pages = 0usize;
    let mut slot = 0usize;
    let mut record = vec![0u8; layout.record_size];

    let reader = BufReader::new(File::open(csv)?);
    for line in reader.lines() {
        let line = line?;
        if line.is_empty() {
            continue;
        }
        record_from_line(&line, &tab.cols, &mut record)?;

        let page = &mut page_buf[buf_pages * PAGE_SIZE..(buf_pages + 1) * PAGE_SIZE];
        page[layout.slot_range(slot)].copy_from_slice(&record);

        if let (Some(key_cols), Some((_, handle))) = (&key_cols, index) {
            let rid = Rid::new(flush_base + buf_pages as u32, slot as u32);
            handle.append_from_load(&make_key(&record, key_cols), rid)?;
        }

        slot += 1;
        if slot == layout.records_per_page {
            finalize_page(page, &layout, slot);
            slot = 0;
            buf_pages += 1;
            if buf_pages == PAGE_BURST {
                disk.write_pages_bulk(fd, flush_base, &page_buf)?;
                flush_base += PAGE_BURST as u32;
                buf_pages = 0;
                page_buf.fill(0);
            }
        }
    }

    // Trailing partial page, then the final burst.
    let mut first_free = NO_PAGE;
    if slot > 0 {
        let page = &mut page_buf[buf_pages * PAGE_SIZE..(buf_pages + 1) * PAGE_SIZE];
        finalize_page(page, &layout, slot);
        first_free = flush_base + buf_pages as u32;
        buf_pages += 1;
    }
    if buf_pages > 0 {
        disk.write_pages_bulk(fd, flush_base, &page_buf[..buf_pages * PAGE_SIZE])?;
    }

    let num_pages = flush_base + buf_pages as u32;
    heap.update_header(|hdr| {
        hdr.num_pages = num_pages;
        hdr.first_free_page_no = first_free;
    });
    disk.set_next_page_no(fd, num_pages)?;
    Ok(())
}

/// Stamp a finished page: record count, live bits, payload checksum.
fn finalize_page(page: &mut [u8], layout: &PageLayout, live: usize) {
    PageLayout::set_num_records(page, live as u32);
    let bits = &mut page[layout.bitmap_range()];
    bitmap::init(bits);
    for i in 0..live {
        bitmap::set(bits, i);
    }
    PageLayout::refresh_checksum(page);
}
