pub mod pretty;

use serde::{Deserialize, Serialize};
use std::{io, path::PathBuf};
use thiserror::Error;
use types::Value;

/// Fixed page size shared by every file the engine touches.
pub const PAGE_SIZE: usize = 4096;

/// Number of frames the buffer pool keeps resident by default
/// (81920 * 4 KiB ~ 320 MiB).
pub const DEFAULT_POOL_PAGES: usize = 81920;

/// Sentinel for "no page" wherever a page number may be absent.
pub const NO_PAGE: u32 = u32::MAX;

/// Sentinel slot number used where a `Rid` only carries a page.
pub const NO_SLOT: u32 = u32::MAX;

/// Handle for a file registered with the disk manager.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileId(pub u32);

/// Identity of a cached page: owning file plus page number.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PageId {
    pub fd: FileId,
    pub page_no: u32,
}

impl PageId {
    pub fn new(fd: FileId, page_no: u32) -> Self {
        Self { fd, page_no }
    }
}

/// Record identifier: (page number, slot number). Stable for the
/// lifetime of the record; slots freed by deletion may be reused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rid {
    pub page_no: u32,
    pub slot_no: u32,
}

impl Rid {
    pub fn new(page_no: u32, slot_no: u32) -> Self {
        Self { page_no, slot_no }
    }
}

/// Position of an index iterator inside a B+ tree leaf.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Iid {
    pub page_no: u32,
    pub slot_no: u32,
}

impl Iid {
    pub fn new(page_no: u32, slot_no: u32) -> Self {
        Self { page_no, slot_no }
    }
}

/// Transaction identifier, allocated monotonically.
pub type TxnId = u32;

/// Start timestamp used by wait-die ordering.
pub type Timestamp = u32;

/// Canonical error type shared across the engine.
#[derive(Error, Debug)]
pub enum DbError {
    // I/O and file registry
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("short {op} at page {page_no}: {actual}/{expected} bytes")]
    ShortIo { op: &'static str, page_no: u32, expected: usize, actual: usize },
    #[error("file already exists: {0}")]
    FileExists(String),
    #[error("file not found: {0}")]
    FileNotFound(String),
    #[error("file is busy: {0}")]
    FileBusy(String),
    #[error("invalid file handle: {0}")]
    FileNotOpen(u32),
    #[error("page {page_no} does not exist in {file}")]
    PageOutOfRange { file: String, page_no: u32 },
    #[error("buffer pool exhausted")]
    PoolExhausted,

    // schema
    #[error("database not found: {0}")]
    DatabaseNotFound(String),
    #[error("database already exists: {0}")]
    DatabaseExists(String),
    #[error("table not found: {0}")]
    TableNotFound(String),
    #[error("table already exists: {0}")]
    TableExists(String),
    #[error("column not found: {0}")]
    ColumnNotFound(String),
    #[error("ambiguous column: {0}")]
    AmbiguousColumn(String),
    #[error("index not found: {tab}.({cols})")]
    IndexNotFound { tab: String, cols: String },
    #[error("index already exists: {tab}.({cols})")]
    IndexExists { tab: String, cols: String },
    #[error("invalid column length: {0}")]
    InvalidColLength(usize),

    // typing
    #[error("incompatible types: lhs {lhs}, rhs {rhs}")]
    IncompatibleType { lhs: String, rhs: String },
    #[error("{ty} overflow: {val}")]
    TypeOverflow { ty: String, val: String },
    #[error("invalid type: cannot convert to record")]
    InvalidType,
    #[error("invalid value count")]
    InvalidValueCount,
    #[error("string is too long")]
    StringOverflow,

    // records
    #[error("record not found: ({page_no}, {slot_no})")]
    RecordNotFound { page_no: u32, slot_no: u32 },
    #[error("invalid record size: {0}")]
    InvalidRecordSize(usize),
    #[error("invalid slot no: {slot_no}, records per page: {per_page}")]
    InvalidSlotNo { slot_no: u32, per_page: u32 },

    // index
    #[error("duplicate key in unique index")]
    DuplicateKey,
    #[error("index entry not found")]
    IndexEntryNotFound,

    // concurrency
    #[error("transaction {0} aborted by wait-die")]
    WaitDie(TxnId),
    #[error("transaction {0} aborted: lock request in shrinking phase")]
    LockOnShrinking(TxnId),
    #[error("transaction {0} aborted for deadlock prevention")]
    DeadlockPrevention(TxnId),

    #[error("internal error: {0}")]
    Internal(String),
}

impl DbError {
    /// True for the concurrency-control errors that must abort the
    /// owning transaction.
    pub fn is_abort(&self) -> bool {
        matches!(
            self,
            DbError::WaitDie(_) | DbError::LockOnShrinking(_) | DbError::DeadlockPrevention(_)
        )
    }
}

/// Result alias carrying a `DbError`.
pub type DbResult<T> = Result<T, DbError>;

/// Rectangular query result: column captions plus typed rows.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RecordBatch {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl RecordBatch {
    pub fn new(columns: Vec<String>) -> Self {
        Self { columns, rows: Vec::new() }
    }

    pub fn push(&mut self, row: Vec<Value>) {
        self.rows.push(row);
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Runtime configuration for the engine components.
///
/// # Example
/// ```
/// use common::Config;
/// use std::path::PathBuf;
///
/// let config = Config::builder()
///     .root_dir(PathBuf::from("./data"))
///     .buffer_pool_pages(1024)
///     .build();
/// ```
#[derive(Clone, Debug, Serialize, Deserialize, bon::Builder)]
pub struct Config {
    /// Directory that holds one sub-directory per database.
    #[builder(default = PathBuf::from("."))]
    pub root_dir: PathBuf,
    /// Number of frames the buffer pool keeps resident.
    #[builder(default = DEFAULT_POOL_PAGES)]
    pub buffer_pool_pages: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::from("."),
            buffer_pool_pages: DEFAULT_POOL_PAGES,
        }
    }
}

/// Convenient re-exports for downstream crates.
pub mod prelude {
    pub use crate::{Config, DbError, DbResult, FileId, Iid, PageId, RecordBatch, Rid};
    pub use types::{ColType, DateTime, Value};
}
