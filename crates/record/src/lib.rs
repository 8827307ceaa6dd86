//! Slotted-page heap files: fixed-size records indexed by `Rid`, with a
//! free-slot bitmap per page and a header page carrying the file layout.

pub mod bitmap;
mod heap;
mod scan;

pub use heap::{HeapFile, HeapFileHeader, HeapFileManager, PageLayout, HEAP_PAGE_HDR_LEN, MAX_RECORD_SIZE};
pub use scan::HeapScan;
