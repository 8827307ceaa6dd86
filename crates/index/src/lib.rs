//! Page-resident B+ tree mapping composite keys to record ids.
//!
//! File layout: page 0 holds the serialized [`IndexFileHeader`], page 1
//! is the leaf-chain sentinel, page 2 the initial root (a leaf). Leaves
//! form a doubly-linked chain that runs circularly through the sentinel,
//! with the header tracking the first and last real leaf.

mod handle;
mod manager;
mod node;
mod scan;

pub use handle::IndexHandle;
pub use manager::IndexManager;
pub use scan::IndexScan;

use serde::{Deserialize, Serialize};
use types::ColType;

/// Page number of the serialized file header.
pub const FILE_HDR_PAGE: u32 = 0;
/// Sentinel page the leaf chain runs through.
pub const LEAF_HEADER_PAGE: u32 = 1;
/// Root page of a freshly created index.
pub const INIT_ROOT_PAGE: u32 = 2;
/// Pages a fresh index file starts with (header + sentinel + root).
pub const INIT_NUM_PAGES: u32 = 3;
/// Longest composite key the index accepts, in bytes.
pub const MAX_COL_LEN: usize = 512;

/// Header page contents of an index file.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IndexFileHeader {
    pub first_free_page_no: u32,
    pub num_pages: u32,
    pub root_page: u32,
    pub col_types: Vec<ColType>,
    pub col_lens: Vec<u32>,
    pub col_tot_len: u32,
    pub btree_order: u32,
    pub keys_size: u32,
    pub first_leaf: u32,
    pub last_leaf: u32,
}

/// Concatenate the indexed columns' raw record bytes, in declared order,
/// into a dense key buffer. `cols` carries each column's (offset, len)
/// within the record.
pub fn make_key(record: &[u8], cols: &[(usize, usize)]) -> Vec<u8> {
    let total: usize = cols.iter().map(|&(_, len)| len).sum();
    let mut key = Vec::with_capacity(total);
    for &(offset, len) in cols {
        key.extend_from_slice(&record[offset..offset + len]);
    }
    key
}

#[cfg(test)]
mod tests;
