use std::path::{Path, PathBuf};
use std::sync::Arc;

use bincode::config::{self, Config};
use bincode::serde::{decode_from_slice, encode_into_slice};
use common::{DbError, DbResult, NO_PAGE, PAGE_SIZE};
use storage::{BufferPool, DiskManager};
use types::ColType;

use crate::node::{write_node_header, NODE_HDR_LEN, RID_LEN};
use crate::{
    IndexFileHeader, IndexHandle, FILE_HDR_PAGE, INIT_NUM_PAGES, INIT_ROOT_PAGE,
    LEAF_HEADER_PAGE, MAX_COL_LEN,
};

fn bincode_config() -> impl Config {
    config::legacy()
}

/// Creates, opens, closes, and destroys index files.
pub struct IndexManager {
    disk: Arc<DiskManager>,
    pool: Arc<BufferPool>,
}

impl IndexManager {
    pub fn new(disk: Arc<DiskManager>, pool: Arc<BufferPool>) -> Self {
        Self { disk, pool }
    }

    /// `<table>_<col1>_<col2>….idx` next to the table's heap file.
    pub fn index_path(table_path: &Path, col_names: &[String]) -> PathBuf {
        let mut name = table_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        for col in col_names {
            name.push('_');
            name.push_str(col);
        }
        name.push_str(".idx");
        table_path.with_file_name(name)
    }

    pub fn index_exists(table_path: &Path, col_names: &[String]) -> bool {
        Self::index_path(table_path, col_names).is_file()
    }

    /// Create an empty index over the given key columns. The node order
    /// is the largest n with `hdr + (n + 1) * (key_len + rid_len)` still
    /// inside a page.
    pub fn create_index(
        &self,
        table_path: &Path,
        col_names: &[String],
        col_types: &[ColType],
        col_lens: &[usize],
    ) -> DbResult<()> {
        let key_len: usize = col_lens.iter().sum();
        if key_len == 0 || key_len > MAX_COL_LEN {
            return Err(DbError::InvalidColLength(key_len));
        }
        let order = (PAGE_SIZE - NODE_HDR_LEN) / (key_len + RID_LEN) - 1;
        if order <= 2 {
            return Err(DbError::InvalidColLength(key_len));
        }

        let path = Self::index_path(table_path, col_names);
        self.disk.create_file(&path)?;
        let fd = self.disk.open_file(&path)?;

        let hdr = IndexFileHeader {
            first_free_page_no: NO_PAGE,
            num_pages: INIT_NUM_PAGES,
            root_page: INIT_ROOT_PAGE,
            col_types: col_types.to_vec(),
            col_lens: col_lens.iter().map(|&l| l as u32).collect(),
            col_tot_len: key_len as u32,
            btree_order: order as u32,
            keys_size: ((order + 1) * key_len) as u32,
            first_leaf: INIT_ROOT_PAGE,
            last_leaf: INIT_ROOT_PAGE,
        };
        let mut page = vec![0u8; PAGE_SIZE];
        encode_into_slice(&hdr, &mut page, bincode_config())
            .map_err(|e| DbError::Internal(format!("encode index header: {e}")))?;
        self.disk.write_page(fd, FILE_HDR_PAGE, &page)?;

        // Sentinel leaf-chain page: both links point at the root.
        page.fill(0);
        write_node_header(&mut page, NO_PAGE, 0, true, INIT_ROOT_PAGE, INIT_ROOT_PAGE);
        self.disk.write_page(fd, LEAF_HEADER_PAGE, &page)?;

        // Initial root: an empty leaf chained through the sentinel.
        page.fill(0);
        write_node_header(&mut page, NO_PAGE, 0, true, LEAF_HEADER_PAGE, LEAF_HEADER_PAGE);
        self.disk.write_page(fd, INIT_ROOT_PAGE, &page)?;

        self.disk.close_file(fd)?;
        Ok(())
    }

    pub fn open_index(&self, table_path: &Path, col_names: &[String]) -> DbResult<IndexHandle> {
        let path = Self::index_path(table_path, col_names);
        let fd = self.disk.open_file(&path)?;
        let mut page = vec![0u8; PAGE_SIZE];
        self.disk.read_page(fd, FILE_HDR_PAGE, &mut page)?;
        let (hdr, _): (IndexFileHeader, usize) = decode_from_slice(&page, bincode_config())
            .map_err(|e| DbError::Internal(format!("decode index header: {e}")))?;
        self.disk.set_next_page_no(fd, hdr.num_pages)?;
        Ok(IndexHandle::new(fd, Arc::clone(&self.pool), &hdr))
    }

    /// Persist the header, flush cached pages, and release the handle.
    pub fn close_index(&self, index: &IndexHandle) -> DbResult<()> {
        let hdr = index.header();
        let mut page = vec![0u8; PAGE_SIZE];
        encode_into_slice(&hdr, &mut page, bincode_config())
            .map_err(|e| DbError::Internal(format!("encode index header: {e}")))?;
        self.disk.write_page(index.fd(), FILE_HDR_PAGE, &page)?;
        self.pool.flush_all(index.fd())?;
        self.pool.delete_all(index.fd());
        self.disk.close_file(index.fd())?;
        Ok(())
    }

    pub fn destroy_index(&self, table_path: &Path, col_names: &[String]) -> DbResult<()> {
        self.disk.destroy_file(&Self::index_path(table_path, col_names))
    }
}
