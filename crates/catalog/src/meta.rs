use std::collections::BTreeMap;

use common::{DbError, DbResult};
use serde::{Deserialize, Serialize};
use types::ColType;

/// Column definition as it arrives from a CREATE TABLE statement.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ColDef {
    pub name: String,
    pub ty: ColType,
    /// Byte length; only CHAR columns choose theirs, the rest are fixed
    /// by the type.
    pub len: usize,
}

/// Column metadata: placement of one column within a table's records.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColMeta {
    pub tab_name: String,
    pub name: String,
    pub ty: ColType,
    pub len: usize,
    pub offset: usize,
    pub indexed: bool,
}

/// Metadata of one index: owning table, participating columns in
/// declared order, and the total key width.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexMeta {
    pub tab_name: String,
    pub col_tot_len: usize,
    pub col_num: usize,
    pub cols: Vec<ColMeta>,
}

impl IndexMeta {
    pub fn col_names(&self) -> Vec<String> {
        self.cols.iter().map(|c| c.name.clone()).collect()
    }

    /// (offset, len) of each key column within a table record, for key
    /// construction.
    pub fn key_cols(&self) -> Vec<(usize, usize)> {
        self.cols.iter().map(|c| (c.offset, c.len)).collect()
    }

    pub fn col_types(&self) -> Vec<ColType> {
        self.cols.iter().map(|c| c.ty).collect()
    }

    pub fn col_lens(&self) -> Vec<usize> {
        self.cols.iter().map(|c| c.len).collect()
    }
}

/// Metadata of one table: ordered columns (packed left to right without
/// padding) and the indexes built over them.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableMeta {
    pub name: String,
    pub cols: Vec<ColMeta>,
    pub indexes: Vec<IndexMeta>,
}

impl TableMeta {
    /// Sum of the column lengths; offsets are dense, so this is also
    /// one past the last column.
    pub fn record_size(&self) -> usize {
        self.cols.last().map_or(0, |c| c.offset + c.len)
    }

    pub fn is_col(&self, col_name: &str) -> bool {
        self.cols.iter().any(|c| c.name == col_name)
    }

    pub fn get_col(&self, col_name: &str) -> DbResult<&ColMeta> {
        self.cols
            .iter()
            .find(|c| c.name == col_name)
            .ok_or_else(|| DbError::ColumnNotFound(col_name.to_string()))
    }

    /// Pick the index best matching a set of condition columns: the
    /// longest contiguous left prefix wins, ties broken by the fewest
    /// leftover index columns. The remaining index columns must all be
    /// absent from the set, otherwise the index is unusable.
    pub fn matching_index(&self, col_names: &[String]) -> Option<&IndexMeta> {
        let mut best: Option<&IndexMeta> = None;
        let mut best_prefix = 0usize;
        let mut best_leftover = usize::MAX;

        for index in &self.indexes {
            let mut i = 0;
            while i < index.cols.len() && col_names.iter().any(|n| *n == index.cols[i].name) {
                i += 1;
            }
            if i == 0 {
                continue;
            }
            let prefix = i;
            let mut leftover = 0;
            while i < index.cols.len() && !col_names.iter().any(|n| *n == index.cols[i].name) {
                i += 1;
                leftover += 1;
            }
            if i != index.cols.len() {
                // A condition column reappears past a gap; no contiguous
                // left-prefix covers it.
                continue;
            }
            if prefix > best_prefix || (prefix == best_prefix && leftover < best_leftover) {
                best = Some(index);
                best_prefix = prefix;
                best_leftover = leftover;
            }
        }
        best
    }

    /// Exact-column index lookup.
    pub fn get_index_meta(&self, col_names: &[String]) -> DbResult<&IndexMeta> {
        self.indexes
            .iter()
            .find(|ix| {
                ix.cols.len() == col_names.len()
                    && ix.cols.iter().zip(col_names).all(|(c, n)| c.name == *n)
            })
            .ok_or_else(|| DbError::IndexNotFound {
                tab: self.name.clone(),
                cols: col_names.join(", "),
            })
    }

    pub fn has_index(&self, col_names: &[String]) -> bool {
        self.get_index_meta(col_names).is_ok()
    }
}

/// Whole-database metadata, rewritten to `db.meta` on every DDL.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DbMeta {
    pub name: String,
    pub tables: BTreeMap<String, TableMeta>,
}

impl DbMeta {
    pub fn is_table(&self, tab_name: &str) -> bool {
        self.tables.contains_key(tab_name)
    }

    pub fn get_table(&self, tab_name: &str) -> DbResult<&TableMeta> {
        self.tables
            .get(tab_name)
            .ok_or_else(|| DbError::TableNotFound(tab_name.to_string()))
    }

    pub fn get_table_mut(&mut self, tab_name: &str) -> DbResult<&mut TableMeta> {
        self.tables
            .get_mut(tab_name)
            .ok_or_else(|| DbError::TableNotFound(tab_name.to_string()))
    }
}
