use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use ahash::RandomState;
use common::{DbError, DbResult, RecordBatch};
use hashbrown::HashMap;
use index::{IndexHandle, IndexManager};
use record::{HeapFile, HeapFileManager, HeapScan};
use storage::{BufferPool, DiskManager};
use txn::{Context, IndexWriteRecord, TableWriteRecord, UndoStorage, WriteKind};
use types::{ColType, Value};

use crate::meta::{ColDef, ColMeta, DbMeta, IndexMeta, TableMeta};

type Map<K, V> = HashMap<K, V, RandomState>;

const META_FILE: &str = "db.meta";

struct SystemInner {
    db: DbMeta,
    db_dir: PathBuf,
    heaps: Map<String, Arc<HeapFile>>,
    indexes: Map<String, Arc<IndexHandle>>,
}

/// Owns the catalog and every open heap/index handle.
///
/// DDL rewrites the catalog file and creates or destroys the backing
/// files; DML reaches storage through the shared handles. DDL is
/// assumed serial with DML (not enforced here).
pub struct SystemManager {
    disk: Arc<DiskManager>,
    pool: Arc<BufferPool>,
    heap_mgr: HeapFileManager,
    ix_mgr: IndexManager,
    root_dir: PathBuf,
    inner: RwLock<Option<SystemInner>>,
}

impl SystemManager {
    pub fn new(disk: Arc<DiskManager>, pool: Arc<BufferPool>, root_dir: PathBuf) -> Self {
        Self {
            heap_mgr: HeapFileManager::new(Arc::clone(&disk), Arc::clone(&pool)),
            ix_mgr: IndexManager::new(Arc::clone(&disk), Arc::clone(&pool)),
            disk,
            pool,
            root_dir,
            inner: RwLock::new(None),
        }
    }

    pub fn disk(&self) -> &Arc<DiskManager> {
        &self.disk
    }

    pub fn pool(&self) -> &Arc<BufferPool> {
        &self.pool
    }

    fn db_dir(&self, name: &str) -> PathBuf {
        self.root_dir.join(name)
    }

    /// Create a database: one directory holding the catalog file.
    pub fn create_db(&self, name: &str) -> DbResult<()> {
        let dir = self.db_dir(name);
        if dir.is_dir() {
            return Err(DbError::DatabaseExists(name.to_string()));
        }
        fs::create_dir_all(&dir)?;
        let meta = DbMeta { name: name.to_string(), tables: Default::default() };
        let text = serde_json::to_string_pretty(&meta)
            .map_err(|e| DbError::Internal(format!("serialize catalog: {e}")))?;
        fs::write(dir.join(META_FILE), text)?;
        Ok(())
    }

    /// Load the catalog and open every table's heap and index files.
    pub fn open_db(&self, name: &str) -> DbResult<()> {
        let dir = self.db_dir(name);
        if !dir.is_dir() {
            return Err(DbError::DatabaseNotFound(name.to_string()));
        }
        let text = fs::read_to_string(dir.join(META_FILE))?;
        let db: DbMeta = serde_json::from_str(&text)
            .map_err(|e| DbError::Internal(format!("invalid catalog file: {e}")))?;

        let mut heaps = Map::default();
        let mut indexes = Map::default();
        for (tab_name, tab) in &db.tables {
            let tab_path = dir.join(tab_name);
            heaps.insert(tab_name.clone(), Arc::new(self.heap_mgr.open_file(&tab_path)?));
            for ix in &tab.indexes {
                let handle = self.ix_mgr.open_index(&tab_path, &ix.col_names())?;
                indexes.insert(Self::index_key(tab_name, &ix.col_names()), Arc::new(handle));
            }
        }

        let mut inner = self.inner.write().unwrap();
        *inner = Some(SystemInner { db, db_dir: dir, heaps, indexes });
        Ok(())
    }

    /// Flush the catalog and close every handle.
    pub fn close_db(&self) -> DbResult<()> {
        let mut guard = self.inner.write().unwrap();
        let Some(inner) = guard.take() else {
            return Ok(());
        };
        Self::flush_meta(&inner)?;
        for heap in inner.heaps.values() {
            self.heap_mgr.close_file(heap)?;
        }
        for index in inner.indexes.values() {
            self.ix_mgr.close_index(index)?;
        }
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.inner.read().unwrap().is_some()
    }

    fn index_key(tab_name: &str, col_names: &[String]) -> String {
        let mut key = tab_name.to_string();
        for col in col_names {
            key.push('_');
            key.push_str(col);
        }
        key
    }

    fn with_inner<T>(&self, f: impl FnOnce(&SystemInner) -> DbResult<T>) -> DbResult<T> {
        let guard = self.inner.read().unwrap();
        let inner = guard
            .as_ref()
            .ok_or_else(|| DbError::Internal("no database open".into()))?;
        f(inner)
    }

    /// Rewrite the catalog file atomically: write a sibling, then rename
    /// over the old file.
    fn flush_meta(inner: &SystemInner) -> DbResult<()> {
        let text = serde_json::to_string_pretty(&inner.db)
            .map_err(|e| DbError::Internal(format!("serialize catalog: {e}")))?;
        let tmp = inner.db_dir.join(format!("{META_FILE}.tmp"));
        fs::write(&tmp, text)?;
        fs::rename(&tmp, inner.db_dir.join(META_FILE))?;
        Ok(())
    }

    // ---- DDL ----

    pub fn create_table(&self, tab_name: &str, col_defs: &[ColDef]) -> DbResult<()> {
        let mut guard = self.inner.write().unwrap();
        let inner = guard
            .as_mut()
            .ok_or_else(|| DbError::Internal("no database open".into()))?;
        if inner.db.is_table(tab_name) {
            return Err(DbError::TableExists(tab_name.to_string()));
        }

        let mut cols = Vec::with_capacity(col_defs.len());
        let mut offset = 0;
        for def in col_defs {
            let len = match def.ty {
                ColType::Int | ColType::Float => 4,
                ColType::Datetime => 8,
                ColType::Str => def.len,
            };
            if len == 0 || len > record::MAX_RECORD_SIZE {
                return Err(DbError::InvalidColLength(len));
            }
            cols.push(ColMeta {
                tab_name: tab_name.to_string(),
                name: def.name.clone(),
                ty: def.ty,
                len,
                offset,
                indexed: false,
            });
            offset += len;
        }

        let tab_path = inner.db_dir.join(tab_name);
        self.heap_mgr.create_file(&tab_path, offset)?;
        let heap = Arc::new(self.heap_mgr.open_file(&tab_path)?);
        inner.heaps.insert(tab_name.to_string(), heap);
        inner.db.tables.insert(
            tab_name.to_string(),
            TableMeta { name: tab_name.to_string(), cols, indexes: Vec::new() },
        );
        Self::flush_meta(inner)?;
        log::info!("created table {tab_name}");
        Ok(())
    }

    pub fn drop_table(&self, tab_name: &str) -> DbResult<()> {
        let mut guard = self.inner.write().unwrap();
        let inner = guard
            .as_mut()
            .ok_or_else(|| DbError::Internal("no database open".into()))?;
        let tab = inner.db.get_table(tab_name)?.clone();

        let tab_path = inner.db_dir.join(tab_name);
        for ix in &tab.indexes {
            let cols = ix.col_names();
            if let Some(handle) = inner.indexes.remove(&Self::index_key(tab_name, &cols)) {
                self.ix_mgr.close_index(&handle)?;
            }
            self.ix_mgr.destroy_index(&tab_path, &cols)?;
        }
        if let Some(heap) = inner.heaps.remove(tab_name) {
            self.heap_mgr.close_file(&heap)?;
        }
        self.heap_mgr.destroy_file(&tab_path)?;
        inner.db.tables.remove(tab_name);
        Self::flush_meta(inner)?;
        log::info!("dropped table {tab_name}");
        Ok(())
    }

    /// Create an index and, when the table already holds records, bulk
    /// load it from a key-ordered scan.
    pub fn create_index(&self, tab_name: &str, col_names: &[String]) -> DbResult<()> {
        let mut guard = self.inner.write().unwrap();
        let inner = guard
            .as_mut()
            .ok_or_else(|| DbError::Internal("no database open".into()))?;
        let tab = inner.db.get_table(tab_name)?;
        if tab.has_index(col_names) {
            return Err(DbError::IndexExists {
                tab: tab_name.to_string(),
                cols: col_names.join(", "),
            });
        }
        let mut cols = Vec::with_capacity(col_names.len());
        for name in col_names {
            cols.push(tab.get_col(name)?.clone());
        }
        let ix_meta = IndexMeta {
            tab_name: tab_name.to_string(),
            col_tot_len: cols.iter().map(|c| c.len).sum(),
            col_num: cols.len(),
            cols,
        };

        let tab_path = inner.db_dir.join(tab_name);
        self.ix_mgr.create_index(
            &tab_path,
            col_names,
            &ix_meta.col_types(),
            &ix_meta.col_lens(),
        )?;
        let handle = Arc::new(self.ix_mgr.open_index(&tab_path, col_names)?);

        // Existing rows stream into the fresh index in key order.
        let heap = inner
            .heaps
            .get(tab_name)
            .ok_or_else(|| DbError::TableNotFound(tab_name.to_string()))?;
        let key_cols = ix_meta.key_cols();
        let col_types = ix_meta.col_types();
        let col_lens = ix_meta.col_lens();
        let mut entries = Vec::new();
        let mut scan = HeapScan::new(heap)?;
        while !scan.is_end() {
            let rid = scan.rid();
            let rec = heap.get(rid, None)?;
            entries.push((index::make_key(&rec, &key_cols), rid));
            scan.next()?;
        }
        entries.sort_by(|a, b| types::compare_keys(&a.0, &b.0, &col_types, &col_lens));
        for (key, rid) in entries {
            handle.append_from_load(&key, rid)?;
        }

        inner
            .indexes
            .insert(Self::index_key(tab_name, col_names), handle);
        let tab = inner.db.get_table_mut(tab_name)?;
        for col in tab.cols.iter_mut() {
            if col_names.iter().any(|n| *n == col.name) {
                col.indexed = true;
            }
        }
        tab.indexes.push(ix_meta);
        Self::flush_meta(inner)?;
        log::info!("created index on {tab_name}({})", col_names.join(", "));
        Ok(())
    }

    pub fn drop_index(&self, tab_name: &str, col_names: &[String]) -> DbResult<()> {
        let mut guard = self.inner.write().unwrap();
        let inner = guard
            .as_mut()
            .ok_or_else(|| DbError::Internal("no database open".into()))?;
        inner.db.get_table(tab_name)?.get_index_meta(col_names)?;

        let tab_path = inner.db_dir.join(tab_name);
        if let Some(handle) = inner.indexes.remove(&Self::index_key(tab_name, col_names)) {
            self.ix_mgr.close_index(&handle)?;
        }
        self.ix_mgr.destroy_index(&tab_path, col_names)?;

        let tab = inner.db.get_table_mut(tab_name)?;
        tab.indexes.retain(|ix| {
            !(ix.cols.len() == col_names.len()
                && ix.cols.iter().zip(col_names).all(|(c, n)| c.name == *n))
        });
        let still_indexed: Vec<String> = tab
            .indexes
            .iter()
            .flat_map(|ix| ix.cols.iter().map(|c| c.name.clone()))
            .collect();
        for col in tab.cols.iter_mut() {
            col.indexed = still_indexed.iter().any(|n| *n == col.name);
        }
        Self::flush_meta(inner)?;
        Ok(())
    }

    // ---- catalog views ----

    pub fn show_tables(&self) -> DbResult<RecordBatch> {
        self.with_inner(|inner| {
            let mut batch = RecordBatch::new(vec!["Tables".into()]);
            for name in inner.db.tables.keys() {
                batch.push(vec![Value::Str(name.clone())]);
            }
            Ok(batch)
        })
    }

    pub fn desc_table(&self, tab_name: &str) -> DbResult<RecordBatch> {
        self.with_inner(|inner| {
            let tab = inner.db.get_table(tab_name)?;
            let mut batch =
                RecordBatch::new(vec!["Field".into(), "Type".into(), "Index".into()]);
            for col in &tab.cols {
                let ty = match col.ty {
                    ColType::Str => format!("CHAR({})", col.len),
                    other => other.to_string(),
                };
                batch.push(vec![
                    Value::Str(col.name.clone()),
                    Value::Str(ty),
                    Value::Str(if col.indexed { "YES" } else { "NO" }.into()),
                ]);
            }
            Ok(batch)
        })
    }

    pub fn show_index(&self, tab_name: &str) -> DbResult<RecordBatch> {
        self.with_inner(|inner| {
            let tab = inner.db.get_table(tab_name)?;
            let mut batch = RecordBatch::new(vec!["Table".into(), "Columns".into()]);
            for ix in &tab.indexes {
                batch.push(vec![
                    Value::Str(tab_name.to_string()),
                    Value::Str(format!("({})", ix.col_names().join(","))),
                ]);
            }
            Ok(batch)
        })
    }

    // ---- handle lookups ----

    pub fn db_name(&self) -> DbResult<String> {
        self.with_inner(|inner| Ok(inner.db.name.clone()))
    }

    pub fn is_table(&self, tab_name: &str) -> bool {
        self.with_inner(|inner| Ok(inner.db.is_table(tab_name))).unwrap_or(false)
    }

    pub fn table_meta(&self, tab_name: &str) -> DbResult<TableMeta> {
        self.with_inner(|inner| inner.db.get_table(tab_name).cloned())
    }

    pub fn heap(&self, tab_name: &str) -> DbResult<Arc<HeapFile>> {
        self.with_inner(|inner| {
            inner
                .heaps
                .get(tab_name)
                .cloned()
                .ok_or_else(|| DbError::TableNotFound(tab_name.to_string()))
        })
    }

    pub fn index_handle(&self, tab_name: &str, col_names: &[String]) -> DbResult<Arc<IndexHandle>> {
        self.with_inner(|inner| {
            inner
                .indexes
                .get(&Self::index_key(tab_name, col_names))
                .cloned()
                .ok_or_else(|| DbError::IndexNotFound {
                    tab: tab_name.to_string(),
                    cols: col_names.join(", "),
                })
        })
    }

    /// Path of a table's heap file inside the open database.
    pub fn table_path(&self, tab_name: &str) -> DbResult<PathBuf> {
        self.with_inner(|inner| Ok(inner.db_dir.join(tab_name)))
    }
}

impl UndoStorage for SystemManager {
    fn undo_table_write(&self, record: &TableWriteRecord, ctx: &Context) -> DbResult<()> {
        let heap = self.heap(&record.tab_name)?;
        match record.kind {
            WriteKind::Insert => heap.delete(record.rid, Some(ctx)),
            WriteKind::Delete => heap.insert(&record.record, Some(ctx)).map(|_| ()),
            WriteKind::Update => heap.update(record.rid, &record.record, Some(ctx)),
        }
    }

    fn undo_index_write(&self, record: &IndexWriteRecord) -> DbResult<()> {
        let index = self.index_handle(&record.tab_name, &record.index_cols)?;
        match record.kind {
            WriteKind::Insert => index.delete_entry(&record.key).map(|_| ()),
            WriteKind::Delete => index.insert_entry(&record.key, record.rid),
            WriteKind::Update => unreachable!("index writes are never logged as WriteKind::Update"),
        }
    }
}

impl Drop for SystemManager {
    fn drop(&mut self) {
        if let Err(err) = self.close_db() {
            log::warn!("close_db on drop failed: {err}");
        }
    }
}
