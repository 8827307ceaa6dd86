use std::sync::Arc;

use catalog::{coerce_value, record_from_values, value_at, value_to_bytes, TableMeta};
use common::{DbError, DbResult, Rid};
use index::{make_key, IndexHandle};
use query::{Condition, SetClause};
use record::HeapFile;
use txn::{IndexWriteRecord, TableWriteRecord, WriteKind};
use types::Value;

use crate::predicate::eval_conds;
use crate::{ExecCtx, Executor};

/// Open handles for every index of a table, in catalog order.
fn index_handles(ctx: &ExecCtx, tab: &TableMeta) -> DbResult<Vec<Arc<IndexHandle>>> {
    tab.indexes
        .iter()
        .map(|ix| ctx.sm.index_handle(&tab.name, &ix.col_names()))
        .collect()
}

/// INSERT INTO: convert the values, place the record, and feed every
/// index. A duplicate key unwinds the record and any entries already
/// placed before the error surfaces; undo records are appended only for
/// the completed whole, so abort replays exactly what happened.
pub struct InsertExec {
    ctx: ExecCtx,
    tab: TableMeta,
    heap: Arc<HeapFile>,
    values: Vec<Value>,
    rid: Option<Rid>,
}

impl InsertExec {
    pub fn new(ctx: ExecCtx, tab_name: &str, values: Vec<Value>) -> DbResult<Self> {
        let tab = ctx.sm.table_meta(tab_name)?;
        if tab.cols.len() != values.len() {
            return Err(DbError::InvalidValueCount);
        }
        let heap = ctx.sm.heap(tab_name)?;
        Ok(Self { ctx, tab, heap, values, rid: None })
    }

    pub fn rid(&self) -> Option<Rid> {
        self.rid
    }

    pub fn execute(&mut self) -> DbResult<usize> {
        self.ctx
            .locks
            .lock_ix_on_table(&self.ctx.txn, self.heap.fd())?;
        let lock_ctx = self.ctx.lock_ctx();

        let record = record_from_values(&self.tab.cols, &self.values)?;
        let rid = self.heap.insert(&record, Some(&lock_ctx))?;

        let handles = index_handles(&self.ctx, &self.tab)?;
        let mut keys: Vec<Vec<u8>> = Vec::with_capacity(handles.len());
        for (ix_meta, handle) in self.tab.indexes.iter().zip(&handles) {
            let key = make_key(&record, &ix_meta.key_cols());
            if let Err(err) = handle.insert_entry(&key, rid) {
                // Unwind this statement's work before surfacing.
                for (done_key, done_handle) in keys.iter().zip(&handles) {
                    done_handle.delete_entry(done_key)?;
                }
                self.heap.delete(rid, Some(&lock_ctx))?;
                return Err(err);
            }
            keys.push(key);
        }

        self.ctx
            .txn
            .append_table_write(TableWriteRecord::inserted(&self.tab.name, rid));
        for (ix_meta, key) in self.tab.indexes.iter().zip(keys) {
            self.ctx.txn.append_index_write(IndexWriteRecord {
                kind: WriteKind::Insert,
                tab_name: self.tab.name.clone(),
                index_cols: ix_meta.col_names(),
                rid,
                key,
            });
        }
        self.rid = Some(rid);
        Ok(1)
    }
}

/// Collect the rids an update/delete will touch by draining a scan.
pub fn collect_rids(scan: &mut dyn Executor) -> DbResult<Vec<Rid>> {
    let mut rids = Vec::new();
    scan.begin()?;
    while !scan.is_end() {
        rids.push(scan.rid());
        scan.next()?;
    }
    Ok(rids)
}

/// UPDATE: per rid, re-check the predicates against the live record,
/// rewrite the indexed keys around the record overwrite, and log undo.
/// An index failure restores the record and every old entry before the
/// error surfaces.
pub struct UpdateExec {
    ctx: ExecCtx,
    tab: TableMeta,
    heap: Arc<HeapFile>,
    conds: Vec<Condition>,
    set_clauses: Vec<SetClause>,
    rids: Vec<Rid>,
}

impl UpdateExec {
    pub fn new(
        ctx: ExecCtx,
        tab_name: &str,
        set_clauses: Vec<SetClause>,
        conds: Vec<Condition>,
        rids: Vec<Rid>,
    ) -> DbResult<Self> {
        let tab = ctx.sm.table_meta(tab_name)?;
        let heap = ctx.sm.heap(tab_name)?;
        Ok(Self { ctx, tab, heap, conds, set_clauses, rids })
    }

    /// Apply the SET clauses to a record image.
    fn new_record(&self, old: &[u8]) -> DbResult<Vec<u8>> {
        let mut record = old.to_vec();
        for clause in &self.set_clauses {
            let col = &clause.col;
            let value = if clause.is_add {
                add_values(&value_at(old, col), &clause.value)?
            } else {
                coerce_value(col, &clause.value)?
            };
            let bytes = value_to_bytes(col, &value)?;
            record[col.offset..col.offset + col.len].copy_from_slice(&bytes);
        }
        Ok(record)
    }

    pub fn execute(&mut self) -> DbResult<usize> {
        self.ctx
            .locks
            .lock_ix_on_table(&self.ctx.txn, self.heap.fd())?;
        let lock_ctx = self.ctx.lock_ctx();
        let handles = index_handles(&self.ctx, &self.tab)?;

        let mut updated = 0;
        for &rid in &self.rids {
            let old = self.heap.get(rid, Some(&lock_ctx))?;
            if !eval_conds(&old, &self.tab.cols, &self.conds)? {
                continue;
            }
            let new = self.new_record(&old)?;

            let old_keys: Vec<Vec<u8>> = self
                .tab
                .indexes
                .iter()
                .map(|ix| make_key(&old, &ix.key_cols()))
                .collect();
            let new_keys: Vec<Vec<u8>> = self
                .tab
                .indexes
                .iter()
                .map(|ix| make_key(&new, &ix.key_cols()))
                .collect();

            for (handle, old_key) in handles.iter().zip(&old_keys) {
                handle.delete_entry(old_key)?;
            }
            self.heap.update(rid, &new, Some(&lock_ctx))?;

            let mut inserted = 0;
            let mut failure = None;
            for (handle, new_key) in handles.iter().zip(&new_keys) {
                match handle.insert_entry(new_key, rid) {
                    Ok(()) => inserted += 1,
                    Err(err) => {
                        failure = Some(err);
                        break;
                    }
                }
            }
            if let Some(err) = failure {
                // Put the record and every index back the way they were.
                for (handle, new_key) in handles.iter().zip(&new_keys).take(inserted) {
                    let _: bool = handle.delete_entry(new_key)?;
                }
                self.heap.update(rid, &old, Some(&lock_ctx))?;
                for (handle, old_key) in handles.iter().zip(&old_keys) {
                    handle.insert_entry(old_key, rid)?;
                }
                return Err(err);
            }

            for (ix_meta, old_key) in self.tab.indexes.iter().zip(&old_keys) {
                self.ctx.txn.append_index_write(IndexWriteRecord {
                    kind: WriteKind::Delete,
                    tab_name: self.tab.name.clone(),
                    index_cols: ix_meta.col_names(),
                    rid,
                    key: old_key.clone(),
                });
            }
            self.ctx
                .txn
                .append_table_write(TableWriteRecord::updated(&self.tab.name, rid, old));
            for (ix_meta, new_key) in self.tab.indexes.iter().zip(&new_keys) {
                self.ctx.txn.append_index_write(IndexWriteRecord {
                    kind: WriteKind::Insert,
                    tab_name: self.tab.name.clone(),
                    index_cols: ix_meta.col_names(),
                    rid,
                    key: new_key.clone(),
                });
            }
            updated += 1;
        }
        Ok(updated)
    }
}

/// `col = col + value`, defined for INT and FLOAT in all four
/// combinations (any FLOAT operand makes the result FLOAT).
fn add_values(old: &Value, addend: &Value) -> DbResult<Value> {
    match (old, addend) {
        (Value::Int(a), Value::Int(b)) => Ok(Value::Int(a.wrapping_add(*b))),
        (Value::Int(a), Value::Float(b)) => Ok(Value::Float(*a as f32 + b)),
        (Value::Float(a), Value::Int(b)) => Ok(Value::Float(a + *b as f32)),
        (Value::Float(a), Value::Float(b)) => Ok(Value::Float(a + b)),
        _ => Err(DbError::IncompatibleType {
            lhs: old.col_type().to_string(),
            rhs: addend.col_type().to_string(),
        }),
    }
}

/// DELETE: per rid, drop every index entry then the record, logging
/// undo as it goes so a mid-flight failure rolls back cleanly.
pub struct DeleteExec {
    ctx: ExecCtx,
    tab: TableMeta,
    heap: Arc<HeapFile>,
    conds: Vec<Condition>,
    rids: Vec<Rid>,
}

impl DeleteExec {
    pub fn new(
        ctx: ExecCtx,
        tab_name: &str,
        conds: Vec<Condition>,
        rids: Vec<Rid>,
    ) -> DbResult<Self> {
        let tab = ctx.sm.table_meta(tab_name)?;
        let heap = ctx.sm.heap(tab_name)?;
        Ok(Self { ctx, tab, heap, conds, rids })
    }

    pub fn execute(&mut self) -> DbResult<usize> {
        self.ctx
            .locks
            .lock_ix_on_table(&self.ctx.txn, self.heap.fd())?;
        let lock_ctx = self.ctx.lock_ctx();
        let handles = index_handles(&self.ctx, &self.tab)?;

        let mut deleted = 0;
        for &rid in &self.rids {
            let record = self.heap.get(rid, Some(&lock_ctx))?;
            if !eval_conds(&record, &self.tab.cols, &self.conds)? {
                continue;
            }

            for (ix_meta, handle) in self.tab.indexes.iter().zip(&handles) {
                let key = make_key(&record, &ix_meta.key_cols());
                handle.delete_entry(&key)?;
                self.ctx.txn.append_index_write(IndexWriteRecord {
                    kind: WriteKind::Delete,
                    tab_name: self.tab.name.clone(),
                    index_cols: ix_meta.col_names(),
                    rid,
                    key,
                });
            }

            self.heap.delete(rid, Some(&lock_ctx))?;
            self.ctx
                .txn
                .append_table_write(TableWriteRecord::deleted(&self.tab.name, rid, record));
            deleted += 1;
        }
        Ok(deleted)
    }
}
