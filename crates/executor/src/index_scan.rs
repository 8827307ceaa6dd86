use std::sync::Arc;

use catalog::{value_to_bytes, ColMeta, IndexMeta};
use common::{DbResult, Rid, NO_PAGE};
use index::{IndexHandle, IndexScan};
use query::ast::CompOp;
use query::{CondRhs, Condition};
use record::HeapFile;
use types::ColType;

use crate::predicate::eval_conds;
use crate::{ExecCtx, Executor};

/// Compute the composite key range `[lower, upper]` the conditions pin
/// on an index: equality narrows both ends, `>`/`>=` the lower, `<`/`<=`
/// the upper, `<>` nothing. Unconstrained columns fall back to the type
/// sentinels, so a prefix match still bounds the scan.
pub(crate) fn compute_bounds(
    index: &IndexMeta,
    conds: &[Condition],
) -> DbResult<(Vec<u8>, Vec<u8>)> {
    let mut lower = Vec::with_capacity(index.col_tot_len);
    let mut upper = Vec::with_capacity(index.col_tot_len);

    for col in &index.cols {
        let mut low: Vec<u8> = match col.ty {
            ColType::Int => i32::MIN.to_le_bytes().to_vec(),
            ColType::Float => (-f32::MAX).to_le_bytes().to_vec(),
            ColType::Str => vec![0x00; col.len],
            ColType::Datetime => 0u64.to_le_bytes().to_vec(),
        };
        let mut high: Vec<u8> = match col.ty {
            ColType::Int => i32::MAX.to_le_bytes().to_vec(),
            ColType::Float => f32::MAX.to_le_bytes().to_vec(),
            ColType::Str => vec![0xFF; col.len],
            ColType::Datetime => u64::MAX.to_le_bytes().to_vec(),
        };

        let col_types = [col.ty];
        let col_lens = [col.len];
        let tighter = |a: &[u8], b: &[u8]| types::compare_keys(a, b, &col_types, &col_lens);

        for cond in conds {
            if cond.lhs.name != col.name {
                continue;
            }
            let CondRhs::Value(value) = &cond.rhs else {
                continue;
            };
            let bytes = value_to_bytes(col, value)?;
            match cond.op {
                CompOp::Eq => {
                    if tighter(&bytes, &low).is_gt() {
                        low = bytes.clone();
                    }
                    if tighter(&bytes, &high).is_lt() {
                        high = bytes;
                    }
                }
                CompOp::Gt | CompOp::Ge => {
                    if tighter(&bytes, &low).is_gt() {
                        low = bytes;
                    }
                }
                CompOp::Lt | CompOp::Le => {
                    if tighter(&bytes, &high).is_lt() {
                        high = bytes;
                    }
                }
                CompOp::Ne => {}
            }
        }

        lower.extend_from_slice(&low);
        upper.extend_from_slice(&high);
    }
    Ok((lower, upper))
}

/// Index-driven scan: a key range picked from the predicates, with the
/// predicates re-checked per tuple (the index covers only a prefix and
/// strict bounds keep their literal in range).
pub struct IndexScanExec {
    ctx: ExecCtx,
    tab_name: String,
    heap: Arc<HeapFile>,
    index: Arc<IndexHandle>,
    index_meta: IndexMeta,
    cols: Vec<ColMeta>,
    len: usize,
    conds: Vec<Condition>,
    scan: Option<IndexScan>,
    rid: Rid,
    done: bool,
}

impl IndexScanExec {
    pub fn new(
        ctx: ExecCtx,
        tab_name: &str,
        conds: Vec<Condition>,
        index_meta: IndexMeta,
    ) -> DbResult<Self> {
        let tab = ctx.sm.table_meta(tab_name)?;
        let heap = ctx.sm.heap(tab_name)?;
        let index = ctx.sm.index_handle(tab_name, &index_meta.col_names())?;
        let cols = tab.cols;
        let len = cols.last().map_or(0, |c| c.offset + c.len);
        Ok(Self {
            ctx,
            tab_name: tab_name.to_string(),
            heap,
            index,
            index_meta,
            cols,
            len,
            conds,
            scan: None,
            rid: Rid::new(NO_PAGE, 0),
            done: true,
        })
    }

    /// Advance the underlying index scan until a tuple passes the
    /// residual predicates.
    fn settle(&mut self) -> DbResult<()> {
        let lock_ctx = self.ctx.lock_ctx();
        let scan = self.scan.as_mut().expect("scan started");
        while !scan.is_end() {
            let rid = scan.rid()?;
            let tuple = self.heap.get(rid, Some(&lock_ctx))?;
            if eval_conds(&tuple, &self.cols, &self.conds)? {
                self.rid = rid;
                self.done = false;
                return Ok(());
            }
            scan.next()?;
        }
        self.done = true;
        self.rid = Rid::new(NO_PAGE, 0);
        Ok(())
    }
}

impl Executor for IndexScanExec {
    fn begin(&mut self) -> DbResult<()> {
        self.ctx.loads.wait_until_free(&self.tab_name);
        self.ctx
            .locks
            .lock_shared_on_table(&self.ctx.txn, self.heap.fd())?;

        let (lower_key, upper_key) = compute_bounds(&self.index_meta, &self.conds)?;
        if types::compare_keys(
            &lower_key,
            &upper_key,
            &self.index_meta.col_types(),
            &self.index_meta.col_lens(),
        ) == std::cmp::Ordering::Greater
        {
            // Contradictory range: nothing qualifies.
            self.scan = None;
            self.done = true;
            self.rid = Rid::new(NO_PAGE, 0);
            return Ok(());
        }
        let lower = self.index.lower_bound(&lower_key)?;
        let upper = self.index.upper_bound(&upper_key)?;
        self.scan = Some(IndexScan::new(Arc::clone(&self.index), lower, upper));
        self.settle()
    }

    fn next(&mut self) -> DbResult<()> {
        if self.done {
            return Ok(());
        }
        self.scan.as_mut().expect("scan started").next()?;
        self.settle()
    }

    fn is_end(&self) -> bool {
        self.done
    }

    fn current(&self) -> DbResult<Vec<u8>> {
        self.heap.get(self.rid, Some(&self.ctx.lock_ctx()))
    }

    fn columns(&self) -> &[ColMeta] {
        &self.cols
    }

    fn tuple_len(&self) -> usize {
        self.len
    }

    fn rid(&self) -> Rid {
        self.rid
    }
}
