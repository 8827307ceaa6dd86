use std::sync::Arc;

use catalog::ColMeta;
use common::{DbResult, Rid, NO_PAGE};
use query::Condition;
use record::HeapFile;

use crate::predicate::eval_conds;
use crate::{ExecCtx, Executor};

/// Full heap scan with predicate filtering, under a table S lock.
pub struct SeqScanExec {
    ctx: ExecCtx,
    tab_name: String,
    heap: Arc<HeapFile>,
    cols: Vec<ColMeta>,
    len: usize,
    conds: Vec<Condition>,
    rid: Rid,
    done: bool,
}

impl SeqScanExec {
    pub fn new(ctx: ExecCtx, tab_name: &str, conds: Vec<Condition>) -> DbResult<Self> {
        let tab = ctx.sm.table_meta(tab_name)?;
        let heap = ctx.sm.heap(tab_name)?;
        let cols = tab.cols;
        let len = cols.last().map_or(0, |c| c.offset + c.len);
        Ok(Self {
            ctx,
            tab_name: tab_name.to_string(),
            heap,
            cols,
            len,
            conds,
            rid: Rid::new(NO_PAGE, 0),
            done: true,
        })
    }

    /// Move forward (or settle on the start position) until a tuple
    /// passes every predicate.
    fn seek_match(&mut self, mut pos: Option<Rid>) -> DbResult<()> {
        loop {
            let Some(rid) = pos else {
                self.done = true;
                self.rid = Rid::new(NO_PAGE, 0);
                return Ok(());
            };
            let tuple = self.heap.get(rid, Some(&self.ctx.lock_ctx()))?;
            if eval_conds(&tuple, &self.cols, &self.conds)? {
                self.rid = rid;
                self.done = false;
                return Ok(());
            }
            pos = self.heap.next_live_rid(rid)?;
        }
    }
}

impl Executor for SeqScanExec {
    fn begin(&mut self) -> DbResult<()> {
        self.ctx.loads.wait_until_free(&self.tab_name);
        self.ctx
            .locks
            .lock_shared_on_table(&self.ctx.txn, self.heap.fd())?;
        let first = self.heap.first_live_rid()?;
        self.seek_match(first)
    }

    fn next(&mut self) -> DbResult<()> {
        if self.done {
            return Ok(());
        }
        let next = self.heap.next_live_rid(self.rid)?;
        self.seek_match(next)
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
