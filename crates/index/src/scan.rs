use std::sync::Arc;

use common::{DbResult, Iid, Rid};

use crate::IndexHandle;

/// Iterator over index entries in `[lower, upper)` key order.
///
/// Advances by incrementing the slot and following the leaf chain when a
/// leaf runs out; terminates when the position reaches the upper bound.
pub struct IndexScan {
    index: Arc<IndexHandle>,
    iid: Iid,
    end: Iid,
}

impl IndexScan {
    pub fn new(index: Arc<IndexHandle>, lower: Iid, upper: Iid) -> Self {
        Self { index, iid: lower, end: upper }
    }

    pub fn is_end(&self) -> bool {
        self.iid == self.end
    }

    pub fn iid(&self) -> Iid {
        self.iid
    }

    pub fn rid(&self) -> DbResult<Rid> {
        self.index.rid_at(self.iid)
    }

    pub fn next(&mut self) -> DbResult<()> {
        if self.is_end() {
            return Ok(());
        }
        self.iid.slot_no += 1;
        if self.iid == self.end {
            return Ok(());
        }
        if self.iid.slot_no as usize >= self.index.leaf_size(self.iid.page_no)? {
            let next = self.index.leaf_next(self.iid.page_no)?;
            self.iid = Iid::new(next, 0);
        }
        Ok(())
    }
}
