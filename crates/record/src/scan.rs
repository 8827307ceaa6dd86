use common::{DbResult, Rid, NO_PAGE};

use crate::heap::HeapFile;

/// Walks the live records of a heap file in (page, slot) order.
///
/// `page_no == NO_PAGE` marks the end position.
pub struct HeapScan<'a> {
    file: &'a HeapFile,
    rid: Rid,
}

impl<'a> HeapScan<'a> {
    /// Open a scan positioned at the first live record.
    pub fn new(file: &'a HeapFile) -> DbResult<Self> {
        let rid = file.first_live_rid()?.unwrap_or(Rid::new(NO_PAGE, 0));
        Ok(Self { file, rid })
    }

    pub fn is_end(&self) -> bool {
        self.rid.page_no == NO_PAGE
    }

    pub fn rid(&self) -> Rid {
        self.rid
    }

    /// Advance to the next live record, or the end position.
    pub fn next(&mut self) -> DbResult<()> {
        if self.is_end() {
            return Ok(());
        }
        self.rid = self.file.next_live_rid(self.rid)?.unwrap_or(Rid::new(NO_PAGE, 0));
        Ok(())
    }
}
