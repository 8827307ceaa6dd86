use catalog::ColMeta;
use common::{DbResult, Rid, NO_PAGE};
use query::Condition;

use crate::predicate::eval_conds;
use crate::Executor;

/// Nested-loop inner join: for every left tuple, rescan the right child
/// and emit the concatenations that satisfy the join predicates.
///
/// The output schema is the two children's schemas back to back, with
/// the right child's offsets rebased by the left tuple length.
pub struct NestedLoopJoinExec {
    left: Box<dyn Executor>,
    right: Box<dyn Executor>,
    conds: Vec<Condition>,
    cols: Vec<ColMeta>,
    len: usize,
    current: Option<Vec<u8>>,
}

impl NestedLoopJoinExec {
    pub fn new(left: Box<dyn Executor>, right: Box<dyn Executor>, conds: Vec<Condition>) -> Self {
        let left_len = left.tuple_len();
        let mut cols = left.columns().to_vec();
        cols.extend(right.columns().iter().map(|c| {
            let mut col = c.clone();
            col.offset += left_len;
            col
        }));
        let len = left_len + right.tuple_len();
        Self { left, right, conds, cols, len, current: None }
    }

    /// Walk the cross product from the current cursor until a pair
    /// matches; `fresh_right` is set when the right side is already
    /// positioned on an untested tuple.
    fn seek_match(&mut self, mut fresh_right: bool) -> DbResult<()> {
        self.current = None;
        while !self.left.is_end() {
            if !fresh_right {
                self.right.next()?;
            }
            fresh_right = false;
            if self.right.is_end() {
                self.left.next()?;
                if self.left.is_end() {
                    return Ok(());
                }
                self.right.begin()?;
                fresh_right = true;
                continue;
            }
            let mut tuple = self.left.current()?;
            tuple.extend(self.right.current()?);
            if eval_conds(&tuple, &self.cols, &self.conds)? {
                self.current = Some(tuple);
                return Ok(());
            }
        }
        Ok(())
    }
}

impl Executor for NestedLoopJoinExec {
    fn begin(&mut self) -> DbResult<()> {
        self.left.begin()?;
        self.right.begin()?;
        if self.left.is_end() {
            self.current = None;
            return Ok(());
        }
        self.seek_match(true)
    }

    fn next(&mut self) -> DbResult<()> {
        if self.current.is_none() {
            return Ok(());
        }
        self.seek_match(false)
    }

    fn is_end(&self) -> bool {
        self.current.is_none()
    }

    fn current(&self) -> DbResult<Vec<u8>> {
        self.current
            .clone()
            .ok_or_else(|| common::DbError::Internal("join cursor past the end".into()))
    }

    fn columns(&self) -> &[ColMeta] {
        &self.cols
    }

    fn tuple_len(&self) -> usize {
        self.len
    }

    fn rid(&self) -> Rid {
        Rid::new(NO_PAGE, 0)
    }
}
