use catalog::ColMeta;
use common::{DbError, DbResult, Rid};
use query::SelCol;

use crate::predicate::find_col;
use crate::Executor;

/// Materializes a tuple holding only the selected columns, with offsets
/// recomputed for the narrower layout. Row identity passes through.
pub struct ProjectionExec {
    child: Box<dyn Executor>,
    /// (source column in the child schema, column in the output schema)
    mapping: Vec<(ColMeta, ColMeta)>,
    cols: Vec<ColMeta>,
    len: usize,
}

impl ProjectionExec {
    pub fn new(child: Box<dyn Executor>, sel_cols: &[SelCol]) -> DbResult<Self> {
        let mut mapping = Vec::with_capacity(sel_cols.len());
        let mut cols = Vec::with_capacity(sel_cols.len());
        let mut offset = 0;
        for sel in sel_cols {
            let src = sel
                .col
                .as_ref()
                .ok_or_else(|| DbError::Internal("projection over a column-less item".into()))?;
            let child_col = find_col(child.columns(), &src.tab_name, &src.name)?.clone();
            let mut out = child_col.clone();
            out.offset = offset;
            offset += out.len;
            mapping.push((child_col, out.clone()));
            cols.push(out);
        }
        Ok(Self { child, mapping, cols, len: offset })
    }
}

impl Executor for ProjectionExec {
    fn begin(&mut self) -> DbResult<()> {
        self.child.begin()
    }

    fn next(&mut self) -> DbResult<()> {
        self.child.next()
    }

    fn is_end(&self) -> bool {
        self.child.is_end()
    }

    fn current(&self) -> DbResult<Vec<u8>> {
        let tuple = self.child.current()?;
        let mut out = vec![0u8; self.len];
        for (src, dst) in &self.mapping {
            out[dst.offset..dst.offset + dst.len]
                .copy_from_slice(&tuple[src.offset..src.offset + src.len]);
        }
        Ok(out)
    }

    fn columns(&self) -> &[ColMeta] {
        &self.cols
    }

    fn tuple_len(&self) -> usize {
        self.len
    }

    fn rid(&self) -> Rid {
        self.child.rid()
    }
}
