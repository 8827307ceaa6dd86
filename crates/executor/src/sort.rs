use std::cmp::Ordering;

use catalog::{value_at, ColMeta};
use common::{DbResult, Rid, NO_PAGE};
use query::OrderByCol;

use crate::predicate::find_col;
use crate::Executor;

/// Materializing sort: pulls every child tuple, stable-sorts by the
/// order columns (each ascending or descending), and streams up to
/// `limit` tuples (`-1` for all). Fully equal keys compare `Equal`, so
/// the comparator is a strict weak ordering.
pub struct SortExec {
    child: Box<dyn Executor>,
    order_cols: Vec<OrderByCol>,
    limit: i64,
    sorted: Vec<(Vec<u8>, Rid)>,
    pos: usize,
}

impl SortExec {
    pub fn new(child: Box<dyn Executor>, order_cols: Vec<OrderByCol>, limit: i64) -> Self {
        Self { child, order_cols, limit, sorted: Vec::new(), pos: 0 }
    }

    fn bound(&self) -> usize {
        if self.limit < 0 {
            self.sorted.len()
        } else {
            self.sorted.len().min(self.limit as usize)
        }
    }
}

fn compare_tuples(
    a: &[u8],
    b: &[u8],
    cols: &[ColMeta],
    order_cols: &[OrderByCol],
) -> DbResult<Ordering> {
    for order in order_cols {
        let col = find_col(cols, &order.col.tab_name, &order.col.name)?;
        let lhs = value_at(a, col);
        let rhs = value_at(b, col);
        let ord = lhs.compare(&rhs).unwrap_or(Ordering::Equal);
        let ord = if order.desc { ord.reverse() } else { ord };
        if ord != Ordering::Equal {
            return Ok(ord);
        }
    }
    Ok(Ordering::Equal)
}

impl Executor for SortExec {
    fn begin(&mut self) -> DbResult<()> {
        self.sorted.clear();
        self.pos = 0;
        self.child.begin()?;
        while !self.child.is_end() {
            self.sorted.push((self.child.current()?, self.child.rid()));
            self.child.next()?;
        }
        let cols = self.child.columns().to_vec();
        let order_cols = &self.order_cols;
        let mut first_err = None;
        self.sorted.sort_by(|(a, _), (b, _)| {
            match compare_tuples(a, b, &cols, order_cols) {
                Ok(ord) => ord,
                Err(err) => {
                    first_err.get_or_insert(err);
                    Ordering::Equal
                }
            }
        });
        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn next(&mut self) -> DbResult<()> {
        if self.pos < self.bound() {
            self.pos += 1;
        }
        Ok(())
    }

    fn is_end(&self) -> bool {
        self.pos >= self.bound()
    }

    fn current(&self) -> DbResult<Vec<u8>> {
        Ok(self.sorted[self.pos].0.clone())
    }

    fn columns(&self) -> &[ColMeta] {
        self.child.columns()
    }

    fn tuple_len(&self) -> usize {
        self.child.tuple_len()
    }

    fn rid(&self) -> Rid {
        self.sorted
            .get(self.pos)
            .map(|(_, rid)| *rid)
            .unwrap_or(Rid::new(NO_PAGE, 0))
    }
}
