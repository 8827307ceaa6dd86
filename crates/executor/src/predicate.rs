//! Condition evaluation against raw tuples.

use catalog::{value_at, ColMeta};
use common::{DbError, DbResult};
use query::ast::CompOp;
use query::{CondRhs, Condition};
use std::cmp::Ordering;
use types::Value;

/// Find a bound column inside an operator's output schema. Joined
/// schemas carry rebased offsets, so the lookup goes by name.
pub fn find_col<'a>(cols: &'a [ColMeta], tab_name: &str, col_name: &str) -> DbResult<&'a ColMeta> {
    cols.iter()
        .find(|c| c.tab_name == tab_name && c.name == col_name)
        .ok_or_else(|| DbError::ColumnNotFound(format!("{tab_name}.{col_name}")))
}

pub fn compare_matches(op: CompOp, ord: Ordering) -> bool {
    match op {
        CompOp::Eq => ord == Ordering::Equal,
        CompOp::Ne => ord != Ordering::Equal,
        CompOp::Lt => ord == Ordering::Less,
        CompOp::Gt => ord == Ordering::Greater,
        CompOp::Le => ord != Ordering::Greater,
        CompOp::Ge => ord != Ordering::Less,
    }
}

/// Evaluate `lhs op rhs` on runtime values.
pub fn check_values(lhs: &Value, op: CompOp, rhs: &Value) -> DbResult<bool> {
    let ord = lhs.compare(rhs).ok_or_else(|| DbError::IncompatibleType {
        lhs: lhs.col_type().to_string(),
        rhs: rhs.col_type().to_string(),
    })?;
    Ok(compare_matches(op, ord))
}

/// Evaluate one condition against a tuple.
pub fn eval_cond(tuple: &[u8], cols: &[ColMeta], cond: &Condition) -> DbResult<bool> {
    let lhs_col = find_col(cols, &cond.lhs.tab_name, &cond.lhs.name)?;
    let lhs = value_at(tuple, lhs_col);
    let rhs = match &cond.rhs {
        CondRhs::Value(v) => v.clone(),
        CondRhs::Col(c) => {
            let rhs_col = find_col(cols, &c.tab_name, &c.name)?;
            value_at(tuple, rhs_col)
        }
    };
    check_values(&lhs, cond.op, &rhs)
}

/// True when the tuple satisfies every conjunct.
pub fn eval_conds(tuple: &[u8], cols: &[ColMeta], conds: &[Condition]) -> DbResult<bool> {
    for cond in conds {
        if !eval_cond(tuple, cols, cond)? {
            return Ok(false);
        }
    }
    Ok(true)
}
