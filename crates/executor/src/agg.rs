//! Aggregation: the grouped accumulator driver over an operator tree,
//! plus the two short-circuit paths that answer a single aggregate from
//! page headers or index boundaries without scanning tuples.

use std::collections::BTreeMap;

use catalog::{value_at, ColMeta, IndexMeta};
use common::{DbResult, Iid, RecordBatch};
use query::ast::AggFunc;
use query::{FastAggPlan, HavingCond, SelCol};
use types::Value;

use crate::index_scan::compute_bounds;
use crate::predicate::{check_values, find_col};
use crate::{ExecCtx, Executor};

/// One accumulated output column.
#[derive(Clone, Debug)]
struct AggItem {
    agg: Option<AggFunc>,
    /// Bound column; `None` for `COUNT(*)`.
    col: Option<ColMeta>,
}

#[derive(Clone, Debug)]
enum AggState {
    /// Plain column inside GROUP BY: the group's (constant) value.
    Passthrough(Value),
    Count(i32),
    Sum(Value),
    Min(Value),
    Max(Value),
}

impl AggState {
    fn init(agg: Option<AggFunc>, value: Value) -> Self {
        match agg {
            None => AggState::Passthrough(value),
            Some(AggFunc::Count) => AggState::Count(1),
            Some(AggFunc::Sum) => AggState::Sum(value),
            Some(AggFunc::Min) => AggState::Min(value),
            Some(AggFunc::Max) => AggState::Max(value),
        }
    }

    fn fold(&mut self, value: Value) -> DbResult<()> {
        match self {
            AggState::Passthrough(_) => {}
            AggState::Count(n) => *n += 1,
            AggState::Sum(acc) => {
                *acc = match (&*acc, &value) {
                    (Value::Int(a), Value::Int(b)) => Value::Int(a + b),
                    (Value::Float(a), Value::Float(b)) => Value::Float(a + b),
                    (Value::Int(a), Value::Float(b)) => Value::Float(*a as f32 + b),
                    (Value::Float(a), Value::Int(b)) => Value::Float(a + *b as f32),
                    _ => {
                        return Err(common::DbError::IncompatibleType {
                            lhs: acc.col_type().to_string(),
                            rhs: value.col_type().to_string(),
                        })
                    }
                };
            }
            AggState::Min(acc) => {
                if value.compare(acc).is_some_and(|o| o.is_lt()) {
                    *acc = value;
                }
            }
            AggState::Max(acc) => {
                if value.compare(acc).is_some_and(|o| o.is_gt()) {
                    *acc = value;
                }
            }
        }
        Ok(())
    }

    fn finish(&self) -> Value {
        match self {
            AggState::Passthrough(v) | AggState::Sum(v) | AggState::Min(v) | AggState::Max(v) => {
                v.clone()
            }
            AggState::Count(n) => Value::Int(*n),
        }
    }
}

struct GroupAcc {
    count_star: i32,
    states: Vec<AggState>,
}

/// Drive the operator tree to completion and aggregate its tuples:
/// groups keyed by the GROUP BY values, per-column running state,
/// HAVING evaluated on the finalized groups. Aggregates appearing only
/// in HAVING are accumulated but not emitted.
pub fn aggregate_select(
    root: &mut dyn Executor,
    sel_cols: &[SelCol],
    group_by: &[ColMeta],
    having: &[HavingCond],
) -> DbResult<RecordBatch> {
    let cols = root.columns().to_vec();

    // The accumulation list: SELECT items first, then HAVING-only ones.
    let mut items: Vec<AggItem> = sel_cols
        .iter()
        .map(|sc| AggItem { agg: sc.agg, col: sc.col.clone() })
        .collect();
    let emitted = items.len();
    for cond in having {
        if cond.col.is_none() {
            continue; // COUNT(*) rides on count_star
        }
        let already = items.iter().any(|item| {
            item.agg == Some(cond.agg)
                && item.col.as_ref().map(|c| c.name.as_str())
                    == cond.col.as_ref().map(|c| c.name.as_str())
        });
        if !already {
            items.push(AggItem { agg: Some(cond.agg), col: cond.col.clone() });
        }
    }

    let mut groups: BTreeMap<Vec<String>, GroupAcc> = BTreeMap::new();

    root.begin()?;
    while !root.is_end() {
        let tuple = root.current()?;

        let mut key = Vec::with_capacity(group_by.len());
        for gcol in group_by {
            let col = find_col(&cols, &gcol.tab_name, &gcol.name)?;
            key.push(value_at(&tuple, col).to_string());
        }

        let mut item_values = Vec::with_capacity(items.len());
        for item in &items {
            let value = match &item.col {
                Some(c) => value_at(&tuple, find_col(&cols, &c.tab_name, &c.name)?),
                None => Value::Int(1),
            };
            item_values.push(value);
        }

        match groups.get_mut(&key) {
            None => {
                let states = items
                    .iter()
                    .zip(item_values)
                    .map(|(item, v)| AggState::init(item.agg, v))
                    .collect();
                groups.insert(key, GroupAcc { count_star: 1, states });
            }
            Some(acc) => {
                acc.count_star += 1;
                for (state, value) in acc.states.iter_mut().zip(item_values) {
                    state.fold(value)?;
                }
            }
        }
        root.next()?;
    }

    let mut batch = RecordBatch::new(sel_cols.iter().map(|sc| sc.caption()).collect());
    'groups: for acc in groups.values() {
        for cond in having {
            let lhs = match &cond.col {
                None => Value::Int(acc.count_star),
                Some(col) => {
                    let idx = items
                        .iter()
                        .position(|item| {
                            item.agg == Some(cond.agg)
                                && item.col.as_ref().is_some_and(|c| c.name == col.name)
                        })
                        .expect("having aggregate was accumulated");
                    acc.states[idx].finish()
                }
            };
            if !check_values(&lhs, cond.op, &cond.value)? {
                continue 'groups;
            }
        }
        batch.push(acc.states[..emitted].iter().map(|s| s.finish()).collect());
    }
    Ok(batch)
}

/// COUNT over a whole table answered from the per-page record counts.
pub fn fast_count_all(ctx: &ExecCtx, tab_name: &str, caption: &str) -> DbResult<RecordBatch> {
    ctx.loads.wait_until_free(tab_name);
    let heap = ctx.sm.heap(tab_name)?;
    let mut total: i64 = 0;
    for page_no in 1..heap.num_pages() {
        total += heap.page_record_count(page_no)? as i64;
    }
    let mut batch = RecordBatch::new(vec![caption.to_string()]);
    batch.push(vec![Value::Int(total as i32)]);
    Ok(batch)
}

/// Entries in `[lower, upper)` counted by walking leaf sizes.
fn count_between(handle: &index::IndexHandle, lower: Iid, upper: Iid) -> DbResult<i64> {
    if lower == upper {
        return Ok(0);
    }
    if lower.page_no == upper.page_no {
        return Ok(upper.slot_no as i64 - lower.slot_no as i64);
    }
    let mut total = handle.leaf_size(lower.page_no)? as i64 - lower.slot_no as i64;
    let mut page_no = handle.leaf_next(lower.page_no)?;
    while page_no != upper.page_no {
        total += handle.leaf_size(page_no)? as i64;
        page_no = handle.leaf_next(page_no)?;
    }
    total += upper.slot_no as i64;
    Ok(total)
}

/// MIN/MAX/COUNT over one indexed column, answered from the boundary
/// iids: COUNT from the leaf sizes between them, MIN from the key at
/// the lower bound, MAX from the key just before the upper bound.
pub fn fast_agg_with_index(ctx: &ExecCtx, plan: &FastAggPlan, caption: &str) -> DbResult<RecordBatch> {
    let FastAggPlan::WithIndex { tab_name, index: ix_meta, agg, conds } = plan else {
        return Err(common::DbError::Internal("fast path needs an index plan".into()));
    };
    ctx.loads.wait_until_free(tab_name);
    let index = ctx.sm.index_handle(tab_name, &ix_meta.col_names())?;

    let mut batch = RecordBatch::new(vec![caption.to_string()]);
    let (lower_key, upper_key) = compute_bounds(ix_meta, conds)?;
    if types::compare_keys(&lower_key, &upper_key, &ix_meta.col_types(), &ix_meta.col_lens())
        == std::cmp::Ordering::Greater
    {
        // Contradictory range: nothing qualifies.
        if *agg == AggFunc::Count {
            batch.push(vec![Value::Int(0)]);
        }
        return Ok(batch);
    }
    let lower = index.lower_bound(&lower_key)?;
    let upper = index.upper_bound(&upper_key)?;
    let count = count_between(&index, lower, upper)?;
    match agg {
        AggFunc::Count => {
            batch.push(vec![Value::Int(count as i32)]);
        }
        AggFunc::Min => {
            if count > 0 {
                batch.push(vec![key_first_col(&index, ix_meta, lower)?]);
            }
        }
        AggFunc::Max => {
            if count > 0 {
                let last = if upper.slot_no > 0 {
                    Iid::new(upper.page_no, upper.slot_no - 1)
                } else {
                    let prev = index.leaf_prev(upper.page_no)?;
                    Iid::new(prev, index.leaf_size(prev)? as u32 - 1)
                };
                batch.push(vec![key_first_col(&index, ix_meta, last)?]);
            }
        }
        AggFunc::Sum => {
            return Err(common::DbError::Internal("SUM has no index fast path".into()));
        }
    }
    Ok(batch)
}

/// Decode the leading key column at an iterator position.
fn key_first_col(
    index: &index::IndexHandle,
    ix_meta: &IndexMeta,
    iid: Iid,
) -> DbResult<Value> {
    let key = index.key_bytes_at(iid)?;
    let col = &ix_meta.cols[0];
    Ok(Value::decode(col.ty, &key[..col.len]))
}
