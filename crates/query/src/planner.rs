//! Planner and optimizer: left-deep join trees with predicates pushed
//! to the deepest plan that binds them, sequential-vs-index access
//! selection, and the single-aggregate short-circuit routes.

use catalog::{IndexMeta, SystemManager};
use common::{DbError, DbResult};

use crate::analyze::{Condition, Query};
use crate::ast::{AggFunc, CompOp};
use crate::plan::{Plan, ScanAccess, ScanPlan};

/// How the portal will drive a statement.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PortalKind {
    OneSelect,
    DmlWithoutSelect,
    MultiQuery,
    CmdUtility,
    AggSelect,
    AggSelectWithIndex,
    FastAgg,
    FastAggWithIndex,
}

/// A routed single-aggregate short circuit.
#[derive(Clone, Debug)]
pub enum FastAggPlan {
    /// COUNT over a whole table, answered from per-page record counts.
    CountAll { tab_name: String },
    /// MIN/MAX/COUNT over one indexed column, answered from boundary
    /// iids and leaf sizes.
    WithIndex {
        tab_name: String,
        index: IndexMeta,
        agg: AggFunc,
        conds: Vec<Condition>,
    },
}

/// Build the scan for one table: its pushed-down conditions plus the
/// access method. Index selection keys off the value-condition columns;
/// the matched index's uncovered conditions stay as residual filters.
pub fn plan_scan(sm: &SystemManager, tab_name: &str, conds: Vec<Condition>) -> DbResult<ScanPlan> {
    let tab = sm.table_meta(tab_name)?;
    let index_cols: Vec<String> = conds
        .iter()
        .filter(|c| c.is_value_cond())
        .map(|c| c.lhs.name.clone())
        .collect();
    let access = match tab.matching_index(&index_cols) {
        Some(index) => {
            log::debug!(
                "scan of {tab_name} uses index ({})",
                index.col_names().join(", ")
            );
            ScanAccess::Index(index.clone())
        }
        None => ScanAccess::Seq,
    };
    Ok(ScanPlan { tab_name: tab_name.to_string(), conds, access })
}

/// Plan a SELECT: scans in FROM order, joined left-deep, then sort and
/// projection. Conditions go to the deepest plan binding all their
/// columns.
pub fn plan_select(sm: &SystemManager, query: &Query) -> DbResult<Plan> {
    if query.tables.is_empty() {
        return Err(DbError::Internal("SELECT requires a table".into()));
    }

    // Split the conjuncts: single-table ones sink into that table's
    // scan, the rest wait for the join that binds both sides.
    let mut per_table: Vec<Vec<Condition>> = vec![Vec::new(); query.tables.len()];
    let mut join_conds: Vec<(usize, Condition)> = Vec::new();
    for cond in &query.conds {
        let tabs = cond.tables();
        if tabs.len() == 1 {
            let idx = table_index(&query.tables, tabs[0])?;
            per_table[idx].push(cond.clone());
        } else {
            let hi = tabs
                .iter()
                .map(|t| table_index(&query.tables, t))
                .collect::<DbResult<Vec<_>>>()?
                .into_iter()
                .max()
                .unwrap();
            join_conds.push((hi, cond.clone()));
        }
    }

    let mut plan = Plan::Scan(plan_scan(sm, &query.tables[0], per_table[0].clone())?);
    for (i, tab) in query.tables.iter().enumerate().skip(1) {
        let right = Plan::Scan(plan_scan(sm, tab, per_table[i].clone())?);
        let conds = join_conds
            .iter()
            .filter(|(hi, _)| *hi == i)
            .map(|(_, c)| c.clone())
            .collect();
        plan = Plan::Join { left: Box::new(plan), right: Box::new(right), conds };
    }

    if !query.order_by.is_empty() || query.limit >= 0 {
        plan = Plan::Sort {
            input: Box::new(plan),
            order_cols: query.order_by.clone(),
            limit: query.limit,
        };
    }

    Ok(Plan::Projection { input: Box::new(plan), sel_cols: query.sel_cols.clone() })
}

fn table_index(tables: &[String], name: &str) -> DbResult<usize> {
    tables
        .iter()
        .position(|t| t == name)
        .ok_or_else(|| DbError::TableNotFound(name.to_string()))
}

/// Route a single-aggregate SELECT without GROUP BY to a fast path when
/// one applies; `None` falls back to the operator pipeline.
///
/// The index route is taken only when every condition is an
/// equality/inclusive-range literal on the index's first column (which
/// must also be the aggregated column for MIN/MAX), so the boundary
/// iids answer the aggregate exactly.
pub fn route_fast_agg(sm: &SystemManager, query: &Query) -> DbResult<Option<FastAggPlan>> {
    if query.tables.len() != 1
        || query.sel_cols.len() != 1
        || !query.group_by.is_empty()
        || !query.having.is_empty()
        || !query.order_by.is_empty()
    {
        return Ok(None);
    }
    let sel = &query.sel_cols[0];
    let Some(agg) = sel.agg else {
        return Ok(None);
    };
    let tab_name = &query.tables[0];

    if query.conds.is_empty() && agg == AggFunc::Count {
        return Ok(Some(FastAggPlan::CountAll { tab_name: tab_name.clone() }));
    }
    if agg == AggFunc::Sum {
        return Ok(None);
    }

    // All conditions must be exact-bound literals on one column.
    let mut cond_col: Option<&str> = None;
    for cond in &query.conds {
        if !cond.is_value_cond() || !matches!(cond.op, CompOp::Eq | CompOp::Le | CompOp::Ge) {
            return Ok(None);
        }
        match cond_col {
            None => cond_col = Some(&cond.lhs.name),
            Some(name) if name == cond.lhs.name => {}
            Some(_) => return Ok(None),
        }
    }

    let target_col = match (agg, &sel.col) {
        // MIN/MAX read the key itself, so the aggregate column must
        // lead the index.
        (AggFunc::Min | AggFunc::Max, Some(col)) => col.name.as_str(),
        (AggFunc::Count, _) => match cond_col {
            Some(name) => name,
            None => return Ok(None),
        },
        _ => return Ok(None),
    };
    if let Some(name) = cond_col {
        if name != target_col {
            return Ok(None);
        }
    }

    let tab = sm.table_meta(tab_name)?;
    let index = tab
        .indexes
        .iter()
        .find(|ix| ix.cols.first().is_some_and(|c| c.name == target_col));
    let Some(index) = index else {
        return Ok(None);
    };
    Ok(Some(FastAggPlan::WithIndex {
        tab_name: tab_name.clone(),
        index: index.clone(),
        agg,
        conds: query.conds.clone(),
    }))
}

/// Portal tag for a planned SELECT.
pub fn select_portal_kind(query: &Query, plan: &Plan, fast: Option<&FastAggPlan>) -> PortalKind {
    match fast {
        Some(FastAggPlan::CountAll { .. }) => PortalKind::FastAgg,
        Some(FastAggPlan::WithIndex { .. }) => PortalKind::FastAggWithIndex,
        None => {
            if query.is_aggregate() {
                if plan_uses_index(plan) {
                    PortalKind::AggSelectWithIndex
                } else {
                    PortalKind::AggSelect
                }
            } else {
                PortalKind::OneSelect
            }
        }
    }
}

fn plan_uses_index(plan: &Plan) -> bool {
    match plan {
        Plan::Scan(scan) => matches!(scan.access, ScanAccess::Index(_)),
        Plan::Join { left, right, .. } => plan_uses_index(left) || plan_uses_index(right),
        Plan::Sort { input, .. } | Plan::Projection { input, .. } => plan_uses_index(input),
    }
}
