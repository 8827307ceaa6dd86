//! Name and type binding: lowers raw statements into a bound [`Query`]
//! with every column resolved against the catalog.

use catalog::{ColMeta, SystemManager};
use common::{DbError, DbResult};
use types::{DateTime, Value};

use crate::ast::{
    AggFunc, AggTarget, CompOp, RawCol, RawCond, RawCondLhs, RawExpr, RawOrderBy, RawSetClause,
    SelItem, SelectStmt,
};

/// A bound SELECT list entry; `col` is `None` only for `COUNT(*)`.
#[derive(Clone, Debug)]
pub struct SelCol {
    pub col: Option<ColMeta>,
    pub agg: Option<AggFunc>,
    pub alias: String,
}

impl SelCol {
    pub fn caption(&self) -> String {
        self.alias.clone()
    }
}

/// Right-hand side of a bound condition.
#[derive(Clone, Debug)]
pub enum CondRhs {
    Value(Value),
    Col(ColMeta),
}

/// A bound WHERE conjunct, normalized so the column sits on the left.
#[derive(Clone, Debug)]
pub struct Condition {
    pub lhs: ColMeta,
    pub op: CompOp,
    pub rhs: CondRhs,
}

impl Condition {
    pub fn is_value_cond(&self) -> bool {
        matches!(self.rhs, CondRhs::Value(_))
    }

    /// Tables this condition mentions.
    pub fn tables(&self) -> Vec<&str> {
        let mut tabs = vec![self.lhs.tab_name.as_str()];
        if let CondRhs::Col(col) = &self.rhs {
            if col.tab_name != self.lhs.tab_name {
                tabs.push(col.tab_name.as_str());
            }
        }
        tabs
    }
}

/// A bound HAVING conjunct: an aggregate (or `COUNT(*)` with `col`
/// `None`) compared against a literal.
#[derive(Clone, Debug)]
pub struct HavingCond {
    pub agg: AggFunc,
    pub col: Option<ColMeta>,
    pub op: CompOp,
    pub value: Value,
}

/// A bound SET clause.
#[derive(Clone, Debug)]
pub struct SetClause {
    pub col: ColMeta,
    pub value: Value,
    pub is_add: bool,
}

#[derive(Clone, Debug)]
pub struct OrderByCol {
    pub col: ColMeta,
    pub desc: bool,
}

/// Analyzer output: one statement's bound query state.
#[derive(Clone, Debug, Default)]
pub struct Query {
    pub sel_cols: Vec<SelCol>,
    pub tables: Vec<String>,
    pub conds: Vec<Condition>,
    pub group_by: Vec<ColMeta>,
    pub having: Vec<HavingCond>,
    pub order_by: Vec<OrderByCol>,
    pub limit: i64,
    pub values: Vec<Value>,
    pub set_clauses: Vec<SetClause>,
}

impl Query {
    pub fn is_aggregate(&self) -> bool {
        self.sel_cols.iter().any(|c| c.agg.is_some())
    }
}

fn all_cols(sm: &SystemManager, tables: &[String]) -> DbResult<Vec<ColMeta>> {
    let mut cols = Vec::new();
    for tab in tables {
        cols.extend(sm.table_meta(tab)?.cols);
    }
    Ok(cols)
}

/// Resolve a possibly-unqualified column against the statement's
/// tables; ambiguity and absence are both errors.
fn bind_col(all: &[ColMeta], col: &RawCol) -> DbResult<ColMeta> {
    if let Some(tab) = &col.tab_name {
        return all
            .iter()
            .find(|c| c.tab_name == *tab && c.name == col.col_name)
            .cloned()
            .ok_or_else(|| DbError::ColumnNotFound(format!("{tab}.{}", col.col_name)));
    }
    let mut hits = all.iter().filter(|c| c.name == col.col_name);
    let first = hits
        .next()
        .ok_or_else(|| DbError::ColumnNotFound(col.col_name.clone()))?;
    if hits.next().is_some() {
        return Err(DbError::AmbiguousColumn(col.col_name.clone()));
    }
    Ok(first.clone())
}

/// DATETIME literals travel as strings; canonicalize a value condition
/// against its column's type and reject incomparable pairs.
fn bind_cond_value(lhs: &ColMeta, value: &Value) -> DbResult<Value> {
    use types::ColType;
    match (lhs.ty, value) {
        (ColType::Datetime, Value::Str(s)) => {
            let dt = DateTime::parse(s).ok_or_else(|| DbError::TypeOverflow {
                ty: "DATETIME".into(),
                val: s.clone(),
            })?;
            Ok(Value::Datetime(dt))
        }
        (ColType::Str, Value::Datetime(dt)) => Ok(Value::Str(dt.to_string())),
        _ => {
            if !Value::types_comparable(lhs.ty, value.col_type()) {
                return Err(DbError::IncompatibleType {
                    lhs: lhs.ty.to_string(),
                    rhs: value.col_type().to_string(),
                });
            }
            Ok(value.clone())
        }
    }
}

/// Bind the WHERE conjuncts, swapping sides where needed so the (or a)
/// column is on the left.
fn bind_conds(all: &[ColMeta], raw: &[RawCond]) -> DbResult<Vec<Condition>> {
    let mut conds = Vec::with_capacity(raw.len());
    for cond in raw {
        let RawCondLhs::Col(lhs_col) = &cond.lhs else {
            return Err(DbError::Internal(
                "aggregates are not allowed in WHERE".into(),
            ));
        };
        match &cond.rhs {
            RawExpr::Value(v) => {
                let lhs = bind_col(all, lhs_col)?;
                let value = bind_cond_value(&lhs, v)?;
                conds.push(Condition { lhs, op: cond.op, rhs: CondRhs::Value(value) });
            }
            RawExpr::Col(rhs_col) => {
                let lhs = bind_col(all, lhs_col)?;
                let rhs = bind_col(all, rhs_col)?;
                if !Value::types_comparable(lhs.ty, rhs.ty) {
                    return Err(DbError::IncompatibleType {
                        lhs: lhs.ty.to_string(),
                        rhs: rhs.ty.to_string(),
                    });
                }
                conds.push(Condition { lhs, op: cond.op, rhs: CondRhs::Col(rhs) });
            }
        }
    }
    Ok(conds)
}

fn agg_alias(func: AggFunc, target: &AggTarget, alias: &Option<String>) -> String {
    if let Some(name) = alias {
        return name.clone();
    }
    let func_name = match func {
        AggFunc::Count => "COUNT",
        AggFunc::Sum => "SUM",
        AggFunc::Max => "MAX",
        AggFunc::Min => "MIN",
    };
    match target {
        AggTarget::Star => format!("{func_name}(*)"),
        AggTarget::Col(col) => format!("{func_name}({})", col.col_name),
    }
}

/// Bind a SELECT: tables, select list, GROUP BY/HAVING placement rules,
/// WHERE conjuncts, ORDER BY.
pub fn analyze_select(sm: &SystemManager, stmt: &SelectStmt) -> DbResult<Query> {
    for tab in &stmt.tabs {
        if !sm.is_table(tab) {
            return Err(DbError::TableNotFound(tab.clone()));
        }
    }
    let all = all_cols(sm, &stmt.tabs)?;

    let mut query = Query {
        tables: stmt.tabs.clone(),
        limit: stmt.limit,
        ..Default::default()
    };

    // GROUP BY columns first; the select-list checks refer to them.
    for col in &stmt.group_by {
        query.group_by.push(bind_col(&all, col)?);
    }

    if stmt.sel_items.is_empty() {
        for col in &all {
            query.sel_cols.push(SelCol {
                alias: col.name.clone(),
                col: Some(col.clone()),
                agg: None,
            });
        }
    } else {
        for item in &stmt.sel_items {
            match item {
                SelItem::Col(raw) => {
                    let col = bind_col(&all, raw)?;
                    if !query.group_by.is_empty()
                        && !query.group_by.iter().any(|g| g.name == col.name)
                    {
                        return Err(DbError::Internal(format!(
                            "column {} must appear in GROUP BY",
                            col.name
                        )));
                    }
                    query.sel_cols.push(SelCol {
                        alias: col.name.clone(),
                        col: Some(col),
                        agg: None,
                    });
                }
                SelItem::Agg { func, target, alias } => {
                    let col = match target {
                        AggTarget::Star => {
                            if *func != AggFunc::Count {
                                return Err(DbError::Internal(
                                    "only COUNT may aggregate over *".into(),
                                ));
                            }
                            None
                        }
                        AggTarget::Col(raw) => Some(bind_col(&all, raw)?),
                    };
                    query.sel_cols.push(SelCol {
                        alias: agg_alias(*func, target, alias),
                        col,
                        agg: Some(*func),
                    });
                }
            }
        }
    }

    if query.group_by.is_empty() && !stmt.having.is_empty() {
        return Err(DbError::Internal("HAVING requires GROUP BY".into()));
    }

    for cond in &stmt.having {
        let RawCondLhs::Agg { func, target } = &cond.lhs else {
            return Err(DbError::Internal(
                "HAVING predicates must aggregate".into(),
            ));
        };
        let RawExpr::Value(value) = &cond.rhs else {
            return Err(DbError::Internal(
                "HAVING compares an aggregate against a literal".into(),
            ));
        };
        let col = match target {
            AggTarget::Star => {
                if *func != AggFunc::Count {
                    return Err(DbError::Internal("only COUNT may aggregate over *".into()));
                }
                None
            }
            AggTarget::Col(raw) => {
                let bound = bind_col(&all, raw)?;
                // Every HAVING aggregate must already appear in the
                // SELECT list, except COUNT(*).
                let in_select = query.sel_cols.iter().any(|sc| {
                    sc.agg == Some(*func)
                        && sc.col.as_ref().is_some_and(|c| c.name == bound.name)
                });
                if !in_select {
                    return Err(DbError::Internal(format!(
                        "HAVING aggregate over {} must appear in the SELECT list",
                        bound.name
                    )));
                }
                Some(bound)
            }
        };
        query.having.push(HavingCond {
            agg: *func,
            col,
            op: cond.op,
            value: value.clone(),
        });
    }

    query.conds = bind_conds(&all, &stmt.conds)?;

    for order in &stmt.order_by {
        query.order_by.push(bind_order_col(&all, order)?);
    }
    Ok(query)
}

fn bind_order_col(all: &[ColMeta], order: &RawOrderBy) -> DbResult<OrderByCol> {
    Ok(OrderByCol { col: bind_col(all, &order.col)?, desc: order.desc })
}

/// Bind an INSERT's target table and value list.
pub fn analyze_insert(sm: &SystemManager, tab_name: &str, values: &[Value]) -> DbResult<Query> {
    let tab = sm.table_meta(tab_name)?;
    if tab.cols.len() != values.len() {
        return Err(DbError::InvalidValueCount);
    }
    Ok(Query {
        tables: vec![tab_name.to_string()],
        values: values.to_vec(),
        ..Default::default()
    })
}

/// Bind an UPDATE's SET clauses and WHERE conjuncts.
pub fn analyze_update(
    sm: &SystemManager,
    tab_name: &str,
    set_clauses: &[RawSetClause],
    conds: &[RawCond],
) -> DbResult<Query> {
    let tab = sm.table_meta(tab_name)?;
    let mut query = Query {
        tables: vec![tab_name.to_string()],
        ..Default::default()
    };
    for clause in set_clauses {
        let col = tab.get_col(&clause.col_name)?.clone();
        // DATETIME literals assigned to CHAR columns become their
        // canonical string form here; the rest converts at execution.
        let value = match (&clause.value, col.ty) {
            (Value::Datetime(dt), types::ColType::Str) => Value::Str(dt.to_string()),
            (v, _) => v.clone(),
        };
        query.set_clauses.push(SetClause { col, value, is_add: clause.is_add });
    }
    query.conds = bind_conds(&tab.cols, conds)?;
    Ok(query)
}

/// Bind a DELETE's WHERE conjuncts.
pub fn analyze_delete(sm: &SystemManager, tab_name: &str, conds: &[RawCond]) -> DbResult<Query> {
    let tab = sm.table_meta(tab_name)?;
    Ok(Query {
        tables: vec![tab_name.to_string()],
        conds: bind_conds(&tab.cols, conds)?,
        ..Default::default()
    })
}
