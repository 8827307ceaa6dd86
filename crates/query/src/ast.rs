//! Statement types as they arrive from the parser. The grammar itself
//! lives outside the engine; this module is the boundary contract.

use catalog::ColDef;
use types::Value;

/// Comparison operators of the WHERE/HAVING surface.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompOp {
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
}

impl CompOp {
    /// Mirror the operator, for swapping a condition's sides.
    pub fn swapped(self) -> Self {
        match self {
            CompOp::Eq => CompOp::Eq,
            CompOp::Ne => CompOp::Ne,
            CompOp::Lt => CompOp::Gt,
            CompOp::Gt => CompOp::Lt,
            CompOp::Le => CompOp::Ge,
            CompOp::Ge => CompOp::Le,
        }
    }
}

/// Aggregate functions of the SELECT surface.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AggFunc {
    Count,
    Sum,
    Max,
    Min,
}

/// A possibly table-qualified column reference.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawCol {
    pub tab_name: Option<String>,
    pub col_name: String,
}

impl RawCol {
    pub fn unqualified(col_name: impl Into<String>) -> Self {
        Self { tab_name: None, col_name: col_name.into() }
    }

    pub fn qualified(tab_name: impl Into<String>, col_name: impl Into<String>) -> Self {
        Self { tab_name: Some(tab_name.into()), col_name: col_name.into() }
    }
}

/// Target of an aggregate: `COUNT(*)` or a column.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AggTarget {
    Star,
    Col(RawCol),
}

/// One SELECT list item.
#[derive(Clone, Debug, PartialEq)]
pub enum SelItem {
    Col(RawCol),
    Agg { func: AggFunc, target: AggTarget, alias: Option<String> },
}

/// Right-hand side of a condition.
#[derive(Clone, Debug, PartialEq)]
pub enum RawExpr {
    Value(Value),
    Col(RawCol),
}

/// Left-hand side of a condition; aggregates only appear in HAVING.
#[derive(Clone, Debug, PartialEq)]
pub enum RawCondLhs {
    Col(RawCol),
    Agg { func: AggFunc, target: AggTarget },
}

/// A conjunct of a WHERE or HAVING clause.
#[derive(Clone, Debug, PartialEq)]
pub struct RawCond {
    pub lhs: RawCondLhs,
    pub op: CompOp,
    pub rhs: RawExpr,
}

impl RawCond {
    pub fn col_val(col: RawCol, op: CompOp, value: Value) -> Self {
        Self { lhs: RawCondLhs::Col(col), op, rhs: RawExpr::Value(value) }
    }

    pub fn col_col(lhs: RawCol, op: CompOp, rhs: RawCol) -> Self {
        Self { lhs: RawCondLhs::Col(lhs), op, rhs: RawExpr::Col(rhs) }
    }
}

/// `SET col = value` or `SET col = col + value`.
#[derive(Clone, Debug, PartialEq)]
pub struct RawSetClause {
    pub col_name: String,
    pub value: Value,
    pub is_add: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawOrderBy {
    pub col: RawCol,
    pub desc: bool,
}

/// A full SELECT statement.
#[derive(Clone, Debug, PartialEq)]
pub struct SelectStmt {
    /// Empty means `SELECT *`.
    pub sel_items: Vec<SelItem>,
    pub tabs: Vec<String>,
    pub conds: Vec<RawCond>,
    pub group_by: Vec<RawCol>,
    pub having: Vec<RawCond>,
    pub order_by: Vec<RawOrderBy>,
    /// `-1` means unbounded.
    pub limit: i64,
}

impl SelectStmt {
    pub fn from_tables(tabs: Vec<String>) -> Self {
        Self {
            sel_items: Vec::new(),
            tabs,
            conds: Vec::new(),
            group_by: Vec::new(),
            having: Vec::new(),
            order_by: Vec::new(),
            limit: -1,
        }
    }
}

/// A parsed statement, ready for analysis.
#[derive(Clone, Debug, PartialEq)]
pub enum Statement {
    CreateTable { tab_name: String, cols: Vec<ColDef> },
    DropTable { tab_name: String },
    CreateIndex { tab_name: String, col_names: Vec<String> },
    DropIndex { tab_name: String, col_names: Vec<String> },
    ShowTables,
    ShowIndex { tab_name: String },
    DescTable { tab_name: String },
    Insert { tab_name: String, values: Vec<Value> },
    Load { file_path: String, tab_name: String },
    Delete { tab_name: String, conds: Vec<RawCond> },
    Update { tab_name: String, set_clauses: Vec<RawSetClause>, conds: Vec<RawCond> },
    Select(SelectStmt),
    Begin,
    Commit,
    Abort,
    Rollback,
    Help,
    SetOutputFileOff,
}
