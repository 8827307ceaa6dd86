use catalog::IndexMeta;

use crate::analyze::{Condition, OrderByCol, SelCol};

/// Access method chosen for one base table.
#[derive(Clone, Debug)]
pub enum ScanAccess {
    Seq,
    /// Index scan over the matched index; conditions not covered by the
    /// key prefix stay on the scan as residual filters.
    Index(IndexMeta),
}

/// Scan of one base table with its pushed-down conditions.
#[derive(Clone, Debug)]
pub struct ScanPlan {
    pub tab_name: String,
    pub conds: Vec<Condition>,
    pub access: ScanAccess,
}

/// Logical plan tree for a SELECT: projection over an optional sort
/// over a left-deep join chain over scans.
#[derive(Clone, Debug)]
pub enum Plan {
    Scan(ScanPlan),
    Join {
        left: Box<Plan>,
        right: Box<Plan>,
        conds: Vec<Condition>,
    },
    Sort {
        input: Box<Plan>,
        order_cols: Vec<OrderByCol>,
        limit: i64,
    },
    Projection {
        input: Box<Plan>,
        sel_cols: Vec<SelCol>,
    },
}
