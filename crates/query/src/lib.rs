//! The query front half: the statement AST handed over by the external
//! parser, the analyzer that binds it against the catalog, and the
//! planner/optimizer that turn a bound query into a physical access
//! plan (sequential or index scan, left-deep joins, sort, projection).

pub mod ast;

mod analyze;
mod plan;
mod planner;

pub use analyze::{
    analyze_delete, analyze_insert, analyze_select, analyze_update, CondRhs, Condition,
    HavingCond, OrderByCol, Query, SelCol, SetClause,
};
pub use plan::{Plan, ScanAccess, ScanPlan};
pub use planner::{
    plan_scan, plan_select, route_fast_agg, select_portal_kind, FastAggPlan, PortalKind,
};
