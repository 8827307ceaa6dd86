//! Pull-model operator pipeline: scans, joins, projection, sort, the
//! DML executors with their undo logging, the CSV bulk loader, and the
//! aggregation driver. Operators acquire table/record locks through the
//! lock manager and mutate storage through the record and index layers.

mod agg;
mod dml;
mod index_scan;
mod join;
mod load;
mod predicate;
mod project;
mod scan;
mod sort;

pub use agg::{aggregate_select, fast_agg_with_index, fast_count_all};
pub use dml::{collect_rids, DeleteExec, InsertExec, UpdateExec};
pub use index_scan::IndexScanExec;
pub use join::NestedLoopJoinExec;
pub use load::{LoadExec, LoadPool};
pub use project::ProjectionExec;
pub use scan::SeqScanExec;
pub use sort::SortExec;

use std::sync::Arc;

use catalog::{ColMeta, SystemManager};
use common::{DbResult, Rid};
use txn::{Context, LockManager, Transaction};

/// Volcano-style operator interface.
///
/// `begin` establishes locks and positions the iterator at the first
/// qualifying tuple; `next` advances; `current` returns the tuple at
/// the cursor as a raw fixed-layout record.
pub trait Executor {
    fn begin(&mut self) -> DbResult<()>;
    fn next(&mut self) -> DbResult<()>;
    fn is_end(&self) -> bool;
    fn current(&self) -> DbResult<Vec<u8>>;
    fn columns(&self) -> &[ColMeta];
    fn tuple_len(&self) -> usize;
    /// Row identity of the current tuple, where one exists.
    fn rid(&self) -> Rid;
}

/// Everything an operator needs to reach the engine: catalog/storage
/// handles, the lock manager, the running transaction, and the load
/// pool gate.
#[derive(Clone)]
pub struct ExecCtx {
    pub sm: Arc<SystemManager>,
    pub locks: Arc<LockManager>,
    pub txn: Arc<Transaction>,
    pub loads: Arc<LoadPool>,
}

impl ExecCtx {
    pub fn lock_ctx(&self) -> Context {
        Context::new(Arc::clone(&self.locks), Arc::clone(&self.txn))
    }
}

/// Drain an operator tree into a record batch.
pub fn collect(root: &mut dyn Executor) -> DbResult<common::RecordBatch> {
    let cols = root.columns().to_vec();
    let mut batch = common::RecordBatch::new(cols.iter().map(|c| c.name.clone()).collect());
    root.begin()?;
    while !root.is_end() {
        let tuple = root.current()?;
        batch.push(cols.iter().map(|c| catalog::value_at(&tuple, c)).collect());
        root.next()?;
    }
    Ok(batch)
}
