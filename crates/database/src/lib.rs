//! Engine root and statement driver.
//!
//! [`Engine`] wires the component stack together (disk manager, buffer
//! pool, lock and transaction managers, system manager, load pool);
//! [`Session`] runs parsed statements against it, owning the
//! implicit-vs-explicit transaction lifecycle and the single top-level
//! catch that turns an executor error into a transaction abort.

use std::sync::Arc;

use catalog::SystemManager;
use common::{Config, DbError, DbResult, RecordBatch};
use executor::{
    aggregate_select, collect, collect_rids, fast_agg_with_index, fast_count_all, DeleteExec,
    ExecCtx, Executor, IndexScanExec, InsertExec, LoadExec, LoadPool, NestedLoopJoinExec,
    ProjectionExec, SeqScanExec, SortExec, UpdateExec,
};
use query::ast::Statement;
use query::{
    analyze_delete, analyze_insert, analyze_select, analyze_update, plan_scan, plan_select,
    route_fast_agg, select_portal_kind, FastAggPlan, Plan, PortalKind, Query, ScanAccess, ScanPlan,
};
use storage::{BufferPool, DiskManager};
use txn::{LockManager, Transaction, TransactionManager};

pub use common::pretty;
pub use query::ast;

/// What a statement produced.
#[derive(Clone, Debug, PartialEq)]
pub enum StatementResult {
    /// Rows of a SELECT or a catalog view.
    Batch(RecordBatch),
    /// Row count of a DML statement.
    Affected(usize),
    /// Informational text (HELP, LOAD hand-off).
    Msg(String),
    /// Nothing to report.
    Done,
}

/// The engine root: every long-lived component, wired once and shared.
pub struct Engine {
    sm: Arc<SystemManager>,
    locks: Arc<LockManager>,
    txns: TransactionManager,
    loads: Arc<LoadPool>,
}

impl Engine {
    /// Build the component stack over `root_dir`, creating the database
    /// directory on first use, and open it.
    pub fn bootstrap(cfg: &Config, db_name: &str) -> DbResult<Arc<Self>> {
        let disk = Arc::new(DiskManager::new());
        let pool = BufferPool::new(Arc::clone(&disk), cfg.buffer_pool_pages);
        let sm = Arc::new(SystemManager::new(disk, pool, cfg.root_dir.clone()));
        if !cfg.root_dir.join(db_name).is_dir() {
            sm.create_db(db_name)?;
        }
        sm.open_db(db_name)?;

        let locks = Arc::new(LockManager::new());
        Ok(Arc::new(Self {
            sm,
            txns: TransactionManager::new(Arc::clone(&locks)),
            locks,
            loads: Arc::new(LoadPool::new()),
        }))
    }

    pub fn session(self: &Arc<Self>) -> Session {
        Session { engine: Arc::clone(self), txn: None, explicit: false }
    }

    pub fn system(&self) -> &Arc<SystemManager> {
        &self.sm
    }

    /// Flush and close the open database.
    pub fn shutdown(&self) -> DbResult<()> {
        self.sm.close_db()
    }
}

/// One client's statement stream: holds the session transaction between
/// BEGIN and COMMIT/ABORT; everything else auto-commits.
pub struct Session {
    engine: Arc<Engine>,
    txn: Option<Arc<Transaction>>,
    explicit: bool,
}

impl Session {
    /// Run one parsed statement to completion.
    ///
    /// Any error out of the analyzer or an executor aborts the current
    /// transaction (undo replay, lock release) before it surfaces.
    pub fn execute(&mut self, stmt: Statement) -> DbResult<StatementResult> {
        match stmt {
            // DDL; assumed serial with DML.
            Statement::CreateTable { tab_name, cols } => {
                self.engine.sm.create_table(&tab_name, &cols)?;
                Ok(StatementResult::Done)
            }
            Statement::DropTable { tab_name } => {
                self.engine.sm.drop_table(&tab_name)?;
                Ok(StatementResult::Done)
            }
            Statement::CreateIndex { tab_name, col_names } => {
                self.engine.sm.create_index(&tab_name, &col_names)?;
                Ok(StatementResult::Done)
            }
            Statement::DropIndex { tab_name, col_names } => {
                self.engine.sm.drop_index(&tab_name, &col_names)?;
                Ok(StatementResult::Done)
            }

            // Utility surface.
            Statement::ShowTables => Ok(StatementResult::Batch(self.engine.sm.show_tables()?)),
            Statement::ShowIndex { tab_name } => {
                Ok(StatementResult::Batch(self.engine.sm.show_index(&tab_name)?))
            }
            Statement::DescTable { tab_name } => {
                Ok(StatementResult::Batch(self.engine.sm.desc_table(&tab_name)?))
            }
            Statement::Help => Ok(StatementResult::Msg(HELP_TEXT.to_string())),
            Statement::SetOutputFileOff => Ok(StatementResult::Done),

            // Transaction control.
            Statement::Begin => {
                if self.txn.is_none() {
                    self.txn = Some(self.engine.txns.begin());
                }
                self.explicit = true;
                Ok(StatementResult::Done)
            }
            Statement::Commit => {
                if let Some(txn) = self.txn.take() {
                    self.engine.txns.commit(&txn)?;
                }
                self.explicit = false;
                Ok(StatementResult::Done)
            }
            Statement::Abort | Statement::Rollback => {
                if let Some(txn) = self.txn.take() {
                    self.engine.txns.abort(&txn, self.engine.sm.as_ref())?;
                }
                self.explicit = false;
                Ok(StatementResult::Done)
            }

            // DML and queries run under a transaction.
            other => self.run_in_txn(other),
        }
    }

    fn run_in_txn(&mut self, stmt: Statement) -> DbResult<StatementResult> {
        let txn = match &self.txn {
            Some(txn) => Arc::clone(txn),
            None => {
                let txn = self.engine.txns.begin();
                self.txn = Some(Arc::clone(&txn));
                txn
            }
        };
        let ctx = ExecCtx {
            sm: Arc::clone(&self.engine.sm),
            locks: Arc::clone(&self.engine.locks),
            txn: Arc::clone(&txn),
            loads: Arc::clone(&self.engine.loads),
        };

        match self.dispatch(ctx, stmt) {
            Ok(result) => {
                if !self.explicit {
                    let txn = self.txn.take().expect("implicit transaction present");
                    self.engine.txns.commit(&txn)?;
                }
                Ok(result)
            }
            Err(err) => {
                // The single top-level catch: the statement failed, the
                // transaction rolls back.
                log::warn!("statement failed, aborting txn {}: {err}", txn.id());
                self.txn = None;
                self.explicit = false;
                if let Err(abort_err) = self.engine.txns.abort(&txn, self.engine.sm.as_ref()) {
                    log::error!("abort of txn {} failed: {abort_err}", txn.id());
                }
                Err(err)
            }
        }
    }

    fn dispatch(&self, ctx: ExecCtx, stmt: Statement) -> DbResult<StatementResult> {
        match stmt {
            Statement::Insert { tab_name, values } => {
                analyze_insert(&ctx.sm, &tab_name, &values)?;
                let count = InsertExec::new(ctx, &tab_name, values)?.execute()?;
                Ok(StatementResult::Affected(count))
            }
            Statement::Update { tab_name, set_clauses, conds } => {
                let query = analyze_update(&ctx.sm, &tab_name, &set_clauses, &conds)?;
                let scan = plan_scan(&ctx.sm, &tab_name, query.conds.clone())?;
                let rids = {
                    let mut exec = build_scan(ctx.clone(), &scan)?;
                    collect_rids(exec.as_mut())?
                };
                let count =
                    UpdateExec::new(ctx, &tab_name, query.set_clauses, query.conds, rids)?
                        .execute()?;
                Ok(StatementResult::Affected(count))
            }
            Statement::Delete { tab_name, conds } => {
                let query = analyze_delete(&ctx.sm, &tab_name, &conds)?;
                let scan = plan_scan(&ctx.sm, &tab_name, query.conds.clone())?;
                let rids = {
                    let mut exec = build_scan(ctx.clone(), &scan)?;
                    collect_rids(exec.as_mut())?
                };
                let count = DeleteExec::new(ctx, &tab_name, query.conds, rids)?.execute()?;
                Ok(StatementResult::Affected(count))
            }
            Statement::Load { file_path, tab_name } => {
                LoadExec::new(ctx, &tab_name, &file_path)?.execute()?;
                Ok(StatementResult::Msg(format!("table '{tab_name}' loading")))
            }
            Statement::Select(select) => {
                let query = analyze_select(&ctx.sm, &select)?;
                self.run_select(ctx, &query)
            }
            other => Err(DbError::Internal(format!("unexpected statement {other:?}"))),
        }
    }

    fn run_select(&self, ctx: ExecCtx, query: &Query) -> DbResult<StatementResult> {
        let fast = route_fast_agg(&ctx.sm, query)?;
        let plan = plan_select(&ctx.sm, query)?;
        let kind = select_portal_kind(query, &plan, fast.as_ref());
        log::debug!("select runs as {kind:?}");

        match (&fast, kind) {
            (Some(FastAggPlan::CountAll { tab_name }), _) => {
                let caption = query.sel_cols[0].caption();
                Ok(StatementResult::Batch(fast_count_all(&ctx, tab_name, &caption)?))
            }
            (Some(fast_plan @ FastAggPlan::WithIndex { .. }), _) => {
                let caption = query.sel_cols[0].caption();
                Ok(StatementResult::Batch(fast_agg_with_index(&ctx, fast_plan, &caption)?))
            }
            (None, PortalKind::AggSelect | PortalKind::AggSelectWithIndex) => {
                // Aggregation consumes the tree below the projection;
                // group output has its own order, so a sort is moot.
                let input = strip_projection_and_sort(&plan);
                let mut root = build_exec(ctx, input)?;
                let batch = aggregate_select(
                    root.as_mut(),
                    &query.sel_cols,
                    &query.group_by,
                    &query.having,
                )?;
                Ok(StatementResult::Batch(batch))
            }
            _ => {
                let mut root = build_exec(ctx, &plan)?;
                let mut batch = collect(root.as_mut())?;
                batch.columns = query.sel_cols.iter().map(|c| c.caption()).collect();
                Ok(StatementResult::Batch(batch))
            }
        }
    }
}

/// The operator tree under the projection (and any sort), which is what
/// the aggregation driver consumes.
fn strip_projection_and_sort(plan: &Plan) -> &Plan {
    let mut plan = plan;
    loop {
        match plan {
            Plan::Projection { input, .. } | Plan::Sort { input, .. } => plan = input.as_ref(),
            other => return other,
        }
    }
}

fn build_scan(ctx: ExecCtx, scan: &ScanPlan) -> DbResult<Box<dyn Executor>> {
    Ok(match &scan.access {
        ScanAccess::Seq => Box::new(SeqScanExec::new(ctx, &scan.tab_name, scan.conds.clone())?),
        ScanAccess::Index(index) => Box::new(IndexScanExec::new(
            ctx,
            &scan.tab_name,
            scan.conds.clone(),
            index.clone(),
        )?),
    })
}

/// Materialize a physical operator tree from a plan.
fn build_exec(ctx: ExecCtx, plan: &Plan) -> DbResult<Box<dyn Executor>> {
    Ok(match plan {
        Plan::Scan(scan) => build_scan(ctx, scan)?,
        Plan::Join { left, right, conds } => {
            let left = build_exec(ctx.clone(), left)?;
            let right = build_exec(ctx.clone(), right)?;
            Box::new(NestedLoopJoinExec::new(left, right, conds.clone()))
        }
        Plan::Sort { input, order_cols, limit } => {
            let child = build_exec(ctx, input)?;
            Box::new(SortExec::new(child, order_cols.clone(), *limit))
        }
        Plan::Projection { input, sel_cols } => {
            let child = build_exec(ctx, input)?;
            Box::new(ProjectionExec::new(child, sel_cols)?)
        }
    })
}

const HELP_TEXT: &str = "\
Supported statements:
  CREATE TABLE t (col type [, ...]);   DROP TABLE t;
  CREATE INDEX t (col [, ...]);        DROP INDEX t (col [, ...]);
  SHOW TABLES;  SHOW INDEX FROM t;  DESC t;
  INSERT INTO t VALUES (...);  LOAD 'file' INTO t;
  DELETE FROM t [WHERE ...];  UPDATE t SET col = expr [WHERE ...];
  SELECT [*|cols|aggs] FROM t [WHERE ...] [GROUP BY ...] [HAVING ...]
         [ORDER BY ... [ASC|DESC]] [LIMIT n];
  BEGIN; COMMIT; ABORT; ROLLBACK;";
