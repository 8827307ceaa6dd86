//! Transactions and concurrency control: strict two-phase locking with
//! multi-granularity modes and wait-die deadlock avoidance, plus the
//! per-transaction undo sets replayed on abort.

mod lock;
mod manager;
mod transaction;

pub use lock::{LockDataId, LockManager, LockMode, LockTarget};
pub use manager::{TransactionManager, UndoStorage};
pub use transaction::{
    IndexWriteRecord, TableWriteRecord, Transaction, TxnState, WriteKind,
};

use std::sync::Arc;

/// Per-statement context threaded through storage operations so they can
/// take locks on behalf of the running transaction.
#[derive(Clone)]
pub struct Context {
    pub locks: Arc<LockManager>,
    pub txn: Arc<Transaction>,
}

impl Context {
    pub fn new(locks: Arc<LockManager>, txn: Arc<Transaction>) -> Self {
        Self { locks, txn }
    }
}
