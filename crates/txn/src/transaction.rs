use std::sync::Mutex;

use ahash::RandomState;
use common::{Rid, Timestamp, TxnId};
use hashbrown::HashSet;

use crate::LockDataId;

type Set<T> = HashSet<T, RandomState>;

/// Lifecycle of a transaction. `Default` is the freshly-begun state;
/// the first lock acquisition moves it to `Growing`, the first release
/// to `Shrinking`, and commit/abort are terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TxnState {
    Default,
    Growing,
    Shrinking,
    Committed,
    Aborted,
}

/// Kind of a logged write, used to pick the inverse action on abort.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteKind {
    Insert,
    Delete,
    Update,
}

/// Undo entry for a heap write. Delete and update carry the old record
/// image so abort can restore it.
#[derive(Clone, Debug)]
pub struct TableWriteRecord {
    pub kind: WriteKind,
    pub tab_name: String,
    pub rid: Rid,
    pub record: Vec<u8>,
}

impl TableWriteRecord {
    pub fn inserted(tab_name: impl Into<String>, rid: Rid) -> Self {
        Self { kind: WriteKind::Insert, tab_name: tab_name.into(), rid, record: Vec::new() }
    }

    pub fn deleted(tab_name: impl Into<String>, rid: Rid, record: Vec<u8>) -> Self {
        Self { kind: WriteKind::Delete, tab_name: tab_name.into(), rid, record }
    }

    pub fn updated(tab_name: impl Into<String>, rid: Rid, old_record: Vec<u8>) -> Self {
        Self { kind: WriteKind::Update, tab_name: tab_name.into(), rid, record: old_record }
    }
}

/// Undo entry for an index write. Carries the key bytes and the index's
/// column list so abort touches exactly the index that was written.
#[derive(Clone, Debug)]
pub struct IndexWriteRecord {
    pub kind: WriteKind,
    pub tab_name: String,
    pub index_cols: Vec<String>,
    pub rid: Rid,
    pub key: Vec<u8>,
}

struct TxnInner {
    state: TxnState,
    lock_set: Set<LockDataId>,
    table_writes: Vec<TableWriteRecord>,
    index_writes: Vec<IndexWriteRecord>,
}

/// A single transaction: identity, wait-die timestamp, 2PL state, the
/// set of held locks, and the undo deques replayed on abort.
pub struct Transaction {
    id: TxnId,
    start_ts: Timestamp,
    inner: Mutex<TxnInner>,
}

impl Transaction {
    pub fn new(id: TxnId, start_ts: Timestamp) -> Self {
        Self {
            id,
            start_ts,
            inner: Mutex::new(TxnInner {
                state: TxnState::Default,
                lock_set: Set::default(),
                table_writes: Vec::new(),
                index_writes: Vec::new(),
            }),
        }
    }

    pub fn id(&self) -> TxnId {
        self.id
    }

    pub fn start_ts(&self) -> Timestamp {
        self.start_ts
    }

    pub fn state(&self) -> TxnState {
        self.inner.lock().unwrap().state
    }

    pub fn set_state(&self, state: TxnState) {
        self.inner.lock().unwrap().state = state;
    }

    pub fn add_lock(&self, id: LockDataId) {
        self.inner.lock().unwrap().lock_set.insert(id);
    }

    /// Snapshot of the held-lock set, for release at commit/abort.
    pub fn take_lock_set(&self) -> Vec<LockDataId> {
        let mut inner = self.inner.lock().unwrap();
        inner.lock_set.drain().collect()
    }

    pub fn holds_locks(&self) -> bool {
        !self.inner.lock().unwrap().lock_set.is_empty()
    }

    pub fn append_table_write(&self, record: TableWriteRecord) {
        self.inner.lock().unwrap().table_writes.push(record);
    }

    pub fn append_index_write(&self, record: IndexWriteRecord) {
        self.inner.lock().unwrap().index_writes.push(record);
    }

    /// Drain the table undo deque, most recent first.
    pub fn take_table_writes_rev(&self) -> Vec<TableWriteRecord> {
        let mut writes = std::mem::take(&mut self.inner.lock().unwrap().table_writes);
        writes.reverse();
        writes
    }

    /// Drain the index undo deque, most recent first.
    pub fn take_index_writes_rev(&self) -> Vec<IndexWriteRecord> {
        let mut writes = std::mem::take(&mut self.inner.lock().unwrap().index_writes);
        writes.reverse();
        writes
    }

    pub fn clear_write_sets(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.table_writes.clear();
        inner.index_writes.clear();
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("start_ts", &self.start_ts)
            .field("state", &self.state())
            .finish()
    }
}
