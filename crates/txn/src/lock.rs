use std::sync::{Arc, Condvar, Mutex};

use ahash::RandomState;
use common::{DbError, DbResult, FileId, Rid, Timestamp, TxnId};
use hashbrown::HashMap;

use crate::transaction::{Transaction, TxnState};

type Map<K, V> = HashMap<K, V, RandomState>;

/// What a lock protects: a whole table file or one record in it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LockTarget {
    Table,
    Record(Rid),
}

/// Unique identity of a lockable object.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct LockDataId {
    pub fd: FileId,
    pub target: LockTarget,
}

impl LockDataId {
    pub fn table(fd: FileId) -> Self {
        Self { fd, target: LockTarget::Table }
    }

    pub fn record(fd: FileId, rid: Rid) -> Self {
        Self { fd, target: LockTarget::Record(rid) }
    }
}

/// Multi-granularity lock modes. Tables use all five; records only
/// `Shared` and `Exclusive`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LockMode {
    IntentionShared,
    IntentionExclusive,
    Shared,
    SharedIntentionExclusive,
    Exclusive,
}

use LockMode::*;

/// Standard IS/IX/S/SIX/X compatibility matrix.
fn compatible(a: LockMode, b: LockMode) -> bool {
    match (a, b) {
        (IntentionShared, Exclusive) | (Exclusive, IntentionShared) => false,
        (IntentionShared, _) | (_, IntentionShared) => true,
        (IntentionExclusive, IntentionExclusive) => true,
        (Shared, Shared) => true,
        _ => false,
    }
}

/// Does holding `held` already satisfy a request for `want`?
fn covers(held: LockMode, want: LockMode) -> bool {
    match held {
        Exclusive => true,
        SharedIntentionExclusive => want != Exclusive,
        Shared => matches!(want, Shared | IntentionShared),
        IntentionExclusive => matches!(want, IntentionExclusive | IntentionShared),
        IntentionShared => want == IntentionShared,
    }
}

/// Least mode at or above both inputs in the lock lattice.
fn join(a: LockMode, b: LockMode) -> LockMode {
    if covers(a, b) {
        return a;
    }
    if covers(b, a) {
        return b;
    }
    match (a, b) {
        (Shared, IntentionExclusive) | (IntentionExclusive, Shared) => SharedIntentionExclusive,
        _ => Exclusive,
    }
}

struct LockRequest {
    txn_id: TxnId,
    mode: LockMode,
    ts: Timestamp,
    granted: bool,
}

struct LockQueue {
    requests: Vec<LockRequest>,
    group_mode: Option<LockMode>,
    cv: Arc<Condvar>,
}

impl Default for LockQueue {
    fn default() -> Self {
        Self { requests: Vec::new(), group_mode: None, cv: Arc::new(Condvar::new()) }
    }
}

impl LockQueue {
    fn recompute_group_mode(&mut self) {
        self.group_mode = self
            .requests
            .iter()
            .filter(|r| r.granted)
            .map(|r| r.mode)
            .reduce(join);
    }
}

#[derive(Default)]
struct LockTable {
    queues: Map<LockDataId, LockQueue>,
}

enum Decision {
    Granted,
    AlreadyHeld,
    Upgraded,
    Refused,
    Wait(Arc<Condvar>),
    Die,
}

/// Table of lock request queues with wait-die deadlock avoidance.
///
/// One mutex guards the whole table; waiters block on per-queue condvars
/// that release it. A requester conflicting with any older granted
/// holder dies immediately; one conflicting only with younger holders
/// waits, so every wait edge points from an older to a younger
/// transaction and no cycle can form.
pub struct LockManager {
    latch: Mutex<LockTable>,
}

impl LockManager {
    pub fn new() -> Self {
        Self { latch: Mutex::new(LockTable::default()) }
    }

    pub fn lock_shared_on_record(&self, txn: &Transaction, rid: Rid, fd: FileId) -> DbResult<bool> {
        self.acquire(txn, LockDataId::record(fd, rid), Shared)
    }

    pub fn lock_exclusive_on_record(
        &self,
        txn: &Transaction,
        rid: Rid,
        fd: FileId,
    ) -> DbResult<bool> {
        self.acquire(txn, LockDataId::record(fd, rid), Exclusive)
    }

    pub fn lock_shared_on_table(&self, txn: &Transaction, fd: FileId) -> DbResult<bool> {
        self.acquire(txn, LockDataId::table(fd), Shared)
    }

    pub fn lock_exclusive_on_table(&self, txn: &Transaction, fd: FileId) -> DbResult<bool> {
        self.acquire(txn, LockDataId::table(fd), Exclusive)
    }

    pub fn lock_is_on_table(&self, txn: &Transaction, fd: FileId) -> DbResult<bool> {
        self.acquire(txn, LockDataId::table(fd), IntentionShared)
    }

    pub fn lock_ix_on_table(&self, txn: &Transaction, fd: FileId) -> DbResult<bool> {
        self.acquire(txn, LockDataId::table(fd), IntentionExclusive)
    }

    fn acquire(&self, txn: &Transaction, id: LockDataId, mode: LockMode) -> DbResult<bool> {
        let mut table = self.latch.lock().unwrap();
        loop {
            let decision = if !Self::check_lock(txn)? {
                Decision::Refused
            } else {
                let queue = table.queues.entry(id).or_default();
                Self::decide(queue, txn, mode)
            };
            match decision {
                Decision::Refused => return Ok(false),
                Decision::AlreadyHeld | Decision::Upgraded => return Ok(true),
                Decision::Granted => {
                    txn.add_lock(id);
                    return Ok(true);
                }
                Decision::Die => {
                    log::debug!("txn {} dies waiting on {:?}", txn.id(), id);
                    return Err(DbError::WaitDie(txn.id()));
                }
                Decision::Wait(cv) => {
                    table = cv.wait(table).unwrap();
                }
            }
        }
    }

    /// One pass over the queue under the latch: re-entrant fast path,
    /// in-place upgrade, wait-die evaluation, or grant. A blocked
    /// upgrade goes through the same wait-die rule as a fresh request.
    fn decide(queue: &mut LockQueue, txn: &Transaction, mode: LockMode) -> Decision {
        if let Some(pos) = queue
            .requests
            .iter()
            .position(|r| r.granted && r.txn_id == txn.id())
        {
            let held = queue.requests[pos].mode;
            if covers(held, mode) {
                return Decision::AlreadyHeld;
            }
            let target = join(held, mode);
            return match Self::wait_die(queue, txn, target) {
                Some(blocked) => blocked,
                None => {
                    queue.requests[pos].mode = target;
                    queue.recompute_group_mode();
                    Decision::Upgraded
                }
            };
        }

        match Self::wait_die(queue, txn, mode) {
            Some(blocked) => blocked,
            None => {
                queue.requests.push(LockRequest {
                    txn_id: txn.id(),
                    mode,
                    ts: txn.start_ts(),
                    granted: true,
                });
                queue.group_mode = Some(queue.group_mode.map_or(mode, |g| join(g, mode)));
                Decision::Granted
            }
        }
    }

    /// Wait-die over every granted request that conflicts with `mode`
    /// (the requester's own grant never conflicts with itself). `None`
    /// when nothing conflicts; `Die` when any conflicting holder has an
    /// older start timestamp; `Wait` only when all of them are younger,
    /// so every wait edge points from an older to a younger transaction.
    fn wait_die(queue: &LockQueue, txn: &Transaction, mode: LockMode) -> Option<Decision> {
        let conflicting: Vec<&LockRequest> = queue
            .requests
            .iter()
            .filter(|r| r.granted && r.txn_id != txn.id() && !compatible(r.mode, mode))
            .collect();
        if conflicting.is_empty() {
            return None;
        }
        if conflicting.iter().any(|r| r.ts < txn.start_ts()) {
            return Some(Decision::Die);
        }
        Some(Decision::Wait(Arc::clone(&queue.cv)))
    }

    /// Release whatever `txn` holds on `id`, recompute the queue's group
    /// mode, and wake the waiters.
    pub fn unlock(&self, txn: &Transaction, id: LockDataId) -> DbResult<bool> {
        let mut table = self.latch.lock().unwrap();
        if !Self::check_unlock(txn) {
            return Ok(false);
        }
        let Some(queue) = table.queues.get_mut(&id) else {
            return Ok(true);
        };
        queue.requests.retain(|r| r.txn_id != txn.id());
        queue.recompute_group_mode();
        queue.cv.notify_all();
        Ok(true)
    }

    /// Gate on the 2PL state machine: finished transactions are refused,
    /// a shrinking transaction aborts, and the first acquisition flips
    /// Default to Growing.
    fn check_lock(txn: &Transaction) -> DbResult<bool> {
        match txn.state() {
            TxnState::Committed | TxnState::Aborted => Ok(false),
            TxnState::Default => {
                txn.set_state(TxnState::Growing);
                Ok(true)
            }
            TxnState::Growing => Ok(true),
            TxnState::Shrinking => Err(DbError::LockOnShrinking(txn.id())),
        }
    }

    fn check_unlock(txn: &Transaction) -> bool {
        match txn.state() {
            TxnState::Committed | TxnState::Aborted => false,
            TxnState::Growing => {
                txn.set_state(TxnState::Shrinking);
                true
            }
            TxnState::Default | TxnState::Shrinking => true,
        }
    }

    /// Joined mode of the granted requests on `id`, if any. Test hook.
    pub fn group_mode(&self, id: LockDataId) -> Option<LockMode> {
        let table = self.latch.lock().unwrap();
        table.queues.get(&id).and_then(|q| q.group_mode)
    }
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matrix_matches_the_textbook() {
        assert!(compatible(IntentionShared, IntentionExclusive));
        assert!(compatible(IntentionShared, SharedIntentionExclusive));
        assert!(!compatible(IntentionShared, Exclusive));
        assert!(compatible(IntentionExclusive, IntentionExclusive));
        assert!(!compatible(IntentionExclusive, Shared));
        assert!(compatible(Shared, Shared));
        assert!(!compatible(Shared, SharedIntentionExclusive));
        assert!(!compatible(SharedIntentionExclusive, SharedIntentionExclusive));
        assert!(!compatible(Exclusive, Exclusive));
    }

    #[test]
    fn join_lattice() {
        assert_eq!(join(Shared, IntentionExclusive), SharedIntentionExclusive);
        assert_eq!(join(IntentionShared, Shared), Shared);
        assert_eq!(join(IntentionShared, IntentionExclusive), IntentionExclusive);
        assert_eq!(join(Shared, Exclusive), Exclusive);
        assert_eq!(join(SharedIntentionExclusive, IntentionExclusive), SharedIntentionExclusive);
    }

    #[test]
    fn covers_is_reflexive_and_ordered() {
        for mode in [IntentionShared, IntentionExclusive, Shared, SharedIntentionExclusive, Exclusive] {
            assert!(covers(mode, mode));
            assert!(covers(Exclusive, mode));
        }
        assert!(!covers(Shared, IntentionExclusive));
        assert!(!covers(IntentionExclusive, Shared));
    }
}
