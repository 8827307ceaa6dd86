use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use ahash::RandomState;
use common::{DbResult, TxnId};
use hashbrown::HashMap;

use crate::lock::LockManager;
use crate::transaction::{IndexWriteRecord, TableWriteRecord, Transaction, TxnState};
use crate::Context;

type Map<K, V> = HashMap<K, V, RandomState>;

/// Storage-side hooks the transaction manager replays undo records
/// through. Implemented by the system manager, which owns the heap and
/// index handles.
pub trait UndoStorage {
    /// Apply the inverse of a logged heap write (insert -> delete,
    /// delete -> re-insert, update -> restore the old image).
    fn undo_table_write(&self, record: &TableWriteRecord, ctx: &Context) -> DbResult<()>;

    /// Apply the inverse of a logged index write (insert -> delete the
    /// key, delete -> re-insert it).
    fn undo_index_write(&self, record: &IndexWriteRecord) -> DbResult<()>;
}

/// Owns the transaction id/timestamp counters and the global map of
/// live transactions.
pub struct TransactionManager {
    locks: Arc<LockManager>,
    next_txn_id: AtomicU32,
    next_ts: AtomicU32,
    txn_map: Mutex<Map<TxnId, Arc<Transaction>>>,
}

impl TransactionManager {
    pub fn new(locks: Arc<LockManager>) -> Self {
        Self {
            locks,
            next_txn_id: AtomicU32::new(0),
            next_ts: AtomicU32::new(0),
            txn_map: Mutex::new(Map::default()),
        }
    }

    pub fn lock_manager(&self) -> &Arc<LockManager> {
        &self.locks
    }

    /// Start a fresh transaction with a monotonic start timestamp and
    /// register it in the global map.
    pub fn begin(&self) -> Arc<Transaction> {
        let id = self.next_txn_id.fetch_add(1, Ordering::SeqCst);
        let ts = self.next_ts.fetch_add(1, Ordering::SeqCst);
        let txn = Arc::new(Transaction::new(id, ts));
        self.txn_map.lock().unwrap().insert(id, Arc::clone(&txn));
        log::debug!("begin txn {id} (ts {ts})");
        txn
    }

    pub fn get(&self, id: TxnId) -> Option<Arc<Transaction>> {
        self.txn_map.lock().unwrap().get(&id).cloned()
    }

    /// Release every held lock, drop the undo sets, and mark the
    /// transaction committed. Commit performs no I/O.
    pub fn commit(&self, txn: &Arc<Transaction>) -> DbResult<()> {
        for lock_id in txn.take_lock_set() {
            self.locks.unlock(txn, lock_id)?;
        }
        txn.clear_write_sets();
        txn.set_state(TxnState::Committed);
        log::debug!("commit txn {}", txn.id());
        Ok(())
    }

    /// Roll the transaction back: replay the heap undo deque in reverse,
    /// then the index undo deque in reverse, then release all locks.
    ///
    /// The replay runs under the aborting transaction's own context; the
    /// locks it needs are still held, so re-acquisition is a no-op.
    pub fn abort(&self, txn: &Arc<Transaction>, storage: &dyn UndoStorage) -> DbResult<()> {
        let ctx = Context::new(Arc::clone(&self.locks), Arc::clone(txn));

        for record in txn.take_table_writes_rev() {
            storage.undo_table_write(&record, &ctx)?;
        }
        for record in txn.take_index_writes_rev() {
            storage.undo_index_write(&record)?;
        }

        for lock_id in txn.take_lock_set() {
            self.locks.unlock(txn, lock_id)?;
        }
        txn.clear_write_sets();
        txn.set_state(TxnState::Aborted);
        log::debug!("abort txn {}", txn.id());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::{LockDataId, LockMode};
    use common::{DbError, FileId, Rid};
    use std::sync::Mutex as StdMutex;

    struct NoopStorage;

    impl UndoStorage for NoopStorage {
        fn undo_table_write(&self, _: &TableWriteRecord, _: &Context) -> DbResult<()> {
            Ok(())
        }

        fn undo_index_write(&self, _: &IndexWriteRecord) -> DbResult<()> {
            Ok(())
        }
    }

    /// Records the undo order it sees.
    #[derive(Default)]
    struct RecordingStorage {
        seen: StdMutex<Vec<(crate::WriteKind, Rid)>>,
    }

    impl UndoStorage for RecordingStorage {
        fn undo_table_write(&self, record: &TableWriteRecord, _: &Context) -> DbResult<()> {
            self.seen.lock().unwrap().push((record.kind, record.rid));
            Ok(())
        }

        fn undo_index_write(&self, _: &IndexWriteRecord) -> DbResult<()> {
            Ok(())
        }
    }

    fn manager() -> TransactionManager {
        TransactionManager::new(Arc::new(LockManager::new()))
    }

    #[test]
    fn timestamps_are_monotonic() {
        let mgr = manager();
        let t1 = mgr.begin();
        let t2 = mgr.begin();
        assert!(t1.start_ts() < t2.start_ts());
        assert_ne!(t1.id(), t2.id());
    }

    #[test]
    fn commit_releases_locks_and_finishes() {
        let mgr = manager();
        let txn = mgr.begin();
        let fd = FileId(1);
        mgr.lock_manager().lock_exclusive_on_table(&txn, fd).unwrap();
        assert_eq!(txn.state(), TxnState::Growing);

        mgr.commit(&txn).unwrap();
        assert_eq!(txn.state(), TxnState::Committed);
        assert!(!txn.holds_locks());
        assert_eq!(mgr.lock_manager().group_mode(LockDataId::table(fd)), None);
    }

    #[test]
    fn abort_replays_undo_in_reverse() {
        let mgr = manager();
        let txn = mgr.begin();
        txn.append_table_write(TableWriteRecord::inserted("t", Rid::new(1, 0)));
        txn.append_table_write(TableWriteRecord::inserted("t", Rid::new(1, 1)));
        txn.append_table_write(TableWriteRecord::deleted("t", Rid::new(2, 0), vec![7]));

        let storage = RecordingStorage::default();
        mgr.abort(&txn, &storage).unwrap();

        let seen = storage.seen.lock().unwrap();
        assert_eq!(
            seen.iter().map(|(_, rid)| *rid).collect::<Vec<_>>(),
            vec![Rid::new(2, 0), Rid::new(1, 1), Rid::new(1, 0)]
        );
        assert_eq!(txn.state(), TxnState::Aborted);
    }

    #[test]
    fn finished_transactions_cannot_lock() {
        let mgr = manager();
        let txn = mgr.begin();
        mgr.commit(&txn).unwrap();
        let ok = mgr
            .lock_manager()
            .lock_shared_on_table(&txn, FileId(0))
            .unwrap();
        assert!(!ok);
    }

    #[test]
    fn lock_after_release_aborts_with_shrinking() {
        let mgr = manager();
        let txn = mgr.begin();
        let fd = FileId(3);
        mgr.lock_manager().lock_shared_on_table(&txn, fd).unwrap();
        mgr.lock_manager().unlock(&txn, LockDataId::table(fd)).unwrap();
        match mgr.lock_manager().lock_shared_on_table(&txn, fd) {
            Err(DbError::LockOnShrinking(_)) => {}
            other => panic!("expected LockOnShrinking, got {other:?}"),
        }
        mgr.abort(&txn, &NoopStorage).unwrap();
    }

    #[test]
    fn younger_conflicting_requester_dies() {
        let mgr = manager();
        let older = mgr.begin();
        let younger = mgr.begin();
        let fd = FileId(9);

        mgr.lock_manager().lock_exclusive_on_table(&older, fd).unwrap();
        match mgr.lock_manager().lock_exclusive_on_table(&younger, fd) {
            Err(DbError::WaitDie(id)) => assert_eq!(id, younger.id()),
            other => panic!("expected WaitDie, got {other:?}"),
        }
    }

    #[test]
    fn older_requester_waits_until_release() {
        let mgr = Arc::new(manager());
        let older = mgr.begin();
        let younger = mgr.begin();
        let fd = FileId(4);

        mgr.lock_manager().lock_exclusive_on_table(&younger, fd).unwrap();

        let mgr2 = Arc::clone(&mgr);
        let older2 = Arc::clone(&older);
        let waiter = std::thread::spawn(move || {
            mgr2.lock_manager().lock_exclusive_on_table(&older2, fd).unwrap()
        });

        std::thread::sleep(std::time::Duration::from_millis(50));
        assert!(!waiter.is_finished());

        mgr.commit(&younger).unwrap();
        assert!(waiter.join().unwrap());
        assert_eq!(
            mgr.lock_manager().group_mode(LockDataId::table(fd)),
            Some(LockMode::Exclusive)
        );
    }

    #[test]
    fn shared_locks_coexist_and_upgrade_to_six() {
        let mgr = manager();
        let a = mgr.begin();
        let b = mgr.begin();
        let fd = FileId(5);

        assert!(mgr.lock_manager().lock_shared_on_table(&a, fd).unwrap());
        assert!(mgr.lock_manager().lock_shared_on_table(&b, fd).unwrap());
        assert_eq!(
            mgr.lock_manager().group_mode(LockDataId::table(fd)),
            Some(LockMode::Shared)
        );

        mgr.commit(&b).unwrap();
        // Sole holder: S + IX upgrades in place to SIX.
        assert!(mgr.lock_manager().lock_ix_on_table(&a, fd).unwrap());
        assert_eq!(
            mgr.lock_manager().group_mode(LockDataId::table(fd)),
            Some(LockMode::SharedIntentionExclusive)
        );
    }

    #[test]
    fn younger_upgrader_with_older_holder_dies() {
        let mgr = manager();
        let a = mgr.begin();
        let b = mgr.begin();
        let fd = FileId(6);

        assert!(mgr.lock_manager().lock_shared_on_table(&a, fd).unwrap());
        assert!(mgr.lock_manager().lock_shared_on_table(&b, fd).unwrap());
        // b's S -> X upgrade conflicts with a's grant; a is older, b dies.
        match mgr.lock_manager().lock_exclusive_on_table(&b, fd) {
            Err(DbError::WaitDie(id)) => assert_eq!(id, b.id()),
            other => panic!("expected WaitDie, got {other:?}"),
        }
    }

    #[test]
    fn oldest_upgrader_waits_for_younger_grants_to_clear() {
        let mgr = Arc::new(manager());
        let a = mgr.begin();
        let b = mgr.begin();
        let fd = FileId(8);

        assert!(mgr.lock_manager().lock_shared_on_table(&a, fd).unwrap());
        assert!(mgr.lock_manager().lock_shared_on_table(&b, fd).unwrap());

        // a's upgrade conflicts only with the younger b, so it waits
        // instead of aborting.
        let mgr2 = Arc::clone(&mgr);
        let a2 = Arc::clone(&a);
        let upgrader = std::thread::spawn(move || {
            mgr2.lock_manager().lock_exclusive_on_table(&a2, fd).unwrap()
        });

        std::thread::sleep(std::time::Duration::from_millis(50));
        assert!(!upgrader.is_finished());

        mgr.commit(&b).unwrap();
        assert!(upgrader.join().unwrap());
        assert_eq!(
            mgr.lock_manager().group_mode(LockDataId::table(fd)),
            Some(LockMode::Exclusive)
        );
    }

    #[test]
    fn any_older_conflicting_holder_kills_the_requester() {
        let mgr = manager();
        let oldest = mgr.begin();
        let middle = mgr.begin();
        let youngest = mgr.begin();
        let fd = FileId(10);

        // Grant order puts the younger holder first in the queue; the
        // older one further back must still kill the requester.
        assert!(mgr.lock_manager().lock_shared_on_table(&youngest, fd).unwrap());
        assert!(mgr.lock_manager().lock_shared_on_table(&oldest, fd).unwrap());
        match mgr.lock_manager().lock_exclusive_on_table(&middle, fd) {
            Err(DbError::WaitDie(id)) => assert_eq!(id, middle.id()),
            other => panic!("expected WaitDie, got {other:?}"),
        }
    }

    #[test]
    fn record_and_table_locks_are_distinct_objects() {
        let mgr = manager();
        let a = mgr.begin();
        let b = mgr.begin();
        let fd = FileId(7);

        assert!(mgr.lock_manager().lock_ix_on_table(&a, fd).unwrap());
        assert!(mgr
            .lock_manager()
            .lock_exclusive_on_record(&a, Rid::new(1, 0), fd)
            .unwrap());
        // IX on the table is compatible with b's IS; the record lock is not shared.
        assert!(mgr.lock_manager().lock_is_on_table(&b, fd).unwrap());
        match mgr.lock_manager().lock_shared_on_record(&b, Rid::new(1, 0), fd) {
            Err(DbError::WaitDie(_)) => {}
            other => panic!("expected WaitDie, got {other:?}"),
        }
    }
}
