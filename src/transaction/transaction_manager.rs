use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use parking_lot::Mutex;

use crate::common::types::TxnId;
use crate::transaction::transaction::{Transaction, TransactionError, TransactionState, IsolationLevel};
use crate::transaction::lock_manager::LockManager;

/// Transaction manager - allocates transaction ids and drives commit and
/// abort, releasing all locks through the lock manager at transaction end.
pub struct TransactionManager {
    /// Next transaction ID to assign
    next_txn_id: AtomicU32,

    lock_manager: Arc<LockManager>,

    /// Active transactions map (txn_id -> Transaction)
    active_transactions: Mutex<HashMap<TxnId, Arc<Transaction>>>,
}

impl TransactionManager {
    pub fn new(lock_manager: Arc<LockManager>) -> Self {
        Self {
            next_txn_id: AtomicU32::new(1), // Start from 1
            lock_manager,
            active_transactions: Mutex::new(HashMap::new()),
        }
    }

    /// Begin a new transaction in the growing phase.
    pub fn begin(&self, isolation_level: IsolationLevel) -> Arc<Transaction> {
        let txn_id = self.next_txn_id.fetch_add(1, Ordering::SeqCst);
        let txn = Arc::new(Transaction::new(txn_id, isolation_level));
        self.active_transactions.lock().insert(txn_id, txn.clone());
        txn
    }

    /// Commit: all locks are released and the transaction is retired.
    pub fn commit(&self, txn: &Arc<Transaction>) -> Result<(), TransactionError> {
        match txn.state() {
            TransactionState::Growing | TransactionState::Shrinking => {}
            _ => return Err(TransactionError::InvalidState(txn.id())),
        }

        txn.set_state(TransactionState::Committed);
        self.lock_manager.release_all_locks(txn);
        self.active_transactions.lock().remove(&txn.id());
        Ok(())
    }

    /// Abort: locks go away and the transaction is retired. Aborting a
    /// transaction that the deadlock detector already marked is fine.
    pub fn abort(&self, txn: &Arc<Transaction>) -> Result<(), TransactionError> {
        if txn.state() == TransactionState::Committed {
            return Err(TransactionError::InvalidState(txn.id()));
        }

        txn.set_state(TransactionState::Aborted);
        self.lock_manager.release_all_locks(txn);
        self.active_transactions.lock().remove(&txn.id());
        Ok(())
    }

    pub fn get_transaction(&self, txn_id: TxnId) -> Option<Arc<Transaction>> {
        self.active_transactions.lock().get(&txn_id).cloned()
    }

    pub fn active_transaction_ids(&self) -> Vec<TxnId> {
        self.active_transactions.lock().keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::lock_manager::LockManagerConfig;

    fn test_manager() -> TransactionManager {
        TransactionManager::new(Arc::new(LockManager::new(LockManagerConfig::default())))
    }

    #[test]
    fn test_begin_assigns_increasing_ids() {
        let manager = test_manager();
        let t1 = manager.begin(IsolationLevel::ReadCommitted);
        let t2 = manager.begin(IsolationLevel::ReadCommitted);
        assert!(t2.id() > t1.id());
        assert!(manager.get_transaction(t1.id()).is_some());
    }

    #[test]
    fn test_commit_retires_transaction() {
        let manager = test_manager();
        let txn = manager.begin(IsolationLevel::RepeatableRead);
        manager.commit(&txn).unwrap();
        assert_eq!(txn.state(), TransactionState::Committed);
        assert!(manager.get_transaction(txn.id()).is_none());

        // A committed transaction can be neither committed nor aborted again
        assert!(manager.commit(&txn).is_err());
        assert!(manager.abort(&txn).is_err());
    }

    #[test]
    fn test_abort_is_permitted_after_deadlock_victim_marking() {
        let manager = test_manager();
        let txn = manager.begin(IsolationLevel::RepeatableRead);
        txn.set_state(TransactionState::Aborted);
        manager.abort(&txn).unwrap();
        assert_eq!(txn.state(), TransactionState::Aborted);
    }
}
