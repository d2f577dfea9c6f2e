use std::collections::{HashMap, HashSet};
use parking_lot::Mutex;
use thiserror::Error;

use crate::common::types::{TxnId, TableId, Rid};

/// Transaction isolation levels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
}

/// Two-phase locking states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Growing,
    Shrinking,
    Committed,
    Aborted,
}

/// Errors that abort a transaction or reject a transaction operation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransactionError {
    #[error("Transaction {0} aborted: lock requested while shrinking")]
    LockOnShrinking(TxnId),

    #[error("Transaction {0} aborted: shared lock under read-uncommitted")]
    SharedLockOnReadUncommitted(TxnId),

    #[error("Transaction {0} aborted: incompatible lock upgrade")]
    IncompatibleUpgrade(TxnId),

    #[error("Transaction {0} aborted: another upgrade is pending on this resource")]
    UpgradeConflict(TxnId),

    #[error("Transaction {0} aborted: intention lock requested on a row")]
    IntentionLockOnRow(TxnId),

    #[error("Transaction {0} aborted: exclusive row lock without a covering table lock")]
    TableLockNotPresent(TxnId),

    #[error("Transaction {0} aborted: unlock without a lock held")]
    UnlockWithoutLock(TxnId),

    #[error("Transaction {0} aborted: table unlocked before its row locks")]
    TableUnlockedBeforeRows(TxnId),

    #[error("Transaction {0} aborted as a deadlock victim")]
    DeadlockVictim(TxnId),

    #[error("Transaction {0} is not in a state that allows this operation")]
    InvalidState(TxnId),
}

/// Lock ownership bookkeeping, maintained by the lock manager as it grants
/// and releases locks.
#[derive(Debug, Default)]
pub(crate) struct LockSets {
    pub shared_tables: HashSet<TableId>,
    pub exclusive_tables: HashSet<TableId>,
    pub intention_shared_tables: HashSet<TableId>,
    pub intention_exclusive_tables: HashSet<TableId>,
    pub shared_intention_exclusive_tables: HashSet<TableId>,
    pub shared_rows: HashMap<TableId, HashSet<Rid>>,
    pub exclusive_rows: HashMap<TableId, HashSet<Rid>>,
}

/// Transaction - an active unit of work under two-phase locking.
pub struct Transaction {
    /// Transaction ID
    id: TxnId,

    /// Isolation level for this transaction
    isolation_level: IsolationLevel,

    /// Current 2PL state
    state: Mutex<TransactionState>,

    /// Locks currently owned, keyed by mode
    pub(crate) lock_sets: Mutex<LockSets>,
}

impl Transaction {
    pub fn new(txn_id: TxnId, isolation_level: IsolationLevel) -> Self {
        Self {
            id: txn_id,
            isolation_level,
            state: Mutex::new(TransactionState::Growing),
            lock_sets: Mutex::new(LockSets::default()),
        }
    }

    pub fn id(&self) -> TxnId {
        self.id
    }

    pub fn isolation_level(&self) -> IsolationLevel {
        self.isolation_level
    }

    pub fn state(&self) -> TransactionState {
        *self.state.lock()
    }

    pub fn set_state(&self, state: TransactionState) {
        *self.state.lock() = state;
    }

    pub fn is_aborted(&self) -> bool {
        self.state() == TransactionState::Aborted
    }

    /// Move to shrinking unless the transaction already finished.
    pub(crate) fn begin_shrinking(&self) {
        let mut state = self.state.lock();
        if *state != TransactionState::Committed && *state != TransactionState::Aborted {
            *state = TransactionState::Shrinking;
        }
    }

    /// True when this transaction holds X, IX or SIX on the table, which is
    /// what an exclusive row lock requires.
    pub fn holds_exclusive_style_table_lock(&self, table_id: TableId) -> bool {
        let sets = self.lock_sets.lock();
        sets.exclusive_tables.contains(&table_id)
            || sets.intention_exclusive_tables.contains(&table_id)
            || sets.shared_intention_exclusive_tables.contains(&table_id)
    }

    /// True when any row lock under the table is still held.
    pub fn holds_row_locks_under(&self, table_id: TableId) -> bool {
        let sets = self.lock_sets.lock();
        sets.shared_rows.get(&table_id).is_some_and(|rows| !rows.is_empty())
            || sets.exclusive_rows.get(&table_id).is_some_and(|rows| !rows.is_empty())
    }

    pub fn shared_row_locks(&self, table_id: TableId) -> Vec<Rid> {
        let sets = self.lock_sets.lock();
        sets.shared_rows
            .get(&table_id)
            .map(|rows| rows.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn exclusive_row_locks(&self, table_id: TableId) -> Vec<Rid> {
        let sets = self.lock_sets.lock();
        sets.exclusive_rows
            .get(&table_id)
            .map(|rows| rows.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn shared_table_locks(&self) -> Vec<TableId> {
        self.lock_sets.lock().shared_tables.iter().copied().collect()
    }

    pub fn exclusive_table_locks(&self) -> Vec<TableId> {
        self.lock_sets.lock().exclusive_tables.iter().copied().collect()
    }

    pub fn intention_shared_table_locks(&self) -> Vec<TableId> {
        self.lock_sets.lock().intention_shared_tables.iter().copied().collect()
    }

    pub fn intention_exclusive_table_locks(&self) -> Vec<TableId> {
        self.lock_sets.lock().intention_exclusive_tables.iter().copied().collect()
    }
}
