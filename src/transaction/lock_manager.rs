use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;
use parking_lot::{Condvar, Mutex};
use log::warn;

use crate::common::types::{TxnId, TableId, Rid};
use crate::transaction::transaction::{Transaction, TransactionError, TransactionState, IsolationLevel};

/// Lock modes, including the intention modes used at table granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    IntentionShared,
    IntentionExclusive,
    Shared,
    SharedIntentionExclusive,
    Exclusive,
}

impl LockMode {
    fn is_intention(&self) -> bool {
        matches!(
            self,
            LockMode::IntentionShared | LockMode::IntentionExclusive | LockMode::SharedIntentionExclusive
        )
    }
}

/// Compatibility matrix: may `requested` be granted while `held` is held?
fn compatible(requested: LockMode, held: LockMode) -> bool {
    match requested {
        LockMode::IntentionShared => held != LockMode::Exclusive,
        LockMode::IntentionExclusive => {
            matches!(held, LockMode::IntentionShared | LockMode::IntentionExclusive)
        }
        LockMode::Shared => matches!(held, LockMode::IntentionShared | LockMode::Shared),
        LockMode::SharedIntentionExclusive => held == LockMode::IntentionShared,
        LockMode::Exclusive => false,
    }
}

/// Permitted upgrade lattice.
fn upgrade_allowed(from: LockMode, to: LockMode) -> bool {
    match from {
        LockMode::IntentionShared => matches!(
            to,
            LockMode::Shared | LockMode::Exclusive | LockMode::IntentionExclusive | LockMode::SharedIntentionExclusive
        ),
        LockMode::Shared => matches!(to, LockMode::Exclusive | LockMode::SharedIntentionExclusive),
        LockMode::IntentionExclusive => matches!(to, LockMode::Exclusive | LockMode::SharedIntentionExclusive),
        LockMode::SharedIntentionExclusive => to == LockMode::Exclusive,
        LockMode::Exclusive => false,
    }
}

#[derive(Debug, Clone, Copy)]
enum Resource {
    Table(TableId),
    Row(TableId, Rid),
}

#[derive(Debug)]
struct LockRequest {
    txn_id: TxnId,
    mode: LockMode,
    granted: bool,
}

struct QueueInner {
    requests: VecDeque<LockRequest>,
    upgrading: Option<TxnId>,
}

/// Per-resource FIFO wait queue with a single pending-upgrade slot.
struct LockRequestQueue {
    inner: Mutex<QueueInner>,
    cv: Condvar,
}

impl LockRequestQueue {
    fn new() -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                requests: VecDeque::new(),
                upgrading: None,
            }),
            cv: Condvar::new(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct LockManagerConfig {
    /// How often the background detector scans for wait-for cycles.
    pub detection_interval: Duration,
}

impl Default for LockManagerConfig {
    fn default() -> Self {
        Self {
            detection_interval: Duration::from_millis(50),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum WaitTarget {
    Table(TableId),
    Row(Rid),
}

/// Hierarchical two-phase lock manager with table and row granularity,
/// lock upgrades and periodic deadlock detection.
///
/// Lock ordering is strictly map mutex -> queue mutex -> condition wait;
/// queue mutexes are never nested across resources.
pub struct LockManager {
    table_lock_map: Mutex<HashMap<TableId, Arc<LockRequestQueue>>>,
    row_lock_map: Mutex<HashMap<Rid, Arc<LockRequestQueue>>>,
    txn_registry: Mutex<HashMap<TxnId, Arc<Transaction>>>,
    detection_enabled: AtomicBool,
    config: LockManagerConfig,
}

impl LockManager {
    pub fn new(config: LockManagerConfig) -> Self {
        Self {
            table_lock_map: Mutex::new(HashMap::new()),
            row_lock_map: Mutex::new(HashMap::new()),
            txn_registry: Mutex::new(HashMap::new()),
            detection_enabled: AtomicBool::new(false),
            config,
        }
    }

    /// Acquire a table lock, waiting if the queue requires it.
    pub fn lock_table(
        &self,
        txn: &Arc<Transaction>,
        mode: LockMode,
        table_id: TableId,
    ) -> Result<(), TransactionError> {
        self.check_isolation_rules(txn, mode)?;
        self.register(txn);

        let queue = {
            let mut map = self.table_lock_map.lock();
            map.entry(table_id)
                .or_insert_with(|| Arc::new(LockRequestQueue::new()))
                .clone()
        };

        self.acquire(txn, &queue, mode, Resource::Table(table_id))
    }

    /// Release a table lock. The transaction must not hold row locks under
    /// the table, and may transition to shrinking depending on its
    /// isolation level and the released mode.
    pub fn unlock_table(&self, txn: &Arc<Transaction>, table_id: TableId) -> Result<(), TransactionError> {
        let queue = {
            let map = self.table_lock_map.lock();
            map.get(&table_id).cloned()
        };
        let queue = match queue {
            Some(queue) => queue,
            None => return Err(self.abort_with(txn, TransactionError::UnlockWithoutLock(txn.id()))),
        };

        if txn.holds_row_locks_under(table_id) {
            return Err(self.abort_with(txn, TransactionError::TableUnlockedBeforeRows(txn.id())));
        }

        let released_mode = self.remove_granted(&queue, txn.id());
        let mode = match released_mode {
            Some(mode) => mode,
            None => return Err(self.abort_with(txn, TransactionError::UnlockWithoutLock(txn.id()))),
        };

        self.maybe_shrink(txn, mode);
        self.erase_lock(txn, mode, Resource::Table(table_id));
        Ok(())
    }

    /// Acquire a row lock; only S and X are legal at row granularity, and X
    /// requires a covering X/IX/SIX table lock.
    pub fn lock_row(
        &self,
        txn: &Arc<Transaction>,
        mode: LockMode,
        table_id: TableId,
        rid: Rid,
    ) -> Result<(), TransactionError> {
        if mode.is_intention() {
            return Err(self.abort_with(txn, TransactionError::IntentionLockOnRow(txn.id())));
        }
        self.check_isolation_rules(txn, mode)?;

        if mode == LockMode::Exclusive && !txn.holds_exclusive_style_table_lock(table_id) {
            return Err(self.abort_with(txn, TransactionError::TableLockNotPresent(txn.id())));
        }

        self.register(txn);

        let queue = {
            let mut map = self.row_lock_map.lock();
            map.entry(rid)
                .or_insert_with(|| Arc::new(LockRequestQueue::new()))
                .clone()
        };

        self.acquire(txn, &queue, mode, Resource::Row(table_id, rid))
    }

    /// Release a row lock.
    pub fn unlock_row(&self, txn: &Arc<Transaction>, table_id: TableId, rid: Rid) -> Result<(), TransactionError> {
        let queue = {
            let map = self.row_lock_map.lock();
            map.get(&rid).cloned()
        };
        let queue = match queue {
            Some(queue) => queue,
            None => return Err(self.abort_with(txn, TransactionError::UnlockWithoutLock(txn.id()))),
        };

        let released_mode = self.remove_granted(&queue, txn.id());
        let mode = match released_mode {
            Some(mode) => mode,
            None => return Err(self.abort_with(txn, TransactionError::UnlockWithoutLock(txn.id()))),
        };

        self.maybe_shrink(txn, mode);
        self.erase_lock(txn, mode, Resource::Row(table_id, rid));
        Ok(())
    }

    /// Drop every lock the transaction still holds, waking all affected
    /// queues. Used at commit and abort; 2PL checks do not apply here.
    pub fn release_all_locks(&self, txn: &Arc<Transaction>) {
        let (row_locks, table_locks) = {
            let sets = txn.lock_sets.lock();
            let mut rows: Vec<Rid> = Vec::new();
            for rids in sets.shared_rows.values() {
                rows.extend(rids.iter().copied());
            }
            for rids in sets.exclusive_rows.values() {
                rows.extend(rids.iter().copied());
            }
            let mut tables: Vec<TableId> = Vec::new();
            tables.extend(sets.shared_tables.iter().copied());
            tables.extend(sets.exclusive_tables.iter().copied());
            tables.extend(sets.intention_shared_tables.iter().copied());
            tables.extend(sets.intention_exclusive_tables.iter().copied());
            tables.extend(sets.shared_intention_exclusive_tables.iter().copied());
            (rows, tables)
        };

        // Rows release before their tables
        for rid in row_locks {
            let queue = self.row_lock_map.lock().get(&rid).cloned();
            if let Some(queue) = queue {
                let _ = self.remove_granted(&queue, txn.id());
            }
        }
        for table_id in table_locks {
            let queue = self.table_lock_map.lock().get(&table_id).cloned();
            if let Some(queue) = queue {
                let _ = self.remove_granted(&queue, txn.id());
            }
        }

        *txn.lock_sets.lock() = Default::default();
        self.txn_registry.lock().remove(&txn.id());
    }

    // ----- queue protocol -----

    fn acquire(
        &self,
        txn: &Arc<Transaction>,
        queue: &Arc<LockRequestQueue>,
        mode: LockMode,
        resource: Resource,
    ) -> Result<(), TransactionError> {
        let mut q = queue.inner.lock();

        // A second request by the same transaction is an upgrade
        if let Some(pos) = q.requests.iter().position(|r| r.txn_id == txn.id()) {
            let existing_mode = q.requests[pos].mode;
            if existing_mode == mode {
                return Ok(());
            }
            if q.upgrading.is_some() {
                drop(q);
                return Err(self.abort_with(txn, TransactionError::UpgradeConflict(txn.id())));
            }
            if !upgrade_allowed(existing_mode, mode) {
                drop(q);
                return Err(self.abort_with(txn, TransactionError::IncompatibleUpgrade(txn.id())));
            }

            // The old grant goes away; the upgrade queues just behind the
            // remaining granted prefix
            let _ = q.requests.remove(pos);
            self.erase_lock(txn, existing_mode, resource);

            let insert_at = q.requests.iter().position(|r| !r.granted).unwrap_or(q.requests.len());
            q.requests.insert(
                insert_at,
                LockRequest {
                    txn_id: txn.id(),
                    mode,
                    granted: false,
                },
            );
            q.upgrading = Some(txn.id());

            while !Self::grantable(&q, txn.id(), mode) {
                queue.cv.wait(&mut q);
                if txn.is_aborted() {
                    q.upgrading = None;
                    if let Some(pos) = q.requests.iter().position(|r| r.txn_id == txn.id()) {
                        let _ = q.requests.remove(pos);
                    }
                    queue.cv.notify_all();
                    return Err(TransactionError::DeadlockVictim(txn.id()));
                }
            }

            q.upgrading = None;
            if let Some(request) = q.requests.iter_mut().find(|r| r.txn_id == txn.id()) {
                request.granted = true;
            }
            self.insert_lock(txn, mode, resource);
            if mode != LockMode::Exclusive {
                queue.cv.notify_all();
            }
            return Ok(());
        }

        // Fresh request at the tail of the queue
        q.requests.push_back(LockRequest {
            txn_id: txn.id(),
            mode,
            granted: false,
        });

        while !Self::grantable(&q, txn.id(), mode) {
            queue.cv.wait(&mut q);
            if txn.is_aborted() {
                if let Some(pos) = q.requests.iter().position(|r| r.txn_id == txn.id()) {
                    let _ = q.requests.remove(pos);
                }
                queue.cv.notify_all();
                return Err(TransactionError::DeadlockVictim(txn.id()));
            }
        }

        if let Some(request) = q.requests.iter_mut().find(|r| r.txn_id == txn.id()) {
            request.granted = true;
        }
        self.insert_lock(txn, mode, resource);
        if mode != LockMode::Exclusive {
            queue.cv.notify_all();
        }
        Ok(())
    }

    /// A request is granted iff it is compatible with every granted request
    /// and sits at the head of the ungranted part of the queue.
    fn grantable(q: &QueueInner, txn_id: TxnId, mode: LockMode) -> bool {
        for request in &q.requests {
            if request.granted {
                if !compatible(mode, request.mode) {
                    return false;
                }
            } else {
                return request.txn_id == txn_id;
            }
        }
        false
    }

    fn remove_granted(&self, queue: &Arc<LockRequestQueue>, txn_id: TxnId) -> Option<LockMode> {
        let mut q = queue.inner.lock();
        let pos = q.requests.iter().position(|r| r.txn_id == txn_id && r.granted)?;
        let mode = q.requests[pos].mode;
        let _ = q.requests.remove(pos);
        queue.cv.notify_all();
        Some(mode)
    }

    // ----- isolation and bookkeeping -----

    fn check_isolation_rules(&self, txn: &Arc<Transaction>, mode: LockMode) -> Result<(), TransactionError> {
        let state = txn.state();
        match txn.isolation_level() {
            IsolationLevel::ReadUncommitted => {
                if matches!(
                    mode,
                    LockMode::Shared | LockMode::IntentionShared | LockMode::SharedIntentionExclusive
                ) {
                    return Err(self.abort_with(txn, TransactionError::SharedLockOnReadUncommitted(txn.id())));
                }
                if state == TransactionState::Shrinking {
                    return Err(self.abort_with(txn, TransactionError::LockOnShrinking(txn.id())));
                }
            }
            IsolationLevel::ReadCommitted => {
                if state == TransactionState::Shrinking
                    && !matches!(mode, LockMode::IntentionShared | LockMode::Shared)
                {
                    return Err(self.abort_with(txn, TransactionError::LockOnShrinking(txn.id())));
                }
            }
            IsolationLevel::RepeatableRead => {
                if state == TransactionState::Shrinking {
                    return Err(self.abort_with(txn, TransactionError::LockOnShrinking(txn.id())));
                }
            }
        }
        Ok(())
    }

    fn maybe_shrink(&self, txn: &Arc<Transaction>, mode: LockMode) {
        let shrink = match txn.isolation_level() {
            IsolationLevel::RepeatableRead => matches!(mode, LockMode::Shared | LockMode::Exclusive),
            IsolationLevel::ReadCommitted | IsolationLevel::ReadUncommitted => mode == LockMode::Exclusive,
        };
        if shrink {
            txn.begin_shrinking();
        }
    }

    fn abort_with(&self, txn: &Arc<Transaction>, error: TransactionError) -> TransactionError {
        txn.set_state(TransactionState::Aborted);
        error
    }

    fn register(&self, txn: &Arc<Transaction>) {
        self.txn_registry
            .lock()
            .entry(txn.id())
            .or_insert_with(|| txn.clone());
    }

    fn insert_lock(&self, txn: &Arc<Transaction>, mode: LockMode, resource: Resource) {
        let mut sets = txn.lock_sets.lock();
        match resource {
            Resource::Table(table_id) => match mode {
                LockMode::Shared => {
                    sets.shared_tables.insert(table_id);
                }
                LockMode::Exclusive => {
                    sets.exclusive_tables.insert(table_id);
                }
                LockMode::IntentionShared => {
                    sets.intention_shared_tables.insert(table_id);
                }
                LockMode::IntentionExclusive => {
                    sets.intention_exclusive_tables.insert(table_id);
                }
                LockMode::SharedIntentionExclusive => {
                    sets.shared_intention_exclusive_tables.insert(table_id);
                }
            },
            Resource::Row(table_id, rid) => match mode {
                LockMode::Shared => {
                    sets.shared_rows.entry(table_id).or_default().insert(rid);
                }
                LockMode::Exclusive => {
                    sets.exclusive_rows.entry(table_id).or_default().insert(rid);
                }
                _ => {}
            },
        }
    }

    fn erase_lock(&self, txn: &Arc<Transaction>, mode: LockMode, resource: Resource) {
        let mut sets = txn.lock_sets.lock();
        match resource {
            Resource::Table(table_id) => match mode {
                LockMode::Shared => {
                    sets.shared_tables.remove(&table_id);
                }
                LockMode::Exclusive => {
                    sets.exclusive_tables.remove(&table_id);
                }
                LockMode::IntentionShared => {
                    sets.intention_shared_tables.remove(&table_id);
                }
                LockMode::IntentionExclusive => {
                    sets.intention_exclusive_tables.remove(&table_id);
                }
                LockMode::SharedIntentionExclusive => {
                    sets.shared_intention_exclusive_tables.remove(&table_id);
                }
            },
            Resource::Row(table_id, rid) => match mode {
                LockMode::Shared => {
                    if let Some(rows) = sets.shared_rows.get_mut(&table_id) {
                        rows.remove(&rid);
                    }
                }
                LockMode::Exclusive => {
                    if let Some(rows) = sets.exclusive_rows.get_mut(&table_id) {
                        rows.remove(&rid);
                    }
                }
                _ => {}
            },
        }
    }

    // ----- deadlock detection -----

    /// Spawn the background thread that periodically hunts for wait-for
    /// cycles. Stopped with [`LockManager::stop_deadlock_detection`].
    pub fn start_deadlock_detection(self: &Arc<Self>) -> thread::JoinHandle<()> {
        self.detection_enabled.store(true, Ordering::SeqCst);
        let lock_manager = Arc::clone(self);
        thread::spawn(move || {
            while lock_manager.detection_enabled.load(Ordering::SeqCst) {
                thread::sleep(lock_manager.config.detection_interval);
                lock_manager.detect_deadlocks();
            }
        })
    }

    pub fn stop_deadlock_detection(&self) {
        self.detection_enabled.store(false, Ordering::SeqCst);
    }

    /// One detection pass: build the wait-for graph, abort the youngest
    /// transaction of every cycle and wake the queue it was waiting on.
    fn detect_deadlocks(&self) {
        let table_queues: Vec<(TableId, Arc<LockRequestQueue>)> = {
            let map = self.table_lock_map.lock();
            map.iter().map(|(id, q)| (*id, q.clone())).collect()
        };
        let row_queues: Vec<(Rid, Arc<LockRequestQueue>)> = {
            let map = self.row_lock_map.lock();
            map.iter().map(|(id, q)| (*id, q.clone())).collect()
        };

        let mut waits_for: BTreeMap<TxnId, BTreeSet<TxnId>> = BTreeMap::new();
        let mut wait_target: HashMap<TxnId, WaitTarget> = HashMap::new();

        for (table_id, queue) in &table_queues {
            let q = queue.inner.lock();
            Self::collect_edges(&q, &mut waits_for, &mut wait_target, WaitTarget::Table(*table_id));
        }
        for (rid, queue) in &row_queues {
            let q = queue.inner.lock();
            Self::collect_edges(&q, &mut waits_for, &mut wait_target, WaitTarget::Row(*rid));
        }

        while let Some(cycle) = find_cycle(&waits_for) {
            let victim = match cycle.iter().max() {
                Some(victim) => *victim,
                None => break,
            };
            warn!("deadlock detected, aborting youngest transaction {}", victim);

            let txn = self.txn_registry.lock().get(&victim).cloned();
            if let Some(txn) = txn {
                txn.set_state(TransactionState::Aborted);
            }

            waits_for.remove(&victim);
            for edges in waits_for.values_mut() {
                edges.remove(&victim);
            }

            if let Some(target) = wait_target.get(&victim) {
                let queue = match target {
                    WaitTarget::Table(table_id) => self.table_lock_map.lock().get(table_id).cloned(),
                    WaitTarget::Row(rid) => self.row_lock_map.lock().get(rid).cloned(),
                };
                if let Some(queue) = queue {
                    let _q = queue.inner.lock();
                    queue.cv.notify_all();
                }
            }
        }
    }

    /// Every ungranted request waits for every granted request in its queue.
    fn collect_edges(
        q: &QueueInner,
        waits_for: &mut BTreeMap<TxnId, BTreeSet<TxnId>>,
        wait_target: &mut HashMap<TxnId, WaitTarget>,
        target: WaitTarget,
    ) {
        let granted: Vec<TxnId> = q.requests.iter().filter(|r| r.granted).map(|r| r.txn_id).collect();
        for request in q.requests.iter().filter(|r| !r.granted) {
            for &holder in &granted {
                waits_for.entry(request.txn_id).or_default().insert(holder);
            }
            if !granted.is_empty() {
                wait_target.insert(request.txn_id, target);
            }
        }
    }
}

/// Depth-first search for a cycle, deterministic by transaction id order.
fn find_cycle(waits_for: &BTreeMap<TxnId, BTreeSet<TxnId>>) -> Option<Vec<TxnId>> {
    let mut visited: HashSet<TxnId> = HashSet::new();

    for &start in waits_for.keys() {
        if visited.contains(&start) {
            continue;
        }
        let mut path: Vec<TxnId> = Vec::new();
        let mut on_path: HashSet<TxnId> = HashSet::new();
        if let Some(cycle) = dfs(start, waits_for, &mut visited, &mut path, &mut on_path) {
            return Some(cycle);
        }
    }
    None
}

fn dfs(
    node: TxnId,
    graph: &BTreeMap<TxnId, BTreeSet<TxnId>>,
    visited: &mut HashSet<TxnId>,
    path: &mut Vec<TxnId>,
    on_path: &mut HashSet<TxnId>,
) -> Option<Vec<TxnId>> {
    visited.insert(node);
    path.push(node);
    on_path.insert(node);

    if let Some(neighbours) = graph.get(&node) {
        for &next in neighbours {
            if on_path.contains(&next) {
                if let Some(pos) = path.iter().position(|&p| p == next) {
                    return Some(path[pos..].to_vec());
                }
            }
            if !visited.contains(&next) {
                if let Some(cycle) = dfs(next, graph, visited, path, on_path) {
                    return Some(cycle);
                }
            }
        }
    }

    path.pop();
    on_path.remove(&node);
    None
}
