// Query operators
//
// Pull-based execution operators. The operator tree is a tagged variant
// with a shared init/next contract; every operator that touches table data
// requests its locks from the lock manager before reading or writing rows
// and aborts the transaction on any lock failure.

pub mod seq_scan;
pub mod index_scan;
pub mod insert;
pub mod delete;
pub mod sort;
pub mod aggregate;
pub mod nested_loop_join;

use std::sync::Arc;

use crate::common::types::{Rid, INVALID_PAGE_ID};
use crate::transaction::{LockManager, Transaction};
use crate::execution::catalog::Catalog;
use crate::execution::tuple::Tuple;
use crate::execution::error::ExecutionResult;

pub use seq_scan::SeqScanExecutor;
pub use index_scan::IndexScanExecutor;
pub use insert::InsertExecutor;
pub use delete::DeleteExecutor;
pub use sort::{SortExecutor, OrderDirection};
pub use aggregate::{AggregateExecutor, AggregateExpr, AggregateFunction};
pub use nested_loop_join::{NestedLoopJoinExecutor, JoinType};

/// Everything an operator needs to run: the catalog, the lock manager and
/// the transaction it executes on behalf of.
#[derive(Clone)]
pub struct ExecutorContext {
    pub catalog: Arc<Catalog>,
    pub lock_manager: Arc<LockManager>,
    pub txn: Arc<Transaction>,
}

impl ExecutorContext {
    pub fn new(catalog: Arc<Catalog>, lock_manager: Arc<LockManager>, txn: Arc<Transaction>) -> Self {
        Self {
            catalog,
            lock_manager,
            txn,
        }
    }
}

/// Rid attached to tuples produced by compute operators (sort, aggregate,
/// join, DML counts) that do not correspond to a stored row.
pub(crate) fn synthetic_rid() -> Rid {
    Rid::new(INVALID_PAGE_ID, 0)
}

/// Execution operators as one tagged variant with a shared init/next
/// contract.
pub enum Executor {
    SeqScan(SeqScanExecutor),
    IndexScan(IndexScanExecutor),
    Insert(InsertExecutor),
    Delete(DeleteExecutor),
    Sort(SortExecutor),
    Aggregate(AggregateExecutor),
    NestedLoopJoin(NestedLoopJoinExecutor),
}

impl Executor {
    /// Initialize the operator before the first call to `next`.
    pub fn init(&mut self) -> ExecutionResult<()> {
        match self {
            Executor::SeqScan(op) => op.init(),
            Executor::IndexScan(op) => op.init(),
            Executor::Insert(op) => op.init(),
            Executor::Delete(op) => op.init(),
            Executor::Sort(op) => op.init(),
            Executor::Aggregate(op) => op.init(),
            Executor::NestedLoopJoin(op) => op.init(),
        }
    }

    /// Produce the next tuple, or `None` once the operator is exhausted.
    pub fn next(&mut self) -> ExecutionResult<Option<(Tuple, Rid)>> {
        match self {
            Executor::SeqScan(op) => op.next(),
            Executor::IndexScan(op) => op.next(),
            Executor::Insert(op) => op.next(),
            Executor::Delete(op) => op.next(),
            Executor::Sort(op) => op.next(),
            Executor::Aggregate(op) => op.next(),
            Executor::NestedLoopJoin(op) => op.next(),
        }
    }
}
