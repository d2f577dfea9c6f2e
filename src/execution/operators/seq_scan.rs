use std::sync::Arc;

use crate::common::types::Rid;
use crate::transaction::{IsolationLevel, LockMode};
use crate::execution::catalog::TableInfo;
use crate::execution::operators::ExecutorContext;
use crate::execution::table_heap::TableIterator;
use crate::execution::tuple::Tuple;
use crate::execution::error::{ExecutionError, ExecutionResult};

/// Sequential scan over a table heap.
///
/// Takes IS on the table (outside read-uncommitted), then S on each row it
/// yields. At read-committed the previous row's S lock is dropped as soon
/// as the next row is consumed.
pub struct SeqScanExecutor {
    ctx: ExecutorContext,
    table: Arc<TableInfo>,
    iterator: Option<TableIterator>,
    last_locked: Option<Rid>,
}

impl SeqScanExecutor {
    pub fn new(ctx: ExecutorContext, table_name: &str) -> ExecutionResult<Self> {
        let table = ctx.catalog.table(table_name)?;
        Ok(Self {
            ctx,
            table,
            iterator: None,
            last_locked: None,
        })
    }

    pub fn init(&mut self) -> ExecutionResult<()> {
        if self.ctx.txn.isolation_level() != IsolationLevel::ReadUncommitted {
            self.ctx.lock_manager.lock_table(
                &self.ctx.txn,
                LockMode::IntentionShared,
                self.table.table_id,
            )?;
        }
        self.iterator = Some(self.table.heap.iter());
        Ok(())
    }

    pub fn next(&mut self) -> ExecutionResult<Option<(Tuple, Rid)>> {
        let isolation = self.ctx.txn.isolation_level();

        // Read-committed lets go of the previous row's shared lock once the
        // caller has consumed it
        if isolation == IsolationLevel::ReadCommitted {
            if let Some(prev) = self.last_locked.take() {
                // Skip rows a parent operator upgraded to X in the meantime
                if self.ctx.txn.shared_row_locks(self.table.table_id).contains(&prev) {
                    self.ctx
                        .lock_manager
                        .unlock_row(&self.ctx.txn, self.table.table_id, prev)?;
                }
            }
        }

        let iterator = self
            .iterator
            .as_mut()
            .ok_or_else(|| ExecutionError::InvalidOperation("seq scan not initialized".into()))?;

        match iterator.next_tuple()? {
            Some((tuple, rid)) => {
                if isolation != IsolationLevel::ReadUncommitted {
                    self.ctx
                        .lock_manager
                        .lock_row(&self.ctx.txn, LockMode::Shared, self.table.table_id, rid)?;
                    self.last_locked = Some(rid);
                }
                Ok(Some((tuple, rid)))
            }
            None => Ok(None),
        }
    }
}
