use std::sync::Arc;

use crate::common::types::Rid;
use crate::transaction::{IsolationLevel, LockMode};
use crate::execution::catalog::{IndexInfo, TableInfo};
use crate::execution::operators::ExecutorContext;
use crate::execution::tuple::Tuple;
use crate::execution::error::{ExecutionError, ExecutionResult};
use crate::index::btree::TreeIterator;

/// Index scan: walks a B+tree iterator and reads tuples through the table
/// heap, with the same row-lock discipline as the sequential scan.
pub struct IndexScanExecutor {
    ctx: ExecutorContext,
    table: Arc<TableInfo>,
    index: Arc<IndexInfo>,
    start_key: Option<i64>,
    iterator: Option<TreeIterator<i64>>,
    last_locked: Option<Rid>,
}

impl IndexScanExecutor {
    pub fn new(
        ctx: ExecutorContext,
        table_name: &str,
        index_name: &str,
        start_key: Option<i64>,
    ) -> ExecutionResult<Self> {
        let table = ctx.catalog.table(table_name)?;
        let index = table
            .indexes()
            .into_iter()
            .find(|i| i.name == index_name)
            .ok_or_else(|| {
                ExecutionError::InvalidOperation(format!("index '{}' not found", index_name))
            })?;
        Ok(Self {
            ctx,
            table,
            index,
            start_key,
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
        let iterator = match self.start_key {
            Some(key) => self.index.index.iter_from(&key)?,
            None => self.index.index.iter()?,
        };
        self.iterator = Some(iterator);
        Ok(())
    }

    pub fn next(&mut self) -> ExecutionResult<Option<(Tuple, Rid)>> {
        let isolation = self.ctx.txn.isolation_level();

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
            .ok_or_else(|| ExecutionError::InvalidOperation("index scan not initialized".into()))?;

        while let Some((_key, rid)) = iterator.next_entry()? {
            if isolation != IsolationLevel::ReadUncommitted {
                self.ctx
                    .lock_manager
                    .lock_row(&self.ctx.txn, LockMode::Shared, self.table.table_id, rid)?;
                self.last_locked = Some(rid);
            }
            // The heap row may have been deleted under a stale index entry
            if let Some(tuple) = self.table.heap.get_tuple(rid)? {
                return Ok(Some((tuple, rid)));
            }
        }
        Ok(None)
    }
}
