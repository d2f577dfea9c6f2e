use std::sync::Arc;

use crate::common::types::Rid;
use crate::transaction::LockMode;
use crate::execution::catalog::TableInfo;
use crate::execution::operators::{synthetic_rid, Executor, ExecutorContext};
use crate::execution::tuple::{DataValue, Tuple};
use crate::execution::error::ExecutionResult;

/// Delete the rows produced by a child executor.
///
/// Takes IX on the table, then X on each target row before removing its
/// index entries. Emits a single tuple holding the delete count.
pub struct DeleteExecutor {
    ctx: ExecutorContext,
    table: Arc<TableInfo>,
    child: Box<Executor>,
    done: bool,
}

impl DeleteExecutor {
    pub fn new(ctx: ExecutorContext, table_name: &str, child: Box<Executor>) -> ExecutionResult<Self> {
        let table = ctx.catalog.table(table_name)?;
        Ok(Self {
            ctx,
            table,
            child,
            done: false,
        })
    }

    pub fn init(&mut self) -> ExecutionResult<()> {
        self.child.init()?;
        self.ctx.lock_manager.lock_table(
            &self.ctx.txn,
            LockMode::IntentionExclusive,
            self.table.table_id,
        )?;
        Ok(())
    }

    pub fn next(&mut self) -> ExecutionResult<Option<(Tuple, Rid)>> {
        if self.done {
            return Ok(None);
        }

        let mut deleted: i64 = 0;
        while let Some((tuple, rid)) = self.child.next()? {
            self.ctx
                .lock_manager
                .lock_row(&self.ctx.txn, LockMode::Exclusive, self.table.table_id, rid)?;

            if self.table.heap.mark_delete(rid)? {
                for index in self.table.indexes() {
                    let key = index.key_of(&tuple)?;
                    index.index.remove(&key)?;
                }
                deleted += 1;
            }
        }

        self.done = true;
        Ok(Some((
            Tuple::new(vec![DataValue::Integer(deleted)]),
            synthetic_rid(),
        )))
    }
}
