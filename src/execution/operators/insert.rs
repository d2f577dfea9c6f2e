use std::sync::Arc;

use crate::common::types::Rid;
use crate::transaction::LockMode;
use crate::execution::catalog::TableInfo;
use crate::execution::operators::{synthetic_rid, ExecutorContext};
use crate::execution::tuple::{DataValue, Tuple};
use crate::execution::error::ExecutionResult;

/// Insert raw value rows into a table.
///
/// Takes IX on the table, then X on every newly inserted row, and keeps all
/// secondary indexes in step. Emits a single tuple holding the insert
/// count.
pub struct InsertExecutor {
    ctx: ExecutorContext,
    table: Arc<TableInfo>,
    rows: Vec<Tuple>,
    done: bool,
}

impl InsertExecutor {
    pub fn new(ctx: ExecutorContext, table_name: &str, rows: Vec<Tuple>) -> ExecutionResult<Self> {
        let table = ctx.catalog.table(table_name)?;
        Ok(Self {
            ctx,
            table,
            rows,
            done: false,
        })
    }

    pub fn init(&mut self) -> ExecutionResult<()> {
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

        let mut inserted: i64 = 0;
        for tuple in self.rows.drain(..) {
            let rid = self.table.heap.insert_tuple(&tuple)?;
            self.ctx
                .lock_manager
                .lock_row(&self.ctx.txn, LockMode::Exclusive, self.table.table_id, rid)?;

            for index in self.table.indexes() {
                let key = index.key_of(&tuple)?;
                index.index.insert(key, rid)?;
            }
            inserted += 1;
        }

        self.done = true;
        Ok(Some((
            Tuple::new(vec![DataValue::Integer(inserted)]),
            synthetic_rid(),
        )))
    }
}
