use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use parking_lot::RwLock;

use crate::common::types::TableId;
use crate::storage::buffer::BufferPoolManager;
use crate::index::btree::BPlusTree;
use crate::execution::table_heap::TableHeap;
use crate::execution::tuple::{DataValue, Schema, Tuple};
use crate::execution::error::{ExecutionError, ExecutionResult};

/// Node capacity used for secondary indexes over integer keys.
const INDEX_NODE_MAX_SIZE: u16 = 128;

/// A secondary index over a single integer column.
pub struct IndexInfo {
    pub name: String,
    pub key_column: usize,
    pub index: Arc<BPlusTree<i64>>,
}

impl IndexInfo {
    /// Extract this index's key from a tuple.
    pub fn key_of(&self, tuple: &Tuple) -> ExecutionResult<i64> {
        match tuple.value(self.key_column) {
            Some(DataValue::Integer(key)) => Ok(*key),
            Some(other) => Err(ExecutionError::InvalidOperation(format!(
                "index '{}' expects an integer key, got {}",
                self.name, other
            ))),
            None => Err(ExecutionError::InvalidOperation(format!(
                "index '{}' key column {} out of range",
                self.name, self.key_column
            ))),
        }
    }
}

/// Metadata for one table: schema, heap storage and secondary indexes.
pub struct TableInfo {
    pub table_id: TableId,
    pub name: String,
    pub schema: Schema,
    pub heap: Arc<TableHeap>,
    indexes: RwLock<Vec<Arc<IndexInfo>>>,
}

impl TableInfo {
    pub fn indexes(&self) -> Vec<Arc<IndexInfo>> {
        self.indexes.read().clone()
    }
}

/// In-memory catalog mapping table names to their metadata. The execution
/// core reads schemas but never mutates them.
pub struct Catalog {
    buffer_pool: Arc<BufferPoolManager>,
    next_table_id: AtomicU32,
    tables: RwLock<HashMap<String, Arc<TableInfo>>>,
}

impl Catalog {
    pub fn new(buffer_pool: Arc<BufferPoolManager>) -> Self {
        Self {
            buffer_pool,
            next_table_id: AtomicU32::new(1),
            tables: RwLock::new(HashMap::new()),
        }
    }

    pub fn create_table(&self, name: &str, schema: Schema) -> ExecutionResult<Arc<TableInfo>> {
        let mut tables = self.tables.write();
        if tables.contains_key(name) {
            return Err(ExecutionError::InvalidOperation(format!(
                "table '{}' already exists",
                name
            )));
        }

        let heap = Arc::new(TableHeap::new(self.buffer_pool.clone())?);
        let info = Arc::new(TableInfo {
            table_id: self.next_table_id.fetch_add(1, Ordering::SeqCst),
            name: name.to_string(),
            schema,
            heap,
            indexes: RwLock::new(Vec::new()),
        });
        tables.insert(name.to_string(), info.clone());
        Ok(info)
    }

    pub fn table(&self, name: &str) -> ExecutionResult<Arc<TableInfo>> {
        self.tables
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| ExecutionError::TableNotFound(name.to_string()))
    }

    /// Create a secondary index over one integer column, backfilling it
    /// from the rows already in the heap.
    pub fn create_index(
        &self,
        table_name: &str,
        index_name: &str,
        key_column: usize,
    ) -> ExecutionResult<Arc<IndexInfo>> {
        let table = self.table(table_name)?;

        let index = Arc::new(IndexInfo {
            name: index_name.to_string(),
            key_column,
            index: Arc::new(BPlusTree::new(
                self.buffer_pool.clone(),
                INDEX_NODE_MAX_SIZE,
                INDEX_NODE_MAX_SIZE,
            )),
        });

        let mut iter = table.heap.iter();
        while let Some((tuple, rid)) = iter.next_tuple()? {
            let key = index.key_of(&tuple)?;
            index.index.insert(key, rid)?;
        }

        table.indexes.write().push(index.clone());
        Ok(index)
    }
}
