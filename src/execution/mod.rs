pub mod catalog;
pub mod error;
pub mod operators;
pub mod table_heap;
pub mod tuple;

pub use catalog::{Catalog, IndexInfo, TableInfo};
pub use error::{ExecutionError, ExecutionResult};
pub use operators::{Executor, ExecutorContext};
pub use table_heap::{TableHeap, TableIterator};
pub use tuple::{DataValue, Schema, Tuple};
