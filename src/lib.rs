// Export public modules
pub mod common;
pub mod storage;
pub mod index;
pub mod transaction;
pub mod execution;

// Re-export key items for convenient access
pub use storage::buffer::{BufferPoolManager, BufferPoolConfig, BufferPoolError};
pub use storage::disk::DiskManager;
pub use index::btree::BPlusTree;
pub use transaction::{LockManager, LockManagerConfig, LockMode, TransactionManager, IsolationLevel};
pub use execution::{Catalog, Executor, ExecutorContext};
