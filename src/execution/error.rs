use thiserror::Error;

use crate::storage::buffer::BufferPoolError;
use crate::storage::page::PageError;
use crate::index::btree::BTreeError;
use crate::transaction::TransactionError;

#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("Transaction aborted: {0}")]
    TransactionAborted(#[from] TransactionError),

    #[error("Table '{0}' not found")]
    TableNotFound(String),

    #[error("Buffer pool exhausted")]
    PoolExhausted,

    #[error("Buffer pool error: {0}")]
    BufferPool(#[from] BufferPoolError),

    #[error("Page error: {0}")]
    Page(#[from] PageError),

    #[error("Index error: {0}")]
    Index(#[from] BTreeError),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
}

pub type ExecutionResult<T> = Result<T, ExecutionError>;
