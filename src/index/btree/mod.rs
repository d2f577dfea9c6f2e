pub mod error;
pub mod node;
pub mod index;
pub mod iterator;
pub mod serialization;

pub use error::BTreeError;
pub use index::{BPlusTree, BTreeKey};
pub use iterator::TreeIterator;
pub use node::{BTreeNode, NodeType};
