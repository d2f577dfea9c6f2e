use std::sync::Arc;

use crate::common::types::{PageId, Rid, INVALID_PAGE_ID};
use crate::storage::buffer::BufferPoolManager;
use crate::index::btree::error::BTreeError;
use crate::index::btree::node::BTreeNode;
use crate::index::btree::serialization::deserialize_node;
use crate::index::btree::index::{BTreeKey, PageReadGuard};

/// Forward iterator over the leaf chain.
///
/// Holds a shared latch and a pin on the current leaf. Advancing past the
/// end of a leaf acquires the next leaf's shared latch before releasing the
/// current one (hand-over-hand).
pub struct TreeIterator<K> {
    buffer_pool: Arc<BufferPoolManager>,
    current: Option<LeafPosition<K>>,
}

struct LeafPosition<K> {
    page_id: PageId,
    _guard: PageReadGuard,
    node: BTreeNode<K>,
    index: usize,
}

impl<K: BTreeKey> TreeIterator<K> {
    pub(crate) fn empty(buffer_pool: Arc<BufferPoolManager>) -> Self {
        Self {
            buffer_pool,
            current: None,
        }
    }

    pub(crate) fn new(
        buffer_pool: Arc<BufferPoolManager>,
        page_id: PageId,
        guard: PageReadGuard,
        node: BTreeNode<K>,
        index: usize,
    ) -> Self {
        Self {
            buffer_pool,
            current: Some(LeafPosition {
                page_id,
                _guard: guard,
                node,
                index,
            }),
        }
    }

    /// Yield the next entry in key order, or `None` past the last leaf.
    pub fn next_entry(&mut self) -> Result<Option<(K, Rid)>, BTreeError> {
        loop {
            let position = match self.current.as_mut() {
                Some(position) => position,
                None => return Ok(None),
            };

            if position.index < position.node.size() {
                let (key, rid) = position.node.leaf_entries()[position.index].clone();
                position.index += 1;
                return Ok(Some((key, rid)));
            }

            let next_page_id = position.node.next_page_id();
            if next_page_id == INVALID_PAGE_ID {
                self.release_current()?;
                return Ok(None);
            }

            // Latch the next leaf before letting go of the current one
            let next_page = self
                .buffer_pool
                .fetch_page(next_page_id)?
                .ok_or(BTreeError::PoolExhausted)?;
            let next_guard = next_page.read_arc();
            let next_node: BTreeNode<K> = deserialize_node(&next_guard)?;

            let old = self.current.replace(LeafPosition {
                page_id: next_page_id,
                _guard: next_guard,
                node: next_node,
                index: 0,
            });
            if let Some(old) = old {
                let old_page_id = old.page_id;
                drop(old._guard);
                self.buffer_pool.unpin_page(old_page_id, false)?;
            }
        }
    }

    fn release_current(&mut self) -> Result<(), BTreeError> {
        if let Some(position) = self.current.take() {
            let page_id = position.page_id;
            drop(position._guard);
            self.buffer_pool.unpin_page(page_id, false)?;
        }
        Ok(())
    }
}

impl<K> Drop for TreeIterator<K> {
    fn drop(&mut self) {
        if let Some(position) = self.current.take() {
            let page_id = position.page_id;
            drop(position._guard);
            let _ = self.buffer_pool.unpin_page(page_id, false);
        }
    }
}
