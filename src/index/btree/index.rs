use std::marker::PhantomData;
use std::sync::Arc;
use parking_lot::{Mutex, RwLock, RawRwLock};
use parking_lot::lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard};
use serde::Serialize;
use serde::de::DeserializeOwned;
use log::debug;

use crate::common::types::{Page, PageId, PagePtr, Rid, INVALID_PAGE_ID};
use crate::storage::buffer::BufferPoolManager;
use crate::index::btree::error::BTreeError;
use crate::index::btree::node::{BTreeNode, NodePayload};
use crate::index::btree::serialization::{serialize_node, deserialize_node};
use crate::index::btree::iterator::TreeIterator;

pub(crate) type PageReadGuard = ArcRwLockReadGuard<RawRwLock, Page>;
pub(crate) type PageWriteGuard = ArcRwLockWriteGuard<RawRwLock, Page>;

/// Key types storable in the B+tree.
pub trait BTreeKey: Clone + Ord + Serialize + DeserializeOwned + Send + Sync + 'static {}
impl<T: Clone + Ord + Serialize + DeserializeOwned + Send + Sync + 'static> BTreeKey for T {}

/// The set of write latches held by one mutating tree operation, released in
/// one sweep when the operation completes or unwinds. Pages scheduled for
/// deletion are dropped from the pool in the same sweep, after their latches
/// and pins are gone.
struct WriteContext {
    pages: Vec<(PageId, PageWriteGuard)>,
    deleted: Vec<PageId>,
}

impl WriteContext {
    fn new() -> Self {
        Self {
            pages: Vec::new(),
            deleted: Vec::new(),
        }
    }

    fn push(&mut self, page_id: PageId, guard: PageWriteGuard) {
        self.pages.push((page_id, guard));
    }

    fn len(&self) -> usize {
        self.pages.len()
    }

    fn top_page_id(&self) -> PageId {
        self.pages.last().expect("empty latch set").0
    }

    fn guard(&self, idx: usize) -> &PageWriteGuard {
        &self.pages[idx].1
    }

    fn guard_mut(&mut self, idx: usize) -> &mut PageWriteGuard {
        &mut self.pages[idx].1
    }

    /// Write guard for a page already in the latch set, if any.
    fn guard_for(&mut self, page_id: PageId) -> Option<&mut PageWriteGuard> {
        self.pages
            .iter_mut()
            .find(|(pid, _)| *pid == page_id)
            .map(|(_, guard)| guard)
    }

    fn mark_deleted(&mut self, page_id: PageId) {
        self.deleted.push(page_id);
    }

    /// Release the most recently latched page.
    fn pop_release(&mut self, buffer_pool: &BufferPoolManager, dirty: bool) -> Result<(), BTreeError> {
        if let Some((page_id, guard)) = self.pages.pop() {
            drop(guard);
            buffer_pool.unpin_page(page_id, dirty)?;
        }
        Ok(())
    }

    /// Release every held latch, unpin every frame, then drop pages
    /// scheduled for deletion.
    fn release_all(&mut self, buffer_pool: &BufferPoolManager, dirty: bool) -> Result<(), BTreeError> {
        for (page_id, guard) in self.pages.drain(..) {
            drop(guard);
            buffer_pool.unpin_page(page_id, dirty)?;
        }
        for page_id in self.deleted.drain(..) {
            if let Err(e) = buffer_pool.delete_page(page_id) {
                // A reader that raced us through a stale sibling pointer may
                // still hold a pin; the page is simply left to the replacer.
                debug!("deferred drop of page {} failed: {}", page_id, e);
            }
        }
        Ok(())
    }
}

/// Concurrent B+tree index mapping keys to record ids, one node per page.
///
/// Mutating operations descend with exclusive page latches and release every
/// ancestor as soon as the child is known safe (latch crabbing); lookups
/// descend with shared latches released hand-over-hand. A tree-wide mutex is
/// taken only to create the very first root.
pub struct BPlusTree<K> {
    buffer_pool: Arc<BufferPoolManager>,
    root_page_id: RwLock<PageId>,
    init_latch: Mutex<()>,
    leaf_max_size: u16,
    internal_max_size: u16,
    _phantom: PhantomData<K>,
}

impl<K: BTreeKey> BPlusTree<K> {
    pub fn new(buffer_pool: Arc<BufferPoolManager>, leaf_max_size: u16, internal_max_size: u16) -> Self {
        assert!(leaf_max_size >= 3 && internal_max_size >= 3, "node capacity too small");
        Self {
            buffer_pool,
            root_page_id: RwLock::new(INVALID_PAGE_ID),
            init_latch: Mutex::new(()),
            leaf_max_size,
            internal_max_size,
            _phantom: PhantomData,
        }
    }

    pub fn is_empty(&self) -> bool {
        *self.root_page_id.read() == INVALID_PAGE_ID
    }

    pub fn root_page_id(&self) -> PageId {
        *self.root_page_id.read()
    }

    /// Point lookup.
    pub fn get(&self, key: &K) -> Result<Option<Rid>, BTreeError> {
        let (mut current_id, mut current_guard) = match self.latch_root_read()? {
            Some(root) => root,
            None => return Ok(None),
        };

        loop {
            let node: BTreeNode<K> = deserialize_node(&current_guard)?;
            if node.is_leaf() {
                let result = node.leaf_lookup(key);
                drop(current_guard);
                self.buffer_pool.unpin_page(current_id, false)?;
                return Ok(result);
            }

            let child_id = node.child_for(key);
            let child_page = self.fetch(child_id)?;
            let child_guard = child_page.read_arc();

            // Readers never modify, so the parent latch can go immediately
            drop(current_guard);
            self.buffer_pool.unpin_page(current_id, false)?;

            current_id = child_id;
            current_guard = child_guard;
        }
    }

    /// Insert a key. Returns false without mutation if the key exists.
    pub fn insert(&self, key: K, rid: Rid) -> Result<bool, BTreeError> {
        loop {
            if self.is_empty() {
                self.start_new_tree()?;
            }
            let (root_id, root_guard) = match self.latch_root_write()? {
                Some(root) => root,
                // The tree emptied out under us; build a fresh root
                None => continue,
            };

            let mut ctx = WriteContext::new();
            ctx.push(root_id, root_guard);

            let result = self.insert_descend(key.clone(), rid, &mut ctx);
            if result.is_err() {
                let _ = ctx.release_all(&self.buffer_pool, false);
            }
            return result;
        }
    }

    /// Remove a key. Returns false if the key was not present.
    pub fn remove(&self, key: &K) -> Result<bool, BTreeError> {
        let (root_id, root_guard) = match self.latch_root_write()? {
            Some(root) => root,
            None => return Ok(false),
        };

        let mut ctx = WriteContext::new();
        ctx.push(root_id, root_guard);

        let result = self.remove_descend(key, &mut ctx);
        if result.is_err() {
            let _ = ctx.release_all(&self.buffer_pool, false);
        }
        result
    }

    /// Iterator over the whole tree in key order.
    pub fn iter(&self) -> Result<TreeIterator<K>, BTreeError> {
        let (mut current_id, mut current_guard) = match self.latch_root_read()? {
            Some(root) => root,
            None => return Ok(TreeIterator::empty(self.buffer_pool.clone())),
        };

        loop {
            let node: BTreeNode<K> = deserialize_node(&current_guard)?;
            if node.is_leaf() {
                return Ok(TreeIterator::new(
                    self.buffer_pool.clone(),
                    current_id,
                    current_guard,
                    node,
                    0,
                ));
            }
            let child_id = node.internal_children()[0];
            let child_page = self.fetch(child_id)?;
            let child_guard = child_page.read_arc();
            drop(current_guard);
            self.buffer_pool.unpin_page(current_id, false)?;
            current_id = child_id;
            current_guard = child_guard;
        }
    }

    /// Iterator positioned at the first entry with key >= `key`.
    pub fn iter_from(&self, key: &K) -> Result<TreeIterator<K>, BTreeError> {
        let (mut current_id, mut current_guard) = match self.latch_root_read()? {
            Some(root) => root,
            None => return Ok(TreeIterator::empty(self.buffer_pool.clone())),
        };

        loop {
            let node: BTreeNode<K> = deserialize_node(&current_guard)?;
            if node.is_leaf() {
                let index = node.leaf_entries().partition_point(|(k, _)| k < key);
                return Ok(TreeIterator::new(
                    self.buffer_pool.clone(),
                    current_id,
                    current_guard,
                    node,
                    index,
                ));
            }
            let child_id = node.child_for(key);
            let child_page = self.fetch(child_id)?;
            let child_guard = child_page.read_arc();
            drop(current_guard);
            self.buffer_pool.unpin_page(current_id, false)?;
            current_id = child_id;
            current_guard = child_guard;
        }
    }

    // ----- root handling -----

    fn start_new_tree(&self) -> Result<(), BTreeError> {
        let _init = self.init_latch.lock();
        if !self.is_empty() {
            return Ok(());
        }

        let (page, page_id) = self.new_page()?;
        let node: BTreeNode<K> = BTreeNode::new_leaf(page_id, INVALID_PAGE_ID, self.leaf_max_size);
        {
            let mut guard = page.write();
            serialize_node(&node, &mut guard)?;
        }
        *self.root_page_id.write() = page_id;
        self.buffer_pool.unpin_page(page_id, true)?;
        Ok(())
    }

    fn latch_root_read(&self) -> Result<Option<(PageId, PageReadGuard)>, BTreeError> {
        loop {
            let root_id = *self.root_page_id.read();
            if root_id == INVALID_PAGE_ID {
                return Ok(None);
            }
            let page = self.fetch(root_id)?;
            let guard = page.read_arc();
            if *self.root_page_id.read() == root_id {
                return Ok(Some((root_id, guard)));
            }
            // The root moved while we latched; back off and retry
            drop(guard);
            self.buffer_pool.unpin_page(root_id, false)?;
        }
    }

    fn latch_root_write(&self) -> Result<Option<(PageId, PageWriteGuard)>, BTreeError> {
        loop {
            let root_id = *self.root_page_id.read();
            if root_id == INVALID_PAGE_ID {
                return Ok(None);
            }
            let page = self.fetch(root_id)?;
            let guard = page.write_arc();
            if *self.root_page_id.read() == root_id {
                return Ok(Some((root_id, guard)));
            }
            drop(guard);
            self.buffer_pool.unpin_page(root_id, false)?;
        }
    }

    // ----- insertion -----

    fn insert_descend(&self, key: K, rid: Rid, ctx: &mut WriteContext) -> Result<bool, BTreeError> {
        // Crab down to the leaf, shedding ancestors above safe children
        loop {
            let node: BTreeNode<K> = deserialize_node(ctx.guard(ctx.len() - 1))?;
            if node.is_leaf() {
                break;
            }
            let child_id = node.child_for(&key);
            let child_page = self.fetch(child_id)?;
            let child_guard = child_page.write_arc();
            let child_node: BTreeNode<K> = deserialize_node(&child_guard)?;
            if child_node.insert_safe() {
                ctx.release_all(&self.buffer_pool, false)?;
            }
            ctx.push(child_id, child_guard);
        }

        let leaf_idx = ctx.len() - 1;
        let mut leaf: BTreeNode<K> = deserialize_node(ctx.guard(leaf_idx))?;

        if leaf.leaf_lookup(&key).is_some() {
            ctx.release_all(&self.buffer_pool, false)?;
            return Ok(false);
        }

        leaf.leaf_insert(key, rid);

        if leaf.size() < leaf.max_size() {
            serialize_node(&leaf, ctx.guard_mut(leaf_idx))?;
            ctx.release_all(&self.buffer_pool, true)?;
            return Ok(true);
        }

        // Leaf overflowed: hive off a right sibling and push the separator up
        let (upper, separator) = leaf.leaf_split();
        let (right_page, right_id) = self.new_page()?;
        let mut right: BTreeNode<K> =
            BTreeNode::new_leaf(right_id, leaf.header.parent_page_id, self.leaf_max_size);
        match &mut right.payload {
            NodePayload::Leaf { entries, next_page_id } => {
                *entries = upper;
                *next_page_id = leaf.next_page_id();
            }
            NodePayload::Internal { .. } => unreachable!(),
        }
        leaf.set_next_page_id(right_id);

        serialize_node(&leaf, ctx.guard_mut(leaf_idx))?;
        {
            let mut guard = right_page.write();
            serialize_node(&right, &mut guard)?;
        }
        self.buffer_pool.unpin_page(right_id, true)?;

        self.insert_into_parent(ctx, leaf_idx, separator, right_id)?;
        ctx.release_all(&self.buffer_pool, true)?;
        Ok(true)
    }

    fn insert_into_parent(
        &self,
        ctx: &mut WriteContext,
        child_idx: usize,
        separator: K,
        right_id: PageId,
    ) -> Result<(), BTreeError> {
        let child: BTreeNode<K> = deserialize_node(ctx.guard(child_idx))?;

        if child.is_root() {
            // Grow the tree by one level
            let (root_page, new_root_id) = self.new_page()?;
            let mut new_root: BTreeNode<K> =
                BTreeNode::new_internal(new_root_id, INVALID_PAGE_ID, self.internal_max_size);
            match &mut new_root.payload {
                NodePayload::Internal { keys, children } => {
                    keys.push(separator);
                    children.push(child.page_id());
                    children.push(right_id);
                }
                NodePayload::Leaf { .. } => unreachable!(),
            }
            {
                let mut guard = root_page.write();
                serialize_node(&new_root, &mut guard)?;
            }

            self.set_parent(ctx, child.page_id(), new_root_id)?;
            self.set_parent(ctx, right_id, new_root_id)?;

            *self.root_page_id.write() = new_root_id;
            self.buffer_pool.unpin_page(new_root_id, true)?;
            debug!("tree grew a new root page {}", new_root_id);
            return Ok(());
        }

        let parent_idx = child_idx - 1;
        let mut parent: BTreeNode<K> = deserialize_node(ctx.guard(parent_idx))?;
        parent.internal_insert(separator, right_id);
        self.set_parent(ctx, right_id, parent.page_id())?;

        if parent.size() < parent.max_size() {
            serialize_node(&parent, ctx.guard_mut(parent_idx))?;
            return Ok(());
        }

        // The parent overflowed in turn
        let (promoted, upper_keys, upper_children) = parent.internal_split();
        let (sibling_page, sibling_id) = self.new_page()?;
        let mut sibling: BTreeNode<K> =
            BTreeNode::new_internal(sibling_id, parent.header.parent_page_id, self.internal_max_size);
        let moved_children = upper_children.clone();
        match &mut sibling.payload {
            NodePayload::Internal { keys, children } => {
                *keys = upper_keys;
                *children = upper_children;
            }
            NodePayload::Leaf { .. } => unreachable!(),
        }

        serialize_node(&parent, ctx.guard_mut(parent_idx))?;
        {
            let mut guard = sibling_page.write();
            serialize_node(&sibling, &mut guard)?;
        }

        for moved in moved_children {
            self.set_parent(ctx, moved, sibling_id)?;
        }

        self.buffer_pool.unpin_page(sibling_id, true)?;
        self.insert_into_parent(ctx, parent_idx, promoted, sibling_id)
    }

    // ----- deletion -----

    fn remove_descend(&self, key: &K, ctx: &mut WriteContext) -> Result<bool, BTreeError> {
        loop {
            let node: BTreeNode<K> = deserialize_node(ctx.guard(ctx.len() - 1))?;
            if node.is_leaf() {
                break;
            }
            let child_id = node.child_for(key);
            let child_page = self.fetch(child_id)?;
            let child_guard = child_page.write_arc();
            let child_node: BTreeNode<K> = deserialize_node(&child_guard)?;
            if child_node.delete_safe() {
                ctx.release_all(&self.buffer_pool, false)?;
            }
            ctx.push(child_id, child_guard);
        }

        let leaf_idx = ctx.len() - 1;
        let mut leaf: BTreeNode<K> = deserialize_node(ctx.guard(leaf_idx))?;

        if !leaf.leaf_remove(key) {
            ctx.release_all(&self.buffer_pool, false)?;
            return Ok(false);
        }

        self.resolve_underflow(ctx, leaf)?;
        Ok(true)
    }

    /// Walk the retained ancestor chain upward, merging or redistributing
    /// until every node on the path satisfies its minimum again.
    fn resolve_underflow(&self, ctx: &mut WriteContext, mut node: BTreeNode<K>) -> Result<(), BTreeError> {
        loop {
            let idx = ctx.len() - 1;
            debug_assert_eq!(node.page_id(), ctx.top_page_id());

            if node.is_root() {
                if node.is_leaf() && node.size() == 0 {
                    // The last entry is gone; the tree is empty again
                    *self.root_page_id.write() = INVALID_PAGE_ID;
                    ctx.mark_deleted(node.page_id());
                    ctx.release_all(&self.buffer_pool, true)?;
                    debug!("tree emptied, root page dropped");
                    return Ok(());
                }
                if !node.is_leaf() && node.size() == 0 {
                    // An internal root with a single child hands the root
                    // role down one level
                    let child_id = node.internal_children()[0];
                    self.set_parent(ctx, child_id, INVALID_PAGE_ID)?;
                    *self.root_page_id.write() = child_id;
                    ctx.mark_deleted(node.page_id());
                    ctx.release_all(&self.buffer_pool, true)?;
                    debug!("root shrank to child page {}", child_id);
                    return Ok(());
                }
                serialize_node(&node, ctx.guard_mut(idx))?;
                ctx.release_all(&self.buffer_pool, true)?;
                return Ok(());
            }

            if node.size() >= node.min_size() {
                serialize_node(&node, ctx.guard_mut(idx))?;
                ctx.release_all(&self.buffer_pool, true)?;
                return Ok(());
            }

            // Underflow: the parent is still latched right below us
            let parent_idx = idx - 1;
            let mut parent: BTreeNode<K> = deserialize_node(ctx.guard(parent_idx))?;
            let child_pos = parent
                .child_index_of(node.page_id())
                .ok_or(BTreeError::InvalidPageFormat)?;

            let children = parent.internal_children();
            let left_id = if child_pos > 0 { Some(children[child_pos - 1]) } else { None };
            let right_id = if child_pos + 1 < children.len() {
                Some(children[child_pos + 1])
            } else {
                None
            };

            // Merge with the left sibling when the survivor stays below the
            // overflow threshold
            if let Some(lid) = left_id {
                let left_page = self.fetch(lid)?;
                let left_guard = left_page.write_arc();
                let mut left: BTreeNode<K> = deserialize_node(&left_guard)?;
                if self.can_merge(&left, &node) {
                    let separator = parent.internal_keys()[child_pos - 1].clone();
                    self.merge_into(&mut left, node, separator, ctx)?;
                    {
                        let mut guard = left_guard;
                        serialize_node(&left, &mut guard)?;
                    }
                    self.buffer_pool.unpin_page(lid, true)?;

                    parent.internal_remove_at(child_pos - 1);
                    serialize_node(&parent, ctx.guard_mut(parent_idx))?;

                    let merged_away = ctx.top_page_id();
                    ctx.mark_deleted(merged_away);
                    ctx.pop_release(&self.buffer_pool, true)?;

                    node = parent;
                    continue;
                }
                drop(left_guard);
                self.buffer_pool.unpin_page(lid, false)?;
            }

            // Merge the right sibling into this node
            if let Some(rid) = right_id {
                let right_page = self.fetch(rid)?;
                let right_guard = right_page.write_arc();
                let right: BTreeNode<K> = deserialize_node(&right_guard)?;
                if self.can_merge(&node, &right) {
                    let separator = parent.internal_keys()[child_pos].clone();
                    self.merge_into(&mut node, right, separator, ctx)?;
                    serialize_node(&node, ctx.guard_mut(idx))?;
                    drop(right_guard);
                    self.buffer_pool.unpin_page(rid, true)?;

                    parent.internal_remove_at(child_pos);
                    serialize_node(&parent, ctx.guard_mut(parent_idx))?;

                    ctx.mark_deleted(rid);
                    ctx.pop_release(&self.buffer_pool, true)?;

                    node = parent;
                    continue;
                }
                drop(right_guard);
                self.buffer_pool.unpin_page(rid, false)?;
            }

            // No merge possible: borrow one entry through the parent
            if let Some(lid) = left_id {
                let left_page = self.fetch(lid)?;
                let mut left_guard = left_page.write_arc();
                let mut left: BTreeNode<K> = deserialize_node(&left_guard)?;
                self.borrow_from_left(&mut node, &mut left, &mut parent, child_pos, ctx)?;
                serialize_node(&left, &mut left_guard)?;
                drop(left_guard);
                self.buffer_pool.unpin_page(lid, true)?;
            } else if let Some(rid) = right_id {
                let right_page = self.fetch(rid)?;
                let mut right_guard = right_page.write_arc();
                let mut right: BTreeNode<K> = deserialize_node(&right_guard)?;
                self.borrow_from_right(&mut node, &mut right, &mut parent, child_pos, ctx)?;
                serialize_node(&right, &mut right_guard)?;
                drop(right_guard);
                self.buffer_pool.unpin_page(rid, true)?;
            } else {
                return Err(BTreeError::InvalidPageFormat);
            }

            serialize_node(&node, ctx.guard_mut(idx))?;
            serialize_node(&parent, ctx.guard_mut(parent_idx))?;
            ctx.release_all(&self.buffer_pool, true)?;
            return Ok(());
        }
    }

    /// True when `left` and `right` can fold into a single node that still
    /// leaves the reserved overflow slot free.
    fn can_merge(&self, left: &BTreeNode<K>, right: &BTreeNode<K>) -> bool {
        if left.is_leaf() {
            left.size() + right.size() <= left.max_size() - 1
        } else {
            // Internal merges also pull the separator down
            left.size() + right.size() + 1 <= left.max_size() - 1
        }
    }

    /// Fold `right` into `left`. For internal nodes the separator key comes
    /// down from the parent and the moved children are re-parented.
    fn merge_into(
        &self,
        left: &mut BTreeNode<K>,
        right: BTreeNode<K>,
        separator: K,
        ctx: &mut WriteContext,
    ) -> Result<(), BTreeError> {
        let left_id = left.page_id();
        match (&mut left.payload, right.payload) {
            (
                NodePayload::Leaf { entries, next_page_id },
                NodePayload::Leaf { entries: right_entries, next_page_id: right_next },
            ) => {
                entries.extend(right_entries);
                *next_page_id = right_next;
            }
            (
                NodePayload::Internal { keys, children },
                NodePayload::Internal { keys: right_keys, children: right_children },
            ) => {
                keys.push(separator);
                keys.extend(right_keys);
                let moved = right_children.clone();
                children.extend(right_children);
                for child in moved {
                    self.set_parent(ctx, child, left_id)?;
                }
            }
            _ => return Err(BTreeError::InvalidPageFormat),
        }
        Ok(())
    }

    fn borrow_from_left(
        &self,
        node: &mut BTreeNode<K>,
        left: &mut BTreeNode<K>,
        parent: &mut BTreeNode<K>,
        child_pos: usize,
        ctx: &mut WriteContext,
    ) -> Result<(), BTreeError> {
        let sep_idx = child_pos - 1;
        if node.is_leaf() {
            let (key, rid) = match &mut left.payload {
                NodePayload::Leaf { entries, .. } => entries.pop().ok_or(BTreeError::InvalidPageFormat)?,
                NodePayload::Internal { .. } => return Err(BTreeError::InvalidPageFormat),
            };
            parent.set_internal_key(sep_idx, key.clone());
            match &mut node.payload {
                NodePayload::Leaf { entries, .. } => entries.insert(0, (key, rid)),
                NodePayload::Internal { .. } => return Err(BTreeError::InvalidPageFormat),
            }
        } else {
            let old_separator = parent.internal_keys()[sep_idx].clone();
            let (last_key, last_child) = match &mut left.payload {
                NodePayload::Internal { keys, children } => {
                    let k = keys.pop().ok_or(BTreeError::InvalidPageFormat)?;
                    let c = children.pop().ok_or(BTreeError::InvalidPageFormat)?;
                    (k, c)
                }
                NodePayload::Leaf { .. } => return Err(BTreeError::InvalidPageFormat),
            };
            parent.set_internal_key(sep_idx, last_key);
            match &mut node.payload {
                NodePayload::Internal { keys, children } => {
                    keys.insert(0, old_separator);
                    children.insert(0, last_child);
                }
                NodePayload::Leaf { .. } => return Err(BTreeError::InvalidPageFormat),
            }
            self.set_parent(ctx, last_child, node.page_id())?;
        }
        Ok(())
    }

    fn borrow_from_right(
        &self,
        node: &mut BTreeNode<K>,
        right: &mut BTreeNode<K>,
        parent: &mut BTreeNode<K>,
        child_pos: usize,
        ctx: &mut WriteContext,
    ) -> Result<(), BTreeError> {
        let sep_idx = child_pos;
        if node.is_leaf() {
            let (key, rid) = match &mut right.payload {
                NodePayload::Leaf { entries, .. } => {
                    if entries.is_empty() {
                        return Err(BTreeError::InvalidPageFormat);
                    }
                    entries.remove(0)
                }
                NodePayload::Internal { .. } => return Err(BTreeError::InvalidPageFormat),
            };
            match &mut node.payload {
                NodePayload::Leaf { entries, .. } => entries.push((key, rid)),
                NodePayload::Internal { .. } => return Err(BTreeError::InvalidPageFormat),
            }
            // Separator tracks the right sibling's new smallest key
            let new_first = match &right.payload {
                NodePayload::Leaf { entries, .. } => {
                    entries.first().map(|(k, _)| k.clone()).ok_or(BTreeError::InvalidPageFormat)?
                }
                NodePayload::Internal { .. } => return Err(BTreeError::InvalidPageFormat),
            };
            parent.set_internal_key(sep_idx, new_first);
        } else {
            let old_separator = parent.internal_keys()[sep_idx].clone();
            let (first_key, first_child) = match &mut right.payload {
                NodePayload::Internal { keys, children } => {
                    if keys.is_empty() || children.is_empty() {
                        return Err(BTreeError::InvalidPageFormat);
                    }
                    (keys.remove(0), children.remove(0))
                }
                NodePayload::Leaf { .. } => return Err(BTreeError::InvalidPageFormat),
            };
            parent.set_internal_key(sep_idx, first_key);
            match &mut node.payload {
                NodePayload::Internal { keys, children } => {
                    keys.push(old_separator);
                    children.push(first_child);
                }
                NodePayload::Leaf { .. } => return Err(BTreeError::InvalidPageFormat),
            }
            self.set_parent(ctx, first_child, node.page_id())?;
        }
        Ok(())
    }

    // ----- helpers -----

    /// Rewrite a node's parent pointer, going through the latch set when we
    /// already hold the page and through the buffer pool otherwise.
    fn set_parent(&self, ctx: &mut WriteContext, page_id: PageId, parent_id: PageId) -> Result<(), BTreeError> {
        if let Some(guard) = ctx.guard_for(page_id) {
            let mut node: BTreeNode<K> = deserialize_node(guard)?;
            node.header.parent_page_id = parent_id;
            serialize_node(&node, guard)?;
            return Ok(());
        }

        let page = self.fetch(page_id)?;
        {
            let mut guard = page.write();
            let mut node: BTreeNode<K> = deserialize_node(&guard)?;
            node.header.parent_page_id = parent_id;
            serialize_node(&node, &mut guard)?;
        }
        self.buffer_pool.unpin_page(page_id, true)?;
        Ok(())
    }

    fn fetch(&self, page_id: PageId) -> Result<PagePtr, BTreeError> {
        self.buffer_pool
            .fetch_page(page_id)?
            .ok_or(BTreeError::PoolExhausted)
    }

    fn new_page(&self) -> Result<(PagePtr, PageId), BTreeError> {
        self.buffer_pool
            .new_page()?
            .ok_or(BTreeError::PoolExhausted)
    }
}
