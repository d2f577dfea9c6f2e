use std::sync::Arc;
use parking_lot::Mutex;

use crate::common::types::{PageId, Rid, INVALID_PAGE_ID};
use crate::storage::buffer::BufferPoolManager;
use crate::storage::page::{HeapPageManager, PageError};
use crate::execution::tuple::Tuple;
use crate::execution::error::{ExecutionError, ExecutionResult};

/// Heap file for one table: a forward-linked chain of slotted pages.
///
/// A tuple's rid is its (page id, slot) pair and stays stable for the
/// tuple's lifetime; deletions leave a dead slot behind.
pub struct TableHeap {
    buffer_pool: Arc<BufferPoolManager>,
    page_manager: HeapPageManager,
    first_page_id: PageId,
    /// Serialises inserts so the page chain is extended by one writer at a
    /// time.
    insert_latch: Mutex<()>,
}

impl TableHeap {
    /// Create a heap with its first (empty) page.
    pub fn new(buffer_pool: Arc<BufferPoolManager>) -> ExecutionResult<Self> {
        let page_manager = HeapPageManager::new();
        let (page, page_id) = buffer_pool
            .new_page()?
            .ok_or(ExecutionError::PoolExhausted)?;
        {
            let mut guard = page.write();
            page_manager.init_page(&mut guard);
        }
        buffer_pool.unpin_page(page_id, true)?;

        Ok(Self {
            buffer_pool,
            page_manager,
            first_page_id: page_id,
            insert_latch: Mutex::new(()),
        })
    }

    pub fn first_page_id(&self) -> PageId {
        self.first_page_id
    }

    /// Insert a tuple, appending a new page to the chain when the tail is
    /// full. Returns the new tuple's rid.
    pub fn insert_tuple(&self, tuple: &Tuple) -> ExecutionResult<Rid> {
        let bytes = tuple.to_bytes()?;
        let _insert = self.insert_latch.lock();

        let mut page_id = self.first_page_id;
        loop {
            let page = self
                .buffer_pool
                .fetch_page(page_id)?
                .ok_or(ExecutionError::PoolExhausted)?;

            let outcome = {
                let mut guard = page.write();
                self.page_manager.insert_record(&mut guard, &bytes)
            };

            match outcome {
                Ok(slot) => {
                    self.buffer_pool.unpin_page(page_id, true)?;
                    return Ok(Rid::new(page_id, slot));
                }
                Err(PageError::InsufficientSpace) => {
                    let next = {
                        let guard = page.read();
                        self.page_manager.next_page_id(&guard)
                    };
                    match next {
                        Some(next_page_id) => {
                            self.buffer_pool.unpin_page(page_id, false)?;
                            page_id = next_page_id;
                        }
                        None => {
                            // Tail is full: grow the chain by one page
                            let (new_page, new_page_id) = self
                                .buffer_pool
                                .new_page()?
                                .ok_or(ExecutionError::PoolExhausted)?;
                            {
                                let mut guard = new_page.write();
                                self.page_manager.init_page(&mut guard);
                                self.page_manager.set_prev_page_id(&mut guard, Some(page_id));
                            }
                            {
                                let mut guard = page.write();
                                self.page_manager.set_next_page_id(&mut guard, Some(new_page_id));
                            }
                            self.buffer_pool.unpin_page(page_id, true)?;
                            self.buffer_pool.unpin_page(new_page_id, true)?;
                            page_id = new_page_id;
                        }
                    }
                }
                Err(e) => {
                    self.buffer_pool.unpin_page(page_id, false)?;
                    return Err(e.into());
                }
            }
        }
    }

    /// Read a tuple. Deleted or never-written slots come back as `None`.
    pub fn get_tuple(&self, rid: Rid) -> ExecutionResult<Option<Tuple>> {
        let page = self
            .buffer_pool
            .fetch_page(rid.page_id)?
            .ok_or(ExecutionError::PoolExhausted)?;

        let record = {
            let guard = page.read();
            self.page_manager.get_record(&guard, rid.slot)
        };
        self.buffer_pool.unpin_page(rid.page_id, false)?;

        match record {
            Ok(bytes) => Ok(Some(Tuple::from_bytes(&bytes)?)),
            Err(PageError::RecordNotFound) | Err(PageError::InvalidSlot) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Mark a tuple deleted. Returns false when the slot is already dead.
    pub fn mark_delete(&self, rid: Rid) -> ExecutionResult<bool> {
        let page = self
            .buffer_pool
            .fetch_page(rid.page_id)?
            .ok_or(ExecutionError::PoolExhausted)?;

        let outcome = {
            let mut guard = page.write();
            self.page_manager.delete_record(&mut guard, rid.slot)
        };

        match outcome {
            Ok(()) => {
                self.buffer_pool.unpin_page(rid.page_id, true)?;
                Ok(true)
            }
            Err(PageError::RecordNotFound) | Err(PageError::InvalidSlot) => {
                self.buffer_pool.unpin_page(rid.page_id, false)?;
                Ok(false)
            }
            Err(e) => {
                self.buffer_pool.unpin_page(rid.page_id, false)?;
                Err(e.into())
            }
        }
    }

    /// Forward iterator over live tuples in chain order.
    pub fn iter(self: &Arc<Self>) -> TableIterator {
        TableIterator {
            heap: self.clone(),
            current_page_id: self.first_page_id,
            next_slot: 0,
            exhausted: false,
        }
    }
}

/// Iterator over (tuple, rid) pairs of a table heap. Pages are latched only
/// while a slot is being read.
pub struct TableIterator {
    heap: Arc<TableHeap>,
    current_page_id: PageId,
    next_slot: u32,
    exhausted: bool,
}

impl TableIterator {
    pub fn next_tuple(&mut self) -> ExecutionResult<Option<(Tuple, Rid)>> {
        if self.exhausted {
            return Ok(None);
        }

        loop {
            let page = self
                .heap
                .buffer_pool
                .fetch_page(self.current_page_id)?
                .ok_or(ExecutionError::PoolExhausted)?;

            let (record_count, next_page_id, record) = {
                let guard = page.read();
                let count = self.heap.page_manager.record_count(&guard);
                let next = self.heap.page_manager.next_page_id(&guard);
                let record = if self.next_slot < count {
                    Some(self.heap.page_manager.get_record(&guard, self.next_slot))
                } else {
                    None
                };
                (count, next, record)
            };
            self.heap.buffer_pool.unpin_page(self.current_page_id, false)?;

            match record {
                Some(Ok(bytes)) => {
                    let rid = Rid::new(self.current_page_id, self.next_slot);
                    self.next_slot += 1;
                    return Ok(Some((Tuple::from_bytes(&bytes)?, rid)));
                }
                Some(Err(PageError::RecordNotFound)) => {
                    // Dead slot; keep scanning
                    self.next_slot += 1;
                    continue;
                }
                Some(Err(e)) => return Err(e.into()),
                None => {
                    debug_assert!(self.next_slot >= record_count);
                    match next_page_id {
                        Some(next) if next != INVALID_PAGE_ID => {
                            self.current_page_id = next;
                            self.next_slot = 0;
                        }
                        _ => {
                            self.exhausted = true;
                            return Ok(None);
                        }
                    }
                }
            }
        }
    }
}
