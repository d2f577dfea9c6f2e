use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;
use parking_lot::{Mutex, RwLock};
use log::debug;

use crate::common::types::{Page, PageId, PagePtr, FrameId, INVALID_PAGE_ID};
use crate::storage::disk::DiskManager;
use crate::storage::buffer::error::BufferPoolError;
use crate::storage::buffer::page_table::ExtendibleHashTable;
use crate::storage::buffer::replacer::LruKReplacer;

/// Number of entries per page-table bucket before it splits.
const PAGE_TABLE_BUCKET_SIZE: usize = 4;

#[derive(Debug, Clone, Copy)]
pub struct BufferPoolConfig {
    pub pool_size: usize,
    pub replacer_k: usize,
}

impl Default for BufferPoolConfig {
    fn default() -> Self {
        Self {
            pool_size: 64,
            replacer_k: 2,
        }
    }
}

/// Bookkeeping for one frame, guarded by the pool latch.
struct FrameMeta {
    page_id: PageId,
    pin_count: u32,
    is_dirty: bool,
}

impl FrameMeta {
    fn empty() -> Self {
        Self {
            page_id: INVALID_PAGE_ID,
            pin_count: 0,
            is_dirty: false,
        }
    }
}

struct PoolInner {
    frame_meta: Vec<FrameMeta>,
    free_list: VecDeque<FrameId>,
    next_page_id: PageId,
}

/// Buffer pool manager: owns a fixed array of frames, a free list, the page
/// table and the replacer, and translates page-level requests into
/// frame-level reads and writes against the disk manager.
///
/// A single pool latch serialises the free list, page table and replacer;
/// page content latches live on the pages themselves and are taken by
/// clients after a successful pin.
pub struct BufferPoolManager {
    pool_size: usize,
    frames: Vec<PagePtr>,
    page_table: ExtendibleHashTable<PageId, FrameId>,
    replacer: LruKReplacer,
    disk_manager: Arc<DiskManager>,
    inner: Mutex<PoolInner>,
}

impl BufferPoolManager {
    pub fn new(config: BufferPoolConfig, db_path: impl AsRef<Path>) -> Result<Self, BufferPoolError> {
        let disk_manager = Arc::new(DiskManager::new(db_path)?);
        Self::with_disk_manager(config, disk_manager)
    }

    pub fn with_disk_manager(
        config: BufferPoolConfig,
        disk_manager: Arc<DiskManager>,
    ) -> Result<Self, BufferPoolError> {
        let pool_size = config.pool_size;
        let mut frames = Vec::with_capacity(pool_size);
        let mut frame_meta = Vec::with_capacity(pool_size);
        let mut free_list = VecDeque::with_capacity(pool_size);

        for i in 0..pool_size {
            frames.push(Arc::new(RwLock::new(Page::new(INVALID_PAGE_ID))));
            frame_meta.push(FrameMeta::empty());
            free_list.push_back(i as FrameId);
        }

        Ok(Self {
            pool_size,
            frames,
            page_table: ExtendibleHashTable::new(PAGE_TABLE_BUCKET_SIZE),
            replacer: LruKReplacer::new(pool_size, config.replacer_k),
            disk_manager,
            inner: Mutex::new(PoolInner {
                frame_meta,
                free_list,
                next_page_id: 1, // Page ids start at 1; 0 is the invalid id
            }),
        })
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Allocate a fresh page id, place it in a frame and pin it.
    ///
    /// Returns `Ok(None)` when every frame is pinned; callers should treat
    /// that as backpressure, not as an error.
    pub fn new_page(&self) -> Result<Option<(PagePtr, PageId)>, BufferPoolError> {
        let mut inner = self.inner.lock();

        let frame_id = match self.acquire_frame(&mut inner)? {
            Some(frame_id) => frame_id,
            None => return Ok(None),
        };

        let page_id = inner.next_page_id;
        inner.next_page_id += 1;

        {
            let meta = &mut inner.frame_meta[frame_id as usize];
            meta.page_id = page_id;
            meta.pin_count = 1;
            meta.is_dirty = true; // A brand-new page exists only in memory
        }
        {
            let mut page_guard = self.frames[frame_id as usize].write();
            page_guard.reset(page_id);
        }

        self.page_table.insert(page_id, frame_id);
        self.replacer.record_access(frame_id)?;
        self.replacer.set_evictable(frame_id, false)?;

        Ok(Some((self.frames[frame_id as usize].clone(), page_id)))
    }

    /// Fetch a page, reading it from disk if it is not resident.
    ///
    /// Returns `Ok(None)` when no frame can be obtained.
    pub fn fetch_page(&self, page_id: PageId) -> Result<Option<PagePtr>, BufferPoolError> {
        if page_id == INVALID_PAGE_ID {
            return Err(BufferPoolError::InvalidOperation(
                "Cannot fetch invalid page ID".to_string(),
            ));
        }

        let mut inner = self.inner.lock();

        // Already resident: pin and record the access
        if let Some(frame_id) = self.page_table.find(&page_id) {
            inner.frame_meta[frame_id as usize].pin_count += 1;
            self.replacer.record_access(frame_id)?;
            self.replacer.set_evictable(frame_id, false)?;
            return Ok(Some(self.frames[frame_id as usize].clone()));
        }

        let frame_id = match self.acquire_frame(&mut inner)? {
            Some(frame_id) => frame_id,
            None => return Ok(None),
        };

        {
            let mut page_guard = self.frames[frame_id as usize].write();
            self.disk_manager.read_page(page_id, &mut page_guard)?;
        }
        {
            let meta = &mut inner.frame_meta[frame_id as usize];
            meta.page_id = page_id;
            meta.pin_count = 1;
            meta.is_dirty = false;
        }

        self.page_table.insert(page_id, frame_id);
        self.replacer.record_access(frame_id)?;
        self.replacer.set_evictable(frame_id, false)?;

        Ok(Some(self.frames[frame_id as usize].clone()))
    }

    /// Unpin a page, accumulating the dirty flag. The frame becomes
    /// evictable once its pin count reaches zero.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> Result<(), BufferPoolError> {
        let mut inner = self.inner.lock();

        let frame_id = match self.page_table.find(&page_id) {
            Some(frame_id) => frame_id,
            None => return Err(BufferPoolError::PageNotFound(page_id)),
        };

        let pin_count = {
            let meta = &mut inner.frame_meta[frame_id as usize];
            if meta.pin_count > 0 {
                meta.pin_count -= 1;
            }
            if is_dirty {
                meta.is_dirty = true;
            }
            meta.pin_count
        };

        if pin_count == 0 {
            self.replacer.set_evictable(frame_id, true)?;
        }

        Ok(())
    }

    /// Write a page's data to disk and clear its dirty flag.
    ///
    /// The dirty flag is cleared before the write, under the pool latch;
    /// the I/O itself happens outside it so that a client holding the page
    /// latch cannot deadlock against the pool. A writer that dirties the
    /// page mid-flush re-marks it on unpin.
    pub fn flush_page(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        let page = {
            let mut inner = self.inner.lock();
            let frame_id = match self.page_table.find(&page_id) {
                Some(frame_id) => frame_id,
                None => return Err(BufferPoolError::PageNotFound(page_id)),
            };
            if !inner.frame_meta[frame_id as usize].is_dirty {
                return Ok(());
            }
            inner.frame_meta[frame_id as usize].is_dirty = false;
            self.frames[frame_id as usize].clone()
        };

        let page_guard = page.read();
        self.disk_manager.write_page(&page_guard)?;
        Ok(())
    }

    /// Flush every dirty page currently in the pool.
    pub fn flush_all_pages(&self) -> Result<(), BufferPoolError> {
        let resident: Vec<PageId> = {
            let inner = self.inner.lock();
            inner
                .frame_meta
                .iter()
                .filter(|meta| meta.page_id != INVALID_PAGE_ID)
                .map(|meta| meta.page_id)
                .collect()
        };

        for page_id in resident {
            match self.flush_page(page_id) {
                Ok(()) => {}
                // Evicted in the meantime: the eviction already wrote it
                Err(BufferPoolError::PageNotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }

        Ok(())
    }

    /// Drop a page from the pool and free its frame.
    ///
    /// Deleting a page that is not resident is a no-op; deleting a pinned
    /// page fails.
    pub fn delete_page(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        let mut inner = self.inner.lock();

        let frame_id = match self.page_table.find(&page_id) {
            Some(frame_id) => frame_id,
            None => return Ok(()),
        };

        if inner.frame_meta[frame_id as usize].pin_count > 0 {
            return Err(BufferPoolError::PagePinned(page_id));
        }

        self.page_table.remove(&page_id);
        self.replacer.remove(frame_id)?;

        inner.frame_meta[frame_id as usize] = FrameMeta::empty();
        {
            let mut page_guard = self.frames[frame_id as usize].write();
            page_guard.reset(INVALID_PAGE_ID);
        }
        inner.free_list.push_back(frame_id);

        Ok(())
    }

    /// Current pin count of a resident page, for tests and diagnostics.
    pub fn pin_count(&self, page_id: PageId) -> Option<u32> {
        let inner = self.inner.lock();
        self.page_table
            .find(&page_id)
            .map(|frame_id| inner.frame_meta[frame_id as usize].pin_count)
    }

    /// Obtain a frame, from the free list or by evicting a victim.
    /// Dirty victims are written back before the frame is repurposed.
    fn acquire_frame(&self, inner: &mut PoolInner) -> Result<Option<FrameId>, BufferPoolError> {
        if let Some(frame_id) = inner.free_list.pop_front() {
            return Ok(Some(frame_id));
        }

        let victim_id = match self.replacer.evict() {
            Some(victim_id) => victim_id,
            None => return Ok(None),
        };

        let (old_page_id, was_dirty) = {
            let meta = &inner.frame_meta[victim_id as usize];
            (meta.page_id, meta.is_dirty)
        };

        if was_dirty {
            debug!("evicting dirty page {} from frame {}", old_page_id, victim_id);
            let page_guard = self.frames[victim_id as usize].read();
            self.disk_manager.write_page(&page_guard)?;
            inner.frame_meta[victim_id as usize].is_dirty = false;
        }

        if old_page_id != INVALID_PAGE_ID {
            self.page_table.remove(&old_page_id);
        }

        Ok(Some(victim_id))
    }

}
