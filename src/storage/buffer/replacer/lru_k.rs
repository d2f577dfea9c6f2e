use std::collections::{HashMap, VecDeque};
use parking_lot::Mutex;
use thiserror::Error;

use crate::common::types::FrameId;

#[derive(Error, Debug)]
pub enum ReplacerError {
    #[error("Frame {0} is out of range for this replacer")]
    FrameOutOfRange(FrameId),
    #[error("Frame {0} is not evictable")]
    FrameNotEvictable(FrameId),
}

/// Per-frame access bookkeeping.
///
/// `history` keeps at most the K most recent access timestamps, oldest at
/// the front. While a frame has fewer than K accesses it lives on the
/// history list; once the K-th access arrives it migrates to the cache list
/// and `history.front()` becomes its backward K-distance.
struct LruKNode {
    history: VecDeque<u64>,
    first_access: u64,
    is_evictable: bool,
}

struct LruKInner {
    nodes: HashMap<FrameId, LruKNode>,
    /// Frames with fewer than K recorded accesses, ordered by first access
    /// (oldest at the front). Never reordered by later accesses.
    history_list: VecDeque<FrameId>,
    /// Frames with at least K recorded accesses.
    cache_list: Vec<FrameId>,
    current_timestamp: u64,
    curr_size: usize,
}

/// LRU-K page replacement policy.
///
/// Eviction prefers frames that have not yet reached K accesses (plain LRU
/// over their first access); among frames with K or more accesses it evicts
/// the one whose K-th most recent access is oldest. Ties fall back to the
/// earliest overall first access.
pub struct LruKReplacer {
    k: usize,
    replacer_size: usize,
    inner: Mutex<LruKInner>,
}

impl LruKReplacer {
    pub fn new(num_frames: usize, k: usize) -> Self {
        assert!(k >= 1, "LRU-K requires k >= 1");
        Self {
            k,
            replacer_size: num_frames,
            inner: Mutex::new(LruKInner {
                nodes: HashMap::new(),
                history_list: VecDeque::new(),
                cache_list: Vec::new(),
                current_timestamp: 0,
                curr_size: 0,
            }),
        }
    }

    /// Record one access to the given frame.
    ///
    /// A frame seen for the first time starts out non-evictable; the buffer
    /// pool flips evictability explicitly when the pin count allows it.
    pub fn record_access(&self, frame_id: FrameId) -> Result<(), ReplacerError> {
        if frame_id as usize > self.replacer_size {
            return Err(ReplacerError::FrameOutOfRange(frame_id));
        }

        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        inner.current_timestamp += 1;
        let timestamp = inner.current_timestamp;
        let k = self.k;

        let node = inner.nodes.entry(frame_id).or_insert_with(|| LruKNode {
            history: VecDeque::new(),
            first_access: timestamp,
            is_evictable: false,
        });

        let was_new = node.history.is_empty();
        node.history.push_back(timestamp);
        let reached_k = node.history.len() == k;
        if node.history.len() > k {
            node.history.pop_front();
        }

        if was_new && !reached_k {
            inner.history_list.push_back(frame_id);
        } else if reached_k {
            // K-th access: migrate from the history list to the cache list
            if let Some(pos) = inner.history_list.iter().position(|&id| id == frame_id) {
                let _ = inner.history_list.remove(pos);
            }
            inner.cache_list.push(frame_id);
        }

        Ok(())
    }

    /// Toggle whether the frame may be chosen as an eviction victim.
    pub fn set_evictable(&self, frame_id: FrameId, evictable: bool) -> Result<(), ReplacerError> {
        if frame_id as usize > self.replacer_size {
            return Err(ReplacerError::FrameOutOfRange(frame_id));
        }

        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let node = match inner.nodes.get_mut(&frame_id) {
            Some(node) => node,
            None => return Ok(()), // Unknown frame: nothing to toggle
        };

        if !node.is_evictable && evictable {
            node.is_evictable = true;
            inner.curr_size += 1;
        } else if node.is_evictable && !evictable {
            node.is_evictable = false;
            inner.curr_size -= 1;
        }

        Ok(())
    }

    /// Pick a victim frame and forget its access history.
    ///
    /// Returns `None` when no frame is currently evictable.
    pub fn evict(&self) -> Option<FrameId> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        // History list first: strict LRU over the first access
        let history_victim = inner
            .history_list
            .iter()
            .copied()
            .find(|id| inner.nodes[id].is_evictable);
        if let Some(frame_id) = history_victim {
            if let Some(pos) = inner.history_list.iter().position(|&id| id == frame_id) {
                let _ = inner.history_list.remove(pos);
            }
            inner.nodes.remove(&frame_id);
            inner.curr_size -= 1;
            return Some(frame_id);
        }

        // Cache list: oldest backward K-distance wins
        let cache_victim = inner
            .cache_list
            .iter()
            .copied()
            .filter(|id| inner.nodes[id].is_evictable)
            .min_by_key(|id| {
                let node = &inner.nodes[id];
                (*node.history.front().unwrap_or(&u64::MAX), node.first_access)
            });
        if let Some(frame_id) = cache_victim {
            if let Some(pos) = inner.cache_list.iter().position(|&id| id == frame_id) {
                inner.cache_list.remove(pos);
            }
            inner.nodes.remove(&frame_id);
            inner.curr_size -= 1;
            return Some(frame_id);
        }

        None
    }

    /// Drop a frame from the replacer regardless of its K-distance.
    ///
    /// Removing an untracked frame is a no-op; removing a non-evictable
    /// frame is an error.
    pub fn remove(&self, frame_id: FrameId) -> Result<(), ReplacerError> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        let node = match inner.nodes.get(&frame_id) {
            Some(node) => node,
            None => return Ok(()),
        };
        if !node.is_evictable {
            return Err(ReplacerError::FrameNotEvictable(frame_id));
        }

        if let Some(pos) = inner.history_list.iter().position(|&id| id == frame_id) {
            let _ = inner.history_list.remove(pos);
        }
        if let Some(pos) = inner.cache_list.iter().position(|&id| id == frame_id) {
            inner.cache_list.remove(pos);
        }
        inner.nodes.remove(&frame_id);
        inner.curr_size -= 1;

        Ok(())
    }

    /// Number of evictable frames.
    pub fn size(&self) -> usize {
        self.inner.lock().curr_size
    }
}
