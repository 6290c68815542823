//! Absent-region cache
//!
//! Negative cache of regions verified to have no container file. A hit only
//! lets callers skip filesystem work; a miss says nothing about existence.
//! Entries go stale if files appear out-of-band, so readers must tolerate a
//! region being reported absent when it is not.

use std::num::NonZeroUsize;

use lru::LruCache;

use crate::position::RegionId;

/// Bounded LRU set of regions known to be missing on disk
pub struct AbsentRegions {
    entries: LruCache<RegionId, ()>,
}

impl AbsentRegions {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            entries: LruCache::new(capacity),
        }
    }

    /// `false` if the region is recorded as missing (and refreshes it)
    pub fn probably_exists(&mut self, region: RegionId) -> bool {
        self.entries.get(&region).is_none()
    }

    /// Forget a region; called whenever a write establishes its file
    pub fn mark_created(&mut self, region: RegionId) {
        self.entries.pop(&region);
    }

    /// Record a region as missing, evicting the least recently used entry
    /// when full
    pub fn mark_missing(&mut self, region: RegionId) {
        self.entries.put(region, ());
    }

    /// Membership test without touching recency
    pub fn contains(&self, region: RegionId) -> bool {
        self.entries.contains(&region)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.entries.cap().get()
    }
}
