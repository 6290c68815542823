//! Region handle cache
//!
//! Bounded LRU map of open region containers. Each container sits behind its
//! own mutex so operations on one region never wait on another region's I/O.

use std::num::NonZeroUsize;
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use lru::LruCache;
use parking_lot::lock_api::ArcMutexGuard;
use parking_lot::{Mutex, RawMutex};
use tracing::{debug, warn};

use crate::container::RegionContainer;
use crate::error::Result;
use crate::position::RegionId;

/// An open container plus the state the cache tracks for it
pub struct OpenRegion {
    region: RegionId,
    path: PathBuf,
    container: Box<dyn RegionContainer>,
    closed: bool,
}

impl OpenRegion {
    pub fn new(region: RegionId, container: Box<dyn RegionContainer>) -> Self {
        Self {
            region,
            path: container.path().to_path_buf(),
            container,
            closed: false,
        }
    }

    pub fn shared(region: RegionId, container: Box<dyn RegionContainer>) -> SharedRegion {
        SharedRegion::new(Self::new(region, container))
    }

    pub fn region(&self) -> RegionId {
        self.region
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Set once the container has been closed by eviction or shutdown
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn container(&mut self) -> &mut dyn RegionContainer {
        self.container.as_mut()
    }

    /// Close the container; later calls are no-ops
    ///
    /// A container whose close failed keeps its unsaved state and tries once
    /// more when it is dropped.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.container.close()
    }
}

/// Cache entry: a region container behind its per-region lock
///
/// The retired flag lives outside the lock. Eviction sets it without waiting
/// for the region, and whoever holds the region when the flag goes up closes
/// the container as its guard drops.
#[derive(Clone)]
pub struct SharedRegion {
    open: Arc<Mutex<OpenRegion>>,
    retired: Arc<AtomicBool>,
}

impl SharedRegion {
    pub fn new(open: OpenRegion) -> Self {
        Self {
            open: Arc::new(Mutex::new(open)),
            retired: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Lock the region, blocking while another caller holds it
    pub fn lock(&self) -> RegionGuard {
        RegionGuard::lock(self)
    }

    /// Lock without blocking; `None` while anyone holds the region, the caller included
    pub fn try_lock(&self) -> Option<RegionGuard> {
        RegionGuard::try_lock(self)
    }

    /// Mark the handle as evicted; it must not serve new operations
    pub fn retire(&self) {
        self.retired.store(true, Ordering::Release);
    }

    pub fn is_retired(&self) -> bool {
        self.retired.load(Ordering::Acquire)
    }

    /// Closed and not held by anyone, checked without blocking
    pub fn is_settled(&self) -> bool {
        matches!(self.open.try_lock(), Some(open) if open.is_closed())
    }

    /// Whether both handles refer to the same open container
    pub fn same(&self, other: &SharedRegion) -> bool {
        Arc::ptr_eq(&self.open, &other.open)
    }
}

/// Exclusive access to one region for as long as the guard lives
///
/// Dropping the guard releases the region lock on every exit path. If the
/// region was retired in the meantime the container is closed first.
pub struct RegionGuard {
    inner: ArcMutexGuard<RawMutex, OpenRegion>,
    retired: Arc<AtomicBool>,
}

impl RegionGuard {
    /// Lock `shared`, blocking while another caller holds the region
    pub fn lock(shared: &SharedRegion) -> Self {
        Self {
            inner: shared.open.lock_arc(),
            retired: Arc::clone(&shared.retired),
        }
    }

    /// Lock `shared` without blocking
    pub fn try_lock(shared: &SharedRegion) -> Option<Self> {
        let inner = shared.open.try_lock_arc()?;
        Some(Self {
            inner,
            retired: Arc::clone(&shared.retired),
        })
    }

    /// Whether the handle was evicted while this guard was held or awaited
    pub fn is_retired(&self) -> bool {
        self.retired.load(Ordering::Acquire)
    }
}

impl Deref for RegionGuard {
    type Target = OpenRegion;

    fn deref(&self) -> &OpenRegion {
        &self.inner
    }
}

impl DerefMut for RegionGuard {
    fn deref_mut(&mut self) -> &mut OpenRegion {
        &mut self.inner
    }
}

impl Drop for RegionGuard {
    fn drop(&mut self) {
        if !self.is_retired() || self.inner.is_closed() {
            return;
        }
        match self.inner.close() {
            Ok(()) => debug!(region = %self.inner.region(), "closed retired region file on release"),
            Err(e) => warn!(
                region = %self.inner.region(),
                path = %self.inner.path().display(),
                error = %e,
                "failed to close retired region file"
            ),
        }
    }
}

/// Bounded LRU of open regions, most recently used first
pub struct HandleCache {
    entries: LruCache<RegionId, SharedRegion>,
}

impl HandleCache {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            entries: LruCache::new(capacity),
        }
    }

    /// Cached handle for `region`, promoted to most recently used
    pub fn get(&mut self, region: RegionId) -> Option<SharedRegion> {
        self.entries.get(&region).cloned()
    }

    /// Membership test without touching recency
    pub fn contains(&self, region: RegionId) -> bool {
        self.entries.contains(&region)
    }

    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.entries.cap().get()
    }

    /// Insert as most recently used
    ///
    /// Returns whatever had to leave the cache: the previous handle for the
    /// same region, or the least recently used one when full. The caller owns
    /// retiring it.
    pub fn insert(&mut self, region: RegionId, handle: SharedRegion) -> Option<(RegionId, SharedRegion)> {
        self.entries.push(region, handle)
    }

    /// Remove and return the least recently used handle
    pub fn pop_lru(&mut self) -> Option<(RegionId, SharedRegion)> {
        self.entries.pop_lru()
    }

    /// Remove every handle, least recently used first
    pub fn drain(&mut self) -> Vec<(RegionId, SharedRegion)> {
        let mut drained = Vec::with_capacity(self.entries.len());
        while let Some(entry) = self.entries.pop_lru() {
            drained.push(entry);
        }
        drained
    }

    /// Cached regions, most recently used first
    pub fn regions(&self) -> Vec<RegionId> {
        self.entries.iter().map(|(region, _)| *region).collect()
    }

    /// Every cached handle, most recently used first
    pub fn handles(&self) -> Vec<SharedRegion> {
        self.entries.iter().map(|(_, handle)| handle.clone()).collect()
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
