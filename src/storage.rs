//! Storage Module
//!
//! Chunk-keyed document store over one container file per region.
//!
//! ## Responsibilities
//! - Resolve a chunk position to its region container, opening lazily
//! - Keep at most `handle_cache_capacity` containers open (LRU eviction)
//! - Remember regions verified absent so reads of empty areas skip the disk
//! - Serialize operations per region, never across regions
//! - Bounded write retries that never fail the caller
//! - Read-side compatibility with the legacy oversized layout

use std::collections::HashMap;
use std::fs;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::cache::{AbsentRegions, HandleCache, OpenRegion, RegionGuard, SharedRegion};
use crate::config::Config;
use crate::container::{ContainerOpener, FileOpener, RegionContainer};
use crate::document::{self, Document, ScanOutcome, StreamVisitor};
use crate::error::{CloseFailure, CloseFailures, RegionError, Result};
use crate::oversized::{merge_oversized, LEVEL_FIELD};
use crate::position::{ChunkPos, RegionId};
use crate::report::{SilentReporter, WriteOutcome, WriteReporter};

/// Both caches, always mutated together under one lock
struct Caches {
    handles: HandleCache,
    absent: AbsentRegions,
    /// Evicted handles whose containers may not be closed yet. A region
    /// listed here is never reopened until its old container has closed.
    retiring: HashMap<RegionId, SharedRegion>,
}

/// The region-file chunk store
///
/// ## Concurrency Model
///
/// - **Coarse section**: `caches` (one `Mutex` over the handle cache and the
///   absent-region cache). Held only to resolve, create or evict a handle.
///   Eviction just unlinks the handle here and marks it retired.
///
/// - **Per-region lock**: every cached container has its own mutex. Reads,
///   writes and existence checks hold it across their I/O and release it when
///   the `RegionGuard` drops. Different regions proceed in parallel.
///
/// - **Closing evicted containers**: happens after the coarse section is
///   released. If the evicted region is free it is closed right away,
///   otherwise its current holder closes it when its guard drops.
///
/// - **Lock order**: nothing ever waits for a region lock while inside the
///   coarse section. Region holders may enter the coarse section briefly.
///
/// A handle can be retired between leaving the coarse section and taking its
/// region lock; `acquire` notices and resolves again.
pub struct RegionStorage {
    config: Config,
    region_dir: PathBuf,
    opener: Arc<dyn ContainerOpener>,
    reporter: Arc<dyn WriteReporter>,
    caches: Mutex<Caches>,
}

impl RegionStorage {
    /// Open a storage over `config.region_dir` with file-backed containers
    ///
    /// Nothing is created on disk until the first write.
    pub fn open(config: Config) -> Result<Self> {
        let opener = Arc::new(FileOpener::from_config(&config));
        Self::open_with(config, opener, Arc::new(SilentReporter))
    }

    /// Open with a custom container opener and write-failure reporter
    pub fn open_with(
        config: Config,
        opener: Arc<dyn ContainerOpener>,
        reporter: Arc<dyn WriteReporter>,
    ) -> Result<Self> {
        config.validate()?;

        let handle_capacity = NonZeroUsize::new(config.handle_cache_capacity)
            .ok_or_else(|| RegionError::Config("handle_cache_capacity must be at least 1".to_string()))?;
        let absent_capacity = NonZeroUsize::new(config.absent_cache_capacity)
            .ok_or_else(|| RegionError::Config("absent_cache_capacity must be at least 1".to_string()))?;

        debug!(
            dir = %config.region_dir.display(),
            handle_capacity = config.handle_cache_capacity,
            absent_capacity = config.absent_cache_capacity,
            "opening region storage"
        );

        Ok(Self {
            region_dir: config.region_dir.clone(),
            config,
            opener,
            reporter,
            caches: Mutex::new(Caches {
                handles: HandleCache::new(handle_capacity),
                absent: AbsentRegions::new(absent_capacity),
                retiring: HashMap::new(),
            }),
        })
    }

    // =========================================================================
    // Read Path
    // =========================================================================

    /// Read the document stored for `pos`
    ///
    /// Returns:
    /// - `Ok(Some(doc))`: chunk found (legacy oversized chunks come back merged)
    /// - `Ok(None)`: region or slot empty; no file is created
    /// - `Err(_)`: I/O or decode failure, not retried
    pub fn read(&self, pos: ChunkPos) -> Result<Option<Document>> {
        let Some(mut region) = self.acquire(pos, true)? else {
            return Ok(None);
        };
        self.read_locked(&mut region, pos)
    }

    /// Feed the raw encoded chunk to `visitor` without building the document
    ///
    /// Returns `Ok(None)` when there is no chunk. The region lock is only held
    /// while fetching the bytes. Unlike `read`, legacy oversized supplements
    /// are not merged in: the visitor sees the primary document alone.
    pub fn scan_chunk(
        &self,
        pos: ChunkPos,
        visitor: &mut dyn StreamVisitor,
    ) -> Result<Option<ScanOutcome>> {
        let data = {
            let Some(mut region) = self.acquire(pos, true)? else {
                return Ok(None);
            };
            region.container().read_chunk(pos)?
        };

        match data {
            Some(bytes) => Ok(Some(document::scan(&bytes[..], visitor)?)),
            None => Ok(None),
        }
    }

    /// Whether a chunk is stored for `pos`; never creates a region file
    pub fn chunk_exists(&self, pos: ChunkPos) -> Result<bool> {
        match self.acquire(pos, true)? {
            Some(mut region) => Ok(region.container().has_chunk(pos)),
            None => Ok(false),
        }
    }

    // =========================================================================
    // Write Path
    // =========================================================================

    /// Store (`Some`) or clear (`None`) the chunk at `pos`
    ///
    /// Failures are not returned as errors: they are logged, passed to the
    /// configured `WriteReporter`, and described by the outcome.
    ///
    /// Steps:
    /// 1. Open the region (clearing never creates one)
    /// 2. Try up to `write_attempts` times, without delay
    /// 3. `SizeExceeded` stops at once and clears the slot
    /// 4. Other non-I/O failures stop at once; I/O failures retry
    pub fn write(&self, pos: ChunkPos, document: Option<&Document>) -> WriteOutcome {
        let mut region = match self.acquire(pos, document.is_none()) {
            Ok(Some(region)) => region,
            Ok(None) => return WriteOutcome::NothingToClear,
            Err(e) => {
                self.report_failure(pos, 0, &e);
                return WriteOutcome::Unavailable(e);
            }
        };
        self.write_locked(&mut region, pos, document)
    }

    /// Rewrite every chunk of `region` still in the legacy oversized layout
    ///
    /// Each flagged chunk is read merged and written back in the current
    /// layout, which clears its flag and sidecar. Returns how many chunks were
    /// migrated.
    pub fn migrate_oversized(&self, region: RegionId) -> Result<usize> {
        let Some(mut open) = self.acquire(region.origin(), true)? else {
            return Ok(0);
        };

        let flagged: Vec<ChunkPos> = region
            .chunks()
            .filter(|pos| open.container().is_oversized(*pos))
            .collect();

        let mut migrated = 0;
        for pos in flagged {
            let Some(document) = Self::read_oversized(open.container(), pos)? else {
                open.container().set_oversized(pos, false)?;
                continue;
            };
            match self.write_locked(&mut open, pos, Some(&document)) {
                WriteOutcome::Saved { .. } => migrated += 1,
                WriteOutcome::Rejected(e)
                | WriteOutcome::FailedAfterRetries { error: e, .. }
                | WriteOutcome::Unavailable(e) => return Err(e),
                WriteOutcome::Cleared | WriteOutcome::NothingToClear => {}
            }
        }

        if migrated > 0 {
            info!(region = %region, migrated, "migrated oversized chunks");
        }
        Ok(migrated)
    }

    // =========================================================================
    // Region Access
    // =========================================================================

    /// Lock the region holding `pos` for a multi-step sequence
    ///
    /// Returns `Ok(None)` when the region has no file. Other operations on
    /// the same region block until the guard drops. Calling back into the
    /// storage for other regions is fine, but `close` waits for the guard.
    pub fn lock_region(&self, pos: ChunkPos) -> Result<Option<RegionGuard>> {
        self.acquire(pos, true)
    }

    /// Whether the region of `pos` is recorded as absent, without any I/O
    pub fn region_known_absent(&self, pos: ChunkPos) -> bool {
        !self.caches.lock().absent.probably_exists(pos.region())
    }

    /// Whether the region of `pos` currently has an open container
    pub fn is_region_loaded(&self, pos: ChunkPos) -> bool {
        self.caches.lock().handles.contains(pos.region())
    }

    /// Regions with open containers, most recently used first
    pub fn loaded_regions(&self) -> Vec<RegionId> {
        self.caches.lock().handles.regions()
    }

    /// Path of the container file for `region`
    pub fn region_path(&self, region: RegionId) -> PathBuf {
        self.region_dir.join(region.file_name())
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Flush every open container without closing it
    ///
    /// Every container is attempted; failures are logged and the first one is
    /// returned afterwards.
    pub fn flush(&self) -> Result<()> {
        let handles = self.caches.lock().handles.handles();

        let mut first_error = None;
        for handle in handles {
            let mut region = handle.lock();
            if region.is_closed() {
                continue;
            }
            if let Err(e) = region.container().flush() {
                warn!(region = %region.region(), path = %region.path().display(), error = %e, "failed to flush region file");
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Close every open container and empty the handle cache
    ///
    /// All containers are attempted even when some fail; failures come back
    /// together as one `AggregateClose` error.
    pub fn close(&self) -> Result<()> {
        let pending = {
            let mut caches = self.caches.lock();
            let mut pending = caches.handles.drain();
            // Handles evicted earlier whose holders have not closed them yet
            for (region, handle) in &caches.retiring {
                if !handle.is_settled() {
                    pending.push((*region, handle.clone()));
                }
            }
            for (region, handle) in &pending {
                handle.retire();
                caches.retiring.insert(*region, handle.clone());
            }
            pending
        };

        let mut failures = Vec::new();
        for (region, handle) in pending {
            let mut open = handle.lock();
            if let Err(e) = open.close() {
                warn!(region = %region, path = %open.path().display(), error = %e, "failed to close region file");
                failures.push(CloseFailure {
                    region,
                    path: open.path().to_path_buf(),
                    error: Box::new(e),
                });
            }
            drop(open);
            self.forget_retired(region, &handle);
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(RegionError::AggregateClose(CloseFailures(failures)))
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn region_dir(&self) -> &Path {
        &self.region_dir
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    /// Resolve and lock the region of `pos`
    fn acquire(&self, pos: ChunkPos, existing_only: bool) -> Result<Option<RegionGuard>> {
        let region = pos.region();
        loop {
            let Some(handle) = self.resolve(region, existing_only)? else {
                return Ok(None);
            };
            let guard = handle.lock();
            if !guard.is_closed() && !guard.is_retired() {
                return Ok(Some(guard));
            }
            // Dropping the guard closes a retired container
            drop(guard);
            self.forget_retired(region, &handle);
            debug!(region = %region, "region retired while waiting for its lock, resolving again");
        }
    }

    /// Find or open the handle for `region`
    ///
    /// Containers evicted on the way are closed after the coarse section is
    /// released.
    fn resolve(&self, region: RegionId, existing_only: bool) -> Result<Option<SharedRegion>> {
        let mut evicted = Vec::new();
        let resolved = self.resolve_locked(region, existing_only, &mut evicted);
        for (region, handle) in evicted {
            self.close_evicted(region, &handle);
        }
        resolved
    }

    fn resolve_locked(
        &self,
        region: RegionId,
        existing_only: bool,
        evicted: &mut Vec<(RegionId, SharedRegion)>,
    ) -> Result<Option<SharedRegion>> {
        let mut caches = self.caches.lock();

        if let Some(handle) = caches.handles.get(region) {
            return Ok(Some(handle));
        }

        // Still closing: callers wait on its region lock, then resolve again
        if let Some(handle) = caches.retiring.get(&region) {
            return Ok(Some(handle.clone()));
        }

        if existing_only && !caches.absent.probably_exists(region) {
            return Ok(None);
        }

        let path = self.region_path(region);
        self.guard_against_broken_symlink(&path)?;

        if existing_only && !self.opener.exists(&path)? {
            caches.absent.mark_missing(region);
            debug!(region = %region, "region file absent");
            return Ok(None);
        }

        if caches.handles.is_full() {
            if let Some(entry) = caches.handles.pop_lru() {
                Self::retire(&mut caches, entry, evicted);
            }
        }

        caches.absent.mark_created(region);
        fs::create_dir_all(&self.region_dir)?;

        let container = self.opener.open(&path, region)?;
        let handle = OpenRegion::shared(region, container);
        if let Some(entry) = caches.handles.insert(region, handle.clone()) {
            Self::retire(&mut caches, entry, evicted);
        }
        debug!(region = %region, path = %path.display(), "opened region file");

        Ok(Some(handle))
    }

    fn retire(
        caches: &mut Caches,
        (region, handle): (RegionId, SharedRegion),
        evicted: &mut Vec<(RegionId, SharedRegion)>,
    ) {
        caches.retiring.retain(|_, old| !old.is_settled());
        handle.retire();
        caches.retiring.insert(region, handle.clone());
        evicted.push((region, handle));
    }

    /// Close an evicted container unless someone holds it
    ///
    /// A held region is left to its holder, whose guard closes it on drop.
    fn close_evicted(&self, region: RegionId, handle: &SharedRegion) {
        let Some(mut open) = handle.try_lock() else {
            debug!(region = %region, "evicted region is in use, its holder will close it");
            return;
        };
        match open.close() {
            Ok(()) => debug!(region = %region, "evicted region file"),
            Err(e) => warn!(
                region = %region,
                path = %open.path().display(),
                error = %e,
                "failed to close evicted region file"
            ),
        }
        drop(open);
        self.forget_retired(region, handle);
    }

    /// Drop `handle` from the retiring set once it no longer needs tracking
    fn forget_retired(&self, region: RegionId, handle: &SharedRegion) {
        let mut caches = self.caches.lock();
        if caches.retiring.get(&region).is_some_and(|old| old.same(handle)) {
            caches.retiring.remove(&region);
        }
    }

    fn guard_against_broken_symlink(&self, path: &Path) -> Result<()> {
        if !self.config.fail_on_broken_symlink {
            return Ok(());
        }
        let Ok(meta) = fs::symlink_metadata(path) else {
            return Ok(());
        };
        if meta.file_type().is_symlink() && fs::metadata(path).is_err() {
            error!(path = %path.display(), "region file is a broken symbolic link, refusing to open it");
            return Err(RegionError::BrokenSymlink(path.to_path_buf()));
        }
        Ok(())
    }

    fn read_locked(&self, region: &mut OpenRegion, pos: ChunkPos) -> Result<Option<Document>> {
        let path = region.path().to_path_buf();
        let container = region.container();

        if container.is_oversized(pos) {
            warn!(
                path = %path.display(),
                chunk = %pos,
                "loading oversized chunk stored in a retired layout; migrate this region file"
            );
            return Self::read_oversized(container, pos);
        }

        let Some(bytes) = container.read_chunk(pos)? else {
            return Ok(None);
        };
        let document = document::decode(&bytes)?;

        if self.config.verify_chunk_positions {
            if let Some(stored) = embedded_position(&document) {
                if stored != pos {
                    error!(
                        path = %path.display(),
                        requested = %pos,
                        stored = %stored,
                        "chunk data belongs to another position, treating as absent"
                    );
                    return Ok(None);
                }
            }
        }

        Ok(Some(document))
    }

    fn read_oversized(container: &mut dyn RegionContainer, pos: ChunkPos) -> Result<Option<Document>> {
        let Some(bytes) = container.read_chunk(pos)? else {
            warn!(chunk = %pos, "oversized flag set on an empty slot");
            return Ok(None);
        };
        let primary = document::decode(&bytes)?;
        let supplement = container.oversized_supplement(pos)?;
        Ok(Some(merge_oversized(primary, supplement.as_ref())))
    }

    fn write_locked(
        &self,
        region: &mut OpenRegion,
        pos: ChunkPos,
        document: Option<&Document>,
    ) -> WriteOutcome {
        let attempts = self.config.write_attempts;
        let mut last_error = None;

        for attempt in 1..=attempts {
            match Self::store(region.container(), pos, document) {
                Ok(()) if document.is_some() => return WriteOutcome::Saved { attempts: attempt },
                Ok(()) => return WriteOutcome::Cleared,
                Err(e @ RegionError::SizeExceeded { .. }) => {
                    // Never leave a stale or partial record behind an oversized save
                    if let Err(clear_err) = region.container().clear(pos) {
                        warn!(chunk = %pos, error = %clear_err, "failed to clear slot after oversized write");
                    }
                    self.report_failure(pos, attempt, &e);
                    return WriteOutcome::Rejected(e);
                }
                Err(e) if !e.is_retryable() => {
                    self.report_failure(pos, attempt, &e);
                    return WriteOutcome::Rejected(e);
                }
                Err(e) => {
                    debug!(chunk = %pos, attempt, error = %e, "chunk write attempt failed");
                    last_error = Some(e);
                }
            }
        }

        let error = last_error.unwrap_or_else(|| {
            RegionError::Storage(format!("No write attempt made for chunk {}", pos))
        });
        self.report_failure(pos, attempts, &error);
        WriteOutcome::FailedAfterRetries { attempts, error }
    }

    /// One write attempt: encode, store, drop any legacy flag
    fn store(
        container: &mut dyn RegionContainer,
        pos: ChunkPos,
        document: Option<&Document>,
    ) -> Result<()> {
        match document {
            None => container.clear(pos),
            Some(document) => {
                let encoded = document::encode(document)?;
                container.write_chunk(pos, &encoded)?;
                container.set_oversized(pos, false)
            }
        }
    }

    fn report_failure(&self, pos: ChunkPos, attempts: u32, error: &RegionError) {
        error!(chunk = %pos, attempts, error = %error, "failed to save chunk");
        self.reporter.report(pos, error);
    }
}

/// Position a document claims for itself, at the root or under `Level`
fn embedded_position(document: &Document) -> Option<ChunkPos> {
    let source = if document.contains_key("xPos") {
        document
    } else {
        document.get_compound(LEVEL_FIELD)?
    };
    Some(ChunkPos::new(source.get_int("xPos")?, source.get_int("zPos")?))
}
