//! Cache Module
//!
//! The two bounded LRU structures the storage layer guards with one mutex.
//!
//! ## Responsibilities
//! - `HandleCache`: open region containers, evicted and closed on overflow
//! - `AbsentRegions`: regions verified missing on disk, so existence-only
//!   lookups can skip the filesystem probe
//!
//! Both are plain single-threaded structures; `RegionStorage` owns them
//! together inside a single `parking_lot::Mutex` so that create/evict and
//! mark-missing/mark-created transitions are observed atomically.

mod absent;
mod handles;

pub use absent::AbsentRegions;
pub use handles::{HandleCache, OpenRegion, RegionGuard, SharedRegion};
