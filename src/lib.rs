//! # regionstore
//!
//! Persistent chunk storage grouped into region files:
//! - Chunk position → region container mapping (32×32 chunks per file)
//! - Bounded LRU cache of open containers with evict-and-close
//! - Negative cache of regions known to be absent on disk
//! - Per-region locking; different regions never serialize on each other
//! - Bounded write retries that report instead of failing the caller
//! - Read compatibility with the legacy oversized chunk layout
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │           Callers (load / save / scan pipelines)            │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │ read / write / scan_chunk / chunk_exists
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                     RegionStorage                           │
//! │   coarse Mutex ─┬─ HandleCache   (LRU, open containers)     │
//! │                 └─ AbsentRegions (LRU, known-missing)       │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │ RegionGuard (per-region lock)
//!          ┌────────────┴────────────┐
//!          ▼                         ▼
//!   ┌─────────────┐          ┌─────────────┐
//!   │ RegionFile  │   ...    │ RegionFile  │
//!   │  r.0.0.rgn  │          │ r.-1.3.rgn  │
//!   └─────────────┘          └─────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod position;
pub mod document;
pub mod container;
pub mod cache;
pub mod oversized;
pub mod report;
pub mod storage;
pub mod flusher;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{RegionError, Result};
pub use config::Config;
pub use document::{Compound, Document, Tag};
pub use flusher::BackgroundFlusher;
pub use position::{ChunkPos, RegionId};
pub use report::{WriteOutcome, WriteReporter};
pub use storage::RegionStorage;

// =============================================================================
// Version Info
// =============================================================================

/// Current version of regionstore
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
