//! Container Module
//!
//! Per-region binary storage behind a trait, so the storage layer never
//! depends on a particular on-disk layout.
//!
//! ## Responsibilities
//! - `RegionContainer`: slot-level operations on one open region
//! - `ContainerOpener`: existence probe + open-or-create for a region path
//! - `RegionFile` / `FileOpener`: the shipped file-backed implementation

mod file;

use std::path::Path;

use bytes::Bytes;

use crate::config::Config;
use crate::document::Compound;
use crate::error::Result;
use crate::position::{ChunkPos, RegionId};

pub use file::{FileOptions, RegionFile};

/// One open region container
///
/// Callers serialize access per region (the storage layer wraps every
/// container in its own mutex), so methods take `&mut self`.
pub trait RegionContainer: Send {
    /// Path of the backing file
    fn path(&self) -> &Path;

    /// Whether the slot for `pos` holds data
    fn has_chunk(&self, pos: ChunkPos) -> bool;

    /// Whether the slot for `pos` carries the legacy oversized flag
    fn is_oversized(&self, pos: ChunkPos) -> bool;

    fn set_oversized(&mut self, pos: ChunkPos, oversized: bool) -> Result<()>;

    /// Raw encoded chunk, `None` when the slot is empty
    fn read_chunk(&mut self, pos: ChunkPos) -> Result<Option<Bytes>>;

    /// Store an encoded chunk; the slot only changes if the whole write succeeds
    ///
    /// Fails with `SizeExceeded` when `data` is larger than the format allows.
    fn write_chunk(&mut self, pos: ChunkPos, data: &[u8]) -> Result<()>;

    /// Empty the slot for `pos`
    fn clear(&mut self, pos: ChunkPos) -> Result<()>;

    /// Legacy side-storage payload of an oversized chunk
    fn oversized_supplement(&mut self, pos: ChunkPos) -> Result<Option<Compound>>;

    fn flush(&mut self) -> Result<()>;

    fn close(&mut self) -> Result<()>;
}

/// Opens region containers on behalf of the storage layer
///
/// All filesystem probes of the storage layer go through this trait.
pub trait ContainerOpener: Send + Sync {
    /// Whether a container file exists at `path`
    fn exists(&self, path: &Path) -> Result<bool>;

    /// Open the container at `path`, creating it when absent
    fn open(&self, path: &Path, region: RegionId) -> Result<Box<dyn RegionContainer>>;
}

/// Opener producing `RegionFile` containers
#[derive(Debug, Clone)]
pub struct FileOpener {
    options: FileOptions,
}

impl FileOpener {
    pub fn new(options: FileOptions) -> Self {
        Self { options }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(FileOptions::from_config(config))
    }
}

impl ContainerOpener for FileOpener {
    fn exists(&self, path: &Path) -> Result<bool> {
        Ok(path.try_exists()?)
    }

    fn open(&self, path: &Path, region: RegionId) -> Result<Box<dyn RegionContainer>> {
        Ok(Box::new(RegionFile::open(path, region, self.options.clone())?))
    }
}
