//! Error types for regionstore
//!
//! Provides a unified error type for all operations.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::position::{ChunkPos, RegionId};

/// Result type alias using RegionError
pub type Result<T> = std::result::Result<T, RegionError>;

/// Unified error type for regionstore operations
#[derive(Debug, Error)]
pub enum RegionError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    /// Any filesystem failure. The only kind the write path retries.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Container Errors
    // -------------------------------------------------------------------------
    #[error("Chunk {pos} encodes to {size} bytes, region format limit is {limit}")]
    SizeExceeded {
        pos: ChunkPos,
        size: usize,
        limit: usize,
    },

    #[error("Region file corruption detected: {0}")]
    Corruption(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Region file {} is closed", .0.display())]
    Closed(PathBuf),

    #[error("Region file {} is a broken symbolic link", .0.display())]
    BrokenSymlink(PathBuf),

    // -------------------------------------------------------------------------
    // Document Errors
    // -------------------------------------------------------------------------
    #[error("Document codec error: {0}")]
    Codec(String),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),

    // -------------------------------------------------------------------------
    // Lifecycle Errors
    // -------------------------------------------------------------------------
    #[error("{0}")]
    AggregateClose(CloseFailures),
}

impl RegionError {
    /// Whether a failed chunk write may succeed if attempted again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RegionError::Io(_))
    }
}

/// A single region that failed to close during bulk shutdown
#[derive(Debug)]
pub struct CloseFailure {
    pub region: RegionId,
    pub path: PathBuf,
    pub error: Box<RegionError>,
}

/// Every close failure collected by `RegionStorage::close`
#[derive(Debug)]
pub struct CloseFailures(pub Vec<CloseFailure>);

impl CloseFailures {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CloseFailure> {
        self.0.iter()
    }
}

impl fmt::Display for CloseFailures {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Failed to close {} region file(s)", self.0.len())?;
        for failure in &self.0 {
            write!(f, "; {}: {}", failure.path.display(), failure.error)?;
        }
        Ok(())
    }
}
