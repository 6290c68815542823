//! Configuration for regionstore
//!
//! Centralized configuration with sensible defaults.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{RegionError, Result};

/// Largest chunk payload the region format accepts: 255 sectors of 4 KiB
pub const DEFAULT_MAX_CHUNK_SIZE: usize = 255 * 4096;

/// Main configuration for a RegionStorage instance
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Directory holding one container file per region
    /// Internal structure:
    ///   {region_dir}/
    ///     ├── r.0.0.rgn                    (region container)
    ///     └── r.0.0_oversized_3_7.doc      (legacy supplement, read-only compat)
    pub region_dir: PathBuf,

    /// Largest encoded chunk accepted by a container (in bytes)
    pub max_chunk_size: usize,

    /// Persist the container after every chunk write instead of on flush/close
    pub sync_writes: bool,

    /// Refuse to open a region path that is a dangling symlink
    pub fail_on_broken_symlink: bool,

    /// Treat documents whose embedded position disagrees with their key as absent
    pub verify_chunk_positions: bool,

    // -------------------------------------------------------------------------
    // Cache Configuration
    // -------------------------------------------------------------------------
    /// Max open region containers
    pub handle_cache_capacity: usize,

    /// Max regions remembered as absent from disk
    pub absent_cache_capacity: usize,

    // -------------------------------------------------------------------------
    // Write Configuration
    // -------------------------------------------------------------------------
    /// Attempts per chunk write before the failure is reported and dropped
    pub write_attempts: u32,

    /// Period of the background flusher
    pub flush_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            region_dir: PathBuf::from("./region"),
            max_chunk_size: DEFAULT_MAX_CHUNK_SIZE,
            sync_writes: false,
            fail_on_broken_symlink: true,
            verify_chunk_positions: false,
            handle_cache_capacity: 256,
            absent_cache_capacity: 64 * 1024,
            write_attempts: 5,
            flush_interval: Duration::from_secs(5),
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Reject values the storage cannot operate with
    pub fn validate(&self) -> Result<()> {
        if self.handle_cache_capacity == 0 {
            return Err(RegionError::Config(
                "handle_cache_capacity must be at least 1".to_string(),
            ));
        }
        if self.absent_cache_capacity == 0 {
            return Err(RegionError::Config(
                "absent_cache_capacity must be at least 1".to_string(),
            ));
        }
        if self.write_attempts == 0 {
            return Err(RegionError::Config(
                "write_attempts must be at least 1".to_string(),
            ));
        }
        if self.max_chunk_size == 0 {
            return Err(RegionError::Config(
                "max_chunk_size must be at least 1".to_string(),
            ));
        }
        if u32::try_from(self.max_chunk_size).is_err() {
            return Err(RegionError::Config(format!(
                "max_chunk_size must not exceed {} bytes",
                u32::MAX
            )));
        }
        Ok(())
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the region directory
    pub fn region_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.region_dir = path.into();
        self
    }

    /// Set the largest accepted encoded chunk (in bytes)
    pub fn max_chunk_size(mut self, size: usize) -> Self {
        self.config.max_chunk_size = size;
        self
    }

    pub fn sync_writes(mut self, sync: bool) -> Self {
        self.config.sync_writes = sync;
        self
    }

    pub fn fail_on_broken_symlink(mut self, fail: bool) -> Self {
        self.config.fail_on_broken_symlink = fail;
        self
    }

    pub fn verify_chunk_positions(mut self, verify: bool) -> Self {
        self.config.verify_chunk_positions = verify;
        self
    }

    /// Set the maximum number of open region containers
    pub fn handle_cache_capacity(mut self, capacity: usize) -> Self {
        self.config.handle_cache_capacity = capacity;
        self
    }

    /// Set the maximum number of regions remembered as absent
    pub fn absent_cache_capacity(mut self, capacity: usize) -> Self {
        self.config.absent_cache_capacity = capacity;
        self
    }

    /// Set the number of attempts per chunk write
    pub fn write_attempts(mut self, attempts: u32) -> Self {
        self.config.write_attempts = attempts;
        self
    }

    pub fn flush_interval(mut self, interval: Duration) -> Self {
        self.config.flush_interval = interval;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
