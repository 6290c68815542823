//! Chunk and region coordinates
//!
//! A region is a 32×32 square of chunks stored in one container file.
//! `RegionId` packs the two region coordinates into a single `u64` so it can
//! be used directly as a cache key.

use std::fmt;
use std::path::Path;

/// log2 of the region edge length
pub const REGION_SHIFT: u32 = 5;

/// Region edge length in chunks
pub const REGION_SIZE: i32 = 1 << REGION_SHIFT;

/// Number of chunk slots in one region
pub const CHUNKS_PER_REGION: usize = (REGION_SIZE * REGION_SIZE) as usize;

/// Extension used for region container files
pub const REGION_FILE_EXTENSION: &str = "rgn";

/// Position of a chunk in the world
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChunkPos {
    pub x: i32,
    pub z: i32,
}

impl ChunkPos {
    pub const fn new(x: i32, z: i32) -> Self {
        Self { x, z }
    }

    /// Region this chunk belongs to
    pub fn region(&self) -> RegionId {
        RegionId::new(self.x >> REGION_SHIFT, self.z >> REGION_SHIFT)
    }

    /// Coordinates inside the region, both in `0..32`
    pub fn local(&self) -> (usize, usize) {
        (
            (self.x & (REGION_SIZE - 1)) as usize,
            (self.z & (REGION_SIZE - 1)) as usize,
        )
    }

    /// Slot index inside the region: `local_x + local_z * 32`
    pub fn slot(&self) -> usize {
        let (lx, lz) = self.local();
        lx + lz * REGION_SIZE as usize
    }
}

impl fmt::Display for ChunkPos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.x, self.z)
    }
}

/// Identifier of a region: `(x as u32) | (z as u32) << 32`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegionId(u64);

impl RegionId {
    pub const fn new(region_x: i32, region_z: i32) -> Self {
        Self((region_x as u32 as u64) | ((region_z as u32 as u64) << 32))
    }

    pub fn from_chunk(pos: ChunkPos) -> Self {
        pos.region()
    }

    pub const fn from_packed(packed: u64) -> Self {
        Self(packed)
    }

    pub const fn packed(&self) -> u64 {
        self.0
    }

    pub const fn x(&self) -> i32 {
        self.0 as u32 as i32
    }

    pub const fn z(&self) -> i32 {
        (self.0 >> 32) as u32 as i32
    }

    /// Lowest chunk position inside this region
    pub fn origin(&self) -> ChunkPos {
        ChunkPos::new(self.x() << REGION_SHIFT, self.z() << REGION_SHIFT)
    }

    /// Every chunk position of this region, in slot order
    pub fn chunks(&self) -> impl Iterator<Item = ChunkPos> {
        let origin = self.origin();
        (0..REGION_SIZE).flat_map(move |lz| {
            (0..REGION_SIZE).map(move |lx| ChunkPos::new(origin.x + lx, origin.z + lz))
        })
    }

    /// File name of this region's container: `r.<x>.<z>.rgn`
    pub fn file_name(&self) -> String {
        format!("r.{}.{}.{}", self.x(), self.z(), REGION_FILE_EXTENSION)
    }

    /// Parse a container file name back into a region id
    ///
    /// "r.-3.12.rgn" → Some(RegionId::new(-3, 12))
    pub fn from_file_name(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_str()?;
        let mut parts = name.split('.');
        if parts.next()? != "r" {
            return None;
        }
        let x = parts.next()?.parse().ok()?;
        let z = parts.next()?.parse().ok()?;
        if parts.next()? != REGION_FILE_EXTENSION || parts.next().is_some() {
            return None;
        }
        Some(Self::new(x, z))
    }
}

impl fmt::Display for RegionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r.{}.{}", self.x(), self.z())
    }
}
