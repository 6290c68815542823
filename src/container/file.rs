//! Region File
//!
//! File-backed region container. The whole region lives in memory and is
//! written back atomically (temp file + rename) on flush, close, or on every
//! write when `sync_writes` is set.
//!
//! ## File Format
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │ Header (14 bytes)                                       │
//! │   Magic: "RGNF" (4) | Version: u16 (2)                  │
//! │   IndexLen: u32 (4) | IndexCRC: u32 (4)                 │
//! ├─────────────────────────────────────────────────────────┤
//! │ Index Block (bincode RegionIndex)                       │
//! │   region coords, [slot, len, crc] per stored chunk,     │
//! │   slots carrying the legacy oversized flag              │
//! ├─────────────────────────────────────────────────────────┤
//! │ Data Block                                              │
//! │   chunk payloads in index order                         │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! Legacy oversized supplements are sidecar files next to the region:
//! `r.<rx>.<rz>_oversized_<cx>_<cz>.doc`. A sidecar is only deleted once an
//! index that no longer flags its slot has been persisted.

use std::collections::BTreeSet;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::config::Config;
use crate::document::{self, Compound};
use crate::error::{RegionError, Result};
use crate::position::{ChunkPos, RegionId, CHUNKS_PER_REGION};

use super::RegionContainer;

/// Magic bytes identifying a region file
const MAGIC: &[u8; 4] = b"RGNF";

/// Current region file format version
const VERSION: u16 = 1;

/// Header size: Magic (4) + Version (2) + IndexLen (4) + IndexCRC (4) = 14 bytes
const HEADER_SIZE: usize = 14;

/// Extension of legacy oversized sidecar files
const OVERSIZED_EXTENSION: &str = "doc";

/// Behaviour knobs taken from `Config`
#[derive(Debug, Clone)]
pub struct FileOptions {
    pub max_chunk_size: usize,
    pub sync_writes: bool,
}

impl FileOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_chunk_size: config.max_chunk_size,
            sync_writes: config.sync_writes,
        }
    }
}

impl Default for FileOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct RegionIndex {
    region_x: i32,
    region_z: i32,
    slots: Vec<SlotRecord>,
    oversized: Vec<u16>,
}

#[derive(Debug, Serialize, Deserialize)]
struct SlotRecord {
    slot: u16,
    len: u32,
    crc: u32,
}

/// File-backed region container
pub struct RegionFile {
    path: PathBuf,
    region: RegionId,
    slots: Vec<Option<Bytes>>,
    oversized: BTreeSet<u16>,
    /// Sidecars of unflagged slots, deleted after the next persist
    stale_sidecars: BTreeSet<ChunkPos>,
    options: FileOptions,
    dirty: bool,
    closed: bool,
}

impl RegionFile {
    /// Open the region file at `path`, creating an empty one if absent
    pub fn open(path: &Path, region: RegionId, options: FileOptions) -> Result<Self> {
        let mut file = Self {
            path: path.to_path_buf(),
            region,
            slots: vec![None; CHUNKS_PER_REGION],
            oversized: BTreeSet::new(),
            stale_sidecars: BTreeSet::new(),
            options,
            dirty: false,
            closed: false,
        };

        match fs::read(path) {
            Ok(raw) if raw.is_empty() => {}
            Ok(raw) => file.load(Bytes::from(raw))?,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                // Claim the path so the region exists on disk from now on
                OpenOptions::new().create(true).append(true).open(path)?;
                debug!(path = %path.display(), "created region file");
            }
            Err(e) => return Err(e.into()),
        }

        Ok(file)
    }

    /// Region this file stores
    pub fn region(&self) -> RegionId {
        self.region
    }

    /// Number of non-empty slots
    pub fn chunk_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// Whether in-memory state differs from the file
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Store a chunk in the retired split layout: `primary` in the slot,
    /// `supplement` in a sidecar file, and the oversized flag set
    ///
    /// Only needed to produce legacy fixtures; the storage layer never writes
    /// this layout.
    pub fn write_legacy_oversized(
        &mut self,
        pos: ChunkPos,
        primary: &Compound,
        supplement: &Compound,
    ) -> Result<()> {
        let encoded = document::encode(primary)?;
        self.write_chunk(pos, &encoded)?;
        let sidecar = self.oversized_path(pos);
        fs::write(&sidecar, document::encode(supplement)?)?;
        self.set_oversized(pos, true)
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn load(&mut self, raw: Bytes) -> Result<()> {
        if raw.len() < HEADER_SIZE {
            return Err(self.corruption(format!("file is {} bytes, shorter than header", raw.len())));
        }
        if &raw[0..4] != MAGIC {
            return Err(self.corruption(format!("invalid magic {:?}", &raw[0..4])));
        }
        let version = u16::from_be_bytes([raw[4], raw[5]]);
        if version != VERSION {
            return Err(self.corruption(format!("unsupported version {}", version)));
        }
        let index_len = u32::from_be_bytes([raw[6], raw[7], raw[8], raw[9]]) as usize;
        let index_crc = u32::from_be_bytes([raw[10], raw[11], raw[12], raw[13]]);

        let index_end = HEADER_SIZE + index_len;
        if raw.len() < index_end {
            return Err(self.corruption("index block truncated".to_string()));
        }
        let index_bytes = &raw[HEADER_SIZE..index_end];
        if crc32fast::hash(index_bytes) != index_crc {
            return Err(self.corruption("index checksum mismatch".to_string()));
        }
        let index: RegionIndex = bincode::deserialize(index_bytes)
            .map_err(|e| self.corruption(format!("unreadable index: {}", e)))?;

        if RegionId::new(index.region_x, index.region_z) != self.region {
            warn!(
                path = %self.path.display(),
                stored = %RegionId::new(index.region_x, index.region_z),
                expected = %self.region,
                "region file header names a different region"
            );
        }

        let mut offset = index_end;
        for record in index.slots {
            let slot = record.slot as usize;
            if slot >= CHUNKS_PER_REGION {
                return Err(self.corruption(format!("slot {} out of range", slot)));
            }
            let end = offset + record.len as usize;
            if raw.len() < end {
                return Err(self.corruption(format!("payload of slot {} truncated", slot)));
            }
            let payload = raw.slice(offset..end);
            if crc32fast::hash(&payload) != record.crc {
                return Err(self.corruption(format!("checksum mismatch in slot {}", slot)));
            }
            self.slots[slot] = Some(payload);
            offset = end;
        }
        self.oversized = index.oversized.into_iter().collect();

        Ok(())
    }

    /// Write the whole region to a temp file and move it over the original
    fn persist(&mut self) -> Result<()> {
        let mut records = Vec::new();
        for (slot, data) in self.slots.iter().enumerate() {
            if let Some(data) = data {
                let len = u32::try_from(data.len()).map_err(|_| {
                    RegionError::Storage(format!(
                        "Chunk in slot {} of {} is too large to index ({} bytes)",
                        slot,
                        self.path.display(),
                        data.len()
                    ))
                })?;
                records.push(SlotRecord {
                    slot: slot as u16,
                    len,
                    crc: crc32fast::hash(data),
                });
            }
        }
        let index = RegionIndex {
            region_x: self.region.x(),
            region_z: self.region.z(),
            slots: records,
            oversized: self.oversized.iter().copied().collect(),
        };
        let index_bytes = bincode::serialize(&index)
            .map_err(|e| RegionError::Storage(format!("Failed to encode region index: {}", e)))?;

        let tmp_path = self.path.with_extension("rgn.tmp");
        {
            let file = File::create(&tmp_path)?;
            let mut writer = BufWriter::new(file);

            writer.write_all(MAGIC)?;
            writer.write_all(&VERSION.to_be_bytes())?;
            let index_len = u32::try_from(index_bytes.len())
                .map_err(|_| RegionError::Storage("Region index too large".to_string()))?;
            writer.write_all(&index_len.to_be_bytes())?;
            writer.write_all(&crc32fast::hash(&index_bytes).to_be_bytes())?;
            writer.write_all(&index_bytes)?;
            for data in self.slots.iter().flatten() {
                writer.write_all(data)?;
            }

            let file = writer.into_inner().map_err(|e| {
                RegionError::Storage(format!("Failed to flush region file: {}", e))
            })?;
            file.sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)?;

        self.dirty = false;
        debug!(path = %self.path.display(), chunks = self.chunk_count(), "persisted region file");
        self.remove_stale_sidecars();
        Ok(())
    }

    /// Delete sidecars whose slots the persisted index no longer flags
    fn remove_stale_sidecars(&mut self) {
        for pos in std::mem::take(&mut self.stale_sidecars) {
            let sidecar = self.oversized_path(pos);
            match fs::remove_file(&sidecar) {
                Ok(()) => debug!(path = %sidecar.display(), "removed oversized sidecar"),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => warn!(path = %sidecar.display(), error = %e, "failed to remove oversized sidecar"),
            }
        }
    }

    fn mark_dirty(&mut self) -> Result<()> {
        self.dirty = true;
        if self.options.sync_writes {
            self.persist()?;
        }
        Ok(())
    }

    fn check_open(&self) -> Result<()> {
        if self.closed {
            return Err(RegionError::Closed(self.path.clone()));
        }
        Ok(())
    }

    fn slot_of(&self, pos: ChunkPos) -> Result<usize> {
        if pos.region() != self.region {
            return Err(RegionError::Storage(format!(
                "Chunk {} does not belong to region {}",
                pos, self.region
            )));
        }
        Ok(pos.slot())
    }

    fn oversized_path(&self, pos: ChunkPos) -> PathBuf {
        let stem = self
            .path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.path.with_file_name(format!(
            "{}_oversized_{}_{}.{}",
            stem, pos.x, pos.z, OVERSIZED_EXTENSION
        ))
    }

    fn corruption(&self, detail: String) -> RegionError {
        RegionError::Corruption(format!("{}: {}", self.path.display(), detail))
    }
}

impl RegionContainer for RegionFile {
    fn path(&self) -> &Path {
        &self.path
    }

    fn has_chunk(&self, pos: ChunkPos) -> bool {
        pos.region() == self.region && self.slots[pos.slot()].is_some()
    }

    fn is_oversized(&self, pos: ChunkPos) -> bool {
        pos.region() == self.region && self.oversized.contains(&(pos.slot() as u16))
    }

    fn set_oversized(&mut self, pos: ChunkPos, oversized: bool) -> Result<()> {
        self.check_open()?;
        let slot = self.slot_of(pos)? as u16;
        let changed = if oversized {
            self.stale_sidecars.remove(&pos);
            self.oversized.insert(slot)
        } else {
            self.oversized.remove(&slot)
        };
        if !changed {
            return Ok(());
        }
        if !oversized {
            self.stale_sidecars.insert(pos);
        }
        self.mark_dirty()
    }

    fn read_chunk(&mut self, pos: ChunkPos) -> Result<Option<Bytes>> {
        self.check_open()?;
        let slot = self.slot_of(pos)?;
        Ok(self.slots[slot].clone())
    }

    fn write_chunk(&mut self, pos: ChunkPos, data: &[u8]) -> Result<()> {
        self.check_open()?;
        let slot = self.slot_of(pos)?;
        if data.len() > self.options.max_chunk_size {
            return Err(RegionError::SizeExceeded {
                pos,
                size: data.len(),
                limit: self.options.max_chunk_size,
            });
        }
        self.slots[slot] = Some(Bytes::copy_from_slice(data));
        self.mark_dirty()
    }

    fn clear(&mut self, pos: ChunkPos) -> Result<()> {
        self.check_open()?;
        let slot = self.slot_of(pos)?;
        let had_data = self.slots[slot].take().is_some();
        // Clearing also drops any legacy flag and its sidecar
        self.set_oversized(pos, false)?;
        if had_data {
            self.mark_dirty()?;
        }
        Ok(())
    }

    fn oversized_supplement(&mut self, pos: ChunkPos) -> Result<Option<Compound>> {
        self.check_open()?;
        self.slot_of(pos)?;
        if !self.is_oversized(pos) {
            return Ok(None);
        }
        match fs::read(self.oversized_path(pos)) {
            Ok(raw) => Ok(Some(document::decode(&raw)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn flush(&mut self) -> Result<()> {
        self.check_open()?;
        if self.dirty {
            self.persist()?;
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        // On failure the file stays open and dirty, so a later close or the
        // drop can still save it
        if self.dirty {
            self.persist()?;
        }
        self.closed = true;
        Ok(())
    }
}

impl Drop for RegionFile {
    fn drop(&mut self) {
        if !self.closed && self.dirty {
            if let Err(e) = self.persist() {
                error!(path = %self.path.display(), error = %e, "failed to persist region file on drop");
            }
        }
    }
}
