//! Tests for legacy oversized chunk compatibility
//!
//! These tests verify:
//! - Merge appends supplement lists after the primary's, in order
//! - Reads through the storage return merged documents
//! - Scans see the primary document alone
//! - Writing, clearing and migrating drop the flag, and the sidecar once persisted

#[path = "../common/mod.rs"]
mod common;

use std::fs;
use std::path::PathBuf;

use common::setup_storage;
use regionstore::container::{FileOptions, RegionContainer, RegionFile};
use regionstore::document::{CollectFields, Compound, ScanOutcome, Tag};
use regionstore::oversized::merge_oversized;
use regionstore::{ChunkPos, RegionId, RegionStorage};

fn entity(id: &str) -> Tag {
    Tag::Compound(Compound::new().with("id", id))
}

fn primary_doc(pos: ChunkPos) -> Compound {
    let level = Compound::new()
        .with("xPos", pos.x)
        .with("zPos", pos.z)
        .with("Entities", Tag::List(vec![entity("a"), entity("b")]))
        .with("TileEntities", Tag::List(vec![entity("chest")]));
    Compound::new().with("Level", level)
}

fn supplement_doc() -> Compound {
    let level = Compound::new().with(
        "Entities",
        Tag::List(vec![entity("c"), entity("d"), entity("e")]),
    );
    Compound::new().with("Level", level)
}

fn entity_ids(document: &Compound) -> Vec<String> {
    document
        .get_compound("Level")
        .unwrap()
        .get_list("Entities")
        .iter()
        .map(|e| e.as_compound().unwrap().get("id").unwrap().as_str().unwrap().to_string())
        .collect()
}

fn sidecar_path(storage: &RegionStorage, pos: ChunkPos) -> PathBuf {
    let region = pos.region();
    storage.region_dir().join(format!(
        "r.{}.{}_oversized_{}_{}.doc",
        region.x(),
        region.z(),
        pos.x,
        pos.z
    ))
}

/// Write a chunk in the retired split layout, bypassing the storage
fn write_legacy(storage: &RegionStorage, pos: ChunkPos) {
    fs::create_dir_all(storage.region_dir()).unwrap();
    let region = pos.region();
    let mut file = RegionFile::open(
        &storage.region_path(region),
        region,
        FileOptions::default(),
    )
    .unwrap();
    file.write_legacy_oversized(pos, &primary_doc(pos), &supplement_doc())
        .unwrap();
    file.close().unwrap();
}

// =============================================================================
// Merge Tests
// =============================================================================

#[test]
fn test_merge_appends_in_order() {
    let pos = ChunkPos::new(0, 0);
    let merged = merge_oversized(primary_doc(pos), Some(&supplement_doc()));

    assert_eq!(entity_ids(&merged), vec!["a", "b", "c", "d", "e"]);

    let level = merged.get_compound("Level").unwrap();
    assert_eq!(level.get_list("TileEntities").len(), 1);
    assert_eq!(level.get_int("xPos"), Some(0));
}

#[test]
fn test_merge_without_supplement_is_identity() {
    let pos = ChunkPos::new(4, 4);
    assert_eq!(merge_oversized(primary_doc(pos), None), primary_doc(pos));

    let empty = Compound::new();
    assert_eq!(merge_oversized(primary_doc(pos), Some(&empty)), primary_doc(pos));
}

#[test]
fn test_merge_creates_missing_lists() {
    let primary = Compound::new().with("DataVersion", 1);
    let supplement = Compound::new().with(
        "Level",
        Compound::new().with("TileEntities", Tag::List(vec![entity("furnace")])),
    );

    let merged = merge_oversized(primary, Some(&supplement));
    let level = merged.get_compound("Level").unwrap();

    assert_eq!(level.get_list("TileEntities").len(), 1);
    assert!(level.get_list("Entities").is_empty());
    assert_eq!(merged.get_int("DataVersion"), Some(1));
}

// =============================================================================
// Storage Read Tests
// =============================================================================

#[test]
fn test_read_merges_legacy_chunk() {
    let (_temp, storage) = setup_storage();
    let pos = ChunkPos::new(3, -4);
    write_legacy(&storage, pos);

    let document = storage.read(pos).unwrap().unwrap();
    assert_eq!(entity_ids(&document), vec!["a", "b", "c", "d", "e"]);
    assert_eq!(
        document.get_compound("Level").unwrap().get_list("TileEntities").len(),
        1
    );
}

#[test]
fn test_read_with_missing_sidecar_returns_primary() {
    let (_temp, storage) = setup_storage();
    let pos = ChunkPos::new(1, 1);
    write_legacy(&storage, pos);
    fs::remove_file(sidecar_path(&storage, pos)).unwrap();

    assert_eq!(storage.read(pos).unwrap(), Some(primary_doc(pos)));
}

#[test]
fn test_scan_sees_primary_only() {
    let (_temp, storage) = setup_storage();
    let pos = ChunkPos::new(2, 2);
    write_legacy(&storage, pos);

    let mut collector = CollectFields::new(["Level.Entities"]);
    let outcome = storage.scan_chunk(pos, &mut collector).unwrap();

    assert_eq!(outcome, Some(ScanOutcome::Halted));
    let entities = collector.get("Level.Entities").unwrap().as_list().unwrap();
    assert_eq!(entities.len(), 2);
}

// =============================================================================
// Flag Clearing Tests
// =============================================================================

#[test]
fn test_write_clears_flag_and_sidecar() {
    let (_temp, storage) = setup_storage();
    let pos = ChunkPos::new(5, 6);
    write_legacy(&storage, pos);
    assert!(sidecar_path(&storage, pos).exists());

    let replacement = Compound::new().with("DataVersion", 2);
    assert!(storage.write(pos, Some(&replacement)).is_success());
    assert_eq!(storage.read(pos).unwrap(), Some(replacement));

    // Kept until the unflagged index is on disk
    assert!(sidecar_path(&storage, pos).exists());
    storage.flush().unwrap();
    assert!(!sidecar_path(&storage, pos).exists());

    let mut guard = storage.lock_region(pos).unwrap().unwrap();
    assert!(!guard.container().is_oversized(pos));
}

#[test]
fn test_clear_removes_sidecar() {
    let (_temp, storage) = setup_storage();
    let pos = ChunkPos::new(-9, 9);
    write_legacy(&storage, pos);

    assert!(storage.write(pos, None).is_success());
    assert_eq!(storage.read(pos).unwrap(), None);

    storage.close().unwrap();
    assert!(!sidecar_path(&storage, pos).exists());
}

// =============================================================================
// Migration Tests
// =============================================================================

#[test]
fn test_migrate_rewrites_legacy_chunks() {
    let (_temp, storage) = setup_storage();
    let legacy = [ChunkPos::new(0, 0), ChunkPos::new(10, 20)];
    for pos in legacy {
        write_legacy(&storage, pos);
    }
    let plain = ChunkPos::new(31, 31);
    storage.write(plain, Some(&Compound::new().with("DataVersion", 3)));

    let region = RegionId::new(0, 0);
    assert_eq!(storage.migrate_oversized(region).unwrap(), 2);
    storage.flush().unwrap();

    for pos in legacy {
        assert!(!sidecar_path(&storage, pos).exists());
        let document = storage.read(pos).unwrap().unwrap();
        assert_eq!(entity_ids(&document), vec!["a", "b", "c", "d", "e"]);
    }

    // Migrated documents are plain now, so scans see every entity too
    let mut collector = CollectFields::new(["Level.Entities"]);
    storage.scan_chunk(legacy[0], &mut collector).unwrap();
    assert_eq!(collector.get("Level.Entities").unwrap().as_list().unwrap().len(), 5);

    assert_eq!(storage.migrate_oversized(region).unwrap(), 0);
}

#[test]
fn test_migrate_missing_region() {
    let (_temp, storage) = setup_storage();
    assert_eq!(storage.migrate_oversized(RegionId::new(7, 7)).unwrap(), 0);
    assert!(!storage.region_path(RegionId::new(7, 7)).exists());
}
