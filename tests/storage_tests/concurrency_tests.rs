//! Concurrency tests for RegionStorage
//!
//! These tests verify:
//! - A held region lock blocks its own region only
//! - Evicting a held region neither stalls other regions nor deadlocks its holder
//! - Parallel writers over shared and distinct regions lose nothing
//! - Eviction racing with in-flight operations stays consistent
//! - The background flusher persists deferred writes

#[path = "../common/mod.rs"]
mod common;

use std::fs;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use common::{sample_chunk, test_config};
use crossbeam::channel::{self, RecvTimeoutError};
use regionstore::document::encode;
use regionstore::{BackgroundFlusher, ChunkPos, Config, RegionStorage};
use tempfile::TempDir;

fn shared_storage(config: Config) -> Arc<RegionStorage> {
    Arc::new(RegionStorage::open(config).unwrap())
}

fn two_handle_storage(temp_dir: &TempDir) -> Arc<RegionStorage> {
    shared_storage(
        Config::builder()
            .region_dir(temp_dir.path().join("region"))
            .handle_cache_capacity(2)
            .build(),
    )
}

// =============================================================================
// Region Lock Tests
// =============================================================================

#[test]
fn test_region_lock_blocks_only_its_region() {
    let temp_dir = TempDir::new().unwrap();
    let storage = shared_storage(test_config(temp_dir.path()));

    let locked = ChunkPos::new(0, 0);
    let free = ChunkPos::new(32, 0);
    storage.write(locked, Some(&sample_chunk(locked)));
    storage.write(free, Some(&sample_chunk(free)));

    let guard = storage.lock_region(locked).unwrap().unwrap();

    let (blocked_tx, blocked_rx) = channel::bounded(1);
    let blocked = {
        let storage = Arc::clone(&storage);
        thread::spawn(move || {
            let doc = storage.read(ChunkPos::new(1, 1)).unwrap();
            blocked_tx.send(doc).unwrap();
        })
    };

    let (free_tx, free_rx) = channel::bounded(1);
    let unblocked = {
        let storage = Arc::clone(&storage);
        thread::spawn(move || {
            let doc = storage.read(free).unwrap();
            free_tx.send(doc).unwrap();
        })
    };

    // The other region completes while ours is held
    let free_doc = free_rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(free_doc, Some(sample_chunk(free)));

    assert_eq!(
        blocked_rx.recv_timeout(Duration::from_millis(200)),
        Err(RecvTimeoutError::Timeout)
    );

    drop(guard);
    let blocked_doc = blocked_rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(blocked_doc, None);

    blocked.join().unwrap();
    unblocked.join().unwrap();
}

#[test]
fn test_region_guard_exposes_container() {
    let temp_dir = TempDir::new().unwrap();
    let storage = shared_storage(test_config(temp_dir.path()));
    let pos = ChunkPos::new(-3, -3);
    storage.write(pos, Some(&sample_chunk(pos)));

    let mut guard = storage.lock_region(pos).unwrap().unwrap();
    assert_eq!(guard.region(), pos.region());
    assert!(guard.container().has_chunk(pos));
    assert!(!guard.container().has_chunk(ChunkPos::new(-4, -4)));
}

#[test]
fn test_held_region_does_not_stall_other_regions() {
    let temp_dir = TempDir::new().unwrap();
    let storage = two_handle_storage(&temp_dir);
    let (r1, r2, r3) = (ChunkPos::new(0, 0), ChunkPos::new(32, 0), ChunkPos::new(64, 0));
    storage.write(r1, Some(&sample_chunk(r1)));
    storage.write(r2, Some(&sample_chunk(r2)));

    let guard = storage.lock_region(r1).unwrap().unwrap();
    // r1 becomes the least recently used handle
    storage.read(r2).unwrap();

    let (absent_tx, absent_rx) = channel::bounded(1);
    let absent_reader = {
        let storage = Arc::clone(&storage);
        thread::spawn(move || absent_tx.send(storage.read(r3).unwrap()).unwrap())
    };
    let (cached_tx, cached_rx) = channel::bounded(1);
    let cached_reader = {
        let storage = Arc::clone(&storage);
        thread::spawn(move || cached_tx.send(storage.read(r2).unwrap()).unwrap())
    };

    assert_eq!(absent_rx.recv_timeout(Duration::from_secs(1)).unwrap(), None);
    assert_eq!(
        cached_rx.recv_timeout(Duration::from_secs(1)).unwrap(),
        Some(sample_chunk(r2))
    );
    // A read of a missing region evicts nothing
    assert!(storage.is_region_loaded(r1));

    drop(guard);
    absent_reader.join().unwrap();
    cached_reader.join().unwrap();
}

#[test]
fn test_evicting_held_region_defers_its_close() {
    let temp_dir = TempDir::new().unwrap();
    let storage = two_handle_storage(&temp_dir);
    let (r1, r2, r3) = (ChunkPos::new(0, 0), ChunkPos::new(32, 0), ChunkPos::new(64, 0));
    storage.write(r1, Some(&sample_chunk(r1)));
    storage.write(r2, Some(&sample_chunk(r2)));

    let mut guard = storage.lock_region(r1).unwrap().unwrap();
    storage.read(r2).unwrap();

    // Evicts r1 while this thread still holds it
    assert!(storage.write(r3, Some(&sample_chunk(r3))).is_success());
    assert!(!storage.is_region_loaded(r1));
    assert!(guard.is_retired());
    assert!(!guard.is_closed());

    // The holder keeps working on the evicted container
    let late = ChunkPos::new(1, 1);
    let encoded = encode(&sample_chunk(late)).unwrap();
    guard.container().write_chunk(late, &encoded[..]).unwrap();

    let (tx, rx) = channel::bounded(1);
    let reader = {
        let storage = Arc::clone(&storage);
        thread::spawn(move || tx.send(storage.read(r1).unwrap()).unwrap())
    };

    // No second container is opened while the first is still live
    assert_eq!(
        rx.recv_timeout(Duration::from_millis(200)),
        Err(RecvTimeoutError::Timeout)
    );

    drop(guard);
    assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), Some(sample_chunk(r1)));
    reader.join().unwrap();

    assert_eq!(storage.read(late).unwrap(), Some(sample_chunk(late)));
    assert_eq!(storage.read(r3).unwrap(), Some(sample_chunk(r3)));
}

// =============================================================================
// Parallel Writer Tests
// =============================================================================

#[test]
fn test_parallel_writers_lose_nothing() {
    let temp_dir = TempDir::new().unwrap();
    let storage = shared_storage(test_config(temp_dir.path()));
    let threads = 8;
    let per_thread = 40;

    let handles: Vec<_> = (0..threads)
        .map(|t| {
            let storage = Arc::clone(&storage);
            thread::spawn(move || {
                for i in 0..per_thread {
                    // Interleave: neighbouring threads share regions
                    let pos = ChunkPos::new(i * 7 - 100, t * 5);
                    assert!(storage.write(pos, Some(&sample_chunk(pos))).is_success());
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    for t in 0..threads {
        for i in 0..per_thread {
            let pos = ChunkPos::new(i * 7 - 100, t * 5);
            assert_eq!(storage.read(pos).unwrap(), Some(sample_chunk(pos)), "{}", pos);
        }
    }
}

#[test]
fn test_eviction_under_contention() {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder()
        .region_dir(temp_dir.path().join("region"))
        .handle_cache_capacity(2)
        .build();
    let storage = shared_storage(config);
    let regions = 6;

    let handles: Vec<_> = (0..4)
        .map(|t| {
            let storage = Arc::clone(&storage);
            thread::spawn(move || {
                for round in 0..30 {
                    let r = (round + t) % regions;
                    let pos = ChunkPos::new(r * 32 + t, round);
                    assert!(storage.write(pos, Some(&sample_chunk(pos))).is_success());
                    assert_eq!(storage.read(pos).unwrap(), Some(sample_chunk(pos)));
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert!(storage.loaded_regions().len() <= 2);
    storage.close().unwrap();

    for t in 0..4 {
        for round in 0..30 {
            let r = (round + t) % regions;
            let pos = ChunkPos::new(r * 32 + t, round);
            assert_eq!(storage.read(pos).unwrap(), Some(sample_chunk(pos)));
        }
    }
}

// =============================================================================
// Background Flusher Tests
// =============================================================================

#[test]
fn test_background_flusher_persists_writes() {
    let temp_dir = TempDir::new().unwrap();
    let storage = shared_storage(test_config(temp_dir.path()));
    let pos = ChunkPos::new(12, 12);
    let path = storage.region_path(pos.region());

    let flusher =
        BackgroundFlusher::spawn_with_interval(Arc::clone(&storage), Duration::from_millis(20))
            .unwrap();
    storage.write(pos, Some(&sample_chunk(pos)));

    let mut persisted = false;
    for _ in 0..100 {
        if fs::metadata(&path).map(|m| m.len() > 0).unwrap_or(false) {
            persisted = true;
            break;
        }
        thread::sleep(Duration::from_millis(20));
    }
    flusher.shutdown();

    assert!(persisted);
    assert!(storage.is_region_loaded(pos));
}

#[test]
fn test_flusher_shutdown_flushes_pending() {
    let temp_dir = TempDir::new().unwrap();
    let storage = shared_storage(test_config(temp_dir.path()));
    let pos = ChunkPos::new(0, 0);
    let path = storage.region_path(pos.region());

    // Interval long enough that only the final pass can run
    let flusher =
        BackgroundFlusher::spawn_with_interval(Arc::clone(&storage), Duration::from_secs(3600))
            .unwrap();
    storage.write(pos, Some(&sample_chunk(pos)));
    assert_eq!(fs::metadata(&path).unwrap().len(), 0);

    drop(flusher);
    assert!(fs::metadata(&path).unwrap().len() > 0);
}
