//! Tests for the streaming document scanner
//!
//! These tests verify:
//! - Visitors see entries in stream order
//! - Skipped payloads of every kind are consumed correctly
//! - Halting stops the scan early
//! - CollectFields gathers dotted paths

use regionstore::document::{
    encode, scan, CollectFields, Compound, ScanControl, ScanOutcome, StreamVisitor, Tag, TagKind,
};
use regionstore::RegionError;

/// Records every entry and skips all payloads
#[derive(Default)]
struct EntryLog {
    entries: Vec<(TagKind, String)>,
    halt_at: Option<String>,
}

impl StreamVisitor for EntryLog {
    fn visit_entry(&mut self, kind: TagKind, name: &str) -> ScanControl {
        self.entries.push((kind, name.to_string()));
        if self.halt_at.as_deref() == Some(name) {
            return ScanControl::Halt;
        }
        if kind == TagKind::Compound {
            ScanControl::Continue
        } else {
            ScanControl::Skip
        }
    }
}

fn chunk_document() -> Compound {
    let level = Compound::new()
        .with("Biomes", Tag::IntArray(vec![1; 256]))
        .with("Heightmap", Tag::LongArray(vec![7; 37]))
        .with("Sections", Tag::List(vec![
            Compound::new().with("Y", Tag::Byte(0)).with("Blocks", Tag::ByteArray(vec![1; 4096])).into(),
            Compound::new().with("Y", Tag::Byte(1)).with("Blocks", Tag::ByteArray(vec![2; 4096])).into(),
        ]))
        .with("Status", "full")
        .with("xPos", 4)
        .with("zPos", -2);

    Compound::new()
        .with("DataVersion", 3700)
        .with("Level", level)
}

// =============================================================================
// Visitor Tests
// =============================================================================

#[test]
fn test_entries_visited_in_order() {
    let encoded = encode(&chunk_document()).unwrap();
    let mut log = EntryLog::default();

    let outcome = scan(&encoded[..], &mut log).unwrap();
    assert_eq!(outcome, ScanOutcome::Completed);

    let names: Vec<&str> = log.entries.iter().map(|(_, n)| n.as_str()).collect();
    assert_eq!(
        names,
        vec!["DataVersion", "Level", "Biomes", "Heightmap", "Sections", "Status", "xPos", "zPos"]
    );
    assert_eq!(log.entries[4].0, TagKind::List);
}

#[test]
fn test_halt_stops_early() {
    let encoded = encode(&chunk_document()).unwrap();
    let mut log = EntryLog {
        halt_at: Some("Heightmap".to_string()),
        ..Default::default()
    };

    let outcome = scan(&encoded[..], &mut log).unwrap();

    assert_eq!(outcome, ScanOutcome::Halted);
    assert_eq!(log.entries.last().unwrap().1, "Heightmap");
    assert_eq!(log.entries.len(), 4);
}

#[test]
fn test_truncated_stream_errors() {
    let encoded = encode(&chunk_document()).unwrap();
    let cut = &encoded[..encoded.len() - 10];
    let mut log = EntryLog::default();

    assert!(matches!(scan(cut, &mut log), Err(RegionError::Codec(_))));
}

#[test]
fn test_non_compound_root_errors() {
    let raw = [8u8, 0, 0, 0, 1, b'x'];
    let mut log = EntryLog::default();
    assert!(matches!(scan(&raw[..], &mut log), Err(RegionError::Codec(_))));
}

// =============================================================================
// CollectFields Tests
// =============================================================================

#[test]
fn test_collect_nested_fields() {
    let encoded = encode(&chunk_document()).unwrap();
    let mut collector = CollectFields::new(["Level.Status", "Level.xPos", "DataVersion"]);

    let outcome = scan(&encoded[..], &mut collector).unwrap();

    assert_eq!(outcome, ScanOutcome::Halted);
    assert_eq!(collector.get("Level.Status"), Some(&Tag::from("full")));
    assert_eq!(collector.get("Level.xPos").and_then(Tag::as_int), Some(4));
    assert_eq!(collector.get("DataVersion").and_then(Tag::as_int), Some(3700));
    assert!(collector.get("Level.zPos").is_none());
}

#[test]
fn test_collect_missing_field_completes() {
    let encoded = encode(&chunk_document()).unwrap();
    let mut collector = CollectFields::new(["Level.Missing"]);

    let outcome = scan(&encoded[..], &mut collector).unwrap();

    assert_eq!(outcome, ScanOutcome::Completed);
    assert!(collector.found().is_empty());
}

#[test]
fn test_collect_list_value() {
    let encoded = encode(&chunk_document()).unwrap();
    let mut collector = CollectFields::new(["Level.Sections"]);

    scan(&encoded[..], &mut collector).unwrap();

    let found = collector.into_found();
    let sections = found["Level.Sections"].as_list().unwrap();
    assert_eq!(sections.len(), 2);
    assert_eq!(
        sections[1].as_compound().unwrap().get("Y"),
        Some(&Tag::Byte(1))
    );
}
