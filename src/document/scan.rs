//! Streaming document scan
//!
//! Walks an encoded document straight from a reader and lets a visitor decide,
//! entry by entry, what to materialize. Used for cheap metadata lookups that
//! should not build the whole tree.

use std::collections::{BTreeMap, BTreeSet};
use std::io::Read;

use crate::error::{RegionError, Result};

use super::codec::TagReader;
use super::{Tag, TagKind};

/// Visitor decision for one entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanControl {
    /// Descend into a compound, or materialize any other value
    Continue,
    /// Discard the payload without materializing it
    Skip,
    /// Stop the scan; the rest of the stream is left unread
    Halt,
}

/// How a scan ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanOutcome {
    Completed,
    Halted,
}

/// Receives entries as they are parsed
pub trait StreamVisitor {
    /// Called with each entry header before its payload is consumed
    fn visit_entry(&mut self, kind: TagKind, name: &str) -> ScanControl;

    /// Called with a materialized non-compound value
    fn visit_value(&mut self, _name: &str, _value: Tag) -> ScanControl {
        ScanControl::Continue
    }

    /// Called when a compound entered with `Continue` ends
    fn leave_compound(&mut self, _name: &str) -> ScanControl {
        ScanControl::Continue
    }
}

/// Scan an encoded document from `reader`
pub fn scan<R: Read>(reader: R, visitor: &mut dyn StreamVisitor) -> Result<ScanOutcome> {
    let mut reader = TagReader::new(reader);
    let kind = reader.read_kind()?;
    if kind != TagKind::Compound {
        return Err(RegionError::Codec(format!(
            "Root tag must be a compound, got {:?}",
            kind
        )));
    }
    let _root_name = reader.read_string()?;
    scan_compound(&mut reader, visitor, 0)
}

fn scan_compound<R: Read>(
    reader: &mut TagReader<R>,
    visitor: &mut dyn StreamVisitor,
    depth: usize,
) -> Result<ScanOutcome> {
    if depth > super::MAX_DEPTH {
        return Err(RegionError::Codec(format!(
            "Document nesting exceeds {} levels",
            super::MAX_DEPTH
        )));
    }

    loop {
        let kind = reader.read_kind()?;
        if kind == TagKind::End {
            return Ok(ScanOutcome::Completed);
        }
        let name = reader.read_string()?;

        match visitor.visit_entry(kind, &name) {
            ScanControl::Halt => return Ok(ScanOutcome::Halted),
            ScanControl::Skip => reader.skip_payload(kind, depth + 1)?,
            ScanControl::Continue if kind == TagKind::Compound => {
                if scan_compound(reader, visitor, depth + 1)? == ScanOutcome::Halted {
                    return Ok(ScanOutcome::Halted);
                }
                if visitor.leave_compound(&name) == ScanControl::Halt {
                    return Ok(ScanOutcome::Halted);
                }
            }
            ScanControl::Continue => {
                let value = reader.read_payload(kind, depth + 1)?;
                if visitor.visit_value(&name, value) == ScanControl::Halt {
                    return Ok(ScanOutcome::Halted);
                }
            }
        }
    }
}

// =============================================================================
// CollectFields
// =============================================================================

/// Visitor collecting values at dotted paths, e.g. `"Level.Status"`
///
/// Everything off the wanted paths is skipped unread, and the scan halts as
/// soon as every path has been found. Only non-compound values are collected.
#[derive(Debug, Default)]
pub struct CollectFields {
    pending: BTreeSet<String>,
    found: BTreeMap<String, Tag>,
    stack: Vec<String>,
}

impl CollectFields {
    pub fn new<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            pending: paths.into_iter().map(Into::into).collect(),
            found: BTreeMap::new(),
            stack: Vec::new(),
        }
    }

    pub fn get(&self, path: &str) -> Option<&Tag> {
        self.found.get(path)
    }

    pub fn found(&self) -> &BTreeMap<String, Tag> {
        &self.found
    }

    pub fn into_found(self) -> BTreeMap<String, Tag> {
        self.found
    }

    fn full_path(&self, name: &str) -> String {
        if self.stack.is_empty() {
            name.to_string()
        } else {
            format!("{}.{}", self.stack.join("."), name)
        }
    }
}

impl StreamVisitor for CollectFields {
    fn visit_entry(&mut self, kind: TagKind, name: &str) -> ScanControl {
        if self.pending.is_empty() {
            return ScanControl::Halt;
        }
        let path = self.full_path(name);

        if kind == TagKind::Compound {
            let prefix = format!("{}.", path);
            if self.pending.iter().any(|p| p.starts_with(&prefix)) {
                self.stack.push(name.to_string());
                return ScanControl::Continue;
            }
            return ScanControl::Skip;
        }

        if self.pending.contains(&path) {
            ScanControl::Continue
        } else {
            ScanControl::Skip
        }
    }

    fn visit_value(&mut self, name: &str, value: Tag) -> ScanControl {
        let path = self.full_path(name);
        self.pending.remove(&path);
        self.found.insert(path, value);
        if self.pending.is_empty() {
            ScanControl::Halt
        } else {
            ScanControl::Continue
        }
    }

    fn leave_compound(&mut self, _name: &str) -> ScanControl {
        self.stack.pop();
        ScanControl::Continue
    }
}
