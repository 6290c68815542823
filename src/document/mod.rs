//! Document Module
//!
//! Self-describing tagged tree stored in each chunk slot.
//!
//! ## Responsibilities
//! - In-memory model of a chunk document (`Tag`, `Compound`)
//! - Binary encoding / decoding (`codec`)
//! - Streaming partial parse for metadata scans (`scan`)
//!
//! ## Tag Kinds
//! ```text
//! 0 End        4 Long       8 String     12 LongArray
//! 1 Byte       5 Float      9 List
//! 2 Short      6 Double    10 Compound
//! 3 Int        7 ByteArray 11 IntArray
//! ```

mod codec;
mod scan;

use std::collections::BTreeMap;

pub use codec::{decode, encode, MAX_DEPTH};
pub use scan::{scan, CollectFields, ScanControl, ScanOutcome, StreamVisitor};

/// A chunk document is a root compound
pub type Document = Compound;

/// Wire identifier of a tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TagKind {
    End = 0,
    Byte = 1,
    Short = 2,
    Int = 3,
    Long = 4,
    Float = 5,
    Double = 6,
    ByteArray = 7,
    String = 8,
    List = 9,
    Compound = 10,
    IntArray = 11,
    LongArray = 12,
}

impl TagKind {
    pub fn from_u8(id: u8) -> Option<Self> {
        let kind = match id {
            0 => TagKind::End,
            1 => TagKind::Byte,
            2 => TagKind::Short,
            3 => TagKind::Int,
            4 => TagKind::Long,
            5 => TagKind::Float,
            6 => TagKind::Double,
            7 => TagKind::ByteArray,
            8 => TagKind::String,
            9 => TagKind::List,
            10 => TagKind::Compound,
            11 => TagKind::IntArray,
            12 => TagKind::LongArray,
            _ => return None,
        };
        Some(kind)
    }
}

/// A single value in a document
#[derive(Debug, Clone, PartialEq)]
pub enum Tag {
    Byte(i8),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    ByteArray(Vec<u8>),
    String(String),
    /// Homogeneous list; the element kind is taken from the first element
    List(Vec<Tag>),
    Compound(Compound),
    IntArray(Vec<i32>),
    LongArray(Vec<i64>),
}

impl Tag {
    pub fn kind(&self) -> TagKind {
        match self {
            Tag::Byte(_) => TagKind::Byte,
            Tag::Short(_) => TagKind::Short,
            Tag::Int(_) => TagKind::Int,
            Tag::Long(_) => TagKind::Long,
            Tag::Float(_) => TagKind::Float,
            Tag::Double(_) => TagKind::Double,
            Tag::ByteArray(_) => TagKind::ByteArray,
            Tag::String(_) => TagKind::String,
            Tag::List(_) => TagKind::List,
            Tag::Compound(_) => TagKind::Compound,
            Tag::IntArray(_) => TagKind::IntArray,
            Tag::LongArray(_) => TagKind::LongArray,
        }
    }

    pub fn as_int(&self) -> Option<i32> {
        match self {
            Tag::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Tag::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Tag]> {
        match self {
            Tag::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_compound(&self) -> Option<&Compound> {
        match self {
            Tag::Compound(c) => Some(c),
            _ => None,
        }
    }
}

impl From<Compound> for Tag {
    fn from(value: Compound) -> Self {
        Tag::Compound(value)
    }
}

impl From<i32> for Tag {
    fn from(value: i32) -> Self {
        Tag::Int(value)
    }
}

impl From<i64> for Tag {
    fn from(value: i64) -> Self {
        Tag::Long(value)
    }
}

impl From<&str> for Tag {
    fn from(value: &str) -> Self {
        Tag::String(value.to_string())
    }
}

impl From<String> for Tag {
    fn from(value: String) -> Self {
        Tag::String(value)
    }
}

/// Named fields, kept in key order so encoding is deterministic
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Compound {
    fields: BTreeMap<String, Tag>,
}

impl Compound {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Tag>) -> Option<Tag> {
        self.fields.insert(name.into(), value.into())
    }

    /// Builder-style insert
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Tag>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Tag> {
        self.fields.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Tag> {
        self.fields.get_mut(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<Tag> {
        self.fields.remove(name)
    }

    pub fn contains_key(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn get_int(&self, name: &str) -> Option<i32> {
        self.get(name).and_then(Tag::as_int)
    }

    pub fn get_compound(&self, name: &str) -> Option<&Compound> {
        self.get(name).and_then(Tag::as_compound)
    }

    /// Nested compound, inserted empty when absent or of another kind
    pub fn compound_entry(&mut self, name: &str) -> &mut Compound {
        if !matches!(self.fields.get(name), Some(Tag::Compound(_))) {
            self.fields
                .insert(name.to_string(), Tag::Compound(Compound::new()));
        }
        match self.fields.get_mut(name) {
            Some(Tag::Compound(c)) => c,
            _ => unreachable!("compound entry inserted above"),
        }
    }

    /// List field; absent or non-list fields read as empty
    pub fn get_list(&self, name: &str) -> &[Tag] {
        self.get(name).and_then(Tag::as_list).unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Tag)> {
        self.fields.iter()
    }
}

impl FromIterator<(String, Tag)> for Compound {
    fn from_iter<I: IntoIterator<Item = (String, Tag)>>(iter: I) -> Self {
        Self {
            fields: iter.into_iter().collect(),
        }
    }
}
