//! Document codec
//!
//! Encoding and decoding functions for the chunk document format.
//!
//! ## Binary Format (big-endian)
//! ```text
//! Root:      Kind(1)=10 | NameLen(2)=0 | Compound payload
//! Compound:  { Kind(1) | NameLen(2) | Name | Payload }* | End(1)=0
//! List:      ElemKind(1) | Count(4) | Payload*
//! String:    Len(2) | UTF-8 bytes
//! Arrays:    Count(4) | Elements
//! ```

use std::io::{self, Read};

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{RegionError, Result};

use super::{Compound, Tag, TagKind};

/// Deepest nesting accepted by the decoder
pub const MAX_DEPTH: usize = 512;

// =============================================================================
// Encoding
// =============================================================================

/// Encode a document to bytes
pub fn encode(document: &Compound) -> Result<Bytes> {
    let mut buf = BytesMut::with_capacity(256);
    buf.put_u8(TagKind::Compound as u8);
    put_string(&mut buf, "")?;
    put_compound(&mut buf, document, 0)?;
    Ok(buf.freeze())
}

fn put_string(buf: &mut BytesMut, value: &str) -> Result<()> {
    let len = u16::try_from(value.len()).map_err(|_| {
        RegionError::Codec(format!("String of {} bytes exceeds u16 length", value.len()))
    })?;
    buf.put_u16(len);
    buf.put_slice(value.as_bytes());
    Ok(())
}

fn put_len(buf: &mut BytesMut, len: usize) -> Result<()> {
    let len = i32::try_from(len)
        .map_err(|_| RegionError::Codec(format!("Sequence of {} elements is too long", len)))?;
    buf.put_i32(len);
    Ok(())
}

fn put_compound(buf: &mut BytesMut, compound: &Compound, depth: usize) -> Result<()> {
    check_depth(depth)?;
    for (name, tag) in compound.iter() {
        buf.put_u8(tag.kind() as u8);
        put_string(buf, name)?;
        put_payload(buf, tag, depth + 1)?;
    }
    buf.put_u8(TagKind::End as u8);
    Ok(())
}

fn put_payload(buf: &mut BytesMut, tag: &Tag, depth: usize) -> Result<()> {
    match tag {
        Tag::Byte(v) => buf.put_i8(*v),
        Tag::Short(v) => buf.put_i16(*v),
        Tag::Int(v) => buf.put_i32(*v),
        Tag::Long(v) => buf.put_i64(*v),
        Tag::Float(v) => buf.put_f32(*v),
        Tag::Double(v) => buf.put_f64(*v),
        Tag::ByteArray(bytes) => {
            put_len(buf, bytes.len())?;
            buf.put_slice(bytes);
        }
        Tag::String(s) => put_string(buf, s)?,
        Tag::List(items) => {
            check_depth(depth)?;
            let elem_kind = items.first().map(Tag::kind).unwrap_or(TagKind::End);
            if let Some(other) = items.iter().find(|t| t.kind() != elem_kind) {
                return Err(RegionError::Codec(format!(
                    "List mixes {:?} and {:?} elements",
                    elem_kind,
                    other.kind()
                )));
            }
            buf.put_u8(elem_kind as u8);
            put_len(buf, items.len())?;
            for item in items {
                put_payload(buf, item, depth + 1)?;
            }
        }
        Tag::Compound(c) => put_compound(buf, c, depth)?,
        Tag::IntArray(values) => {
            put_len(buf, values.len())?;
            for v in values {
                buf.put_i32(*v);
            }
        }
        Tag::LongArray(values) => {
            put_len(buf, values.len())?;
            for v in values {
                buf.put_i64(*v);
            }
        }
    }
    Ok(())
}

fn check_depth(depth: usize) -> Result<()> {
    if depth > MAX_DEPTH {
        return Err(RegionError::Codec(format!(
            "Document nesting exceeds {} levels",
            MAX_DEPTH
        )));
    }
    Ok(())
}

// =============================================================================
// Decoding
// =============================================================================

/// Decode a document from bytes
///
/// The root must be a compound; trailing bytes are rejected.
pub fn decode(bytes: &[u8]) -> Result<Compound> {
    let mut reader = TagReader::new(bytes);
    let kind = reader.read_kind()?;
    if kind != TagKind::Compound {
        return Err(RegionError::Codec(format!(
            "Root tag must be a compound, got {:?}",
            kind
        )));
    }
    let _root_name = reader.read_string()?;
    let root = reader.read_compound(0)?;

    let remaining = reader.into_inner();
    if !remaining.is_empty() {
        return Err(RegionError::Codec(format!(
            "{} trailing bytes after root compound",
            remaining.len()
        )));
    }
    Ok(root)
}

/// Pull-style reader shared by `decode` and the streaming scanner
pub(crate) struct TagReader<R> {
    inner: R,
}

impl<R: Read> TagReader<R> {
    pub(crate) fn new(inner: R) -> Self {
        Self { inner }
    }

    pub(crate) fn into_inner(self) -> R {
        self.inner
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        self.inner.read_exact(buf).map_err(|e| {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                RegionError::Codec("Document truncated".to_string())
            } else {
                RegionError::Io(e)
            }
        })
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut buf = [0u8; N];
        self.read_exact(&mut buf)?;
        Ok(buf)
    }

    pub(crate) fn read_kind(&mut self) -> Result<TagKind> {
        let [id] = self.read_array::<1>()?;
        TagKind::from_u8(id).ok_or_else(|| RegionError::Codec(format!("Unknown tag kind: {}", id)))
    }

    pub(crate) fn read_string(&mut self) -> Result<String> {
        let len = u16::from_be_bytes(self.read_array()?) as usize;
        let mut buf = vec![0u8; len];
        self.read_exact(&mut buf)?;
        String::from_utf8(buf).map_err(|e| RegionError::Codec(format!("Invalid UTF-8 string: {}", e)))
    }

    fn read_len(&mut self) -> Result<usize> {
        let len = i32::from_be_bytes(self.read_array()?);
        usize::try_from(len).map_err(|_| RegionError::Codec(format!("Negative length: {}", len)))
    }

    pub(crate) fn read_compound(&mut self, depth: usize) -> Result<Compound> {
        check_depth(depth)?;
        let mut compound = Compound::new();
        loop {
            let kind = self.read_kind()?;
            if kind == TagKind::End {
                return Ok(compound);
            }
            let name = self.read_string()?;
            let value = self.read_payload(kind, depth + 1)?;
            compound.insert(name, value);
        }
    }

    pub(crate) fn read_payload(&mut self, kind: TagKind, depth: usize) -> Result<Tag> {
        let tag = match kind {
            TagKind::End => {
                return Err(RegionError::Codec("Unexpected End tag payload".to_string()))
            }
            TagKind::Byte => Tag::Byte(i8::from_be_bytes(self.read_array()?)),
            TagKind::Short => Tag::Short(i16::from_be_bytes(self.read_array()?)),
            TagKind::Int => Tag::Int(i32::from_be_bytes(self.read_array()?)),
            TagKind::Long => Tag::Long(i64::from_be_bytes(self.read_array()?)),
            TagKind::Float => Tag::Float(f32::from_be_bytes(self.read_array()?)),
            TagKind::Double => Tag::Double(f64::from_be_bytes(self.read_array()?)),
            TagKind::ByteArray => {
                let len = self.read_len()?;
                let mut bytes = Vec::new();
                (&mut self.inner)
                    .take(len as u64)
                    .read_to_end(&mut bytes)?;
                if bytes.len() != len {
                    return Err(RegionError::Codec("Document truncated".to_string()));
                }
                Tag::ByteArray(bytes)
            }
            TagKind::String => Tag::String(self.read_string()?),
            TagKind::List => {
                check_depth(depth)?;
                let elem_kind = self.read_kind()?;
                let len = self.read_len()?;
                if elem_kind == TagKind::End && len > 0 {
                    return Err(RegionError::Codec(
                        "Non-empty list of End elements".to_string(),
                    ));
                }
                let mut items = Vec::with_capacity(len.min(1024));
                for _ in 0..len {
                    items.push(self.read_payload(elem_kind, depth + 1)?);
                }
                Tag::List(items)
            }
            TagKind::Compound => Tag::Compound(self.read_compound(depth)?),
            TagKind::IntArray => {
                let len = self.read_len()?;
                let mut values = Vec::with_capacity(len.min(4096));
                for _ in 0..len {
                    values.push(i32::from_be_bytes(self.read_array()?));
                }
                Tag::IntArray(values)
            }
            TagKind::LongArray => {
                let len = self.read_len()?;
                let mut values = Vec::with_capacity(len.min(4096));
                for _ in 0..len {
                    values.push(i64::from_be_bytes(self.read_array()?));
                }
                Tag::LongArray(values)
            }
        };
        Ok(tag)
    }

    /// Consume a payload without materializing it
    pub(crate) fn skip_payload(&mut self, kind: TagKind, depth: usize) -> Result<()> {
        match kind {
            TagKind::End => {
                return Err(RegionError::Codec("Unexpected End tag payload".to_string()))
            }
            TagKind::Byte => self.skip_bytes(1)?,
            TagKind::Short => self.skip_bytes(2)?,
            TagKind::Int | TagKind::Float => self.skip_bytes(4)?,
            TagKind::Long | TagKind::Double => self.skip_bytes(8)?,
            TagKind::ByteArray => {
                let len = self.read_len()?;
                self.skip_bytes(len as u64)?;
            }
            TagKind::String => {
                let len = u16::from_be_bytes(self.read_array()?);
                self.skip_bytes(len as u64)?;
            }
            TagKind::List => {
                check_depth(depth)?;
                let elem_kind = self.read_kind()?;
                let len = self.read_len()?;
                if elem_kind == TagKind::End {
                    return Ok(());
                }
                for _ in 0..len {
                    self.skip_payload(elem_kind, depth + 1)?;
                }
            }
            TagKind::Compound => {
                check_depth(depth)?;
                loop {
                    let kind = self.read_kind()?;
                    if kind == TagKind::End {
                        break;
                    }
                    let len = u16::from_be_bytes(self.read_array()?);
                    self.skip_bytes(len as u64)?;
                    self.skip_payload(kind, depth + 1)?;
                }
            }
            TagKind::IntArray => {
                let len = self.read_len()?;
                self.skip_bytes(len as u64 * 4)?;
            }
            TagKind::LongArray => {
                let len = self.read_len()?;
                self.skip_bytes(len as u64 * 8)?;
            }
        }
        Ok(())
    }

    fn skip_bytes(&mut self, count: u64) -> Result<()> {
        let skipped = io::copy(&mut (&mut self.inner).take(count), &mut io::sink())?;
        if skipped != count {
            return Err(RegionError::Codec("Document truncated".to_string()));
        }
        Ok(())
    }
}
