//! JVM class-file constant pool rewriting
//!
//! Parses the constant pool into typed records and rewrites only Utf8
//! entries that are class references (reachable from `CONSTANT_Class` or
//! `CONSTANT_Package` records) or that parse as field/method descriptors.
//! Utf8 entries that back `CONSTANT_String` literals are left alone, and at
//! no point is a raw byte-pattern substitution applied.
//!
//! Only Utf8 *contents* change; constant pool indices are untouched, so the
//! remainder of the class file (interfaces, fields, methods, attributes) is
//! copied through verbatim and stays valid.

use super::RelocationMap;
use std::collections::HashSet;
use thiserror::Error;

/// Errors from parsing or re-emitting a class file
#[derive(Debug, Error)]
pub enum ClassFileError {
    /// Input ended inside a structure
    #[error("truncated class file at offset {0}")]
    Truncated(usize),

    /// Not a class file
    #[error("bad class file magic: {0:#010x}")]
    BadMagic(u32),

    /// Constant pool tag this parser does not know
    #[error("unknown constant pool tag {tag} at index {index}")]
    UnknownTag { tag: u8, index: u16 },

    /// A rewritten Utf8 entry no longer fits in a u16 length
    #[error("rewritten constant exceeds class file limits")]
    Utf8TooLong,
}

const MAGIC: u32 = 0xCAFE_BABE;

const TAG_UTF8: u8 = 1;
const TAG_INTEGER: u8 = 3;
const TAG_FLOAT: u8 = 4;
const TAG_LONG: u8 = 5;
const TAG_DOUBLE: u8 = 6;
const TAG_CLASS: u8 = 7;
const TAG_STRING: u8 = 8;
const TAG_FIELDREF: u8 = 9;
const TAG_METHODREF: u8 = 10;
const TAG_INTERFACE_METHODREF: u8 = 11;
const TAG_NAME_AND_TYPE: u8 = 12;
const TAG_METHOD_HANDLE: u8 = 15;
const TAG_METHOD_TYPE: u8 = 16;
const TAG_DYNAMIC: u8 = 17;
const TAG_INVOKE_DYNAMIC: u8 = 18;
const TAG_MODULE: u8 = 19;
const TAG_PACKAGE: u8 = 20;

/// One constant pool record, payload kept verbatim unless the rewriter
/// needs to look inside it
enum PoolEntry {
    Utf8(Vec<u8>),
    /// `CONSTANT_Class`: index of the Utf8 holding the internal name
    Class(u16),
    /// `CONSTANT_String`: index of the Utf8 holding the literal
    StringRef(u16),
    /// `CONSTANT_Package`: index of the Utf8 holding the package name
    Package(u16),
    /// Anything else, copied through untouched
    Other { tag: u8, payload: Vec<u8> },
}

impl PoolEntry {
    /// Long and Double constants take two constant pool slots
    fn slots(&self) -> u16 {
        match self {
            PoolEntry::Other { tag, .. } if *tag == TAG_LONG || *tag == TAG_DOUBLE => 2,
            _ => 1,
        }
    }
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn bytes(&mut self, n: usize) -> Result<&'a [u8], ClassFileError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.buf.len())
            .ok_or(ClassFileError::Truncated(self.pos))?;
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, ClassFileError> {
        Ok(self.bytes(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, ClassFileError> {
        let b = self.bytes(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32, ClassFileError> {
        let b = self.bytes(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }
}

/// Rewrite relocated namespace references in a class file
///
/// Returns `Ok(None)` when nothing in the constant pool matched the map, so
/// callers can keep the original bytes.
pub(crate) fn rewrite_class(
    bytes: &[u8],
    map: &RelocationMap,
) -> Result<Option<Vec<u8>>, ClassFileError> {
    let mut reader = Reader::new(bytes);

    let magic = reader.u32()?;
    if magic != MAGIC {
        return Err(ClassFileError::BadMagic(magic));
    }
    reader.u16()?; // minor version
    reader.u16()?; // major version
    let pool_count = reader.u16()?;

    // Parse the pool; entries keep their declared order, indexed slots are
    // implicit in the entry widths.
    let mut entries: Vec<(u16, PoolEntry)> = Vec::new();
    let mut index: u32 = 1;
    while index < u32::from(pool_count) {
        let entry = read_entry(&mut reader, index as u16)?;
        let slots = u32::from(entry.slots());
        entries.push((index as u16, entry));
        index += slots;
    }
    let tail = &bytes[reader.pos..];

    // Classify which Utf8 entries hold class/package names and which back
    // string literals.
    let mut name_targets: HashSet<u16> = HashSet::new();
    let mut literal_targets: HashSet<u16> = HashSet::new();
    for (_, entry) in &entries {
        match entry {
            PoolEntry::Class(utf8) | PoolEntry::Package(utf8) => {
                name_targets.insert(*utf8);
            }
            PoolEntry::StringRef(utf8) => {
                literal_targets.insert(*utf8);
            }
            _ => {}
        }
    }

    let mut changed = false;
    for (index, entry) in &mut entries {
        let PoolEntry::Utf8(content) = entry else {
            continue;
        };
        // Class names are ASCII in practice; anything that is not valid
        // UTF-8 cannot match a relocation prefix either way.
        let Ok(text) = std::str::from_utf8(content) else {
            continue;
        };

        let rewritten = if name_targets.contains(index) {
            rewrite_internal_name(text, map)
        } else if !literal_targets.contains(index) {
            rewrite_descriptor(text, map)
        } else {
            None
        };

        if let Some(new_text) = rewritten {
            if new_text.len() > u16::MAX as usize {
                return Err(ClassFileError::Utf8TooLong);
            }
            *content = new_text.into_bytes();
            changed = true;
        }
    }

    if !changed {
        return Ok(None);
    }

    // Re-emit: header, rewritten pool, untouched remainder.
    let mut out = Vec::with_capacity(bytes.len() + 64);
    out.extend_from_slice(&MAGIC.to_be_bytes());
    out.extend_from_slice(&bytes[4..10]);
    for (_, entry) in &entries {
        write_entry(&mut out, entry);
    }
    out.extend_from_slice(tail);
    Ok(Some(out))
}

fn read_entry(reader: &mut Reader<'_>, index: u16) -> Result<PoolEntry, ClassFileError> {
    let tag = reader.u8()?;
    let entry = match tag {
        TAG_UTF8 => {
            let len = reader.u16()? as usize;
            PoolEntry::Utf8(reader.bytes(len)?.to_vec())
        }
        TAG_CLASS => PoolEntry::Class(reader.u16()?),
        TAG_STRING => PoolEntry::StringRef(reader.u16()?),
        TAG_PACKAGE => PoolEntry::Package(reader.u16()?),
        TAG_INTEGER | TAG_FLOAT => PoolEntry::Other {
            tag,
            payload: reader.bytes(4)?.to_vec(),
        },
        TAG_LONG | TAG_DOUBLE => PoolEntry::Other {
            tag,
            payload: reader.bytes(8)?.to_vec(),
        },
        TAG_FIELDREF | TAG_METHODREF | TAG_INTERFACE_METHODREF | TAG_NAME_AND_TYPE
        | TAG_DYNAMIC | TAG_INVOKE_DYNAMIC => PoolEntry::Other {
            tag,
            payload: reader.bytes(4)?.to_vec(),
        },
        TAG_METHOD_HANDLE => PoolEntry::Other {
            tag,
            payload: reader.bytes(3)?.to_vec(),
        },
        TAG_METHOD_TYPE | TAG_MODULE => PoolEntry::Other {
            tag,
            payload: reader.bytes(2)?.to_vec(),
        },
        tag => return Err(ClassFileError::UnknownTag { tag, index }),
    };
    Ok(entry)
}

fn write_entry(out: &mut Vec<u8>, entry: &PoolEntry) {
    match entry {
        PoolEntry::Utf8(content) => {
            out.push(TAG_UTF8);
            out.extend_from_slice(&(content.len() as u16).to_be_bytes());
            out.extend_from_slice(content);
        }
        PoolEntry::Class(utf8) => {
            out.push(TAG_CLASS);
            out.extend_from_slice(&utf8.to_be_bytes());
        }
        PoolEntry::StringRef(utf8) => {
            out.push(TAG_STRING);
            out.extend_from_slice(&utf8.to_be_bytes());
        }
        PoolEntry::Package(utf8) => {
            out.push(TAG_PACKAGE);
            out.extend_from_slice(&utf8.to_be_bytes());
        }
        PoolEntry::Other { tag, payload } => {
            out.push(*tag);
            out.extend_from_slice(payload);
        }
    }
}

/// Rewrite an internal class or package name (slash form)
///
/// `CONSTANT_Class` entries for array types carry a field descriptor
/// instead of a plain name, so those route through the descriptor grammar.
fn rewrite_internal_name(name: &str, map: &RelocationMap) -> Option<String> {
    if name.starts_with('[') {
        rewrite_field_descriptor(name, map)
    } else {
        map.relocate_class_name(name)
    }
}

/// Rewrite a field or method descriptor, or return `None` if the string is
/// not a descriptor or contains no relocated reference
fn rewrite_descriptor(s: &str, map: &RelocationMap) -> Option<String> {
    if s.starts_with('(') {
        rewrite_method_descriptor(s, map)
    } else {
        rewrite_field_descriptor(s, map)
    }
}

fn rewrite_field_descriptor(s: &str, map: &RelocationMap) -> Option<String> {
    let mut out = String::with_capacity(s.len());
    let mut changed = false;
    let end = rewrite_type(s, 0, &mut out, map, &mut changed)?;
    if end == s.len() && changed {
        Some(out)
    } else {
        None
    }
}

fn rewrite_method_descriptor(s: &str, map: &RelocationMap) -> Option<String> {
    let bytes = s.as_bytes();
    let mut out = String::with_capacity(s.len());
    out.push('(');
    let mut changed = false;
    let mut pos = 1;
    while bytes.get(pos) != Some(&b')') {
        pos = rewrite_type(s, pos, &mut out, map, &mut changed)?;
    }
    out.push(')');
    pos += 1;
    if bytes.get(pos) == Some(&b'V') {
        out.push('V');
        pos += 1;
    } else {
        pos = rewrite_type(s, pos, &mut out, map, &mut changed)?;
    }
    if pos == s.len() && changed {
        Some(out)
    } else {
        None
    }
}

/// Consume one type from a descriptor, appending the (possibly relocated)
/// form to `out`. Returns the position after the type, or `None` if the
/// input is not descriptor-shaped at `pos`.
fn rewrite_type(
    s: &str,
    mut pos: usize,
    out: &mut String,
    map: &RelocationMap,
    changed: &mut bool,
) -> Option<usize> {
    let bytes = s.as_bytes();
    while bytes.get(pos) == Some(&b'[') {
        out.push('[');
        pos += 1;
    }
    match bytes.get(pos)? {
        b'B' | b'C' | b'D' | b'F' | b'I' | b'J' | b'S' | b'Z' => {
            out.push(bytes[pos] as char);
            Some(pos + 1)
        }
        b'L' => {
            let semi = s[pos + 1..].find(';')? + pos + 1;
            let name = &s[pos + 1..semi];
            out.push('L');
            match map.relocate_class_name(name) {
                Some(renamed) => {
                    out.push_str(&renamed);
                    *changed = true;
                }
                None => out.push_str(name),
            }
            out.push(';');
            Some(semi + 1)
        }
        _ => None,
    }
}
