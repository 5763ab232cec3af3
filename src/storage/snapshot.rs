//! Snapshot encoding and decoding.

use super::{SnapshotError, SnapshotResult};
use crate::interner::{Interner, StrId};
use crate::name::{CompoundName, PredicateName};
use crate::relation::Registry;
use crate::value::encoding::{decode, encode_into};
use crate::value::{Row, Value};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use tracing::{debug, info};

pub const MAGIC: &[u8; 8] = b"DDSNAP01";
const FLAG_CHECKSUM: u8 = 1;

/// Rows of one relation as read from a snapshot, with file-local ids.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRelation {
    pub objects: Vec<u32>,
    pub attributes: Vec<u32>,
    pub arity: usize,
    pub reaches: bool,
    pub rows: Vec<Row>,
}

/// Decoded snapshot file
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    pub strings: HashMap<u32, String>,
    pub relations: Vec<StoredRelation>,
}

impl Snapshot {
    pub fn row_count(&self) -> usize {
        self.relations.iter().map(|r| r.rows.len()).sum()
    }

    /// Relations and rows translated into the ids of `strings`, columns in
    /// the layout the translated names imply.
    pub fn relations(&self, strings: &mut Interner) -> SnapshotResult<Vec<(PredicateName, Vec<Row>)>> {
        let mut remap: HashMap<u32, StrId> = HashMap::with_capacity(self.strings.len());
        for (&old, text) in &self.strings {
            remap.insert(old, strings.intern(text));
        }
        let id = |old: u32| remap.get(&old).copied().ok_or(SnapshotError::UnknownString(old));

        let mut out = Vec::with_capacity(self.relations.len());
        for stored in &self.relations {
            let objects = CompoundName::new(stored.objects.iter().map(|&o| id(o)).collect::<SnapshotResult<Vec<_>>>()?);
            let attributes: Vec<StrId> = stored.attributes.iter().map(|&a| id(a)).collect::<SnapshotResult<_>>()?;
            let name = if stored.arity == 0 {
                PredicateName::nullary(objects)
            } else {
                let base = PredicateName::new(objects, CompoundName::new(attributes.iter().copied()));
                if stored.reaches {
                    PredicateName::closure_of(&base).unwrap_or(base)
                } else {
                    base
                }
            };

            // Stored column i+1 carries attributes[i]; find where it lands now.
            let mut layout = vec![0];
            for attribute in &attributes {
                layout.push(name.column_of(*attribute).unwrap_or(0));
            }
            let mut rows = Vec::with_capacity(stored.rows.len());
            for row in &stored.rows {
                let mut translated = vec![Value::None; row.len()];
                for (column, value) in row.iter().enumerate() {
                    let target = layout.get(column).copied().unwrap_or(column);
                    translated[target] = remap_value(*value, &remap)?;
                }
                rows.push(translated);
            }
            out.push((name, rows));
        }
        Ok(out)
    }
}

fn remap_value(value: Value, remap: &HashMap<u32, StrId>) -> SnapshotResult<Value> {
    let lookup = |id: StrId| remap.get(&id.0).copied().ok_or(SnapshotError::UnknownString(id.0));
    Ok(match value {
        Value::String(id) => Value::String(lookup(id)?),
        Value::Atom(id) => Value::Atom(lookup(id)?),
        other => other,
    })
}

fn put_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn put_ids(out: &mut Vec<u8>, ids: &[StrId]) {
    put_u32(out, ids.len() as u32);
    for id in ids {
        put_u32(out, id.0);
    }
}

/// Encode every relation holding rows.
pub fn encode_snapshot(registry: &Registry, strings: &Interner, checksum: bool) -> Vec<u8> {
    let mut body = Vec::new();
    body.push(if checksum { FLAG_CHECKSUM } else { 0 });

    put_u32(&mut body, strings.len() as u32);
    for (id, text) in strings.iter() {
        put_u32(&mut body, id.0);
        put_u32(&mut body, text.len() as u32);
        body.extend_from_slice(text.as_bytes());
    }

    let stored: Vec<_> = registry.iter().filter(|r| !r.table().is_empty()).collect();
    put_u32(&mut body, stored.len() as u32);
    for relation in stored {
        let name = relation.name();
        put_ids(&mut body, name.objects().parts());
        put_ids(&mut body, name.attributes().parts());
        put_u32(&mut body, name.arity() as u32);
        body.push(u8::from(name.reaches()));
        body.extend_from_slice(&(relation.table().len() as u64).to_le_bytes());
        for row in relation.table().rows() {
            for value in row {
                encode_into(value, &mut body);
            }
        }
        debug!(relation = %relation.display_name(), rows = relation.table().len(), "relation_encoded");
    }

    let mut out = Vec::with_capacity(MAGIC.len() + body.len() + 4);
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&body);
    if checksum {
        out.extend_from_slice(&crc32fast::hash(&body).to_le_bytes());
    }
    out
}

pub fn save_snapshot(path: &Path, registry: &Registry, strings: &Interner, checksum: bool) -> SnapshotResult<()> {
    let bytes = encode_snapshot(registry, strings, checksum);
    fs::write(path, &bytes)?;
    info!(path = %path.display(), bytes = bytes.len(), "snapshot_saved");
    Ok(())
}

/// Read and decode `path`, verifying the trailer when `verify` is set and
/// the file carries one.
pub fn read_snapshot(path: &Path, verify: bool) -> SnapshotResult<Snapshot> {
    let bytes = fs::read(path)?;
    decode_snapshot(&bytes, verify)
}

struct Cursor<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, n: usize) -> SnapshotResult<&'a [u8]> {
        let end = self.offset.checked_add(n).filter(|&e| e <= self.bytes.len());
        let Some(end) = end else {
            return Err(SnapshotError::Truncated { offset: self.offset });
        };
        let slice = &self.bytes[self.offset..end];
        self.offset = end;
        Ok(slice)
    }

    fn u8(&mut self) -> SnapshotResult<u8> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> SnapshotResult<u32> {
        let mut buf = [0u8; 4];
        buf.copy_from_slice(self.take(4)?);
        Ok(u32::from_le_bytes(buf))
    }

    fn u64(&mut self) -> SnapshotResult<u64> {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(self.take(8)?);
        Ok(u64::from_le_bytes(buf))
    }

    fn ids(&mut self) -> SnapshotResult<Vec<u32>> {
        let n = self.u32()?;
        (0..n).map(|_| self.u32()).collect()
    }

    fn value(&mut self) -> SnapshotResult<Value> {
        let (value, used) = decode(&self.bytes[self.offset..])
            .map_err(|e| SnapshotError::from_decode(e, self.offset))?;
        self.offset += used;
        Ok(value)
    }
}

pub fn decode_snapshot(bytes: &[u8], verify: bool) -> SnapshotResult<Snapshot> {
    if bytes.len() < MAGIC.len() || &bytes[..MAGIC.len()] != MAGIC {
        return Err(SnapshotError::BadMagic);
    }
    let mut body = &bytes[MAGIC.len()..];
    let Some(&flags) = body.first() else {
        return Err(SnapshotError::Truncated { offset: MAGIC.len() });
    };
    if flags & FLAG_CHECKSUM != 0 {
        if body.len() < 5 {
            return Err(SnapshotError::Truncated { offset: bytes.len() });
        }
        let (content, trailer) = body.split_at(body.len() - 4);
        let mut buf = [0u8; 4];
        buf.copy_from_slice(trailer);
        let stored = u32::from_le_bytes(buf);
        if verify {
            let computed = crc32fast::hash(content);
            if stored != computed {
                return Err(SnapshotError::ChecksumMismatch { stored, computed });
            }
        }
        body = content;
    }

    let mut cursor = Cursor { bytes: body, offset: 1 };
    let mut snapshot = Snapshot::default();

    let count = cursor.u32()?;
    for _ in 0..count {
        let id = cursor.u32()?;
        let len = cursor.u32()? as usize;
        let text = std::str::from_utf8(cursor.take(len)?).map_err(|_| SnapshotError::InvalidUtf8)?;
        snapshot.strings.insert(id, text.to_string());
    }

    let relations = cursor.u32()?;
    for _ in 0..relations {
        let objects = cursor.ids()?;
        let attributes = cursor.ids()?;
        let arity = cursor.u32()? as usize;
        let reaches = cursor.u8()? != 0;
        let row_count = cursor.u64()?;
        let mut rows = Vec::new();
        for _ in 0..row_count {
            let row = (0..arity).map(|_| cursor.value()).collect::<SnapshotResult<Row>>()?;
            rows.push(row);
        }
        snapshot.relations.push(StoredRelation {
            objects,
            attributes,
            arity,
            reaches,
            rows,
        });
    }
    Ok(snapshot)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry_with_edges(strings: &mut Interner) -> Registry {
        let mut registry = Registry::new(0);
        let edge = PredicateName::new(
            CompoundName::new([strings.intern("edge")]),
            CompoundName::new([strings.intern("#1")]),
        );
        let id = registry.get_or_create(&edge, strings).unwrap();
        let a = Value::atom(strings, "a");
        let b = Value::atom(strings, "b");
        registry.insert_fact(id, &[a, b]).unwrap();
        registry.insert_fact(id, &[b, Value::Integer(-7)]).unwrap();
        registry
    }

    #[test]
    fn test_encode_decode() {
        let mut strings = Interner::new();
        let registry = registry_with_edges(&mut strings);
        let bytes = encode_snapshot(&registry, &strings, true);
        assert_eq!(&bytes[..8], MAGIC);
        let snapshot = decode_snapshot(&bytes, true).unwrap();
        assert_eq!(snapshot.relations.len(), 1);
        assert_eq!(snapshot.row_count(), 2);
        assert_eq!(snapshot.relations[0].arity, 2);
    }

    #[test]
    fn test_checksum_detects_corruption() {
        let mut strings = Interner::new();
        let registry = registry_with_edges(&mut strings);
        let mut bytes = encode_snapshot(&registry, &strings, true);
        let middle = bytes.len() / 2;
        bytes[middle] ^= 0xff;
        assert!(matches!(
            decode_snapshot(&bytes, true),
            Err(SnapshotError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_bad_magic_and_truncation() {
        assert!(matches!(decode_snapshot(b"NOTSNAP!", true), Err(SnapshotError::BadMagic)));

        let mut strings = Interner::new();
        let registry = registry_with_edges(&mut strings);
        let bytes = encode_snapshot(&registry, &strings, false);
        let cut = &bytes[..bytes.len() - 3];
        assert!(matches!(
            decode_snapshot(cut, false),
            Err(SnapshotError::Truncated { .. } | SnapshotError::UnknownOpcode(_))
        ));
    }

    #[test]
    fn test_remap_into_fresh_interner() {
        let mut strings = Interner::new();
        strings.intern("padding");
        let registry = registry_with_edges(&mut strings);
        let bytes = encode_snapshot(&registry, &strings, false);
        let snapshot = decode_snapshot(&bytes, false).unwrap();

        let mut fresh = Interner::new();
        let relations = snapshot.relations(&mut fresh).unwrap();
        let (name, rows) = &relations[0];
        assert_eq!(name.render(&fresh), "edge{#1}");
        let a = fresh.lookup("a").unwrap();
        assert_eq!(rows[0][0], Value::Atom(a));
    }
}
