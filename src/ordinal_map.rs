//! The staging arena: a var-int-encoded map record per populated ordinal.
//!
//! The spec describes this as an external, byte-addressable collaborator
//! (`ordinalMap.getPointerForData(ord)` into a flat arena the encoder only
//! reads). This crate's reference implementation is a plain `HashMap`
//! keyed by ordinal -- sufficient to stage records, drive every test, and
//! exercise the encoder end to end. An embedding framework with a
//! memory-mapped arena can supply its own type behind the same narrow
//! surface (`record_bytes`) without touching the encoder.

use std::collections::HashMap;

use crate::varint::{read_vint, write_vint};

/// One (key ordinal, value ordinal, bucket hint) triple within a staged map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MapEntry {
    pub key_ordinal: u32,
    pub value_ordinal: u32,
    /// Bucket index chosen by the stager when no primary-key hasher was
    /// bound at staging time.
    pub bucket_hint: u32,
}

/// A staged map record: a multiset of key/value ordinal pairs.
///
/// Entries must be in ascending `key_ordinal` order -- `encode` forward-delta
/// encodes them as nonnegative running differences, so out-of-order entries
/// would either panic (in debug) or silently corrupt the delta on encode.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MapRecord {
    pub entries: Vec<MapEntry>,
}

impl MapRecord {
    pub fn new(entries: Vec<MapEntry>) -> Self {
        Self { entries }
    }

    pub fn size(&self) -> u32 {
        self.entries.len() as u32
    }

    /// `(size, [(keyOrdDelta, valueOrd, bucketHint)] * size)`.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        write_vint(&mut buf, self.entries.len() as u32);
        let mut prev_key = 0u32;
        for entry in &self.entries {
            debug_assert!(
                entry.key_ordinal >= prev_key,
                "map record entries must be staged in ascending key-ordinal order"
            );
            write_vint(&mut buf, entry.key_ordinal - prev_key);
            write_vint(&mut buf, entry.value_ordinal);
            write_vint(&mut buf, entry.bucket_hint);
            prev_key = entry.key_ordinal;
        }
        buf
    }

    pub fn decode(bytes: &[u8]) -> Self {
        let mut pos = 0;
        let size = read_vint(bytes, &mut pos);
        let mut entries = Vec::with_capacity(size as usize);
        let mut key_ordinal = 0u32;
        for _ in 0..size {
            key_ordinal += read_vint(bytes, &mut pos);
            let value_ordinal = read_vint(bytes, &mut pos);
            let bucket_hint = read_vint(bytes, &mut pos);
            entries.push(MapEntry {
                key_ordinal,
                value_ordinal,
                bucket_hint,
            });
        }
        Self { entries }
    }
}

/// Reads only the leading `size` var-int of an encoded record, without
/// decoding any entries. Used by the delta diff pass (§4.4), which only
/// needs `hashTableSize(size)` for ordinals it hasn't yet decided to
/// materialize.
pub fn decode_size(bytes: &[u8]) -> u32 {
    let mut pos = 0;
    read_vint(bytes, &mut pos)
}

/// The staging store: populated ordinals point at var-int-encoded records.
#[derive(Debug, Clone, Default)]
pub struct OrdinalMap {
    records: HashMap<usize, Vec<u8>>,
}

impl OrdinalMap {
    pub fn new() -> Self {
        Self {
            records: HashMap::new(),
        }
    }

    /// Stages `record` at `ordinal`, var-int encoding it into the arena.
    pub fn stage(&mut self, ordinal: usize, record: &MapRecord) {
        self.records.insert(ordinal, record.encode());
    }

    /// The raw encoded bytes for a populated ordinal, if any.
    pub fn record_bytes(&self, ordinal: usize) -> Option<&[u8]> {
        self.records.get(&ordinal).map(|v| v.as_slice())
    }

    /// Decodes the full record at `ordinal`, if populated.
    pub fn decode(&self, ordinal: usize) -> Option<MapRecord> {
        self.record_bytes(ordinal).map(MapRecord::decode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(key: u32, value: u32, hint: u32) -> MapEntry {
        MapEntry {
            key_ordinal: key,
            value_ordinal: value,
            bucket_hint: hint,
        }
    }

    #[test]
    fn encode_decode_roundtrip() {
        let record = MapRecord::new(vec![entry(10, 100, 0), entry(20, 200, 1)]);
        let bytes = record.encode();
        let decoded = MapRecord::decode(&bytes);
        assert_eq!(decoded, record);
    }

    #[test]
    fn decode_size_reads_only_the_leading_varint() {
        let record = MapRecord::new(vec![entry(1, 1, 0), entry(2, 2, 0), entry(3, 3, 0)]);
        let bytes = record.encode();
        assert_eq!(decode_size(&bytes), 3);
    }

    #[test]
    fn empty_record_roundtrips() {
        let record = MapRecord::new(vec![]);
        let bytes = record.encode();
        assert_eq!(bytes, vec![0]);
        assert_eq!(MapRecord::decode(&bytes), record);
    }

    #[test]
    fn ordinal_map_stages_and_reads_back() {
        let mut map = OrdinalMap::new();
        let record = MapRecord::new(vec![entry(5, 50, 2)]);
        map.stage(7, &record);
        assert_eq!(map.decode(7), Some(record));
        assert_eq!(map.decode(8), None);
    }
}
