//! Pack index (`.idx`) version 2 reader.
//!
//! Layout:
//! - magic `\xff t O c`, version 2
//! - fan-out table: 256 cumulative counts of objects by first id byte
//! - sorted 20-byte object ids
//! - CRC32 array (parallel, over the compressed pack entries)
//! - 4-byte offset array (MSB set means the low 31 bits index the
//!   large-offset table)
//! - 8-byte large offsets
//! - pack checksum, index checksum

use crate::artifacts::core::CoreError;
use crate::artifacts::objects::object_id::ObjectId;
use crate::artifacts::objects::OBJECT_ID_RAW_LENGTH;
use byteorder::ByteOrder;
use sha1::{Digest, Sha1};

const IDX_MAGIC: [u8; 4] = [0xff, b't', b'O', b'c'];
const FANOUT_ENTRIES: usize = 256;
const LARGE_OFFSET_FLAG: u32 = 0x8000_0000;

#[derive(Debug, Clone)]
pub struct PackIndex {
    fan_out: [u32; FANOUT_ENTRIES],
    object_ids: Vec<ObjectId>,
    crc32s: Vec<u32>,
    offsets: Vec<u64>,
}

impl PackIndex {
    /// Parse a version-2 index, verifying its trailing SHA-1 checksum.
    pub fn from_bytes(data: &[u8]) -> anyhow::Result<Self> {
        if data.len() < 8 + FANOUT_ENTRIES * 4 + 2 * OBJECT_ID_RAW_LENGTH {
            return Err(CoreError::Corrupt("pack index too short".to_string()).into());
        }
        if data[0..4] != IDX_MAGIC {
            return Err(CoreError::Corrupt("bad pack index magic".to_string()).into());
        }
        let version = byteorder::NetworkEndian::read_u32(&data[4..8]);
        if version != 2 {
            return Err(
                CoreError::Corrupt(format!("unsupported pack index version {version}")).into(),
            );
        }

        // The final 20 bytes are the SHA-1 of everything before them
        let trailer_start = data.len() - OBJECT_ID_RAW_LENGTH;
        let mut hasher = Sha1::new();
        hasher.update(&data[..trailer_start]);
        if hasher.finalize().as_slice() != &data[trailer_start..] {
            return Err(CoreError::Corrupt("pack index checksum mismatch".to_string()).into());
        }

        let mut fan_out = [0u32; FANOUT_ENTRIES];
        let mut pos = 8;
        for slot in fan_out.iter_mut() {
            *slot = byteorder::NetworkEndian::read_u32(&data[pos..pos + 4]);
            pos += 4;
        }
        let count = fan_out[FANOUT_ENTRIES - 1] as usize;

        let ids_end = pos + count * OBJECT_ID_RAW_LENGTH;
        let crcs_end = ids_end + count * 4;
        let offsets_end = crcs_end + count * 4;
        if offsets_end + 2 * OBJECT_ID_RAW_LENGTH > data.len() {
            return Err(CoreError::Corrupt("pack index tables truncated".to_string()).into());
        }

        let mut object_ids = Vec::with_capacity(count);
        while pos < ids_end {
            let mut raw = [0u8; OBJECT_ID_RAW_LENGTH];
            raw.copy_from_slice(&data[pos..pos + OBJECT_ID_RAW_LENGTH]);
            object_ids.push(ObjectId::from_raw(raw));
            pos += OBJECT_ID_RAW_LENGTH;
        }

        let mut crc32s = Vec::with_capacity(count);
        while pos < crcs_end {
            crc32s.push(byteorder::NetworkEndian::read_u32(&data[pos..pos + 4]));
            pos += 4;
        }

        let large_offsets = &data[offsets_end..data.len() - 2 * OBJECT_ID_RAW_LENGTH];
        let mut offsets = Vec::with_capacity(count);
        while pos < crcs_end + count * 4 {
            let raw = byteorder::NetworkEndian::read_u32(&data[pos..pos + 4]);
            pos += 4;
            if raw & LARGE_OFFSET_FLAG == 0 {
                offsets.push(raw as u64);
            } else {
                let slot = (raw & !LARGE_OFFSET_FLAG) as usize * 8;
                if slot + 8 > large_offsets.len() {
                    return Err(
                        CoreError::Corrupt("pack index large offset out of range".to_string())
                            .into(),
                    );
                }
                offsets.push(byteorder::NetworkEndian::read_u64(
                    &large_offsets[slot..slot + 8],
                ));
            }
        }

        Ok(Self {
            fan_out,
            object_ids,
            crc32s,
            offsets,
        })
    }

    /// Look up an object's (offset, crc32) by id via the fan-out table and
    /// a binary search of its first-byte bucket.
    pub fn lookup(&self, oid: &ObjectId) -> Option<(u64, u32)> {
        let first_byte = oid.as_raw()[0] as usize;
        let start = if first_byte == 0 {
            0
        } else {
            self.fan_out[first_byte - 1] as usize
        };
        let end = self.fan_out[first_byte] as usize;

        let bucket = &self.object_ids[start..end];
        match bucket.binary_search(oid) {
            Ok(pos) => {
                let idx = start + pos;
                Some((self.offsets[idx], self.crc32s[idx]))
            }
            Err(_) => None,
        }
    }

    pub fn contains(&self, oid: &ObjectId) -> bool {
        self.lookup(oid).is_some()
    }

    pub fn object_count(&self) -> usize {
        self.object_ids.len()
    }

    pub fn object_ids(&self) -> &[ObjectId] {
        &self.object_ids
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    /// Build a syntactically-valid v2 index for (id, crc, offset) triples.
    pub(crate) fn build_index_bytes(mut entries: Vec<(ObjectId, u32, u64)>) -> Vec<u8> {
        entries.sort_by(|a, b| a.0.cmp(&b.0));

        let mut data = Vec::new();
        data.extend_from_slice(&IDX_MAGIC);
        data.extend_from_slice(&2u32.to_be_bytes());

        let mut fan_out = [0u32; FANOUT_ENTRIES];
        for (oid, _, _) in &entries {
            let first = oid.as_raw()[0] as usize;
            for slot in first..FANOUT_ENTRIES {
                fan_out[slot] += 1;
            }
        }
        for count in fan_out {
            data.extend_from_slice(&count.to_be_bytes());
        }

        for (oid, _, _) in &entries {
            data.extend_from_slice(oid.as_raw());
        }
        for (_, crc, _) in &entries {
            data.extend_from_slice(&crc.to_be_bytes());
        }

        let mut large = Vec::new();
        for (_, _, offset) in &entries {
            if *offset < LARGE_OFFSET_FLAG as u64 {
                data.extend_from_slice(&(*offset as u32).to_be_bytes());
            } else {
                let slot = (large.len() / 8) as u32;
                data.extend_from_slice(&(slot | LARGE_OFFSET_FLAG).to_be_bytes());
                large.extend_from_slice(&offset.to_be_bytes());
            }
        }
        data.extend_from_slice(&large);

        // pack checksum placeholder, then the real index checksum
        data.extend_from_slice(&[0u8; OBJECT_ID_RAW_LENGTH]);
        let mut hasher = Sha1::new();
        hasher.update(&data);
        let trailer: [u8; OBJECT_ID_RAW_LENGTH] = hasher.finalize().into();
        data.extend_from_slice(&trailer);

        data
    }

    #[test]
    fn lookup_finds_offsets_and_crcs() {
        let a = ObjectId::digest(b"a");
        let b = ObjectId::digest(b"b");
        let c = ObjectId::digest(b"c");
        let bytes = build_index_bytes(vec![(a, 11, 12), (b, 21, 300), (c, 31, 4096)]);

        let index = PackIndex::from_bytes(&bytes).unwrap();
        assert_eq!(index.object_count(), 3);
        assert_eq!(index.lookup(&a), Some((12, 11)));
        assert_eq!(index.lookup(&b), Some((300, 21)));
        assert_eq!(index.lookup(&c), Some((4096, 31)));
        assert_eq!(index.lookup(&ObjectId::digest(b"missing")), None);
    }

    #[test]
    fn large_offsets_round_trip() {
        let a = ObjectId::digest(b"big");
        let offset = (LARGE_OFFSET_FLAG as u64) + 42;
        let bytes = build_index_bytes(vec![(a, 1, offset)]);

        let index = PackIndex::from_bytes(&bytes).unwrap();
        assert_eq!(index.lookup(&a), Some((offset, 1)));
    }

    #[test]
    fn corrupted_trailer_is_rejected() {
        let a = ObjectId::digest(b"a");
        let mut bytes = build_index_bytes(vec![(a, 1, 2)]);
        let len = bytes.len();
        bytes[len - 1] ^= 0xff;

        assert!(PackIndex::from_bytes(&bytes).is_err());
    }
}
