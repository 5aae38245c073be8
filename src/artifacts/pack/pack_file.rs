//! Pack data (`.pack`) reader with delta resolution.
//!
//! Entry header: one varint-style sequence where the first byte carries
//! the type in bits 4-6 and the low 4 size bits; continuation bytes add 7
//! size bits each. Types 6 (ofs-delta) and 7 (ref-delta) are followed by
//! a negative base offset or a 20-byte base id, then the zlib stream.
//!
//! Delta payload: base-size varint, result-size varint, then copy
//! (`cmd & 0x80`, offset/size bytes selected by the low bits) and insert
//! (`cmd` literal bytes) instructions.

use crate::artifacts::core::CoreError;
use crate::artifacts::objects::object_id::ObjectId;
use crate::artifacts::objects::object_type::ObjectType;
use crate::artifacts::objects::OBJECT_ID_RAW_LENGTH;
use crate::artifacts::pack::pack_index::PackIndex;
use anyhow::Context;
use bytes::Bytes;
use std::io::Read;
use std::path::Path;

const PACK_MAGIC: &[u8; 4] = b"PACK";

/// Deepest delta chain we will follow before declaring the pack corrupt.
const MAX_DELTA_DEPTH: usize = 64;

const TYPE_COMMIT: u8 = 1;
const TYPE_TREE: u8 = 2;
const TYPE_BLOB: u8 = 3;
const TYPE_TAG: u8 = 4;
const TYPE_OFS_DELTA: u8 = 6;
const TYPE_REF_DELTA: u8 = 7;

#[derive(Debug)]
pub struct PackFile {
    data: Vec<u8>,
    index: PackIndex,
}

impl PackFile {
    /// Open a pack given the path of its `.idx` file.
    pub fn open(idx_path: &Path) -> anyhow::Result<Self> {
        let index_data = std::fs::read(idx_path)
            .with_context(|| format!("unable to read pack index {}", idx_path.display()))?;
        let index = PackIndex::from_bytes(&index_data)?;

        let pack_path = idx_path.with_extension("pack");
        let data = std::fs::read(&pack_path)
            .with_context(|| format!("unable to read pack file {}", pack_path.display()))?;

        Self::from_parts(data, index)
    }

    pub fn from_parts(data: Vec<u8>, index: PackIndex) -> anyhow::Result<Self> {
        if data.len() < 12 + OBJECT_ID_RAW_LENGTH || &data[0..4] != PACK_MAGIC {
            return Err(CoreError::Corrupt("bad pack file header".to_string()).into());
        }
        let version = <byteorder::NetworkEndian as byteorder::ByteOrder>::read_u32(&data[4..8]);
        if version != 2 && version != 3 {
            return Err(CoreError::Corrupt(format!("unsupported pack version {version}")).into());
        }

        Ok(Self { data, index })
    }

    pub fn contains(&self, oid: &ObjectId) -> bool {
        self.index.contains(oid)
    }

    pub fn object_count(&self) -> usize {
        self.index.object_count()
    }

    pub fn object_ids(&self) -> &[ObjectId] {
        self.index.object_ids()
    }

    /// Read an object by id, resolving any delta chain to full content.
    pub fn read_object(&self, oid: &ObjectId) -> anyhow::Result<Option<(ObjectType, Bytes)>> {
        let Some((offset, crc)) = self.index.lookup(oid) else {
            return Ok(None);
        };

        let (kind, data) = self.read_at_offset(offset, Some(crc), 0)?;
        Ok(Some((kind, data)))
    }

    fn read_at_offset(
        &self,
        offset: u64,
        expected_crc: Option<u32>,
        depth: usize,
    ) -> anyhow::Result<(ObjectType, Bytes)> {
        if depth > MAX_DELTA_DEPTH {
            return Err(CoreError::Corrupt("delta chain too deep".to_string()).into());
        }

        let mut pos = offset as usize;
        if pos >= self.data.len() {
            return Err(CoreError::Corrupt("pack offset beyond data".to_string()).into());
        }

        let (type_code, size, consumed) = parse_entry_header(&self.data[pos..])?;
        pos += consumed;

        match type_code {
            TYPE_COMMIT | TYPE_TREE | TYPE_BLOB | TYPE_TAG => {
                let payload = self.inflate_at(pos, size, expected_crc, offset as usize)?;
                Ok((object_type_of(type_code)?, payload))
            }
            TYPE_OFS_DELTA => {
                let (distance, consumed) = parse_ofs_delta_distance(&self.data[pos..])?;
                pos += consumed;
                let base_offset = offset
                    .checked_sub(distance)
                    .ok_or_else(|| CoreError::Corrupt("ofs-delta before pack start".to_string()))?;

                let delta = self.inflate_at(pos, size, expected_crc, offset as usize)?;
                let (kind, base) = self.read_at_offset(base_offset, None, depth + 1)?;
                Ok((kind, apply_delta(&base, &delta)?))
            }
            TYPE_REF_DELTA => {
                let mut raw = [0u8; OBJECT_ID_RAW_LENGTH];
                if pos + OBJECT_ID_RAW_LENGTH > self.data.len() {
                    return Err(CoreError::Corrupt("truncated ref-delta base id".to_string()).into());
                }
                raw.copy_from_slice(&self.data[pos..pos + OBJECT_ID_RAW_LENGTH]);
                let base_oid = ObjectId::from_raw(raw);
                pos += OBJECT_ID_RAW_LENGTH;

                let delta = self.inflate_at(pos, size, expected_crc, offset as usize)?;
                let (base_offset, base_crc) = self.index.lookup(&base_oid).ok_or_else(|| {
                    CoreError::NotFound(format!("delta base object {base_oid}"))
                })?;
                let (kind, base) = self.read_at_offset(base_offset, Some(base_crc), depth + 1)?;
                Ok((kind, apply_delta(&base, &delta)?))
            }
            other => Err(CoreError::Corrupt(format!("unknown pack entry type {other}")).into()),
        }
    }

    /// Inflate the zlib stream starting at `pos`, verifying the declared
    /// size and, when known, the CRC32 over the entry's compressed span.
    fn inflate_at(
        &self,
        pos: usize,
        expected_size: u64,
        expected_crc: Option<u32>,
        entry_start: usize,
    ) -> anyhow::Result<Bytes> {
        let mut decoder = flate2::read::ZlibDecoder::new(&self.data[pos..]);
        let mut payload = Vec::with_capacity(expected_size as usize);
        decoder
            .read_to_end(&mut payload)
            .map_err(|err| CoreError::Corrupt(format!("pack entry inflate failed: {err}")))?;

        if payload.len() as u64 != expected_size {
            return Err(CoreError::Corrupt(format!(
                "pack entry size mismatch: declared {expected_size}, inflated {}",
                payload.len()
            ))
            .into());
        }

        if let Some(expected_crc) = expected_crc {
            let compressed_end = pos + decoder.total_in() as usize;
            let actual = crc32fast::hash(&self.data[entry_start..compressed_end]);
            if actual != expected_crc {
                return Err(CoreError::Corrupt("pack entry crc32 mismatch".to_string()).into());
            }
        }

        Ok(Bytes::from(payload))
    }
}

fn object_type_of(code: u8) -> anyhow::Result<ObjectType> {
    match code {
        TYPE_COMMIT => Ok(ObjectType::Commit),
        TYPE_TREE => Ok(ObjectType::Tree),
        TYPE_BLOB => Ok(ObjectType::Blob),
        TYPE_TAG => Ok(ObjectType::Tag),
        _ => Err(CoreError::Corrupt(format!("pack type {code} is not a full object")).into()),
    }
}

/// Parse the entry header, returning (type code, inflated size, bytes consumed).
fn parse_entry_header(data: &[u8]) -> anyhow::Result<(u8, u64, usize)> {
    let mut byte = *data
        .first()
        .ok_or_else(|| CoreError::Corrupt("truncated pack entry header".to_string()))?;
    let type_code = (byte >> 4) & 0x7;
    let mut size = (byte & 0x0f) as u64;
    let mut shift = 4;
    let mut consumed = 1;

    while byte & 0x80 != 0 {
        byte = *data
            .get(consumed)
            .ok_or_else(|| CoreError::Corrupt("truncated pack entry header".to_string()))?;
        size |= ((byte & 0x7f) as u64) << shift;
        shift += 7;
        consumed += 1;
    }

    Ok((type_code, size, consumed))
}

/// Parse the ofs-delta backward distance (big-endian 7-bit groups with a
/// +1 bias on each continuation).
fn parse_ofs_delta_distance(data: &[u8]) -> anyhow::Result<(u64, usize)> {
    let mut byte = *data
        .first()
        .ok_or_else(|| CoreError::Corrupt("truncated ofs-delta offset".to_string()))?;
    let mut value = (byte & 0x7f) as u64;
    let mut consumed = 1;

    while byte & 0x80 != 0 {
        byte = *data
            .get(consumed)
            .ok_or_else(|| CoreError::Corrupt("truncated ofs-delta offset".to_string()))?;
        value = ((value + 1) << 7) | (byte & 0x7f) as u64;
        consumed += 1;
    }

    Ok((value, consumed))
}

fn parse_delta_size(data: &[u8], pos: &mut usize) -> anyhow::Result<u64> {
    let mut size = 0u64;
    let mut shift = 0;

    loop {
        let byte = *data
            .get(*pos)
            .ok_or_else(|| CoreError::Corrupt("truncated delta size".to_string()))?;
        *pos += 1;
        size |= ((byte & 0x7f) as u64) << shift;
        shift += 7;
        if byte & 0x80 == 0 {
            break;
        }
    }

    Ok(size)
}

/// Apply a delta payload to its base, yielding the reconstructed object.
pub fn apply_delta(base: &[u8], delta: &[u8]) -> anyhow::Result<Bytes> {
    let mut pos = 0;

    let base_size = parse_delta_size(delta, &mut pos)?;
    if base_size != base.len() as u64 {
        return Err(CoreError::Corrupt(format!(
            "delta base size mismatch: declared {base_size}, actual {}",
            base.len()
        ))
        .into());
    }
    let result_size = parse_delta_size(delta, &mut pos)?;

    let mut result = Vec::with_capacity(result_size as usize);
    while pos < delta.len() {
        let cmd = delta[pos];
        pos += 1;

        if cmd & 0x80 != 0 {
            // copy from base: low bits select which offset/size bytes follow
            let mut offset = 0u64;
            for (i, bit) in [0x01u8, 0x02, 0x04, 0x08].iter().enumerate() {
                if cmd & bit != 0 {
                    let byte = *delta
                        .get(pos)
                        .ok_or_else(|| CoreError::Corrupt("truncated delta copy".to_string()))?;
                    pos += 1;
                    offset |= (byte as u64) << (8 * i);
                }
            }
            let mut size = 0u64;
            for (i, bit) in [0x10u8, 0x20, 0x40].iter().enumerate() {
                if cmd & bit != 0 {
                    let byte = *delta
                        .get(pos)
                        .ok_or_else(|| CoreError::Corrupt("truncated delta copy".to_string()))?;
                    pos += 1;
                    size |= (byte as u64) << (8 * i);
                }
            }
            if size == 0 {
                size = 0x10000;
            }

            let start = offset as usize;
            let end = start
                .checked_add(size as usize)
                .filter(|&end| end <= base.len())
                .ok_or_else(|| CoreError::Corrupt("delta copy out of range".to_string()))?;
            result.extend_from_slice(&base[start..end]);
        } else if cmd != 0 {
            // insert the next `cmd` literal bytes
            let end = pos + cmd as usize;
            if end > delta.len() {
                return Err(CoreError::Corrupt("truncated delta insert".to_string()).into());
            }
            result.extend_from_slice(&delta[pos..end]);
            pos = end;
        } else {
            return Err(CoreError::Corrupt("reserved delta opcode 0".to_string()).into());
        }
    }

    if result.len() as u64 != result_size {
        return Err(CoreError::Corrupt(format!(
            "delta result size mismatch: declared {result_size}, produced {}",
            result.len()
        ))
        .into());
    }

    Ok(Bytes::from(result))
}
