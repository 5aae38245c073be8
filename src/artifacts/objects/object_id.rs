//! Git object identifier (SHA-1 hash)
//!
//! Object IDs are 20-byte SHA-1 digests, displayed as 40 hexadecimal
//! characters. They uniquely identify all objects (blobs, trees, commits,
//! tags). Equality and ordering are byte-wise; the all-zero value stands
//! for "absent / not yet known".
//!
//! ## Storage
//!
//! Objects are stored in `.git/objects/<first-2-hex-chars>/<remaining-38>`

use crate::artifacts::core::CoreError;
use crate::artifacts::objects::{OBJECT_ID_HEX_LENGTH, OBJECT_ID_RAW_LENGTH};
use sha1::{Digest, Sha1};
use std::io;
use std::path::PathBuf;

/// Git object identifier (SHA-1 hash)
///
/// A 20-byte digest held by value. Byte-wise `Eq`/`Ord`/`Hash` so ids can
/// key ordered maps and be binary-searched in pack indexes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct ObjectId([u8; OBJECT_ID_RAW_LENGTH]);

impl ObjectId {
    /// The well-known all-zero id: "absent" or "not yet known".
    pub const ZERO: ObjectId = ObjectId([0; OBJECT_ID_RAW_LENGTH]);

    pub fn from_raw(bytes: [u8; OBJECT_ID_RAW_LENGTH]) -> Self {
        Self(bytes)
    }

    /// Hash a canonical object encoding into its id.
    pub fn digest(content: &[u8]) -> Self {
        let mut hasher = Sha1::new();
        hasher.update(content);
        Self(hasher.finalize().into())
    }

    /// Parse and validate an object id from its 40-char hex form.
    pub fn try_parse(id: &str) -> anyhow::Result<Self> {
        if id.len() != OBJECT_ID_HEX_LENGTH {
            return Err(CoreError::Corrupt(format!("invalid object id length: {}", id.len())).into());
        }
        let raw = hex::decode(id)
            .map_err(|_| CoreError::Corrupt(format!("invalid object id characters: {id}")))?;
        let mut bytes = [0u8; OBJECT_ID_RAW_LENGTH];
        bytes.copy_from_slice(&raw);
        Ok(Self(bytes))
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }

    pub fn as_raw(&self) -> &[u8; OBJECT_ID_RAW_LENGTH] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Write the id in binary form (20 bytes), as embedded in tree entries
    /// and the index file.
    pub fn write_raw_to<W: io::Write>(&self, writer: &mut W) -> anyhow::Result<()> {
        writer.write_all(&self.0)?;
        Ok(())
    }

    /// Read an id from its binary form (20 bytes).
    pub fn read_raw_from<R: io::Read + ?Sized>(reader: &mut R) -> anyhow::Result<Self> {
        let mut bytes = [0u8; OBJECT_ID_RAW_LENGTH];
        reader.read_exact(&mut bytes)?;
        Ok(Self(bytes))
    }

    /// Convert to the loose-object path: `ab/c123...` for id `abc123...`
    pub fn to_path(&self) -> PathBuf {
        let hex = self.to_hex();
        let (dir, file) = hex.split_at(2);
        PathBuf::from(dir).join(file)
    }

    /// First 7 hex characters, the standard abbreviation.
    pub fn to_short_oid(&self) -> String {
        self.to_hex().split_at(7).0.to_string()
    }
}

impl std::fmt::Display for ObjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl std::fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ObjectId({})", self.to_hex())
    }
}
