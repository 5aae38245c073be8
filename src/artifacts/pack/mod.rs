//! Packed object storage, read path only.
//!
//! A pack is a container of many objects, optionally delta-compressed
//! against each other, with a sibling `.idx` index for random access.
//! The engine reads packs transparently when a loose object is absent;
//! writing packs is out of scope.

pub mod pack_file;
pub mod pack_index;

use crate::artifacts::objects::object_id::ObjectId;
use crate::artifacts::objects::object_type::ObjectType;
use bytes::Bytes;
use pack_file::PackFile;
use std::path::Path;

/// All packs of one repository, resolved in scan order.
#[derive(Debug, Default)]
pub struct PackSet {
    packs: Vec<PackFile>,
}

impl PackSet {
    /// Scan `objects/pack/` for `*.idx` files and open each pack.
    /// A missing pack directory is an empty set, not an error.
    pub fn open(pack_dir: &Path) -> anyhow::Result<Self> {
        let mut packs = Vec::new();

        if pack_dir.is_dir() {
            let mut idx_paths: Vec<_> = std::fs::read_dir(pack_dir)?
                .filter_map(|entry| entry.ok())
                .map(|entry| entry.path())
                .filter(|path| path.extension().is_some_and(|ext| ext == "idx"))
                .collect();
            idx_paths.sort();

            for idx_path in idx_paths {
                match PackFile::open(&idx_path) {
                    Ok(pack) => packs.push(pack),
                    Err(err) => {
                        tracing::warn!(idx = %idx_path.display(), error = %err, "skipping unreadable pack");
                    }
                }
            }
        }

        Ok(Self { packs })
    }

    pub fn is_empty(&self) -> bool {
        self.packs.is_empty()
    }

    pub fn contains(&self, oid: &ObjectId) -> bool {
        self.packs.iter().any(|pack| pack.contains(oid))
    }

    /// Ids of every packed object, across all packs.
    pub fn object_ids(&self) -> Vec<ObjectId> {
        self.packs
            .iter()
            .flat_map(|pack| pack.object_ids().iter().copied())
            .collect()
    }

    /// Resolve an object out of whichever pack holds it.
    pub fn read_object(&self, oid: &ObjectId) -> anyhow::Result<Option<(ObjectType, Bytes)>> {
        for pack in &self.packs {
            if let Some(found) = pack.read_object(oid)? {
                return Ok(Some(found));
            }
        }
        Ok(None)
    }
}
