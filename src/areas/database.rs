//! Content-addressable object database.
//!
//! Loose storage keeps one zlib-compressed file per object under a
//! 2-hex-char directory prefix, written read-only via temp-file-then-rename
//! so a write that collides with an existing id is a no-op and a crashed
//! writer leaves no partial object. Reads fall back to the pack files
//! under `pack/` transparently.

use crate::artifacts::core::CoreError;
use crate::artifacts::diff::tree_diff::TreeDiff;
use crate::artifacts::index::entry_mode::EntryMode;
use crate::artifacts::objects::blob::Blob;
use crate::artifacts::objects::commit::Commit;
use crate::artifacts::objects::object::{Object, ObjectBox, Unpackable};
use crate::artifacts::objects::object_id::ObjectId;
use crate::artifacts::objects::object_type::ObjectType;
use crate::artifacts::objects::tag::Tag;
use crate::artifacts::objects::tree::{Tree, TreeCursor, TreeEntry};
use crate::artifacts::pack::PackSet;
use anyhow::Context;
use bytes::Bytes;
use fake::rand;
use std::cell::RefCell;
use std::io::{Cursor, Read, Write};
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub struct Database {
    path: Box<Path>,
    /// Packs are scanned on first packed lookup, not at construction
    packs: RefCell<Option<PackSet>>,
}

impl Database {
    pub fn new(path: Box<Path>) -> Self {
        Database {
            path,
            packs: RefCell::new(None),
        }
    }

    pub fn objects_path(&self) -> &Path {
        &self.path
    }

    pub fn tree_diff(
        &self,
        old_oid: Option<&ObjectId>,
        new_oid: Option<&ObjectId>,
    ) -> anyhow::Result<TreeDiff<'_>> {
        let mut tree_diff = TreeDiff::new(self);
        tree_diff.compare_oids(old_oid, new_oid)?;
        Ok(tree_diff)
    }

    /// Persist an object, returning its id. Idempotent: storing content
    /// that already exists leaves the existing file untouched.
    pub fn store(&self, object: &impl Object) -> anyhow::Result<ObjectId> {
        let object_content = object.serialize()?;
        let object_id = ObjectId::digest(&object_content);
        let object_path = self.path.join(object_id.to_path());

        if !object_path.exists() {
            std::fs::create_dir_all(
                object_path
                    .parent()
                    .context(format!("invalid object path {}", object_path.display()))?,
            )
            .context(format!(
                "unable to create object directory {}",
                object_path.display()
            ))?;

            self.write_object(object_path, object_content)?;
        }

        Ok(object_id)
    }

    /// Does an object with this id exist, loose or packed?
    pub fn exists(&self, object_id: &ObjectId) -> bool {
        self.path.join(object_id.to_path()).exists()
            || self.with_packs(|packs| packs.contains(object_id))
    }

    /// Load an object's kind and payload (header stripped and validated).
    pub fn load(&self, object_id: &ObjectId) -> anyhow::Result<(ObjectType, Bytes)> {
        let object_path = self.path.join(object_id.to_path());

        if object_path.exists() {
            return self.read_loose_object(object_id, object_path);
        }

        let packed = self
            .packs
            .borrow_mut()
            .get_or_insert_with(|| self.open_packs())
            .read_object(object_id)?;

        packed.ok_or_else(|| CoreError::NotFound(format!("object {object_id}")).into())
    }

    pub fn parse_object(&self, object_id: &ObjectId) -> anyhow::Result<ObjectBox> {
        let (object_type, payload) = self.load(object_id)?;
        let object_reader = Cursor::new(payload);

        match object_type {
            ObjectType::Blob => Ok(ObjectBox::Blob(Box::new(Blob::deserialize(object_reader)?))),
            ObjectType::Tree => Ok(ObjectBox::Tree(Box::new(Tree::deserialize(object_reader)?))),
            ObjectType::Commit => Ok(ObjectBox::Commit(Box::new(Commit::deserialize(
                object_reader,
            )?))),
            ObjectType::Tag => Ok(ObjectBox::Tag(Box::new(Tag::deserialize(object_reader)?))),
        }
    }

    pub fn parse_object_as_blob(&self, object_id: &ObjectId) -> anyhow::Result<Blob> {
        match self.parse_object(object_id)? {
            ObjectBox::Blob(blob) => Ok(*blob),
            other => Err(type_mismatch(ObjectType::Blob, other.object_type())),
        }
    }

    pub fn parse_object_as_tree(&self, object_id: &ObjectId) -> anyhow::Result<Tree> {
        match self.parse_object(object_id)? {
            ObjectBox::Tree(tree) => Ok(*tree),
            other => Err(type_mismatch(ObjectType::Tree, other.object_type())),
        }
    }

    pub fn parse_object_as_commit(&self, object_id: &ObjectId) -> anyhow::Result<Commit> {
        match self.parse_object(object_id)? {
            ObjectBox::Commit(commit) => Ok(*commit),
            ObjectBox::Tag(tag) => self.parse_object_as_commit(tag.target()),
            other => Err(type_mismatch(ObjectType::Commit, other.object_type())),
        }
    }

    /// Resolve an id to a tree payload, peeling commits and tags: a commit
    /// yields its root tree, a tag its peeled target.
    pub fn load_tree_payload(&self, object_id: &ObjectId) -> anyhow::Result<Bytes> {
        let (object_type, payload) = self.load(object_id)?;

        match object_type {
            ObjectType::Tree => Ok(payload),
            ObjectType::Commit => {
                let commit = Commit::deserialize(Cursor::new(payload))?;
                self.load_tree_payload(commit.tree_oid())
            }
            ObjectType::Tag => {
                let tag = Tag::deserialize(Cursor::new(payload))?;
                self.load_tree_payload(tag.target())
            }
            actual => Err(type_mismatch(ObjectType::Tree, actual)),
        }
    }

    /// Walk a '/'-separated path down from a tree, returning the entry it
    /// names, if any.
    pub fn tree_entry_at(
        &self,
        tree_oid: &ObjectId,
        path: &Path,
    ) -> anyhow::Result<Option<TreeEntry>> {
        let mut payload = self.load_tree_payload(tree_oid)?;

        let mut components = path.components().peekable();
        while let Some(component) = components.next() {
            let wanted = component
                .as_os_str()
                .to_str()
                .context("invalid path component")?;

            let mut cursor = TreeCursor::new(payload);
            let mut found = None;
            while let Some(entry) = cursor.next()? {
                if entry.name == wanted {
                    found = Some(entry);
                    break;
                }
            }

            let Some(entry) = found else {
                return Ok(None);
            };

            if components.peek().is_none() {
                return Ok(Some(entry));
            }
            if entry.mode != EntryMode::Directory {
                return Ok(None);
            }
            payload = self.load_tree_payload(&entry.oid)?;
        }

        Ok(None)
    }

    pub fn get_object_type(&self, object_id: &ObjectId) -> anyhow::Result<ObjectType> {
        Ok(self.load(object_id)?.0)
    }

    fn read_loose_object(
        &self,
        object_id: &ObjectId,
        object_path: PathBuf,
    ) -> anyhow::Result<(ObjectType, Bytes)> {
        let object_content = std::fs::read(&object_path).context(format!(
            "unable to read object file {}",
            object_path.display()
        ))?;

        let object_content = Self::decompress(object_content.into())?;
        let mut object_reader = Cursor::new(object_content);
        let (object_type, declared_size) = ObjectType::parse_object_header(&mut object_reader)?;

        let payload_start = object_reader.position() as usize;
        let payload = object_reader.into_inner().slice(payload_start..);

        if payload.len() != declared_size {
            return Err(CoreError::Corrupt(format!(
                "object {object_id} declares {declared_size} bytes but carries {}",
                payload.len()
            ))
            .into());
        }

        Ok((object_type, payload))
    }

    fn open_packs(&self) -> PackSet {
        PackSet::open(&self.path.join("pack")).unwrap_or_else(|err| {
            tracing::warn!(error = %err, "unable to scan pack directory");
            PackSet::default()
        })
    }

    fn with_packs<T>(&self, f: impl FnOnce(&PackSet) -> T) -> T {
        f(self
            .packs
            .borrow_mut()
            .get_or_insert_with(|| self.open_packs()))
    }

    fn write_object(&self, object_path: PathBuf, object_content: Bytes) -> anyhow::Result<()> {
        let object_dir = object_path
            .parent()
            .context(format!("invalid object path {}", object_path.display()))?;
        let temp_object_path = object_dir.join(Self::generate_temp_name());

        let object_content = Self::compress(object_content)?;

        let mut file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp_object_path)
            .context(format!(
                "unable to open object file {}",
                temp_object_path.display()
            ))?;

        file.write_all(&object_content).context(format!(
            "unable to write object file {}",
            temp_object_path.display()
        ))?;
        drop(file);

        // rename the temp file onto the final path to make the write atomic
        std::fs::rename(&temp_object_path, &object_path).context(format!(
            "unable to rename object file to {}",
            object_path.display()
        ))?;

        // objects are immutable once written; mark the file read-only
        let mut permissions = std::fs::metadata(&object_path)?.permissions();
        permissions.set_readonly(true);
        let _ = std::fs::set_permissions(&object_path, permissions);

        Ok(())
    }

    fn compress(data: Bytes) -> anyhow::Result<Bytes> {
        let mut encoder =
            flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
        encoder
            .write_all(&data)
            .context("unable to compress object content")?;

        encoder
            .finish()
            .map(|compressed_content| compressed_content.into())
            .context("unable to finish compressing object content")
    }

    fn decompress(data: Bytes) -> anyhow::Result<Bytes> {
        let mut decoder = flate2::read::ZlibDecoder::new(&*data);
        let mut decompressed_content = Vec::new();
        decoder
            .read_to_end(&mut decompressed_content)
            .map_err(|err| CoreError::Corrupt(format!("unable to decompress object: {err}")))?;

        Ok(decompressed_content.into())
    }

    fn generate_temp_name() -> String {
        format!("tmp-obj-{}", rand::random::<u32>())
    }

    /// Find all objects whose id starts with the given hex prefix, used to
    /// resolve abbreviated ids. Multiple matches mean the prefix is
    /// ambiguous; the caller decides how to report that.
    pub fn find_objects_by_prefix(&self, prefix: &str) -> anyhow::Result<Vec<ObjectId>> {
        let mut matches = Vec::new();

        if prefix.len() >= 2 {
            let dir_name = &prefix[..2];
            let file_prefix = &prefix[2..];
            let dir_path = self.path.join(dir_name);

            if dir_path.is_dir() {
                for entry in std::fs::read_dir(&dir_path)? {
                    let entry = entry?;
                    let file_name = entry.file_name();
                    let file_name_str = file_name.to_string_lossy();

                    if file_name_str.starts_with(file_prefix) {
                        let full_oid = format!("{dir_name}{file_name_str}");
                        if let Ok(oid) = ObjectId::try_parse(&full_oid) {
                            matches.push(oid);
                        }
                    }
                }
            }
        } else {
            for i in 0..=255 {
                let dir_name = format!("{i:02x}");
                let dir_path = self.path.join(&dir_name);

                if dir_path.is_dir() {
                    for entry in std::fs::read_dir(&dir_path)? {
                        let entry = entry?;
                        let file_name = entry.file_name();
                        let file_name_str = file_name.to_string_lossy();
                        let full_oid = format!("{dir_name}{file_name_str}");

                        if full_oid.starts_with(prefix) {
                            matches.push(ObjectId::try_parse(&full_oid)?);
                        }
                    }
                }
            }
        }

        self.with_packs(|packs| {
            // packed objects participate in abbreviation too
            for pack_oid in packs.object_ids() {
                if pack_oid.to_hex().starts_with(prefix) && !matches.contains(&pack_oid) {
                    matches.push(pack_oid);
                }
            }
        });

        Ok(matches)
    }
}

fn type_mismatch(expected: ObjectType, actual: ObjectType) -> anyhow::Error {
    CoreError::TypeMismatch {
        expected: expected.as_str(),
        actual: actual.as_str(),
    }
    .into()
}
