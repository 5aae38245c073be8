//! Git tree object and the canonical tree codec
//!
//! Trees represent directory snapshots: ordered (mode, name, id) entries.
//!
//! ## Format
//!
//! On disk: `tree <size>\0<entries>`
//! Each entry: `<octal mode> <name>\0<20-byte-sha1>`
//!
//! ## Canonical order
//!
//! Entries are sorted by name bytes, with a '/' implicitly appended to
//! directory names for comparison. Both the encoder and every merge-walk
//! consumer rely on this invariant, so the decoder rejects out-of-order
//! input and the encoder rejects unsorted input instead of silently
//! re-sorting (id stability must never depend on a hidden sort).
//!
//! Decoding is exposed as [`TreeCursor`], an incrementally-advancing
//! cursor supporting `next`, `back(n)`, and `first_entry` so large trees
//! need not be materialized up front and positions can be reconsidered.

use crate::artifacts::core::CoreError;
use crate::artifacts::index::entry_mode::EntryMode;
use crate::artifacts::index::index_entry::IndexEntry;
use crate::artifacts::objects::object::{Object, Packable, Unpackable};
use crate::artifacts::objects::object_id::ObjectId;
use crate::artifacts::objects::object_type::ObjectType;
use crate::artifacts::objects::OBJECT_ID_RAW_LENGTH;
use anyhow::Context;
use bytes::Bytes;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::io::{BufRead, Read, Write};

/// One decoded tree entry: `<mode> <name>\0<id>` on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    pub name: String,
    pub mode: EntryMode,
    pub oid: ObjectId,
}

impl TreeEntry {
    pub fn new(name: impl Into<String>, mode: EntryMode, oid: ObjectId) -> Self {
        TreeEntry {
            name: name.into(),
            mode,
            oid,
        }
    }
}

/// The canonical tree-entry comparator: byte-wise name comparison with a
/// '/' implicitly appended to directory names.
pub fn canonical_cmp(a_name: &str, a_mode: EntryMode, b_name: &str, b_mode: EntryMode) -> Ordering {
    let a = a_name.as_bytes();
    let b = b_name.as_bytes();
    let common = a.len().min(b.len());

    match a[..common].cmp(&b[..common]) {
        Ordering::Equal => {}
        diverged => return diverged,
    }

    // One name is a prefix of the other (or they are equal): compare the
    // virtual next byte, where a directory contributes '/'.
    let next_a = a.get(common).copied().or(a_mode.is_tree().then_some(b'/'));
    let next_b = b.get(common).copied().or(b_mode.is_tree().then_some(b'/'));

    match (next_a, next_b) {
        (Some(ca), Some(cb)) => ca.cmp(&cb),
        (Some(_), None) => Ordering::Greater,
        (None, Some(_)) => Ordering::Less,
        (None, None) => Ordering::Equal,
    }
}

fn write_wire_entry(buf: &mut Vec<u8>, entry: &TreeEntry) -> anyhow::Result<()> {
    let header = format!("{:o} {}", entry.mode.as_u32(), entry.name);
    buf.write_all(header.as_bytes())?;
    buf.push(0);
    entry.oid.write_raw_to(buf)?;
    Ok(())
}

/// Encode entries into the tree payload (no object header).
///
/// The input must already be in canonical order; unsorted input is
/// rejected.
pub fn encode_entries(entries: &[TreeEntry]) -> anyhow::Result<Bytes> {
    let mut buf = Vec::new();

    for (i, entry) in entries.iter().enumerate() {
        if i > 0 {
            let prev = &entries[i - 1];
            if canonical_cmp(&prev.name, prev.mode, &entry.name, entry.mode) != Ordering::Less {
                return Err(CoreError::Corrupt(format!(
                    "tree entries not in canonical order: {:?} then {:?}",
                    prev.name, entry.name
                ))
                .into());
            }
        }
        write_wire_entry(&mut buf, entry)?;
    }

    Ok(Bytes::from(buf))
}

/// Incrementally-advancing decoder over a tree payload.
///
/// Entries decoded so far are remembered so `back(n)` is O(1); bytes past
/// the cursor are not touched until `next` reaches them.
#[derive(Debug, Clone)]
pub struct TreeCursor {
    data: Bytes,
    /// Next undecoded byte
    pos: usize,
    /// Entries decoded so far, in stream order
    decoded: Vec<TreeEntry>,
    /// Index of the next entry `next` will return (<= decoded.len())
    cursor: usize,
}

impl TreeCursor {
    pub fn new(data: Bytes) -> Self {
        TreeCursor {
            data,
            pos: 0,
            decoded: Vec::new(),
            cursor: 0,
        }
    }

    /// Advance and return the next entry, or `None` at end of stream.
    pub fn next(&mut self) -> anyhow::Result<Option<TreeEntry>> {
        if self.cursor < self.decoded.len() {
            self.cursor += 1;
            return Ok(Some(self.decoded[self.cursor - 1].clone()));
        }

        if self.pos >= self.data.len() {
            return Ok(None);
        }

        let entry = self.decode_one()?;

        if let Some(prev) = self.decoded.last()
            && canonical_cmp(&prev.name, prev.mode, &entry.name, entry.mode) != Ordering::Less
        {
            return Err(CoreError::Corrupt(format!(
                "tree entries out of order: {:?} then {:?}",
                prev.name, entry.name
            ))
            .into());
        }

        self.decoded.push(entry.clone());
        self.cursor += 1;
        Ok(Some(entry))
    }

    /// Rewind `n` entries so they are returned again by `next`.
    pub fn back(&mut self, n: usize) -> anyhow::Result<()> {
        if n > self.cursor {
            return Err(anyhow::anyhow!(
                "cannot rewind {} entries, only {} consumed",
                n,
                self.cursor
            ));
        }
        self.cursor -= n;
        Ok(())
    }

    /// Was the most recently returned entry the very first in the stream?
    pub fn first_entry(&self) -> bool {
        self.cursor == 1
    }

    /// The most recently returned entry, if any.
    pub fn current(&self) -> Option<&TreeEntry> {
        self.cursor.checked_sub(1).map(|i| &self.decoded[i])
    }

    fn decode_one(&mut self) -> anyhow::Result<TreeEntry> {
        let data = &self.data[..];

        let space = data[self.pos..]
            .iter()
            .position(|&b| b == b' ')
            .ok_or_else(|| CoreError::Corrupt("unexpected EOF in tree entry mode".to_string()))?;
        let mode_str = std::str::from_utf8(&data[self.pos..self.pos + space])
            .map_err(|_| CoreError::Corrupt("non-utf8 tree entry mode".to_string()))?;
        let mode = EntryMode::from_octal_str(mode_str)?;
        self.pos += space + 1;

        let nul = data[self.pos..]
            .iter()
            .position(|&b| b == b'\0')
            .ok_or_else(|| CoreError::Corrupt("tree entry name missing NUL".to_string()))?;
        let name = std::str::from_utf8(&data[self.pos..self.pos + nul])
            .map_err(|_| CoreError::Corrupt("non-utf8 tree entry name".to_string()))?
            .to_owned();
        self.pos += nul + 1;

        if self.pos + OBJECT_ID_RAW_LENGTH > data.len() {
            return Err(CoreError::Corrupt("unexpected EOF in tree entry id".to_string()).into());
        }
        let mut raw = [0u8; OBJECT_ID_RAW_LENGTH];
        raw.copy_from_slice(&data[self.pos..self.pos + OBJECT_ID_RAW_LENGTH]);
        self.pos += OBJECT_ID_RAW_LENGTH;

        Ok(TreeEntry::new(name, mode, ObjectId::from_raw(raw)))
    }
}

/// Internal node while building a tree from index entries.
#[derive(Debug, Clone)]
enum TreeNode {
    /// File entry (blob)
    File(IndexEntry),
    /// Directory entry (nested tree)
    Directory(Tree),
}

impl TreeNode {
    fn mode(&self) -> EntryMode {
        match self {
            TreeNode::File(entry) => entry.metadata.mode,
            TreeNode::Directory(_) => EntryMode::Directory,
        }
    }

    fn oid(&self) -> anyhow::Result<ObjectId> {
        match self {
            TreeNode::File(entry) => Ok(entry.oid),
            TreeNode::Directory(tree) => tree.object_id(),
        }
    }
}

/// Git tree object representing a directory snapshot
///
/// Trees maintain two sets of entries:
/// - `readable_entries`: for trees decoded from the database
/// - `writeable_entries`: for trees being built from the index, keyed with
///   a trailing '/' on directory names so the map order is canonical
#[derive(Debug, Clone, Default)]
pub struct Tree {
    readable_entries: Vec<TreeEntry>,
    writeable_entries: BTreeMap<String, TreeNode>,
}

impl Tree {
    /// Build a hierarchical tree from a flat, path-sorted list of index
    /// entries, creating intermediate directories as needed.
    pub fn build<'e>(entries: impl Iterator<Item = &'e IndexEntry>) -> anyhow::Result<Self> {
        let mut root = Self::default();

        for entry in entries {
            let parents = entry.parent_dirs()?;
            root.add_entry(parents, entry)?;
        }

        Ok(root)
    }

    /// Depth-first post-order traversal: children before parents, so child
    /// ids exist before the parent tree is stored.
    pub fn traverse<F>(&self, func: &F) -> anyhow::Result<()>
    where
        F: Fn(&Tree) -> anyhow::Result<()>,
    {
        for node in self.writeable_entries.values() {
            if let TreeNode::Directory(tree) = node {
                tree.traverse(func)?;
            }
        }
        func(self)?;

        Ok(())
    }

    fn add_entry(&mut self, parents: Vec<&std::path::Path>, entry: &IndexEntry) -> anyhow::Result<()> {
        if parents.is_empty() {
            self.writeable_entries
                .insert(entry.basename()?.to_string(), TreeNode::File(entry.clone()));
        } else {
            let parent = parents[0]
                .file_name()
                .and_then(|s| s.to_str())
                .context("invalid parent directory name")?;
            let parent = format!("{parent}/");
            let tree = match self.writeable_entries.get_mut(&parent) {
                Some(TreeNode::Directory(tree)) => tree,
                _ => {
                    self.writeable_entries
                        .insert(parent.clone(), TreeNode::Directory(Self::default()));

                    match self.writeable_entries.get_mut(&parent) {
                        Some(TreeNode::Directory(tree)) => tree,
                        _ => unreachable!(),
                    }
                }
            };
            tree.add_entry(parents[1..].to_vec(), entry)?;
        }

        Ok(())
    }

    /// Entries in canonical order, whichever side of the tree is populated.
    pub fn entries(&self) -> anyhow::Result<Vec<TreeEntry>> {
        if self.writeable_entries.is_empty() {
            return Ok(self.readable_entries.clone());
        }

        self.writeable_entries
            .iter()
            .map(|(name, node)| {
                Ok(TreeEntry::new(
                    name.trim_end_matches('/'),
                    node.mode(),
                    node.oid()?,
                ))
            })
            .collect()
    }

    /// Look up a direct child by name.
    pub fn find_entry(&self, name: &str) -> anyhow::Result<Option<TreeEntry>> {
        Ok(self
            .entries()?
            .into_iter()
            .find(|entry| entry.name == name))
    }
}

impl Packable for Tree {
    fn serialize(&self) -> anyhow::Result<Bytes> {
        // The writeable map's keys carry a trailing '/' on directories, so
        // plain map order is canonical order already.
        let content_bytes = encode_entries(&self.entries()?)?;

        let mut tree_bytes = Vec::new();
        let header = format!("{} {}\0", self.object_type().as_str(), content_bytes.len());
        tree_bytes.write_all(header.as_bytes())?;
        tree_bytes.write_all(&content_bytes)?;

        Ok(Bytes::from(tree_bytes))
    }
}

impl Unpackable for Tree {
    fn deserialize(reader: impl BufRead) -> anyhow::Result<Self> {
        let mut payload = Vec::new();
        let mut reader = reader;
        reader.read_to_end(&mut payload)?;

        let mut cursor = TreeCursor::new(Bytes::from(payload));
        let mut entries = Vec::new();
        while let Some(entry) = cursor.next()? {
            entries.push(entry);
        }

        Ok(Tree {
            readable_entries: entries,
            writeable_entries: Default::default(),
        })
    }
}

impl Object for Tree {
    fn object_type(&self) -> ObjectType {
        ObjectType::Tree
    }

    fn display(&self) -> String {
        self.entries()
            .unwrap_or_default()
            .iter()
            .map(|entry| {
                let object_type = if entry.mode.is_tree() {
                    ObjectType::Tree
                } else {
                    ObjectType::Blob
                };
                format!(
                    "{} {} {}\t{}",
                    entry.mode.as_str(),
                    object_type.as_str(),
                    entry.oid,
                    entry.name
                )
            })
            .collect::<Vec<String>>()
            .join("\n")
    }
}
