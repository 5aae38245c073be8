//! The staging index: the ordered, path-keyed table representing the next
//! commit's intended tree.
//!
//! Entries are keyed by raw path bytes, which is the on-disk sort order
//! and the order the tree-source abstraction needs. Reads take a shared
//! file lock and verify the trailing checksum; writes go through a lock
//! file committed by atomic rename, so concurrent processes never observe
//! a partial index.

use crate::areas::database::Database;
use crate::areas::lockfile::Lockfile;
use crate::areas::workspace::Workspace;
use crate::artifacts::core::CoreError;
use crate::artifacts::index::checksum::Checksum;
use crate::artifacts::index::index_entry::{
    ENTRY_BLOCK, ENTRY_MIN_SIZE, EntryMetadata, IndexEntry,
};
use crate::artifacts::index::index_header::IndexHeader;
use crate::artifacts::index::{HEADER_SIZE, SIGNATURE, VERSION};
use crate::artifacts::objects::object::{Packable, Unpackable};
use crate::artifacts::objects::object_id::ObjectId;
use crate::artifacts::walk::merge_walk::MergeWalk;
use crate::artifacts::walk::tree_source::TreeSource;
use bytes::Bytes;
use std::collections::{BTreeMap, BTreeSet};
use std::ops::DerefMut;
use std::path::{Path, PathBuf};

/// Staging index
///
/// Tracks files staged for the next commit along with their metadata.
/// Persisted to disk with a checksum trailer for integrity verification.
#[derive(Debug, Clone)]
pub struct Index {
    /// Path to the index file (typically `.git/index`)
    path: Box<Path>,
    /// Tracked files keyed by path bytes
    entries: BTreeMap<String, IndexEntry>,
    /// Directory hierarchy for parent-child lookups
    children: BTreeMap<String, BTreeSet<String>>,
    header: IndexHeader,
    /// Has the in-memory state diverged from disk?
    changed: bool,
}

fn key_of(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

impl Index {
    pub fn new(path: Box<Path>) -> Self {
        Index {
            path,
            entries: BTreeMap::new(),
            children: BTreeMap::new(),
            header: IndexHeader::new(String::from(SIGNATURE), VERSION, 0),
            changed: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn entry_by_path(&self, path: &Path) -> Option<&IndexEntry> {
        self.entries.get(&key_of(path))
    }

    pub fn is_changed(&self) -> bool {
        self.changed
    }

    fn clear(&mut self) {
        self.entries.clear();
        self.children.clear();
        self.header = IndexHeader::empty();
        self.changed = false;
    }

    /// Load the index from disk, verifying the checksum trailer. A missing
    /// or empty file is an empty index.
    ///
    /// Takes a shared lock on the index file for the duration of the read.
    pub fn rehydrate(&mut self) -> anyhow::Result<()> {
        if !self.path().exists() {
            self.clear();
            std::fs::File::create(self.path())?;
        }

        let mut index_file = std::fs::OpenOptions::new().read(true).open(self.path())?;
        let mut lock = file_guard::lock(&mut index_file, file_guard::Lock::Shared, 0, 1)?;

        self.clear();

        if lock.deref_mut().metadata()?.len() == 0 {
            return Ok(());
        }

        let mut reader = Checksum::new(lock.deref_mut());
        let entries_count = self.parse_header(&mut reader)?;
        self.parse_entries(entries_count, &mut reader)?;

        reader.verify()
    }

    /// Is the path a tracked file or a directory with tracked children?
    pub fn is_directly_tracked(&self, path: &Path) -> bool {
        let key = key_of(path);
        self.entries.contains_key(&key) || self.children.contains_key(&key)
    }

    fn parse_header<F: std::io::Read>(&self, reader: &mut Checksum<F>) -> anyhow::Result<u32> {
        let header_bytes = reader.read(HEADER_SIZE)?;
        let header_reader = std::io::Cursor::new(header_bytes.to_vec());
        let header = IndexHeader::deserialize(header_reader)?;

        if header.marker != SIGNATURE {
            return Err(CoreError::Corrupt("invalid index file signature".to_string()).into());
        }

        if header.version != VERSION {
            return Err(CoreError::Corrupt(format!(
                "unsupported index file version: {}",
                header.version
            ))
            .into());
        }

        Ok(header.entries_count)
    }

    /// Parse all entries, handling variable-length paths with 8-byte
    /// alignment.
    fn parse_entries<F: std::io::Read>(
        &mut self,
        entries_count: u32,
        reader: &mut Checksum<F>,
    ) -> anyhow::Result<()> {
        for _ in 0..entries_count {
            let entry_bytes = reader.read(ENTRY_MIN_SIZE)?;
            let mut entry_bytes = entry_bytes.to_vec();

            while entry_bytes[entry_bytes.len() - 1] != 0 {
                entry_bytes = [entry_bytes, reader.read(ENTRY_BLOCK)?.to_vec()].concat();
            }

            let entry_bytes = Bytes::from(entry_bytes);
            let entry_reader = std::io::Cursor::new(entry_bytes.to_vec());
            let entry = IndexEntry::deserialize(entry_reader)?;

            self.store_entry(&entry)?;
        }

        self.header.entries_count = entries_count;

        Ok(())
    }

    /// Remove entries that would clash with a new one: parent directories
    /// that are file entries, and children if this path becomes a file.
    fn discard_conflicts(&mut self, entry: &IndexEntry) -> anyhow::Result<()> {
        entry
            .parent_dirs()?
            .into_iter()
            .map(|parent| self.remove_entry(parent))
            .collect::<Result<Vec<_>, _>>()?;
        self.remove_children(&entry.name)
    }

    fn store_entry(&mut self, entry: &IndexEntry) -> anyhow::Result<()> {
        let entry_parents = entry
            .parent_dirs()?
            .into_iter()
            .map(key_of)
            .collect::<BTreeSet<_>>();

        self.entries.insert(key_of(&entry.name), entry.clone());

        for parent in entry_parents {
            self.children
                .entry(parent)
                .or_default()
                .insert(key_of(&entry.name));
        }

        Ok(())
    }

    fn remove_children(&mut self, path_name: &Path) -> anyhow::Result<()> {
        if let Some(children) = self.children.remove(&key_of(path_name)) {
            for child in children {
                self.remove_entry(Path::new(&child))?;
            }
        }

        Ok(())
    }

    fn remove_entry(&mut self, path_name: &Path) -> anyhow::Result<()> {
        let key = key_of(path_name);
        match self.entries.remove(&key) {
            None => Ok(()),
            Some(entry) => {
                entry
                    .parent_dirs()?
                    .into_iter()
                    .map(key_of)
                    .for_each(|parent| {
                        if let Some(children) = self.children.get_mut(&parent) {
                            children.remove(&key);
                            if children.is_empty() {
                                self.children.remove(&parent);
                            }
                        }
                    });

                Ok(())
            }
        }
    }

    pub fn add(&mut self, entry: IndexEntry) -> anyhow::Result<()> {
        self.discard_conflicts(&entry)?;
        self.store_entry(&entry)?;

        self.header.entries_count = self.entries.len() as u32;
        self.changed = true;

        Ok(())
    }

    /// Stage a workspace file: stat it, store its blob if the content is
    /// new, and insert the entry. Any assume-unchanged marker is cleared,
    /// since the caller just told us the file matters.
    pub fn add_path(
        &mut self,
        workspace: &Workspace,
        database: &Database,
        path: &Path,
    ) -> anyhow::Result<()> {
        let stat = workspace.stat_file(path)?;
        let blob = workspace.parse_blob(path)?;
        let oid = database.store(&blob)?;

        let mut entry = IndexEntry::new(path.to_path_buf(), oid, stat);
        entry.set_assume_unchanged(false);
        entry.set_stage(0);

        self.add(entry)
    }

    pub fn remove(&mut self, path: PathBuf) -> anyhow::Result<()> {
        self.remove_entry(&path)?;
        self.remove_children(&path)?;

        self.header.entries_count = self.entries.len() as u32;
        self.changed = true;

        Ok(())
    }

    /// Discard the current entries and repopulate from a stored tree,
    /// as reset and checkout do. Stat fields are zeroed; a later status
    /// pass refreshes them from the working tree.
    pub fn read_tree(&mut self, database: &Database, tree_oid: &ObjectId) -> anyhow::Result<()> {
        let mut walk =
            MergeWalk::new(vec![TreeSource::stored(database, Some(tree_oid))?]).recursive(true);

        self.entries.clear();
        self.children.clear();

        while walk.next_entry()? {
            let Some(entry) = walk.entry_in(0) else {
                continue;
            };
            if entry.mode.is_tree() {
                continue;
            }

            let index_entry = IndexEntry::new(
                walk.entry_path(),
                entry.oid,
                EntryMetadata {
                    mode: entry.mode,
                    ..Default::default()
                },
            );
            self.store_entry(&index_entry)?;
        }

        self.header.entries_count = self.entries.len() as u32;
        self.changed = true;

        Ok(())
    }

    /// Serialize through the index lock file and commit atomically.
    pub fn write_updates(&mut self) -> anyhow::Result<()> {
        let mut lock = Lockfile::acquire(self.path())?;

        {
            let mut writer = Checksum::new(lock.file());

            self.header = IndexHeader {
                entries_count: self.entries.len() as u32,
                ..self.header.clone()
            };
            let header_bytes = self.header.serialize()?;
            writer.write(&header_bytes)?;

            for entry in self.entries() {
                let entry_bytes = entry.serialize()?;
                writer.write(&entry_bytes)?;
            }

            writer.write_checksum()?;
        }

        lock.commit()?;
        self.changed = false;

        Ok(())
    }

    pub fn update_entry_stat(&mut self, entry: &IndexEntry, stat: EntryMetadata) {
        if let Some(existing_entry) = self.entries.get_mut(&key_of(&entry.name)) {
            let flags = existing_entry.metadata.flags;
            existing_entry.metadata = EntryMetadata { flags, ..stat };
            self.changed = true;
        }
    }

    pub fn entries(&self) -> impl Iterator<Item = &IndexEntry> {
        self.entries.values()
    }

    /// Every tracked path at or below `path` ("." means everything).
    pub fn entries_under_path(&self, path: &Path) -> Vec<PathBuf> {
        self.entries
            .values()
            .filter(|entry| {
                if path == Path::new(".") {
                    return true;
                }
                entry.name.starts_with(path) || entry.name.as_path() == path
            })
            .map(|entry| entry.name.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::index::entry_mode::EntryMode;
    use pretty_assertions::assert_eq;

    fn entry(path: &str) -> IndexEntry {
        IndexEntry::new(
            PathBuf::from(path),
            ObjectId::digest(path.as_bytes()),
            EntryMetadata {
                mode: EntryMode::Regular,
                size: 3,
                ..Default::default()
            },
        )
    }

    fn temp_index() -> (assert_fs::TempDir, Index) {
        let dir = assert_fs::TempDir::new().unwrap();
        let index = Index::new(dir.path().join("index").into_boxed_path());
        (dir, index)
    }

    #[test]
    fn entries_stay_sorted_by_path_bytes() {
        let (_dir, mut index) = temp_index();
        index.add(entry("zeta.txt")).unwrap();
        index.add(entry("a/inner.txt")).unwrap();
        index.add(entry("a-b")).unwrap();

        let names: Vec<String> = index
            .entries()
            .map(|e| e.name.to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a-b", "a/inner.txt", "zeta.txt"]);
    }

    #[test]
    fn adding_a_file_evicts_conflicting_directory_children() {
        let (_dir, mut index) = temp_index();
        index.add(entry("nested/one.txt")).unwrap();
        index.add(entry("nested/two.txt")).unwrap();

        // "nested" becomes a file; its children must go
        index.add(entry("nested")).unwrap();

        let names: Vec<String> = index
            .entries()
            .map(|e| e.name.to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["nested"]);
    }

    #[test]
    fn adding_under_a_file_evicts_the_file() {
        let (_dir, mut index) = temp_index();
        index.add(entry("nested")).unwrap();
        index.add(entry("nested/one.txt")).unwrap();

        let names: Vec<String> = index
            .entries()
            .map(|e| e.name.to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["nested/one.txt"]);
    }

    #[test]
    fn write_and_rehydrate_round_trip() {
        let (_dir, mut index) = temp_index();
        let mut staged = entry("src/lib.rs");
        staged.set_stage(2);
        staged.set_assume_unchanged(true);
        index.add(staged).unwrap();
        index.add(entry("README")).unwrap();
        index.write_updates().unwrap();

        let mut fresh = Index::new(index.path().to_path_buf().into_boxed_path());
        fresh.rehydrate().unwrap();

        let entries: Vec<&IndexEntry> = fresh.entries().collect();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name, PathBuf::from("README"));
        assert_eq!(entries[1].name, PathBuf::from("src/lib.rs"));
        assert_eq!(entries[1].stage(), 2);
        assert!(entries[1].assume_unchanged());
        assert!(!fresh.is_changed());
    }

    #[test]
    fn corrupted_file_fails_rehydrate() {
        let (_dir, mut index) = temp_index();
        index.add(entry("README")).unwrap();
        index.write_updates().unwrap();

        // flip one byte in the middle of the file
        let mut raw = std::fs::read(index.path()).unwrap();
        let mid = raw.len() / 2;
        raw[mid] ^= 0x01;
        std::fs::write(index.path(), raw).unwrap();

        let mut fresh = Index::new(index.path().to_path_buf().into_boxed_path());
        let err = fresh.rehydrate().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CoreError>(),
            Some(CoreError::Corrupt(_))
        ));
    }

    #[test]
    fn missing_file_rehydrates_empty() {
        let (_dir, mut index) = temp_index();
        index.rehydrate().unwrap();
        assert_eq!(index.entries().count(), 0);
    }
}
