use crate::areas::database::Database;
use crate::artifacts::database::database_entry::DatabaseEntry;
use crate::artifacts::objects::object_id::ObjectId;
use crate::artifacts::walk::merge_walk::MergeWalk;
use crate::artifacts::walk::tree_source::TreeSource;
use bitflags::bitflags;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct DiffFilter: u32 {
        const ADDED = 0b0001;
        const DELETED = 0b0010;
        const MODIFIED = 0b0100;
    }
}

impl DiffFilter {
    pub fn try_parse(s: &str) -> Option<Self> {
        let mut filter = Self::empty();

        for c in s.chars() {
            match c {
                'A' => filter |= Self::ADDED,
                'D' => filter |= Self::DELETED,
                'M' => filter |= Self::MODIFIED,
                _ => return None,
            }
        }

        Some(filter)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TreeChangeType {
    Added(DatabaseEntry),
    Deleted(DatabaseEntry),
    Modified {
        old: DatabaseEntry,
        new: DatabaseEntry,
    },
}

impl TreeChangeType {
    pub fn from_entries(old: Option<DatabaseEntry>, new: Option<DatabaseEntry>) -> Option<Self> {
        match (old, new) {
            (None, Some(new)) => Some(TreeChangeType::Added(new)),
            (Some(old), None) => Some(TreeChangeType::Deleted(old)),
            (Some(old), Some(new)) if old != new => Some(TreeChangeType::Modified { old, new }),
            _ => None, // no change, or both absent
        }
    }

    pub fn matches_filter(&self, filter: DiffFilter) -> bool {
        match self {
            TreeChangeType::Added(_) => filter.contains(DiffFilter::ADDED),
            TreeChangeType::Deleted(_) => filter.contains(DiffFilter::DELETED),
            TreeChangeType::Modified { .. } => filter.contains(DiffFilter::MODIFIED),
        }
    }

    pub fn old_entry(&self) -> Option<&DatabaseEntry> {
        match self {
            TreeChangeType::Deleted(entry) => Some(entry),
            TreeChangeType::Modified { old, .. } => Some(old),
            TreeChangeType::Added(_) => None,
        }
    }

    pub fn new_entry(&self) -> Option<&DatabaseEntry> {
        match self {
            TreeChangeType::Added(entry) => Some(entry),
            TreeChangeType::Modified { new, .. } => Some(new),
            TreeChangeType::Deleted(_) => None,
        }
    }

    pub fn status_char(&self) -> char {
        match self {
            TreeChangeType::Added(_) => 'A',
            TreeChangeType::Deleted(_) => 'D',
            TreeChangeType::Modified { .. } => 'M',
        }
    }
}

pub type ChangeSet = BTreeMap<PathBuf, TreeChangeType>;

/// Blob-level changes between two trees, computed with a 2-way recursive
/// merge-walk. Subtrees with identical ids are pruned wholesale.
#[derive(Debug)]
pub struct TreeDiff<'r> {
    database: &'r Database,
    change_set: ChangeSet,
}

impl<'r> TreeDiff<'r> {
    pub fn new(database: &'r Database) -> Self {
        TreeDiff {
            database,
            change_set: BTreeMap::new(),
        }
    }

    pub fn changes(&self) -> &ChangeSet {
        &self.change_set
    }

    pub fn get_entries(&self, path: &Path) -> (Option<&DatabaseEntry>, Option<&DatabaseEntry>) {
        if let Some(change) = self.change_set.get(path) {
            (change.old_entry(), change.new_entry())
        } else {
            (None, None)
        }
    }

    pub fn compare_oids(
        &mut self,
        old: Option<&ObjectId>,
        new: Option<&ObjectId>,
    ) -> anyhow::Result<()> {
        if old == new {
            return Ok(());
        }

        let mut walk = MergeWalk::new(vec![
            TreeSource::stored(self.database, old)?,
            TreeSource::stored(self.database, new)?,
        ])
        .recursive(true)
        .prune_identical(true);

        while walk.next_entry()? {
            let path = walk.entry_path();
            let old_entry = blob_side(&walk, 0);
            let new_entry = blob_side(&walk, 1);

            if let Some(change) = TreeChangeType::from_entries(old_entry, new_entry) {
                self.change_set.insert(path, change);
            }
        }

        Ok(())
    }
}

/// The blob-level view of one walk side: directories read as absent, so a
/// file-vs-directory clash becomes a deletion or addition of the file.
fn blob_side(walk: &MergeWalk<'_>, i: usize) -> Option<DatabaseEntry> {
    walk.entry_in(i)
        .filter(|entry| !entry.mode.is_tree())
        .map(|entry| DatabaseEntry::new(entry.oid, entry.mode))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::index::entry_mode::EntryMode;
    use crate::artifacts::index::index_entry::{EntryMetadata, IndexEntry};
    use crate::artifacts::objects::blob::Blob;
    use crate::artifacts::objects::object::Object;
    use crate::artifacts::objects::tree::Tree;
    use bytes::Bytes;
    use pretty_assertions::assert_eq;

    fn database() -> (assert_fs::TempDir, Database) {
        let dir = assert_fs::TempDir::new().unwrap();
        let database = Database::new(dir.path().join("objects").into_boxed_path());
        (dir, database)
    }

    /// Store a tree of (path, content) files, returning its id.
    fn store_tree(database: &Database, files: &[(&str, &str)]) -> ObjectId {
        let entries: Vec<IndexEntry> = files
            .iter()
            .map(|(path, content)| {
                let oid = database
                    .store(&Blob::new(Bytes::copy_from_slice(content.as_bytes())))
                    .unwrap();
                IndexEntry::new(
                    PathBuf::from(path),
                    oid,
                    EntryMetadata {
                        mode: EntryMode::Regular,
                        ..Default::default()
                    },
                )
            })
            .collect();

        let tree = Tree::build(entries.iter()).unwrap();
        tree.traverse(&|subtree| database.store(subtree).map(|_| ()))
            .unwrap();
        tree.object_id().unwrap()
    }

    #[test]
    fn reports_additions_deletions_and_modifications() {
        let (_dir, db) = database();
        let old = store_tree(
            &db,
            &[("keep.txt", "same"), ("gone.txt", "bye"), ("change.txt", "v1")],
        );
        let new = store_tree(
            &db,
            &[("keep.txt", "same"), ("fresh.txt", "hi"), ("change.txt", "v2")],
        );

        let diff = db.tree_diff(Some(&old), Some(&new)).unwrap();
        let statuses: Vec<(String, char)> = diff
            .changes()
            .iter()
            .map(|(path, change)| (path.to_string_lossy().into_owned(), change.status_char()))
            .collect();

        assert_eq!(
            statuses,
            vec![
                ("change.txt".to_string(), 'M'),
                ("fresh.txt".to_string(), 'A'),
                ("gone.txt".to_string(), 'D'),
            ]
        );
    }

    #[test]
    fn nested_changes_carry_full_paths() {
        let (_dir, db) = database();
        let old = store_tree(&db, &[("src/lib.rs", "old"), ("README", "r")]);
        let new = store_tree(&db, &[("src/lib.rs", "new"), ("README", "r")]);

        let diff = db.tree_diff(Some(&old), Some(&new)).unwrap();
        let paths: Vec<PathBuf> = diff.changes().keys().cloned().collect();
        assert_eq!(paths, vec![PathBuf::from("src/lib.rs")]);
    }

    #[test]
    fn no_tree_diffs_as_all_additions() {
        let (_dir, db) = database();
        let new = store_tree(&db, &[("a.txt", "a")]);

        let diff = db.tree_diff(None, Some(&new)).unwrap();
        assert_eq!(diff.changes().len(), 1);
        assert!(matches!(
            diff.changes().get(Path::new("a.txt")),
            Some(TreeChangeType::Added(_))
        ));
    }

    #[test]
    fn identical_trees_produce_no_changes() {
        let (_dir, db) = database();
        let tree = store_tree(&db, &[("a.txt", "a"), ("sub/b.txt", "b")]);

        let diff = db.tree_diff(Some(&tree), Some(&tree)).unwrap();
        assert!(diff.changes().is_empty());
    }

    #[test]
    fn file_replaced_by_directory() {
        let (_dir, db) = database();
        let old = store_tree(&db, &[("pkg", "was a file")]);
        let new = store_tree(&db, &[("pkg/mod.rs", "now a dir")]);

        let diff = db.tree_diff(Some(&old), Some(&new)).unwrap();
        let statuses: Vec<(String, char)> = diff
            .changes()
            .iter()
            .map(|(path, change)| (path.to_string_lossy().into_owned(), change.status_char()))
            .collect();

        assert_eq!(
            statuses,
            vec![
                ("pkg".to_string(), 'D'),
                ("pkg/mod.rs".to_string(), 'A'),
            ]
        );
    }
}
