//! Tree sources: the polymorphic inputs of the merge-walk.
//!
//! Every variant yields entries in canonical order (names byte-wise,
//! directories compared as if suffixed with '/'). Stored trees are sorted
//! by construction; the index and the working tree sort their children
//! before exposing them.

use crate::areas::database::Database;
use crate::artifacts::core::{WorkdirChild, WorkdirSource};
use crate::artifacts::index::entry_mode::EntryMode;
use crate::artifacts::index::index_entry::IndexEntry;
use crate::artifacts::objects::object_id::ObjectId;
use crate::artifacts::objects::tree::{canonical_cmp, TreeCursor};
use anyhow::Context;
use bytes::Bytes;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// One entry as seen through a tree source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceEntry {
    pub name: String,
    pub mode: EntryMode,
    /// Zero when the source cannot know the id without hashing (working
    /// tree files, synthesized index directories).
    pub oid: ObjectId,
    pub size: u64,
    pub mtime: i64,
}

/// A closed set of tree-source variants; the "create sub-source"
/// operation is a variant-returning factory.
pub enum TreeSource<'r> {
    Stored(StoredSource<'r>),
    Index(IndexSource<'r>),
    Workdir(WorkdirTreeSource<'r>),
    Empty,
}

impl<'r> TreeSource<'r> {
    /// Source over a stored tree; `None` (or a zero id) yields the empty
    /// sentinel so callers need not special-case "no tree yet".
    pub fn stored(database: &'r Database, oid: Option<&ObjectId>) -> anyhow::Result<Self> {
        match oid {
            None => Ok(TreeSource::Empty),
            Some(oid) if oid.is_zero() => Ok(TreeSource::Empty),
            Some(oid) => Ok(TreeSource::Stored(StoredSource::new(database, oid)?)),
        }
    }

    /// Source over the staging index (any iterator of entries; they are
    /// re-sorted by path bytes defensively).
    pub fn index<I>(database: &'r Database, entries: I) -> Self
    where
        I: IntoIterator<Item = IndexEntry>,
    {
        TreeSource::Index(IndexSource::new(database, entries))
    }

    /// Source over a working tree rooted at `dir` (workspace-relative;
    /// empty path for the root).
    pub fn workdir(source: &'r dyn WorkdirSource, dir: PathBuf) -> anyhow::Result<Self> {
        Ok(TreeSource::Workdir(WorkdirTreeSource::new(source, dir)?))
    }

    /// The entry this source is currently positioned on, if not exhausted.
    pub fn current(&self) -> Option<&SourceEntry> {
        match self {
            TreeSource::Stored(source) => source.current.as_ref(),
            TreeSource::Index(source) => source.current(),
            TreeSource::Workdir(source) => source.current(),
            TreeSource::Empty => None,
        }
    }

    /// Step past the current entry.
    pub fn advance(&mut self) -> anyhow::Result<()> {
        match self {
            TreeSource::Stored(source) => source.advance(),
            TreeSource::Index(source) => {
                source.pos += 1;
                Ok(())
            }
            TreeSource::Workdir(source) => {
                source.pos += 1;
                Ok(())
            }
            TreeSource::Empty => Ok(()),
        }
    }

    /// Materialize a sub-source for the current entry. Anything that is
    /// not a directory descends to the empty sentinel.
    pub fn descend(&self) -> anyhow::Result<TreeSource<'r>> {
        if self.current().is_none_or(|entry| !entry.mode.is_tree()) {
            return Ok(TreeSource::Empty);
        }

        match self {
            TreeSource::Stored(source) => {
                let entry = source.current.as_ref().expect("checked above");
                Ok(TreeSource::Stored(StoredSource::new(
                    source.database,
                    &entry.oid,
                )?))
            }
            TreeSource::Index(source) => Ok(TreeSource::Index(source.descend())),
            TreeSource::Workdir(source) => {
                let entry = source.current().expect("checked above");
                let dir = source.dir.join(&entry.name);
                Ok(TreeSource::Workdir(WorkdirTreeSource::new(
                    source.source,
                    dir,
                )?))
            }
            TreeSource::Empty => Ok(TreeSource::Empty),
        }
    }

    /// Open the current entry's content: stored and index entries resolve
    /// their blob through the database, working-tree entries go through
    /// the injected backend.
    pub fn open_content(&self) -> anyhow::Result<Bytes> {
        let entry = self
            .current()
            .context("no current entry to open")?;

        match self {
            TreeSource::Stored(source) => {
                Ok(source.database.parse_object_as_blob(&entry.oid)?.content().clone())
            }
            TreeSource::Index(source) => {
                Ok(source.database.parse_object_as_blob(&entry.oid)?.content().clone())
            }
            TreeSource::Workdir(source) => {
                source.source.open_content(&source.dir.join(&entry.name))
            }
            TreeSource::Empty => anyhow::bail!("empty source has no content"),
        }
    }
}

/// Cursor over a stored tree object, descending through the database.
pub struct StoredSource<'r> {
    database: &'r Database,
    cursor: TreeCursor,
    current: Option<SourceEntry>,
}

impl<'r> StoredSource<'r> {
    fn new(database: &'r Database, oid: &ObjectId) -> anyhow::Result<Self> {
        let payload = database.load_tree_payload(oid)?;
        let mut source = StoredSource {
            database,
            cursor: TreeCursor::new(payload),
            current: None,
        };
        source.advance()?;
        Ok(source)
    }

    fn advance(&mut self) -> anyhow::Result<()> {
        self.current = self.cursor.next()?.map(|entry| SourceEntry {
            name: entry.name,
            mode: entry.mode,
            oid: entry.oid,
            size: 0,
            mtime: 0,
        });
        Ok(())
    }
}

/// One level of the staging index, grouping contiguous entries by their
/// leading path component. Directory entries are synthetic (zero id).
pub struct IndexSource<'r> {
    database: &'r Database,
    entries: Arc<Vec<IndexEntry>>,
    level: Vec<LevelEntry>,
    /// How many leading path components this level has consumed
    depth: usize,
    pos: usize,
}

struct LevelEntry {
    entry: SourceEntry,
    /// Sub-range of `entries` covered by a synthesized directory
    range: (usize, usize),
}

impl<'r> IndexSource<'r> {
    fn new<I>(database: &'r Database, entries: I) -> Self
    where
        I: IntoIterator<Item = IndexEntry>,
    {
        let mut entries: Vec<IndexEntry> = entries.into_iter().collect();
        // index order is raw path bytes, which matches canonical tree
        // order once directories are grouped
        entries.sort_by(|a, b| path_bytes(&a.name).cmp(path_bytes(&b.name)));

        let entries = Arc::new(entries);
        let range = (0, entries.len());
        let level = Self::build_level(&entries, range, 0);

        IndexSource {
            database,
            entries,
            level,
            depth: 0,
            pos: 0,
        }
    }

    fn current(&self) -> Option<&SourceEntry> {
        self.level.get(self.pos).map(|level| &level.entry)
    }

    fn descend(&self) -> IndexSource<'r> {
        let level_entry = &self.level[self.pos];
        let depth = self.depth + 1;

        IndexSource {
            database: self.database,
            entries: self.entries.clone(),
            level: Self::build_level(&self.entries, level_entry.range, depth),
            depth,
            pos: 0,
        }
    }

    /// Group `entries[range]` by the path component at `depth`.
    fn build_level(entries: &[IndexEntry], range: (usize, usize), depth: usize) -> Vec<LevelEntry> {
        let mut level = Vec::new();
        let mut i = range.0;

        while i < range.1 {
            let components: Vec<&str> = components_of(&entries[i].name);
            let head = components[depth];

            if components.len() == depth + 1 {
                // leaf entry at this level
                let entry = &entries[i];
                level.push(LevelEntry {
                    entry: SourceEntry {
                        name: head.to_string(),
                        mode: entry.metadata.mode,
                        oid: entry.oid,
                        size: entry.metadata.size,
                        mtime: entry.metadata.mtime,
                    },
                    range: (i, i + 1),
                });
                i += 1;
            } else {
                // directory group: contiguous entries sharing this component
                let start = i;
                while i < range.1 {
                    let c = components_of(&entries[i].name);
                    if c.len() > depth && c[depth] == head {
                        i += 1;
                    } else {
                        break;
                    }
                }
                level.push(LevelEntry {
                    entry: SourceEntry {
                        name: head.to_string(),
                        mode: EntryMode::Directory,
                        oid: ObjectId::ZERO,
                        size: 0,
                        mtime: 0,
                    },
                    range: (start, i),
                });
            }
        }

        level
    }

}

fn path_bytes(path: &Path) -> &[u8] {
    path.as_os_str().as_encoded_bytes()
}

fn components_of(path: &Path) -> Vec<&str> {
    path.iter().filter_map(|c| c.to_str()).collect()
}

/// One directory of a working tree, listed through the injected
/// working-tree backend and sorted canonically.
pub struct WorkdirTreeSource<'r> {
    source: &'r dyn WorkdirSource,
    /// Workspace-relative directory this level lists
    pub(crate) dir: PathBuf,
    children: Vec<SourceEntry>,
    pos: usize,
}

impl<'r> WorkdirTreeSource<'r> {
    fn new(source: &'r dyn WorkdirSource, dir: PathBuf) -> anyhow::Result<Self> {
        let mut children: Vec<SourceEntry> = source
            .list_children(&dir)?
            .into_iter()
            .filter_map(|child| child_to_entry(&child))
            .collect();

        children.sort_by(|a, b| canonical_cmp(&a.name, a.mode, &b.name, b.mode));

        Ok(WorkdirTreeSource {
            source,
            dir,
            children,
            pos: 0,
        })
    }

    fn current(&self) -> Option<&SourceEntry> {
        self.children.get(self.pos)
    }
}

fn child_to_entry(child: &WorkdirChild) -> Option<SourceEntry> {
    let name = child.path.file_name()?.to_str()?.to_string();

    let mode = if child.is_symlink {
        EntryMode::Symlink
    } else if child.is_dir {
        EntryMode::Directory
    } else if child.is_executable {
        EntryMode::Executable
    } else {
        EntryMode::Regular
    };

    Some(SourceEntry {
        name,
        mode,
        oid: ObjectId::ZERO,
        size: child.size,
        mtime: child.mtime,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::index::index_entry::EntryMetadata;
    use pretty_assertions::assert_eq;

    fn index_entry(path: &str, mode: EntryMode) -> IndexEntry {
        IndexEntry::new(
            PathBuf::from(path),
            ObjectId::digest(path.as_bytes()),
            EntryMetadata {
                mode,
                ..Default::default()
            },
        )
    }

    fn database() -> (assert_fs::TempDir, Database) {
        let dir = assert_fs::TempDir::new().unwrap();
        let database = Database::new(dir.path().join("objects").into_boxed_path());
        (dir, database)
    }

    fn names(source: &mut TreeSource<'_>) -> Vec<(String, EntryMode)> {
        let mut out = Vec::new();
        while let Some(entry) = source.current() {
            out.push((entry.name.clone(), entry.mode));
            source.advance().unwrap();
        }
        out
    }

    #[test]
    fn index_source_groups_directories() {
        let (_dir, db) = database();
        let entries = vec![
            index_entry("src/lib.rs", EntryMode::Regular),
            index_entry("README", EntryMode::Regular),
            index_entry("src/main.rs", EntryMode::Executable),
        ];

        let mut source = TreeSource::index(&db, entries);
        assert_eq!(
            names(&mut source),
            vec![
                ("README".to_string(), EntryMode::Regular),
                ("src".to_string(), EntryMode::Directory),
            ]
        );
    }

    #[test]
    fn index_source_descends_into_groups() {
        let (_dir, db) = database();
        let entries = vec![
            index_entry("src/lib.rs", EntryMode::Regular),
            index_entry("src/walk/mod.rs", EntryMode::Regular),
        ];

        let source = TreeSource::index(&db, entries);
        // position on "src"
        let mut sub = source.descend().unwrap();
        assert_eq!(
            names(&mut sub),
            vec![
                ("lib.rs".to_string(), EntryMode::Regular),
                ("walk".to_string(), EntryMode::Directory),
            ]
        );
    }

    #[test]
    fn index_level_order_is_canonical() {
        let (_dir, db) = database();
        // byte order puts "a-b" before the "a/" group
        let entries = vec![
            index_entry("a/inner.txt", EntryMode::Regular),
            index_entry("a-b", EntryMode::Regular),
        ];

        let mut source = TreeSource::index(&db, entries);
        assert_eq!(
            names(&mut source),
            vec![
                ("a-b".to_string(), EntryMode::Regular),
                ("a".to_string(), EntryMode::Directory),
            ]
        );
    }

    #[test]
    fn index_source_opens_blob_content() {
        use crate::artifacts::objects::blob::Blob;

        let (_dir, db) = database();
        let oid = db
            .store(&Blob::new(Bytes::from_static(b"file body")))
            .unwrap();

        let mut entry = index_entry("f.txt", EntryMode::Regular);
        entry.oid = oid;

        let source = TreeSource::index(&db, vec![entry]);
        assert_eq!(&source.open_content().unwrap()[..], b"file body");
    }

    #[test]
    fn empty_source_is_always_exhausted() {
        let mut source = TreeSource::Empty;
        assert!(source.current().is_none());
        source.advance().unwrap();
        assert!(source.current().is_none());
        assert!(source.descend().unwrap().current().is_none());
    }
}
