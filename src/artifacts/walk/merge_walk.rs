//! The N-way merge-walk: synchronized traversal of any number of tree
//! sources in canonical path order.
//!
//! Each `next_entry` step exposes one logical path annotated with which
//! sources contain it. A generalized merge step of an external merge-sort,
//! run over cursors instead of materialized arrays: the minimum current
//! path across all live sources is selected, every source tied with it is
//! marked as matching, and matched sources advance together on the next
//! step.
//!
//! Directory-vs-file clashes at one path are deliberately merged into a
//! single step with both sources matched; resolving that ambiguity is the
//! caller's concern (checkout conflict detection relies on seeing both
//! sides at once). A source yielding unsorted entries violates the walk
//! contract and produces an undefined traversal order.

use crate::artifacts::core::{CoreError, Progress};
use crate::artifacts::index::entry_mode::EntryMode;
use crate::artifacts::objects::object_id::ObjectId;
use crate::artifacts::objects::tree::canonical_cmp;
use crate::artifacts::walk::tree_source::{SourceEntry, TreeSource};
use std::cmp::Ordering;
use std::path::PathBuf;

/// Filter verdict for one logical entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkVerdict {
    /// Deliver (or descend into) this entry
    Keep,
    /// Discard this entry and, for subtrees, prune the descent
    Skip,
    /// Short-circuit: end the entire walk now
    Stop,
}

pub type WalkFilter<'f> = Box<dyn FnMut(&std::path::Path, bool) -> WalkVerdict + 'f>;

/// Saved state of an enclosing level while the walk is inside a subtree.
struct Frame<'r> {
    sources: Vec<TreeSource<'r>>,
    matches: Vec<bool>,
}

enum Pending {
    Nothing,
    /// Step matched sources past the delivered entry
    Advance,
    /// Enter the delivered entry's subtree, then continue below it
    Descend,
}

pub struct MergeWalk<'r> {
    sources: Vec<TreeSource<'r>>,
    matches: Vec<bool>,
    stack: Vec<Frame<'r>>,
    /// Directory names entered so far; the current entry's path prefix
    prefix: Vec<String>,
    pending: Pending,
    recursive: bool,
    /// Skip entries (and whole subtrees) that are byte-identical in every
    /// source; only meaningful for multi-source walks
    prune_identical: bool,
    filter: Option<WalkFilter<'r>>,
    progress: Option<&'r dyn Progress>,
    current_name: String,
    done: bool,
}

impl<'r> MergeWalk<'r> {
    pub fn new(sources: Vec<TreeSource<'r>>) -> Self {
        let n = sources.len();
        MergeWalk {
            sources,
            matches: vec![false; n],
            stack: Vec::new(),
            prefix: Vec::new(),
            pending: Pending::Nothing,
            recursive: false,
            prune_identical: false,
            filter: None,
            progress: None,
            current_name: String::new(),
            done: false,
        }
    }

    /// Descend into subtrees instead of delivering them as entries.
    pub fn recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    /// Skip entries and subtrees whose (mode, id) is identical in every
    /// source. Diff-shaped consumers only care about divergence; a
    /// subtree with one shared id cannot contain any.
    pub fn prune_identical(mut self, prune: bool) -> Self {
        self.prune_identical = prune;
        self
    }

    /// Install a filter predicate over (path, is-subtree).
    pub fn filter(mut self, filter: WalkFilter<'r>) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Install a progress/cancellation collaborator, polled every step.
    pub fn progress(mut self, progress: &'r dyn Progress) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Advance to the next logical entry. Returns `false` when the walk
    /// is exhausted (or was stopped by a filter).
    pub fn next_entry(&mut self) -> anyhow::Result<bool> {
        if self.done {
            return Ok(false);
        }

        loop {
            if self.progress.is_some_and(|p| p.is_cancelled()) {
                self.done = true;
                return Err(CoreError::Cancelled.into());
            }

            match std::mem::replace(&mut self.pending, Pending::Nothing) {
                Pending::Nothing => {}
                Pending::Advance => self.advance_matched()?,
                Pending::Descend => self.enter_subtree()?,
            }

            let Some(min_index) = self.find_minimum() else {
                // this level is exhausted; pop out of the subtree or finish
                if let Some(frame) = self.stack.pop() {
                    self.sources = frame.sources;
                    self.matches = frame.matches;
                    self.prefix.pop();
                    self.advance_matched()?;
                    continue;
                }
                self.done = true;
                return Ok(false);
            };

            self.mark_matches(min_index);
            self.current_name = self.sources[min_index]
                .current()
                .expect("minimum source has a current entry")
                .name
                .clone();

            let is_subtree = self.is_subtree();
            let all_subtrees = self.matched_entries().all(|entry| entry.mode.is_tree());

            if self.prune_identical && self.identical_everywhere() {
                self.advance_matched()?;
                continue;
            }

            if let Some(filter) = self.filter.as_mut() {
                let path = path_of(&self.prefix, &self.current_name);
                match filter(&path, is_subtree) {
                    WalkVerdict::Keep => {}
                    WalkVerdict::Skip => {
                        self.advance_matched()?;
                        continue;
                    }
                    WalkVerdict::Stop => {
                        self.done = true;
                        return Ok(false);
                    }
                }
            }

            if self.recursive && is_subtree && all_subtrees {
                // pure subtree: enter silently
                self.enter_subtree()?;
                continue;
            }

            // deliverable entry; mixed directory/file clashes are exposed
            // as-is with every tied source matched
            self.pending = if self.recursive && is_subtree {
                Pending::Descend
            } else {
                Pending::Advance
            };

            if let Some(progress) = self.progress {
                progress.worked(1);
            }

            return Ok(true);
        }
    }

    /// Number of sources being walked.
    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    /// Does source `i` contain the current entry?
    pub fn matches(&self, i: usize) -> bool {
        self.matches[i]
    }

    /// Raw mode of the current entry in source `i`; 0 when that source
    /// does not match.
    pub fn raw_mode(&self, i: usize) -> u32 {
        self.entry_in(i).map_or(0, |entry| entry.mode.as_u32())
    }

    /// Entry mode in source `i`; `Missing` when not matched.
    pub fn mode(&self, i: usize) -> EntryMode {
        self.entry_in(i).map_or(EntryMode::Missing, |entry| entry.mode)
    }

    /// Object id of the current entry in source `i`; zero when not
    /// matched (or unknown to that source).
    pub fn oid(&self, i: usize) -> ObjectId {
        self.entry_in(i).map_or(ObjectId::ZERO, |entry| entry.oid)
    }

    /// O(1) content equality between two sources at the current path.
    /// Zero (unknown) ids never compare equal.
    pub fn same_id(&self, a: usize, b: usize) -> bool {
        let (oid_a, oid_b) = (self.oid(a), self.oid(b));
        !oid_a.is_zero() && oid_a == oid_b
    }

    /// The current entry as source `i` sees it.
    pub fn entry_in(&self, i: usize) -> Option<&SourceEntry> {
        if self.matches[i] {
            self.sources[i].current()
        } else {
            None
        }
    }

    /// Name of the current entry (its final path component).
    pub fn entry_name(&self) -> &str {
        &self.current_name
    }

    /// Full path of the current entry. Assembled on demand; prefer
    /// `entry_name` in hot paths.
    pub fn entry_path(&self) -> PathBuf {
        path_of(&self.prefix, &self.current_name)
    }

    /// Is the current entry a directory in at least one matched source?
    pub fn is_subtree(&self) -> bool {
        self.matched_entries().any(|entry| entry.mode.is_tree())
    }

    /// Current subtree depth (0 at the roots).
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// All sources match and agree on (mode, id), with a known id.
    fn identical_everywhere(&self) -> bool {
        if self.sources.len() < 2 || !self.matches.iter().all(|&m| m) {
            return false;
        }

        let mut entries = self.matched_entries();
        let Some(first) = entries.next() else {
            return false;
        };
        !first.oid.is_zero()
            && entries.all(|entry| entry.oid == first.oid && entry.mode == first.mode)
    }

    fn matched_entries(&self) -> impl Iterator<Item = &SourceEntry> {
        self.sources
            .iter()
            .zip(&self.matches)
            .filter(|(_, matched)| **matched)
            .filter_map(|(source, _)| source.current())
    }

    /// Index of the source holding the canonical minimum current path.
    fn find_minimum(&self) -> Option<usize> {
        let mut min_index: Option<usize> = None;

        for (i, source) in self.sources.iter().enumerate() {
            let Some(entry) = source.current() else {
                continue;
            };

            match min_index {
                None => min_index = Some(i),
                Some(best) => {
                    let best_entry = self.sources[best].current().expect("tracked minimum");
                    if canonical_cmp(&entry.name, entry.mode, &best_entry.name, best_entry.mode)
                        == Ordering::Less
                    {
                        min_index = Some(i);
                    }
                }
            }
        }

        min_index
    }

    /// Mark every source tied with the minimum. Ties are canonical-order
    /// equality, or raw name equality so a file and a directory of the
    /// same name merge into one step.
    fn mark_matches(&mut self, min_index: usize) {
        let min_entry = self.sources[min_index]
            .current()
            .expect("minimum source has a current entry")
            .clone();

        for (i, source) in self.sources.iter().enumerate() {
            self.matches[i] = source.current().is_some_and(|entry| {
                entry.name == min_entry.name
                    || canonical_cmp(&entry.name, entry.mode, &min_entry.name, min_entry.mode)
                        == Ordering::Equal
            });
        }
    }

    fn advance_matched(&mut self) -> anyhow::Result<()> {
        for (source, matched) in self.sources.iter_mut().zip(self.matches.iter_mut()) {
            if *matched {
                source.advance()?;
                *matched = false;
            }
        }
        Ok(())
    }

    /// Push the current level and replace each source with a sub-source:
    /// matched directories descend, everything else becomes the empty
    /// sentinel.
    fn enter_subtree(&mut self) -> anyhow::Result<()> {
        let mut subs = Vec::with_capacity(self.sources.len());
        for (source, matched) in self.sources.iter().zip(&self.matches) {
            let sub = if *matched
                && source.current().is_some_and(|entry| entry.mode.is_tree())
            {
                source.descend()?
            } else {
                TreeSource::Empty
            };
            subs.push(sub);
        }

        let n = self.sources.len();
        self.stack.push(Frame {
            sources: std::mem::replace(&mut self.sources, subs),
            matches: std::mem::replace(&mut self.matches, vec![false; n]),
        });
        self.prefix.push(self.current_name.clone());

        Ok(())
    }
}

fn path_of(prefix: &[String], name: &str) -> PathBuf {
    let mut path = PathBuf::new();
    for part in prefix {
        path.push(part);
    }
    path.push(name);
    path
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::areas::database::Database;
    use crate::artifacts::index::entry_mode::EntryMode;
    use crate::artifacts::index::index_entry::{EntryMetadata, IndexEntry};
    use crate::artifacts::objects::object::Object;
    use crate::artifacts::objects::tree::Tree;
    use pretty_assertions::assert_eq;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};

    fn database() -> (assert_fs::TempDir, Database) {
        let dir = assert_fs::TempDir::new().unwrap();
        let database = Database::new(dir.path().join("objects").into_boxed_path());
        (dir, database)
    }

    fn index_entry(path: &str) -> IndexEntry {
        IndexEntry::new(
            PathBuf::from(path),
            ObjectId::digest(path.as_bytes()),
            EntryMetadata {
                mode: EntryMode::Regular,
                ..Default::default()
            },
        )
    }

    /// Store a tree built from flat (path) names and return its id.
    fn store_tree(database: &Database, paths: &[&str]) -> ObjectId {
        let entries: Vec<IndexEntry> = paths.iter().map(|p| index_entry(p)).collect();
        let tree = Tree::build(entries.iter()).unwrap();
        tree.traverse(&|subtree| database.store(subtree).map(|_| ()))
            .unwrap();
        tree.object_id().unwrap()
    }

    fn collect_paths(walk: &mut MergeWalk<'_>) -> Vec<String> {
        let mut paths = Vec::new();
        while walk.next_entry().unwrap() {
            paths.push(walk.entry_path().to_string_lossy().into_owned());
        }
        paths
    }

    #[test]
    fn disjoint_trees_visit_every_entry_once() {
        let (_dir, db) = database();
        let a = store_tree(&db, &["alpha.txt", "beta.txt"]);
        let b = store_tree(&db, &["gamma.txt", "zeta.txt"]);

        let mut walk = MergeWalk::new(vec![
            TreeSource::stored(&db, Some(&a)).unwrap(),
            TreeSource::stored(&db, Some(&b)).unwrap(),
        ]);

        let mut seen = Vec::new();
        while walk.next_entry().unwrap() {
            let matched: Vec<usize> = (0..2).filter(|&i| walk.matches(i)).collect();
            assert_eq!(matched.len(), 1, "disjoint paths match exactly one tree");
            seen.push(walk.entry_name().to_string());
        }

        assert_eq!(seen, vec!["alpha.txt", "beta.txt", "gamma.txt", "zeta.txt"]);
    }

    #[test]
    fn shared_path_emits_one_synced_entry() {
        let (_dir, db) = database();
        let a = store_tree(&db, &["shared.txt", "only-a.txt"]);
        let b = store_tree(&db, &["shared.txt", "only-b.txt"]);

        let mut walk = MergeWalk::new(vec![
            TreeSource::stored(&db, Some(&a)).unwrap(),
            TreeSource::stored(&db, Some(&b)).unwrap(),
        ]);

        let mut shared_steps = 0;
        while walk.next_entry().unwrap() {
            if walk.entry_name() == "shared.txt" {
                shared_steps += 1;
                assert!(walk.matches(0) && walk.matches(1));
                assert_eq!(walk.oid(0), ObjectId::digest(b"shared.txt"));
                assert_eq!(walk.raw_mode(0), 0o100644);
                assert!(walk.same_id(0, 1));
            }
        }
        assert_eq!(shared_steps, 1);
    }

    #[test]
    fn recursive_walk_descends_into_matching_subtrees() {
        let (_dir, db) = database();
        let a = store_tree(&db, &["src/lib.rs", "src/walk/mod.rs", "README"]);

        let mut walk =
            MergeWalk::new(vec![TreeSource::stored(&db, Some(&a)).unwrap()]).recursive(true);

        assert_eq!(
            collect_paths(&mut walk),
            vec!["README", "src/lib.rs", "src/walk/mod.rs"]
        );
    }

    #[test]
    fn non_matching_side_reads_zero() {
        let (_dir, db) = database();
        let a = store_tree(&db, &["only-a.txt"]);

        let mut walk = MergeWalk::new(vec![
            TreeSource::stored(&db, Some(&a)).unwrap(),
            TreeSource::Empty,
        ]);

        assert!(walk.next_entry().unwrap());
        assert!(walk.matches(0));
        assert!(!walk.matches(1));
        assert_eq!(walk.raw_mode(1), 0);
        assert_eq!(walk.oid(1), ObjectId::ZERO);
        assert_eq!(walk.mode(1), EntryMode::Missing);
        assert!(!walk.same_id(0, 1));
    }

    #[test]
    fn directory_file_clash_is_exposed_in_one_step() {
        let (_dir, db) = database();
        // tree A holds a file named "pkg"; tree B holds a directory "pkg"
        let a = store_tree(&db, &["pkg"]);
        let b = store_tree(&db, &["pkg/inner.txt"]);

        let mut walk = MergeWalk::new(vec![
            TreeSource::stored(&db, Some(&a)).unwrap(),
            TreeSource::stored(&db, Some(&b)).unwrap(),
        ]);

        assert!(walk.next_entry().unwrap());
        assert_eq!(walk.entry_name(), "pkg");
        assert!(walk.matches(0) && walk.matches(1));
        assert_eq!(walk.mode(0), EntryMode::Regular);
        assert_eq!(walk.mode(1), EntryMode::Directory);
        assert!(!walk.next_entry().unwrap());
    }

    #[test]
    fn recursive_clash_still_reaches_nested_files() {
        let (_dir, db) = database();
        let a = store_tree(&db, &["pkg"]);
        let b = store_tree(&db, &["pkg/inner.txt"]);

        let mut walk = MergeWalk::new(vec![
            TreeSource::stored(&db, Some(&a)).unwrap(),
            TreeSource::stored(&db, Some(&b)).unwrap(),
        ])
        .recursive(true);

        // the clash itself is delivered, then the directory side descends
        assert_eq!(collect_paths(&mut walk), vec!["pkg", "pkg/inner.txt"]);
    }

    #[test]
    fn filter_skip_discards_and_prunes() {
        let (_dir, db) = database();
        let a = store_tree(&db, &["docs/guide.md", "src/lib.rs"]);

        let mut walk = MergeWalk::new(vec![TreeSource::stored(&db, Some(&a)).unwrap()])
            .recursive(true)
            .filter(Box::new(|path, _is_subtree| {
                if path.starts_with("docs") {
                    WalkVerdict::Skip
                } else {
                    WalkVerdict::Keep
                }
            }));

        assert_eq!(collect_paths(&mut walk), vec!["src/lib.rs"]);
    }

    #[test]
    fn filter_stop_short_circuits_the_walk() {
        let (_dir, db) = database();
        let a = store_tree(&db, &["a.txt", "b.txt", "c.txt"]);

        let mut steps = 0;
        let mut walk = MergeWalk::new(vec![TreeSource::stored(&db, Some(&a)).unwrap()]).filter(
            Box::new(move |path, _| {
                if path.ends_with("b.txt") {
                    WalkVerdict::Stop
                } else {
                    WalkVerdict::Keep
                }
            }),
        );

        while walk.next_entry().unwrap() {
            steps += 1;
        }
        assert_eq!(steps, 1);
        // stopped walks stay stopped
        assert!(!walk.next_entry().unwrap());
    }

    #[test]
    fn cancellation_aborts_the_walk() {
        struct CancelAfter {
            flag: AtomicBool,
        }
        impl crate::artifacts::core::Progress for CancelAfter {
            fn begin_task(&self, _: &str, _: Option<u64>) {}
            fn worked(&self, _: u64) {
                self.flag.store(true, AtomicOrdering::SeqCst);
            }
            fn end_task(&self) {}
            fn is_cancelled(&self) -> bool {
                self.flag.load(AtomicOrdering::SeqCst)
            }
        }

        let (_dir, db) = database();
        let a = store_tree(&db, &["a.txt", "b.txt"]);
        let progress = CancelAfter {
            flag: AtomicBool::new(false),
        };

        let mut walk =
            MergeWalk::new(vec![TreeSource::stored(&db, Some(&a)).unwrap()]).progress(&progress);

        assert!(walk.next_entry().unwrap());
        let err = walk.next_entry().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CoreError>(),
            Some(CoreError::Cancelled)
        ));
    }

    #[test]
    fn index_and_stored_sources_walk_together() {
        let (_dir, db) = database();
        let tree = store_tree(&db, &["common.txt", "tracked/file.rs"]);
        let index_entries = vec![index_entry("common.txt"), index_entry("tracked/file.rs")];

        let mut walk = MergeWalk::new(vec![
            TreeSource::stored(&db, Some(&tree)).unwrap(),
            TreeSource::index(&db, index_entries),
        ])
        .recursive(true);

        let mut all_matched = true;
        let mut count = 0;
        while walk.next_entry().unwrap() {
            count += 1;
            all_matched &= walk.matches(0) && walk.matches(1);
        }
        assert_eq!(count, 2);
        assert!(all_matched);
    }
}
