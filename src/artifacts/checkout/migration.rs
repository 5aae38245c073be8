//! Checkout migration: planning and applying the transition between two
//! trees.
//!
//! The plan comes from a 3-way recursive merge-walk over (old tree,
//! index, new tree). Paths identical in all three are pruned outright;
//! for the rest, per-path actions (create, delete, overwrite) are derived
//! from the old-vs-new change and checked against the live workspace for
//! conflicts:
//!
//! - Stale files: working file differs from the index and both trees
//! - Stale directories: a directory with untracked content is in the way
//! - Untracked overwrites / removals: checkout would clobber files the
//!   index knows nothing about
//!
//! All operations are planned before anything is executed. In strict mode
//! a single conflict aborts the whole checkout before the filesystem is
//! touched; in forced mode every change is applied and the conflict and
//! removed lists are reported in the summary. After the workspace
//! mutation the index is updated to mirror the new tree with fresh stat
//! information.

use crate::areas::index::Index;
use crate::areas::repository::Repository;
use crate::artifacts::checkout::conflict::{ConflictMessage, ConflictType};
use crate::artifacts::core::{CoreError, Progress};
use crate::artifacts::database::database_entry::DatabaseEntry;
use crate::artifacts::diff::tree_diff::TreeChangeType;
use crate::artifacts::index::index_entry::IndexEntry;
use crate::artifacts::objects::object_id::ObjectId;
use crate::artifacts::status::file_change::{IndexChangeType, WorkspaceChangeType};
use crate::artifacts::status::inspector::Inspector;
use crate::artifacts::walk::merge_walk::MergeWalk;
use crate::artifacts::walk::tree_source::TreeSource;
use bytes::Bytes;
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};

/// Type of filesystem action required for checkout
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ActionType {
    /// Create new file
    Add,
    /// Delete file
    Delete,
    /// Overwrite existing file
    Modify,
}

/// Planned actions grouped by type
pub type ActionsSet = HashMap<ActionType, Vec<(PathBuf, Option<DatabaseEntry>)>>;

/// Detected conflicts grouped by type
pub type ConflictsSet = HashMap<ConflictType, Vec<PathBuf>>;

/// How conflicts abort (or don't abort) a checkout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CheckoutMode {
    /// Any conflict aborts before the filesystem is touched
    #[default]
    Strict,
    /// Conflicting paths are overwritten or deleted anyway; the summary
    /// reports them
    Force,
}

/// Result of a completed checkout.
#[derive(Debug, Default)]
pub struct CheckoutSummary {
    /// Paths that conflicted (empty in strict mode, which aborts instead)
    pub conflicts: ConflictsSet,
    /// Working files the checkout removed
    pub removed: Vec<PathBuf>,
}

impl CheckoutSummary {
    pub fn conflict_paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self
            .conflicts
            .values()
            .flat_map(|paths| paths.iter().cloned())
            .collect();
        paths.sort();
        paths.dedup();
        paths
    }
}

/// Checkout migration planner and executor.
pub struct Migration<'r> {
    repository: &'r Repository,
    index: &'r mut Index,
    old_oid: Option<ObjectId>,
    new_oid: Option<ObjectId>,
    mode: CheckoutMode,
    progress: Option<&'r dyn Progress>,
    inspector: Inspector<'r>,
    actions: ActionsSet,
    conflicts: ConflictsSet,
    /// Directories to create, in creation order
    mkdirs: BTreeSet<PathBuf>,
    /// Directories that may have emptied, pruned in reverse order
    rmdirs: BTreeSet<PathBuf>,
    removed: Vec<PathBuf>,
}

impl<'r> Migration<'r> {
    pub fn new(
        repository: &'r Repository,
        index: &'r mut Index,
        old_oid: Option<ObjectId>,
        new_oid: Option<ObjectId>,
    ) -> Self {
        let actions = HashMap::from([
            (ActionType::Add, Vec::new()),
            (ActionType::Delete, Vec::new()),
            (ActionType::Modify, Vec::new()),
        ]);

        let conflicts = HashMap::from([
            (ConflictType::StaleFile, Vec::new()),
            (ConflictType::StaleDirectory, Vec::new()),
            (ConflictType::UntrackedOverwritten, Vec::new()),
            (ConflictType::UntrackedRemoved, Vec::new()),
        ]);

        let inspector = Inspector::new(repository);

        Self {
            repository,
            index,
            old_oid,
            new_oid,
            mode: CheckoutMode::default(),
            progress: None,
            inspector,
            actions,
            conflicts,
            mkdirs: BTreeSet::new(),
            rmdirs: BTreeSet::new(),
            removed: Vec::new(),
        }
    }

    pub fn with_mode(mut self, mode: CheckoutMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_progress(mut self, progress: &'r dyn Progress) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn actions(&self) -> &ActionsSet {
        &self.actions
    }

    pub fn mkdirs(&self) -> &BTreeSet<PathBuf> {
        &self.mkdirs
    }

    pub fn rmdirs(&self) -> &BTreeSet<PathBuf> {
        &self.rmdirs
    }

    pub fn check_cancelled(&self) -> anyhow::Result<()> {
        if self.progress.is_some_and(|p| p.is_cancelled()) {
            return Err(CoreError::Cancelled.into());
        }
        Ok(())
    }

    /// Plan, verify, and execute the checkout.
    pub fn apply_changes(mut self) -> anyhow::Result<CheckoutSummary> {
        if let Some(progress) = self.progress {
            progress.begin_task("checkout", None);
        }

        self.plan_changes()?;

        if self.mode == CheckoutMode::Strict {
            let errors = self.collect_errors();
            if !errors.is_empty() {
                let errors = errors
                    .iter()
                    .map(|e| format!("error: {}", e))
                    .collect::<Vec<_>>()
                    .join("\n\n");
                anyhow::bail!("\n{}\n\nAborting", errors);
            }
        }

        self.update_workspace()?;
        self.update_index()?;

        if let Some(progress) = self.progress {
            progress.end_task();
        }

        let mut conflicts = HashMap::new();
        std::mem::swap(&mut conflicts, &mut self.conflicts);
        conflicts.retain(|_, paths| !paths.is_empty());

        Ok(CheckoutSummary {
            conflicts,
            removed: std::mem::take(&mut self.removed),
        })
    }

    /// Run the 3-way walk and derive actions + conflicts per path.
    fn plan_changes(&mut self) -> anyhow::Result<()> {
        let changes = self.collect_tree_changes()?;

        for (path, change) in &changes {
            self.check_cancelled()?;
            self.check_for_conflict(path, change)?;
            self.record_change(path, change);
        }

        Ok(())
    }

    /// Walk (old, index, new) and keep every path where old and new
    /// disagree at the blob level. Paths identical in all three sources
    /// are pruned by the walk itself.
    fn collect_tree_changes(&mut self) -> anyhow::Result<Vec<(PathBuf, TreeChangeType)>> {
        let database = self.repository.database();
        let index_entries: Vec<IndexEntry> = self.index.entries().cloned().collect();

        let mut walk = MergeWalk::new(vec![
            TreeSource::stored(database, self.old_oid.as_ref())?,
            TreeSource::index(database, index_entries),
            TreeSource::stored(database, self.new_oid.as_ref())?,
        ])
        .recursive(true)
        .prune_identical(true);

        if let Some(progress) = self.progress {
            walk = walk.progress(progress);
        }

        let mut changes = Vec::new();
        while walk.next_entry()? {
            let old_entry = blob_side(&walk, 0);
            let new_entry = blob_side(&walk, 2);

            if let Some(change) = TreeChangeType::from_entries(old_entry, new_entry) {
                changes.push((walk.entry_path(), change));
            }
        }

        Ok(changes)
    }

    fn collect_errors(&self) -> Vec<String> {
        self.conflicts
            .iter()
            .filter_map(|(conflict_type, paths)| {
                if paths.is_empty() {
                    None
                } else {
                    let paths = paths
                        .iter()
                        .map(|p| format!("\t{}", p.display()))
                        .collect::<Vec<String>>();

                    let ConflictMessage { header, footer } = conflict_type.into();
                    let message = format!("{}\n{}\n{}", header, paths.join("\n"), footer);
                    Some(message)
                }
            })
            .collect::<Vec<_>>()
    }

    fn check_for_conflict(&mut self, path: &Path, change: &TreeChangeType) -> anyhow::Result<()> {
        let entry = self.index.entry_by_path(path);

        let old_entry = change.old_entry();
        let new_entry = change.new_entry();

        if self.index_differs_from_trees(entry, old_entry, new_entry) {
            self.conflicts
                .entry(ConflictType::StaleFile)
                .or_default()
                .push(path.into());

            return Ok(());
        }

        let stat = self.repository.workspace().stat_file(path).ok();
        let stat = stat.as_ref();
        let conflict_type = ConflictType::get_conflict_type(stat, entry, new_entry);

        match stat {
            Some(stat) if stat.mode.is_tree() => {
                if self.inspector.is_indirectly_tracked(path, self.index)? {
                    self.conflicts
                        .entry(conflict_type)
                        .or_default()
                        .push(path.into());
                }
            }
            Some(_) => {
                if self.inspector.check_index_against_workspace(entry, stat)?
                    != WorkspaceChangeType::None
                {
                    self.conflicts
                        .entry(conflict_type)
                        .or_default()
                        .push(path.into());
                }
            }
            None => {
                let parent = self.untracked_parent(path);
                if let Some(parent) = parent {
                    self.conflicts
                        .entry(conflict_type)
                        .or_default()
                        .push(if entry.is_some() {
                            path.into()
                        } else {
                            parent.into()
                        });
                }
            }
        }

        Ok(())
    }

    /// The nearest ancestor that is an untracked file standing where a
    /// directory must be created.
    fn untracked_parent<'p>(&self, path: &'p Path) -> Option<&'p Path> {
        path.parent()?.ancestors().find(|parent| {
            if parent.as_os_str().is_empty() || parent.as_os_str() == "." {
                return false;
            }

            match self.repository.workspace().stat_file(parent) {
                Ok(parent_stat) if parent_stat.mode.is_tree() => false,
                Ok(_) => !self.index.is_directly_tracked(parent),
                _ => false,
            }
        })
    }

    /// The index diverges from both trees at this path (a staged or
    /// unmerged edit would be lost either way).
    fn index_differs_from_trees(
        &self,
        index_entry: Option<&IndexEntry>,
        old_entry: Option<&DatabaseEntry>,
        new_entry: Option<&DatabaseEntry>,
    ) -> bool {
        self.inspector
            .check_index_against_head_tree(index_entry, old_entry)
            != IndexChangeType::None
            && self
                .inspector
                .check_index_against_head_tree(index_entry, new_entry)
                != IndexChangeType::None
    }

    fn record_change(&mut self, path: &Path, change: &TreeChangeType) {
        match change {
            TreeChangeType::Added(new_entry) => {
                self.record_mkdirs(path);
                self.actions
                    .entry(ActionType::Add)
                    .or_default()
                    .push((path.into(), Some(*new_entry)));
            }
            TreeChangeType::Deleted(_old_entry) => {
                path.ancestors().skip(1).for_each(|ancestor| {
                    if ancestor.as_os_str().is_empty() {
                        return;
                    }
                    self.rmdirs.insert(ancestor.to_path_buf());
                });

                self.removed.push(path.to_path_buf());
                self.actions
                    .entry(ActionType::Delete)
                    .or_default()
                    .push((path.into(), None));
            }
            TreeChangeType::Modified {
                old: _old_entry,
                new: new_entry,
            } => {
                self.record_mkdirs(path);
                self.actions
                    .entry(ActionType::Modify)
                    .or_default()
                    .push((path.into(), Some(*new_entry)));
            }
        }
    }

    fn record_mkdirs(&mut self, path: &Path) {
        path.ancestors().skip(1).for_each(|ancestor| {
            if ancestor.as_os_str().is_empty() {
                return;
            }
            self.mkdirs.insert(ancestor.to_path_buf());
        });
    }

    fn update_workspace(&mut self) -> anyhow::Result<()> {
        // conflicting paths survive a strict-planned run only in force
        // mode, where they are applied like any other change
        self.repository.workspace().apply_migration(self)?;

        Ok(())
    }

    fn update_index(&mut self) -> anyhow::Result<()> {
        for action_type in [ActionType::Delete, ActionType::Add, ActionType::Modify] {
            let actions = self
                .actions
                .get(&action_type)
                .ok_or_else(|| anyhow::anyhow!("invalid action type"))?
                .clone();

            for (file_path, entry) in actions {
                match action_type {
                    ActionType::Delete => self.index.remove(file_path.to_path_buf())?,
                    ActionType::Add | ActionType::Modify => {
                        let entry = entry.ok_or_else(|| {
                            anyhow::anyhow!("entry must be provided for add and modify actions")
                        })?;
                        let stat = self.repository.workspace().stat_file(&file_path)?;
                        self.index
                            .add(IndexEntry::new(file_path.to_path_buf(), entry.oid, stat))?;
                    }
                }
            }
        }

        Ok(())
    }

    pub fn load_blob_data(&self, object_id: &ObjectId) -> anyhow::Result<Bytes> {
        let blob = self.repository.database().parse_object_as_blob(object_id)?;
        Ok(blob.content().clone())
    }
}

/// The blob-level view of one walk side; directories read as absent.
fn blob_side(
    walk: &MergeWalk<'_>,
    i: usize,
) -> Option<DatabaseEntry> {
    walk.entry_in(i)
        .filter(|entry| !entry.mode.is_tree())
        .map(|entry| DatabaseEntry::new(entry.oid, entry.mode))
}
