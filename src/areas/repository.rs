//! The repository handle: one explicitly-constructed value owning the
//! database, index, refs, and workspace for a single repository root.
//! There is no process-wide registry; callers share the handle by
//! reference.

use crate::areas::database::Database;
use crate::areas::index::Index;
use crate::areas::refs::Refs;
use crate::areas::workspace::Workspace;
use crate::artifacts::objects::commit::Commit;
use crate::artifacts::objects::object_id::ObjectId;
use crate::artifacts::status::status_info::Status;
use std::cell::{Ref, RefCell, RefMut};
use std::path::Path;

pub const GIT_DIR: &str = ".git";
pub const DEFAULT_BRANCH: &str = "master";

pub struct Repository {
    path: Box<Path>,
    index: RefCell<Index>,
    database: Database,
    workspace: Workspace,
    refs: Refs,
}

impl Repository {
    /// Open (or lazily create the directory for) a repository rooted at
    /// `path`.
    pub fn new(path: &str) -> anyhow::Result<Self> {
        let path = Path::new(path);
        if !path.exists() {
            std::fs::create_dir_all(path)?;
        }
        let path = path.canonicalize()?;

        let git_path = path.join(GIT_DIR);
        let index = Index::new(git_path.join("index").into_boxed_path());
        let database = Database::new(git_path.join("objects").into_boxed_path());
        let workspace = Workspace::new(path.clone().into_boxed_path());
        let refs = Refs::new(git_path.into_boxed_path());

        Ok(Repository {
            path: path.into_boxed_path(),
            index: RefCell::new(index),
            database,
            workspace,
            refs,
        })
    }

    /// Initialize the on-disk repository layout and return the handle.
    pub fn init(path: &str) -> anyhow::Result<Self> {
        let repository = Self::new(path)?;

        let git_path = repository.path.join(GIT_DIR);
        std::fs::create_dir_all(git_path.join("objects").join("pack"))?;
        repository.refs.initialize(DEFAULT_BRANCH)?;

        Ok(repository)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn index(&self) -> Ref<'_, Index> {
        self.index.borrow()
    }

    pub fn index_mut(&self) -> RefMut<'_, Index> {
        self.index.borrow_mut()
    }

    pub fn database(&self) -> &Database {
        &self.database
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    pub fn refs(&self) -> &Refs {
        &self.refs
    }

    pub fn status(&'_ self) -> Status<'_> {
        Status::new(self)
    }

    /// The commit HEAD points at, if any.
    pub fn head_commit(&self) -> anyhow::Result<Option<Commit>> {
        match self.refs.read_head()? {
            None => Ok(None),
            Some(oid) => Ok(Some(self.database.parse_object_as_commit(&oid)?)),
        }
    }

    /// The root tree of the HEAD commit, if any.
    pub fn head_tree_oid(&self) -> anyhow::Result<Option<ObjectId>> {
        Ok(self.head_commit()?.map(|commit| *commit.tree_oid()))
    }
}
