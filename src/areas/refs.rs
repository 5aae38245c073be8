//! References: HEAD and the files under `refs/`.
//!
//! A ref file contains either a 40-character hex object id (direct) or a
//! `ref: <path>` line (symbolic). HEAD normally points at a branch under
//! `refs/heads/`; resolution follows symbolic indirections recursively.
//! Updates go through a lock file and commit by atomic rename.

use crate::areas::lockfile::Lockfile;
use crate::artifacts::core::CoreError;
use crate::artifacts::objects::object_id::ObjectId;
use derive_new::new;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Regex pattern for parsing symbolic references
const SYMREF_REGEX: &str = r"^ref: (.+)$";

/// Name of the HEAD reference
pub const HEAD_REF_NAME: &str = "HEAD";

#[derive(Debug, new)]
pub struct Refs {
    /// Path to the repository metadata directory (typically `.git`)
    path: Box<Path>,
}

/// A ref file's payload: symbolic indirection or a direct id.
#[derive(Debug, Clone)]
enum SymRefOrOid {
    SymRef { sym_ref_name: String },
    Oid(ObjectId),
}

impl SymRefOrOid {
    fn read_symref_or_oid(path: &Path) -> anyhow::Result<Option<SymRefOrOid>> {
        if !path.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(path)?;
        let content = content.trim();

        if content.is_empty() {
            return Ok(None);
        }

        let symref_match = regex::Regex::new(SYMREF_REGEX)?.captures(content);
        if let Some(symref_match) = symref_match {
            Ok(Some(SymRefOrOid::SymRef {
                sym_ref_name: symref_match[1].to_string(),
            }))
        } else {
            Ok(Some(SymRefOrOid::Oid(ObjectId::try_parse(content)?)))
        }
    }
}

impl Refs {
    /// Lay down the initial ref structure: `HEAD` pointing at a branch
    /// that does not exist yet, plus the `refs/` directories.
    pub fn initialize(&self, default_branch: &str) -> anyhow::Result<()> {
        for dir in ["refs/heads", "refs/tags", "refs/remotes"] {
            std::fs::create_dir_all(self.path.join(dir))?;
        }

        let head = self.path.join(HEAD_REF_NAME);
        if !head.exists() {
            std::fs::write(&head, format!("ref: refs/heads/{default_branch}\n"))?;
        }

        Ok(())
    }

    /// The id HEAD resolves to, following symbolic indirection. `None`
    /// for a repository with no commits yet.
    pub fn read_head(&self) -> anyhow::Result<Option<ObjectId>> {
        self.read_symref(&self.path.join(HEAD_REF_NAME))
    }

    /// The final symbolic name in the chain starting at `source`
    /// (HEAD when `None`): e.g. HEAD -> refs/heads/main yields
    /// "refs/heads/main".
    pub fn current_ref(&self, source: Option<String>) -> anyhow::Result<String> {
        let source = source.unwrap_or_else(|| HEAD_REF_NAME.to_string());

        let ref_content = SymRefOrOid::read_symref_or_oid(self.path.join(&source).as_path())?;

        match ref_content {
            Some(SymRefOrOid::SymRef { sym_ref_name }) => self.current_ref(Some(sym_ref_name)),
            Some(_) | None => Ok(source),
        }
    }

    /// Read a ref by name, trying the literal path, then `refs/heads/`,
    /// then `refs/tags/`.
    pub fn read_ref(&self, name: &str) -> anyhow::Result<Option<ObjectId>> {
        for candidate in Self::candidate_paths(name) {
            let oid = self.read_symref(&self.path.join(candidate))?;
            if oid.is_some() {
                return Ok(oid);
            }
        }
        Ok(None)
    }

    /// Update a ref (creating it if needed) under its lock file.
    pub fn update_ref(&self, name: &str, oid: &ObjectId) -> anyhow::Result<()> {
        let ref_path = self.path.join(name);
        let mut lock = Lockfile::acquire(&ref_path)?;
        writeln!(lock.file(), "{oid}")?;
        lock.commit()
    }

    /// Point the current branch (whatever HEAD resolves to) at `oid`.
    pub fn update_head(&self, oid: &ObjectId) -> anyhow::Result<()> {
        let target = self.current_ref(None)?;
        self.update_ref(&target, oid)
    }

    /// Re-point HEAD itself at a branch, as a branch switch does.
    pub fn set_head_symbolic(&self, branch_ref: &str) -> anyhow::Result<()> {
        let head_path = self.path.join(HEAD_REF_NAME);
        let mut lock = Lockfile::acquire(&head_path)?;
        writeln!(lock.file(), "ref: {branch_ref}")?;
        lock.commit()
    }

    /// Detach HEAD onto a specific commit.
    pub fn set_head_detached(&self, oid: &ObjectId) -> anyhow::Result<()> {
        let head_path = self.path.join(HEAD_REF_NAME);
        let mut lock = Lockfile::acquire(&head_path)?;
        writeln!(lock.file(), "{oid}")?;
        lock.commit()
    }

    /// Does a local branch with this short name exist?
    pub fn branch_exists(&self, name: &str) -> bool {
        self.path.join("refs").join("heads").join(name).exists()
    }

    /// Resolve a user-supplied name to an id: a full or abbreviated hex
    /// id, or a ref name.
    pub fn resolve(&self, name: &str, database: &crate::areas::database::Database) -> anyhow::Result<ObjectId> {
        if name == HEAD_REF_NAME {
            return self
                .read_head()?
                .ok_or_else(|| CoreError::NotFound("HEAD has no commits".to_string()).into());
        }

        if let Some(oid) = self.read_ref(name)? {
            return Ok(oid);
        }

        if name.len() == 40
            && let Ok(oid) = ObjectId::try_parse(name)
        {
            return Ok(oid);
        }

        if name.len() >= 4 && name.chars().all(|c| c.is_ascii_hexdigit()) {
            let mut matches = database.find_objects_by_prefix(name)?;
            match matches.len() {
                0 => {}
                1 => return Ok(matches.remove(0)),
                _ => anyhow::bail!("ambiguous object id prefix {name}"),
            }
        }

        Err(CoreError::NotFound(format!("revision {name}")).into())
    }

    fn candidate_paths(name: &str) -> Vec<PathBuf> {
        vec![
            PathBuf::from(name),
            PathBuf::from("refs").join("heads").join(name),
            PathBuf::from("refs").join("tags").join(name),
        ]
    }

    fn read_symref(&self, path: &Path) -> anyhow::Result<Option<ObjectId>> {
        let ref_content = SymRefOrOid::read_symref_or_oid(path)?;

        match ref_content {
            Some(SymRefOrOid::SymRef { sym_ref_name }) => {
                self.read_symref(self.path.join(sym_ref_name).as_path())
            }
            Some(SymRefOrOid::Oid(oid)) => Ok(Some(oid)),
            None => Ok(None),
        }
    }
}
