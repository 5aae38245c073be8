//! Working-directory filesystem operations: listing, stat with symlink
//! and executable-bit detection, blob reads, and the application of
//! planned checkout actions.
//!
//! The workspace is also the stock implementation of the `WorkdirSource`
//! collaborator, the seam where an external resource system can replace
//! raw filesystem access for the working-tree walk.

use crate::artifacts::checkout::migration::{ActionType, Migration};
use crate::artifacts::core::{WorkdirChild, WorkdirSource};
use crate::artifacts::index::entry_mode::EntryMode;
use crate::artifacts::index::index_entry::EntryMetadata;
use crate::artifacts::objects::blob::Blob;
use anyhow::Context;
use bytes::Bytes;
use std::io::Write;
use std::os::unix::prelude::MetadataExt;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

const IGNORED_PATHS: [&str; 3] = [".git", ".", ".."];

#[derive(Debug)]
pub struct Workspace {
    path: Box<Path>,
}

impl Workspace {
    pub fn new(path: Box<Path>) -> Self {
        Workspace { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn parse_blob(&self, path: &Path) -> anyhow::Result<Blob> {
        let data = self.read_file(path)?;
        Ok(Blob::new(data))
    }

    pub fn list_dir(&self, dir_path: Option<&Path>) -> anyhow::Result<Vec<PathBuf>> {
        let dir_path = match dir_path {
            Some(p) => self.path.join(p),
            None => self.path.clone().into(),
        };

        if !dir_path.exists() {
            anyhow::bail!("the specified path does not exist: {:?}", dir_path);
        }

        if dir_path.is_dir() {
            Ok(std::fs::read_dir(&dir_path)?
                .filter_map(|entry| entry.ok())
                .filter_map(|entry| self.check_if_not_ignored_path(&entry.path()))
                .collect::<Vec<_>>())
        } else {
            anyhow::bail!("the specified path is not a directory: {:?}", dir_path);
        }
    }

    pub fn list_files(&self, root_file_path: Option<PathBuf>) -> anyhow::Result<Vec<PathBuf>> {
        let root_file_path = match root_file_path {
            Some(p) => std::fs::canonicalize(p)?,
            None => self.path.clone().into(),
        };

        if !root_file_path.exists() {
            anyhow::bail!("the specified path does not exist: {:?}", root_file_path);
        }

        if root_file_path.is_dir() {
            Ok(WalkDir::new(&root_file_path)
                .into_iter()
                .filter_map(|entry| entry.ok())
                .filter_map(|entry| self.check_if_not_ignored_file_path(entry.path()))
                .collect::<Vec<_>>())
        } else {
            Ok(vec![
                root_file_path
                    .strip_prefix(self.path.as_ref())
                    .map(PathBuf::from)
                    .unwrap_or_default(),
            ])
        }
    }

    fn is_ignored(path: &Path) -> bool {
        path.components().any(|component| {
            if let std::path::Component::Normal(name) = component {
                let name_str = name.to_string_lossy();
                IGNORED_PATHS.contains(&name_str.as_ref())
            } else {
                false
            }
        })
    }

    fn check_if_not_ignored_path(&self, path: &Path) -> Option<PathBuf> {
        if !Self::is_ignored(path) {
            Some(path.strip_prefix(self.path.as_ref()).ok()?.to_path_buf())
        } else {
            None
        }
    }

    fn check_if_not_ignored_file_path(&self, path: &Path) -> Option<PathBuf> {
        if path.is_file() && !Self::is_ignored(path) {
            Some(path.strip_prefix(self.path.as_ref()).ok()?.to_path_buf())
        } else {
            None
        }
    }

    pub fn read_file(&self, file_path: &Path) -> anyhow::Result<Bytes> {
        let file_path = self.path.join(file_path);

        let content = std::fs::read(&file_path)
            .with_context(|| format!("unable to read {}", file_path.display()))?;

        Ok(Bytes::from(content))
    }

    /// Stat a workspace-relative path without following symlinks.
    pub fn stat_file(&self, file_path: &Path) -> anyhow::Result<EntryMetadata> {
        let metadata = std::fs::symlink_metadata(self.path.join(file_path))?;

        (self.path.join(file_path).as_path(), metadata).try_into()
    }

    // The order of applying a migration matters:
    // deletions first (files, then directories bottom-up), then directory
    // creation top-down, then modified and added files.
    pub fn apply_migration(&self, migration: &Migration) -> anyhow::Result<()> {
        self.apply_migration_action_set(migration, ActionType::Delete)?;
        migration
            .rmdirs()
            .iter()
            .rev()
            .map(|dir_path| self.remove_directory(dir_path))
            .collect::<Result<Vec<()>, _>>()?;

        migration
            .mkdirs()
            .iter()
            .map(|dir_path| self.make_directory(dir_path))
            .collect::<Result<Vec<()>, _>>()?;
        self.apply_migration_action_set(migration, ActionType::Modify)?;
        self.apply_migration_action_set(migration, ActionType::Add)?;

        Ok(())
    }

    fn apply_migration_action_set(
        &self,
        migration: &Migration,
        action: ActionType,
    ) -> anyhow::Result<()> {
        migration
            .actions()
            .get(&action)
            .ok_or_else(|| anyhow::anyhow!("invalid action type"))?
            .iter()
            .map(|(file_path, entry)| {
                migration.check_cancelled()?;

                let path = self.path.join(file_path);

                if path.exists() || std::fs::symlink_metadata(&path).is_ok() {
                    let metadata = std::fs::symlink_metadata(&path).with_context(|| {
                        format!("failed to get metadata for file: {:?}", file_path)
                    })?;

                    if metadata.is_dir() {
                        std::fs::remove_dir_all(&path).with_context(|| {
                            format!("failed to remove existing directory: {:?}", file_path)
                        })?;
                    } else {
                        std::fs::remove_file(&path)
                            .with_context(|| format!("failed to remove file: {:?}", file_path))?;
                    }
                }

                match (&action, entry) {
                    (ActionType::Delete, None) => Ok(()),
                    (ActionType::Add | ActionType::Modify, Some(entry)) => {
                        let data = migration.load_blob_data(&entry.oid)?;

                        if entry.mode.is_symlink() {
                            #[cfg(unix)]
                            {
                                let target = String::from_utf8_lossy(&data).into_owned();
                                std::os::unix::fs::symlink(target, &path).with_context(|| {
                                    format!("failed to create symlink: {:?}", file_path)
                                })?;
                            }
                            return Ok(());
                        }

                        let mut file = std::fs::OpenOptions::new()
                            .write(true)
                            .create(true)
                            .truncate(true)
                            .open(&path)
                            .with_context(|| format!("failed to open file: {:?}", file_path))?;

                        file.write_all(&data)
                            .with_context(|| format!("failed to write to file: {:?}", file_path))?;

                        #[cfg(unix)]
                        {
                            use std::os::unix::fs::PermissionsExt;
                            let mode = if entry.mode == EntryMode::Executable {
                                0o755
                            } else {
                                0o644
                            };
                            let permissions = std::fs::Permissions::from_mode(mode);
                            std::fs::set_permissions(&path, permissions).with_context(|| {
                                format!("failed to set permissions for file: {:?}", file_path)
                            })?;
                        }

                        Ok(())
                    }
                    _ => Err(anyhow::anyhow!("invalid action and entry combination")),
                }
            })
            .collect::<Result<Vec<()>, _>>()?;

        Ok(())
    }

    fn remove_directory(&self, dir_path: &Path) -> anyhow::Result<()> {
        let dir_path = self.path.join(dir_path);

        // only prune directories that are actually empty by now
        if dir_path.is_dir()
            && std::fs::read_dir(&dir_path)?.next().is_none()
        {
            std::fs::remove_dir(&dir_path)?;
        }

        Ok(())
    }

    fn make_directory(&self, dir_path: &Path) -> anyhow::Result<()> {
        let dir_path = self.path.join(dir_path);

        if !dir_path.exists() {
            std::fs::create_dir_all(&dir_path)?;
            return Ok(());
        }

        let metadata = std::fs::metadata(&dir_path)?;
        if metadata.is_file() {
            std::fs::remove_file(&dir_path)?;
            std::fs::create_dir(&dir_path)?;
        }

        Ok(())
    }
}

impl WorkdirSource for Workspace {
    fn list_children(&self, dir: &Path) -> anyhow::Result<Vec<WorkdirChild>> {
        let dir = if dir.as_os_str().is_empty() {
            None
        } else {
            Some(dir)
        };

        self.list_dir(dir)?
            .into_iter()
            .map(|relative| {
                let metadata = std::fs::symlink_metadata(self.path.join(&relative))?;
                let stat: EntryMetadata =
                    (self.path.join(&relative).as_path(), metadata.clone()).try_into()?;

                Ok(WorkdirChild {
                    path: relative,
                    is_dir: metadata.is_dir(),
                    is_symlink: metadata.file_type().is_symlink(),
                    is_executable: stat.mode == EntryMode::Executable,
                    size: metadata.size(),
                    mtime: metadata.mtime(),
                })
            })
            .collect()
    }

    fn open_content(&self, path: &Path) -> anyhow::Result<Bytes> {
        self.read_file(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn list_children_skips_the_git_directory() {
        let dir = assert_fs::TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join(".git")).unwrap();
        std::fs::create_dir(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("README"), b"hi").unwrap();

        let workspace = Workspace::new(dir.path().to_path_buf().into_boxed_path());
        let mut names: Vec<String> = workspace
            .list_children(Path::new(""))
            .unwrap()
            .into_iter()
            .map(|child| child.path.to_string_lossy().into_owned())
            .collect();
        names.sort();

        assert_eq!(names, vec!["README", "src"]);
    }

    #[test]
    fn stat_detects_modes() {
        let dir = assert_fs::TempDir::new().unwrap();
        std::fs::write(dir.path().join("plain"), b"x").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();

        let workspace = Workspace::new(dir.path().to_path_buf().into_boxed_path());
        assert_eq!(
            workspace.stat_file(Path::new("plain")).unwrap().mode,
            EntryMode::Regular
        );
        assert_eq!(
            workspace.stat_file(Path::new("sub")).unwrap().mode,
            EntryMode::Directory
        );

        #[cfg(unix)]
        {
            std::os::unix::fs::symlink("plain", dir.path().join("link")).unwrap();
            assert_eq!(
                workspace.stat_file(Path::new("link")).unwrap().mode,
                EntryMode::Symlink
            );
        }
    }
}
