//! Advisory lock files for cross-process mutation safety.
//!
//! Every mutable resource (the index, a ref file) is guarded by a sibling
//! `<name>.lock` file created with `O_CREAT | O_EXCL`. New content is
//! written into the lock file and committed by an atomic rename onto the
//! target, so readers never observe a partial write and a crashed writer
//! leaves the previous state intact.
//!
//! Acquisition retries with a bounded backoff; exhausting the budget
//! surfaces a typed lock-contention failure rather than blocking forever.

use crate::artifacts::core::CoreError;
use anyhow::Context;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Number of acquisition attempts before giving up
const LOCK_RETRIES: u32 = 8;

/// Initial backoff between attempts; doubles each retry
const LOCK_BACKOFF: Duration = Duration::from_millis(25);

#[derive(Debug)]
pub struct Lockfile {
    target: PathBuf,
    lock_path: PathBuf,
    file: Option<File>,
}

impl Lockfile {
    /// Acquire the lock for `target`, creating `<target>.lock` exclusively.
    pub fn acquire(target: &Path) -> anyhow::Result<Self> {
        let lock_path = Self::lock_path_for(target);

        if let Some(parent) = lock_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("unable to create directory {}", parent.display()))?;
        }

        let mut backoff = LOCK_BACKOFF;
        for attempt in 0..LOCK_RETRIES {
            match std::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&lock_path)
            {
                Ok(file) => {
                    return Ok(Lockfile {
                        target: target.to_path_buf(),
                        lock_path,
                        file: Some(file),
                    });
                }
                Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                    if attempt + 1 < LOCK_RETRIES {
                        std::thread::sleep(backoff);
                        backoff *= 2;
                    }
                }
                Err(err) => {
                    return Err(err).with_context(|| {
                        format!("unable to create lock file {}", lock_path.display())
                    });
                }
            }
        }

        Err(CoreError::LockContention(target.to_path_buf()).into())
    }

    fn lock_path_for(target: &Path) -> PathBuf {
        let mut name = target.file_name().unwrap_or_default().to_os_string();
        name.push(".lock");
        target.with_file_name(name)
    }

    /// The open lock file; new content is written here before commit.
    pub fn file(&mut self) -> &mut File {
        self.file.as_mut().expect("lock file already committed")
    }

    /// Atomically rename the lock file onto the target.
    pub fn commit(mut self) -> anyhow::Result<()> {
        use std::io::Write;

        let mut file = self.file.take().expect("lock file already committed");
        file.flush()?;
        drop(file);

        std::fs::rename(&self.lock_path, &self.target).with_context(|| {
            format!(
                "unable to rename {} to {}",
                self.lock_path.display(),
                self.target.display()
            )
        })
    }
}

impl Drop for Lockfile {
    fn drop(&mut self) {
        // Not committed: discard the lock and whatever was written into it
        if self.file.take().is_some() {
            let _ = std::fs::remove_file(&self.lock_path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn commit_replaces_target_atomically() {
        let dir = assert_fs::TempDir::new().unwrap();
        let target = dir.path().join("index");
        std::fs::write(&target, b"old").unwrap();

        let mut lock = Lockfile::acquire(&target).unwrap();
        lock.file().write_all(b"new").unwrap();
        // target still shows the previous state until commit
        assert_eq!(std::fs::read(&target).unwrap(), b"old");

        lock.commit().unwrap();
        assert_eq!(std::fs::read(&target).unwrap(), b"new");
        assert!(!dir.path().join("index.lock").exists());
    }

    #[test]
    fn drop_without_commit_discards_lock() {
        let dir = assert_fs::TempDir::new().unwrap();
        let target = dir.path().join("index");

        {
            let mut lock = Lockfile::acquire(&target).unwrap();
            lock.file().write_all(b"partial").unwrap();
        }

        assert!(!target.exists());
        assert!(!dir.path().join("index.lock").exists());
    }

    #[test]
    fn contended_lock_fails_with_typed_error() {
        let dir = assert_fs::TempDir::new().unwrap();
        let target = dir.path().join("index");

        let _held = Lockfile::acquire(&target).unwrap();
        let err = Lockfile::acquire(&target).unwrap_err();

        assert!(matches!(
            err.downcast_ref::<CoreError>(),
            Some(CoreError::LockContention(_))
        ));
    }
}
