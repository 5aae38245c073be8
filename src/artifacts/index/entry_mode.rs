//! Entry modes: the file-type tag carried by tree entries and index
//! entries, encoded as an octal-like integer on disk.

use crate::artifacts::core::CoreError;

#[derive(Debug, Clone, Copy, Eq, Ord, Default, PartialEq, PartialOrd, Hash)]
pub enum EntryMode {
    /// Regular file, 0o100644
    #[default]
    Regular,
    /// Executable file, 0o100755
    Executable,
    /// Symbolic link, 0o120000
    Symlink,
    /// Subtree, 0o40000
    Directory,
    /// Submodule commit pointer, 0o160000
    Gitlink,
    /// Not present in this source; never written to disk
    Missing,
}

impl EntryMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryMode::Regular => "100644",
            EntryMode::Executable => "100755",
            EntryMode::Symlink => "120000",
            EntryMode::Directory => "40000",
            EntryMode::Gitlink => "160000",
            EntryMode::Missing => "0",
        }
    }

    pub fn as_u32(&self) -> u32 {
        match self {
            EntryMode::Regular => 0o100644,
            EntryMode::Executable => 0o100755,
            EntryMode::Symlink => 0o120000,
            EntryMode::Directory => 0o40000,
            EntryMode::Gitlink => 0o160000,
            EntryMode::Missing => 0,
        }
    }

    pub fn from_u32(mode: u32) -> anyhow::Result<Self> {
        match mode {
            0o100644 => Ok(EntryMode::Regular),
            0o100755 => Ok(EntryMode::Executable),
            0o120000 => Ok(EntryMode::Symlink),
            0o40000 => Ok(EntryMode::Directory),
            0o160000 => Ok(EntryMode::Gitlink),
            0 => Ok(EntryMode::Missing),
            _ => Err(CoreError::Corrupt(format!("invalid entry mode {mode:o}")).into()),
        }
    }

    /// Parse the octal digits of a tree-entry mode field.
    pub fn from_octal_str(mode: &str) -> anyhow::Result<Self> {
        let value = u32::from_str_radix(mode, 8)
            .map_err(|_| CoreError::Corrupt(format!("invalid mode digits {mode:?}")))?;
        Self::from_u32(value)
    }

    pub fn is_tree(&self) -> bool {
        matches!(self, EntryMode::Directory)
    }

    pub fn is_file(&self) -> bool {
        matches!(self, EntryMode::Regular | EntryMode::Executable)
    }

    pub fn is_symlink(&self) -> bool {
        matches!(self, EntryMode::Symlink)
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, EntryMode::Missing)
    }
}

impl std::fmt::Display for EntryMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
