//! Shared engine infrastructure: the error taxonomy and the collaborator
//! traits injected at the engine boundary (progress reporting with
//! cancellation, and alternate working-tree backends).

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Typed failures raised by the engine core.
///
/// These are surfaced through `anyhow::Result` and remain downcastable so
/// callers can distinguish a recoverable not-found from corrupt data.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A referenced object, ref, or index entry does not exist.
    #[error("{0} not found")]
    NotFound(String),

    /// Malformed object header, tree encoding, or checksum mismatch.
    /// Never auto-repaired.
    #[error("corrupt data: {0}")]
    Corrupt(String),

    /// An id expected to name one kind of object named another.
    #[error("object type mismatch: expected {expected}, found {actual}")]
    TypeMismatch {
        expected: &'static str,
        actual: &'static str,
    },

    /// A mutable resource could not be locked within the retry budget.
    #[error("unable to lock {}: held by another process", .0.display())]
    LockContention(PathBuf),

    /// The operation was aborted through the progress collaborator.
    #[error("operation cancelled")]
    Cancelled,
}

impl CoreError {
    pub fn is_not_found(err: &anyhow::Error) -> bool {
        matches!(err.downcast_ref::<CoreError>(), Some(CoreError::NotFound(_)))
    }
}

/// Progress-reporting and cancellation collaborator.
///
/// `total` may be `None` when the amount of work is unknown up front, in
/// which case `worked` calls arrive without a denominator. Long-running
/// operations poll `is_cancelled` at every merge-walk step and every
/// per-file checkout operation.
pub trait Progress {
    fn begin_task(&self, name: &str, total: Option<u64>);
    fn worked(&self, units: u64);
    fn end_task(&self);

    fn is_cancelled(&self) -> bool {
        false
    }
}

/// Default collaborator: reports nothing and never cancels.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl Progress for NoProgress {
    fn begin_task(&self, _name: &str, _total: Option<u64>) {}
    fn worked(&self, _units: u64) {}
    fn end_task(&self) {}
}

/// A directory child as reported by a working-tree backend.
#[derive(Debug, Clone)]
pub struct WorkdirChild {
    /// Path relative to the workspace root.
    pub path: PathBuf,
    pub is_dir: bool,
    pub is_symlink: bool,
    pub is_executable: bool,
    pub size: u64,
    pub mtime: i64,
}

/// Alternate working-tree backend.
///
/// The filesystem tree source goes through this trait so an external
/// resource system (an IDE's virtual tree, say) can stand in for raw
/// filesystem calls. `Workspace` is the stock implementation.
pub trait WorkdirSource {
    /// List the children of a workspace-relative directory (the empty path
    /// is the root). The caller sorts; order here is unspecified.
    fn list_children(&self, dir: &Path) -> anyhow::Result<Vec<WorkdirChild>>;

    /// Open the content of a workspace-relative file.
    fn open_content(&self, path: &Path) -> anyhow::Result<bytes::Bytes>;
}
