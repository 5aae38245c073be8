//! Git object types and operations
//!
//! Git stores all content as objects identified by SHA-1 hashes. There are
//! four kinds:
//!
//! - **Blob**: File content (raw bytes)
//! - **Tree**: Directory listing (modes, names, and object IDs)
//! - **Commit**: Snapshot with metadata (author, message, parents, tree)
//! - **Tag**: Annotated reference to another object
//!
//! All objects serialize to the Git object format: `<type> <size>\0<content>`.

pub mod blob;
pub mod commit;
pub mod object;
pub mod object_id;
pub mod object_type;
pub mod tag;
pub mod tree;

/// Length of a binary SHA-1 hash in bytes
pub const OBJECT_ID_RAW_LENGTH: usize = 20;

/// Length of a SHA-1 hash in hexadecimal format
pub const OBJECT_ID_HEX_LENGTH: usize = 40;
