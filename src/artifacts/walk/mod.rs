//! The tree-source abstraction and the N-way merge-walk engine built on
//! top of it.
//!
//! A *tree source* yields (mode, name, id) entries in canonical order and
//! can materialize a sub-source for a directory entry. Four variants
//! exist: a stored tree (backed by the codec and the object database), the
//! staging index, a working-tree directory, and an always-exhausted empty
//! sentinel that stands in for "no tree".
//!
//! The *merge-walk* advances any number of sources in lock-step by
//! canonical path order, exposing one logical entry per step annotated
//! with which sources contain it. Status, diff, and checkout are all
//! consumers of this traversal.

pub mod merge_walk;
pub mod tree_source;
