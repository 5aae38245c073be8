//! Tree diffing: a 2-way merge-walk consumer producing an ordered change
//! set between two stored trees.

pub mod tree_diff;
