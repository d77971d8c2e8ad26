//! Navigation of remote listings: ordering and the tree cache.

pub mod sort;
pub mod tree;
