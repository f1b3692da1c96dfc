//! Formula expression AST.
//!
//! The tree arrives pre-parsed; this module defines the node variants, the
//! fold used by rewrite passes, structural digests for dimension matching
//! and index paths for split-mask relocation.

pub mod extract;
pub mod fold;
pub mod index;
pub mod inspect;
mod nodes;

pub use extract::NodeExtract;
pub use index::NodeHierarchyIndex;
pub use nodes::*;
