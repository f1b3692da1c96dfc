//! Multi-query splitting.
//!
//! A single [CompiledQuery](crate::ir::query::CompiledQuery) can rarely be
//! executed as-is: aggregations at foreign dimensions need their own grids,
//! and source dialects do not implement every operation. The splitter
//! framework rewrites one query into a DAG of sub-queries plus a cropped
//! remainder that reads from them.
//!
//! Splitters describe their intent declaratively as [QuerySplitMask]s over
//! formula subtrees; the shared framework in [splitter] validates the masks,
//! elects or generates a base sub-query carrying the dimension grid,
//! materializes the sub-queries and crops the original. [MultiQueryMutator]
//! drives the built-in splitters to a fixed point.

pub mod fork;
pub mod level;
pub mod mask;
pub mod mutator;
pub mod splitter;
#[cfg(test)]
pub(crate) mod testing;

pub use fork::QueryForkSplitter;
pub use level::LevelCropSplitter;
pub use mask::{AddFormulaInfo, AliasedFormulaSplitMask, QuerySplitMask, SubqueryType};
pub use mutator::MultiQueryMutator;
pub use splitter::MultiQuerySplitter;
