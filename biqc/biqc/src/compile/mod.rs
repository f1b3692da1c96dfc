//! Dataset-to-query compilation.
//!
//! This stage takes a [Dataset] description plus a [QuerySpec] and produces
//! a single [crate::ir::query::CompiledQuery] over formula trees:
//!
//! - [spec] declares the input model: fields, avatars, relations, and the
//!   query shape itself;
//! - [formula] expands field formulas, substituting referenced fields and
//!   applying casts and default aggregations;
//! - [filters] lowers filter entries into boolean formulas, coercing
//!   argument literals to the field type;
//! - [query] assembles the parts, allocates aliases, and derives the joined
//!   from-clause from the avatars the formulas touch;
//! - [mutator] rewrites the assembled query: constant folding, then fork
//!   wrapping of aggregations for the splitter.

pub mod filters;
pub mod formula;
pub(crate) mod literal;
pub mod mutator;
pub mod query;
pub mod spec;

pub use filters::FilterOperation;
pub use formula::FormulaCompiler;
pub use mutator::{ExtendedAggregationQueryMutator, OptimizingQueryMutator, QueryMutator};
pub use query::{QueryCompiler, DEFAULT_FIELD_COUNT_LIMIT};
pub use spec::{
    Avatar, AvatarColumn, AvatarRelation, ConditionPart, Dataset, DatasetField, FieldAggregation,
    FieldCalc, FilterEntrySpec, OrderByEntrySpec, ParameterValueSpec, QuerySpec,
    RelationCondition,
};
