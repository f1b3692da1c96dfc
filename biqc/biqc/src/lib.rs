//! # biqc
//!
//! Logical-query compiler and execution planner for BI datasets. Turns a
//! dataset description plus a declarative query into dialect-ready statement
//! trees, one per execution level: whatever the source database can run stays
//! there, the rest is relocated into the local compute engine and joined back.
//!
//! You probably want to start with the [plan] wrapper function.
//!
//! For more granular access, refer to this diagram:
//! ```ascii
//!     Dataset + QuerySpec
//!
//!       (compile) │  compile::QueryCompiler
//!                 │  compile::OptimizingQueryMutator
//!                 │  compile::ExtendedAggregationQueryMutator
//!                 ▼
//!           CompiledQuery           one query over formula trees
//!
//!         (split) │  split::MultiQueryMutator
//!                 │  {QueryForkSplitter, LevelCropSplitter}
//!                 ▼
//!        CompiledMultiQuery         a DAG of queries, one level each
//!
//!     (translate) │  translate::MultiLevelTranslator
//!                 ▼
//!       TranslatedMultiQuery        backend expression trees per dialect
//! ```
//!
//! Statement text is never rendered here: each translated query carries
//! [translate::BackendExpr] trees for an external per-dialect statement
//! builder, and executing the plan is the `biqc-exec` crate's job.
//!
//! ## Common use-cases
//!
//! - Plan a query against a dataset at run time.
//!
//!   ```
//!   # fn main() -> Result<(), biqc::Errors> {
//!   use biqc::translate::Dialect;
//!
//!   let dataset: biqc::compile::Dataset = serde_json::from_value(serde_json::json!({
//!       "avatars": [{"id": "orders", "title": "orders", "source_id": "conn_1",
//!                    "columns": [{"name": "city", "data_type": "String"}]}],
//!       "fields": [{"id": "f1", "title": "City",
//!                   "calc": {"direct": {"avatar_id": "orders", "source_column": "city"}}}],
//!   })).unwrap();
//!   let spec: biqc::compile::QuerySpec =
//!       serde_json::from_value(serde_json::json!({"select": ["f1"]})).unwrap();
//!
//!   let plan = biqc::plan(
//!       &dataset,
//!       &spec,
//!       &biqc::Options::default().with_source_dialect(Dialect::Postgres),
//!   )?;
//!   assert_eq!(plan.query_count(), 1);
//!   # Ok(())
//!   # }
//!   ```

use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

pub use error::{Error, Errors, MessageKind, Reason, Result, WithErrorInfo};
pub use span::Span;

pub mod compile;
pub mod error;
pub mod ir;
pub mod registry;
pub mod span;
pub mod split;
pub mod translate;
pub mod utils;

use compile::QueryMutator;

/// The standard operation library, built once and shared by every [plan]
/// invocation. Callers composing the pipeline by hand may build their own
/// [registry::OperationRegistry] with extra operations instead.
pub fn standard_registry() -> &'static registry::OperationRegistry {
    static REGISTRY: OnceLock<registry::OperationRegistry> = OnceLock::new();
    REGISTRY.get_or_init(registry::OperationRegistry::standard)
}

/// Compile, split and translate one query against a dataset.
///
/// This is a wrapper for:
/// - [compile::QueryCompiler] — resolve field references, lower filters and
///   derive the joined from-clause;
/// - [compile::OptimizingQueryMutator] and
///   [compile::ExtendedAggregationQueryMutator] — fold constants, then wrap
///   aggregations that carry level-of-detail or window state into query
///   forks;
/// - [split::MultiQueryMutator] — pull forks and source-inexpressible
///   subtrees into sub-queries until every query fits one execution level;
/// - [translate::MultiLevelTranslator] — render every query of the DAG to
///   backend expressions under the dialect of its level.
///
/// Advisory translation warnings are emitted through [mod@log].
///
/// # Example
/// ```
/// use biqc::compile::{Avatar, AvatarColumn, Dataset, DatasetField, FieldCalc, QuerySpec};
/// use biqc::ir::datatype::DataTypeKind;
/// use biqc::translate::Dialect;
///
/// let dataset = Dataset {
///     avatars: vec![Avatar {
///         id: "orders".into(),
///         title: "orders".into(),
///         source_id: "conn_1".into(),
///         columns: vec![AvatarColumn {
///             name: "city".into(),
///             data_type: DataTypeKind::String,
///         }],
///     }],
///     fields: vec![DatasetField {
///         id: "f1".into(),
///         title: "City".into(),
///         calc: FieldCalc::Direct {
///             avatar_id: "orders".into(),
///             source_column: "city".into(),
///         },
///         cast: None,
///         aggregation: Default::default(),
///     }],
///     relations: vec![],
///     root_avatar_id: None,
/// };
/// let spec = QuerySpec {
///     select: vec!["f1".into()],
///     ..Default::default()
/// };
///
/// let options = biqc::Options::default().with_source_dialect(Dialect::SQLite);
/// let plan = biqc::plan(&dataset, &spec, &options).unwrap();
/// assert_eq!(plan.single_top().unwrap().dialect, Dialect::SQLite);
/// ```
pub fn plan(
    dataset: &compile::Dataset,
    spec: &compile::QuerySpec,
    options: &Options,
) -> Result<translate::TranslatedMultiQuery, Errors> {
    let registry = standard_registry();

    let compiled = compile::QueryCompiler::new(registry, dataset, options.source_dialect)?
        .with_field_count_limit(options.field_count_limit)
        .compile(spec)?;
    let compiled = compile::OptimizingQueryMutator::new(registry).mutate_query(compiled)?;
    let compiled = compile::ExtendedAggregationQueryMutator::new(registry).mutate_query(compiled)?;

    let splitters: Vec<Box<dyn split::MultiQuerySplitter>> = vec![
        Box::new(split::QueryForkSplitter::new(registry)),
        Box::new(split::LevelCropSplitter::new(
            registry,
            options.source_dialect,
        )),
    ];
    let multi = split::MultiQueryMutator::new(registry, splitters)
        .mutate(ir::query::CompiledMultiQuery::single(compiled))?;

    let mut translator = translate::MultiLevelTranslator::new(
        registry,
        options.source_dialect,
        dataset.column_types(),
    );
    let translated = translator.translate(&multi)?;
    for warning in translator.take_warnings() {
        log::warn!("{}", warning.reason);
    }
    Ok(translated)
}

/// Planning options for [plan].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Options {
    /// Dialect of the dataset's source database. Queries relocated into the
    /// compute engine ignore this and translate under
    /// [translate::Dialect::Compeng].
    ///
    /// Defaults to [translate::Dialect::Generic].
    pub source_dialect: translate::Dialect,

    /// Upper bound on the number of field references one request may carry
    /// across select, group-by, order-by and filters.
    ///
    /// Defaults to [compile::DEFAULT_FIELD_COUNT_LIMIT].
    pub field_count_limit: usize,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            source_dialect: translate::Dialect::default(),
            field_count_limit: compile::DEFAULT_FIELD_COUNT_LIMIT,
        }
    }
}

impl Options {
    pub fn with_source_dialect(mut self, dialect: translate::Dialect) -> Self {
        self.source_dialect = dialect;
        self
    }

    pub fn with_field_count_limit(mut self, limit: usize) -> Self {
        self.field_count_limit = limit;
        self
    }
}
