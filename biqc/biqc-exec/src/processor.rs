//! The processor seam and per-level execution planning.
//!
//! [plan_level] turns the queries of one execution level into an ordered
//! [StreamOperation] batch. A [DataProcessor] then runs that batch against
//! its engine: the source-database processor renders statements and talks to
//! the warehouse, the compute-engine processor materializes uploaded streams
//! and evaluates statements locally. Planning is pure; all I/O lives behind
//! the trait.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use async_trait::async_trait;
use itertools::Itertools;

use biqc::error::{codes, Error, Result, WithErrorInfo};
use biqc::ir::query::{ExecutionLevel, FromObject, QueryId};
use biqc::translate::{TranslatedMultiQuery, TranslatedQuery};
use biqc::utils::{toposort, IdArena};

use crate::ops::{query_data_key, CalcOp, DownloadOp, JoinOp, StreamOperation, UploadOp};
use crate::stream::{DataStream, StreamId};

/// Runs operation batches for one execution level.
///
/// Implementations acquire engine connections for the duration of one `run`
/// call and release them on error or cancel; a stream returned from `run`
/// may keep pulling chunks from the engine lazily.
#[async_trait]
pub trait DataProcessor: Send + Sync {
    /// Runs one operation batch. `input_streams` are consumed; the streams
    /// named by `output_stream_ids` come back in that order.
    async fn run(
        &self,
        operations: Vec<StreamOperation>,
        input_streams: Vec<DataStream>,
        output_stream_ids: Vec<StreamId>,
    ) -> Result<Vec<DataStream>>;
}

/// The operation batch for one level plus the streams it leaves behind.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LevelPlan {
    pub operations: Vec<StreamOperation>,
    pub output_stream_ids: Vec<StreamId>,
}

impl LevelPlan {
    /// An empty plan: the level has nothing scheduled and surrounding levels
    /// see the streams untouched.
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

/// Plans the operation batch for `level`.
///
/// Per query: a `JoinOp` assembles its sources when it is a bottom query at
/// the source level, reads more than one source, or has no sources at all
/// (the empty-source case binds one arbitrary avatar for connection
/// metadata); a `CalcOp` runs the statement; a `DownloadOp` materializes the
/// result of the top query under its hard row limit. Results of other
/// levels enter the compute engine through `UploadOp`s and stay addressable
/// under their query id.
pub fn plan_level(
    multi: &TranslatedMultiQuery,
    level: ExecutionLevel,
    input_stream_ids: &[StreamId],
) -> Result<LevelPlan> {
    if multi.queries_at(level).is_empty() {
        return Ok(LevelPlan::default());
    }
    let plan = LevelPlanner::new(multi, level, input_stream_ids).plan()?;
    log::debug!(
        "planned {} operations at {level}: {}",
        plan.operations.len(),
        plan.operations.iter().join("; "),
    );
    Ok(plan)
}

struct LevelPlanner<'a> {
    multi: &'a TranslatedMultiQuery,
    level: ExecutionLevel,
    ids: IdArena,
    /// Streams statements of this level can read, keyed by the query id
    /// (or incoming stream id) whose result they carry.
    available: BTreeMap<String, StreamId>,
    operations: Vec<StreamOperation>,
    output_stream_ids: Vec<StreamId>,
}

impl<'a> LevelPlanner<'a> {
    fn new(multi: &'a TranslatedMultiQuery, level: ExecutionLevel, input_stream_ids: &[StreamId]) -> Self {
        let ids = IdArena::seeded(
            multi
                .queries
                .iter()
                .map(|query| query.id.clone())
                .chain(multi.queries.iter().flat_map(|query| {
                    query.froms.froms.iter().map(|from| from.id().to_string())
                }))
                .chain(
                    multi
                        .queries
                        .iter()
                        .flat_map(|query| query.froms.avatar_ids()),
                )
                .chain(input_stream_ids.iter().cloned()),
        );
        let mut planner = LevelPlanner {
            multi,
            level,
            ids,
            available: BTreeMap::new(),
            operations: Vec::new(),
            output_stream_ids: Vec::new(),
        };
        for input in input_stream_ids {
            if level == ExecutionLevel::Compeng {
                // Lower-level results have to enter the engine first.
                let dest = planner.ids.make("s");
                planner.operations.push(StreamOperation::Upload(UploadOp {
                    stream_id: input.clone(),
                    dest_stream_id: dest.clone(),
                    alias: input.clone(),
                }));
                planner.available.insert(input.clone(), dest);
            } else {
                planner.available.insert(input.clone(), input.clone());
            }
        }
        planner
    }

    fn plan(mut self) -> Result<LevelPlan> {
        let multi = self.multi;
        let queries = multi.queries_at(self.level);
        let ordered = order_within_level(&queries)?;

        let top_ids: BTreeSet<&str> = multi
            .top_queries()
            .iter()
            .map(|query| query.id.as_str())
            .collect();
        // Results other levels read from this one.
        let exported: BTreeSet<QueryId> = multi
            .queries
            .iter()
            .filter(|query| query.level_type != self.level)
            .flat_map(|query| query.froms.referenced_query_ids())
            .collect();

        for query in ordered {
            let is_top = top_ids.contains(query.id.as_str());
            let is_exported = exported.contains(&query.id);
            self.plan_query(query, is_top, is_exported)?;
        }
        Ok(LevelPlan {
            operations: self.operations,
            output_stream_ids: self.output_stream_ids,
        })
    }

    fn plan_query(&mut self, query: &TranslatedQuery, is_top: bool, is_exported: bool) -> Result<()> {
        if query.select.is_empty() {
            return Err(Error::new_simple(format!(
                "query `{}` selects no columns",
                query.id
            ))
            .with_code(codes::EMPTY_QUERY));
        }

        let source_streams: Vec<StreamId> = query
            .froms
            .froms
            .iter()
            .map(|from| self.stream_for_from(from))
            .try_collect()?;

        let is_bottom =
            !query.froms.froms.is_empty() && query.froms.referenced_query_ids().is_empty();
        let use_empty_source = query.froms.froms.is_empty();
        let needs_join = use_empty_source
            || source_streams.len() > 1
            || (is_bottom && self.level == ExecutionLevel::SourceDb);

        let source_stream_id = if needs_join {
            let root_stream_id = if use_empty_source {
                self.fallback_root_avatar()
            } else {
                match &query.froms.root_from_id {
                    Some(root_id) => {
                        let root = query.froms.get(root_id).ok_or_else(|| {
                            Error::new_assert(format!(
                                "root FROM `{root_id}` is not among the query's sources"
                            ))
                        })?;
                        Some(self.stream_for_from(root)?)
                    }
                    None => None,
                }
            };
            let dest = self.ids.make("s");
            self.operations.push(StreamOperation::Join(JoinOp {
                stream_ids: source_streams,
                dest_stream_id: dest.clone(),
                join_on: query.join_on.clone(),
                root_stream_id,
                use_empty_source,
            }));
            dest
        } else {
            source_streams
                .into_iter()
                .next()
                .ok_or_else(|| Error::new_assert("joinless query without a source stream"))?
        };

        // The result stream keeps the query's id, so consumers upstream can
        // address it without a rename table.
        self.operations.push(StreamOperation::Calc(CalcOp {
            query_id: query.id.clone(),
            source_stream_id,
            dest_stream_id: query.id.clone(),
            query: query.clone(),
            data_key: query_data_key(query)?,
        }));
        self.available.insert(query.id.clone(), query.id.clone());

        if is_top {
            let dest = self.ids.make("s");
            self.operations.push(StreamOperation::Download(DownloadOp {
                stream_id: query.id.clone(),
                dest_stream_id: dest.clone(),
                row_count_hard_limit: query.meta.row_count_hard_limit,
            }));
            self.output_stream_ids.push(dest);
        } else if is_exported {
            self.output_stream_ids.push(query.id.clone());
        }
        Ok(())
    }

    fn stream_for_from(&self, from: &FromObject) -> Result<StreamId> {
        match from {
            // Scans keep the FROM entry's id; the processor binds them to
            // the source connection.
            FromObject::Avatar(avatar) => Ok(avatar.id.clone()),
            FromObject::Subquery(subquery) => self
                .available
                .get(&subquery.query_id)
                .cloned()
                .ok_or_else(|| {
                    Error::new_assert(format!(
                        "stream for query `{}` is not available at {}",
                        subquery.query_id, self.level
                    ))
                    .with_code(codes::INVALID_QUERY_STRUCTURE)
                }),
        }
    }

    /// A base root avatar of the plan; an empty-source join still needs a
    /// connection to run its statement against.
    fn fallback_root_avatar(&self) -> Option<String> {
        self.multi.base_root_from_ids().into_iter().next()
    }
}

/// Dependency-first order among the level's queries. References to queries
/// of other levels resolve through uploaded streams and do not constrain
/// the order here.
fn order_within_level<'q>(queries: &[&'q TranslatedQuery]) -> Result<Vec<&'q TranslatedQuery>> {
    let dependencies: Vec<(QueryId, Vec<QueryId>)> = queries
        .iter()
        .map(|query| {
            (
                query.id.clone(),
                query.froms.referenced_query_ids().into_iter().collect(),
            )
        })
        .collect();
    let Some(order) = toposort(&dependencies) else {
        return Err(
            Error::new_assert("query dependency cycle at execution planning")
                .with_code(codes::INVALID_QUERY_STRUCTURE),
        );
    };
    let by_id: HashMap<&str, &'q TranslatedQuery> = queries
        .iter()
        .map(|query| (query.id.as_str(), *query))
        .collect();
    order
        .into_iter()
        .map(|id| {
            by_id
                .get(id.as_str())
                .copied()
                .ok_or_else(|| Error::new_assert(format!("unknown query id `{id}` in level order")))
        })
        .try_collect()
}
