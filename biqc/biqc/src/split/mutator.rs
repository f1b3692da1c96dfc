//! Drives the splitters over a multi-query until nothing changes.
//!
//! Each pass offers every query to every splitter in order. A split replaces
//! the query with its cropped remainder and appends the new sub-queries, so
//! later passes can split those further (a fork sub-query may still carry
//! operations its source dialect lacks). The fixed point is bounded: every
//! relocation strictly shrinks some formula.

use std::collections::BTreeSet;

use crate::error::{codes, Error, Result, WithErrorInfo};
use crate::ir::ast::inspect;
use crate::ir::query::{CompiledMultiQuery, ExecutionLevel};
use crate::registry::OperationRegistry;
use crate::split::splitter::{split_query, MultiQuerySplitter};
use crate::utils::IdArena;

pub struct MultiQueryMutator<'a> {
    registry: &'a OperationRegistry,
    splitters: Vec<Box<dyn MultiQuerySplitter + 'a>>,
}

impl<'a> MultiQueryMutator<'a> {
    pub fn new(
        registry: &'a OperationRegistry,
        splitters: Vec<Box<dyn MultiQuerySplitter + 'a>>,
    ) -> Self {
        MultiQueryMutator {
            registry,
            splitters,
        }
    }

    pub fn mutate(&self, mut multi: CompiledMultiQuery) -> Result<CompiledMultiQuery> {
        let mut ids = IdArena::seeded(multi.all_ids());
        let pass_limit = 4 + multi
            .queries
            .iter()
            .flat_map(|query| query.iter_formula_infos())
            .map(|info| inspect::node_count(&info.formula))
            .max()
            .unwrap_or(0);

        for _ in 0..pass_limit {
            let mut changed = false;
            for splitter in &self.splitters {
                let mut queries = Vec::with_capacity(multi.queries.len());
                let mut spawned = vec![];
                for query in multi.queries {
                    match split_query(self.registry, splitter.as_ref(), &query, &mut ids)? {
                        Some(outcome) => {
                            changed = true;
                            queries.push(outcome.cropped);
                            spawned.extend(outcome.subqueries);
                        }
                        None => queries.push(query),
                    }
                }
                queries.extend(spawned);
                multi = CompiledMultiQuery { queries };
            }
            if !changed {
                bubble_levels(&mut multi);
                return Ok(multi);
            }
        }
        Err(Error::new_assert("query splitting did not converge")
            .with_code(codes::SPLIT_GUARD_EXCEEDED))
    }
}

/// A source query reading a re-leveled sub-query cannot stay on the source
/// itself. The compute-engine level climbs the DAG to a fixed point.
fn bubble_levels(multi: &mut CompiledMultiQuery) {
    loop {
        let compeng: BTreeSet<String> = multi
            .queries
            .iter()
            .filter(|query| query.level_type == ExecutionLevel::Compeng)
            .map(|query| query.id.clone())
            .collect();
        let mut changed = false;
        for query in &mut multi.queries {
            if query.level_type == ExecutionLevel::SourceDb
                && query
                    .froms
                    .referenced_query_ids()
                    .iter()
                    .any(|id| compeng.contains(id))
            {
                query.level_type = ExecutionLevel::Compeng;
                changed = true;
            }
        }
        if !changed {
            return;
        }
    }
}
