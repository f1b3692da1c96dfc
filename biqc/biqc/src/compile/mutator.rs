//! Post-assembly query rewriting.
//!
//! Two passes run between assembly and splitting: [OptimizingQueryMutator]
//! folds constant boolean structure and drops filters that became
//! tautologies, and [ExtendedAggregationQueryMutator] turns every
//! aggregation and window call into a query fork carrying the dimensions it
//! must be computed at. The splitter later turns those forks into joined
//! sub-queries.

use std::collections::HashSet;

use crate::error::{codes, Error, Result, WithErrorInfo};
use crate::ir::ast::fold::{self, FormulaFold};
use crate::ir::ast::{
    index, inspect, CallShape, Formula, FormulaItem, JoinConditionNode, JoinType, Literal,
    LiteralValue, LodKind, LodSpecifier, NodeExtract, OperationCall, QueryFork,
};
use crate::ir::query::{
    CompiledFilterFormulaInfo, CompiledFormulaInfo, CompiledJoinOnFormulaInfo,
    CompiledOrderByFormulaInfo, CompiledQuery,
};
use crate::registry::OperationRegistry;

pub trait QueryMutator {
    fn mutate_query(&self, query: CompiledQuery) -> Result<CompiledQuery>;
}

/// Applies `rewrite` to every formula the query carries, in all five parts.
fn rewrite_formulas(
    query: CompiledQuery,
    rewrite: &mut impl FnMut(Formula) -> Result<Formula>,
) -> Result<CompiledQuery> {
    let rewrite_info = |info: CompiledFormulaInfo,
                        rewrite: &mut dyn FnMut(Formula) -> Result<Formula>|
     -> Result<CompiledFormulaInfo> {
        let CompiledFormulaInfo {
            formula,
            alias,
            avatar_ids,
            original_field_id,
        } = info;
        Ok(CompiledFormulaInfo {
            formula: rewrite(formula)?,
            alias,
            avatar_ids,
            original_field_id,
        })
    };

    let CompiledQuery {
        id,
        level_type,
        froms,
        select,
        group_by,
        order_by,
        filters,
        join_on,
        limit,
        offset,
        distinct,
        meta,
    } = query;

    Ok(CompiledQuery {
        id,
        level_type,
        froms,
        select: select
            .into_iter()
            .map(|info| rewrite_info(info, rewrite))
            .collect::<Result<_>>()?,
        group_by: group_by
            .into_iter()
            .map(|info| rewrite_info(info, rewrite))
            .collect::<Result<_>>()?,
        order_by: order_by
            .into_iter()
            .map(|entry| {
                Ok(CompiledOrderByFormulaInfo {
                    info: rewrite_info(entry.info, rewrite)?,
                    direction: entry.direction,
                })
            })
            .collect::<Result<_>>()?,
        filters: filters
            .into_iter()
            .map(|entry| {
                Ok(CompiledFilterFormulaInfo {
                    info: rewrite_info(entry.info, rewrite)?,
                    original_filter_id: entry.original_filter_id,
                })
            })
            .collect::<Result<_>>()?,
        join_on: join_on
            .into_iter()
            .map(|entry| {
                Ok(CompiledJoinOnFormulaInfo {
                    info: rewrite_info(entry.info, rewrite)?,
                    left_id: entry.left_id,
                    right_id: entry.right_id,
                    join_type: entry.join_type,
                })
            })
            .collect::<Result<_>>()?,
        limit,
        offset,
        distinct,
        meta,
    })
}

/// Folds constant comparisons and boolean operators bottom-up and collapses
/// directly nested idempotent aggregations. Filters reduced to a literal
/// `TRUE` are dropped from the query.
pub struct OptimizingQueryMutator<'a> {
    registry: &'a OperationRegistry,
}

impl<'a> OptimizingQueryMutator<'a> {
    pub fn new(registry: &'a OperationRegistry) -> Self {
        OptimizingQueryMutator { registry }
    }
}

impl QueryMutator for OptimizingQueryMutator<'_> {
    fn mutate_query(&self, query: CompiledQuery) -> Result<CompiledQuery> {
        let mut folder = ConstFolder {
            registry: self.registry,
        };
        let mut query = rewrite_formulas(query, &mut |formula| folder.fold_formula(formula))?;
        query
            .filters
            .retain(|filter| !is_literal_true(&filter.info.formula));
        Ok(query)
    }
}

fn is_literal_true(formula: &Formula) -> bool {
    matches!(
        &formula.kind,
        FormulaItem::Literal(literal) if literal.value == LiteralValue::Boolean(true)
    )
}

fn literal_bool(formula: &Formula) -> Option<bool> {
    match &formula.kind {
        FormulaItem::Literal(Literal {
            value: LiteralValue::Boolean(value),
        }) => Some(*value),
        _ => None,
    }
}

struct ConstFolder<'a> {
    registry: &'a OperationRegistry,
}

impl FormulaFold for ConstFolder<'_> {
    fn fold_item(&mut self, item: FormulaItem) -> Result<FormulaItem> {
        let item = fold::fold_item(self, item)?;
        let FormulaItem::Call(call) = item else {
            return Ok(item);
        };
        Ok(fold_call_constants(call))
    }
}

fn fold_call_constants(mut call: OperationCall) -> FormulaItem {
    let boolean = |value| {
        FormulaItem::Literal(Literal {
            value: LiteralValue::Boolean(value),
        })
    };
    match (call.name.as_str(), call.args.len()) {
        ("==", 2) | ("!=", 2) => {
            let (FormulaItem::Literal(left), FormulaItem::Literal(right)) =
                (&call.args[0].kind, &call.args[1].kind)
            else {
                return FormulaItem::Call(call);
            };
            let equal = left.value == right.value;
            boolean(if call.name == "==" { equal } else { !equal })
        }
        ("and", 2) | ("or", 2) => {
            let absorbing = call.name == "or";
            let known = match (literal_bool(&call.args[0]), literal_bool(&call.args[1])) {
                (Some(value), _) => Some((value, 1)),
                (_, Some(value)) => Some((value, 0)),
                _ => None,
            };
            match known {
                Some((value, _)) if value == absorbing => boolean(value),
                Some((_, keep)) => call.args.remove(keep).kind,
                None => FormulaItem::Call(call),
            }
        }
        ("not", 1) => match literal_bool(&call.args[0]) {
            Some(value) => boolean(!value),
            None => FormulaItem::Call(call),
        },
        _ => collapse_double_aggregation(call),
    }
}

/// `SUM(SUM(x))` and friends mean the same as one application once the
/// inner field is inlined; collapsing keeps one aggregation level per call
/// so fork wrapping stays shallow.
fn collapse_double_aggregation(call: OperationCall) -> FormulaItem {
    let outer_plain = matches!(call.name.as_str(), "sum" | "min" | "max")
        && call.lod.is_none()
        && call.before_filter_by.is_empty()
        && matches!(call.shape, CallShape::Function)
        && call.args.len() == 1;
    if !outer_plain {
        return FormulaItem::Call(call);
    }
    let inner_plain = matches!(
        &call.args[0].kind,
        FormulaItem::Call(inner)
            if inner.name == call.name
                && inner.lod.is_none()
                && inner.before_filter_by.is_empty()
                && matches!(inner.shape, CallShape::Function)
    );
    if !inner_plain {
        return FormulaItem::Call(call);
    }
    let mut call = call;
    call.args.remove(0).kind
}

/// Wraps every aggregation and window call into a [QueryFork] carrying the
/// dimensions the call is computed at: its LOD resolved against the query
/// dimensions, or the query dimensions themselves when there is none.
pub struct ExtendedAggregationQueryMutator<'a> {
    registry: &'a OperationRegistry,
}

impl<'a> ExtendedAggregationQueryMutator<'a> {
    pub fn new(registry: &'a OperationRegistry) -> Self {
        ExtendedAggregationQueryMutator { registry }
    }
}

impl QueryMutator for ExtendedAggregationQueryMutator<'_> {
    fn mutate_query(&self, query: CompiledQuery) -> Result<CompiledQuery> {
        let needs_forking = query.iter_formula_infos().any(|info| {
            inspect::contains_lod(&info.formula)
                || inspect::contains_window_calls(&info.formula)
                || has_before_filters(&info.formula)
        });
        if !needs_forking {
            return Ok(query);
        }

        let global_dims: Vec<Formula> = query
            .group_by
            .iter()
            .map(|info| info.formula.clone())
            .collect();
        let query = rewrite_formulas(query, &mut |formula| {
            ForkWrapper {
                registry: self.registry,
                global_dims: &global_dims,
            }
            .fold_formula(formula)
        })?;
        check_top_level_dimensions(&query, &global_dims)?;
        Ok(query)
    }
}

fn has_before_filters(formula: &Formula) -> bool {
    inspect::walk(formula).iter().any(|node| match &node.kind {
        FormulaItem::Call(call) => !call.before_filter_by.is_empty(),
        FormulaItem::Fork(fork) => !fork.before_filter_by.is_empty(),
        _ => false,
    })
}

fn effective_dimensions(lod: Option<&LodSpecifier>, global: &[Formula]) -> Vec<Formula> {
    match lod {
        None => global.to_vec(),
        Some(spec) => match spec.kind {
            LodKind::Fixed => spec.dims.clone(),
            LodKind::Include => {
                let mut dims = global.to_vec();
                for dim in &spec.dims {
                    if !dims.contains(dim) {
                        dims.push(dim.clone());
                    }
                }
                dims
            }
            LodKind::Exclude => global
                .iter()
                .filter(|dim| !spec.dims.contains(*dim))
                .cloned()
                .collect(),
        },
    }
}

struct ForkWrapper<'a> {
    registry: &'a OperationRegistry,
    global_dims: &'a [Formula],
}

impl ForkWrapper<'_> {
    fn wrap(&self, call: OperationCall) -> QueryFork {
        let dims = effective_dimensions(call.lod.as_ref(), self.global_dims);
        QueryFork {
            join_type: JoinType::Inner,
            joining: dims
                .iter()
                .cloned()
                .map(|expr| JoinConditionNode::SelfEquality { expr })
                .collect(),
            lod: Some(LodSpecifier {
                kind: LodKind::Fixed,
                dims,
            }),
            before_filter_by: call.before_filter_by.clone(),
            result_expr: Box::new(Formula::new(FormulaItem::Call(call))),
        }
    }
}

impl FormulaFold for ForkWrapper<'_> {
    fn fold_item(&mut self, item: FormulaItem) -> Result<FormulaItem> {
        let item = fold::fold_item(self, item)?;
        let FormulaItem::Call(call) = item else {
            return Ok(item);
        };
        let wraps = matches!(call.shape, CallShape::Window(_))
            || self.registry.is_aggregation(&call.name);
        if !wraps {
            return Ok(FormulaItem::Call(call));
        }
        Ok(FormulaItem::Fork(self.wrap(call)))
    }

    // An existing fork already wraps its root call; descend into the call's
    // children only.
    fn fold_fork(&mut self, fork: QueryFork) -> Result<QueryFork> {
        let QueryFork {
            join_type,
            joining,
            result_expr,
            lod,
            before_filter_by,
        } = fork;
        let span = result_expr.span;
        let result_expr = match result_expr.kind {
            FormulaItem::Call(call) => Box::new(
                Formula::new(FormulaItem::Call(fold::fold_call(self, call)?)).with_span(span),
            ),
            kind => Box::new(self.fold_formula(Formula { kind, span })?),
        };
        Ok(QueryFork {
            join_type,
            joining,
            result_expr,
            lod,
            before_filter_by,
        })
    }
}

/// Forks at the top level of a query formula must compute at a subset of
/// the query dimensions; anything else cannot land on the result grid.
fn check_top_level_dimensions(query: &CompiledQuery, global_dims: &[Formula]) -> Result<()> {
    let global: HashSet<NodeExtract> = global_dims.iter().map(NodeExtract::of).collect();
    for info in query.iter_formula_infos() {
        let mut forks = Vec::new();
        collect_top_level_forks(&info.formula, &mut forks);
        for fork in forks {
            for cond in &fork.joining {
                let JoinConditionNode::SelfEquality { expr } = cond else {
                    continue;
                };
                if !global.contains(&NodeExtract::of(expr)) {
                    return Err(Error::new_simple(
                        "Invalid top-level LOD dimension found in expression",
                    )
                    .with_code(codes::INCOMPATIBLE_LOD_DIMENSIONS));
                }
            }
        }
    }
    Ok(())
}

fn collect_top_level_forks<'f>(formula: &'f Formula, out: &mut Vec<&'f QueryFork>) {
    if let FormulaItem::Fork(fork) = &formula.kind {
        out.push(fork);
        return;
    }
    for child in index::children(formula) {
        collect_top_level_forks(child, out);
    }
}
