//! Split masks: the unit of work a multi-query splitter reports.
//!
//! A mask describes one future sub-query: which subtrees of the outer
//! query's formulas move into it, which extra expressions (dimensions, join
//! keys) it must select, which filters it absorbs, and how the outer query
//! joins back onto it.

use std::collections::BTreeSet;

use crate::error::{codes, Error, Result, WithErrorInfo};
use crate::ir::ast::{
    Formula, JoinConditionNode, JoinType, NodeExtract, NodeHierarchyIndex,
};
use crate::ir::query::{CompiledFilterFormulaInfo, QueryId, QueryPart};

/// What kind of sub-query a mask will produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum SubqueryType {
    /// A relocated aggregation.
    Default,
    /// Relocated window functions. Merged into the base whenever the window
    /// runs over the same rows the base produces.
    WindowFunc,
    /// A base the framework created because no reported mask could serve as
    /// one.
    GeneratedBase,
}

/// One relocation site inside one formula of the outer query.
///
/// The subtree at `inner_node_idx` becomes a select item of the sub-query
/// under `alias`; the subtree at `outer_node_idx` of the outer formula is
/// replaced by a field reference to that alias. `inner_node_idx` always
/// extends `outer_node_idx`: they are equal for plain relocations, while for
/// forks the outer index points at the fork node and the inner one at its
/// result expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AliasedFormulaSplitMask {
    pub alias: String,
    pub query_part: QueryPart,
    pub formula_idx: usize,
    pub outer_node_idx: NodeHierarchyIndex,
    pub inner_node_idx: NodeHierarchyIndex,
}

impl AliasedFormulaSplitMask {
    pub fn new(
        alias: impl Into<String>,
        query_part: QueryPart,
        formula_idx: usize,
        outer_node_idx: NodeHierarchyIndex,
        inner_node_idx: NodeHierarchyIndex,
    ) -> Result<Self> {
        if !inner_node_idx.indices.starts_with(&outer_node_idx.indices) {
            return Err(Error::new_assert(format!(
                "inner split index {inner_node_idx} does not extend outer index {outer_node_idx}"
            )));
        }
        Ok(AliasedFormulaSplitMask {
            alias: alias.into(),
            query_part,
            formula_idx,
            outer_node_idx,
            inner_node_idx,
        })
    }

    /// A whole-subtree relocation: inner and outer point at the same node.
    pub fn at_node(
        alias: impl Into<String>,
        query_part: QueryPart,
        formula_idx: usize,
        node_idx: NodeHierarchyIndex,
    ) -> Self {
        AliasedFormulaSplitMask {
            alias: alias.into(),
            query_part,
            formula_idx,
            outer_node_idx: node_idx.clone(),
            inner_node_idx: node_idx,
        }
    }
}

/// An expression the sub-query must select in addition to the relocated
/// subtrees, typically a dimension the outer query joins back on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddFormulaInfo {
    pub alias: String,
    pub expr: Formula,
    pub from_ids: BTreeSet<String>,
    /// Whether the sub-query groups by this expression.
    pub is_group_by: bool,
}

/// Everything needed to cut one sub-query out of an outer query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuerySplitMask {
    pub subquery_type: SubqueryType,
    pub subquery_id: QueryId,
    pub formula_split_masks: Vec<AliasedFormulaSplitMask>,
    pub add_formulas: Vec<AddFormulaInfo>,
    /// Filters the sub-query applies on top of the indexed ones.
    pub add_filters: Vec<CompiledFilterFormulaInfo>,
    /// Indices into the outer query's filter list this sub-query absorbs.
    pub filter_indices: BTreeSet<usize>,
    pub join_type: Option<JoinType>,
    /// How the outer query joins back onto this sub-query. Empty for the
    /// base and for joinless (re-leveling) splits.
    pub joining: Vec<JoinConditionNode>,
    pub is_base: bool,
}

impl QuerySplitMask {
    pub fn group_by_count(&self) -> usize {
        self.add_formulas.iter().filter(|af| af.is_group_by).count()
    }

    /// Structural digests of the dimensions this sub-query groups by.
    pub fn dimension_extracts(&self) -> BTreeSet<NodeExtract> {
        self.add_formulas
            .iter()
            .filter(|af| af.is_group_by)
            .map(|af| NodeExtract::of(&af.expr))
            .collect()
    }

    /// Whether every join condition is a plain self-equality. Only such
    /// masks may be elected as the base.
    pub fn has_direct_equality_join(&self) -> bool {
        self.joining
            .iter()
            .all(|cond| matches!(cond, JoinConditionNode::SelfEquality { .. }))
    }
}

/// Rejects mask sets in which two relocation sites overlap: masks pointing
/// into the same formula must target disjoint subtrees, nested or identical
/// outer indices cannot both be relocated.
pub fn check_mask_conflicts(masks: &[QuerySplitMask]) -> Result<()> {
    let mut seen: Vec<&AliasedFormulaSplitMask> = vec![];
    for mask in masks {
        for fsm in &mask.formula_split_masks {
            if let Some(other) = seen.iter().find(|o| {
                o.query_part == fsm.query_part
                    && o.formula_idx == fsm.formula_idx
                    && o.outer_node_idx.overlaps(&fsm.outer_node_idx)
            }) {
                return Err(Error::new_simple(format!(
                    "conflicting split masks over {}[{}]: node {} overlaps node {}",
                    fsm.query_part, fsm.formula_idx, other.outer_node_idx, fsm.outer_node_idx
                ))
                .with_code(codes::MASK_CONFLICT));
            }
            seen.push(fsm);
        }
    }
    Ok(())
}
