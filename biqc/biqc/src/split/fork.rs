//! Splits [QueryFork] subtrees into grouped sub-queries.
//!
//! Forks are planted by the compile-stage aggregation mutator: every
//! aggregation and window call is wrapped in a fork carrying the dimensions
//! it must be computed at, its join spec and its before-filter set. This
//! splitter pulls each group of compatible forks into one sub-query grouped
//! by the fork dimensions and joins it back to the base through them.
//!
//! Forks nested inside a relocated result expression stay where they are;
//! the driving mutator re-runs the splitter until none are left.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::{Error, Result};
use crate::ir::ast::index::{self, NodeHierarchyIndex};
use crate::ir::ast::{
    inspect, Formula, FormulaItem, JoinConditionNode, JoinType, LiteralValue, NodeExtract,
    QueryFork,
};
use crate::ir::query::{CompiledQuery, QueryPart};
use crate::registry::OperationRegistry;
use crate::split::mask::{AddFormulaInfo, AliasedFormulaSplitMask, QuerySplitMask, SubqueryType};
use crate::split::splitter::{
    from_ids_of, group_by_aliases, replace_extract_sites, MultiQuerySplitter, SPLITTABLE_PARTS,
};
use crate::utils::IdArena;

pub struct QueryForkSplitter<'a> {
    registry: &'a OperationRegistry,
}

impl<'a> QueryForkSplitter<'a> {
    pub fn new(registry: &'a OperationRegistry) -> Self {
        QueryForkSplitter { registry }
    }
}

/// A top-level fork occurrence in one of the query's formulas. Paths stop
/// at the first fork on each branch.
struct ForkSite<'f> {
    part: QueryPart,
    formula_idx: usize,
    path: NodeHierarchyIndex,
    fork: &'f QueryFork,
    /// `before_filter_by` restricted to filter field ids actually present.
    bfb: BTreeSet<String>,
}

fn collect_fork_sites<'f>(
    formula: &'f Formula,
    path: NodeHierarchyIndex,
    out: &mut Vec<(NodeHierarchyIndex, &'f QueryFork)>,
) {
    if let FormulaItem::Fork(fork) = &formula.kind {
        out.push((path, fork));
        return;
    }
    for (position, child) in index::children(formula).into_iter().enumerate() {
        collect_fork_sites(child, path.child(position), out);
    }
}

fn is_window_fork(fork: &QueryFork) -> bool {
    matches!(
        &fork.result_expr.kind,
        FormulaItem::Call(call) if matches!(call.shape, crate::ir::ast::CallShape::Window(_))
    )
}

/// Forks with equal signatures are computed in one sub-query.
#[derive(PartialEq)]
struct ForkSignature {
    join_type: JoinType,
    joining: Vec<String>,
    before_filter_by: BTreeSet<String>,
    dims: BTreeSet<NodeExtract>,
    child_forks: BTreeSet<NodeExtract>,
}

fn condition_fingerprint(condition: &JoinConditionNode) -> String {
    match condition {
        JoinConditionNode::SelfEquality { expr } => {
            format!("self:{}", NodeExtract::of(expr).as_str())
        }
        JoinConditionNode::Binary {
            operator,
            expr,
            fork_expr,
        } => format!(
            "{}:{}:{}",
            operator.operation_name(),
            NodeExtract::of(expr).as_str(),
            NodeExtract::of(fork_expr).as_str()
        ),
    }
}

/// The dimensions a fork computes at: its resolved LOD, or the query's own
/// grid when the compile stage left none.
fn fork_dimensions(fork: &QueryFork, query: &CompiledQuery) -> Vec<Formula> {
    match &fork.lod {
        Some(lod) => lod.dims.clone(),
        None => query
            .group_by
            .iter()
            .map(|info| info.formula.clone())
            .collect(),
    }
}

fn signature_of(site: &ForkSite, query: &CompiledQuery) -> ForkSignature {
    ForkSignature {
        join_type: site.fork.join_type,
        joining: site.fork.joining.iter().map(condition_fingerprint).collect(),
        before_filter_by: site.bfb.clone(),
        dims: NodeExtract::of_many(&fork_dimensions(site.fork, query)),
        child_forks: inspect::collect_forks(&site.fork.result_expr)
            .into_iter()
            .map(|fork| NodeExtract::of(&Formula::new(FormulaItem::Fork(fork.clone()))))
            .collect(),
    }
}

impl QueryForkSplitter<'_> {
    fn push_join_key(
        &self,
        query: &CompiledQuery,
        expr: &Formula,
        ids: &mut IdArena,
        add_formulas: &mut Vec<AddFormulaInfo>,
        alias_by_extract: &mut BTreeMap<NodeExtract, String>,
    ) {
        let extract = NodeExtract::of(expr);
        if alias_by_extract.contains_key(&extract) {
            return;
        }
        let alias = ids.expr_id();
        add_formulas.push(AddFormulaInfo {
            alias: alias.clone(),
            expr: expr.clone(),
            from_ids: from_ids_of(query, expr),
            is_group_by: !self.registry.is_aggregate_expression(expr)
                && !self.registry.is_constant_expression(expr),
        });
        alias_by_extract.insert(extract, alias);
    }
}

fn normalize_condition(
    condition: JoinConditionNode,
    aliases: &BTreeMap<NodeExtract, &str>,
) -> Result<JoinConditionNode> {
    Ok(match condition {
        JoinConditionNode::SelfEquality { expr } => JoinConditionNode::SelfEquality {
            expr: replace_extract_sites(expr, aliases)?.0,
        },
        JoinConditionNode::Binary {
            operator,
            expr,
            fork_expr,
        } => JoinConditionNode::Binary {
            operator,
            expr: replace_extract_sites(expr, aliases)?.0,
            fork_expr: replace_extract_sites(fork_expr, aliases)?.0,
        },
    })
}

impl MultiQuerySplitter for QueryForkSplitter<'_> {
    fn get_split_masks(
        &self,
        query: &CompiledQuery,
        ids: &mut IdArena,
    ) -> Result<Vec<QuerySplitMask>> {
        let available_filter_ids: BTreeSet<&str> = query
            .filters
            .iter()
            .filter_map(|filter| filter.info.original_field_id.as_deref())
            .collect();

        let mut sites = vec![];
        for part in SPLITTABLE_PARTS {
            for idx in 0..query.part_len(part) {
                let Some(info) = query.formula_at(part, idx) else {
                    continue;
                };
                let mut found = vec![];
                collect_fork_sites(&info.formula, NodeHierarchyIndex::root(), &mut found);
                for (path, fork) in found {
                    let bfb = fork
                        .before_filter_by
                        .iter()
                        .filter(|id| available_filter_ids.contains(id.as_str()))
                        .cloned()
                        .collect();
                    sites.push(ForkSite {
                        part,
                        formula_idx: idx,
                        path,
                        fork,
                        bfb,
                    });
                }
            }
        }
        if sites.is_empty() {
            return Ok(vec![]);
        }

        // Window forks go first: they stay on top of the aggregation grid,
        // keeping any nested forks for the next pass. Only the windows at
        // the lowest before-filter level are taken.
        let mut subquery_type = SubqueryType::Default;
        let smallest_window_bfb = sites
            .iter()
            .filter(|site| is_window_fork(site.fork))
            .map(|site| &site.bfb)
            .min_by(|a, b| a.len().cmp(&b.len()).then_with(|| a.cmp(b)))
            .cloned();
        if let Some(smallest) = smallest_window_bfb {
            if sites.iter().all(|site| smallest.is_subset(&site.bfb)) {
                sites.retain(|site| is_window_fork(site.fork) && site.bfb == smallest);
                subquery_type = SubqueryType::WindowFunc;
            }
        }

        // Filters hosting a relocated fork are resolved on the outer level;
        // they must not be inherited by any sub-query.
        let split_filter_indices: BTreeSet<usize> = sites
            .iter()
            .filter(|site| site.part == QueryPart::Filters)
            .map(|site| site.formula_idx)
            .collect();

        let mut groups: Vec<(ForkSignature, Vec<&ForkSite>)> = vec![];
        for site in &sites {
            let signature = signature_of(site, query);
            match groups.iter_mut().find(|(s, _)| *s == signature) {
                Some((_, members)) => members.push(site),
                None => groups.push((signature, vec![site])),
            }
        }

        let mut masks = Vec::with_capacity(groups.len());
        for (signature, members) in &groups {
            let subquery_id = ids.query_id();
            let lead = members[0].fork;

            let mut dims = fork_dimensions(lead, query);
            let mut joining = lead.joining.clone();
            if dims.is_empty() && joining.is_empty() {
                // Dimensionless fork: join every row through a constant key.
                let one = Formula::literal(LiteralValue::Integer(1));
                dims.push(one.clone());
                joining.push(JoinConditionNode::SelfEquality { expr: one });
            }

            let mut add_formulas = vec![];
            let mut alias_by_extract = BTreeMap::new();
            for dim in &dims {
                self.push_join_key(query, dim, ids, &mut add_formulas, &mut alias_by_extract);
            }
            for condition in &joining {
                match condition {
                    JoinConditionNode::SelfEquality { expr } => {
                        self.push_join_key(query, expr, ids, &mut add_formulas, &mut alias_by_extract);
                    }
                    JoinConditionNode::Binary {
                        expr, fork_expr, ..
                    } => {
                        self.push_join_key(query, fork_expr, ids, &mut add_formulas, &mut alias_by_extract);
                        self.push_join_key(query, expr, ids, &mut add_formulas, &mut alias_by_extract);
                    }
                }
            }
            let alias_refs: BTreeMap<NodeExtract, &str> = alias_by_extract
                .iter()
                .map(|(extract, alias)| (extract.clone(), alias.as_str()))
                .collect();
            let joining = joining
                .into_iter()
                .map(|condition| normalize_condition(condition, &alias_refs))
                .collect::<Result<Vec<_>>>()?;

            let filter_indices = (0..query.filters.len())
                .filter(|idx| {
                    let matched = query.filters[*idx]
                        .info
                        .original_field_id
                        .as_deref()
                        .is_some_and(|id| signature.before_filter_by.contains(id));
                    !matched && !split_filter_indices.contains(idx)
                })
                .collect();

            let mut result_alias_by_extract: BTreeMap<NodeExtract, String> = BTreeMap::new();
            let mut formula_split_masks = vec![];
            for site in members {
                let extract = NodeExtract::of(&site.fork.result_expr);
                let alias = match result_alias_by_extract.get(&extract) {
                    Some(alias) => alias.clone(),
                    None => {
                        let alias = ids.expr_id();
                        result_alias_by_extract.insert(extract, alias.clone());
                        alias
                    }
                };
                formula_split_masks.push(AliasedFormulaSplitMask::new(
                    alias,
                    site.part,
                    site.formula_idx,
                    site.path.clone(),
                    site.path.child(0),
                )?);
            }

            masks.push(QuerySplitMask {
                subquery_type,
                subquery_id,
                formula_split_masks,
                add_formulas,
                add_filters: vec![],
                filter_indices,
                join_type: Some(lead.join_type),
                joining,
                is_base: false,
            });
        }
        Ok(masks)
    }

    /// The relocated expression computes inside a grouped sub-query now;
    /// its LOD and before-filter decorations are consumed.
    fn mutate_split_node(&self, node: Formula) -> Formula {
        let Formula { kind, span } = node;
        let kind = match kind {
            FormulaItem::Call(mut call) => {
                call.lod = None;
                call.before_filter_by.clear();
                FormulaItem::Call(call)
            }
            other => other,
        };
        Formula { kind, span }
    }

    /// A lone window mask over a generated base collapses into it: the
    /// window expression computes next to the base formulas instead of
    /// joining back, as long as grids and filters agree.
    fn optimize_query_split_masks(&self, mut masks: Vec<QuerySplitMask>) -> Vec<QuerySplitMask> {
        let unify = masks.len() == 2
            && masks[0].is_base
            && masks[0].subquery_type == SubqueryType::GeneratedBase
            && masks[1].subquery_type == SubqueryType::WindowFunc
            && masks[0].dimension_extracts() == masks[1].dimension_extracts()
            && masks[0].filter_indices == masks[1].filter_indices;
        if !unify {
            return masks;
        }
        let window = masks.remove(1);
        let base = &mut masks[0];
        base.formula_split_masks.extend(window.formula_split_masks);
        let known: BTreeSet<NodeExtract> = base
            .add_formulas
            .iter()
            .map(|af| NodeExtract::of(&af.expr))
            .collect();
        for af in window.add_formulas {
            if !known.contains(&NodeExtract::of(&af.expr)) {
                base.add_formulas.push(af);
            }
        }
        masks
    }

    /// After forks are relocated every measure is a plain column reference;
    /// grouping happened inside the sub-queries and must not repeat on the
    /// cropped level.
    fn mutate_cropped_query(&self, query: CompiledQuery) -> Result<CompiledQuery> {
        let keep_group_by = {
            let gb_aliases = group_by_aliases(&query);
            let statuses: BTreeSet<bool> = query
                .select
                .iter()
                .filter(|info| {
                    !info
                        .alias
                        .as_deref()
                        .is_some_and(|alias| gb_aliases.contains(alias))
                })
                .filter(|info| !self.registry.is_constant_expression(&info.formula))
                .map(|info| self.registry.is_aggregate_expression(&info.formula))
                .collect();
            if statuses.len() > 1 {
                return Err(Error::new_assert(
                    "cropped query mixes aggregated and unaggregated select items",
                ));
            }
            statuses.contains(&true)
        };
        let mut query = query;
        if !keep_group_by {
            query.group_by.clear();
        }
        Ok(query)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::codes;
    use crate::ir::ast::{CallShape, LodKind, LodSpecifier, WindowGrouping, WindowSpec};
    use crate::ir::query::{
        CompiledFilterFormulaInfo, CompiledFormulaInfo, CompiledMultiQuery, ExecutionLevel,
        JoinedFromObject, QueryMetaInfo, BASE_QUERY_ID,
    };
    use crate::split::splitter::{split_query, SplitOutcome};
    use crate::split::testing::{avatar_from, registry, render, select_info};

    fn fork(dims: Vec<Formula>, result: Formula) -> Formula {
        Formula::new(FormulaItem::Fork(QueryFork {
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
            before_filter_by: BTreeSet::new(),
            result_expr: Box::new(result),
        }))
    }

    fn query_with(
        select: Vec<CompiledFormulaInfo>,
        group_by: Vec<CompiledFormulaInfo>,
        filters: Vec<CompiledFilterFormulaInfo>,
    ) -> CompiledQuery {
        CompiledQuery {
            id: BASE_QUERY_ID.into(),
            level_type: ExecutionLevel::SourceDb,
            froms: JoinedFromObject {
                root_from_id: Some("ava_1".into()),
                froms: vec![avatar_from("ava_1", &["city", "cat", "sales", "qty"])],
            },
            select,
            group_by,
            order_by: vec![],
            filters,
            join_on: vec![],
            limit: None,
            offset: None,
            distinct: false,
            meta: QueryMetaInfo::default(),
        }
    }

    fn split(query: &CompiledQuery) -> SplitOutcome {
        let registry = registry();
        let splitter = QueryForkSplitter::new(&registry);
        let mut ids = IdArena::seeded(CompiledMultiQuery::single(query.clone()).all_ids());
        split_query(&registry, &splitter, query, &mut ids)
            .unwrap()
            .unwrap()
    }

    #[test]
    fn single_fork_elects_its_own_subquery_as_base() {
        let city = Formula::field("ava_1.city");
        let measure = fork(
            vec![city.clone()],
            Formula::func("sum", vec![Formula::field("ava_1.sales")]),
        );
        let query = query_with(
            vec![
                select_info(city.clone(), "dim_1", &["ava_1"]),
                select_info(measure, "m_1", &["ava_1"]),
            ],
            vec![select_info(city, "dim_1", &["ava_1"])],
            vec![],
        );

        let outcome = split(&query);

        assert_eq!(outcome.subqueries.len(), 1);
        insta::assert_snapshot!(render(&outcome.subqueries[0]), @r###"
        q_0 [source_db]
          select: e_1=SUM([ava_1.sales]) @["ava_1"]; e_0=[ava_1.city] @["ava_1"]
          group_by: e_0=[ava_1.city] @["ava_1"]
          from: ava_1(city,cat,sales,qty) root=ava_1
        "###);
        insta::assert_snapshot!(render(&outcome.cropped), @r###"
        qq [source_db]
          select: dim_1=[e_0] @["q_0"]; m_1=[e_1] @["q_0"]
          from: q_0(e_1,e_0) root=q_0
        "###);
    }

    #[test]
    fn forks_with_matching_signatures_share_one_subquery() {
        let city = Formula::field("ava_1.city");
        let m_1 = fork(
            vec![city.clone()],
            Formula::func("sum", vec![Formula::field("ava_1.sales")]),
        );
        let m_2 = fork(
            vec![city.clone()],
            Formula::func("sum", vec![Formula::field("ava_1.qty")]),
        );
        let query = query_with(
            vec![
                select_info(city.clone(), "dim_1", &["ava_1"]),
                select_info(m_1, "m_1", &["ava_1"]),
                select_info(m_2, "m_2", &["ava_1"]),
            ],
            vec![select_info(city, "dim_1", &["ava_1"])],
            vec![],
        );

        let outcome = split(&query);

        assert_eq!(outcome.subqueries.len(), 1);
        insta::assert_snapshot!(render(&outcome.subqueries[0]), @r###"
        q_0 [source_db]
          select: e_1=SUM([ava_1.sales]) @["ava_1"]; e_2=SUM([ava_1.qty]) @["ava_1"]; e_0=[ava_1.city] @["ava_1"]
          group_by: e_0=[ava_1.city] @["ava_1"]
          from: ava_1(city,cat,sales,qty) root=ava_1
        "###);
        insta::assert_snapshot!(render(&outcome.cropped), @r###"
        qq [source_db]
          select: dim_1=[e_0] @["q_0"]; m_1=[e_1] @["q_0"]; m_2=[e_2] @["q_0"]
          from: q_0(e_1,e_2,e_0) root=q_0
        "###);
    }

    #[test]
    fn incompatible_fork_dimensions_poison_and_skip() {
        let m_1 = fork(
            vec![Formula::field("ava_1.cat")],
            Formula::func("sum", vec![Formula::field("ava_1.sales")]),
        );
        let m_2 = fork(
            vec![Formula::field("ava_1.city")],
            Formula::func("sum", vec![Formula::field("ava_1.qty")]),
        );
        let query = query_with(
            vec![
                select_info(m_1, "m_1", &["ava_1"]),
                select_info(m_2, "m_2", &["ava_1"]),
            ],
            vec![],
            vec![],
        );

        let outcome = split(&query);

        assert!(outcome.subqueries.is_empty());
        for info in &outcome.cropped.select {
            let marker = info.formula.kind.as_error_node().expect("poisoned");
            assert_eq!(marker.code, Some(codes::INCOMPATIBLE_LOD_DIMENSIONS));
        }
    }

    #[test]
    fn window_fork_unifies_into_the_generated_base() {
        let city = Formula::field("ava_1.city");
        let rank = Formula::call(
            "rank",
            vec![Formula::field("ava_1.sales")],
            CallShape::Window(WindowSpec {
                grouping: WindowGrouping::Total,
                ordering: vec![],
            }),
        );
        let window = fork(vec![city.clone()], rank);
        let scalar = Formula::func("length", vec![Formula::field("ava_1.cat")]);
        let query = query_with(
            vec![
                select_info(city.clone(), "dim_1", &["ava_1"]),
                select_info(window, "m_w", &["ava_1"]),
                select_info(scalar, "m_c", &["ava_1"]),
            ],
            vec![select_info(city, "dim_1", &["ava_1"])],
            vec![],
        );

        let outcome = split(&query);

        // One merged sub-query, no join back.
        assert_eq!(outcome.subqueries.len(), 1);
        assert!(outcome.cropped.join_on.is_empty());
        insta::assert_snapshot!(render(&outcome.subqueries[0]), @r###"
        q_1 [source_db]
          select: e_2=LENGTH([ava_1.cat]) @["ava_1"]; e_1=RANK([ava_1.sales] TOTAL) @["ava_1"]; e_3=[ava_1.city] @["ava_1"]
          group_by: e_3=[ava_1.city] @["ava_1"]
          from: ava_1(city,cat,sales,qty) root=ava_1
        "###);
        insta::assert_snapshot!(render(&outcome.cropped), @r###"
        qq [source_db]
          select: dim_1=[e_3] @["q_1"]; m_w=[e_1] @["q_1"]; m_c=[e_2] @["q_1"]
          from: q_1(e_2,e_1,e_3) root=q_1
        "###);
    }

    #[test]
    fn before_filters_stay_out_of_the_fork_subquery() {
        let city = Formula::field("ava_1.city");
        let measure = Formula::new(FormulaItem::Fork(QueryFork {
            join_type: JoinType::Inner,
            joining: vec![JoinConditionNode::SelfEquality { expr: city.clone() }],
            lod: Some(LodSpecifier {
                kind: LodKind::Fixed,
                dims: vec![city.clone()],
            }),
            before_filter_by: BTreeSet::from(["f_1".to_string()]),
            result_expr: Box::new(Formula::func("sum", vec![Formula::field("ava_1.sales")])),
        }));

        let filter = CompiledFilterFormulaInfo {
            info: CompiledFormulaInfo {
                formula: Formula::binary(">", Formula::field("ava_1.qty"), Formula::literal(LiteralValue::Integer(0))),
                alias: None,
                avatar_ids: ["ava_1".to_string()].into(),
                original_field_id: Some("f_1".into()),
            },
            original_filter_id: Some("flt_1".into()),
        };
        let query = query_with(
            vec![
                select_info(city.clone(), "dim_1", &["ava_1"]),
                select_info(measure, "m_1", &["ava_1"]),
            ],
            vec![select_info(city, "dim_1", &["ava_1"])],
            vec![filter],
        );

        let outcome = split(&query);

        // The filter lands only in the generated base; the inner join then
        // restricts the unfiltered aggregate to the surviving cities.
        assert_eq!(outcome.subqueries.len(), 2);
        insta::assert_snapshot!(render(&outcome.subqueries[0]), @r###"
        q_1 [source_db]
          select: e_2=[ava_1.city] @["ava_1"]
          group_by: e_2=[ava_1.city] @["ava_1"]
          filters: [ava_1.qty] > 0
          from: ava_1(city,cat,sales,qty) root=ava_1
        "###);
        insta::assert_snapshot!(render(&outcome.subqueries[1]), @r###"
        q_0 [source_db]
          select: e_1=SUM([ava_1.sales]) @["ava_1"]; e_0=[ava_1.city] @["ava_1"]
          group_by: e_0=[ava_1.city] @["ava_1"]
          from: ava_1(city,cat,sales,qty) root=ava_1
        "###);
        insta::assert_snapshot!(render(&outcome.cropped), @r###"
        qq [source_db]
          select: dim_1=[e_2] @["q_1"]; m_1=[e_1] @["q_0"]
          join_on: [e_2] _dneq [e_0] [q_1 inner q_0]
          from: q_1(e_2); q_0(e_1,e_0) root=q_1
        "###);
    }

    #[test]
    fn dimensionless_fork_joins_through_a_constant_key() {
        let city = Formula::field("ava_1.city");
        let total = fork(
            vec![],
            Formula::func("sum", vec![Formula::field("ava_1.sales")]),
        );
        let query = query_with(
            vec![
                select_info(city.clone(), "dim_1", &["ava_1"]),
                select_info(total, "m_t", &["ava_1"]),
            ],
            vec![select_info(city, "dim_1", &["ava_1"])],
            vec![],
        );

        let outcome = split(&query);

        assert_eq!(outcome.subqueries.len(), 2);
        insta::assert_snapshot!(render(&outcome.subqueries[0]), @r###"
        q_1 [source_db]
          select: e_2=[ava_1.city] @["ava_1"]; e_3=1 @[]
          group_by: e_2=[ava_1.city] @["ava_1"]
          from: ava_1(city,cat,sales,qty) root=ava_1
        "###);
        insta::assert_snapshot!(render(&outcome.subqueries[1]), @r###"
        q_0 [source_db]
          select: e_1=SUM([ava_1.sales]) @["ava_1"]; e_0=1 @[]
          from: ava_1(city,cat,sales,qty) root=ava_1
        "###);
        insta::assert_snapshot!(render(&outcome.cropped), @r###"
        qq [source_db]
          select: dim_1=[e_2] @["q_1"]; m_t=[e_1] @["q_0"]
          join_on: [e_3] _dneq [e_0] [q_1 inner q_0]
          from: q_1(e_2,e_3); q_0(e_1,e_0) root=q_1
        "###);
    }
}
