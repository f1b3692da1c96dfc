//! The mask-application framework shared by all multi-query splitters.
//!
//! A splitter only decides *what* to relocate by reporting
//! [`QuerySplitMask`]s; this module does the cutting:
//!
//! 1. verify the masks target disjoint subtrees and compatible dimensions,
//! 2. elect or generate a base sub-query carrying the outer dimensions, the
//!    un-absorbed filters and every subtree the masks left uncovered,
//! 3. give the splitter one chance to rearrange the mask set,
//! 4. copy dimensions other masks join through onto the base,
//! 5. materialize one sub-query per mask,
//! 6. crop the outer query down to references into the sub-queries.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::{codes, Error, Result};
use crate::ir::ast::index::{children, replace_at};
use crate::ir::ast::{
    inspect, Formula, FormulaItem, JoinConditionNode, NodeExtract, NodeHierarchyIndex,
};
use crate::ir::query::{
    CompiledFilterFormulaInfo, CompiledFormulaInfo, CompiledJoinOnFormulaInfo,
    CompiledOrderByFormulaInfo, CompiledQuery, FromColumn, FromObject, JoinedFromObject,
    QueryPart, SubqueryFromObject,
};
use crate::registry::OperationRegistry;
use crate::split::mask::{
    check_mask_conflicts, AddFormulaInfo, AliasedFormulaSplitMask, QuerySplitMask, SubqueryType,
};
use crate::utils::IdArena;

/// The query parts whose formulas a mask may point into. Group-by entries
/// are never masked directly; they follow their select twins.
pub(crate) const SPLITTABLE_PARTS: [QueryPart; 3] =
    [QueryPart::Select, QueryPart::OrderBy, QueryPart::Filters];

pub trait MultiQuerySplitter {
    /// Reports the sub-queries this splitter wants cut out of `query`.
    /// An empty list leaves the query alone.
    fn get_split_masks(
        &self,
        query: &CompiledQuery,
        ids: &mut IdArena,
    ) -> Result<Vec<QuerySplitMask>>;

    /// Rewrites a relocated subtree on its way into a sub-query select.
    fn mutate_split_node(&self, node: Formula) -> Formula {
        node
    }

    /// Post-processes one materialized sub-query.
    fn mutate_subquery(
        &self,
        subquery: CompiledQuery,
        _mask: &QuerySplitMask,
    ) -> Result<CompiledQuery> {
        Ok(subquery)
    }

    /// Post-processes the cropped outer query.
    fn mutate_cropped_query(&self, query: CompiledQuery) -> Result<CompiledQuery> {
        Ok(query)
    }

    /// One chance to rearrange the mask set after base election.
    fn optimize_query_split_masks(&self, masks: Vec<QuerySplitMask>) -> Vec<QuerySplitMask> {
        masks
    }

    /// Whether the cropped query keeps the outer query's own join conditions,
    /// remapped onto the sub-queries. Splitters that spread one FROM list
    /// across several sub-queries need this; splitters whose sub-queries
    /// inherit the whole FROM list do not.
    fn preserves_outer_joins(&self) -> bool {
        false
    }
}

#[derive(Debug)]
pub(crate) struct SplitOutcome {
    pub cropped: CompiledQuery,
    pub subqueries: Vec<CompiledQuery>,
}

/// Applies one splitter to one query. `Ok(None)` means the splitter reported
/// no masks and the query stays as it is.
pub(crate) fn split_query(
    registry: &OperationRegistry,
    splitter: &dyn MultiQuerySplitter,
    query: &CompiledQuery,
    ids: &mut IdArena,
) -> Result<Option<SplitOutcome>> {
    let masks = splitter.get_split_masks(query, ids)?;
    if masks.is_empty() {
        return Ok(None);
    }
    check_mask_conflicts(&masks)?;
    if !dimensions_compatible(&masks) {
        return Ok(Some(SplitOutcome {
            cropped: poison_incompatible(query, &masks)?,
            subqueries: vec![],
        }));
    }

    let masks = patch_masks_with_base(registry, query, masks, ids)?;
    let masks = splitter.optimize_query_split_masks(masks);
    let masks = patch_base_dimensions(registry, masks, ids);

    let mut subqueries = Vec::with_capacity(masks.len());
    for mask in &masks {
        let subquery = generate_subquery(splitter, query, mask)?;
        subqueries.push(splitter.mutate_subquery(subquery, mask)?);
    }

    let cropped = crop_query(registry, query, &masks, splitter.preserves_outer_joins())?;
    let cropped = splitter.mutate_cropped_query(cropped)?;
    Ok(Some(SplitOutcome {
        cropped,
        subqueries,
    }))
}

/// Splitting is abandoned: every masked subtree becomes an error node and
/// the query is otherwise left alone. The error travels to the result set
/// instead of failing the whole request.
fn poison_incompatible(query: &CompiledQuery, masks: &[QuerySplitMask]) -> Result<CompiledQuery> {
    let mut query = query.clone();
    for mask in masks {
        for fsm in &mask.formula_split_masks {
            let info = match fsm.query_part {
                QueryPart::Select => query.select.get_mut(fsm.formula_idx),
                QueryPart::GroupBy => query.group_by.get_mut(fsm.formula_idx),
                QueryPart::OrderBy => query.order_by.get_mut(fsm.formula_idx).map(|ob| &mut ob.info),
                QueryPart::Filters => query.filters.get_mut(fsm.formula_idx).map(|fl| &mut fl.info),
            }
            .ok_or_else(|| {
                Error::new_assert(format!(
                    "split mask points at missing formula {}[{}]",
                    fsm.query_part, fsm.formula_idx
                ))
            })?;
            let marker = Formula::error_node(
                "LOD dimensions are incompatible",
                codes::INCOMPATIBLE_LOD_DIMENSIONS,
            );
            let formula = std::mem::replace(&mut info.formula, Formula::null());
            info.formula = replace_at(formula, &fsm.outer_node_idx, marker)?;
        }
    }
    Ok(query)
}

/// All sub-queries must agree on one dimension lineup: the union of the
/// requested dimension sets has to be one of the requested sets itself.
/// Otherwise no join grid exists and the affected measures become errors.
fn dimensions_compatible(masks: &[QuerySplitMask]) -> bool {
    let sets: Vec<BTreeSet<NodeExtract>> =
        masks.iter().map(|m| m.dimension_extracts()).collect();
    let union: BTreeSet<NodeExtract> = sets.iter().flatten().cloned().collect();
    sets.contains(&union)
}

pub(crate) fn group_by_aliases(query: &CompiledQuery) -> BTreeSet<&str> {
    query
        .group_by
        .iter()
        .filter_map(|info| info.alias.as_deref())
        .collect()
}

/// Child slots that are standalone expressions. Decoration slots (window
/// dimensions and orderings, LOD dims, fork join conditions) stay with their
/// owner and are never relocated on their own.
fn autonomous_children(node: &Formula) -> Vec<(usize, &Formula)> {
    let all = children(node);
    let autonomous = match &node.kind {
        FormulaItem::Call(call) => call.args.len(),
        FormulaItem::Fork(_) => 0,
        _ => all.len(),
    };
    all.into_iter().take(autonomous).enumerate().collect()
}

/// The FROM entry a compiled field name resolves through. Avatar columns are
/// referenced by column id, sub-query columns by alias.
pub(crate) fn from_of_field<'a>(query: &'a CompiledQuery, name: &str) -> Option<&'a str> {
    query
        .froms
        .froms
        .iter()
        .find(|from| {
            from.columns()
                .iter()
                .any(|col| col.id == name || col.name == name)
        })
        .map(|from| from.id())
}

/// FROM entries a formula's field references resolve through.
pub(crate) fn from_ids_of(query: &CompiledQuery, formula: &Formula) -> BTreeSet<String> {
    inspect::used_field_names(formula)
        .iter()
        .filter_map(|name| from_of_field(query, name))
        .map(str::to_string)
        .collect()
}

/// Replaces every maximal subtree whose digest appears in `map` with a field
/// reference to the mapped alias. Matching stops at the first (largest) hit
/// on each branch, so a dimension nested inside another mapped expression is
/// not clipped out of it.
pub(crate) fn replace_extract_sites(
    formula: Formula,
    map: &BTreeMap<NodeExtract, &str>,
) -> Result<(Formula, bool)> {
    if map.is_empty() {
        return Ok((formula, false));
    }
    let mut sites = vec![];
    collect_extract_sites(&formula, map, NodeHierarchyIndex::root(), &mut sites);
    let updated = !sites.is_empty();
    let mut result = formula;
    for (path, alias) in sites {
        result = replace_at(result, &path, Formula::field(alias))?;
    }
    Ok((result, updated))
}

fn collect_extract_sites(
    node: &Formula,
    map: &BTreeMap<NodeExtract, &str>,
    path: NodeHierarchyIndex,
    out: &mut Vec<(NodeHierarchyIndex, String)>,
) {
    if let Some(alias) = map.get(&NodeExtract::of(node)) {
        out.push((path, alias.to_string()));
        return;
    }
    for (position, child) in children(node).into_iter().enumerate() {
        collect_extract_sites(child, map, path.child(position), out);
    }
}

/// Relocation sites for the parts of each formula no mask covers. Everything
/// referencing a FROM object must land in some sub-query, or the cropped
/// query would read columns it no longer has. Field-free subtrees stay put.
fn counterpart_masks(
    query: &CompiledQuery,
    masks: &[QuerySplitMask],
    ids: &mut IdArena,
) -> Result<Vec<AliasedFormulaSplitMask>> {
    let gb_aliases = group_by_aliases(query);
    let mut counterparts = vec![];
    for part in SPLITTABLE_PARTS {
        for idx in 0..query.part_len(part) {
            let Some(info) = query.formula_at(part, idx) else {
                continue;
            };
            // Dimensions are substituted through the base, not relocated.
            if info
                .alias
                .as_deref()
                .is_some_and(|a| gb_aliases.contains(a))
            {
                continue;
            }
            if !inspect::contains_fields(&info.formula) {
                continue;
            }
            let covered: Vec<&NodeHierarchyIndex> = masks
                .iter()
                .flat_map(|m| &m.formula_split_masks)
                .filter(|fsm| fsm.query_part == part && fsm.formula_idx == idx)
                .map(|fsm| &fsm.outer_node_idx)
                .collect();
            // Untouched filters stay on the outer query as they are.
            if part == QueryPart::Filters && covered.is_empty() {
                continue;
            }
            let mut sites = vec![];
            uncovered_sites(&info.formula, &covered, NodeHierarchyIndex::root(), &mut sites);
            for site in sites {
                counterparts.push(AliasedFormulaSplitMask::at_node(
                    ids.expr_id(),
                    part,
                    idx,
                    site,
                ));
            }
        }
    }
    Ok(counterparts)
}

/// Descends towards mask sites, recording the maximal subtrees beside them.
/// Field-free subtrees are left in place.
fn uncovered_sites(
    node: &Formula,
    covered: &[&NodeHierarchyIndex],
    path: NodeHierarchyIndex,
    out: &mut Vec<NodeHierarchyIndex>,
) {
    if !inspect::contains_fields(node) {
        return;
    }
    if covered.iter().any(|c| c.indices == path.indices) {
        return;
    }
    let masks_below = covered.iter().any(|c| {
        c.indices.len() > path.indices.len() && c.indices[..path.indices.len()] == path.indices[..]
    });
    if !masks_below {
        out.push(path);
        return;
    }
    for (position, child) in autonomous_children(node) {
        uncovered_sites(child, covered, path.child(position), out);
    }
}

/// Ensures exactly one mask is the base. An existing mask is elected when it
/// can serve; otherwise a fresh base mask is generated from the outer
/// query's own group-by list.
fn patch_masks_with_base(
    registry: &OperationRegistry,
    query: &CompiledQuery,
    mut masks: Vec<QuerySplitMask>,
    ids: &mut IdArena,
) -> Result<Vec<QuerySplitMask>> {
    let counterparts = counterpart_masks(query, &masks, ids)?;

    // Joinless splits (re-leveling) need no dimension grid; the first mask
    // is the base by convention and all masks stand side by side.
    if masks
        .iter()
        .all(|m| m.joining.is_empty() && m.join_type.is_none())
    {
        if !counterparts.is_empty() {
            return Err(Error::new_assert(
                "joinless split masks left formula subtrees uncovered",
            ));
        }
        masks[0].is_base = true;
        return Ok(masks);
    }

    let formula_split_filter_indices: BTreeSet<usize> = masks
        .iter()
        .flat_map(|m| &m.formula_split_masks)
        .filter(|fsm| fsm.query_part == QueryPart::Filters)
        .map(|fsm| fsm.formula_idx)
        .collect();
    let base_filter_indices: BTreeSet<usize> = (0..query.filters.len())
        .filter(|i| !formula_split_filter_indices.contains(i))
        .collect();

    let candidate = if counterparts.is_empty() {
        find_base_candidate(registry, query, &masks, &base_filter_indices)
    } else {
        None
    };

    match candidate {
        Some(base_id) => {
            for mask in &mut masks {
                mask.is_base = mask.subquery_id == base_id;
            }
            masks.sort_by_key(|mask| !mask.is_base);
        }
        None => {
            let add_formulas = query
                .group_by
                .iter()
                .map(|info| AddFormulaInfo {
                    alias: ids.expr_id(),
                    expr: info.formula.clone(),
                    from_ids: info.avatar_ids.clone(),
                    is_group_by: !registry.is_constant_expression(&info.formula),
                })
                .collect();
            masks.insert(
                0,
                QuerySplitMask {
                    subquery_type: SubqueryType::GeneratedBase,
                    subquery_id: ids.query_id(),
                    formula_split_masks: counterparts,
                    add_formulas,
                    add_filters: vec![],
                    filter_indices: base_filter_indices,
                    join_type: None,
                    joining: vec![],
                    is_base: true,
                },
            );
        }
    }
    Ok(masks)
}

/// An existing mask can serve as the base when it carries every outer
/// dimension, absorbs exactly the filters the base must own, and joins back
/// by plain equality. A dimensionless outer query accepts any mask with the
/// widest dimension set.
fn find_base_candidate(
    registry: &OperationRegistry,
    query: &CompiledQuery,
    masks: &[QuerySplitMask],
    base_filter_indices: &BTreeSet<usize>,
) -> Option<String> {
    let outer_dims: BTreeSet<NodeExtract> = query
        .group_by
        .iter()
        .filter(|info| !registry.is_constant_expression(&info.formula))
        .map(|info| NodeExtract::of(&info.formula))
        .collect();
    let max_dimensions = masks.iter().map(|m| m.group_by_count()).max()?;

    let mut candidate = None;
    let mut has_all_dimensions = false;
    let mut has_base_filters = false;
    let mut has_direct_join = false;
    for mask in masks {
        if mask.group_by_count() != max_dimensions {
            continue;
        }
        if !mask.dimension_extracts().is_superset(&outer_dims) {
            continue;
        }
        candidate = Some(mask.subquery_id.clone());
        has_all_dimensions = mask.group_by_count() == outer_dims.len();
        has_base_filters = mask.filter_indices == *base_filter_indices;
        has_direct_join = mask.has_direct_equality_join();
    }
    if has_all_dimensions && has_base_filters && has_direct_join {
        return candidate;
    }
    if outer_dims.is_empty() {
        return candidate;
    }
    None
}

/// Copies dimensions other masks declared onto the base, so the cropped
/// query can join every sub-query through base aliases. Aggregate join
/// keys stay on their own sub-query; only dimensions and constants may
/// land on the base without disturbing its grid.
fn patch_base_dimensions(
    registry: &OperationRegistry,
    mut masks: Vec<QuerySplitMask>,
    ids: &mut IdArena,
) -> Vec<QuerySplitMask> {
    let mut known: BTreeSet<NodeExtract> = masks
        .iter()
        .find(|m| m.is_base)
        .map(|base| {
            base.add_formulas
                .iter()
                .map(|af| NodeExtract::of(&af.expr))
                .collect()
        })
        .unwrap_or_default();
    let mut extra = vec![];
    for mask in masks.iter().filter(|m| !m.is_base) {
        for af in &mask.add_formulas {
            if !af.is_group_by && !registry.is_constant_expression(&af.expr) {
                continue;
            }
            if known.insert(NodeExtract::of(&af.expr)) {
                extra.push(AddFormulaInfo {
                    alias: ids.expr_id(),
                    ..af.clone()
                });
            }
        }
    }
    if let Some(base) = masks.iter_mut().find(|m| m.is_base) {
        base.add_formulas.extend(extra);
    }
    masks
}

/// Materializes one mask into a sub-query. Relocated subtrees become the
/// select list, add-formulas contribute dimensions and join keys, and the
/// inherited FROM clause keeps the original sources reachable.
fn generate_subquery(
    splitter: &dyn MultiQuerySplitter,
    query: &CompiledQuery,
    mask: &QuerySplitMask,
) -> Result<CompiledQuery> {
    let mut select: Vec<CompiledFormulaInfo> = vec![];
    for fsm in &mask.formula_split_masks {
        let info = query.formula_at(fsm.query_part, fsm.formula_idx).ok_or_else(|| {
            Error::new_assert(format!(
                "split mask points at missing formula {}[{}]",
                fsm.query_part, fsm.formula_idx
            ))
        })?;
        let node = fsm.inner_node_idx.get(&info.formula).ok_or_else(|| {
            Error::new_assert(format!(
                "split mask points at missing node {} in {}[{}]",
                fsm.inner_node_idx, fsm.query_part, fsm.formula_idx
            ))
        })?;
        let formula = splitter.mutate_split_node(node.clone());
        if let Some(existing) = select
            .iter()
            .find(|s| s.alias.as_deref() == Some(fsm.alias.as_str()))
        {
            if NodeExtract::of(&existing.formula) != NodeExtract::of(&formula) {
                return Err(Error::new_assert(format!(
                    "split masks relocate different expressions under one alias `{}`",
                    fsm.alias
                )));
            }
            continue;
        }
        select.push(CompiledFormulaInfo {
            formula,
            alias: Some(fsm.alias.clone()),
            avatar_ids: info.avatar_ids.clone(),
            original_field_id: info.original_field_id.clone(),
        });
    }

    let mut group_by = vec![];
    for af in &mask.add_formulas {
        if select
            .iter()
            .any(|s| s.alias.as_deref() == Some(af.alias.as_str()))
        {
            continue;
        }
        let info = CompiledFormulaInfo {
            formula: af.expr.clone(),
            alias: Some(af.alias.clone()),
            avatar_ids: af.from_ids.clone(),
            original_field_id: None,
        };
        if af.is_group_by {
            group_by.push(info.clone());
        }
        select.push(info);
    }

    let filters = query
        .filters
        .iter()
        .enumerate()
        .filter(|(idx, _)| mask.filter_indices.contains(idx))
        .map(|(_, filter)| filter.clone())
        .chain(mask.add_filters.iter().cloned())
        .collect();

    Ok(CompiledQuery {
        id: mask.subquery_id.clone(),
        level_type: query.level_type,
        froms: query.froms.clone(),
        select,
        group_by,
        order_by: vec![],
        filters,
        join_on: query.join_on.clone(),
        limit: None,
        offset: None,
        distinct: false,
        meta: query.meta.clone(),
    })
}

struct QueryCropper<'a> {
    registry: &'a OperationRegistry,
    masks: &'a [QuerySplitMask],
    gb_aliases: BTreeSet<&'a str>,
    /// Dimension aliases the base exposes, by structural digest.
    base_dim_by_extract: BTreeMap<NodeExtract, &'a str>,
    /// Which sub-query every relocated alias lives in.
    alias_to_subquery: BTreeMap<&'a str, &'a str>,
    /// Relocated subtrees by digest, for remapping formulas the masks cannot
    /// point into (group-by entries, join conditions).
    relocated_by_extract: BTreeMap<NodeExtract, &'a str>,
}

impl QueryCropper<'_> {
    /// Crops one formula. `Ok(None)` drops it, which is only legal for
    /// filters a sub-query absorbed whole.
    fn crop_info(
        &self,
        part: QueryPart,
        idx: usize,
        info: &CompiledFormulaInfo,
    ) -> Result<Option<CompiledFormulaInfo>> {
        if self.registry.is_constant_expression(&info.formula) {
            return Ok(Some(info.clone()));
        }

        let is_dimension = part == QueryPart::GroupBy
            || info
                .alias
                .as_deref()
                .is_some_and(|a| self.gb_aliases.contains(a));
        if is_dimension && !self.base_dim_by_extract.is_empty() {
            let extract = NodeExtract::of(&info.formula);
            let alias = self.base_dim_by_extract.get(&extract).ok_or_else(|| {
                Error::new_assert(format!(
                    "dimension `{}` is not carried by the base sub-query",
                    info.formula
                ))
            })?;
            return self.reattributed(info, Formula::field(*alias)).map(Some);
        }

        let mut formula = info.formula.clone();
        let mut updated = false;
        for fsm in self.masks.iter().flat_map(|m| &m.formula_split_masks) {
            if fsm.query_part != part || fsm.formula_idx != idx {
                continue;
            }
            formula = replace_at(formula, &fsm.outer_node_idx, Formula::field(&fsm.alias))?;
            updated = true;
        }
        // Leftover relocated pieces: dimensions buried in filters map to
        // base aliases; in joinless splits every relocated leaf maps to its
        // sub-query alias.
        let digest_map = if self.base_dim_by_extract.is_empty() {
            &self.relocated_by_extract
        } else {
            &self.base_dim_by_extract
        };
        let (formula, digest_updated) = replace_extract_sites(formula, digest_map)?;
        updated |= digest_updated;

        if !updated {
            // Field-free expressions compute from nothing and stay verbatim.
            if !inspect::contains_fields(&info.formula) {
                return Ok(Some(info.clone()));
            }
            if part == QueryPart::Filters {
                return Ok(None);
            }
            return Err(Error::new_assert(format!(
                "formula `{}` in {part}[{idx}] was not relocated by any mask",
                info.formula
            )));
        }
        self.reattributed(info, formula).map(Some)
    }

    /// Rewraps a cropped formula, recomputing which sub-queries it now
    /// reads from.
    fn reattributed(
        &self,
        info: &CompiledFormulaInfo,
        formula: Formula,
    ) -> Result<CompiledFormulaInfo> {
        let mut avatar_ids = BTreeSet::new();
        for name in inspect::used_field_names(&formula) {
            let subquery = self.alias_to_subquery.get(name.as_str()).ok_or_else(|| {
                Error::new_assert(format!(
                    "cropped formula references unrelocated field `{name}`"
                ))
            })?;
            avatar_ids.insert(subquery.to_string());
        }
        Ok(CompiledFormulaInfo {
            formula,
            alias: info.alias.clone(),
            avatar_ids,
            original_field_id: info.original_field_id.clone(),
        })
    }
}

/// Rebuilds the outer query so it reads from its new sub-queries.
fn crop_query(
    registry: &OperationRegistry,
    query: &CompiledQuery,
    masks: &[QuerySplitMask],
    preserve_outer_joins: bool,
) -> Result<CompiledQuery> {
    let base = masks
        .iter()
        .find(|m| m.is_base)
        .ok_or_else(|| Error::new_assert("split mask set has no base"))?;

    let mut alias_to_subquery: BTreeMap<&str, &str> = BTreeMap::new();
    let mut relocated_by_extract: BTreeMap<NodeExtract, &str> = BTreeMap::new();
    for mask in masks {
        for fsm in &mask.formula_split_masks {
            alias_to_subquery.insert(&fsm.alias, &mask.subquery_id);
            if let Some(info) = query.formula_at(fsm.query_part, fsm.formula_idx) {
                if let Some(node) = fsm.inner_node_idx.get(&info.formula) {
                    relocated_by_extract
                        .entry(NodeExtract::of(node))
                        .or_insert(&fsm.alias);
                }
            }
        }
        for af in &mask.add_formulas {
            alias_to_subquery.insert(&af.alias, &mask.subquery_id);
            relocated_by_extract
                .entry(NodeExtract::of(&af.expr))
                .or_insert(&af.alias);
        }
    }

    let cropper = QueryCropper {
        registry,
        masks,
        gb_aliases: group_by_aliases(query),
        base_dim_by_extract: base
            .add_formulas
            .iter()
            .filter(|af| af.is_group_by)
            .map(|af| (NodeExtract::of(&af.expr), af.alias.as_str()))
            .collect(),
        alias_to_subquery,
        relocated_by_extract,
    };

    if !cropper.base_dim_by_extract.is_empty() {
        for info in &query.group_by {
            if registry.is_constant_expression(&info.formula) {
                continue;
            }
            if !cropper
                .base_dim_by_extract
                .contains_key(&NodeExtract::of(&info.formula))
            {
                return Err(Error::new_assert(format!(
                    "group-by expression `{}` is not carried by the base sub-query",
                    info.formula
                )));
            }
        }
    }

    let mut select = vec![];
    for (idx, info) in query.select.iter().enumerate() {
        if let Some(new_info) = cropper.crop_info(QueryPart::Select, idx, info)? {
            select.push(new_info);
        }
    }
    let mut group_by = vec![];
    for (idx, info) in query.group_by.iter().enumerate() {
        if let Some(new_info) = cropper.crop_info(QueryPart::GroupBy, idx, info)? {
            group_by.push(new_info);
        }
    }
    let mut order_by = vec![];
    for (idx, ob) in query.order_by.iter().enumerate() {
        if let Some(new_info) = cropper.crop_info(QueryPart::OrderBy, idx, &ob.info)? {
            order_by.push(CompiledOrderByFormulaInfo {
                info: new_info,
                direction: ob.direction,
            });
        }
    }
    let mut filters = vec![];
    for (idx, filter) in query.filters.iter().enumerate() {
        if base.filter_indices.contains(&idx) {
            continue;
        }
        if let Some(new_info) = cropper.crop_info(QueryPart::Filters, idx, &filter.info)? {
            filters.push(CompiledFilterFormulaInfo {
                info: new_info,
                original_filter_id: filter.original_filter_id.clone(),
            });
        }
    }

    let mut join_on = vec![];
    for mask in masks.iter().filter(|m| !m.is_base) {
        if let Some(condition) = join_condition_for_mask(base, mask)? {
            join_on.push(condition);
        }
    }
    if preserve_outer_joins {
        join_on.extend(remap_join_on(
            query,
            masks,
            &cropper.relocated_by_extract,
            &cropper.alias_to_subquery,
        )?);
    }

    let froms = JoinedFromObject {
        root_from_id: Some(base.subquery_id.clone()),
        froms: masks
            .iter()
            .map(|mask| {
                let mut seen = BTreeSet::new();
                let columns = mask
                    .formula_split_masks
                    .iter()
                    .map(|fsm| fsm.alias.as_str())
                    .chain(mask.add_formulas.iter().map(|af| af.alias.as_str()))
                    .filter(|alias| seen.insert(*alias))
                    .map(|alias| FromColumn::new(alias, alias))
                    .collect();
                FromObject::Subquery(SubqueryFromObject {
                    id: mask.subquery_id.clone(),
                    alias: mask.subquery_id.clone(),
                    columns,
                    query_id: mask.subquery_id.clone(),
                })
            })
            .collect(),
    };

    Ok(CompiledQuery {
        id: query.id.clone(),
        level_type: query.level_type,
        froms,
        select,
        group_by,
        order_by,
        filters,
        join_on,
        limit: query.limit,
        offset: query.offset,
        distinct: query.distinct,
        meta: query.meta.clone(),
    })
}

/// Builds the join between the base and one sub-query. Every condition
/// compares an expression on the base side with its counterpart on the
/// sub-query side; equality goes through the null-safe `_dneq` so NULL
/// dimension values still pair up.
fn join_condition_for_mask(
    base: &QuerySplitMask,
    mask: &QuerySplitMask,
) -> Result<Option<CompiledJoinOnFormulaInfo>> {
    if mask.joining.is_empty() {
        return Ok(None);
    }

    // Aliases shared through identical add-formulas, sub-query side to base
    // side.
    let base_by_extract: BTreeMap<NodeExtract, &str> = base
        .add_formulas
        .iter()
        .map(|af| (NodeExtract::of(&af.expr), af.alias.as_str()))
        .collect();
    let mut to_base_alias: BTreeMap<&str, &str> = BTreeMap::new();
    for af in &mask.add_formulas {
        if let Some(base_alias) = base_by_extract.get(&NodeExtract::of(&af.expr)) {
            to_base_alias.insert(af.alias.as_str(), base_alias);
        }
    }

    let mut parts = vec![];
    for condition in &mask.joining {
        let (name, left, right) = match condition {
            JoinConditionNode::SelfEquality { expr } => ("_dneq", expr.clone(), expr.clone()),
            JoinConditionNode::Binary {
                operator,
                expr,
                fork_expr,
            } => {
                let name = match operator {
                    crate::ir::ast::BinaryJoinOperator::Eq => "_dneq",
                    other => other.operation_name(),
                };
                (name, expr.clone(), fork_expr.clone())
            }
        };
        let left = rename_fields(left, &to_base_alias)?;
        parts.push(Formula::binary(name, left, right));
    }
    let formula = Formula::chained("and", parts)
        .ok_or_else(|| Error::new_assert("join condition chain cannot be empty"))?;
    let join_type = mask
        .join_type
        .ok_or_else(|| Error::new_assert("joining split mask carries no join type"))?;
    Ok(Some(CompiledJoinOnFormulaInfo {
        info: CompiledFormulaInfo {
            formula,
            alias: None,
            avatar_ids: [base.subquery_id.clone(), mask.subquery_id.clone()].into(),
            original_field_id: None,
        },
        left_id: base.subquery_id.clone(),
        right_id: mask.subquery_id.clone(),
        join_type,
    }))
}

/// Renames field references through the alias map; everything else is kept.
fn rename_fields(formula: Formula, renames: &BTreeMap<&str, &str>) -> Result<Formula> {
    use crate::ir::ast::fold::{self, FormulaFold};
    use crate::ir::ast::FieldRef;

    struct Renamer<'a> {
        renames: &'a BTreeMap<&'a str, &'a str>,
    }
    impl FormulaFold for Renamer<'_> {
        fn fold_item(&mut self, item: FormulaItem) -> Result<FormulaItem> {
            if let FormulaItem::Field(field) = item {
                let name = match self.renames.get(field.name.as_str()) {
                    Some(renamed) => renamed.to_string(),
                    None => field.name,
                };
                return Ok(FormulaItem::Field(FieldRef { name }));
            }
            fold::fold_item(self, item)
        }
    }
    Renamer { renames }.fold_formula(formula)
}

/// Remaps the outer query's own join conditions onto the sub-queries, for
/// joinless splits that spread one FROM list across several sub-queries.
fn remap_join_on(
    query: &CompiledQuery,
    masks: &[QuerySplitMask],
    relocated_by_extract: &BTreeMap<NodeExtract, &str>,
    alias_to_subquery: &BTreeMap<&str, &str>,
) -> Result<Vec<CompiledJoinOnFormulaInfo>> {
    // Which sub-query each original FROM entry landed in.
    let mut from_to_subquery: BTreeMap<&str, &str> = BTreeMap::new();
    for mask in masks {
        for fsm in &mask.formula_split_masks {
            let Some(info) = query.formula_at(fsm.query_part, fsm.formula_idx) else {
                continue;
            };
            let Some(node) = fsm.inner_node_idx.get(&info.formula) else {
                continue;
            };
            for name in inspect::used_field_names(node) {
                if let Some(from_id) = from_of_field(query, &name) {
                    from_to_subquery.entry(from_id).or_insert(&mask.subquery_id);
                }
            }
        }
        for af in &mask.add_formulas {
            for name in inspect::used_field_names(&af.expr) {
                if let Some(from_id) = from_of_field(query, &name) {
                    from_to_subquery.entry(from_id).or_insert(&mask.subquery_id);
                }
            }
        }
    }

    let mut remapped = vec![];
    for entry in &query.join_on {
        let (formula, _) = replace_extract_sites(entry.info.formula.clone(), relocated_by_extract)?;
        for name in inspect::used_field_names(&formula) {
            if !alias_to_subquery.contains_key(name.as_str()) {
                return Err(Error::new_assert(format!(
                    "join condition field `{name}` was not relocated into any sub-query"
                )));
            }
        }
        let left_id = map_join_side(&from_to_subquery, &entry.left_id)?;
        let right_id = map_join_side(&from_to_subquery, &entry.right_id)?;
        let avatar_ids = [left_id.clone(), right_id.clone()].into_iter().collect();
        remapped.push(CompiledJoinOnFormulaInfo {
            info: CompiledFormulaInfo {
                formula,
                alias: None,
                avatar_ids,
                original_field_id: None,
            },
            left_id,
            right_id,
            join_type: entry.join_type,
        });
    }
    Ok(remapped)
}

fn map_join_side(from_to_subquery: &BTreeMap<&str, &str>, id: &str) -> Result<String> {
    from_to_subquery
        .get(id)
        .map(|subquery| subquery.to_string())
        .ok_or_else(|| {
            Error::new_assert(format!("join side `{id}` does not appear in any sub-query"))
        })
}
